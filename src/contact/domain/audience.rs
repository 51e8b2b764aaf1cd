//! Audience edits (tags, attributes, subscription lists).
//!
//! Two families of functions live here:
//! * `collapse_*` reduce a concatenated list of edits to the smallest list with
//!   the same final effect. Used when merging queued `update` operations.
//! * `apply_*` fold edits into a local projection. Used for the anonymous
//!   contact cache.
//!
//! Collapse rules are "last operation per (entity, key) wins":
//! * tags are keyed by group, with `set` absorbing later `add`/`remove` on the
//!   same group;
//! * attributes are keyed by attribute name;
//! * subscription lists are keyed by `(list, scope)`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::contact::domain::channel::ChannelScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagGroupUpdateType {
    Add,
    Remove,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroupUpdate {
    pub group: String,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub kind: TagGroupUpdateType,
}

impl TagGroupUpdate {
    pub fn new<I, S>(group: impl Into<String>, tags: I, kind: TagGroupUpdateType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group: group.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeUpdateType {
    Set,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub attribute: String,
    #[serde(rename = "type")]
    pub kind: AttributeUpdateType,
    #[serde(rename = "jsonValue", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    pub date: Timestamp,
}

impl AttributeUpdate {
    pub fn set(attribute: impl Into<String>, value: serde_json::Value, date: Timestamp) -> Self {
        Self {
            attribute: attribute.into(),
            kind: AttributeUpdateType::Set,
            value: Some(value),
            date,
        }
    }

    pub fn remove(attribute: impl Into<String>, date: Timestamp) -> Self {
        Self {
            attribute: attribute.into(),
            kind: AttributeUpdateType::Remove,
            value: None,
            date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionListUpdateType {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedSubscriptionListUpdate {
    #[serde(rename = "listId")]
    pub list_id: String,
    #[serde(rename = "type")]
    pub kind: SubscriptionListUpdateType,
    pub scope: ChannelScope,
    pub date: Timestamp,
}

impl ScopedSubscriptionListUpdate {
    pub fn new(
        list_id: impl Into<String>,
        kind: SubscriptionListUpdateType,
        scope: ChannelScope,
        date: Timestamp,
    ) -> Self {
        Self {
            list_id: list_id.into(),
            kind,
            scope,
            date,
        }
    }
}

// ================================
// Collapse
// ================================

/// Collapses tag edits per group.
///
/// Output order is every `set` group, then every `add` group, then every
/// `remove` group, each in first-seen group order. Empty adds and removes are
/// dropped; an empty set is kept since it clears the group.
pub fn collapse_tag_updates(updates: &[TagGroupUpdate]) -> Vec<TagGroupUpdate> {
    let mut groups: Vec<&str> = Vec::new();
    let mut sets: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut adds: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut removes: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for update in updates {
        let group = update.group.as_str();
        if !groups.contains(&group) {
            groups.push(group);
        }

        let tags = update.tags.iter().map(String::as_str);
        match update.kind {
            TagGroupUpdateType::Set => {
                adds.remove(group);
                removes.remove(group);
                sets.insert(group, tags.collect());
            }
            TagGroupUpdateType::Add => {
                if let Some(set) = sets.get_mut(group) {
                    set.extend(tags);
                } else {
                    let added = adds.entry(group).or_default();
                    for tag in tags {
                        if let Some(removed) = removes.get_mut(group) {
                            removed.remove(tag);
                        }
                        added.insert(tag);
                    }
                }
            }
            TagGroupUpdateType::Remove => {
                if let Some(set) = sets.get_mut(group) {
                    for tag in tags {
                        set.remove(tag);
                    }
                } else {
                    let removed = removes.entry(group).or_default();
                    for tag in tags {
                        if let Some(added) = adds.get_mut(group) {
                            added.remove(tag);
                        }
                        removed.insert(tag);
                    }
                }
            }
        }
    }

    let mut collapsed = Vec::new();
    let passes = [
        (&sets, TagGroupUpdateType::Set, true),
        (&adds, TagGroupUpdateType::Add, false),
        (&removes, TagGroupUpdateType::Remove, false),
    ];
    for (by_group, kind, keep_empty) in passes {
        for group in &groups {
            if let Some(tags) = by_group.get(group) {
                if keep_empty || !tags.is_empty() {
                    collapsed.push(TagGroupUpdate::new(*group, tags.iter().copied(), kind));
                }
            }
        }
    }
    collapsed
}

/// Keeps the last edit per attribute, ordered by where that edit occurred.
pub fn collapse_attribute_updates(updates: &[AttributeUpdate]) -> Vec<AttributeUpdate> {
    last_per_key(updates, |u| u.attribute.clone())
}

/// Keeps the last edit per `(list, scope)`, ordered by where that edit occurred.
pub fn collapse_subscription_list_updates(
    updates: &[ScopedSubscriptionListUpdate],
) -> Vec<ScopedSubscriptionListUpdate> {
    last_per_key(updates, |u| (u.list_id.clone(), u.scope))
}

fn last_per_key<T, K, F>(updates: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut kept: Vec<T> = updates
        .iter()
        .rev()
        .filter(|u| seen.insert(key(u)))
        .cloned()
        .collect();
    kept.reverse();
    kept
}

// ================================
// Apply
// ================================

pub fn apply_tag_updates(tags: &mut BTreeMap<String, BTreeSet<String>>, updates: &[TagGroupUpdate]) {
    for update in updates {
        let incoming = update.tags.iter().cloned();
        match update.kind {
            TagGroupUpdateType::Set => {
                tags.insert(update.group.clone(), incoming.collect());
            }
            TagGroupUpdateType::Add => {
                tags.entry(update.group.clone()).or_default().extend(incoming);
            }
            TagGroupUpdateType::Remove => {
                if let Some(existing) = tags.get_mut(&update.group) {
                    for tag in &update.tags {
                        existing.remove(tag);
                    }
                }
            }
        }
        if tags.get(&update.group).is_some_and(|t| t.is_empty()) {
            tags.remove(&update.group);
        }
    }
}

pub fn apply_attribute_updates(
    attributes: &mut BTreeMap<String, serde_json::Value>,
    updates: &[AttributeUpdate],
) {
    for update in updates {
        match (update.kind, &update.value) {
            (AttributeUpdateType::Set, Some(value)) => {
                attributes.insert(update.attribute.clone(), value.clone());
            }
            (AttributeUpdateType::Set, None) => {
                log::warn!("[AUDIENCE] attribute set without value: {}", update.attribute);
            }
            (AttributeUpdateType::Remove, _) => {
                attributes.remove(&update.attribute);
            }
        }
    }
}

pub fn apply_subscription_list_updates(
    lists: &mut BTreeMap<String, Vec<ChannelScope>>,
    updates: &[ScopedSubscriptionListUpdate],
) {
    for update in updates {
        let scopes = lists.entry(update.list_id.clone()).or_default();
        match update.kind {
            SubscriptionListUpdateType::Subscribe => {
                if !scopes.contains(&update.scope) {
                    scopes.push(update.scope);
                }
            }
            SubscriptionListUpdateType::Unsubscribe => {
                scopes.retain(|s| *s != update.scope);
            }
        }
        if scopes.is_empty() {
            lists.remove(&update.list_id);
        }
    }
}
