use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::contact::domain::audience::{
    apply_attribute_updates, apply_subscription_list_updates, apply_tag_updates, AttributeUpdate,
    ScopedSubscriptionListUpdate, TagGroupUpdate,
};
use crate::contact::domain::channel::{AssociatedChannel, ChannelScope};

/// Last-known contact identity, as confirmed by the backend.
///
/// `named_user_id` being set does not imply `!is_anonymous` and vice versa:
/// the backend may report a non-anonymous contact before any named user is
/// known locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityState {
    #[serde(rename = "contactID")]
    pub contact_id: String,
    pub is_anonymous: bool,
    #[serde(rename = "namedUserID", default, skip_serializing_if = "Option::is_none")]
    pub named_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_associated_date: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_date: Option<Timestamp>,
}

impl IdentityState {
    pub fn anonymous(contact_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            contact_id: contact_id.into(),
            is_anonymous: true,
            named_user_id: None,
            channel_associated_date: Some(now),
            resolve_date: Some(now),
        }
    }

    /// Backend contact IDs may come back with different casing.
    pub fn same_contact(&self, other_contact_id: &str) -> bool {
        self.contact_id.to_lowercase() == other_contact_id.to_lowercase()
    }
}

/// Audience data accumulated while the contact is anonymous.
///
/// Only kept to populate a [`ConflictEvent`] if the anonymous contact is
/// later replaced by a different one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousData {
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub channels: BTreeSet<AssociatedChannel>,
    #[serde(default)]
    pub subscription_lists: BTreeMap<String, Vec<ChannelScope>>,
}

impl AnonymousData {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.attributes.is_empty()
            && self.channels.is_empty()
            && self.subscription_lists.is_empty()
    }

    pub fn apply(
        &mut self,
        tags: Option<&[TagGroupUpdate]>,
        attributes: Option<&[AttributeUpdate]>,
        subscription_lists: Option<&[ScopedSubscriptionListUpdate]>,
    ) {
        if let Some(tags) = tags {
            apply_tag_updates(&mut self.tags, tags);
        }
        if let Some(attributes) = attributes {
            apply_attribute_updates(&mut self.attributes, attributes);
        }
        if let Some(lists) = subscription_lists {
            apply_subscription_list_updates(&mut self.subscription_lists, lists);
        }
    }
}

/// Bearer token bound to one contact ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub identifier: String,
    pub token: String,
    pub expiration: Timestamp,
}

/// Derived, read-only view of the identity used by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactIdInfo {
    pub contact_id: String,
    pub is_stable: bool,
    pub named_user_id: Option<String>,
    pub resolve_date: Option<Timestamp>,
}

/// Anonymous audience data that was orphaned when the contact changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEvent {
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub channels: BTreeSet<AssociatedChannel>,
    pub subscription_lists: BTreeMap<String, Vec<ChannelScope>>,
    pub conflicting_named_user_id: Option<String>,
}

impl ConflictEvent {
    pub fn from_anonymous(data: AnonymousData, conflicting_named_user_id: Option<String>) -> Self {
        Self {
            tags: data.tags,
            attributes: data.attributes,
            channels: data.channels,
            subscription_lists: data.subscription_lists,
            conflicting_named_user_id,
        }
    }
}
