use chrono::Duration;

use crate::clock::Timestamp;
use crate::contact::api::IdentifyResult;
use crate::contact::domain::audience::{
    collapse_attribute_updates, collapse_subscription_list_updates, collapse_tag_updates,
};
use crate::contact::domain::{
    AnonymousData, AssociatedChannel, AuthToken, ConflictEvent, ContactIdInfo, ContactOperation,
    IdentityState, OperationEntry, OperationKind,
};
use crate::contact::engine::state::EngineState;
use crate::contact::engine::types::{
    AudienceOverrides, ChannelChange, ChannelOverride, ContactAudienceUpdate, ContactUpdate,
    EngineCommand, OperationGroup,
};

// =====================================================================
// Token
// =====================================================================

pub fn valid_token<'a>(state: &'a EngineState, now: Timestamp) -> Option<&'a AuthToken> {
    state.tokens.valid_for(state.contact_id(), now)
}

fn has_valid_token(state: &EngineState, now: Timestamp) -> bool {
    valid_token(state, now).is_some()
}

// =====================================================================
// Skipping
// =====================================================================

pub fn is_skippable(state: &EngineState, operation: &ContactOperation, now: Timestamp) -> bool {
    match operation {
        ContactOperation::Update {
            tag_updates,
            attribute_updates,
            subscription_lists_updates,
        } => {
            tag_updates.as_ref().map_or(true, Vec::is_empty)
                && attribute_updates.as_ref().map_or(true, Vec::is_empty)
                && subscription_lists_updates.as_ref().map_or(true, Vec::is_empty)
        }
        ContactOperation::Identify { identifier } => {
            let current = state.identity.as_ref().and_then(|i| i.named_user_id.as_deref());
            current == Some(identifier.as_str()) && has_valid_token(state, now)
        }
        ContactOperation::Reset => {
            let anonymous = state.identity.as_ref().is_some_and(|i| i.is_anonymous);
            let no_data = state.anon_data.as_ref().map_or(true, AnonymousData::is_empty);
            anonymous && no_data && has_valid_token(state, now)
        }
        ContactOperation::Resolve => has_valid_token(state, now),
        ContactOperation::Verify { date, .. } => {
            let resolved_at = state.identity.as_ref().and_then(|i| i.resolve_date);
            has_valid_token(state, now) && resolved_at.is_some_and(|resolved| *date <= resolved)
        }
        _ => false,
    }
}

/// Number of leading entries that can be dropped without a network call.
pub fn skippable_prefix_len(state: &EngineState, entries: &[OperationEntry], now: Timestamp) -> usize {
    entries
        .iter()
        .take_while(|e| is_skippable(state, &e.operation, now))
        .count()
}

/// First entry that will actually need the backend.
pub fn next_unskippable<'a>(
    state: &EngineState,
    entries: &'a [OperationEntry],
    now: Timestamp,
) -> Option<&'a OperationEntry> {
    entries.iter().find(|e| !is_skippable(state, &e.operation, now))
}

// =====================================================================
// Merging
// =====================================================================

pub fn next_group(state: &EngineState, entries: &[OperationEntry]) -> Option<OperationGroup> {
    let (head, rest) = entries.split_first()?;

    match &head.operation {
        ContactOperation::Update { .. } => {
            let run: Vec<&OperationEntry> = std::iter::once(head)
                .chain(
                    rest.iter()
                        .take_while(|e| matches!(e.operation, ContactOperation::Update { .. })),
                )
                .collect();
            Some(merge_updates(&run))
        }
        ContactOperation::Identify { .. } | ContactOperation::Reset => {
            if state.has_anon_data() {
                log::debug!("[ENGINE] anonymous data pending, running {} alone", head.id);
                return Some(single(head));
            }

            let mut entry_ids = vec![head.id.clone()];
            let mut last = head;
            for entry in rest {
                match entry.operation {
                    ContactOperation::Identify { .. } | ContactOperation::Reset => {
                        entry_ids.push(entry.id.clone());
                        last = entry;
                    }
                    _ => break,
                }
            }

            if entry_ids.len() > 1 {
                log::debug!(
                    "[ENGINE] collapsed {} identity operations into {:?}",
                    entry_ids.len(),
                    last.operation.kind()
                );
            }

            Some(OperationGroup {
                entry_ids,
                operation: last.operation.clone(),
            })
        }
        _ => Some(single(head)),
    }
}

fn single(entry: &OperationEntry) -> OperationGroup {
    OperationGroup {
        entry_ids: vec![entry.id.clone()],
        operation: entry.operation.clone(),
    }
}

fn merge_updates(run: &[&OperationEntry]) -> OperationGroup {
    let mut tags = Vec::new();
    let mut attributes = Vec::new();
    let mut lists = Vec::new();

    for entry in run {
        if let ContactOperation::Update {
            tag_updates,
            attribute_updates,
            subscription_lists_updates,
        } = &entry.operation
        {
            tags.extend(tag_updates.iter().flatten().cloned());
            attributes.extend(attribute_updates.iter().flatten().cloned());
            lists.extend(subscription_lists_updates.iter().flatten().cloned());
        }
    }

    log::trace!("[ENGINE] merging {} update operations", run.len());

    OperationGroup {
        entry_ids: run.iter().map(|e| e.id.clone()).collect(),
        operation: ContactOperation::update(
            Some(collapse_tag_updates(&tags)),
            Some(collapse_attribute_updates(&attributes)),
            Some(collapse_subscription_list_updates(&lists)),
        ),
    }
}

// =====================================================================
// Projections
// =====================================================================

pub fn is_contact_id_stable(state: &EngineState, entries: &[OperationEntry]) -> bool {
    let Some(identity) = state.identity.as_ref() else {
        return false;
    };

    !entries.iter().any(|e| match &e.operation {
        ContactOperation::Reset => true,
        ContactOperation::Identify { identifier } => {
            identity.named_user_id.as_deref() != Some(identifier.as_str())
        }
        op => op.is_required_verify(),
    })
}

pub fn contact_id_info(state: &EngineState, entries: &[OperationEntry]) -> Option<ContactIdInfo> {
    let identity = state.identity.as_ref()?;
    Some(ContactIdInfo {
        contact_id: identity.contact_id.clone(),
        is_stable: is_contact_id_stable(state, entries),
        named_user_id: identity.named_user_id.clone(),
        resolve_date: identity.resolve_date,
    })
}

/// Named user the contact will have once the log drains.
pub fn current_named_user_id(state: &EngineState, entries: &[OperationEntry]) -> Option<String> {
    let last_identity_op = entries.iter().rev().find_map(|e| match &e.operation {
        ContactOperation::Reset => Some(None),
        ContactOperation::Identify { identifier } => Some(Some(identifier.clone())),
        _ => None,
    });

    match last_identity_op {
        Some(named) => named,
        None => state.identity.as_ref().and_then(|i| i.named_user_id.clone()),
    }
}

/// Emits projection changes since the last call. Never repeats a value.
pub fn refresh_projections(state: &mut EngineState, entries: &[OperationEntry]) -> Vec<EngineCommand> {
    let mut cmds = Vec::new();

    if let Some(info) = contact_id_info(state, entries) {
        if state.last_contact_id_update.as_ref() != Some(&info) {
            log::debug!(
                "[ENGINE] contact ID update {} (stable: {})",
                info.contact_id,
                info.is_stable
            );
            state.last_contact_id_update = Some(info.clone());
            cmds.push(EngineCommand::Emit(ContactUpdate::ContactIdUpdate(info)));
        }
    }

    let named = current_named_user_id(state, entries);
    if named != state.last_named_user_update {
        log::debug!("[ENGINE] named user update {:?}", named);
        state.last_named_user_update = named.clone();
        cmds.push(EngineCommand::Emit(ContactUpdate::NamedUserUpdate(named)));
    }

    cmds
}

pub fn pending_audience_overrides(
    state: &EngineState,
    entries: &[OperationEntry],
    contact_id: &str,
) -> AudienceOverrides {
    let Some(identity) = state.identity.as_ref() else {
        return AudienceOverrides::default();
    };
    if identity.contact_id != contact_id {
        return AudienceOverrides::default();
    }

    let mut overrides = AudienceOverrides::default();
    let mut last_identify: Option<&str> = None;

    for entry in entries {
        match &entry.operation {
            ContactOperation::Reset => break,
            ContactOperation::Identify { identifier } => {
                if !identity.is_anonymous
                    && identity.named_user_id.as_deref() != Some(identifier.as_str())
                {
                    break;
                }
                if last_identify.is_some_and(|last| last != identifier) {
                    break;
                }
                last_identify = Some(identifier);
            }
            ContactOperation::Update {
                tag_updates,
                attribute_updates,
                subscription_lists_updates,
            } => {
                overrides.tags.extend(tag_updates.iter().flatten().cloned());
                overrides
                    .attributes
                    .extend(attribute_updates.iter().flatten().cloned());
                overrides
                    .subscription_lists
                    .extend(subscription_lists_updates.iter().flatten().cloned());
            }
            ContactOperation::AssociateChannel {
                channel_id,
                channel_type,
            } => {
                overrides.channels.push(ChannelOverride::Associated(AssociatedChannel {
                    channel_type: *channel_type,
                    channel_id: channel_id.clone(),
                }));
            }
            ContactOperation::DisassociateChannel { channel } => {
                overrides
                    .channels
                    .push(ChannelOverride::Disassociated(channel.clone()));
            }
            _ => {}
        }
    }

    overrides
}

/// Contact ID the backend may be able to reclaim: an anonymous contact with
/// nothing attached to it.
pub fn possibly_orphaned_contact_id(state: &EngineState) -> Option<String> {
    let identity = state.identity.as_ref()?;
    if !identity.is_anonymous {
        return None;
    }
    let has_channels = state.anon_data.as_ref().is_some_and(|d| !d.channels.is_empty());
    if has_channels {
        None
    } else {
        Some(identity.contact_id.clone())
    }
}

/// Whether the next dispatch must also draw from the identity bucket.
pub fn needs_identity_bucket(state: &EngineState, entries: &[OperationEntry], now: Timestamp) -> bool {
    if !has_valid_token(state, now) {
        return true;
    }
    next_unskippable(state, entries, now).is_some_and(|e| {
        matches!(
            e.operation.kind(),
            OperationKind::Reset | OperationKind::Identify | OperationKind::Verify
        )
    })
}

// =====================================================================
// Remote results
// =====================================================================

pub fn on_identity_resolved(
    state: &mut EngineState,
    kind: OperationKind,
    named_user_id: Option<String>,
    result: IdentifyResult,
    now: Timestamp,
) -> Vec<EngineCommand> {
    let mut cmds = Vec::new();
    let contact = result.contact;

    state.tokens.set(AuthToken {
        identifier: contact.contact_id.clone(),
        token: result.token,
        expiration: now + Duration::milliseconds(result.token_expires_in_ms),
    });

    let previous = state.identity.take();
    let is_new_contact_id = previous
        .as_ref()
        .map_or(true, |p| !p.same_contact(&contact.contact_id));

    let resolved_named_user = named_user_id.clone().or_else(|| {
        previous
            .as_ref()
            .filter(|p| p.same_contact(&contact.contact_id))
            .and_then(|p| p.named_user_id.clone())
    });

    let was_anonymous = previous.as_ref().is_some_and(|p| p.is_anonymous);
    if is_new_contact_id && was_anonymous {
        if let Some(data) = state.anon_data.take().filter(|d| !d.is_empty()) {
            log::info!(
                "[ENGINE] contact changed to {}, reporting anonymous data as conflict",
                contact.contact_id
            );
            let event = ConflictEvent::from_anonymous(data, named_user_id);
            cmds.push(EngineCommand::Emit(ContactUpdate::Conflict(event)));
            cmds.push(EngineCommand::PersistAnonymousData);
        }
    }

    if !contact.is_anonymous && state.anon_data.take().is_some() {
        cmds.push(EngineCommand::PersistAnonymousData);
    }

    let server_side_change = previous.is_some()
        && is_new_contact_id
        && matches!(kind, OperationKind::Resolve | OperationKind::Verify);
    if server_side_change {
        log::warn!(
            "[ENGINE] contact changed server side to {}, dropping operations before {}",
            contact.contact_id,
            contact.channel_associated_date
        );
        cmds.push(EngineCommand::PruneOperationsBefore(
            contact.channel_associated_date,
        ));
    }

    state.identity = Some(IdentityState {
        contact_id: contact.contact_id,
        is_anonymous: contact.is_anonymous,
        named_user_id: resolved_named_user,
        channel_associated_date: Some(contact.channel_associated_date),
        resolve_date: Some(now),
    });
    cmds.push(EngineCommand::PersistIdentity);

    cmds
}

pub fn on_audience_updated(state: &mut EngineState, update: ContactAudienceUpdate) -> Vec<EngineCommand> {
    let Some(identity) = state.identity.as_ref() else {
        return Vec::new();
    };
    if identity.contact_id != update.contact_id {
        return Vec::new();
    }

    let mut cmds = Vec::new();
    let anonymous = identity.is_anonymous;

    if anonymous {
        state.anon_data.get_or_insert_with(AnonymousData::default).apply(
            update.tags.as_deref(),
            update.attributes.as_deref(),
            update.subscription_lists.as_deref(),
        );
        cmds.push(EngineCommand::PersistAnonymousData);
    }

    let non_empty = update.tags.as_ref().is_some_and(|t| !t.is_empty())
        || update.attributes.as_ref().is_some_and(|a| !a.is_empty())
        || update.subscription_lists.as_ref().is_some_and(|s| !s.is_empty());
    if non_empty {
        cmds.push(EngineCommand::Emit(ContactUpdate::AudienceUpdated(update)));
    }

    cmds
}

pub fn on_channel_updated(state: &mut EngineState, contact_id: &str, change: ChannelChange) -> Vec<EngineCommand> {
    let anonymous_match = state
        .identity
        .as_ref()
        .is_some_and(|i| i.contact_id == contact_id && i.is_anonymous);
    if !anonymous_match {
        return Vec::new();
    }

    let data = state.anon_data.get_or_insert_with(AnonymousData::default);
    match change {
        ChannelChange::Associated(channel) => {
            data.channels.insert(channel);
        }
        ChannelChange::Disassociated(channel) => {
            data.channels.remove(&channel);
        }
    }

    vec![EngineCommand::PersistAnonymousData]
}
