use crate::contact::api::IdentifyResult;
use crate::clock::Timestamp;
use crate::contact::domain::{
    AssociatedChannel, AttributeUpdate, ContactChannel, ContactIdInfo, ContactOperation,
    ConflictEvent, OperationKind, ScopedSubscriptionListUpdate, TagGroupUpdate,
};

/// Head-of-log entries that execute as one remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationGroup {
    pub entry_ids: Vec<String>,
    pub operation: ContactOperation,
}

/// Audience edits that reached the backend for a contact.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactAudienceUpdate {
    pub contact_id: String,
    pub tags: Option<Vec<TagGroupUpdate>>,
    pub attributes: Option<Vec<AttributeUpdate>>,
    pub subscription_lists: Option<Vec<ScopedSubscriptionListUpdate>>,
}

/// Observable change published to dependents.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactUpdate {
    ContactIdUpdate(ContactIdInfo),
    NamedUserUpdate(Option<String>),
    Conflict(ConflictEvent),
    AudienceUpdated(ContactAudienceUpdate),
}

/// Pending channel change, reported with audience overrides.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOverride {
    Associated(AssociatedChannel),
    Disassociated(ContactChannel),
}

/// Edits queued against the current contact that the backend has not yet
/// confirmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudienceOverrides {
    pub tags: Vec<TagGroupUpdate>,
    pub attributes: Vec<AttributeUpdate>,
    pub subscription_lists: Vec<ScopedSubscriptionListUpdate>,
    pub channels: Vec<ChannelOverride>,
}

/// Backend confirmation of a channel change, applied to anonymous data.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelChange {
    Associated(AssociatedChannel),
    Disassociated(AssociatedChannel),
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An identity-class call succeeded.
    IdentityResolved {
        kind: OperationKind,
        named_user_id: Option<String>,
        result: IdentifyResult,
        now: Timestamp,
    },
    /// An update call succeeded.
    AudienceUpdated {
        contact_id: String,
        tags: Option<Vec<TagGroupUpdate>>,
        attributes: Option<Vec<AttributeUpdate>>,
        subscription_lists: Option<Vec<ScopedSubscriptionListUpdate>>,
    },
    /// A register/associate/disassociate call succeeded.
    ChannelUpdated {
        contact_id: String,
        change: ChannelChange,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Emit(ContactUpdate),
    /// Drop log entries created at or before this instant.
    PruneOperationsBefore(Timestamp),
    PersistIdentity,
    PersistAnonymousData,
}

