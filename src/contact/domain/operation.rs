use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::contact::domain::audience::{AttributeUpdate, ScopedSubscriptionListUpdate, TagGroupUpdate};
use crate::contact::domain::channel::{
    ChannelType, ContactChannel, EmailRegistrationOptions, OpenRegistrationOptions,
    SmsRegistrationOptions,
};

/// A queued contact intent.
///
/// Persisted as `{"type": <kind>, "payload": {...}}`. Field names are part of
/// the on-disk format: entries written by an older build must keep decoding,
/// so renames here need a matching `alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ContactOperation {
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag_updates: Option<Vec<TagGroupUpdate>>,
        #[serde(default, alias = "attrubuteUpdates", skip_serializing_if = "Option::is_none")]
        attribute_updates: Option<Vec<AttributeUpdate>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscription_lists_updates: Option<Vec<ScopedSubscriptionListUpdate>>,
    },
    Identify {
        identifier: String,
    },
    Resolve,
    Reset,
    Verify {
        date: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        required: Option<bool>,
    },
    RegisterEmail {
        address: String,
        options: EmailRegistrationOptions,
    },
    #[serde(rename = "registerSMS")]
    RegisterSms {
        msisdn: String,
        options: SmsRegistrationOptions,
    },
    RegisterOpen {
        address: String,
        options: OpenRegistrationOptions,
    },
    AssociateChannel {
        #[serde(rename = "channelID")]
        channel_id: String,
        channel_type: ChannelType,
    },
    DisassociateChannel {
        #[serde(rename = "dissociateChannelInfo")]
        channel: ContactChannel,
    },
    Resend {
        #[serde(rename = "resendInfo")]
        channel: ContactChannel,
    },
}

/// Payload-free discriminant of [`ContactOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Update,
    Identify,
    Resolve,
    Reset,
    Verify,
    RegisterEmail,
    RegisterSms,
    RegisterOpen,
    AssociateChannel,
    DisassociateChannel,
    Resend,
}

impl OperationKind {
    /// Identity-class operations go through the identity rate limiter and
    /// return a fresh token.
    pub fn is_identity(self) -> bool {
        matches!(self, Self::Identify | Self::Reset | Self::Resolve | Self::Verify)
    }
}

impl ContactOperation {
    pub fn update(
        tag_updates: Option<Vec<TagGroupUpdate>>,
        attribute_updates: Option<Vec<AttributeUpdate>>,
        subscription_lists_updates: Option<Vec<ScopedSubscriptionListUpdate>>,
    ) -> Self {
        Self::Update {
            tag_updates,
            attribute_updates,
            subscription_lists_updates,
        }
    }

    pub fn identify(identifier: impl Into<String>) -> Self {
        Self::Identify {
            identifier: identifier.into(),
        }
    }

    pub fn verify(date: Timestamp, required: bool) -> Self {
        Self::Verify {
            date,
            required: required.then_some(true),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Update { .. } => OperationKind::Update,
            Self::Identify { .. } => OperationKind::Identify,
            Self::Resolve => OperationKind::Resolve,
            Self::Reset => OperationKind::Reset,
            Self::Verify { .. } => OperationKind::Verify,
            Self::RegisterEmail { .. } => OperationKind::RegisterEmail,
            Self::RegisterSms { .. } => OperationKind::RegisterSms,
            Self::RegisterOpen { .. } => OperationKind::RegisterOpen,
            Self::AssociateChannel { .. } => OperationKind::AssociateChannel,
            Self::DisassociateChannel { .. } => OperationKind::DisassociateChannel,
            Self::Resend { .. } => OperationKind::Resend,
        }
    }

    pub fn is_required_verify(&self) -> bool {
        matches!(self, Self::Verify { required: Some(true), .. })
    }
}

/// One durable log record. `id` is the only safe handle for removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub operation: ContactOperation,
    #[serde(rename = "date")]
    pub created_at: Timestamp,
    #[serde(rename = "identifier")]
    pub id: String,
}

impl OperationEntry {
    pub fn new(operation: ContactOperation, created_at: Timestamp) -> Self {
        Self {
            operation,
            created_at,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
