use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Kind of deliverable endpoint that can be attached to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Sms,
    Open,
}

/// Scope a subscription list membership applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelScope {
    App,
    Web,
    Email,
    Sms,
}

/// A channel the backend confirmed as associated with a contact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedChannel {
    pub channel_type: ChannelType,
    #[serde(rename = "channelID")]
    pub channel_id: String,
}

/// A channel as seen by the contact, possibly still pending registration.
///
/// Used as the payload of disassociate and resend operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactChannel {
    pub channel_type: ChannelType,
    #[serde(rename = "channelID", default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub address: String,
    #[serde(default)]
    pub is_registered: bool,
}

impl ContactChannel {
    pub fn associated(&self) -> Option<AssociatedChannel> {
        self.channel_id.as_ref().map(|id| AssociatedChannel {
            channel_type: self.channel_type,
            channel_id: id.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRegistrationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactional_opted_in: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commercial_opted_in: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(default)]
    pub double_opt_in: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRegistrationOptions {
    #[serde(rename = "senderID")]
    pub sender_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRegistrationOptions {
    pub platform_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<BTreeMap<String, String>>,
}
