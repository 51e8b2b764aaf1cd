//! Backend collaborator used by the executor.
//!
//! Every call returns an [`ApiResponse`] whose status decides what the
//! executor does with the queued entries; an `Err` is a transport failure
//! and is always retried.

mod mock_client;

#[cfg(test)]
mod tests;

pub use mock_client::{ApiCall, MockContactApi, MockReply};

use anyhow::Result;
use async_trait::async_trait;

use crate::clock::Timestamp;
use crate::contact::domain::{
    AssociatedChannel, AttributeUpdate, ChannelType, ContactChannel, EmailRegistrationOptions,
    OpenRegistrationOptions, ScopedSubscriptionListUpdate, SmsRegistrationOptions, TagGroupUpdate,
};

/// HTTP-status classified response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub result: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn new(status: u16, result: Option<T>) -> Self {
        Self { status, result }
    }

    pub fn ok(result: T) -> Self {
        Self::new(200, Some(result))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Success or a 4xx. Either way the request must not be sent again.
    pub fn is_operation_complete(&self) -> bool {
        self.is_success() || self.is_client_error()
    }
}

/// Contact as reported by an identity call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContact {
    pub contact_id: String,
    pub is_anonymous: bool,
    pub channel_associated_date: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyResult {
    pub contact: ResolvedContact,
    pub token: String,
    pub token_expires_in_ms: i64,
}

#[async_trait]
pub trait ContactApi: Send + Sync {
    async fn resolve(
        &self,
        channel_id: &str,
        contact_id: Option<&str>,
        possibly_orphaned_contact_id: Option<&str>,
    ) -> Result<ApiResponse<IdentifyResult>>;

    async fn identify(
        &self,
        channel_id: &str,
        named_user_id: &str,
        contact_id: Option<&str>,
        possibly_orphaned_contact_id: Option<&str>,
    ) -> Result<ApiResponse<IdentifyResult>>;

    async fn reset(
        &self,
        channel_id: &str,
        possibly_orphaned_contact_id: Option<&str>,
    ) -> Result<ApiResponse<IdentifyResult>>;

    async fn update(
        &self,
        contact_id: &str,
        tag_updates: Option<&[TagGroupUpdate]>,
        attribute_updates: Option<&[AttributeUpdate]>,
        subscription_list_updates: Option<&[ScopedSubscriptionListUpdate]>,
    ) -> Result<ApiResponse<()>>;

    async fn associate_channel(
        &self,
        contact_id: &str,
        channel_id: &str,
        channel_type: ChannelType,
    ) -> Result<ApiResponse<AssociatedChannel>>;

    async fn register_email(
        &self,
        contact_id: &str,
        address: &str,
        options: &EmailRegistrationOptions,
        locale: &str,
    ) -> Result<ApiResponse<AssociatedChannel>>;

    async fn register_sms(
        &self,
        contact_id: &str,
        msisdn: &str,
        options: &SmsRegistrationOptions,
        locale: &str,
    ) -> Result<ApiResponse<AssociatedChannel>>;

    async fn register_open(
        &self,
        contact_id: &str,
        address: &str,
        options: &OpenRegistrationOptions,
        locale: &str,
    ) -> Result<ApiResponse<AssociatedChannel>>;

    async fn disassociate_channel(
        &self,
        contact_id: &str,
        channel: &ContactChannel,
    ) -> Result<ApiResponse<AssociatedChannel>>;

    async fn resend(&self, channel: &ContactChannel) -> Result<ApiResponse<()>>;
}
