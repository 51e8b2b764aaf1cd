use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{ApiResponse, ContactApi, IdentifyResult};
use crate::contact::domain::{
    AssociatedChannel, AttributeUpdate, ChannelType, ContactChannel, EmailRegistrationOptions,
    OpenRegistrationOptions, ScopedSubscriptionListUpdate, SmsRegistrationOptions, TagGroupUpdate,
};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply<T> {
    Status(u16, Option<T>),
    TransportError,
}

impl<T> MockReply<T> {
    pub fn ok(result: T) -> Self {
        Self::Status(200, Some(result))
    }

    pub fn status(code: u16) -> Self {
        Self::Status(code, None)
    }

    fn into_response(self) -> Result<ApiResponse<T>> {
        match self {
            Self::Status(code, result) => Ok(ApiResponse::new(code, result)),
            Self::TransportError => Err(anyhow!("mock transport failure")),
        }
    }
}

/// Request as seen by the mock, recorded in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Resolve {
        channel_id: String,
        contact_id: Option<String>,
        possibly_orphaned_contact_id: Option<String>,
    },
    Identify {
        channel_id: String,
        named_user_id: String,
        contact_id: Option<String>,
        possibly_orphaned_contact_id: Option<String>,
    },
    Reset {
        channel_id: String,
        possibly_orphaned_contact_id: Option<String>,
    },
    Update {
        contact_id: String,
        tag_updates: Option<Vec<TagGroupUpdate>>,
        attribute_updates: Option<Vec<AttributeUpdate>>,
        subscription_list_updates: Option<Vec<ScopedSubscriptionListUpdate>>,
    },
    AssociateChannel {
        contact_id: String,
        channel_id: String,
        channel_type: ChannelType,
    },
    RegisterEmail {
        contact_id: String,
        address: String,
        locale: String,
    },
    RegisterSms {
        contact_id: String,
        msisdn: String,
        locale: String,
    },
    RegisterOpen {
        contact_id: String,
        address: String,
        locale: String,
    },
    DisassociateChannel {
        contact_id: String,
        channel: ContactChannel,
    },
    Resend {
        channel: ContactChannel,
    },
}

impl ApiCall {
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Identify { .. } | Self::Reset { .. })
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ApiCall>,
    identity_replies: VecDeque<MockReply<IdentifyResult>>,
    default_identity: Option<IdentifyResult>,
    update_replies: VecDeque<MockReply<()>>,
    channel_replies: VecDeque<MockReply<AssociatedChannel>>,
}

/// Pure in-memory backend for tests and the simulator.
///
/// Identity calls pop the identity script, falling back to the default
/// identity once it runs dry (or a transport error if there is none).
/// Update/resend calls default to 200. Channel calls default to 200 with a
/// channel derived from the request.
#[derive(Debug, Default)]
pub struct MockContactApi {
    state: Mutex<MockState>,
}

impl MockContactApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_identity(self, result: IdentifyResult) -> Self {
        self.lock().default_identity = Some(result);
        self
    }

    pub fn set_default_identity(&self, result: IdentifyResult) {
        self.lock().default_identity = Some(result);
    }

    pub fn push_identity(&self, reply: MockReply<IdentifyResult>) {
        self.lock().identity_replies.push_back(reply);
    }

    pub fn push_update(&self, reply: MockReply<()>) {
        self.lock().update_replies.push_back(reply);
    }

    pub fn push_channel(&self, reply: MockReply<AssociatedChannel>) {
        self.lock().channel_replies.push_back(reply);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<ApiCall> {
        std::mem::take(&mut self.lock().calls)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn identity_reply(&self, call: ApiCall) -> Result<ApiResponse<IdentifyResult>> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.identity_replies.pop_front() {
            Some(reply) => reply.into_response(),
            None => match &state.default_identity {
                Some(result) => Ok(ApiResponse::ok(result.clone())),
                None => Err(anyhow!("no scripted identity reply")),
            },
        }
    }

    fn update_reply(&self, call: ApiCall) -> Result<ApiResponse<()>> {
        let mut state = self.lock();
        state.calls.push(call);
        state
            .update_replies
            .pop_front()
            .unwrap_or(MockReply::ok(()))
            .into_response()
    }

    fn channel_reply(&self, call: ApiCall, fallback: AssociatedChannel) -> Result<ApiResponse<AssociatedChannel>> {
        let mut state = self.lock();
        state.calls.push(call);
        state
            .channel_replies
            .pop_front()
            .unwrap_or(MockReply::ok(fallback))
            .into_response()
    }
}

fn derived_channel(channel_type: ChannelType, address: &str) -> AssociatedChannel {
    AssociatedChannel {
        channel_type,
        channel_id: format!("mock-{}", address.to_lowercase()),
    }
}

#[async_trait]
impl ContactApi for MockContactApi {
    async fn resolve(
        &self,
        channel_id: &str,
        contact_id: Option<&str>,
        possibly_orphaned_contact_id: Option<&str>,
    ) -> Result<ApiResponse<IdentifyResult>> {
        self.identity_reply(ApiCall::Resolve {
            channel_id: channel_id.to_string(),
            contact_id: contact_id.map(str::to_string),
            possibly_orphaned_contact_id: possibly_orphaned_contact_id.map(str::to_string),
        })
    }

    async fn identify(
        &self,
        channel_id: &str,
        named_user_id: &str,
        contact_id: Option<&str>,
        possibly_orphaned_contact_id: Option<&str>,
    ) -> Result<ApiResponse<IdentifyResult>> {
        self.identity_reply(ApiCall::Identify {
            channel_id: channel_id.to_string(),
            named_user_id: named_user_id.to_string(),
            contact_id: contact_id.map(str::to_string),
            possibly_orphaned_contact_id: possibly_orphaned_contact_id.map(str::to_string),
        })
    }

    async fn reset(
        &self,
        channel_id: &str,
        possibly_orphaned_contact_id: Option<&str>,
    ) -> Result<ApiResponse<IdentifyResult>> {
        self.identity_reply(ApiCall::Reset {
            channel_id: channel_id.to_string(),
            possibly_orphaned_contact_id: possibly_orphaned_contact_id.map(str::to_string),
        })
    }

    async fn update(
        &self,
        contact_id: &str,
        tag_updates: Option<&[TagGroupUpdate]>,
        attribute_updates: Option<&[AttributeUpdate]>,
        subscription_list_updates: Option<&[ScopedSubscriptionListUpdate]>,
    ) -> Result<ApiResponse<()>> {
        self.update_reply(ApiCall::Update {
            contact_id: contact_id.to_string(),
            tag_updates: tag_updates.map(<[_]>::to_vec),
            attribute_updates: attribute_updates.map(<[_]>::to_vec),
            subscription_list_updates: subscription_list_updates.map(<[_]>::to_vec),
        })
    }

    async fn associate_channel(
        &self,
        contact_id: &str,
        channel_id: &str,
        channel_type: ChannelType,
    ) -> Result<ApiResponse<AssociatedChannel>> {
        let fallback = AssociatedChannel {
            channel_type,
            channel_id: channel_id.to_string(),
        };
        self.channel_reply(
            ApiCall::AssociateChannel {
                contact_id: contact_id.to_string(),
                channel_id: channel_id.to_string(),
                channel_type,
            },
            fallback,
        )
    }

    async fn register_email(
        &self,
        contact_id: &str,
        address: &str,
        _options: &EmailRegistrationOptions,
        locale: &str,
    ) -> Result<ApiResponse<AssociatedChannel>> {
        self.channel_reply(
            ApiCall::RegisterEmail {
                contact_id: contact_id.to_string(),
                address: address.to_string(),
                locale: locale.to_string(),
            },
            derived_channel(ChannelType::Email, address),
        )
    }

    async fn register_sms(
        &self,
        contact_id: &str,
        msisdn: &str,
        _options: &SmsRegistrationOptions,
        locale: &str,
    ) -> Result<ApiResponse<AssociatedChannel>> {
        self.channel_reply(
            ApiCall::RegisterSms {
                contact_id: contact_id.to_string(),
                msisdn: msisdn.to_string(),
                locale: locale.to_string(),
            },
            derived_channel(ChannelType::Sms, msisdn),
        )
    }

    async fn register_open(
        &self,
        contact_id: &str,
        address: &str,
        _options: &OpenRegistrationOptions,
        locale: &str,
    ) -> Result<ApiResponse<AssociatedChannel>> {
        self.channel_reply(
            ApiCall::RegisterOpen {
                contact_id: contact_id.to_string(),
                address: address.to_string(),
                locale: locale.to_string(),
            },
            derived_channel(ChannelType::Open, address),
        )
    }

    async fn disassociate_channel(
        &self,
        contact_id: &str,
        channel: &ContactChannel,
    ) -> Result<ApiResponse<AssociatedChannel>> {
        let fallback = channel
            .associated()
            .unwrap_or_else(|| derived_channel(channel.channel_type, &channel.address));
        self.channel_reply(
            ApiCall::DisassociateChannel {
                contact_id: contact_id.to_string(),
                channel: channel.clone(),
            },
            fallback,
        )
    }

    async fn resend(&self, channel: &ContactChannel) -> Result<ApiResponse<()>> {
        self.update_reply(ApiCall::Resend {
            channel: channel.clone(),
        })
    }
}
