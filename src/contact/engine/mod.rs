//! Contact queue decision engine.
//!
//! The **Functional Core** of the contact queue. It owns identity, anonymous
//! data and the token cache, and answers questions about a log snapshot:
//! - **Input**: `EngineEvent` (confirmed backend results) plus `&[OperationEntry]`.
//! - **Output**: `Vec<EngineCommand>` (log pruning, persistence, emitted updates)
//!   for the runtime to execute.
//!
//! # Architecture guarantees
//! * **No Network**: nothing here talks to the backend.
//! * **No Async**: every call is synchronous and fast.
//! * **Deterministic**: time comes in as an argument; the same state, log and
//!   event always produce the same commands.

mod logic;
pub mod state;
pub mod types;


pub use types::{
    AudienceOverrides, ChannelChange, ChannelOverride, ContactAudienceUpdate, ContactUpdate,
    EngineCommand, EngineEvent, OperationGroup,
};

use chrono::Duration;

use crate::clock::Timestamp;
use crate::contact::domain::{
    AnonymousData, AuthToken, ContactIdInfo, ContactOperation, IdentityState, OperationEntry,
};
use crate::contact::token::AuthTokenCache;

use state::EngineState;

/// The contact queue "Brain".
#[derive(Debug, Clone)]
pub struct ContactEngine {
    state: EngineState,
}

impl ContactEngine {
    pub fn new(
        identity: Option<IdentityState>,
        anon_data: Option<AnonymousData>,
        token_safety_margin: Duration,
    ) -> Self {
        Self {
            state: EngineState {
                identity,
                anon_data,
                tokens: AuthTokenCache::new(token_safety_margin),
                last_contact_id_update: None,
                last_named_user_update: None,
            },
        }
    }

    /// Applies a confirmed backend result.
    pub fn handle_event(&mut self, event: EngineEvent) -> Vec<EngineCommand> {
        match event {
            EngineEvent::IdentityResolved {
                kind,
                named_user_id,
                result,
                now,
            } => logic::on_identity_resolved(&mut self.state, kind, named_user_id, result, now),
            EngineEvent::AudienceUpdated {
                contact_id,
                tags,
                attributes,
                subscription_lists,
            } => logic::on_audience_updated(
                &mut self.state,
                ContactAudienceUpdate {
                    contact_id,
                    tags,
                    attributes,
                    subscription_lists,
                },
            ),
            EngineEvent::ChannelUpdated { contact_id, change } => {
                logic::on_channel_updated(&mut self.state, &contact_id, change)
            }
        }
    }

    /// Creates a random anonymous identity if none is known yet.
    pub fn generate_default_contact_id_if_not_set(&mut self, now: Timestamp) -> Vec<EngineCommand> {
        if self.state.identity.is_some() {
            return Vec::new();
        }
        let contact_id = uuid::Uuid::new_v4().to_string().to_lowercase();
        log::info!("[ENGINE] generated default contact ID {}", contact_id);
        self.state.identity = Some(IdentityState::anonymous(contact_id, now));
        vec![EngineCommand::PersistIdentity]
    }

    pub fn is_skippable(&self, operation: &ContactOperation, now: Timestamp) -> bool {
        logic::is_skippable(&self.state, operation, now)
    }

    pub fn skippable_prefix_len(&self, entries: &[OperationEntry], now: Timestamp) -> usize {
        logic::skippable_prefix_len(&self.state, entries, now)
    }

    pub fn next_group(&self, entries: &[OperationEntry]) -> Option<OperationGroup> {
        logic::next_group(&self.state, entries)
    }

    pub fn needs_identity_bucket(&self, entries: &[OperationEntry], now: Timestamp) -> bool {
        logic::needs_identity_bucket(&self.state, entries, now)
    }

    pub fn is_contact_id_stable(&self, entries: &[OperationEntry]) -> bool {
        logic::is_contact_id_stable(&self.state, entries)
    }

    pub fn contact_id_info(&self, entries: &[OperationEntry]) -> Option<ContactIdInfo> {
        logic::contact_id_info(&self.state, entries)
    }

    pub fn current_named_user_id(&self, entries: &[OperationEntry]) -> Option<String> {
        logic::current_named_user_id(&self.state, entries)
    }

    pub fn refresh_projections(&mut self, entries: &[OperationEntry]) -> Vec<EngineCommand> {
        logic::refresh_projections(&mut self.state, entries)
    }

    pub fn pending_audience_overrides(
        &self,
        entries: &[OperationEntry],
        contact_id: &str,
    ) -> AudienceOverrides {
        logic::pending_audience_overrides(&self.state, entries, contact_id)
    }

    pub fn possibly_orphaned_contact_id(&self) -> Option<String> {
        logic::possibly_orphaned_contact_id(&self.state)
    }

    pub fn valid_token(&self, now: Timestamp) -> Option<&AuthToken> {
        logic::valid_token(&self.state, now)
    }

    pub fn expire_token(&mut self, token: &str) {
        self.state.tokens.expire_if_matches(token);
    }

    pub fn identity(&self) -> Option<&IdentityState> {
        self.state.identity.as_ref()
    }

    pub fn anon_data(&self) -> Option<&AnonymousData> {
        self.state.anon_data.as_ref()
    }

    pub fn has_anon_data(&self) -> bool {
        self.state.has_anon_data()
    }
}
