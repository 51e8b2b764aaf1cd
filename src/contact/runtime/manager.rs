use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Duration;
use tokio::sync::{mpsc, watch};

use crate::clock::{Clock, Timestamp};
use crate::config::ContactConfig;
use crate::contact::api::{ApiResponse, ContactApi};
use crate::contact::domain::{
    AnonymousData, AssociatedChannel, AttributeUpdate, ChannelType, ContactChannel,
    ContactIdInfo, ContactOperation, EmailRegistrationOptions, IdentityState,
    OpenRegistrationOptions, OperationEntry, OperationKind, ScopedSubscriptionListUpdate,
    SmsRegistrationOptions, TagGroupUpdate,
};
use crate::contact::engine::{
    AudienceOverrides, ChannelChange, ContactEngine, ContactUpdate, EngineCommand, EngineEvent,
};
use crate::contact::oplog::OperationLog;
use crate::contact::runtime::rate_limit::IdentityRateLimiter;
use crate::contact::runtime::scheduler::{
    WorkFuture, WorkHandler, WorkRequest, WorkResult, WorkScheduler,
};
use crate::error::{ContactError, ContactResult};
use crate::persistence::{KeyValueStore, KeyValueStoreExt};

pub const UPDATE_TASK_ID: &str = "Contact.update";
pub const UPDATE_RATE_LIMIT_ID: &str = "Contact.update";
pub const IDENTITY_RATE_LIMIT_ID: &str = "Contact.identify";

pub const CONTACT_INFO_KEY: &str = "Contact.contactInfo";
pub const ANON_DATA_KEY: &str = "Contact.anonContactData";

/// Everything the single writer owns. Only touched under `ContactManager::shared`.
struct SharedState {
    log: OperationLog,
    engine: ContactEngine,
    enabled: bool,
    channel_id: Option<String>,
    last_foreground_resolve: Option<Timestamp>,
}

/// Collaborators handed to [`ContactManager::new`].
pub struct ContactDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub api: Arc<dyn ContactApi>,
    pub scheduler: Arc<dyn WorkScheduler>,
    pub clock: Arc<dyn Clock>,
}

/// **ContactManager**
///
/// The imperative shell around [`ContactEngine`]. It:
/// 1. Appends validated operations to the durable log and asks the scheduler
///    for a worker run.
/// 2. Runs one executor cycle per worker run: ensure a token, drop skippable
///    entries, merge the head group, call the backend.
/// 3. Executes the engine's commands (persist, prune, publish updates).
///
/// All state lives behind one mutex that is never held across an `.await`.
pub struct ContactManager {
    shared: Mutex<SharedState>,
    cycle: tokio::sync::Mutex<()>,
    cancelled: AtomicBool,

    store: Arc<dyn KeyValueStore>,
    api: Arc<dyn ContactApi>,
    scheduler: Arc<dyn WorkScheduler>,
    clock: Arc<dyn Clock>,
    config: ContactConfig,
    identity_limiter: IdentityRateLimiter,

    /// One unbounded sender per subscriber, so no update (conflicts
    /// included) is dropped for a slow reader.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ContactUpdate>>>,
    contact_info: watch::Sender<Option<ContactIdInfo>>,
}

impl ContactManager {
    /// Loads persisted state and registers the update worker.
    pub fn new(deps: ContactDeps, config: ContactConfig) -> Result<Arc<Self>> {
        let ContactDeps {
            store,
            api,
            scheduler,
            clock,
        } = deps;

        let log = OperationLog::load(store.clone(), clock.now())?;
        let identity: Option<IdentityState> = store.get_json(CONTACT_INFO_KEY)?;
        let anon_data: Option<AnonymousData> = store.get_json(ANON_DATA_KEY)?;
        log::info!(
            "[EXECUTOR] loaded contact {:?} with {} pending operations",
            identity.as_ref().map(|i| i.contact_id.as_str()),
            log.len()
        );

        let engine = ContactEngine::new(
            identity,
            anon_data,
            Duration::seconds(config.token_safety_margin_secs),
        );

        let (contact_info, _) = watch::channel(None);

        let manager = Arc::new(Self {
            shared: Mutex::new(SharedState {
                log,
                engine,
                enabled: true,
                channel_id: None,
                last_foreground_resolve: None,
            }),
            cycle: tokio::sync::Mutex::new(()),
            cancelled: AtomicBool::new(false),
            store,
            api,
            scheduler,
            clock,
            identity_limiter: IdentityRateLimiter::new(config.identity_rate_limit()),
            config,
            subscribers: Mutex::new(Vec::new()),
            contact_info,
        });

        manager
            .scheduler
            .set_rate_limit(IDENTITY_RATE_LIMIT_ID, manager.config.identity_bucket);
        manager
            .scheduler
            .set_rate_limit(UPDATE_RATE_LIMIT_ID, manager.config.update_bucket);

        let weak = Arc::downgrade(&manager);
        let handler: WorkHandler = Arc::new(move |_request: WorkRequest| -> WorkFuture {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(manager) => manager.perform_next_operation().await,
                    None => WorkResult::Success,
                }
            })
        });
        manager.scheduler.register_worker(UPDATE_TASK_ID, handler);

        manager.refresh_projections()?;
        Ok(manager)
    }

    // =====================================================================
    // Observation
    // =====================================================================

    /// Updates published from now on. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ContactUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn contact_id_info(&self) -> Option<ContactIdInfo> {
        let state = self.lock();
        state.engine.contact_id_info(state.log.entries())
    }

    pub fn current_named_user_id(&self) -> Option<String> {
        let state = self.lock();
        state.engine.current_named_user_id(state.log.entries())
    }

    pub fn identity(&self) -> Option<IdentityState> {
        self.lock().engine.identity().cloned()
    }

    pub fn anon_data(&self) -> Option<AnonymousData> {
        self.lock().engine.anon_data().cloned()
    }

    pub fn pending_operations(&self) -> Vec<OperationEntry> {
        self.lock().log.snapshot()
    }

    pub fn pending_audience_overrides(&self, contact_id: &str) -> AudienceOverrides {
        let state = self.lock();
        state
            .engine
            .pending_audience_overrides(state.log.entries(), contact_id)
    }

    /// Waits for a stable contact ID.
    pub async fn stable_contact_info(&self) -> ContactResult<ContactIdInfo> {
        self.wait_for_info(|info| info.is_stable).await
    }

    pub async fn stable_contact_id(&self) -> ContactResult<String> {
        Ok(self.stable_contact_info().await?.contact_id)
    }

    /// Waits for a stable contact ID that was resolved recently enough,
    /// queueing a verify if the stable one's last resolve is too old.
    pub async fn stable_verified_contact_id(&self) -> ContactResult<String> {
        let now = self.clock.now();
        let max_age = Duration::seconds(self.config.verified_contact_id_max_age_secs);

        let info = self.stable_contact_info().await?;
        if info.resolve_date.is_some_and(|at| now - at <= max_age) {
            return Ok(info.contact_id);
        }

        self.add_operation(ContactOperation::verify(now, false))?;
        let info = self
            .wait_for_info(|info| info.is_stable && info.resolve_date.is_some_and(|at| at >= now))
            .await?;
        Ok(info.contact_id)
    }

    async fn wait_for_info<F>(&self, accept: F) -> ContactResult<ContactIdInfo>
    where
        F: Fn(&ContactIdInfo) -> bool,
    {
        let mut rx = self.contact_info.subscribe();
        let info = rx
            .wait_for(|info| info.as_ref().is_some_and(&accept))
            .await
            .map_err(|_| ContactError::MissingContactId)?;
        info.clone().ok_or(ContactError::MissingContactId)
    }

    // =====================================================================
    // Mutation surface
    // =====================================================================

    pub fn identify(&self, named_user_id: &str) -> ContactResult<()> {
        let trimmed = named_user_id.trim();
        let max = self.config.max_named_user_id_length;
        if trimmed.is_empty() || trimmed.chars().count() > max {
            return Err(ContactError::InvalidNamedUserId(named_user_id.to_string(), max));
        }
        self.add_operation(ContactOperation::identify(trimmed))
    }

    pub fn reset(&self) -> ContactResult<()> {
        self.add_operation(ContactOperation::Reset)
    }

    /// The named user logged in elsewhere; the contact must be re-verified
    /// before it is considered stable again.
    pub fn notify_remote_login(&self) -> ContactResult<()> {
        self.add_operation(ContactOperation::verify(self.clock.now(), true))
    }

    pub fn edit_tags(&self, updates: Vec<TagGroupUpdate>) -> ContactResult<()> {
        if updates.is_empty() {
            return Err(ContactError::EmptyUpdate);
        }
        self.add_operation(ContactOperation::update(Some(updates), None, None))
    }

    pub fn edit_attributes(&self, updates: Vec<AttributeUpdate>) -> ContactResult<()> {
        if updates.is_empty() {
            return Err(ContactError::EmptyUpdate);
        }
        self.add_operation(ContactOperation::update(None, Some(updates), None))
    }

    pub fn edit_subscription_lists(&self, updates: Vec<ScopedSubscriptionListUpdate>) -> ContactResult<()> {
        if updates.is_empty() {
            return Err(ContactError::EmptyUpdate);
        }
        self.add_operation(ContactOperation::update(None, None, Some(updates)))
    }

    pub fn register_email(&self, address: &str, options: EmailRegistrationOptions) -> ContactResult<()> {
        let address = non_empty(address, "email address is empty")?;
        self.add_operation(ContactOperation::RegisterEmail { address, options })
    }

    pub fn register_sms(&self, msisdn: &str, options: SmsRegistrationOptions) -> ContactResult<()> {
        let msisdn = non_empty(msisdn, "msisdn is empty")?;
        self.add_operation(ContactOperation::RegisterSms { msisdn, options })
    }

    pub fn register_open(&self, address: &str, options: OpenRegistrationOptions) -> ContactResult<()> {
        let address = non_empty(address, "open channel address is empty")?;
        self.add_operation(ContactOperation::RegisterOpen { address, options })
    }

    pub fn associate_channel(&self, channel_id: &str, channel_type: ChannelType) -> ContactResult<()> {
        let channel_id = non_empty(channel_id, "channel ID is empty")?;
        self.add_operation(ContactOperation::AssociateChannel {
            channel_id,
            channel_type,
        })
    }

    pub fn disassociate_channel(&self, channel: ContactChannel) -> ContactResult<()> {
        if channel.channel_id.is_none() && channel.address.trim().is_empty() {
            return Err(ContactError::InvalidChannel("channel has neither ID nor address"));
        }
        self.add_operation(ContactOperation::DisassociateChannel { channel })
    }

    pub fn resend(&self, channel: ContactChannel) -> ContactResult<()> {
        if channel.address.trim().is_empty() {
            return Err(ContactError::InvalidChannel("channel address is empty"));
        }
        self.add_operation(ContactOperation::Resend { channel })
    }

    /// Queues a resolve when the app comes to the foreground, at most once per
    /// configured interval. Returns whether one was queued.
    pub fn foreground_resolve(&self) -> ContactResult<bool> {
        let now = self.clock.now();
        let interval = Duration::seconds(self.config.foreground_resolve_interval_secs);
        {
            let mut state = self.lock();
            let due = state
                .last_foreground_resolve
                .map_or(true, |last| now - last >= interval);
            if !due {
                return Ok(false);
            }
            state.last_foreground_resolve = Some(now);
        }
        self.add_operation(ContactOperation::Resolve)?;
        Ok(true)
    }

    /// Contacts were turned off: drop back to a fresh anonymous contact
    /// unless that is already the case.
    pub fn reset_if_needed(&self) -> ContactResult<()> {
        let needed = {
            let state = self.lock();
            state
                .engine
                .identity()
                .is_some_and(|i| !i.is_anonymous || state.engine.has_anon_data())
        };
        if needed {
            log::info!("[EXECUTOR] contacts disabled, resetting");
            self.append_operation(ContactOperation::Reset)?;
        }
        Ok(())
    }

    pub fn generate_default_contact_id_if_not_set(&self) -> ContactResult<()> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut cmds = state.engine.generate_default_contact_id_if_not_set(now);
        cmds.extend(state.engine.refresh_projections(state.log.entries()));
        self.execute_commands(state, cmds).map_err(ContactError::Storage)
    }

    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut state = self.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
        }
        log::info!("[EXECUTOR] enabled: {}", enabled);
        if enabled {
            self.enqueue_task();
        }
    }

    pub fn set_channel_id(&self, channel_id: Option<String>) {
        self.lock().channel_id = channel_id;
        self.enqueue_task();
    }

    /// Stops further executor cycles. Already durable changes stay.
    pub fn shutdown(&self) {
        log::info!("[EXECUTOR] shutting down");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn add_operation(&self, operation: ContactOperation) -> ContactResult<()> {
        if !self.lock().enabled {
            log::error!("[EXECUTOR] contacts disabled, ignoring {:?}", operation.kind());
            return Err(ContactError::Disabled);
        }
        self.append_operation(operation)
    }

    fn append_operation(&self, operation: ContactOperation) -> ContactResult<()> {
        let now = self.clock.now();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let id = state
                .log
                .append(operation, now)
                .map_err(ContactError::Storage)?;
            log::debug!("[EXECUTOR] queued {}", id);

            let cmds = state.engine.refresh_projections(state.log.entries());
            self.execute_commands(state, cmds)
                .map_err(ContactError::Storage)?;
        }
        self.enqueue_task();
        Ok(())
    }

    // =====================================================================
    // Auth
    // =====================================================================

    /// Returns a valid token for `identifier`, resolving first if needed.
    pub async fn resolve_auth(&self, identifier: &str) -> ContactResult<String> {
        if let Some(token) = self.token_for(identifier) {
            return Ok(token);
        }

        self.perform_operation(ContactOperation::Resolve)
            .await
            .map_err(ContactError::Transport)?;
        self.refresh_projections().map_err(ContactError::Storage)?;

        let current = self.lock().engine.identity().map(|i| i.contact_id.clone());
        if current.as_deref() != Some(identifier) {
            return Err(ContactError::ContactIdMismatch {
                expected: identifier.to_string(),
                actual: current,
            });
        }

        self.token_for(identifier)
            .ok_or(ContactError::TokenRefreshFailed)
    }

    pub fn auth_token_expired(&self, token: &str) {
        self.lock().engine.expire_token(token);
    }

    fn token_for(&self, identifier: &str) -> Option<String> {
        let now = self.clock.now();
        let state = self.lock();
        let identity = state.engine.identity()?;
        if identity.contact_id != identifier {
            return None;
        }
        state.engine.valid_token(now).map(|t| t.token.clone())
    }

    // =====================================================================
    // Executor
    // =====================================================================

    /// One worker run. Failure asks the scheduler to retry with backoff.
    pub async fn perform_next_operation(&self) -> WorkResult {
        let _cycle = self.cycle.lock().await;

        let outcome = self.run_cycle().await;
        if let Err(err) = self.refresh_projections() {
            log::error!("[EXECUTOR] failed to persist projections: {:#}", err);
        }

        match outcome {
            Ok(true) => WorkResult::Success,
            Ok(false) => WorkResult::Failure,
            Err(err) => {
                log::warn!("[EXECUTOR] cycle failed: {:#}", err);
                WorkResult::Failure
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && self.lock().enabled
    }

    async fn run_cycle(&self) -> Result<bool> {
        if !self.is_active() || self.lock().log.is_empty() {
            return Ok(true);
        }

        let has_token = self.lock().engine.valid_token(self.clock.now()).is_some();
        if !has_token {
            log::debug!("[EXECUTOR] no valid token, resolving first");
            let resolved = self.perform_operation(ContactOperation::Resolve).await?;
            self.refresh_projections()?;
            if !resolved {
                return Ok(false);
            }
        }

        if !self.is_active() {
            return Ok(true);
        }

        let group = {
            let now = self.clock.now();
            let mut guard = self.lock();
            let state = &mut *guard;

            let skip = state.engine.skippable_prefix_len(state.log.entries(), now);
            if skip > 0 {
                let ids: Vec<String> = state.log.entries()[..skip]
                    .iter()
                    .map(|e| e.id.clone())
                    .collect();
                log::debug!("[EXECUTOR] dropping {} skippable operations", skip);
                state.log.remove_ids(&ids)?;
            }

            let cmds = state.engine.refresh_projections(state.log.entries());
            self.execute_commands(state, cmds)?;
            state.engine.next_group(state.log.entries())
        };

        let Some(group) = group else {
            return Ok(true);
        };

        log::debug!(
            "[EXECUTOR] performing {:?} for {} entries",
            group.operation.kind(),
            group.entry_ids.len()
        );
        let complete = self.perform_operation(group.operation).await?;
        if !complete {
            return Ok(false);
        }

        let remaining = {
            let mut state = self.lock();
            state.log.remove_ids(&group.entry_ids)?;
            !state.log.is_empty()
        };
        if remaining {
            self.enqueue_task();
        }
        Ok(true)
    }

    fn enqueue_task(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }

        let request = {
            let state = self.lock();
            if state.channel_id.is_none() || !state.enabled {
                return;
            }

            let mut rate_limit_ids = vec![UPDATE_RATE_LIMIT_ID.to_string()];
            if state
                .engine
                .needs_identity_bucket(state.log.entries(), self.clock.now())
            {
                rate_limit_ids.push(IDENTITY_RATE_LIMIT_ID.to_string());
            }

            WorkRequest {
                work_id: UPDATE_TASK_ID.to_string(),
                requires_network: true,
                rate_limit_ids,
            }
        };

        log::trace!("[EXECUTOR] dispatching {:?}", request);
        self.scheduler.dispatch(request);
    }

    /// Runs one operation against the backend. `Ok(true)` means the entries
    /// behind it can leave the log.
    async fn perform_operation(&self, operation: ContactOperation) -> Result<bool> {
        if self.lock().engine.is_skippable(&operation, self.clock.now()) {
            log::trace!("[EXECUTOR] {:?} already satisfied", operation.kind());
            return Ok(true);
        }

        match operation {
            ContactOperation::Update {
                tag_updates,
                attribute_updates,
                subscription_lists_updates,
            } => {
                self.perform_update(tag_updates, attribute_updates, subscription_lists_updates)
                    .await
            }
            ContactOperation::Identify { identifier } => {
                self.identity_limiter
                    .run(self.perform_identity(OperationKind::Identify, Some(identifier)))
                    .await
            }
            ContactOperation::Reset => {
                self.identity_limiter
                    .run(self.perform_identity(OperationKind::Reset, None))
                    .await
            }
            ContactOperation::Resolve => {
                self.identity_limiter
                    .run(self.perform_identity(OperationKind::Resolve, None))
                    .await
            }
            ContactOperation::Verify { .. } => {
                self.identity_limiter
                    .run(self.perform_identity(OperationKind::Verify, None))
                    .await
            }
            ContactOperation::RegisterEmail { address, options } => {
                let contact_id = self.require_contact_id()?;
                let response = self
                    .api
                    .register_email(&contact_id, &address, &options, &self.config.locale)
                    .await?;
                self.channel_response(OperationKind::RegisterEmail, contact_id, response)
            }
            ContactOperation::RegisterSms { msisdn, options } => {
                let contact_id = self.require_contact_id()?;
                let response = self
                    .api
                    .register_sms(&contact_id, &msisdn, &options, &self.config.locale)
                    .await?;
                self.channel_response(OperationKind::RegisterSms, contact_id, response)
            }
            ContactOperation::RegisterOpen { address, options } => {
                let contact_id = self.require_contact_id()?;
                let response = self
                    .api
                    .register_open(&contact_id, &address, &options, &self.config.locale)
                    .await?;
                self.channel_response(OperationKind::RegisterOpen, contact_id, response)
            }
            ContactOperation::AssociateChannel {
                channel_id,
                channel_type,
            } => {
                let contact_id = self.require_contact_id()?;
                let response = self
                    .api
                    .associate_channel(&contact_id, &channel_id, channel_type)
                    .await?;
                self.channel_response(OperationKind::AssociateChannel, contact_id, response)
            }
            ContactOperation::DisassociateChannel { channel } => {
                let contact_id = self.require_contact_id()?;
                let response = self.api.disassociate_channel(&contact_id, &channel).await?;
                log_response(OperationKind::DisassociateChannel, &response);

                if response.is_success() {
                    let removed = response.result.clone().or_else(|| channel.associated());
                    if let Some(removed) = removed {
                        self.apply(EngineEvent::ChannelUpdated {
                            contact_id,
                            change: ChannelChange::Disassociated(removed),
                        })?;
                    }
                }
                Ok(response.is_operation_complete())
            }
            ContactOperation::Resend { channel } => {
                let response = self.api.resend(&channel).await?;
                log_response(OperationKind::Resend, &response);
                Ok(response.is_operation_complete())
            }
        }
    }

    async fn perform_identity(&self, kind: OperationKind, named_user_id: Option<String>) -> Result<bool> {
        let channel_id = self.require_channel_id()?;
        let (contact_id, orphaned) = {
            let state = self.lock();
            (
                state.engine.identity().map(|i| i.contact_id.clone()),
                state.engine.possibly_orphaned_contact_id(),
            )
        };

        let response = match (&kind, &named_user_id) {
            (OperationKind::Identify, Some(named)) => {
                self.api
                    .identify(&channel_id, named, contact_id.as_deref(), orphaned.as_deref())
                    .await?
            }
            (OperationKind::Reset, _) => self.api.reset(&channel_id, orphaned.as_deref()).await?,
            // Resolve asks which contact owns the channel now; no hint.
            _ => self.api.resolve(&channel_id, None, orphaned.as_deref()).await?,
        };
        log_response(kind, &response);

        let complete = response.is_operation_complete();
        if response.is_success() {
            if let Some(result) = response.result {
                self.apply(EngineEvent::IdentityResolved {
                    kind,
                    named_user_id,
                    result,
                    now: self.clock.now(),
                })?;
            }
        }
        Ok(complete)
    }

    async fn perform_update(
        &self,
        tags: Option<Vec<TagGroupUpdate>>,
        attributes: Option<Vec<AttributeUpdate>>,
        subscription_lists: Option<Vec<ScopedSubscriptionListUpdate>>,
    ) -> Result<bool> {
        let contact_id = self.require_contact_id()?;
        let response = self
            .api
            .update(
                &contact_id,
                tags.as_deref(),
                attributes.as_deref(),
                subscription_lists.as_deref(),
            )
            .await?;
        log_response(OperationKind::Update, &response);

        if response.is_success() {
            self.apply(EngineEvent::AudienceUpdated {
                contact_id,
                tags,
                attributes,
                subscription_lists,
            })?;
        }
        Ok(response.is_operation_complete())
    }

    fn channel_response(
        &self,
        kind: OperationKind,
        contact_id: String,
        response: ApiResponse<AssociatedChannel>,
    ) -> Result<bool> {
        log_response(kind, &response);
        if response.is_success() {
            if let Some(channel) = response.result.clone() {
                self.apply(EngineEvent::ChannelUpdated {
                    contact_id,
                    change: ChannelChange::Associated(channel),
                })?;
            }
        }
        Ok(response.is_operation_complete())
    }

    fn require_channel_id(&self) -> ContactResult<String> {
        self.lock()
            .channel_id
            .clone()
            .ok_or(ContactError::MissingChannelId)
    }

    fn require_contact_id(&self) -> ContactResult<String> {
        self.lock()
            .engine
            .identity()
            .map(|i| i.contact_id.clone())
            .ok_or(ContactError::MissingContactId)
    }

    // =====================================================================
    // Commands
    // =====================================================================

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, event: EngineEvent) -> Result<()> {
        let mut guard = self.lock();
        let cmds = guard.engine.handle_event(event);
        self.execute_commands(&mut guard, cmds)
    }

    fn refresh_projections(&self) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let cmds = state.engine.refresh_projections(state.log.entries());
        self.execute_commands(state, cmds)
    }

    fn execute_commands(&self, state: &mut SharedState, cmds: Vec<EngineCommand>) -> Result<()> {
        for cmd in cmds {
            log::trace!("[EXECUTOR] cmd: {:?}", cmd);
            match cmd {
                EngineCommand::Emit(update) => self.publish(update),
                EngineCommand::PruneOperationsBefore(date) => {
                    let pruned = state.log.remove_all(|e| e.created_at <= date)?;
                    if pruned > 0 {
                        log::info!("[EXECUTOR] pruned {} operations older than {}", pruned, date);
                    }
                }
                EngineCommand::PersistIdentity => {
                    self.store
                        .set_json_opt(CONTACT_INFO_KEY, state.engine.identity())?;
                }
                EngineCommand::PersistAnonymousData => {
                    self.store
                        .set_json_opt(ANON_DATA_KEY, state.engine.anon_data())?;
                }
            }
        }
        Ok(())
    }

    fn publish(&self, update: ContactUpdate) {
        if let ContactUpdate::ContactIdUpdate(info) = &update {
            self.contact_info.send_replace(Some(info.clone()));
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(update.clone()).is_ok());
    }
}

fn non_empty(value: &str, reason: &'static str) -> ContactResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ContactError::InvalidChannel(reason));
    }
    Ok(trimmed.to_string())
}

fn log_response<T>(kind: OperationKind, response: &ApiResponse<T>) {
    if response.is_success() {
        log::debug!("[EXECUTOR] {:?} succeeded ({})", kind, response.status);
    } else if response.is_client_error() {
        log::error!(
            "[EXECUTOR] {:?} rejected with {}, dropping it",
            kind,
            response.status
        );
    } else {
        log::warn!("[EXECUTOR] {:?} failed with {}, will retry", kind, response.status);
    }
}
