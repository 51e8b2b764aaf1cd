#![cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use crate::clock::{ManualClock, Timestamp};
use crate::config::{ContactConfig, RateLimit, RetryConfig};
use crate::contact::api::{ApiCall, IdentifyResult, MockContactApi, MockReply, ResolvedContact};
use crate::contact::domain::{
    AnonymousData, ChannelType, ContactOperation, IdentityState, TagGroupUpdate, TagGroupUpdateType,
};
use crate::contact::engine::ContactUpdate;
use crate::contact::runtime::{
    ContactDeps, ContactManager, IdentityRateLimiter, ManualWorkScheduler, TokioWorkScheduler,
    WorkFuture, WorkHandler, WorkRequest, WorkResult, WorkScheduler, ANON_DATA_KEY, CONTACT_INFO_KEY,
    IDENTITY_RATE_LIMIT_ID, UPDATE_RATE_LIMIT_ID, UPDATE_TASK_ID,
};
use crate::error::ContactError;
use crate::persistence::{KeyValueStore, KeyValueStoreExt, MemoryStore};

// =========================================================================
// Helpers
// =========================================================================

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn result(contact_id: &str, is_anonymous: bool) -> IdentifyResult {
    IdentifyResult {
        contact: ResolvedContact {
            contact_id: contact_id.into(),
            is_anonymous,
            channel_associated_date: t0() - Duration::days(1),
        },
        token: format!("token-{}", contact_id),
        token_expires_in_ms: 3_600_000,
    }
}

fn named(contact_id: &str, named_user_id: &str) -> IdentityState {
    IdentityState {
        contact_id: contact_id.into(),
        is_anonymous: false,
        named_user_id: Some(named_user_id.into()),
        channel_associated_date: Some(t0() - Duration::days(1)),
        resolve_date: Some(t0() - Duration::days(1)),
    }
}

fn tags(group: &str, values: &[&str]) -> Vec<TagGroupUpdate> {
    vec![TagGroupUpdate::new(group, values.iter().copied(), TagGroupUpdateType::Add)]
}

struct Harness {
    manager: Arc<ContactManager>,
    api: Arc<MockContactApi>,
    scheduler: Arc<ManualWorkScheduler>,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new(store: Arc<MemoryStore>, api: MockContactApi) -> Self {
        let api = Arc::new(api);
        let scheduler = Arc::new(ManualWorkScheduler::new());
        let clock = Arc::new(ManualClock::new(t0()));

        let manager = ContactManager::new(
            ContactDeps {
                store: store.clone(),
                api: api.clone(),
                scheduler: scheduler.clone(),
                clock: clock.clone(),
            },
            ContactConfig::default(),
        )
        .unwrap();

        Self {
            manager,
            api,
            scheduler,
            clock,
            store,
        }
    }

    /// Stored identity, channel ID set.
    fn with_identity(identity: IdentityState, api: MockContactApi) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.set_json(CONTACT_INFO_KEY, &identity).unwrap();
        let harness = Self::new(store, api);
        harness.manager.set_channel_id(Some("channel".into()));
        harness
    }

    fn anonymous(contact_id: &str, api: MockContactApi) -> Self {
        Self::with_identity(IdentityState::anonymous(contact_id, t0() - Duration::days(1)), api)
    }

    async fn drain(&self) -> Vec<WorkResult> {
        self.scheduler.run_until_idle(20).await
    }
}

fn collect(rx: &mut mpsc::UnboundedReceiver<ContactUpdate>) -> Vec<ContactUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn call_kinds(calls: &[ApiCall]) -> Vec<&'static str> {
    calls
        .iter()
        .map(|c| match c {
            ApiCall::Resolve { .. } => "resolve",
            ApiCall::Identify { .. } => "identify",
            ApiCall::Reset { .. } => "reset",
            ApiCall::Update { .. } => "update",
            ApiCall::AssociateChannel { .. } => "associate",
            ApiCall::RegisterEmail { .. } => "email",
            ApiCall::RegisterSms { .. } => "sms",
            ApiCall::RegisterOpen { .. } => "open",
            ApiCall::DisassociateChannel { .. } => "disassociate",
            ApiCall::Resend { .. } => "resend",
        })
        .collect()
}

// =========================================================================
// Executor cycles
// =========================================================================

#[tokio::test(start_paused = true)]
async fn anonymous_update_resolves_first_and_tracks_anon_data() {
    let h = Harness::anonymous("c1", MockContactApi::new().with_default_identity(result("c1", true)));

    h.manager.edit_tags(tags("g", &["t1"])).unwrap();
    assert_eq!(h.drain().await, vec![WorkResult::Success]);

    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve", "update"]);
    assert!(h.manager.pending_operations().is_empty());

    let anon = h.manager.anon_data().unwrap();
    assert!(anon.tags["g"].contains("t1"));

    let stored: Option<AnonymousData> = h.store.get_json(ANON_DATA_KEY).unwrap();
    assert_eq!(stored, Some(anon));
}

#[tokio::test(start_paused = true)]
async fn queued_updates_go_out_as_one_call() {
    let h = Harness::anonymous("c1", MockContactApi::new().with_default_identity(result("c1", true)));

    h.manager.edit_tags(tags("g", &["a"])).unwrap();
    h.manager.edit_tags(tags("g", &["b"])).unwrap();
    h.drain().await;

    let updates: Vec<_> = h
        .api
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ApiCall::Update { tag_updates, .. } => Some(tag_updates),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![Some(vec![TagGroupUpdate::new("g", ["a", "b"], TagGroupUpdateType::Add)])]
    );
}

#[tokio::test(start_paused = true)]
async fn identify_as_current_user_never_calls_identify() {
    let h = Harness::with_identity(
        named("c1", "user"),
        MockContactApi::new().with_default_identity(result("c1", false)),
    );

    h.manager.identify("user").unwrap();
    h.drain().await;
    h.manager.identify("  user ").unwrap();
    h.drain().await;

    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve"]);
    assert!(h.manager.pending_operations().is_empty());
    assert_eq!(h.manager.identity().unwrap().named_user_id.as_deref(), Some("user"));
}

#[tokio::test(start_paused = true)]
async fn reset_with_anon_data_runs_alone_and_reports_one_conflict() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_json(CONTACT_INFO_KEY, &IdentityState::anonymous("c1", t0() - Duration::days(1)))
        .unwrap();
    let mut anon = AnonymousData::default();
    anon.tags
        .insert("g".into(), ["t1".to_string()].into_iter().collect());
    store.set_json(ANON_DATA_KEY, &anon).unwrap();

    let api = MockContactApi::new();
    api.push_identity(MockReply::ok(result("c1", true)));
    api.push_identity(MockReply::ok(result("c3", true)));
    api.push_identity(MockReply::ok(result("c4", false)));

    let h = Harness::new(store, api);
    let mut rx = h.manager.subscribe();
    h.manager.set_channel_id(Some("channel".into()));

    h.manager.reset().unwrap();
    h.manager.identify("y").unwrap();
    h.drain().await;

    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve", "reset", "identify"]);

    let conflicts: Vec<_> = collect(&mut rx)
        .into_iter()
        .filter_map(|u| match u {
            ContactUpdate::Conflict(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].tags, anon.tags);
    assert_eq!(conflicts[0].conflicting_named_user_id, None);

    let identity = h.manager.identity().unwrap();
    assert_eq!(identity.contact_id, "c4");
    assert_eq!(identity.named_user_id.as_deref(), Some("y"));
}

#[tokio::test(start_paused = true)]
async fn client_error_drops_entry_and_queue_moves_on() {
    let api = MockContactApi::new().with_default_identity(result("c1", true));
    api.push_update(MockReply::status(422));
    let h = Harness::anonymous("c1", api);

    h.manager.edit_tags(tags("g", &["bad"])).unwrap();
    h.manager.associate_channel("chan", ChannelType::Sms).unwrap();

    assert_eq!(h.drain().await, vec![WorkResult::Success, WorkResult::Success]);
    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve", "update", "associate"]);
    assert!(h.manager.pending_operations().is_empty());

    let anon = h.manager.anon_data().unwrap();
    assert!(anon.tags.is_empty());
    assert_eq!(anon.channels.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_error_keeps_entry_for_retry() {
    let api = MockContactApi::new().with_default_identity(result("c1", true));
    api.push_update(MockReply::status(503));
    let h = Harness::anonymous("c1", api);

    h.manager.edit_tags(tags("g", &["t"])).unwrap();
    assert_eq!(h.drain().await, vec![WorkResult::Failure]);
    assert_eq!(h.manager.pending_operations().len(), 1);

    assert_eq!(h.drain().await, vec![WorkResult::Success]);
    assert!(h.manager.pending_operations().is_empty());
    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve", "update", "update"]);
}

#[tokio::test(start_paused = true)]
async fn failed_resolve_blocks_cycle() {
    let h = Harness::anonymous("c1", MockContactApi::new());

    h.manager.edit_tags(tags("g", &["t"])).unwrap();
    assert_eq!(h.drain().await, vec![WorkResult::Failure]);
    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve"]);
    assert_eq!(h.manager.pending_operations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resolve_to_new_contact_prunes_older_operations() {
    let api = MockContactApi::new();
    let mut moved = result("c9", false);
    moved.contact.channel_associated_date = t0() + Duration::seconds(1);
    api.push_identity(MockReply::ok(moved));
    let h = Harness::with_identity(named("c1", "user"), api);

    h.manager.edit_tags(tags("g", &["t"])).unwrap();
    assert_eq!(h.drain().await, vec![WorkResult::Success]);

    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve"]);
    assert!(h.manager.pending_operations().is_empty());
    assert_eq!(h.manager.identity().unwrap().contact_id, "c9");
}

#[tokio::test(start_paused = true)]
async fn resolve_and_verify_never_send_the_local_contact_id() {
    let h = Harness::anonymous("c1", MockContactApi::new().with_default_identity(result("c1", true)));

    h.manager.edit_tags(tags("g", &["t"])).unwrap();
    h.drain().await;
    h.clock.advance(Duration::seconds(1));
    h.manager.notify_remote_login().unwrap();
    h.drain().await;

    let calls = h.api.calls();
    assert_eq!(call_kinds(&calls), vec!["resolve", "update", "resolve"]);
    assert_eq!(
        calls[0],
        ApiCall::Resolve {
            channel_id: "channel".into(),
            contact_id: None,
            possibly_orphaned_contact_id: Some("c1".into()),
        }
    );
    assert!(matches!(calls[2], ApiCall::Resolve { contact_id: None, .. }));
}

#[tokio::test(start_paused = true)]
async fn slow_subscriber_still_gets_the_conflict() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_json(CONTACT_INFO_KEY, &IdentityState::anonymous("c1", t0() - Duration::days(1)))
        .unwrap();
    let mut anon = AnonymousData::default();
    anon.tags
        .insert("g".into(), ["t1".to_string()].into_iter().collect());
    store.set_json(ANON_DATA_KEY, &anon).unwrap();

    let api = MockContactApi::new();
    api.push_identity(MockReply::ok(result("c1", true)));
    api.push_identity(MockReply::ok(result("c2", false)));
    let h = Harness::new(store, api);
    let mut rx = h.manager.subscribe();
    h.manager.set_channel_id(Some("channel".into()));

    h.manager.identify("u").unwrap();
    h.drain().await;
    for i in 0..70 {
        h.manager.identify(if i % 2 == 0 { "a" } else { "b" }).unwrap();
    }

    let updates = collect(&mut rx);
    assert!(updates.len() > 70);
    let conflicts: Vec<_> = updates
        .iter()
        .filter_map(|u| match u {
            ContactUpdate::Conflict(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].tags, anon.tags);
    assert_eq!(conflicts[0].conflicting_named_user_id.as_deref(), Some("u"));
}

// =========================================================================
// Stability & dispatch
// =========================================================================

#[tokio::test(start_paused = true)]
async fn pending_reset_makes_contact_unstable_until_done() {
    let api = MockContactApi::new();
    api.push_identity(MockReply::ok(result("c1", false)));
    api.push_identity(MockReply::ok(result("c2", true)));
    let h = Harness::with_identity(named("c1", "user"), api);

    assert!(h.manager.contact_id_info().unwrap().is_stable);
    h.manager.reset().unwrap();
    assert!(!h.manager.contact_id_info().unwrap().is_stable);
    assert_eq!(h.manager.current_named_user_id(), None);

    h.drain().await;
    let info = h.manager.contact_id_info().unwrap();
    assert!(info.is_stable);
    assert_eq!(info.contact_id, "c2");
    assert_eq!(h.manager.stable_contact_id().await.unwrap(), "c2");
}

#[tokio::test(start_paused = true)]
async fn dispatch_waits_for_channel_and_picks_buckets() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_json(CONTACT_INFO_KEY, &IdentityState::anonymous("c1", t0()))
        .unwrap();
    let h = Harness::new(store, MockContactApi::new().with_default_identity(result("c1", true)));

    assert_eq!(
        h.scheduler.rate_limit(IDENTITY_RATE_LIMIT_ID),
        Some(RateLimit {
            rate: 1,
            interval_ms: 5_000
        })
    );

    h.manager.edit_tags(tags("g", &["t"])).unwrap();
    assert!(h.scheduler.dispatched().is_empty());

    h.manager.set_channel_id(Some("channel".into()));
    let first = h.scheduler.dispatched().pop().unwrap();
    assert_eq!(first.work_id, UPDATE_TASK_ID);
    assert!(first.requires_network);
    assert_eq!(
        first.rate_limit_ids,
        vec![UPDATE_RATE_LIMIT_ID.to_string(), IDENTITY_RATE_LIMIT_ID.to_string()]
    );

    h.drain().await;
    h.manager.edit_tags(tags("g", &["u"])).unwrap();
    let second = h.scheduler.dispatched().pop().unwrap();
    assert_eq!(second.rate_limit_ids, vec![UPDATE_RATE_LIMIT_ID.to_string()]);

    h.manager.identify("someone").unwrap();
    let third = h.scheduler.dispatched().pop().unwrap();
    assert_eq!(third.rate_limit_ids.len(), 1, "update still heads the log");
}

#[tokio::test(start_paused = true)]
async fn disabled_or_shut_down_manager_does_nothing() {
    let h = Harness::anonymous("c1", MockContactApi::new().with_default_identity(result("c1", true)));
    h.manager.edit_tags(tags("g", &["t"])).unwrap();
    h.manager.set_enabled(false);
    let before = h.scheduler.dispatched().len();

    assert!(matches!(
        h.manager.edit_tags(tags("g", &["u"])),
        Err(ContactError::Disabled)
    ));
    assert_eq!(h.scheduler.dispatched().len(), before);
    assert_eq!(h.manager.perform_next_operation().await, WorkResult::Success);
    assert!(h.api.calls().is_empty());

    h.manager.shutdown();
    h.manager.set_enabled(true);
    assert_eq!(h.manager.perform_next_operation().await, WorkResult::Success);
    assert!(h.api.calls().is_empty());
    assert_eq!(h.manager.pending_operations().len(), 1);
}

// =========================================================================
// Public surface
// =========================================================================

#[tokio::test]
async fn invalid_input_never_reaches_the_log() {
    let h = Harness::anonymous("c1", MockContactApi::new());

    assert!(matches!(
        h.manager.identify("   "),
        Err(ContactError::InvalidNamedUserId(_, 128))
    ));
    assert!(h.manager.identify(&"x".repeat(129)).is_err());
    assert!(h.manager.identify(&"x".repeat(128)).is_ok());
    assert!(matches!(h.manager.edit_tags(vec![]), Err(ContactError::EmptyUpdate)));
    assert!(matches!(
        h.manager.register_email(" ", Default::default()),
        Err(ContactError::InvalidChannel(_))
    ));
    assert!(matches!(
        h.manager.associate_channel("", ChannelType::Open),
        Err(ContactError::InvalidChannel(_))
    ));

    assert_eq!(h.manager.pending_operations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resolve_auth_caches_and_reports_mismatch() {
    let h = Harness::anonymous("c1", MockContactApi::new().with_default_identity(result("c1", true)));

    assert_eq!(h.manager.resolve_auth("c1").await.unwrap(), "token-c1");
    assert_eq!(h.manager.resolve_auth("c1").await.unwrap(), "token-c1");
    assert_eq!(h.api.calls().len(), 1);

    h.manager.auth_token_expired("token-c1");
    assert_eq!(h.manager.resolve_auth("c1").await.unwrap(), "token-c1");
    assert_eq!(h.api.calls().len(), 2);

    match h.manager.resolve_auth("someone-else").await {
        Err(ContactError::ContactIdMismatch { expected, actual }) => {
            assert_eq!(expected, "someone-else");
            assert_eq!(actual.as_deref(), Some("c1"));
        }
        other => panic!("expected mismatch, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn stale_resolve_gets_verified_before_returning() {
    let h = Harness::anonymous("c1", MockContactApi::new().with_default_identity(result("c1", true)));

    let waiter = tokio::spawn({
        let manager = h.manager.clone();
        async move { manager.stable_verified_contact_id().await }
    });
    tokio::task::yield_now().await;
    assert!(matches!(
        h.manager.pending_operations()[0].operation,
        ContactOperation::Verify { .. }
    ));

    h.drain().await;
    assert_eq!(waiter.await.unwrap().unwrap(), "c1");
    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve"]);
    assert_eq!(h.manager.identity().unwrap().resolve_date, Some(t0()));

    // Fresh now: no new operation.
    assert_eq!(h.manager.stable_verified_contact_id().await.unwrap(), "c1");
    assert!(h.manager.pending_operations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn verified_read_checks_age_of_the_stable_contact() {
    let api = MockContactApi::new();
    api.push_identity(MockReply::ok(result("c1", false)));
    api.push_identity(MockReply::ok(result("c2", true)));
    let h = Harness::with_identity(named("c1", "user"), api);
    h.manager.reset().unwrap();

    let waiter = tokio::spawn({
        let manager = h.manager.clone();
        async move { manager.stable_verified_contact_id().await }
    });
    tokio::task::yield_now().await;
    // Stale c1 is unstable, so nothing is verified against it.
    assert_eq!(h.manager.pending_operations().len(), 1);

    h.drain().await;
    assert_eq!(waiter.await.unwrap().unwrap(), "c2");
    assert_eq!(call_kinds(&h.api.calls()), vec!["resolve", "reset"]);
    assert!(h.manager.pending_operations().is_empty());
}

#[tokio::test]
async fn foreground_resolve_is_throttled() {
    let h = Harness::anonymous("c1", MockContactApi::new());

    assert!(h.manager.foreground_resolve().unwrap());
    assert!(!h.manager.foreground_resolve().unwrap());
    h.clock.advance(Duration::days(1));
    assert!(h.manager.foreground_resolve().unwrap());

    let resolves = h
        .manager
        .pending_operations()
        .into_iter()
        .filter(|e| e.operation == ContactOperation::Resolve)
        .count();
    assert_eq!(resolves, 2);
}

#[tokio::test]
async fn reset_if_needed_only_for_named_or_dirty_contacts() {
    let clean = Harness::anonymous("c1", MockContactApi::new());
    clean.manager.reset_if_needed().unwrap();
    assert!(clean.manager.pending_operations().is_empty());

    let signed_in = Harness::with_identity(named("c1", "user"), MockContactApi::new());
    signed_in.manager.set_enabled(false);
    signed_in.manager.reset_if_needed().unwrap();
    assert_eq!(
        signed_in.manager.pending_operations()[0].operation,
        ContactOperation::Reset
    );
}

#[tokio::test]
async fn default_contact_id_is_persisted() {
    let h = Harness::new(Arc::new(MemoryStore::new()), MockContactApi::new());
    assert!(h.manager.identity().is_none());

    h.manager.generate_default_contact_id_if_not_set().unwrap();
    let identity = h.manager.identity().unwrap();
    assert!(identity.is_anonymous);

    let stored: Option<IdentityState> = h.store.get_json(CONTACT_INFO_KEY).unwrap();
    assert_eq!(stored, Some(identity));
}

#[tokio::test]
async fn legacy_log_is_migrated_on_load() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_json("Contact.operations", &vec![ContactOperation::Reset])
        .unwrap();

    let h = Harness::new(store.clone(), MockContactApi::new());
    let pending = h.manager.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].created_at, t0());
    assert!(!store.contains("Contact.operations").unwrap());
}

// =========================================================================
// Rate limiting & scheduling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn identity_limiter_spaces_calls() {
    let limiter = IdentityRateLimiter::new(StdDuration::from_secs(5));
    let start = tokio::time::Instant::now();

    limiter.run(async {}).await;
    assert!(start.elapsed() < StdDuration::from_secs(1));

    limiter.run(async {}).await;
    assert!(start.elapsed() >= StdDuration::from_secs(5));
}

fn counting_handler(runs: Arc<AtomicUsize>, fail_first: usize) -> WorkHandler {
    Arc::new(move |_request: WorkRequest| -> WorkFuture {
        let runs = runs.clone();
        Box::pin(async move {
            let n = runs.fetch_add(1, Ordering::SeqCst);
            if n < fail_first {
                WorkResult::Failure
            } else {
                WorkResult::Success
            }
        })
    })
}

fn request(ids: &[&str]) -> WorkRequest {
    WorkRequest {
        work_id: "work".into(),
        requires_network: true,
        rate_limit_ids: ids.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn tokio_scheduler_retries_with_backoff() {
    let scheduler = TokioWorkScheduler::new(RetryConfig {
        initial_backoff_ms: 1_000,
        max_backoff_ms: 4_000,
    });
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler.register_worker("work", counting_handler(runs.clone(), 2));

    scheduler.dispatch(request(&[]));
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::sleep(StdDuration::from_secs(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(scheduler.is_idle());
}

#[tokio::test(start_paused = true)]
async fn tokio_scheduler_waits_for_network_and_bucket() {
    let scheduler = TokioWorkScheduler::new(RetryConfig::default());
    scheduler.set_rate_limit(
        "bucket",
        RateLimit {
            rate: 1,
            interval_ms: 5_000,
        },
    );
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler.register_worker("work", counting_handler(runs.clone(), 0));

    scheduler.set_network_available(false);
    scheduler.dispatch(request(&["bucket"]));
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.set_network_available(true);
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    scheduler.dispatch(request(&["bucket"]));
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1, "bucket still full");

    tokio::time::sleep(StdDuration::from_secs(5)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn manual_scheduler_coalesces_pending_work() {
    let scheduler = ManualWorkScheduler::new();
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler.register_worker("work", counting_handler(runs.clone(), 0));

    scheduler.dispatch(request(&["a"]));
    scheduler.dispatch(request(&["b"]));
    assert_eq!(scheduler.dispatched().len(), 2);

    assert_eq!(scheduler.run_until_idle(10).await, vec![WorkResult::Success]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.has_pending());
}
