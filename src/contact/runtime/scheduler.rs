//! Work scheduler collaborator.
//!
//! The contact manager never calls the backend from a timer: it registers a
//! worker and dispatches [`WorkRequest`]s, and the scheduler decides when the
//! worker runs (network gate, rate-limit buckets, retry backoff).

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::{RateLimit, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub work_id: String,
    pub requires_network: bool,
    pub rate_limit_ids: Vec<String>,
}

pub type WorkFuture = Pin<Box<dyn Future<Output = WorkResult> + Send>>;
pub type WorkHandler = Arc<dyn Fn(WorkRequest) -> WorkFuture + Send + Sync>;

pub trait WorkScheduler: Send + Sync {
    fn register_worker(&self, work_id: &str, handler: WorkHandler);
    fn set_rate_limit(&self, bucket_id: &str, limit: RateLimit);
    fn dispatch(&self, request: WorkRequest);
}

// =====================================================================
// Tokio scheduler
// =====================================================================

/// Sliding-window bucket: at most `rate` acquisitions per `interval`.
#[derive(Debug)]
struct Bucket {
    limit: RateLimit,
    hits: VecDeque<Instant>,
}

impl Bucket {
    fn delay(&mut self, now: Instant) -> Duration {
        let window = self.limit.interval();
        while self
            .hits
            .front()
            .is_some_and(|hit| now.duration_since(*hit) >= window)
        {
            self.hits.pop_front();
        }

        if self.hits.len() < self.limit.rate.max(1) as usize {
            return Duration::ZERO;
        }
        match self.hits.front() {
            Some(oldest) => (*oldest + window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    workers: HashMap<String, WorkHandler>,
    buckets: HashMap<String, Bucket>,
    pending: HashMap<String, WorkRequest>,
    running: HashSet<String>,
}

struct Inner {
    state: Mutex<SchedulerState>,
    network: watch::Sender<bool>,
    retry: RetryConfig,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn wait_for_network(&self) {
        let mut rx = self.network.subscribe();
        if !*rx.borrow() {
            log::debug!("[SCHEDULER] waiting for network");
        }
        // The sender lives as long as `self`, so this only returns once the
        // network is up.
        let _ = rx.wait_for(|up| *up).await;
    }

    async fn acquire(&self, bucket_ids: &[String]) {
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();

                let mut wait = Duration::ZERO;
                for id in bucket_ids {
                    if let Some(bucket) = state.buckets.get_mut(id) {
                        wait = wait.max(bucket.delay(now));
                    }
                }

                if wait.is_zero() {
                    for id in bucket_ids {
                        if let Some(bucket) = state.buckets.get_mut(id) {
                            bucket.hits.push_back(now);
                        }
                    }
                }
                wait
            };

            if wait.is_zero() {
                return;
            }
            log::debug!("[SCHEDULER] rate limited by {:?}, waiting {:?}", bucket_ids, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Drains pending requests for one work ID, one at a time.
    async fn run_work(self: Arc<Self>, work_id: String) {
        let initial = Duration::from_millis(self.retry.initial_backoff_ms);
        let max = Duration::from_millis(self.retry.max_backoff_ms);
        let mut backoff = initial;

        loop {
            let (request, handler) = {
                let mut state = self.lock();
                let Some(request) = state.pending.remove(&work_id) else {
                    state.running.remove(&work_id);
                    return;
                };
                let Some(handler) = state.workers.get(&work_id).cloned() else {
                    log::warn!("[SCHEDULER] no worker registered for {}", work_id);
                    state.running.remove(&work_id);
                    return;
                };
                (request, handler)
            };

            if request.requires_network {
                self.wait_for_network().await;
            }
            self.acquire(&request.rate_limit_ids).await;

            log::trace!("[SCHEDULER] running {}", work_id);
            match handler(request.clone()).await {
                WorkResult::Success => backoff = initial,
                WorkResult::Failure => {
                    log::warn!("[SCHEDULER] {} failed, retrying in {:?}", work_id, backoff);
                    self.lock()
                        .pending
                        .entry(work_id.clone())
                        .or_insert(request);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max);
                }
            }
        }
    }
}

/// Tokio-backed scheduler.
///
/// Work is serial per work ID and dispatches coalesce: while a request is
/// pending or running, a new dispatch for the same ID replaces the pending
/// one instead of queueing another run.
#[derive(Clone)]
pub struct TokioWorkScheduler {
    inner: Arc<Inner>,
}

impl TokioWorkScheduler {
    pub fn new(retry: RetryConfig) -> Self {
        let (network, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::default()),
                network,
                retry,
            }),
        }
    }

    pub fn set_network_available(&self, available: bool) {
        log::info!("[SCHEDULER] network available: {}", available);
        self.inner.network.send_replace(available);
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.pending.is_empty() && state.running.is_empty()
    }
}

impl WorkScheduler for TokioWorkScheduler {
    fn register_worker(&self, work_id: &str, handler: WorkHandler) {
        self.inner.lock().workers.insert(work_id.to_string(), handler);
    }

    fn set_rate_limit(&self, bucket_id: &str, limit: RateLimit) {
        self.inner.lock().buckets.insert(
            bucket_id.to_string(),
            Bucket {
                limit,
                hits: VecDeque::new(),
            },
        );
    }

    fn dispatch(&self, request: WorkRequest) {
        let work_id = request.work_id.clone();
        let start = {
            let mut state = self.inner.lock();
            state.pending.insert(work_id.clone(), request);
            state.running.insert(work_id.clone())
        };
        if !start {
            log::trace!("[SCHEDULER] coalesced dispatch for {}", work_id);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.inner.clone().run_work(work_id));
            }
            Err(_) => {
                log::error!("[SCHEDULER] no tokio runtime, {} left pending", work_id);
                self.inner.lock().running.remove(&work_id);
            }
        }
    }
}

// =====================================================================
// Manual scheduler
// =====================================================================

#[derive(Default)]
struct ManualState {
    workers: HashMap<String, WorkHandler>,
    rate_limits: HashMap<String, RateLimit>,
    dispatched: Vec<WorkRequest>,
    pending: VecDeque<WorkRequest>,
}

/// Scheduler that only runs work when told to. Records every dispatch.
#[derive(Default)]
pub struct ManualWorkScheduler {
    state: Mutex<ManualState>,
}

impl ManualWorkScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dispatched(&self) -> Vec<WorkRequest> {
        self.lock().dispatched.clone()
    }

    pub fn rate_limit(&self, bucket_id: &str) -> Option<RateLimit> {
        self.lock().rate_limits.get(bucket_id).copied()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Runs the oldest pending request. A failed request stays pending.
    pub async fn run_next(&self) -> Option<WorkResult> {
        let (request, handler) = {
            let mut state = self.lock();
            let request = state.pending.pop_front()?;
            let handler = state.workers.get(&request.work_id).cloned()?;
            (request, handler)
        };

        let result = handler(request.clone()).await;
        if result == WorkResult::Failure {
            let mut state = self.lock();
            if !state.pending.iter().any(|r| r.work_id == request.work_id) {
                state.pending.push_front(request);
            }
        }
        Some(result)
    }

    /// Runs pending work until none is left, a run fails, or `max_runs` is hit.
    pub async fn run_until_idle(&self, max_runs: usize) -> Vec<WorkResult> {
        let mut results = Vec::new();
        while results.len() < max_runs {
            match self.run_next().await {
                Some(result) => {
                    results.push(result);
                    if result == WorkResult::Failure {
                        break;
                    }
                }
                None => break,
            }
        }
        results
    }
}

impl WorkScheduler for ManualWorkScheduler {
    fn register_worker(&self, work_id: &str, handler: WorkHandler) {
        self.lock().workers.insert(work_id.to_string(), handler);
    }

    fn set_rate_limit(&self, bucket_id: &str, limit: RateLimit) {
        self.lock().rate_limits.insert(bucket_id.to_string(), limit);
    }

    fn dispatch(&self, request: WorkRequest) {
        let mut state = self.lock();
        state.dispatched.push(request.clone());
        match state.pending.iter_mut().find(|r| r.work_id == request.work_id) {
            Some(existing) => *existing = request,
            None => state.pending.push_back(request),
        }
    }
}
