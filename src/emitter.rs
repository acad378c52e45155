//! The emitter: single-flight drain loop over the event store
//!
//! Producers append payloads and nudge the loop awake; the loop reads a
//! page of the oldest events, packs them into requests, sends them
//! concurrently, and removes the ids whose delivery resolved (success or
//! terminal failure). Ids that failed retriably stay queued.
//!
//! # Architecture
//!
//! ```text
//! add/flush ──► EventStore ──► run_loop ──► Batcher ──► NetworkConnection
//!                   ▲                                        │
//!                   └── remove resolved ids ◄── classify ◄───┘
//! ```
//!
//! At most one loop instance is active per emitter, enforced by a
//! compare-and-set on the running flag. The flag is cleared by a drop
//! guard on every exit path, so the emitter can never be left stuck in
//! "running" with no active task.

use crate::batcher::{build_requests, BatchLimits};
use crate::config::{BufferOption, EmitterConfig};
use crate::connection::{HttpConnection, NetworkConnection};
use crate::error::Result;
use crate::payload::Payload;
use crate::executor::WorkerPool;
use crate::request::{EmitterRequest, RequestResult, NO_RESPONSE_STATUS};
use crate::store::EventStore;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Callback fired after each resolved attempt with
/// `(success_count, failure_count)`
pub type AttemptCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Delivery tunables adjustable while the emitter runs
///
/// The loop re-reads these at every iteration, so setter calls take
/// effect on the next page.
struct Tunables {
    buffer_option: BufferOption,
    byte_limit_get: usize,
    byte_limit_post: usize,
    send_limit: usize,
    empty_limit: u32,
    tick: Duration,
    request_timeout: Duration,
    retry_failed_requests: bool,
    custom_retry_rules: HashMap<u16, bool>,
    server_anonymisation: bool,
    custom_user_agent: Option<String>,
}

impl Tunables {
    fn from_config(config: &EmitterConfig) -> Self {
        Self {
            buffer_option: config.buffer_option,
            byte_limit_get: config.byte_limit_get,
            byte_limit_post: config.byte_limit_post,
            send_limit: config.send_limit,
            empty_limit: config.empty_limit,
            tick: config.tick,
            request_timeout: config.request_timeout,
            retry_failed_requests: config.retry_failed_requests,
            custom_retry_rules: config.custom_retry_rules.clone(),
            server_anonymisation: config.server_anonymisation,
            custom_user_agent: config.custom_user_agent.clone(),
        }
    }
}

#[derive(Default)]
struct DeliveryCounters {
    added: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

struct EmitterInner {
    store: Arc<dyn EventStore>,
    connection: Arc<dyn NetworkConnection>,
    pool: WorkerPool,
    tunables: RwLock<Tunables>,
    callback: RwLock<Option<AttemptCallback>>,
    is_running: AtomicBool,
    is_paused: AtomicBool,
    shutting_down: AtomicBool,
    counters: DeliveryCounters,
}

/// Clears the running flag on every exit path, including unwinding.
struct RunningGuard(Arc<EmitterInner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.is_running.store(false, Ordering::Release);
    }
}

/// Buffered telemetry emitter
///
/// Cheap to clone; clones share the same store, connection, and run
/// state.
///
/// # Example
///
/// ```ignore
/// let emitter = Emitter::new(
///     EmitterConfig::new("https://collector.example.com"),
///     Arc::new(InMemoryEventStore::new()),
/// )?;
/// emitter.add(payload).await;
/// emitter.flush();
/// ```
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

impl Emitter {
    /// Create an emitter delivering over HTTP per the configuration
    ///
    /// # Errors
    /// Returns an error if the configuration fails validation or the HTTP
    /// client cannot be created.
    pub fn new(config: EmitterConfig, store: Arc<dyn EventStore>) -> Result<Self> {
        config.validate()?;
        let connection = Arc::new(HttpConnection::new(&config.endpoint, config.method)?);
        Ok(Self::with_connection(config, store, connection))
    }

    /// Create an emitter over a custom [`NetworkConnection`]
    ///
    /// The endpoint in `config` is ignored; the connection already knows
    /// its destination.
    pub fn with_connection(
        config: EmitterConfig,
        store: Arc<dyn EventStore>,
        connection: Arc<dyn NetworkConnection>,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                store,
                connection,
                pool: WorkerPool::new(config.pool_size),
                tunables: RwLock::new(Tunables::from_config(&config)),
                callback: RwLock::new(None),
                is_running: AtomicBool::new(false),
                is_paused: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                counters: DeliveryCounters::default(),
            }),
        }
    }

    /// Append an event and wake the drain loop if it is idle
    pub async fn add(&self, payload: Payload) {
        self.inner.store.add(payload).await;
        self.inner.counters.added.fetch_add(1, Ordering::Relaxed);
        self.ensure_running();
    }

    /// Wake the drain loop without appending anything
    pub fn flush(&self) {
        self.ensure_running();
    }

    /// Stop the loop at its next iteration; in-flight sends finish
    pub fn pause_emit(&self) {
        self.inner.is_paused.store(true, Ordering::Release);
        debug!("emitter paused");
    }

    /// Clear the pause flag and restart the loop if it went idle
    pub fn resume_emit(&self) {
        self.inner.is_paused.store(false, Ordering::Release);
        debug!("emitter resumed");
        self.ensure_running();
    }

    /// Stop accepting work and wait for background tasks to finish
    ///
    /// Returns whether everything wound down cleanly within `timeout`;
    /// tasks still running afterwards are aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutting_down.store(true, Ordering::Release);
        info!("emitter shutting down");
        self.inner.pool.shutdown(timeout).await
    }

    /// Whether a drain loop is currently active
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::Acquire)
    }

    /// Whether emission is paused
    pub fn is_paused(&self) -> bool {
        self.inner.is_paused.load(Ordering::Acquire)
    }

    /// Number of events currently queued in the store
    pub async fn pending_count(&self) -> usize {
        self.inner.store.size().await
    }

    /// Total events appended through this emitter
    pub fn events_added(&self) -> u64 {
        self.inner.counters.added.load(Ordering::Relaxed)
    }

    /// Total events delivered successfully
    pub fn events_sent(&self) -> u64 {
        self.inner.counters.sent.load(Ordering::Relaxed)
    }

    /// Total events dropped after terminal failures
    pub fn events_failed(&self) -> u64 {
        self.inner.counters.failed.load(Ordering::Relaxed)
    }

    /// Set the batch cardinality target for POST
    pub fn set_buffer_option(&self, buffer_option: BufferOption) {
        self.inner.tunables.write().buffer_option = buffer_option;
    }

    /// Set the byte limit for GET requests
    pub fn set_byte_limit_get(&self, limit: usize) {
        self.inner.tunables.write().byte_limit_get = limit;
    }

    /// Set the byte limit for POST requests
    pub fn set_byte_limit_post(&self, limit: usize) {
        self.inner.tunables.write().byte_limit_post = limit;
    }

    /// Set the number of events read from the store per attempt
    pub fn set_send_limit(&self, limit: usize) {
        self.inner.tunables.write().send_limit = limit;
    }

    /// Set how many consecutive empty checks precede going idle
    pub fn set_empty_limit(&self, limit: u32) {
        self.inner.tunables.write().empty_limit = limit;
    }

    /// Set the sleep between empty-store checks
    pub fn set_tick(&self, tick: Duration) {
        self.inner.tunables.write().tick = tick;
    }

    /// Set the hard per-request timeout
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.inner.tunables.write().request_timeout = timeout;
    }

    /// Enable or disable retrying failed requests
    pub fn set_retry_failed_requests(&self, enabled: bool) {
        self.inner.tunables.write().retry_failed_requests = enabled;
    }

    /// Replace the per-status-code retry overrides
    pub fn set_custom_retry_rules(&self, rules: HashMap<u16, bool>) {
        self.inner.tunables.write().custom_retry_rules = rules;
    }

    /// Toggle server-side anonymisation on delivery requests
    pub fn set_server_anonymisation(&self, enabled: bool) {
        self.inner.tunables.write().server_anonymisation = enabled;
    }

    /// Override the User-Agent header on delivery requests
    pub fn set_custom_user_agent(&self, user_agent: Option<String>) {
        self.inner.tunables.write().custom_user_agent = user_agent;
    }

    /// Install or clear the per-attempt callback
    pub fn set_request_callback(&self, callback: Option<AttemptCallback>) {
        *self.inner.callback.write() = callback;
    }

    /// Start the drain loop unless one is already active
    fn ensure_running(&self) {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return;
        }
        if self
            .inner
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let inner = Arc::clone(&self.inner);
            if !self.inner.pool.spawn(async move { run_loop(inner).await }) {
                self.inner.is_running.store(false, Ordering::Release);
            }
        }
    }
}

/// The drain loop body
///
/// An explicit loop rather than a recursive step: tunables are re-read
/// each iteration and the stack stays flat across long drains.
async fn run_loop(inner: Arc<EmitterInner>) {
    let _guard = RunningGuard(Arc::clone(&inner));
    debug!("emission loop started");
    let mut empty_count: u32 = 0;

    loop {
        if inner.shutting_down.load(Ordering::Acquire) || inner.is_paused.load(Ordering::Acquire) {
            debug!("emission loop stopping on pause or shutdown");
            break;
        }

        if !inner.connection.health().await {
            info!("collector unreachable, events stay queued");
            break;
        }

        if inner.store.size().await == 0 {
            let (empty_limit, tick) = {
                let tunables = inner.tunables.read();
                (tunables.empty_limit, tunables.tick)
            };
            if empty_count >= empty_limit {
                debug!("event store stayed empty, going idle");
                break;
            }
            empty_count += 1;
            sleep(tick).await;
            continue;
        }
        empty_count = 0;

        let (send_limit, limits, custom_retry_rules, retry_failed, request_timeout) = {
            let tunables = inner.tunables.read();
            (
                tunables.send_limit,
                BatchLimits {
                    method: inner.connection.http_method(),
                    buffer_option: tunables.buffer_option,
                    byte_limit_get: tunables.byte_limit_get,
                    byte_limit_post: tunables.byte_limit_post,
                    custom_user_agent: tunables.custom_user_agent.clone(),
                    server_anonymisation: tunables.server_anonymisation,
                },
                tunables.custom_retry_rules.clone(),
                tunables.retry_failed_requests,
                tunables.request_timeout,
            )
        };

        let mut events = inner.store.emittable_events(send_limit).await;
        if events.is_empty() {
            // Drained between the size check and the read; re-check.
            continue;
        }

        let now = Utc::now().timestamp_millis();
        for event in &mut events {
            event.payload.add_sent_timestamp(now);
        }

        let requests = build_requests(events, &limits);
        let results = dispatch(&inner, requests, request_timeout).await;

        let mut removable: Vec<u64> = Vec::new();
        let mut success_count = 0usize;
        let mut failure_count = 0usize;
        let mut retry_count = 0usize;

        for result in results {
            if result.is_successful() {
                success_count += result.event_ids.len();
                removable.extend(&result.event_ids);
            } else if result.should_retry(&custom_retry_rules, retry_failed) {
                retry_count += result.event_ids.len();
                warn!(
                    status = result.status_code,
                    count = result.event_ids.len(),
                    "request failed, events kept for retry"
                );
            } else {
                failure_count += result.event_ids.len();
                removable.extend(&result.event_ids);
                error!(
                    status = result.status_code,
                    oversize = result.oversize,
                    count = result.event_ids.len(),
                    "request failed terminally, events dropped"
                );
            }
        }

        inner.store.remove_events(&removable).await;
        inner
            .counters
            .sent
            .fetch_add(success_count as u64, Ordering::Relaxed);
        inner
            .counters
            .failed
            .fetch_add(failure_count as u64, Ordering::Relaxed);

        let callback = inner.callback.read().clone();
        if let Some(callback) = callback {
            callback(success_count, failure_count);
        }

        debug!(
            success = success_count,
            failed = failure_count,
            retrying = retry_count,
            "attempt resolved"
        );

        if retry_count > 0 && success_count == 0 {
            info!(
                pending = retry_count,
                "collector rejecting all events, parking until the next add or flush"
            );
            break;
        }
    }

    debug!("emission loop stopped");
}

/// Send every request of the current page concurrently and collect one
/// result per request, in input order
///
/// Each send runs as its own pool task under a hard timeout; a send that
/// does not resolve in time (or whose task dies) yields a result with
/// [`NO_RESPONSE_STATUS`] so its events are kept for retry.
async fn dispatch(
    inner: &Arc<EmitterInner>,
    requests: Vec<EmitterRequest>,
    request_timeout: Duration,
) -> Vec<RequestResult> {
    let mut pending = Vec::with_capacity(requests.len());
    for request in requests {
        let fallback = (request.oversize, request.event_ids.clone());
        let connection = Arc::clone(&inner.connection);
        let handle = inner.pool.submit(async move {
            let oversize = request.oversize;
            let event_ids = request.event_ids.clone();
            match tokio::time::timeout(request_timeout, connection.send(request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_ms = request_timeout.as_millis() as u64,
                        count = event_ids.len(),
                        "request timed out without resolving"
                    );
                    RequestResult::new(NO_RESPONSE_STATUS, oversize, event_ids)
                }
            }
        });
        pending.push((handle, fallback));
    }

    let mut results = Vec::with_capacity(pending.len());
    for (handle, (oversize, event_ids)) in pending {
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(error = %e, "send task failed");
                    results.push(RequestResult::new(NO_RESPONSE_STATUS, oversize, event_ids));
                }
            },
            None => results.push(RequestResult::new(NO_RESPONSE_STATUS, oversize, event_ids)),
        }
    }
    results
}
