//! Core rate limiter implementation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::store::Store;

use super::client::{ClientState, Decision};
use super::identity::Identity;
use super::locks::KeyLocks;
use super::rules::LimiterConfig;
use super::sweep::{SweepReport, SweepTask, DEFAULT_SWEEP_INTERVAL};

/// Identities swept concurrently in one pass.
const SWEEP_CONCURRENCY: usize = 16;

/// The limiter that admits or throttles requests.
///
/// This struct is thread-safe and can be shared across multiple tasks. State
/// lives in the injected [`Store`]; the limiter adds per-identity locking so
/// each check-and-update runs atomically for its identity.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
    sweep_interval: Duration,
    sweeper: Mutex<Option<SweepTask>>,
    unswept_logged: AtomicBool,
}

impl RateLimiter {
    /// Create a limiter over `store`.
    ///
    /// The sweep is not running yet. Until [`start`](Self::start) or
    /// [`start_sweep`](Self::start_sweep) is called, counters never reset and
    /// each identity is capped at its quota in total.
    pub fn new(store: Arc<dyn Store>, config: LimiterConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            locks: KeyLocks::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweeper: Mutex::new(None),
            unswept_logged: AtomicBool::new(false),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Change the sweep cadence.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Share the limiter and start its sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Arc<Self> {
        let limiter = Arc::new(self);
        limiter.start_sweep();
        limiter
    }

    /// Policies enforced by this limiter.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Admit or throttle a request from `ip`, optionally carrying `token`.
    pub async fn decide(&self, ip: &str, token: Option<&str>) -> Result<Decision> {
        if !self.is_sweeping() && !self.unswept_logged.swap(true, Ordering::Relaxed) {
            debug!("Deciding without a running sweep; counters will not reset");
        }

        let identity = Identity::resolve(&self.config, ip, token);
        self.check(&identity).await
    }

    /// Admit or throttle a request counted against `identity`.
    ///
    /// Store failures are returned as errors and never turned into a decision.
    pub async fn check(&self, identity: &Identity<'_>) -> Result<Decision> {
        let _guard = self.locks.lock(identity.key).await;
        let now = self.clock.now();

        let (mut state, created) = match self.store.get(identity.key).await? {
            Some(state) => (state, false),
            None => {
                debug!(
                    identity = %identity,
                    limit = identity.config.requests_per_window(),
                    block_secs = identity.config.block_duration().as_secs(),
                    "Creating client state"
                );
                (ClientState::new(identity.config, now), true)
            }
        };

        let before = state.clone();
        let decision = state.admit(now);

        if created || state != before {
            self.store.add(identity.key, &state).await?;
        }

        if before.is_blocked() && !state.is_blocked() {
            debug!(identity = %identity, "Block expired");
        }
        if !before.is_blocked() && state.is_blocked() {
            debug!(
                identity = %identity,
                total = state.total_requests,
                limit = state.requests_per_window(),
                "Rate limit exceeded, blocking"
            );
        }

        trace!(
            identity = %identity,
            total = state.total_requests,
            allowed = decision.is_allowed(),
            "Checked rate limit"
        );

        Ok(decision)
    }

    /// Current state for `key`, if any.
    pub async fn state(&self, key: &str) -> Result<Option<ClientState>> {
        Ok(self.store.get(key).await?)
    }

    /// Whether the store holds state for `key`.
    pub async fn is_tracked(&self, key: &str) -> Result<bool> {
        Ok(self.store.exists(key).await?)
    }

    /// Run one sweep pass over every stored identity.
    ///
    /// Each identity is re-read under its lock so a concurrent request is never
    /// overwritten by a stale snapshot. A failure on one identity does not stop
    /// the pass; it is logged and counted.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let clients = self.store.all().await?;
        let live: HashSet<String> = clients.iter().map(|(key, _)| key.clone()).collect();

        let results: Vec<(String, Result<bool>)> = stream::iter(clients)
            .map(|(key, _)| async move {
                let result = self.sweep_key(&key).await;
                (key, result)
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut report = SweepReport {
            scanned: results.len(),
            ..SweepReport::default()
        };
        for (key, result) in results {
            match result {
                Ok(true) => report.reset += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to sweep client state");
                    report.failed += 1;
                }
            }
        }

        self.locks.retain_live(&live);

        Ok(report)
    }

    async fn sweep_key(&self, key: &str) -> Result<bool> {
        let _guard = self.locks.lock(key).await;

        let Some(mut state) = self.store.get(key).await? else {
            return Ok(false);
        };

        if !state.sweep_tick() {
            return Ok(false);
        }

        self.store.add(key, &state).await?;
        Ok(true)
    }

    /// Start the background sweep. A no-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweep(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        *sweeper = Some(SweepTask::spawn(Arc::downgrade(self), self.sweep_interval));
    }

    /// Stop the background sweep. Returns whether a sweep was running.
    pub fn stop_sweep(&self) -> bool {
        match self.sweeper.lock().take() {
            Some(task) => {
                task.stop();
                info!("Sweep stop requested");
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.stop();
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
