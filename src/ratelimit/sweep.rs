//! Background window sweep.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;

/// Default cadence of the sweep, shared by every policy.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Identities visited.
    pub scanned: usize,
    /// Identities whose counter was reset.
    pub reset: usize,
    /// Identities that could not be swept because the store failed.
    pub failed: usize,
}

/// Handle to a running sweep loop.
#[derive(Debug)]
pub(crate) struct SweepTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweepTask {
    /// Spawn the loop on the current tokio runtime.
    ///
    /// The loop only holds a weak reference and ends once the limiter is gone.
    pub(crate) fn spawn(limiter: Weak<RateLimiter>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Sweep started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; a sweep at t=0 would cut
            // the first window short.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else {
                            break;
                        };

                        match limiter.sweep_once().await {
                            Ok(report) => debug!(
                                scanned = report.scanned,
                                reset = report.reset,
                                failed = report.failed,
                                "Sweep tick complete"
                            ),
                            Err(e) => warn!(error = %e, "Sweep tick failed"),
                        }
                    }
                }
            }

            info!("Sweep stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the loop to exit after any in-flight pass.
    pub(crate) fn stop(self) {
        // The loop may already have exited, dropping the receiver.
        let _ = self.shutdown.send(());
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
