//! Per-identity counting and blocking state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatekeepError, RATE_LIMITED_MESSAGE};

use super::rules::RateConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allow,
    /// The request is throttled.
    Deny {
        /// User-facing explanation.
        reason: &'static str,
    },
}

impl Decision {
    pub(crate) fn rate_limited() -> Self {
        Decision::Deny {
            reason: RATE_LIMITED_MESSAGE,
        }
    }

    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert a deny into [`GatekeepError::RateLimited`].
    pub fn into_result(self) -> crate::error::Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { .. } => Err(GatekeepError::RateLimited),
        }
    }
}

/// Counter and block status for one identity.
///
/// This is also the record persisted by external stores, so every field
/// must survive a serialization round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    requests_per_window: u64,
    #[serde(rename = "blockUserFor")]
    block_duration: Duration,
    /// Requests counted in the current window.
    pub total_requests: u64,
    blocked: bool,
    blocked_at: Option<DateTime<Utc>>,
    /// Last time a request was registered.
    pub last_seen: DateTime<Utc>,
}

impl ClientState {
    /// Fresh, unblocked state for an identity governed by `config`.
    pub fn new(config: &RateConfig, now: DateTime<Utc>) -> Self {
        Self {
            requests_per_window: config.requests_per_window(),
            block_duration: config.block_duration(),
            total_requests: 0,
            blocked: false,
            blocked_at: None,
            last_seen: now,
        }
    }

    /// Requests allowed per window for this identity.
    pub fn requests_per_window(&self) -> u64 {
        self.requests_per_window
    }

    /// Cooldown applied once the identity is blocked.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    /// When the current block began.
    pub fn blocked_at(&self) -> Option<DateTime<Utc>> {
        self.blocked_at
    }

    pub fn register_request(&mut self, now: DateTime<Utc>) {
        self.total_requests = self.total_requests.saturating_add(1);
        self.last_seen = now;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// True once strictly more than the block duration has passed since blocking.
    ///
    /// A clock that moved backwards never expires a block.
    pub fn has_block_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.blocked, self.blocked_at) {
            (true, Some(blocked_at)) => (now - blocked_at)
                .to_std()
                .map(|elapsed| elapsed > self.block_duration)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Clear the block and restart the window from zero.
    pub fn reset_block(&mut self) {
        self.blocked = false;
        self.blocked_at = None;
        self.total_requests = 0;
    }

    pub fn should_block(&self) -> bool {
        self.total_requests > self.requests_per_window
    }

    pub fn block(&mut self, now: DateTime<Utc>) {
        self.blocked = true;
        self.blocked_at = Some(now);
    }

    /// Window boundary: forget the count unless the identity went over.
    ///
    /// Returns `true` if the state changed.
    pub fn sweep_tick(&mut self) -> bool {
        if self.total_requests <= self.requests_per_window && self.total_requests != 0 {
            self.total_requests = 0;
            return true;
        }
        false
    }

    /// Run the admission algorithm for one request.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Decision {
        if self.is_blocked() {
            if !self.has_block_expired(now) {
                return Decision::rate_limited();
            }
            self.reset_block();
        }

        self.register_request(now);

        if self.should_block() {
            self.block(now);
            return Decision::rate_limited();
        }

        Decision::Allow
    }
}
