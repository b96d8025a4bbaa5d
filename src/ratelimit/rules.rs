//! Rate limit policies for IP and token identities.
//!
//! A deployment carries one policy for callers identified by network address and,
//! optionally, a second policy for callers presenting a token in a request header.

use std::time::Duration;

use crate::error::{GatekeepError, Result};

/// Header consulted for the caller token when none is configured.
pub const DEFAULT_TOKEN_HEADER: &str = "API_KEY";

/// Fixed-window policy applied to a single identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConfig {
    requests_per_window: u64,
    window: Duration,
    block_duration: Duration,
}

impl RateConfig {
    /// Create a validated policy.
    ///
    /// `requests_per_window` must be at least 1 and `window` must be non-zero.
    pub fn new(requests_per_window: u64, window: Duration, block_duration: Duration) -> Result<Self> {
        if requests_per_window == 0 {
            return Err(GatekeepError::Config(
                "requests_per_window must be at least 1".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(GatekeepError::Config("window must be non-zero".to_string()));
        }

        Ok(Self {
            requests_per_window,
            window,
            block_duration,
        })
    }

    /// Requests allowed in one window before the identity is blocked.
    pub fn requests_per_window(&self) -> u64 {
        self.requests_per_window
    }

    /// Length of the counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// How long a blocked identity stays blocked.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }
}

/// Policy for token-identified callers, plus where to find the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRateConfig {
    /// Header carrying the token.
    pub header: String,
    /// Limits applied per token value.
    pub rate: RateConfig,
}

impl TokenRateConfig {
    /// Create a token policy reading `header`.
    pub fn new(header: impl Into<String>, rate: RateConfig) -> Self {
        Self {
            header: header.into(),
            rate,
        }
    }
}

/// The pair of policies a limiter enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Policy keyed by client IP. Always present.
    pub ip: RateConfig,
    /// Policy keyed by token. When present and the request carries a token,
    /// it replaces the IP policy for that request.
    pub token: Option<TokenRateConfig>,
}

impl LimiterConfig {
    /// IP-only limiting.
    pub fn by_ip(ip: RateConfig) -> Self {
        Self { ip, token: None }
    }

    /// IP limiting with a token override.
    pub fn with_token(ip: RateConfig, token: TokenRateConfig) -> Self {
        Self {
            ip,
            token: Some(token),
        }
    }

    /// Header name for the token, if token limiting is enabled.
    pub fn token_header(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.header.as_str())
    }
}
