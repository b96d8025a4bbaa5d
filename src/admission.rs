//! Transport-agnostic admission adapter.
//!
//! Turns the raw pieces an HTTP layer has at hand (the peer address and the
//! request headers) into a limiter call, and the limiter's answer into a status
//! code with a JSON body. Wiring this into a particular server is left to the
//! caller.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::ratelimit::{Decision, RateLimiter};

pub const STATUS_OK: u16 = 200;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Errors raised while extracting an identity from a request.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid remote address {0:?}")]
    InvalidRemoteAddr(String),
}

/// JSON body sent with rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

/// What the transport layer should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionResponse {
    pub status: u16,
    /// JSON body; `None` when the request is passed to the next handler.
    pub body: Option<String>,
}

impl AdmissionResponse {
    fn pass() -> Self {
        Self {
            status: STATUS_OK,
            body: None,
        }
    }

    fn reject(status: u16, message: &str) -> Self {
        let body = MessageBody {
            message: message.to_string(),
        };
        // Serializing a single string field cannot fail.
        let body = serde_json::to_string(&body).unwrap_or_default();
        Self {
            status,
            body: Some(body),
        }
    }

    /// Whether the request may reach the wrapped handler.
    pub fn is_allowed(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Extract the client IP from a `host:port` peer address.
pub fn client_ip(remote_addr: &str) -> Result<IpAddr, AdmissionError> {
    remote_addr
        .parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .map_err(|_| AdmissionError::InvalidRemoteAddr(remote_addr.to_string()))
}

/// Find `header` (case-insensitively) among `headers`.
pub fn token_from_headers<'a, I>(header: &str, headers: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(header))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Admission front for a shared [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct Admission {
    limiter: Arc<RateLimiter>,
}

impl Admission {
    /// Wrap `limiter`. Pass a limiter from [`RateLimiter::start`] so its
    /// counters reset every sweep interval.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Evaluate one request.
    pub async fn evaluate<'a, I>(&self, remote_addr: &str, headers: I) -> AdmissionResponse
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let ip = match client_ip(remote_addr) {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                error!(error = %e, "Failed to extract client IP");
                return AdmissionResponse::reject(STATUS_INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE);
            }
        };

        let token = self
            .limiter
            .config()
            .token_header()
            .and_then(|header| token_from_headers(header, headers));

        match self.limiter.decide(&ip, token).await {
            Ok(Decision::Allow) => AdmissionResponse::pass(),
            Ok(Decision::Deny { reason }) => {
                warn!(ip = %ip, has_token = token.is_some(), "Request throttled");
                AdmissionResponse::reject(STATUS_TOO_MANY_REQUESTS, reason)
            }
            Err(e) => {
                error!(error = %e, "Rate limiter failed");
                AdmissionResponse::reject(STATUS_INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}
