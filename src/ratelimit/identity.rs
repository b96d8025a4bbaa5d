//! Identity resolution: which key a request is limited under.

use super::rules::{LimiterConfig, RateConfig};

/// How an identity was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Client network address.
    Ip,
    /// Caller-supplied token.
    Token,
}

/// The key and policy a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity<'a> {
    /// Store key: the IP address or token value.
    pub key: &'a str,
    /// Source of the key.
    pub kind: IdentityKind,
    /// Policy used if the identity has no state yet.
    pub config: &'a RateConfig,
}

impl<'a> Identity<'a> {
    /// Pick the identity for a request.
    ///
    /// A non-empty token wins whenever token limiting is configured; the IP
    /// identity is then not consulted at all.
    pub fn resolve(config: &'a LimiterConfig, ip: &'a str, token: Option<&'a str>) -> Self {
        match (&config.token, token) {
            (Some(token_config), Some(token)) if !token.is_empty() => Self {
                key: token,
                kind: IdentityKind::Token,
                config: &token_config.rate,
            },
            _ => Self {
                key: ip,
                kind: IdentityKind::Ip,
                config: &config.ip,
            },
        }
    }
}

impl std::fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            IdentityKind::Ip => "ip",
            IdentityKind::Token => "token",
        };
        write!(f, "{}={}", kind, self.key)
    }
}
