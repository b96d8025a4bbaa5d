//! Rate limiting logic and state management.

mod client;
mod identity;
mod limiter;
mod locks;
mod rules;
mod sweep;

pub use client::{ClientState, Decision};
pub use identity::{Identity, IdentityKind};
pub use limiter::RateLimiter;
pub use rules::{LimiterConfig, RateConfig, TokenRateConfig, DEFAULT_TOKEN_HEADER};
pub use sweep::{SweepReport, DEFAULT_SWEEP_INTERVAL};
