//! Gatekeep - Request Admission Control
//!
//! This crate counts requests per client identity over fixed windows and
//! temporarily blocks identities that exceed their quota. Identities are either
//! the client IP or, when configured and present, a caller token with its own
//! quota. State lives in a pluggable store: an in-process map or Redis.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
