//! Shared utilities for turnstiled
//!
//! This crate provides:
//! - ID types (AccountId, SessionId, ClientId)
//! - Time utilities (UTC clock with mock override, duration helpers)
//! - Rate limiting helpers
//! - Default paths for the socket and data directory

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
