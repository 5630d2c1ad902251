//! Entitlement issuer for turnstiled
//!
//! This crate is the heart of turnstiled, containing:
//! - The unlock decision path (idempotent re-entry, tier gate, atomic
//!   charge+grant)
//! - Per-account serialization (different accounts never contend)
//! - The background expiry sweeper

mod events;
mod issuer;
mod locks;
mod sweeper;

pub use events::*;
pub use issuer::*;
pub use locks::*;
pub use sweeper::*;
