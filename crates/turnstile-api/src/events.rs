//! Event types for turnstiled -> client streaming
//!
//! UI-side mirror caches key their invalidation on these: `TierChanged`,
//! `BalanceChanged` and `AccountDeactivated` mean any locally cached
//! entitlement state for that account is suspect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turnstile_util::AccountId;

use crate::{API_VERSION, Component, ErrorCode, SessionView, Tier};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: turnstile_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A fresh session was granted (or an unmetered grant was issued)
    SessionGranted {
        account_id: AccountId,
        session: SessionView,
    },

    /// An unlock request was denied
    UnlockDenied {
        account_id: AccountId,
        component: Component,
        code: ErrorCode,
    },

    /// The sweeper transitioned stale sessions to expired
    SessionsExpired { count: usize },

    /// An account's balance changed (charge or refill)
    BalanceChanged {
        account_id: AccountId,
        balance: u32,
        reason: String,
    },

    /// An account's tier changed
    TierChanged { account_id: AccountId, tier: Tier },

    /// An account was deactivated
    AccountDeactivated { account_id: AccountId },

    /// The catalog was reloaded
    CatalogReloaded { component_count: usize },

    /// Service is shutting down
    Shutdown,
}
