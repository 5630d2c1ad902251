//! Core events emitted by the issuer and sweeper

use turnstile_api::{SessionView, Tier};
use turnstile_util::AccountId;

/// Events emitted by the core for the daemon to broadcast
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A fresh session was granted
    SessionGranted {
        account_id: AccountId,
        session: SessionView,
    },

    /// A balance changed (charge or refill)
    BalanceChanged {
        account_id: AccountId,
        balance: u32,
        reason: String,
    },

    /// An account's tier changed
    TierChanged { account_id: AccountId, tier: Tier },

    /// An account was deactivated
    AccountDeactivated { account_id: AccountId },

    /// The sweeper transitioned stale sessions to expired
    SessionsExpired { count: usize },

    /// The catalog was swapped
    CatalogReloaded { component_count: usize },
}
