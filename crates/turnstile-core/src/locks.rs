//! Per-account serialization
//!
//! Unlock requests for the same account must run their
//! check-existing / check-balance / charge+write sequence one at a time;
//! requests for different accounts must never block each other. A single
//! global engine lock would serialize unrelated accounts, so the registry
//! hands out one async mutex per account instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use turnstile_util::AccountId;

/// Registry of per-account locks, populated lazily on first use.
///
/// Entries are never removed; the map grows with the set of accounts that
/// have been touched this process lifetime, which is bounded and small
/// next to the store itself.
#[derive(Debug, Default)]
pub struct AccountLocks {
    inner: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one account, waiting if another holder has it.
    /// Holders of different accounts proceed independently.
    pub async fn acquire(&self, id: &AccountId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap();
            map.entry(id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Non-blocking acquire; None if the account's lock is held.
    pub fn try_acquire(&self, id: &AccountId) -> Option<OwnedMutexGuard<()>> {
        let slot = {
            let mut map = self.inner.lock().unwrap();
            map.entry(id.clone()).or_default().clone()
        };
        slot.try_lock_owned().ok()
    }
}
