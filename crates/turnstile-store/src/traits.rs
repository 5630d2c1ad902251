//! Store trait definitions

use chrono::{DateTime, Utc};
use turnstile_api::{Component, Tier};
use turnstile_util::{AccountId, SessionId};

use crate::{AccountRecord, CreditTransaction, SessionRecord, StoreResult, TransactionReason};

/// Main store trait
pub trait Store: Send + Sync {
    // Accounts

    /// Create an account. Fails with `AlreadyExists` on a duplicate id.
    fn create_account(&self, account: &AccountRecord) -> StoreResult<()>;

    /// Load an account by id
    fn get_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>>;

    /// Change an account's tier. Active sessions keep their `tier_at_grant`.
    fn set_tier(&self, id: &AccountId, tier: Tier) -> StoreResult<()>;

    /// Deactivate an account. Accounts are never deleted.
    fn deactivate_account(&self, id: &AccountId) -> StoreResult<()>;

    // Ledger

    /// Current credit balance
    fn balance(&self, id: &AccountId) -> StoreResult<u32>;

    /// Spend credits. Fails with `InsufficientCredits` (and no state
    /// change) if the balance would go negative; otherwise debits the
    /// balance and appends a ledger entry atomically.
    fn charge(
        &self,
        id: &AccountId,
        amount: u32,
        reason: TransactionReason,
    ) -> StoreResult<CreditTransaction>;

    /// Add credits and append a ledger entry atomically
    fn refill(
        &self,
        id: &AccountId,
        amount: u32,
        reason: TransactionReason,
    ) -> StoreResult<CreditTransaction>;

    /// Most recent ledger entries, newest first
    fn transactions(&self, id: &AccountId, limit: usize) -> StoreResult<Vec<CreditTransaction>>;

    // Sessions

    /// Latest active session for (account, component) if it is still live
    /// at `now`. Expiry is re-checked against the clock here, so
    /// correctness never depends on the sweeper having run.
    fn get_active(
        &self,
        id: &AccountId,
        component: Component,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SessionRecord>>;

    /// Insert a session, superseding any prior active row for the same
    /// (account, component) key in the same write.
    fn put_session(&self, session: &SessionRecord) -> StoreResult<()>;

    /// All sessions for the account that are live at `now`
    fn list_active(&self, id: &AccountId, now: DateTime<Utc>) -> StoreResult<Vec<SessionRecord>>;

    /// Transition one session to expired
    fn mark_expired(&self, session_id: &SessionId) -> StoreResult<()>;

    /// Transition every active session whose expiry has passed to
    /// expired. Returns how many rows changed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    // Combined commit point

    /// Charge `session.credits_charged` and insert the session as one
    /// transaction: the debit, the ledger entry, the supersede of any
    /// stale row and the insert all land or none do. A charge can never
    /// exist without its session.
    fn grant_session(&self, session: &SessionRecord) -> StoreResult<CreditTransaction>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
