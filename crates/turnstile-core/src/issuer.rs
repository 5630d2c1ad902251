//! The entitlement issuer
//!
//! Decides whether an account may access a paid component, charges the
//! correct number of credits exactly once, and remembers the grant for a
//! tier-dependent window so reloads and re-entry never re-charge.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use turnstile_api::{Component, SessionView, Tier, UnlockReceipt};
use turnstile_catalog::Catalog;
use turnstile_store::{
    AccountRecord, SessionRecord, Store, StoreError, StoreResult, TransactionReason,
};
use turnstile_util::AccountId;

use crate::{AccountLocks, CoreEvent};

/// Why an unlock request was refused
#[derive(Debug, Error)]
pub enum UnlockError {
    /// Balance does not cover the component's cost. Recoverable: the user
    /// tops up or waits for a refill. No state was mutated.
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u32, available: u32 },

    /// The account's tier excludes the component entirely. Distinct from
    /// credits; surfaced as an upgrade prompt.
    #[error("tier {tier} does not include component {component}")]
    TierForbidden { tier: Tier, component: Component },

    /// The account exists but its identity is no longer valid
    #[error("account {0} is deactivated")]
    Unauthenticated(AccountId),

    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    /// The catalog does not price this component
    #[error("component not in catalog: {0}")]
    UnknownComponent(Component),

    /// Transient storage or contention failure; retryable with backoff.
    /// Nothing was partially applied.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<StoreError> for UnlockError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientCredits {
                required,
                available,
            } => UnlockError::InsufficientCredits {
                required,
                available,
            },
            other => UnlockError::BackendUnavailable(other.to_string()),
        }
    }
}

/// The entitlement issuer.
///
/// Shared (`&self`) by design: the daemon wraps it in an `Arc` and serves
/// concurrent requests; serialization happens per account, never globally.
pub struct Issuer {
    catalog: RwLock<Arc<Catalog>>,
    store: Arc<dyn Store>,
    locks: AccountLocks,
}

impl Issuer {
    /// Create a new issuer
    pub fn new(catalog: Catalog, store: Arc<dyn Store>) -> Self {
        info!(
            component_count = catalog.component_count(),
            "Issuer initialized"
        );

        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            store,
            locks: AccountLocks::new(),
        }
    }

    /// Current catalog snapshot
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().unwrap().clone()
    }

    /// Swap in a freshly loaded catalog. The only way policy changes at
    /// runtime; request handling never mutates it.
    pub fn reload_catalog(&self, catalog: Catalog) -> CoreEvent {
        let component_count = catalog.component_count();
        *self.catalog.write().unwrap() = Arc::new(catalog);

        info!(component_count, "Catalog reloaded");

        CoreEvent::CatalogReloaded { component_count }
    }

    /// Request access to a component.
    ///
    /// Returns an existing live grant unchanged (`existing_session`,
    /// no charge), or charges the catalog cost and writes a fresh session
    /// atomically. N racing calls on one (account, component) key with
    /// balance for exactly one charge produce one ledger entry and hand
    /// every caller the same session.
    pub async fn request_unlock(
        &self,
        account_id: &AccountId,
        component: Component,
        declared_cost: u32,
        declared_tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<(UnlockReceipt, Vec<CoreEvent>), UnlockError> {
        let catalog = self.catalog();

        let cost = catalog
            .cost(component)
            .ok_or(UnlockError::UnknownComponent(component))?;
        if declared_cost != cost {
            // Never trust a client-declared cost; the catalog wins.
            warn!(
                account_id = %account_id,
                component = %component,
                declared_cost,
                catalog_cost = cost,
                "Declared cost disagrees with catalog"
            );
        }

        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| UnlockError::UnknownAccount(account_id.clone()))?;
        if !account.active {
            return Err(UnlockError::Unauthenticated(account_id.clone()));
        }

        // The stored tier is authoritative over whatever the client sent.
        let tier = account.tier;
        if declared_tier != tier {
            warn!(
                account_id = %account_id,
                declared_tier = %declared_tier,
                stored_tier = %tier,
                "Declared tier disagrees with account"
            );
        }

        if !catalog.allows(tier, component) {
            debug!(
                account_id = %account_id,
                tier = %tier,
                component = %component,
                "Unlock refused: tier excludes component"
            );
            return Err(UnlockError::TierForbidden { tier, component });
        }

        // Serialize against other mutations of this account, bounded so a
        // wedged holder turns into a retryable failure instead of a hang.
        let _guard = tokio::time::timeout(
            catalog.service().unlock_timeout,
            self.locks.acquire(account_id),
        )
        .await
        .map_err(|_| {
            UnlockError::BackendUnavailable(format!(
                "timed out waiting for account {} serialization",
                account_id
            ))
        })?;

        // Idempotent re-entry: a live grant is returned unchanged.
        if let Some(existing) = self.store.get_active(account_id, component, now)? {
            debug!(
                account_id = %account_id,
                component = %component,
                session_id = %existing.id,
                "Existing live session returned, no charge"
            );
            return Ok((
                UnlockReceipt {
                    session_id: existing.id,
                    account_id: account_id.clone(),
                    component,
                    expires_at: existing.expires_at,
                    credits_used: 0,
                    existing_session: true,
                },
                vec![],
            ));
        }

        let charged = if catalog.unmetered(tier) { 0 } else { cost };
        let window = catalog.window(tier, component);
        let expires_at = now + chrono::Duration::seconds(window.as_secs() as i64);
        let session = SessionRecord::new(
            account_id.clone(),
            component,
            charged,
            tier,
            now,
            expires_at,
        );

        let mut events = vec![CoreEvent::SessionGranted {
            account_id: account_id.clone(),
            session: session.to_view(now),
        }];

        if charged == 0 {
            // Unmetered tiers and zero-cost components skip the ledger
            // entirely; the window still applies.
            self.store.put_session(&session)?;
        } else {
            let receipt = self.store.grant_session(&session)?;
            events.push(CoreEvent::BalanceChanged {
                account_id: account_id.clone(),
                balance: receipt.balance_after,
                reason: receipt.reason.to_string(),
            });
        }

        info!(
            account_id = %account_id,
            component = %component,
            session_id = %session.id,
            credits = charged,
            expires_at = %expires_at,
            "Session granted"
        );

        Ok((
            UnlockReceipt {
                session_id: session.id,
                account_id: account_id.clone(),
                component,
                expires_at,
                credits_used: charged,
                existing_session: false,
            },
            events,
        ))
    }

    /// Every session for the account still live at `now`. Pure read;
    /// liveness is recomputed from the clock, not the stored status.
    pub fn active_sessions(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionView>, UnlockError> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| UnlockError::UnknownAccount(account_id.clone()))?;

        let sessions = self.store.list_active(account_id, now)?;
        Ok(sessions.iter().map(|s| s.to_view(now)).collect())
    }

    /// Create an account, optionally with an opening balance (recorded as
    /// a signup refill so the ledger stays complete).
    pub async fn create_account(
        &self,
        account_id: &AccountId,
        tier: Tier,
        initial_balance: u32,
    ) -> StoreResult<Vec<CoreEvent>> {
        let _guard = self.locks.acquire(account_id).await;

        self.store
            .create_account(&AccountRecord::new(account_id.clone(), tier))?;

        let mut events = Vec::new();
        if initial_balance > 0 {
            let receipt = self.store.refill(
                account_id,
                initial_balance,
                TransactionReason::Refill {
                    source: "signup".into(),
                },
            )?;
            events.push(CoreEvent::BalanceChanged {
                account_id: account_id.clone(),
                balance: receipt.balance_after,
                reason: receipt.reason.to_string(),
            });
        }

        info!(account_id = %account_id, tier = %tier, initial_balance, "Account created");
        Ok(events)
    }

    /// Add credits. Entry point for the external billing collaborator;
    /// independent of the unlock path.
    pub async fn refill(
        &self,
        account_id: &AccountId,
        amount: u32,
        source: &str,
    ) -> StoreResult<(u32, Vec<CoreEvent>)> {
        let _guard = self.locks.acquire(account_id).await;

        let receipt = self.store.refill(
            account_id,
            amount,
            TransactionReason::Refill {
                source: source.into(),
            },
        )?;

        info!(
            account_id = %account_id,
            amount,
            balance = receipt.balance_after,
            source,
            "Credits refilled"
        );

        Ok((
            receipt.balance_after,
            vec![CoreEvent::BalanceChanged {
                account_id: account_id.clone(),
                balance: receipt.balance_after,
                reason: receipt.reason.to_string(),
            }],
        ))
    }

    /// Change an account's tier. Existing sessions keep their
    /// `tier_at_grant`; the event tells UI caches to invalidate.
    pub async fn set_tier(
        &self,
        account_id: &AccountId,
        tier: Tier,
    ) -> StoreResult<Vec<CoreEvent>> {
        let _guard = self.locks.acquire(account_id).await;

        self.store.set_tier(account_id, tier)?;

        info!(account_id = %account_id, tier = %tier, "Tier changed");
        Ok(vec![CoreEvent::TierChanged {
            account_id: account_id.clone(),
            tier,
        }])
    }

    /// Deactivate an account. Future unlocks fail `Unauthenticated`.
    pub async fn deactivate(&self, account_id: &AccountId) -> StoreResult<Vec<CoreEvent>> {
        let _guard = self.locks.acquire(account_id).await;

        self.store.deactivate_account(account_id)?;

        info!(account_id = %account_id, "Account deactivated");
        Ok(vec![CoreEvent::AccountDeactivated {
            account_id: account_id.clone(),
        }])
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &AccountLocks {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_store::SqliteStore;

    fn make_issuer(balance: u32, tier: Tier) -> (Arc<Issuer>, AccountId, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let issuer = Arc::new(Issuer::new(Catalog::default(), store.clone()));
        let account_id = AccountId::new("acct-1");

        store
            .create_account(&AccountRecord::new(account_id.clone(), tier))
            .unwrap();
        if balance > 0 {
            store
                .refill(
                    &account_id,
                    balance,
                    TransactionReason::Refill {
                        source: "test".into(),
                    },
                )
                .unwrap();
        }

        (issuer, account_id, store)
    }

    fn spend_count(store: &SqliteStore, account_id: &AccountId) -> usize {
        store
            .transactions(account_id, 100)
            .unwrap()
            .iter()
            .filter(|t| t.amount < 0)
            .count()
    }

    #[tokio::test]
    async fn fresh_grant_charges_and_sets_window() {
        // The concrete scenario: balance 20, free tier, social_posts at 5
        // credits, 30 minute window.
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        let (receipt, events) = issuer
            .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, now)
            .await
            .unwrap();

        assert!(!receipt.existing_session);
        assert_eq!(receipt.credits_used, 5);
        assert_eq!(receipt.expires_at, now + chrono::Duration::minutes(30));
        assert_eq!(store.balance(&account_id).unwrap(), 15);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn reentry_is_idempotent() {
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        let (first, _) = issuer
            .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, now)
            .await
            .unwrap();

        // Second identical call 10 minutes later: same session, no charge.
        let later = now + chrono::Duration::minutes(10);
        let (second, events) = issuer
            .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, later)
            .await
            .unwrap();

        assert!(second.existing_session);
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.credits_used, 0);
        assert_eq!(second.expires_at, first.expires_at);
        assert_eq!(store.balance(&account_id).unwrap(), 15);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn expired_grant_triggers_fresh_charge() {
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        let (first, _) = issuer
            .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, now)
            .await
            .unwrap();

        // 31 minutes later the free-tier window has passed: fresh charge.
        let later = now + chrono::Duration::minutes(31);
        let (third, _) = issuer
            .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, later)
            .await
            .unwrap();

        assert!(!third.existing_session);
        assert_ne!(third.session_id, first.session_id);
        assert_eq!(store.balance(&account_id).unwrap(), 10);
    }

    #[tokio::test]
    async fn ttl_boundary_for_pro_chart() {
        // Pro tier, chart component: 2 hour window. Live one second
        // before expiry, dead one second after.
        let (issuer, account_id, _store) = make_issuer(100, Tier::Pro);
        let now = turnstile_util::now();

        let (receipt, _) = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Pro, now)
            .await
            .unwrap();
        assert_eq!(receipt.expires_at, now + chrono::Duration::hours(2));

        let just_before = now + chrono::Duration::hours(2) - chrono::Duration::seconds(1);
        let sessions = issuer.active_sessions(&account_id, just_before).unwrap();
        assert_eq!(sessions.len(), 1);

        let just_after = now + chrono::Duration::hours(2) + chrono::Duration::seconds(1);
        let sessions = issuer.active_sessions(&account_id, just_after).unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn insufficient_credits_mutates_nothing() {
        let (issuer, account_id, store) = make_issuer(3, Tier::Free);
        let now = turnstile_util::now();

        let result = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
            .await;

        match result {
            Err(UnlockError::InsufficientCredits {
                required,
                available,
            }) => {
                assert_eq!(required, 10);
                assert_eq!(available, 3);
            }
            other => panic!("expected InsufficientCredits, got {:?}", other.map(|_| ())),
        }

        assert_eq!(store.balance(&account_id).unwrap(), 3);
        assert!(issuer.active_sessions(&account_id, now).unwrap().is_empty());
        assert_eq!(spend_count(&store, &account_id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_once_under_race() {
        // N concurrent unlocks on one key with balance for exactly one
        // charge: one ledger entry, every caller sees the same session.
        let (issuer, account_id, store) = make_issuer(10, Tier::Free);
        let now = turnstile_util::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let issuer = issuer.clone();
            let account_id = account_id.clone();
            handles.push(tokio::spawn(async move {
                issuer
                    .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
                    .await
            }));
        }

        let mut session_ids = Vec::new();
        let mut fresh_grants = 0;
        for handle in handles {
            let (receipt, _) = handle.await.unwrap().unwrap();
            if !receipt.existing_session {
                fresh_grants += 1;
            }
            session_ids.push(receipt.session_id);
        }

        assert_eq!(fresh_grants, 1);
        session_ids.dedup();
        assert_eq!(session_ids.len(), 1);
        assert_eq!(store.balance(&account_id).unwrap(), 0);
        assert_eq!(spend_count(&store, &account_id), 1);
    }

    #[tokio::test]
    async fn tier_gate_refuses_below_minimum() {
        // ai_analysis requires pro in the default catalog
        let (issuer, account_id, store) = make_issuer(100, Tier::Free);
        let now = turnstile_util::now();

        let result = issuer
            .request_unlock(&account_id, Component::AiAnalysis, 20, Tier::Free, now)
            .await;

        assert!(matches!(
            result,
            Err(UnlockError::TierForbidden {
                tier: Tier::Free,
                component: Component::AiAnalysis
            })
        ));
        assert_eq!(store.balance(&account_id).unwrap(), 100);
    }

    #[tokio::test]
    async fn unmetered_tier_grants_without_charge() {
        let (issuer, account_id, store) = make_issuer(50, Tier::Institutional);
        let now = turnstile_util::now();

        let (receipt, _) = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Institutional, now)
            .await
            .unwrap();

        assert!(!receipt.existing_session);
        assert_eq!(receipt.credits_used, 0);
        assert_eq!(receipt.expires_at, now + chrono::Duration::hours(8));
        assert_eq!(store.balance(&account_id).unwrap(), 50);
        // No ledger entry for an unmetered grant
        assert_eq!(spend_count(&store, &account_id), 0);

        // The grant itself is a normal session
        let sessions = issuer.active_sessions(&account_id, now).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].credits_charged, 0);
    }

    #[tokio::test]
    async fn unknown_account_and_component_are_fatal() {
        let (issuer, account_id, _store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        let result = issuer
            .request_unlock(&AccountId::new("ghost"), Component::Chart, 10, Tier::Free, now)
            .await;
        assert!(matches!(result, Err(UnlockError::UnknownAccount(_))));

        // A catalog that prices nothing makes every component unknown
        issuer.reload_catalog(
            turnstile_catalog::parse_catalog(
                "catalog_version = 1\n[components]\n",
            )
            .unwrap(),
        );
        let result = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
            .await;
        assert!(matches!(result, Err(UnlockError::UnknownComponent(Component::Chart))));
    }

    #[tokio::test]
    async fn deactivated_account_is_unauthenticated() {
        let (issuer, account_id, _store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        issuer.deactivate(&account_id).await.unwrap();

        let result = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
            .await;
        assert!(matches!(result, Err(UnlockError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn declared_cost_mismatch_charges_catalog_price() {
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        // Client claims chart costs 1; catalog says 10. Catalog wins.
        let (receipt, _) = issuer
            .request_unlock(&account_id, Component::Chart, 1, Tier::Free, now)
            .await
            .unwrap();

        assert_eq!(receipt.credits_used, 10);
        assert_eq!(store.balance(&account_id).unwrap(), 10);
    }

    #[tokio::test]
    async fn declared_tier_mismatch_uses_stored_tier() {
        // Account is free (30 min window); client claims institutional.
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        let (receipt, _) = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Institutional, now)
            .await
            .unwrap();

        assert_eq!(receipt.expires_at, now + chrono::Duration::minutes(30));
        // And it was charged: the stored tier is not unmetered
        assert_eq!(store.balance(&account_id).unwrap(), 10);
    }

    #[tokio::test]
    async fn different_components_hold_independent_sessions() {
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
            .await
            .unwrap();
        issuer
            .request_unlock(&account_id, Component::SocialPosts, 5, Tier::Free, now)
            .await
            .unwrap();

        let sessions = issuer.active_sessions(&account_id, now).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(store.balance(&account_id).unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_account_lock_fails_retryable() {
        let (issuer, account_id, store) = make_issuer(20, Tier::Free);
        let now = turnstile_util::now();

        let _held = issuer.locks().acquire(&account_id).await;

        let result = issuer
            .request_unlock(&account_id, Component::Chart, 10, Tier::Free, now)
            .await;

        assert!(matches!(result, Err(UnlockError::BackendUnavailable(_))));
        // Nothing was applied
        assert_eq!(store.balance(&account_id).unwrap(), 20);
    }

    #[tokio::test]
    async fn catalog_reload_swaps_policy() {
        let (issuer, account_id, _store) = make_issuer(100, Tier::Free);
        let now = turnstile_util::now();

        let event = issuer.reload_catalog(
            turnstile_catalog::parse_catalog(
                r#"
                catalog_version = 1

                [components.chart]
                cost = 2
                window_override_minutes = 5
                "#,
            )
            .unwrap(),
        );
        assert!(matches!(event, CoreEvent::CatalogReloaded { component_count: 1 }));

        let (receipt, _) = issuer
            .request_unlock(&account_id, Component::Chart, 2, Tier::Free, now)
            .await
            .unwrap();
        assert_eq!(receipt.credits_used, 2);
        assert_eq!(receipt.expires_at, now + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn refill_and_set_tier_emit_cache_invalidation_events() {
        let (issuer, account_id, store) = make_issuer(0, Tier::Free);

        let (balance, events) = issuer.refill(&account_id, 40, "billing").await.unwrap();
        assert_eq!(balance, 40);
        assert!(matches!(
            events.as_slice(),
            [CoreEvent::BalanceChanged { balance: 40, .. }]
        ));

        let events = issuer.set_tier(&account_id, Tier::Pro).await.unwrap();
        assert!(matches!(
            events.as_slice(),
            [CoreEvent::TierChanged { tier: Tier::Pro, .. }]
        ));
        assert_eq!(store.get_account(&account_id).unwrap().unwrap().tier, Tier::Pro);
    }

    #[tokio::test]
    async fn create_account_records_opening_balance() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let issuer = Issuer::new(Catalog::default(), store.clone());
        let account_id = AccountId::new("acct-new");

        let events = issuer
            .create_account(&account_id, Tier::Pro, 100)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(store.balance(&account_id).unwrap(), 100);

        let transactions = store.transactions(&account_id, 10).unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].amount, 100);
    }
}
