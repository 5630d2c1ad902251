//! Stored record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use turnstile_api::{Component, SessionStatus, SessionView, Tier, TransactionView};
use turnstile_util::{AccountId, SessionId};

/// A billing account.
///
/// Mutated only through ledger operations; created at signup and
/// deactivated rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub tier: Tier,
    /// Credit balance. Never negative; the store enforces this inside the
    /// charge path, not callers.
    pub balance: u32,
    /// Bumped on every balance mutation
    pub balance_version: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn new(id: AccountId, tier: Tier) -> Self {
        Self {
            id,
            tier,
            balance: 0,
            balance_version: 0,
            active: true,
            created_at: turnstile_util::now(),
        }
    }
}

/// Why a ledger entry was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionReason {
    /// A fresh entitlement grant spent credits on a component
    Unlock { component: Component },

    /// The billing collaborator (or an admin) added credits
    Refill { source: String },
}

impl fmt::Display for TransactionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionReason::Unlock { component } => write!(f, "unlock:{}", component),
            TransactionReason::Refill { source } => write!(f, "refill:{}", source),
        }
    }
}

/// One entry in the append-only credit ledger.
///
/// Immutable once written; every successful charge or refill appends one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Rowid assigned by the store
    pub id: i64,
    pub account_id: AccountId,
    /// Negative for a spend, positive for a refill
    pub amount: i64,
    pub reason: TransactionReason,
    pub balance_after: u32,
    pub timestamp: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn to_view(&self) -> TransactionView {
        TransactionView {
            id: self.id,
            amount: self.amount,
            reason: self.reason.to_string(),
            balance_after: self.balance_after,
            timestamp: self.timestamp,
        }
    }
}

/// A time-boxed, already-paid-for grant of one component to one account.
///
/// At most one row per (account_id, component) may hold status `active`;
/// `put_session`/`grant_session` supersede any prior active row in the
/// same write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub account_id: AccountId,
    pub component: Component,
    pub credits_charged: u32,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tier_at_grant: Tier,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn new(
        account_id: AccountId,
        component: Component,
        credits_charged: u32,
        tier_at_grant: Tier,
        granted_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            account_id,
            component,
            credits_charged,
            granted_at,
            expires_at,
            tier_at_grant,
            status: SessionStatus::Active,
        }
    }

    /// Liveness recomputed from the clock. Stored status alone is never
    /// trusted: a row the sweeper has not visited yet is still dead once
    /// its expiry passes.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.expires_at > now
    }

    pub fn to_view(&self, now: DateTime<Utc>) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            component: self.component,
            granted_at: self.granted_at,
            expires_at: self.expires_at,
            credits_charged: self.credits_charged,
            tier_at_grant: self.tier_at_grant,
            time_remaining: turnstile_util::remaining_until(self.expires_at, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_display() {
        let unlock = TransactionReason::Unlock {
            component: Component::SocialPosts,
        };
        assert_eq!(unlock.to_string(), "unlock:social_posts");

        let refill = TransactionReason::Refill {
            source: "billing".into(),
        };
        assert_eq!(refill.to_string(), "refill:billing");
    }

    #[test]
    fn reason_serialization_round_trip() {
        let reason = TransactionReason::Unlock {
            component: Component::Chart,
        };
        let json = serde_json::to_string(&reason).unwrap();
        let parsed: TransactionReason = serde_json::from_str(&json).unwrap();
        assert_eq!(reason, parsed);
    }

    #[test]
    fn session_liveness_is_clock_based() {
        let now = turnstile_util::now();
        let session = SessionRecord::new(
            AccountId::new("acct-1"),
            Component::Chart,
            10,
            Tier::Pro,
            now,
            now + chrono::Duration::hours(2),
        );

        assert!(session.is_live(now));
        assert!(session.is_live(now + chrono::Duration::hours(2) - chrono::Duration::seconds(1)));
        assert!(!session.is_live(now + chrono::Duration::hours(2) + chrono::Duration::seconds(1)));

        let mut superseded = session.clone();
        superseded.status = SessionStatus::Superseded;
        assert!(!superseded.is_live(now));
    }

    #[test]
    fn view_computes_time_remaining() {
        let now = turnstile_util::now();
        let session = SessionRecord::new(
            AccountId::new("acct-1"),
            Component::Scores,
            8,
            Tier::Free,
            now,
            now + chrono::Duration::minutes(30),
        );

        let view = session.to_view(now + chrono::Duration::minutes(10));
        assert_eq!(view.time_remaining, std::time::Duration::from_secs(20 * 60));
    }
}
