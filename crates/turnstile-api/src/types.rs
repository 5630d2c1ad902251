//! Shared types for the turnstiled API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use turnstile_util::{AccountId, SessionId};

/// Subscription tier.
///
/// Ordered from cheapest to most expensive so minimum-tier gating can use
/// plain comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Elite,
    Institutional,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Pro, Tier::Elite, Tier::Institutional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Elite => "elite",
            Tier::Institutional => "institutional",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "elite" => Ok(Tier::Elite),
            "institutional" => Ok(Tier::Institutional),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// A gated feature with its own credit cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Chart,
    Scores,
    SocialPosts,
    AiAnalysis,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Chart,
        Component::Scores,
        Component::SocialPosts,
        Component::AiAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Chart => "chart",
            Component::Scores => "scores",
            Component::SocialPosts => "social_posts",
            Component::AiAnalysis => "ai_analysis",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chart" => Ok(Component::Chart),
            "scores" => Ok(Component::Scores),
            "social_posts" => Ok(Component::SocialPosts),
            "ai_analysis" => Ok(Component::AiAnalysis),
            other => Err(format!("unknown component: {}", other)),
        }
    }
}

/// Lifecycle status of an entitlement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Granted and (as far as the stored status knows) still live
    Active,
    /// Past its expiry; terminal
    Expired,
    /// Replaced by a fresh grant for the same (account, component) key
    Superseded,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "expired" => Ok(SessionStatus::Expired),
            "superseded" => Ok(SessionStatus::Superseded),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Result of a successful unlock request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockReceipt {
    pub session_id: SessionId,
    pub account_id: AccountId,
    pub component: Component,
    pub expires_at: DateTime<Utc>,
    /// Credits actually charged by this call. Zero on idempotent re-entry
    /// and for unmetered tiers.
    pub credits_used: u32,
    /// True when an existing live session was returned instead of a fresh
    /// grant being charged.
    pub existing_session: bool,
}

/// View of a live session for clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub component: Component,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub credits_charged: u32,
    pub tier_at_grant: Tier,
    pub time_remaining: Duration,
}

/// View of a ledger entry for clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: i64,
    /// Negative for a spend, positive for a refill
    pub amount: i64,
    pub reason: String,
    pub balance_after: u32,
    pub timestamp: DateTime<Utc>,
}

/// One component's catalog entry, with the effective window per tier.
///
/// This is the read-only policy dump collaborators use to render
/// "time remaining" text without re-deriving policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntryView {
    pub component: Component,
    pub cost: u32,
    pub min_tier: Option<Tier>,
    pub windows: Vec<TierWindowView>,
}

/// Effective grant window for one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierWindowView {
    pub tier: Tier,
    pub window_secs: u64,
    pub unmetered: bool,
}

/// Full read-only catalog dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogView {
    pub catalog_version: u32,
    pub entries: Vec<CatalogEntryView>,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub catalog_loaded: bool,
    pub store_ok: bool,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Product frontend - can unlock, query sessions and balances
    Shell,
    /// Billing/ops - can also refill, manage accounts, reload the catalog
    Admin,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_unlock(&self) -> bool {
        matches!(self, ClientRole::Shell | ClientRole::Admin)
    }

    pub fn can_administer(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_matches_price_ladder() {
        assert!(Tier::Free < Tier::Pro);
        assert!(Tier::Pro < Tier::Elite);
        assert!(Tier::Elite < Tier::Institutional);
    }

    #[test]
    fn tier_round_trips_through_str() {
        for tier in Tier::ALL {
            let parsed: Tier = tier.as_str().parse().unwrap();
            assert_eq!(tier, parsed);
        }
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn component_round_trips_through_str() {
        for component in Component::ALL {
            let parsed: Component = component.as_str().parse().unwrap();
            assert_eq!(component, parsed);
        }
        assert!("heatmap".parse::<Component>().is_err());
    }

    #[test]
    fn component_serialization_is_snake_case() {
        let json = serde_json::to_string(&Component::SocialPosts).unwrap();
        assert_eq!(json, "\"social_posts\"");
    }

    #[test]
    fn receipt_serialization() {
        let receipt = UnlockReceipt {
            session_id: SessionId::new(),
            account_id: AccountId::new("acct-1"),
            component: Component::Chart,
            expires_at: turnstile_util::now(),
            credits_used: 10,
            existing_session: false,
        };

        let json = serde_json::to_string(&receipt).unwrap();
        let parsed: UnlockReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, receipt.session_id);
        assert_eq!(parsed.credits_used, 10);
        assert!(!parsed.existing_session);
    }
}
