//! Command types for the turnstiled protocol

use serde::{Deserialize, Serialize};
use turnstile_util::{AccountId, ClientId};

use crate::{
    API_VERSION, CatalogView, Component, HealthStatus, SessionView, Tier, TransactionView,
    UnlockReceipt,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
///
/// `required_credits`/`available_credits` are populated for
/// `InsufficientCredits` so clients can render actionable messaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_credits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_credits: Option<u32>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            required_credits: None,
            available_credits: None,
        }
    }

    pub fn insufficient_credits(required: u32, available: u32) -> Self {
        Self {
            code: ErrorCode::InsufficientCredits,
            message: format!(
                "insufficient credits: required {}, available {}",
                required, available
            ),
            required_credits: Some(required),
            available_credits: Some(available),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    UnknownAccount,
    UnknownComponent,
    InsufficientCredits,
    TierForbidden,
    Unauthenticated,
    BackendUnavailable,
    PermissionDenied,
    RateLimited,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Request access to a component, charging credits if no live grant exists
    Unlock {
        account_id: AccountId,
        component: Component,
        /// Cost the client believes it is paying. The server catalog wins
        /// on mismatch.
        declared_cost: u32,
        /// Tier the client believes the account holds. The stored account
        /// tier wins on mismatch.
        tier: Tier,
    },

    /// List all currently live sessions for an account
    Sessions { account_id: AccountId },

    /// Get an account's credit balance
    Balance { account_id: AccountId },

    /// Get recent ledger entries for an account
    History {
        account_id: AccountId,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },

    /// Read-only catalog dump (costs and windows per tier)
    Catalog,

    /// Get health status
    GetHealth,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Ping for keepalive
    Ping,

    // Admin commands

    /// Create an account (admin only)
    CreateAccount {
        account_id: AccountId,
        tier: Tier,
        #[serde(default)]
        initial_balance: u32,
    },

    /// Add credits to an account (admin only; billing collaborator entry point)
    Refill {
        account_id: AccountId,
        amount: u32,
        reason: String,
    },

    /// Change an account's tier (admin only)
    SetTier { account_id: AccountId, tier: Tier },

    /// Deactivate an account (admin only)
    Deactivate { account_id: AccountId },

    /// Re-read and swap the catalog (admin only)
    ReloadCatalog,
}

fn default_history_limit() -> usize {
    50
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Unlocked(UnlockReceipt),
    Sessions {
        sessions: Vec<SessionView>,
    },
    Balance {
        account_id: AccountId,
        credits: u32,
        tier: Tier,
    },
    History {
        transactions: Vec<TransactionView>,
    },
    Catalog(CatalogView),
    Health(HealthStatus),
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Pong,
    AccountCreated {
        account_id: AccountId,
    },
    Refilled {
        account_id: AccountId,
        balance: u32,
    },
    TierSet {
        account_id: AccountId,
        tier: Tier,
    },
    Deactivated {
        account_id: AccountId,
    },
    CatalogReloaded {
        component_count: usize,
    },
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: crate::ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: crate::ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
