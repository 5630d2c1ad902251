//! Persistence layer for turnstiled
//!
//! Provides:
//! - Accounts (tier, credit balance with optimistic version counter)
//! - Credit ledger (append-only, the audit trail)
//! - Entitlement sessions (never deleted; superseded or expired)
//! - The atomic charge+grant commit point

mod records;
mod sqlite;
mod traits;

pub use records::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u32, available: u32 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
