//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use turnstile_api::{Component, Tier};
use turnstile_util::{AccountId, SessionId};

use crate::{
    AccountRecord, CreditTransaction, SessionRecord, Store, StoreError, StoreResult,
    TransactionReason,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Accounts (deactivated, never deleted)
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
                balance_version INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            -- Credit ledger (append-only audit trail)
            CREATE TABLE IF NOT EXISTS ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                amount INTEGER NOT NULL,
                reason_json TEXT NOT NULL,
                balance_after INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );

            -- Entitlement sessions (retained for history, never deleted).
            -- Timestamps are unix milliseconds so expiry comparisons happen
            -- in SQL.
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                component TEXT NOT NULL,
                credits_charged INTEGER NOT NULL,
                granted_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                tier_at_grant TEXT NOT NULL,
                status TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_ledger_account ON ledger(account_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_key ON sessions(account_id, component, status);
            CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(status, expires_at);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Apply a balance delta and append the ledger row. Negative deltas that
/// would take the balance below zero fail before any write.
fn apply_ledger(
    conn: &Connection,
    account_id: &AccountId,
    delta: i64,
    reason: &TransactionReason,
) -> StoreResult<CreditTransaction> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT balance, balance_version FROM accounts WHERE id = ?",
            [account_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (balance, version) =
        row.ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;

    let new_balance = balance + delta;
    if new_balance < 0 {
        return Err(StoreError::InsufficientCredits {
            required: (-delta) as u32,
            available: balance as u32,
        });
    }

    conn.execute(
        "UPDATE accounts SET balance = ?, balance_version = ? WHERE id = ?",
        params![new_balance, version + 1, account_id.as_str()],
    )?;

    let timestamp = turnstile_util::now();
    let reason_json = serde_json::to_string(reason)?;
    conn.execute(
        r#"
        INSERT INTO ledger (account_id, amount, reason_json, balance_after, timestamp)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![
            account_id.as_str(),
            delta,
            reason_json,
            new_balance,
            timestamp.to_rfc3339()
        ],
    )?;

    Ok(CreditTransaction {
        id: conn.last_insert_rowid(),
        account_id: account_id.clone(),
        amount: delta,
        reason: reason.clone(),
        balance_after: new_balance as u32,
        timestamp,
    })
}

/// Mark any active row for the key superseded. Must run in the same
/// transaction as the insert that replaces it.
fn supersede_active(
    conn: &Connection,
    account_id: &AccountId,
    component: Component,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE sessions SET status = 'superseded' WHERE account_id = ? AND component = ? AND status = 'active'",
        params![account_id.as_str(), component.as_str()],
    )?;
    Ok(())
}

fn insert_session(conn: &Connection, session: &SessionRecord) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO sessions (id, account_id, component, credits_charged, granted_at, expires_at, tier_at_grant, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            session.id.to_string(),
            session.account_id.as_str(),
            session.component.as_str(),
            session.credits_charged,
            session.granted_at.timestamp_millis(),
            session.expires_at.timestamp_millis(),
            session.tier_at_grant.as_str(),
            session.status.as_str(),
        ],
    )?;
    Ok(())
}

type SessionRow = (String, String, String, i64, i64, i64, String, String);

const SESSION_COLUMNS: &str =
    "id, account_id, component, credits_charged, granted_at, expires_at, tier_at_grant, status";

fn read_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn session_from_row(row: SessionRow) -> StoreResult<SessionRecord> {
    let (id, account_id, component, credits_charged, granted_at, expires_at, tier, status) = row;

    Ok(SessionRecord {
        id: id
            .parse()
            .map_err(|e| StoreError::Serialization(format!("session id: {}", e)))?,
        account_id: AccountId::new(account_id),
        component: component.parse().map_err(StoreError::Serialization)?,
        credits_charged: credits_charged as u32,
        granted_at: millis_to_datetime(granted_at)?,
        expires_at: millis_to_datetime(expires_at)?,
        tier_at_grant: tier.parse().map_err(StoreError::Serialization)?,
        status: status.parse().map_err(StoreError::Serialization)?,
    })
}

fn millis_to_datetime(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {}", millis)))
}

impl Store for SqliteStore {
    fn create_account(&self, account: &AccountRecord) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM accounts WHERE id = ?",
                [account.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists(format!("account {}", account.id)));
        }

        conn.execute(
            r#"
            INSERT INTO accounts (id, tier, balance, balance_version, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                account.id.as_str(),
                account.tier.as_str(),
                account.balance,
                account.balance_version as i64,
                account.active,
                account.created_at.to_rfc3339(),
            ],
        )?;

        debug!(account_id = %account.id, tier = %account.tier, "Account created");
        Ok(())
    }

    fn get_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, i64, i64, bool, String)> = conn
            .query_row(
                "SELECT tier, balance, balance_version, active, created_at FROM accounts WHERE id = ?",
                [id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((tier, balance, balance_version, active, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(AccountRecord {
            id: id.clone(),
            tier: tier.parse().map_err(StoreError::Serialization)?,
            balance: balance as u32,
            balance_version: balance_version as u64,
            active,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        }))
    }

    fn set_tier(&self, id: &AccountId, tier: Tier) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE accounts SET tier = ? WHERE id = ?",
            params![tier.as_str(), id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("account {}", id)));
        }

        debug!(account_id = %id, tier = %tier, "Tier updated");
        Ok(())
    }

    fn deactivate_account(&self, id: &AccountId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute("UPDATE accounts SET active = 0 WHERE id = ?", [id.as_str()])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("account {}", id)));
        }

        debug!(account_id = %id, "Account deactivated");
        Ok(())
    }

    fn balance(&self, id: &AccountId) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();

        let balance: Option<i64> = conn
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        balance
            .map(|b| b as u32)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }

    fn charge(
        &self,
        id: &AccountId,
        amount: u32,
        reason: TransactionReason,
    ) -> StoreResult<CreditTransaction> {
        let mut conn = self.conn.lock().unwrap();

        let tx = conn.transaction()?;
        let receipt = apply_ledger(&tx, id, -(amount as i64), &reason)?;
        tx.commit()?;

        debug!(
            account_id = %id,
            amount,
            balance_after = receipt.balance_after,
            reason = %receipt.reason,
            "Credits charged"
        );
        Ok(receipt)
    }

    fn refill(
        &self,
        id: &AccountId,
        amount: u32,
        reason: TransactionReason,
    ) -> StoreResult<CreditTransaction> {
        let mut conn = self.conn.lock().unwrap();

        let tx = conn.transaction()?;
        let receipt = apply_ledger(&tx, id, amount as i64, &reason)?;
        tx.commit()?;

        debug!(
            account_id = %id,
            amount,
            balance_after = receipt.balance_after,
            "Credits refilled"
        );
        Ok(receipt)
    }

    fn transactions(&self, id: &AccountId, limit: usize) -> StoreResult<Vec<CreditTransaction>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, amount, reason_json, balance_after, timestamp
            FROM ledger WHERE account_id = ? ORDER BY id DESC LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![id.as_str(), limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut transactions = Vec::new();
        for row in rows {
            let (row_id, amount, reason_json, balance_after, timestamp) = row?;
            let reason: TransactionReason = serde_json::from_str(&reason_json)?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| turnstile_util::now());

            transactions.push(CreditTransaction {
                id: row_id,
                account_id: id.clone(),
                amount,
                reason,
                balance_after: balance_after as u32,
                timestamp,
            });
        }

        Ok(transactions)
    }

    fn get_active(
        &self,
        id: &AccountId,
        component: Component,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE account_id = ? AND component = ? AND status = 'active' ORDER BY granted_at DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                params![id.as_str(), component.as_str()],
                read_session_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let session = session_from_row(row)?;
                // Expiry re-checked live; a stale 'active' status is dead
                // the instant its expiry passes.
                Ok(session.is_live(now).then_some(session))
            }
            None => Ok(None),
        }
    }

    fn put_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();

        let tx = conn.transaction()?;
        supersede_active(&tx, &session.account_id, session.component)?;
        insert_session(&tx, session)?;
        tx.commit()?;

        debug!(
            session_id = %session.id,
            account_id = %session.account_id,
            component = %session.component,
            "Session stored"
        );
        Ok(())
    }

    fn list_active(&self, id: &AccountId, now: DateTime<Utc>) -> StoreResult<Vec<SessionRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE account_id = ? AND status = 'active' AND expires_at > ? ORDER BY component",
            SESSION_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![id.as_str(), now.timestamp_millis()],
            read_session_row,
        )?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(session_from_row(row?)?);
        }

        Ok(sessions)
    }

    fn mark_expired(&self, session_id: &SessionId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE sessions SET status = 'expired' WHERE id = ?",
            [session_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {}", session_id)));
        }

        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE sessions SET status = 'expired' WHERE status = 'active' AND expires_at <= ?",
            [now.timestamp_millis()],
        )?;

        Ok(changed)
    }

    fn grant_session(&self, session: &SessionRecord) -> StoreResult<CreditTransaction> {
        let mut conn = self.conn.lock().unwrap();

        let tx = conn.transaction()?;
        let reason = TransactionReason::Unlock {
            component: session.component,
        };
        let receipt = apply_ledger(&tx, &session.account_id, -(session.credits_charged as i64), &reason)?;
        supersede_active(&tx, &session.account_id, session.component)?;
        insert_session(&tx, session)?;
        tx.commit()?;

        debug!(
            session_id = %session.id,
            account_id = %session.account_id,
            component = %session.component,
            credits = session.credits_charged,
            balance_after = receipt.balance_after,
            "Session granted"
        );
        Ok(receipt)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
