//! SQLite Ledger Store
//!
//! Durable [`LedgerStore`] implementation. Two tables: `entitlements` keyed
//! by user id, and the append-only `charges` ledger with a secondary lookup
//! index on the provider transaction id, newest first.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{GateError, Result};
use crate::ledger::{
    AccessState, ActiveEntitlement, Entitlement, LedgerStore, NewCharge, TxStatus, UserId,
    parse_expiry,
};

/// Durable ledger store backed by SQLite
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database (for tests)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entitlements (
                user_id    INTEGER PRIMARY KEY,
                state      TEXT NOT NULL DEFAULT 'inactive',
                expires_at TEXT
            );
            CREATE TABLE IF NOT EXISTS charges (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL,
                provider_tx_id TEXT,
                status         TEXT NOT NULL DEFAULT 'pending',
                created_at     TEXT NOT NULL,
                raw_response   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_charges_provider_tx
                ON charges(provider_tx_id, id DESC);",
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GateError::Storage("connection lock poisoned".into()))
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn entitlement(&self, user_id: UserId) -> Result<Entitlement> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT state, expires_at FROM entitlements WHERE user_id = ?1",
                params![user_id.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?;

        let Some((state, expires_at)) = row else {
            return Ok(Entitlement::inactive(user_id));
        };

        let expires_at = expires_at.as_deref().map(parse_expiry).transpose()?;
        Ok(Entitlement {
            user_id,
            state: AccessState::from_str(&state),
            expires_at,
        })
    }

    fn activate(&self, user_id: UserId, expires_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entitlements (user_id, state, expires_at) VALUES (?1, 'active', ?2)
             ON CONFLICT(user_id) DO UPDATE SET state = 'active', expires_at = excluded.expires_at",
            params![user_id.0, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn deactivate(&self, user_id: UserId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entitlements (user_id, state, expires_at) VALUES (?1, 'inactive', NULL)
             ON CONFLICT(user_id) DO UPDATE SET state = 'inactive', expires_at = NULL",
            params![user_id.0],
        )?;
        Ok(())
    }

    fn record_charge(&self, charge: NewCharge) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO charges (user_id, provider_tx_id, status, created_at, raw_response)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                charge.user_id.0,
                charge.provider_tx_id,
                charge.status.as_str(),
                Utc::now().to_rfc3339(),
                charge.raw_response,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn set_charge_status(&self, provider_tx_id: &str, status: &TxStatus) -> Result<usize> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE charges SET status = ?1 WHERE provider_tx_id = ?2",
            params![status.as_str(), provider_tx_id],
        )?;
        Ok(updated)
    }

    fn user_for_charge(&self, provider_tx_id: &str) -> Result<Option<UserId>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT user_id FROM charges WHERE provider_tx_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![provider_tx_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(user.map(UserId))
    }

    fn active_entitlements(&self) -> Result<Vec<ActiveEntitlement>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, expires_at FROM entitlements
             WHERE state = 'active' AND expires_at IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActiveEntitlement {
                    user_id: UserId(row.get(0)?),
                    expires_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
