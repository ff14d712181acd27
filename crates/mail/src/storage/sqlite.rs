//! SQLite-backed outbox ledger

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::OutboxStore;
use crate::models::{OutboxEntry, OutboxStatus};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE outbox (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                stage_ref TEXT NOT NULL,
                subject TEXT NOT NULL,
                recipients TEXT NOT NULL DEFAULT '[]',  -- JSON array
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX idx_outbox_account ON outbox(account_id, created_at ASC);
            "#,
        ),
    ])
}

const SELECT_COLUMNS: &str = "SELECT id, account_id, message_id, stage_ref, subject, recipients,
        attempts, last_error, status, created_at, updated_at
 FROM outbox";

/// Outbox ledger persisted in SQLite
///
/// The ledger outlives the process so staged messages can be retried after
/// a crash or restart.
pub struct SqliteOutbox {
    conn: Mutex<Connection>,
}

impl SqliteOutbox {
    /// Open (or create) the ledger at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create outbox directory at {:?}", parent)
            })?;
        }

        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL keeps readers unblocked while a send updates the ledger;
        // FULL sync makes a committed entry survive power loss.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            id: row.get(0)?,
            account_id: row.get(1)?,
            message_id: row.get(2)?,
            stage_ref: row.get(3)?,
            subject: row.get(4)?,
            recipients: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn query(&self, sql: &str, param: Option<&str>) -> Result<Vec<OutboxEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = match param {
            Some(p) => stmt
                .query_map([p], Self::entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], Self::entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        rows.into_iter().map(RawEntry::into_entry).collect()
    }
}

/// Row as stored, before text columns are parsed
struct RawEntry {
    id: String,
    account_id: String,
    message_id: String,
    stage_ref: String,
    subject: String,
    recipients: String,
    attempts: u32,
    last_error: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl RawEntry {
    fn into_entry(self) -> Result<OutboxEntry> {
        let status = OutboxStatus::parse(&self.status)
            .with_context(|| format!("Unknown outbox status {:?} for {}", self.status, self.id))?;
        let recipients: Vec<String> = serde_json::from_str(&self.recipients)
            .with_context(|| format!("Invalid recipients for outbox entry {}", self.id))?;

        Ok(OutboxEntry {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            account_id: self.account_id,
            message_id: self.message_id,
            stage_ref: self.stage_ref,
            subject: self.subject,
            recipients,
            attempts: self.attempts,
            last_error: self.last_error,
            status,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp {:?}", s))
}

impl OutboxStore for SqliteOutbox {
    fn save(&self, entry: &OutboxEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let recipients = serde_json::to_string(&entry.recipients)?;

        conn.execute(
            "INSERT OR REPLACE INTO outbox
             (id, account_id, message_id, stage_ref, subject, recipients,
              attempts, last_error, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.id,
                entry.account_id,
                entry.message_id,
                entry.stage_ref,
                entry.subject,
                recipients,
                entry.attempts,
                entry.last_error,
                entry.status.as_str(),
                entry.created_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to save outbox entry {}", entry.id))?;

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                &format!("{} WHERE id = ?", SELECT_COLUMNS),
                [id],
                Self::entry_from_row,
            )
            .optional()?
        };
        raw.map(RawEntry::into_entry).transpose()
    }

    fn remove(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM outbox WHERE id = ?", [id])?;
        Ok(())
    }

    fn list_for_account(&self, account_id: &str) -> Result<Vec<OutboxEntry>> {
        self.query(
            &format!(
                "{} WHERE account_id = ? ORDER BY created_at ASC, id ASC",
                SELECT_COLUMNS
            ),
            Some(account_id),
        )
    }

    fn list_all(&self) -> Result<Vec<OutboxEntry>> {
        self.query(
            &format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS),
            None,
        )
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
