//! Task data store
//!
//! The worker only ever needs three operations: read back the last
//! persisted portal session, save a fresh one, and overwrite a task's
//! license result. The SQLite implementation keeps exactly that surface;
//! the rest of the relational model lives outside this service.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{LicenseOutcome, LicenseStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Last persisted session token, if any.
    async fn read_session(&self) -> Result<Option<String>, StoreError>;

    async fn write_session(&self, session: &str) -> Result<(), StoreError>;

    /// Create a task record in `pending` state and return its id.
    async fn create_task(&self) -> Result<String, StoreError>;

    /// Overwrite the task's license result. Idempotent: the last write wins.
    async fn write_license_result(
        &self,
        task_id: &str,
        outcome: &LicenseOutcome,
    ) -> Result<(), StoreError>;

    async fn read_license_result(&self, task_id: &str)
        -> Result<Option<LicenseOutcome>, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS license_tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                expires_at INTEGER,
                is_expired INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER
            )",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn read_session(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let session = conn
            .query_row(
                "SELECT value FROM sessions ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(session)
    }

    async fn write_session(&self, session: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (value, created_at) VALUES (?1, ?2)",
            params![session, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn create_task(&self) -> Result<String, StoreError> {
        let task_id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO license_tasks (id, status, created_at) VALUES (?1, ?2, ?3)",
            params![
                task_id,
                LicenseStatus::Pending.as_str(),
                Utc::now().timestamp()
            ],
        )?;
        Ok(task_id)
    }

    async fn write_license_result(
        &self,
        task_id: &str,
        outcome: &LicenseOutcome,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO license_tasks (id, status, expires_at, is_expired, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                expires_at = excluded.expires_at,
                is_expired = excluded.is_expired,
                updated_at = excluded.updated_at",
            params![
                task_id,
                outcome.status.as_str(),
                outcome.expires_at.map(|t| t.timestamp()),
                outcome.is_expired,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    async fn read_license_result(
        &self,
        task_id: &str,
    ) -> Result<Option<LicenseOutcome>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT status, expires_at, is_expired FROM license_tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<bool>>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(status, expires_at, is_expired)| LicenseOutcome {
            status: LicenseStatus::parse(&status).unwrap_or(LicenseStatus::Error),
            expires_at: expires_at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            is_expired,
        }))
    }
}
