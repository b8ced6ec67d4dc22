//! SQLite-backed vault metadata and session snapshot storage.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use ledgervault_common::{ContentId, Error, Result, TxRef, UserId};
use ledgervault_vault::{SessionRepository, SessionSnapshot, VaultRecord, VaultRepository};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vaults (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    vault_type TEXT NOT NULL,
    content_id TEXT,
    anchor_ref TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vaults_user ON vaults(user_id, updated_at);

CREATE TABLE IF NOT EXISTS sessions (
    user_id TEXT PRIMARY KEY,
    snapshot TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
"#;

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
    move |e| Error::Database(format!("{}: {}", context, e))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("Invalid timestamp '{}': {}", raw, e)))
}

struct VaultRow {
    id: String,
    user_id: String,
    name: String,
    vault_type: String,
    content_id: Option<String>,
    anchor_ref: Option<String>,
    created_at: String,
    updated_at: String,
}

impl VaultRow {
    fn into_record(self) -> Result<VaultRecord> {
        Ok(VaultRecord {
            id: self.id,
            name: self.name,
            vault_type: self.vault_type,
            user_id: UserId::new(self.user_id)?,
            content_id: self.content_id.map(ContentId::new).transpose()?,
            anchor_ref: self.anchor_ref.map(TxRef::new),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Implements both repositories over one SQLite connection.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    /// - `Database` if the file cannot be opened or the schema cannot be created
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("Failed to open database"))?;
        let repo = Self::with_connection(conn)?;
        info!(path = %path.as_ref().display(), "Repository database opened");
        Ok(repo)
    }

    /// Database that lives only as long as this value (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(db_err("Failed to initialize schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("Connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl VaultRepository for SqliteRepository {
    async fn get_latest_by_user_id(&self, user_id: &UserId) -> Result<Option<VaultRecord>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                r#"
                SELECT id, user_id, name, vault_type, content_id, anchor_ref, created_at, updated_at
                FROM vaults WHERE user_id = ?1
                ORDER BY updated_at DESC LIMIT 1
                "#,
                [user_id.as_str()],
                |row| {
                    Ok(VaultRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        vault_type: row.get(3)?,
                        content_id: row.get(4)?,
                        anchor_ref: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(db_err("Failed to load vault"))?
        };
        row.map(VaultRow::into_record).transpose()
    }

    async fn save_vault(&self, record: &VaultRecord) -> Result<()> {
        debug!(vault_id = %record.id, user_id = %record.user_id, "Saving vault record");
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO vaults
            (id, user_id, name, vault_type, content_id, anchor_ref, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.id,
                record.user_id.as_str(),
                record.name,
                record.vault_type,
                record.content_id.as_ref().map(|c| c.as_str()),
                record.anchor_ref.as_ref().map(|t| t.as_str()),
                timestamp(&record.created_at),
                timestamp(&record.updated_at),
            ],
        )
        .map_err(db_err("Failed to save vault"))?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SqliteRepository {
    async fn save_session(&self, user_id: &UserId, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (user_id, snapshot, saved_at) VALUES (?1, ?2, ?3)",
            params![user_id.as_str(), json, timestamp(&Utc::now())],
        )
        .map_err(db_err("Failed to save session"))?;
        debug!(user_id = %user_id, "Session snapshot saved");
        Ok(())
    }

    async fn get_session(&self, user_id: &UserId) -> Result<Option<SessionSnapshot>> {
        let json: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT snapshot FROM sessions WHERE user_id = ?1",
                [user_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Failed to load session"))?
        };
        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    async fn get_all_sessions(&self) -> Result<HashMap<UserId, SessionSnapshot>> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare("SELECT user_id, snapshot FROM sessions")
                .map_err(db_err("Failed to list sessions"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err("Failed to list sessions"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("Failed to read session row"))?;
            rows
        };

        let mut sessions = HashMap::with_capacity(rows.len());
        for (user_id, json) in rows {
            let snapshot: SessionSnapshot = serde_json::from_str(&json)?;
            sessions.insert(UserId::new(user_id)?, snapshot);
        }
        Ok(sessions)
    }
}
