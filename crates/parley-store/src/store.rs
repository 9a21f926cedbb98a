use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use parley_core::error::{ParleyError, Result};
use parley_core::state::ExecutionState;
use parley_core::traits::ConversationStore;
use parley_core::types::ConversationId;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        flow_id TEXT NOT NULL,
        state_json TEXT NOT NULL,
        last_user_message TEXT,
        completed INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_flow
        ON conversations(flow_id, updated_at);";

fn db_err(e: rusqlite::Error) -> ParleyError {
    ParleyError::Database(e.to_string())
}

/// Row metadata for a stored conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub flow_id: String,
    pub last_user_message: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed conversation store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ParleyError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Metadata for one conversation, without the state body.
    pub fn record(&self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::Database(e.to_string()))?;

        let row = conn
            .query_row(
                "SELECT flow_id, last_user_message, completed, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let flow_id: String = row.get(0)?;
                    let last_user_message: Option<String> = row.get(1)?;
                    let completed: bool = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    let updated_at: String = row.get(4)?;
                    Ok((flow_id, last_user_message, completed, created_at, updated_at))
                },
            )
            .optional()
            .map_err(db_err)?;

        Ok(row.map(
            |(flow_id, last_user_message, completed, created_at, updated_at)| ConversationRecord {
                id: id.clone(),
                flow_id,
                last_user_message,
                completed,
                created_at: parse_ts(&created_at),
                updated_at: parse_ts(&updated_at),
            },
        ))
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl ConversationStore for SqliteStore {
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<ExecutionState>>> {
        let id = id.as_str().to_string();

        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| ParleyError::Database(e.to_string()))?;

            let json: Option<String> = conn
                .query_row(
                    "SELECT state_json FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
    }

    fn save(
        &self,
        state: &ExecutionState,
        flow_id: &str,
        id: Option<&ConversationId>,
        last_user_message: Option<&str>,
    ) -> BoxFuture<'_, Result<ConversationId>> {
        let state_json = serde_json::to_string(state);
        let completed = state.completed;
        let flow_id = flow_id.to_string();
        let id = id.cloned().unwrap_or_default();
        let last_user_message = last_user_message.map(str::to_string);

        Box::pin(async move {
            let state_json = state_json?;
            let now = Utc::now().to_rfc3339();
            let conn = self
                .conn
                .lock()
                .map_err(|e| ParleyError::Database(e.to_string()))?;

            conn.execute(
                "INSERT INTO conversations
                    (id, flow_id, state_json, last_user_message, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    flow_id = excluded.flow_id,
                    state_json = excluded.state_json,
                    last_user_message = COALESCE(excluded.last_user_message, last_user_message),
                    completed = excluded.completed,
                    updated_at = excluded.updated_at",
                params![id.as_str(), flow_id, state_json, last_user_message, completed, now],
            )
            .map_err(db_err)?;

            debug!(conversation_id = %id, flow_id = %flow_id, completed, "Conversation saved");
            Ok(id)
        })
    }
}
