//! Session Store
//!
//! Message history per session key (`channel:chat_id`), kept in SQLite
//! with a rolling window per session.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Messages kept per session
pub const DEFAULT_MAX_MESSAGES: usize = 200;

/// One stored turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String, // "user" or "assistant"
    pub content: String,
    pub timestamp: i64, // Unix ms
}

/// Per-session listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub message_count: usize,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_messages: usize,
    pub total_sessions: usize,
}

pub struct SessionStore {
    conn: Connection,
    max_messages: usize,
}

impl SessionStore {
    /// Open or create the session database
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_limit(path, DEFAULT_MAX_MESSAGES)
    }

    pub fn open_with_limit(path: &Path, max_messages: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self { conn, max_messages };
        store.init_schema()?;

        info!("Session store opened: {}", path.display());
        Ok(store)
    }

    /// Throwaway store for one-shot runs
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            max_messages: DEFAULT_MAX_MESSAGES,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_key, id DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn add_message(&self, session_key: &str, role: &str, content: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (session_key, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_key, role, content, crate::utils::now_ms()],
        )?;
        self.trim(session_key, self.max_messages)?;
        debug!("Added {} message to session {}", role, session_key);
        Ok(())
    }

    /// Save a user turn and its reply atomically
    pub fn add_exchange(&self, session_key: &str, user_msg: &str, assistant_msg: &str) -> Result<()> {
        let timestamp = crate::utils::now_ms();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (session_key, role, content, timestamp)
             VALUES (?1, 'user', ?2, ?3)",
            params![session_key, user_msg, timestamp],
        )?;
        tx.execute(
            "INSERT INTO messages (session_key, role, content, timestamp)
             VALUES (?1, 'assistant', ?2, ?3)",
            params![session_key, assistant_msg, timestamp],
        )?;
        tx.commit()?;

        self.trim(session_key, self.max_messages)?;
        debug!("Added exchange to session {}", session_key);
        Ok(())
    }

    /// Most recent `limit` messages, oldest first
    pub fn get_history(&self, session_key: &str, limit: usize) -> Result<Vec<SessionMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content, timestamp FROM messages
             WHERE session_key = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let mut messages = stmt
            .query_map(params![session_key, limit as i64], |row| {
                Ok(SessionMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        messages.reverse();
        Ok(messages)
    }

    pub fn clear(&self, session_key: &str) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM messages WHERE session_key = ?1", params![session_key])?;
        info!("Cleared {} messages from session {}", rows, session_key);
        Ok(rows)
    }

    /// Sessions, most recently updated first
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_key, COUNT(*), MAX(timestamp) FROM messages
             GROUP BY session_key
             ORDER BY MAX(id) DESC",
        )?;

        let sessions = stmt
            .query_map([], |row| {
                Ok(SessionSummary {
                    key: row.get(0)?,
                    message_count: row.get::<_, i64>(1)? as usize,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Keep only the newest `keep_count` messages of a session
    pub fn trim(&self, session_key: &str, keep_count: usize) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM messages
             WHERE session_key = ?1 AND id NOT IN (
                 SELECT id FROM messages
                 WHERE session_key = ?1
                 ORDER BY id DESC
                 LIMIT ?2
             )",
            params![session_key, keep_count as i64],
        )?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<SessionStats> {
        let total_messages: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let total_sessions: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT session_key) FROM messages", [], |row| row.get(0))?;

        Ok(SessionStats {
            total_messages: total_messages as usize,
            total_sessions: total_sessions as usize,
        })
    }
}
