//! Session / State Store (C7): persists per-request state, enumerates
//! sessions, and enforces per-caller isolation.
//!
//! An in-memory backend covers tests and single-process deployments;
//! storage is behind a trait object so a persistent backend can be
//! swapped in without touching callers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::question::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One step recorded in a session's `operation_trace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub op_id: String,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub caller_id: String,
    pub question: Question,
    pub created_at: DateTime<Utc>,
    pub operation_trace: Vec<TraceEntry>,
    pub final_result: Option<serde_json::Value>,
    pub status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn new(question: Question, caller_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            caller_id: caller_id.into(),
            question,
            created_at: Utc::now(),
            operation_trace: Vec::new(),
            final_result: None,
            status: SessionStatus::Running,
        }
    }

    pub fn push_trace(&mut self, op_id: impl Into<String>, status: impl Into<String>) {
        self.operation_trace.push(TraceEntry { op_id: op_id.into(), status: status.into(), recorded_at: Utc::now() });
    }
}

/// Lightweight view returned by `list`, without the full operation trace.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub caller_id: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id,
            caller_id: session.caller_id.clone(),
            created_at: session.created_at,
            status: session.status,
        }
    }
}

/// Persistence strategy for sessions. Implementations enforce the
/// caller-isolation invariant themselves: a read or mutation for the wrong
/// `caller_id` must behave exactly like the session does not exist.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, question: Question, caller_id: &str) -> Result<Uuid>;
    async fn get(&self, session_id: Uuid, caller_id: &str) -> Result<Session>;
    async fn update(&self, session: Session) -> Result<()>;
    async fn delete(&self, session_id: Uuid, caller_id: &str) -> Result<bool>;
    async fn list(&self, caller_id: &str, limit: usize) -> Result<Vec<SessionSummary>>;
    async fn cleanup(&self, older_than: ChronoDuration) -> Result<usize>;
}

/// In-memory store. Useful for tests and single-process deployments; does
/// not persist across restarts.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, question: Question, caller_id: &str) -> Result<Uuid> {
        let session = Session::new(question, caller_id);
        let id = session.session_id;
        self.sessions.lock().insert(id, session);
        Ok(id)
    }

    async fn get(&self, session_id: Uuid, caller_id: &str) -> Result<Session> {
        let sessions = self.sessions.lock();
        sessions
            .get(&session_id)
            .filter(|s| s.caller_id == caller_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn update(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.lock();
        match sessions.get(&session.session_id) {
            Some(existing) if existing.caller_id == session.caller_id => {
                sessions.insert(session.session_id, session);
                Ok(())
            }
            Some(_) => Err(Error::NotFound),
            None => Err(Error::NotFound),
        }
    }

    async fn delete(&self, session_id: Uuid, caller_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock();
        let owned = sessions.get(&session_id).is_some_and(|s| s.caller_id == caller_id);
        if owned {
            sessions.remove(&session_id);
        }
        Ok(owned)
    }

    async fn list(&self, caller_id: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.lock();
        let mut matching: Vec<SessionSummary> =
            sessions.values().filter(|s| s.caller_id == caller_id).map(SessionSummary::from).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn cleanup(&self, older_than: ChronoDuration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut sessions = self.sessions.lock();
        let expired: Vec<Uuid> =
            sessions.values().filter(|s| s.created_at < cutoff).map(|s| s.session_id).collect();
        for id in &expired {
            sessions.remove(id);
        }
        Ok(expired.len())
    }
}

/// Integrity-wrapped bincode framing for persisted session snapshots:
/// magic + version + crc32 + length header, so a truncated or bit-flipped
/// row is detected rather than silently deserialized into garbage.
#[cfg(feature = "sqlite-sessions")]
mod integrity {
    const MAGIC: &[u8; 4] = b"XSES";
    const VERSION: u32 = 1;
    const HEADER_SIZE: usize = 20;

    #[derive(Debug, thiserror::Error)]
    pub enum IntegrityError {
        #[error("session snapshot too small: {0} bytes")]
        TooSmall(usize),
        #[error("session snapshot has an unrecognized magic header")]
        BadMagic,
        #[error("session snapshot format version {0} is newer than supported ({VERSION})")]
        UnsupportedVersion(u32),
        #[error("session snapshot checksum mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
        ChecksumMismatch { stored: u32, computed: u32 },
    }

    pub fn wrap(payload: &[u8]) -> Vec<u8> {
        let checksum = crc32fast::hash(payload);
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn unwrap(data: &[u8]) -> Result<&[u8], IntegrityError> {
        if data.len() < HEADER_SIZE {
            return Err(IntegrityError::TooSmall(data.len()));
        }
        if &data[0..4] != MAGIC {
            return Err(IntegrityError::BadMagic);
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version > VERSION {
            return Err(IntegrityError::UnsupportedVersion(version));
        }
        let stored = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let payload = &data[HEADER_SIZE..];
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(IntegrityError::ChecksumMismatch { stored, computed });
        }
        Ok(payload)
    }
}

/// Persistent, SQLite-backed session store. Reads and writes are offloaded
/// to a blocking task since `rusqlite` connections are not `Send` across
/// awaits; the connection itself lives behind a [`parking_lot::Mutex`] so
/// concurrent callers serialize on it rather than opening one per call.
#[cfg(feature = "sqlite-sessions")]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

#[cfg(feature = "sqlite-sessions")]
impl SqliteSessionStore {
    /// # Errors
    /// Returns [`Error::ConfigInvalid`] if the database cannot be opened or
    /// migrated.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                caller_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                snapshot BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_sessions_caller ON sessions(caller_id)", [])
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn encode(session: &Session) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(session).map_err(|e| Error::AggregationFailed(e.to_string()))?;
        Ok(integrity::wrap(&bytes))
    }

    fn decode(data: &[u8]) -> Result<Session> {
        let payload = integrity::unwrap(data).map_err(|e| Error::AggregationFailed(e.to_string()))?;
        bincode::deserialize(payload).map_err(|e| Error::AggregationFailed(e.to_string()))
    }
}

#[cfg(feature = "sqlite-sessions")]
#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, question: Question, caller_id: &str) -> Result<Uuid> {
        let session = Session::new(question, caller_id);
        let id = session.session_id;
        self.update(session).await?;
        Ok(id)
    }

    async fn get(&self, session_id: Uuid, caller_id: &str) -> Result<Session> {
        let conn = Arc::clone(&self.conn);
        let caller_id = caller_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let snapshot: Vec<u8> = conn
                .query_row("SELECT snapshot FROM sessions WHERE session_id = ?1", [session_id.to_string()], |row| row.get(0))
                .map_err(|_| Error::NotFound)?;
            let session = Self::decode(&snapshot)?;
            if session.caller_id != caller_id {
                return Err(Error::NotFound);
            }
            Ok(session)
        })
        .await
        .map_err(|e| Error::AggregationFailed(e.to_string()))?
    }

    async fn update(&self, session: Session) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let snapshot = Self::encode(&session)?;
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .execute(
                    "INSERT INTO sessions (session_id, caller_id, created_at, snapshot) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(session_id) DO UPDATE SET snapshot = excluded.snapshot",
                    rusqlite::params![
                        session.session_id.to_string(),
                        session.caller_id,
                        session.created_at.to_rfc3339(),
                        snapshot
                    ],
                )
                .map(|_| ())
                .map_err(|e| Error::AggregationFailed(e.to_string()))
        })
        .await
        .map_err(|e| Error::AggregationFailed(e.to_string()))?
    }

    async fn delete(&self, session_id: Uuid, caller_id: &str) -> Result<bool> {
        let conn = Arc::clone(&self.conn);
        let caller_id = caller_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let affected = conn
                .execute(
                    "DELETE FROM sessions WHERE session_id = ?1 AND caller_id = ?2",
                    rusqlite::params![session_id.to_string(), caller_id],
                )
                .map_err(|e| Error::AggregationFailed(e.to_string()))?;
            Ok(affected > 0)
        })
        .await
        .map_err(|e| Error::AggregationFailed(e.to_string()))?
    }

    async fn list(&self, caller_id: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = Arc::clone(&self.conn);
        let caller_id = caller_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn
                .prepare("SELECT snapshot FROM sessions WHERE caller_id = ?1 ORDER BY created_at DESC LIMIT ?2")
                .map_err(|e| Error::AggregationFailed(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![caller_id, limit as i64], |row| row.get::<_, Vec<u8>>(0))
                .map_err(|e| Error::AggregationFailed(e.to_string()))?;
            let mut summaries = Vec::new();
            for row in rows {
                let snapshot = row.map_err(|e| Error::AggregationFailed(e.to_string()))?;
                summaries.push(SessionSummary::from(&Self::decode(&snapshot)?));
            }
            Ok(summaries)
        })
        .await
        .map_err(|e| Error::AggregationFailed(e.to_string()))?
    }

    async fn cleanup(&self, older_than: ChronoDuration) -> Result<usize> {
        let conn = Arc::clone(&self.conn);
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .execute("DELETE FROM sessions WHERE created_at < ?1", [cutoff])
                .map_err(|e| Error::AggregationFailed(e.to_string()))
        })
        .await
        .map_err(|e| Error::AggregationFailed(e.to_string()))?
    }
}
