//! Session persistence keyed by (user, topic, mode).
//!
//! Writes are ordered by `Session::revision`: a save whose revision is not
//! newer than the stored record is rejected, so a stale write can never
//! overwrite a later one. Records stay retrievable by session id after the
//! key has been re-pointed at a newer session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::session::{Session, SessionKey};

/// Shared reference to a session store
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// External key-value store for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Most recent session for a key.
    async fn load(&self, key: &SessionKey) -> EngineResult<Option<Session>>;

    /// Any session ever saved, by id.
    async fn load_by_id(&self, session_id: &str) -> EngineResult<Option<Session>>;

    /// Persist a session and point its key at it.
    async fn save(&self, session: &Session) -> EngineResult<()>;
}

fn check_revision(stored: Option<&Session>, incoming: &Session) -> EngineResult<()> {
    match stored {
        Some(existing) if existing.revision >= incoming.revision => Err(EngineError::StaleWrite {
            session_id: incoming.id.clone(),
            stored: existing.revision,
            attempted: incoming.revision,
        }),
        _ => Ok(()),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryTables {
    sessions: HashMap<String, Session>,
    index: HashMap<SessionKey, String>,
}

/// Process-local store, used in tests and single-process deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    tables: RwLock<MemoryTables>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedSessionStore {
        Arc::new(self)
    }

    /// Number of session records held.
    pub async fn len(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> EngineResult<Option<Session>> {
        let tables = self.tables.read().await;
        Ok(tables
            .index
            .get(key)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn load_by_id(&self, session_id: &str) -> EngineResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(session_id).cloned())
    }

    async fn save(&self, session: &Session) -> EngineResult<()> {
        let mut tables = self.tables.write().await;
        check_revision(tables.sessions.get(&session.id), session)?;
        tables.index.insert(session.key(), session.id.clone());
        tables.sessions.insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, revision = session.revision, "Session saved");
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// On-disk envelope for a session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    version: u32,
    session: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    session_id: String,
}

/// File-backed store: `sessions/<id>.json` plus `index/<key>.json`.
pub struct JsonFileSessionStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSessionStore {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Open (creating directories as needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("sessions")).await?;
        tokio::fs::create_dir_all(root.join("index")).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn shared(self) -> SharedSessionStore {
        Arc::new(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{}.json", encode_component(session_id)))
    }

    fn index_path(&self, key: &SessionKey) -> PathBuf {
        self.root.join("index").join(format!(
            "{}__{}__{}.json",
            encode_component(&key.user_id),
            encode_component(&key.topic_id),
            key.mode
        ))
    }

    async fn read_session(&self, path: &Path) -> EngineResult<Option<Session>> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredSession = serde_json::from_str(&json)?;
        if stored.version > Self::CURRENT_VERSION {
            return Err(EngineError::store(format!(
                "version mismatch: expected {}, found {}",
                Self::CURRENT_VERSION,
                stored.version
            )));
        }
        Ok(Some(stored.session))
    }

    async fn write_atomic(&self, path: &Path, contents: String) -> EngineResult<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self, key: &SessionKey) -> EngineResult<Option<Session>> {
        let index_json = match tokio::fs::read_to_string(self.index_path(key)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: IndexEntry = serde_json::from_str(&index_json)?;
        self.read_session(&self.session_path(&entry.session_id))
            .await
    }

    async fn load_by_id(&self, session_id: &str) -> EngineResult<Option<Session>> {
        self.read_session(&self.session_path(session_id)).await
    }

    async fn save(&self, session: &Session) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.session_path(&session.id);
        let existing = self.read_session(&path).await?;
        check_revision(existing.as_ref(), session)?;

        let stored = StoredSession {
            version: Self::CURRENT_VERSION,
            session: session.clone(),
        };
        self.write_atomic(&path, serde_json::to_string_pretty(&stored)?)
            .await?;

        let entry = IndexEntry {
            session_id: session.id.clone(),
        };
        self.write_atomic(&self.index_path(&session.key()), serde_json::to_string(&entry)?)
            .await?;

        debug!(
            session_id = %session.id,
            revision = session.revision,
            path = %path.display(),
            "Session written"
        );
        Ok(())
    }
}

/// Make an id safe to use as a file name component.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("_{:02x}", byte)),
        }
    }
    out
}
