//! Session persistence contract and two stores.
//!
//! The engine saves a [`SessionSnapshot`] after every step and on every error
//! path, and loads it once when it is constructed. [`MemorySessionStore`]
//! backs tests and ephemeral sessions; [`JsonFileStore`] writes one JSON file
//! per session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conductor_core::errors::PersistenceError;
use conductor_core::ids::SessionId;
use conductor_core::messages::{ToolCallRecord, Turn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything persisted for one session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Ordered history.
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Ordered tool-call audit trail.
    #[serde(default)]
    pub records: Vec<ToolCallRecord>,
}

impl SessionSnapshot {
    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.records.is_empty()
    }
}

/// Loads and saves session snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. Unknown sessions yield `None`.
    async fn load(&self, id: &SessionId) -> Result<Option<SessionSnapshot>, PersistenceError>;

    /// Replace a session's snapshot.
    async fn save(&self, id: &SessionId, snapshot: &SessionSnapshot) -> Result<(), PersistenceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionSnapshot>>,
}

impl MemorySessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, bypassing the async contract.
    #[must_use]
    pub fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.read().get(id).cloned()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionSnapshot>, PersistenceError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn save(&self, id: &SessionId, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let _ = self.sessions.write().insert(id.clone(), snapshot.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON file store
// ─────────────────────────────────────────────────────────────────────────────

/// One `<session id>.json` file per session under a root directory.
///
/// Saves write to a temporary sibling and rename it into place so a crash
/// mid-write never leaves a torn file.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &SessionId) -> Result<PathBuf, PersistenceError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistenceError::Backend(format!(
                "session id not usable as a file name: {id}"
            )));
        }
        Ok(self.root.join(format!("{id}.json")))
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionSnapshot>, PersistenceError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, id: &SessionId, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(session_id = %id, turns = snapshot.turns.len(), "session saved");
        Ok(())
    }
}
