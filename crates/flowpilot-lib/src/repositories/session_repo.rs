// Session Repository
// Persistence port for the chat session table, plus the two bundled
// implementations: a JSON file on disk and an in-memory store for tests and
// ephemeral embedding.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::chat::ChatSession;
use crate::services::error::{CopilotError, CopilotResult};

/// Serialized form of the session table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessions {
    /// Sessions keyed by workflow storage key
    #[serde(default)]
    pub sessions: HashMap<String, ChatSession>,
    /// Storage key of the session that was active when last saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_key: Option<String>,
}

/// Storage port for the session table.
///
/// The session store is the only writer; everything else sees snapshots.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Load the persisted table. `Ok(None)` means nothing has been saved yet.
    async fn load(&self) -> CopilotResult<Option<PersistedSessions>>;

    /// Replace the persisted table.
    async fn save(&self, table: &PersistedSessions) -> CopilotResult<()>;
}

/// JSON-file backed repository.
pub struct JsonFileSessionRepository {
    path: PathBuf,
}

impl JsonFileSessionRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the platform data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowpilot")
            .join("sessions.json")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SessionRepository for JsonFileSessionRepository {
    async fn load(&self) -> CopilotResult<Option<PersistedSessions>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CopilotError::StorageError(err.to_string())),
        };

        let table: PersistedSessions = serde_json::from_str(&raw)
            .map_err(|err| CopilotError::StorageError(format!("corrupt session file: {}", err)))?;
        Ok(Some(table))
    }

    async fn save(&self, table: &PersistedSessions) -> CopilotResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| CopilotError::StorageError(err.to_string()))?;
        }

        let json = serde_json::to_string_pretty(table)
            .map_err(|err| CopilotError::StorageError(err.to_string()))?;

        // Write to a sibling temp file and rename so a crash mid-write never
        // truncates the previous good copy.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| CopilotError::StorageError(err.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| CopilotError::StorageError(err.to_string()))?;

        Ok(())
    }
}

/// In-memory repository. Used by tests and by embedders that do not want
/// sessions to outlive the process.
#[derive(Default)]
pub struct InMemorySessionRepository {
    inner: Mutex<Option<PersistedSessions>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository with an existing table.
    pub fn with_table(table: PersistedSessions) -> Self {
        Self {
            inner: Mutex::new(Some(table)),
            fail_saves: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make subsequent saves fail, for exercising retry behavior.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Snapshot of what was last saved.
    pub async fn saved(&self) -> Option<PersistedSessions> {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load(&self) -> CopilotResult<Option<PersistedSessions>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, table: &PersistedSessions) -> CopilotResult<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CopilotError::StorageError("save disabled".to_string()));
        }
        *self.inner.lock().await = Some(table.clone());
        Ok(())
    }
}
