// Session Store
//
// Owns all per-workflow conversation state: lookup-or-create by key, bounded
// append-only message logs, last-activity tracking, and eviction across keys.
// Backed by a SessionRepository; this store is the sole writer to the
// persisted representation.
//
// Writes are debounced: appends mark the table dirty and a background task
// flushes on a fixed interval (plus explicit flush/shutdown). A crash between
// an append and the next flush loses at most that window of messages; this is
// an accepted, bounded loss window, not a correctness violation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::models::chat::{ChatSession, Message, MessageKind, MessageRole, WorkflowKey};
use crate::models::config::SessionStoreConfig;
use crate::repositories::session_repo::{PersistedSessions, SessionRepository};
use crate::services::error::CopilotResult;

struct StoreState {
    sessions: HashMap<String, ChatSession>,
    last_active_key: Option<WorkflowKey>,
}

/// Bounded, persisted table of chat sessions keyed by workflow.
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    config: SessionStoreConfig,
    state: Arc<RwLock<StoreState>>,
    dirty: Arc<AtomicBool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Load the persisted table and start the background flusher.
    ///
    /// A failed or corrupt load yields an empty table; conversation flow is
    /// never blocked on storage.
    pub async fn open(repo: Arc<dyn SessionRepository>, config: SessionStoreConfig) -> Arc<Self> {
        let state = match repo.load().await {
            Ok(Some(table)) => StoreState {
                sessions: table.sessions,
                last_active_key: table.last_active_key.map(WorkflowKey::from),
            },
            Ok(None) => StoreState {
                sessions: HashMap::new(),
                last_active_key: None,
            },
            Err(err) => {
                log::warn!("failed to load session storage, starting empty: {}", err);
                StoreState {
                    sessions: HashMap::new(),
                    last_active_key: None,
                }
            }
        };

        let store = Arc::new(Self {
            repo,
            config,
            state: Arc::new(RwLock::new(state)),
            dirty: Arc::new(AtomicBool::new(false)),
            flusher: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_flusher(
            store.repo.clone(),
            store.state.clone(),
            store.dirty.clone(),
            store.config.flush_interval,
        ));
        *store.flusher.lock().await = Some(handle);

        store
    }

    /// Periodic flush loop. A single task owns all scheduled saves, so two
    /// flushes never run concurrently.
    async fn run_flusher(
        repo: Arc<dyn SessionRepository>,
        state: Arc<RwLock<StoreState>>,
        dirty: Arc<AtomicBool>,
        interval: std::time::Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !dirty.swap(false, Ordering::SeqCst) {
                continue;
            }
            let snapshot = Self::snapshot_locked(&state).await;
            if let Err(err) = repo.save(&snapshot).await {
                // Leave the table dirty so the next tick retries.
                dirty.store(true, Ordering::SeqCst);
                log::warn!("session storage write failed, will retry: {}", err);
            }
        }
    }

    async fn snapshot_locked(state: &RwLock<StoreState>) -> PersistedSessions {
        let guard = state.read().await;
        PersistedSessions {
            sessions: guard.sessions.clone(),
            last_active_key: guard.last_active_key.as_ref().map(|k| k.storage_key()),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Return the session for `key`, creating an empty one if absent.
    ///
    /// Creating may evict the least-recently-active sessions to stay within
    /// the configured cap. Reading an existing session does not refresh its
    /// recency; only appends do.
    pub async fn get_or_create(&self, key: &WorkflowKey) -> ChatSession {
        let storage_key = key.storage_key();
        let mut state = self.state.write().await;

        if let Some(session) = state.sessions.get(&storage_key) {
            return session.clone();
        }

        Self::evict_for_insert(&mut state.sessions, self.config.max_sessions);
        let session = ChatSession::new(key.clone());
        state.sessions.insert(storage_key, session.clone());
        drop(state);

        self.mark_dirty();
        session
    }

    /// Snapshot of the session for `key`, if one exists.
    pub async fn get(&self, key: &WorkflowKey) -> Option<ChatSession> {
        self.state
            .read()
            .await
            .sessions
            .get(&key.storage_key())
            .cloned()
    }

    /// Append a message to the session for `key`, creating the session if
    /// needed. Truncates the log to the newest configured maximum and bumps
    /// the session's last activity. Persistence is scheduled, never awaited.
    pub async fn append(
        &self,
        key: &WorkflowKey,
        role: MessageRole,
        content: String,
        kind: MessageKind,
    ) -> Message {
        let storage_key = key.storage_key();
        let message = Message::new(role, content, kind);

        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&storage_key) {
            Self::evict_for_insert(&mut state.sessions, self.config.max_sessions);
            state
                .sessions
                .insert(storage_key.clone(), ChatSession::new(key.clone()));
        }

        let max_messages = self.config.max_messages;
        if let Some(session) = state.sessions.get_mut(&storage_key) {
            session.messages.push(message.clone());
            if session.messages.len() > max_messages {
                let excess = session.messages.len() - max_messages;
                session.messages.drain(..excess);
            }
            session.last_activity_at = Some(Utc::now());
        }
        drop(state);

        self.mark_dirty();
        message
    }

    /// Empty the message log for `key` in place. The session itself stays in
    /// the table.
    pub async fn clear(&self, key: &WorkflowKey) {
        let cleared = {
            let mut state = self.state.write().await;
            match state.sessions.get_mut(&key.storage_key()) {
                Some(session) => {
                    session.messages.clear();
                    session.last_activity_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if cleared {
            self.mark_dirty();
        }
    }

    /// Remove the session for `key`. Returns whether one existed.
    pub async fn delete_session(&self, key: &WorkflowKey) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            state.sessions.remove(&key.storage_key()).is_some()
        };
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Remove every session.
    pub async fn clear_all(&self) {
        let mut state = self.state.write().await;
        state.sessions.clear();
        drop(state);
        self.mark_dirty();
    }

    /// Update the display name of an existing session.
    pub async fn set_display_name(&self, key: &WorkflowKey, name: &str) {
        let renamed = {
            let mut state = self.state.write().await;
            match state.sessions.get_mut(&key.storage_key()) {
                Some(session) if session.display_name != name => {
                    session.display_name = name.to_string();
                    true
                }
                _ => false,
            }
        };
        if renamed {
            self.mark_dirty();
        }
    }

    /// Snapshot of all sessions, most recently active first. Sessions that
    /// have never seen an append sort last.
    pub async fn list_sessions(&self) -> Vec<ChatSession> {
        let state = self.state.read().await;
        let mut sessions: Vec<ChatSession> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Record which key is currently active; persisted with the table.
    pub async fn set_last_active_key(&self, key: Option<WorkflowKey>) {
        let mut state = self.state.write().await;
        state.last_active_key = key;
        drop(state);
        self.mark_dirty();
    }

    pub async fn last_active_key(&self) -> Option<WorkflowKey> {
        self.state.read().await.last_active_key.clone()
    }

    /// Flush pending changes now. Failures are reported to the caller but the
    /// table stays dirty for the background retry.
    pub async fn flush(&self) -> CopilotResult<()> {
        let snapshot = Self::snapshot_locked(&self.state).await;
        match self.repo.save(&snapshot).await {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                self.mark_dirty();
                Err(err)
            }
        }
    }

    /// Stop the background flusher and write a final snapshot.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.flusher.lock().await.take() {
            handle.abort();
        }
        if let Err(err) = self.flush().await {
            log::warn!("final session flush failed: {}", err);
        }
    }

    /// Evict least-recently-active sessions until inserting one more stays
    /// within `max`. Never-activated sessions count as oldest.
    fn evict_for_insert(sessions: &mut HashMap<String, ChatSession>, max: usize) {
        if sessions.len() < max {
            return;
        }
        let evict_count = sessions.len() - max + 1;
        let mut by_age: Vec<(String, Option<chrono::DateTime<Utc>>)> = sessions
            .iter()
            .map(|(k, s)| (k.clone(), s.last_activity_at))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1));

        for (key, _) in by_age.into_iter().take(evict_count) {
            log::debug!("evicting idle session {}", key);
            sessions.remove(&key);
        }
    }
}
