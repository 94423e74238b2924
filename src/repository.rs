//! Session CRUD over a [`PersistentStore`].
//!
//! The repository owns the in-memory [`SessionIndex`] (all sessions plus the
//! current-session pointer). Every mutation runs read-modify-write under one
//! async mutex and writes the whole session back before the lock is released,
//! so concurrent saves of the same id resolve as last-writer-wins.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{RepositoryError, StoreError};
use crate::session::{decode_session, Session, SessionSummary, DEFAULT_SESSION_TITLE};
use crate::storage::PersistentStore;

pub const CHAT_NAMESPACE: &str = "chat";
pub const DOCUMENT_CHAT_NAMESPACE: &str = "document-chat";

/// Sessions newest-created-first, plus the current-session pointer.
#[derive(Debug, Default)]
pub struct SessionIndex {
    sessions: Vec<Session>,
    current: Option<Uuid>,
}

impl SessionIndex {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn upsert(&mut self, session: Session) {
        match self.position(session.id) {
            Some(i) => self.sessions[i] = session,
            None => self.sessions.insert(0, session),
        }
    }
}

pub struct SessionRepository {
    store: Arc<dyn PersistentStore>,
    namespace: String,
    index: Mutex<SessionIndex>,
}

impl SessionRepository {
    /// Loads every readable session under `namespace`. Unreadable records are skipped.
    pub async fn open(store: Arc<dyn PersistentStore>, namespace: &str) -> Result<Self, StoreError> {
        let prefix = format!("{}/", namespace);
        let records = store.scan_prefix(&prefix).await?;
        let total = records.len();
        let mut sessions: Vec<Session> = records
            .into_iter()
            .filter_map(|(_, raw)| decode_session(&raw))
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if sessions.len() < total {
            tracing::warn!(namespace, dropped = total - sessions.len(), "skipped unreadable sessions");
        }
        let unanswered = sessions.iter().filter(|s| !s.messages.is_complete()).count();
        tracing::debug!(namespace, count = sessions.len(), unanswered, "session index loaded");
        Ok(Self {
            store,
            namespace: namespace.to_string(),
            index: Mutex::new(SessionIndex { sessions, current: None }),
        })
    }

    fn key(&self, id: Uuid) -> String {
        format!("{}/{}", self.namespace, id)
    }

    async fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session)?;
        self.store.put(&self.key(session.id), &raw).await
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let index = self.index.lock().await;
        index.sessions.iter().map(Session::summary).collect()
    }

    /// Creates an empty session and makes it current.
    pub async fn create(&self) -> Result<Session, RepositoryError> {
        let mut index = self.index.lock().await;
        let session = Session::new();
        self.persist(&session).await?;
        index.upsert(session.clone());
        index.current = Some(session.id);
        tracing::info!(session_id = %session.id, namespace = %self.namespace, "session created");
        Ok(session)
    }

    /// Makes `id` current and returns it.
    pub async fn load(&self, id: Uuid) -> Result<Session, RepositoryError> {
        let mut index = self.index.lock().await;
        let session = index.get(id).cloned().ok_or(RepositoryError::NotFound(id))?;
        index.current = Some(id);
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.index.lock().await.get(id).cloned()
    }

    /// Removes a session. Returns false if it did not exist.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut index = self.index.lock().await;
        let removed_from_store = self.store.remove(&self.key(id)).await?;
        let removed_from_index = match index.position(id) {
            Some(i) => {
                index.sessions.remove(i);
                true
            }
            None => false,
        };
        if index.current == Some(id) {
            index.current = None;
        }
        if removed_from_index || removed_from_store {
            tracing::info!(session_id = %id, namespace = %self.namespace, "session deleted");
        }
        Ok(removed_from_index || removed_from_store)
    }

    /// Upserts the whole session into the index and the store.
    pub async fn save(&self, session: Session) -> Result<(), RepositoryError> {
        let mut index = self.index.lock().await;
        self.persist(&session).await?;
        index.upsert(session);
        Ok(())
    }

    pub async fn rename(&self, id: Uuid, title: &str) -> Result<Session, RepositoryError> {
        // A blank title re-enables automatic derivation.
        let title = match title.trim() {
            "" => DEFAULT_SESSION_TITLE.to_string(),
            t => t.to_string(),
        };
        self.update(id, |s| s.title = title).await?;
        self.get(id).await.ok_or(RepositoryError::NotFound(id))
    }

    pub async fn current(&self) -> Option<Session> {
        let index = self.index.lock().await;
        index.current.and_then(|id| index.get(id).cloned())
    }

    pub async fn current_id(&self) -> Option<Uuid> {
        let index = self.index.lock().await;
        index.current.filter(|id| index.get(*id).is_some())
    }

    /// Returns the current session id, creating a session first if none is selected.
    pub async fn ensure_current(&self) -> Result<Uuid, RepositoryError> {
        let mut index = self.index.lock().await;
        if let Some(id) = index.current.filter(|id| index.get(*id).is_some()) {
            return Ok(id);
        }
        let session = Session::new();
        self.persist(&session).await?;
        let id = session.id;
        index.upsert(session);
        index.current = Some(id);
        tracing::info!(session_id = %id, namespace = %self.namespace, "session created on first send");
        Ok(id)
    }

    /// Applies `f` to the session, derives its title if still unset, and persists it.
    pub async fn update<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, RepositoryError> {
        let mut index = self.index.lock().await;
        let pos = index.position(id).ok_or(RepositoryError::NotFound(id))?;
        let mut session = index.sessions[pos].clone();
        let out = f(&mut session);
        session.derive_title();
        self.persist(&session).await?;
        index.sessions[pos] = session;
        Ok(out)
    }
}
