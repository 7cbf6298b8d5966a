use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Result, RtcError};
use super::messages::CollabServerEvent;
use super::storage::StorageClient;

/// Identifies one shared editing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub assessment_id: String,
    pub question_id: String,
}

impl SessionKey {
    pub fn new(assessment_id: &str, question_id: &str) -> Self {
        Self {
            assessment_id: assessment_id.to_string(),
            question_id: question_id.to_string(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.assessment_id, self.question_id)
    }
}

/// Authoritative state of one session. Writes replace whole documents;
/// the revision counter is diagnostic only and carries no ordering
/// guarantee beyond arrival order at this hub.
#[derive(Debug, Clone)]
pub struct CollabSession {
    pub code: String,
    pub whiteboard: Vec<Value>,
    pub revision: u64,
}

struct Subscriber {
    user_id: String,
    key: SessionKey,
    sender: mpsc::UnboundedSender<CollabServerEvent>,
}

/// Last-write-wins synchronizer for shared code and whiteboard state.
///
/// One authoritative `CollabSession` per key, fanned out to every
/// subscriber except the writer. A session lives exactly as long as it
/// has subscribers: the last leave persists the final state best effort
/// and evicts the entry.
pub struct CollabHub {
    sessions: RwLock<HashMap<SessionKey, CollabSession>>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    storage: Option<StorageClient>,
    code_template: String,
}

impl CollabHub {
    pub fn new(code_template: String, storage: Option<StorageClient>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            storage,
            code_template,
        })
    }

    /// Subscribe a connection to a session. The first subscriber for a key
    /// loads the authoritative state from storage, falling back to the
    /// default code template. The caller immediately receives the full
    /// initial state. Re-joining with the same connection is a no-op;
    /// joining under a different key leaves the old session first.
    pub async fn join(
        &self,
        key: SessionKey,
        conn_id: &str,
        user_id: &str,
        sender: mpsc::UnboundedSender<CollabServerEvent>,
    ) -> Result<()> {
        let previous_key = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(conn_id) {
                Some(existing) if existing.key == key => {
                    tracing::debug!(conn_id = %conn_id, session = %key, "Already subscribed");
                    return Ok(());
                }
                Some(existing) => Some(existing.key.clone()),
                None => None,
            }
        };
        if let Some(old) = previous_key {
            tracing::debug!(conn_id = %conn_id, from = %old, to = %key, "Switching sessions");
            self.leave(conn_id).await;
        }

        let initial = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&key)
                .map(|session| CollabServerEvent::LoadInitialState {
                    code: session.code.clone(),
                    whiteboard: session.whiteboard.clone(),
                })
        };
        let initial = match initial {
            Some(event) => event,
            None => {
                // Load outside the sessions lock; a slow storage round trip
                // must not stall writes to other sessions.
                let loaded = self.initial_session(&key).await;
                let mut sessions = self.sessions.write().await;
                let session = sessions.entry(key.clone()).or_insert(loaded);
                CollabServerEvent::LoadInitialState {
                    code: session.code.clone(),
                    whiteboard: session.whiteboard.clone(),
                }
            }
        };

        if sender.send(initial).is_err() {
            tracing::debug!(conn_id = %conn_id, "Subscriber gone before initial state");
            return Ok(());
        }

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            conn_id.to_string(),
            Subscriber {
                user_id: user_id.to_string(),
                key: key.clone(),
                sender,
            },
        );
        tracing::info!(
            conn_id = %conn_id,
            user_id = %user_id,
            session = %key,
            subscribers = subscribers.values().filter(|s| s.key == key).count(),
            "Joined collab session"
        );
        Ok(())
    }

    /// Replace the session's code and fan the new value out to every other
    /// subscriber of the same session.
    pub async fn submit_code(&self, conn_id: &str, code: String) -> Result<()> {
        let key = self.key_for(conn_id).await?;
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&key)
                .ok_or_else(|| RtcError::SessionNotFound(key.to_string()))?;
            session.code = code.clone();
            session.revision += 1;
            tracing::debug!(
                session = %key,
                revision = session.revision,
                bytes = code.len(),
                "Code replaced"
            );
        }
        self.broadcast(&key, conn_id, CollabServerEvent::CodeUpdate { code })
            .await;
        Ok(())
    }

    /// Same contract as `submit_code`, for the whole whiteboard element
    /// collection. Whole-document replace, never incremental patches.
    pub async fn submit_whiteboard(&self, conn_id: &str, whiteboard: Vec<Value>) -> Result<()> {
        let key = self.key_for(conn_id).await?;
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&key)
                .ok_or_else(|| RtcError::SessionNotFound(key.to_string()))?;
            session.whiteboard = whiteboard.clone();
            session.revision += 1;
            tracing::debug!(
                session = %key,
                revision = session.revision,
                elements = whiteboard.len(),
                "Whiteboard replaced"
            );
        }
        self.broadcast(
            &key,
            conn_id,
            CollabServerEvent::WhiteboardUpdate { whiteboard },
        )
        .await;
        Ok(())
    }

    /// Drop a subscriber. When the last subscriber of a session leaves the
    /// latest state is persisted best effort and the session is evicted;
    /// the next joiner reloads it from storage.
    pub async fn leave(&self, conn_id: &str) {
        let removed = self.subscribers.write().await.remove(conn_id);
        let Some(subscriber) = removed else {
            return;
        };
        let key = subscriber.key;
        let remaining = self
            .subscribers
            .read()
            .await
            .values()
            .filter(|s| s.key == key)
            .count();
        tracing::info!(
            conn_id = %conn_id,
            user_id = %subscriber.user_id,
            session = %key,
            remaining = remaining,
            "Left collab session"
        );

        if remaining == 0 {
            let evicted = self.sessions.write().await.remove(&key);
            if let (Some(storage), Some(session)) = (&self.storage, &evicted) {
                if let Err(e) = storage.store(&key, &session.code, &session.whiteboard).await {
                    tracing::warn!(session = %key, error = %e, "Failed to persist session");
                }
            }
            if evicted.is_some() {
                tracing::info!(session = %key, "Last subscriber left, session evicted");
            }
        }
    }

    pub async fn subscriber_count(&self, key: &SessionKey) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .filter(|s| s.key == *key)
            .count()
    }

    pub async fn session_snapshot(&self, key: &SessionKey) -> Option<CollabSession> {
        self.sessions.read().await.get(key).cloned()
    }

    async fn initial_session(&self, key: &SessionKey) -> CollabSession {
        if let Some(storage) = &self.storage {
            match storage.load(key).await {
                Ok(Some(stored)) => {
                    tracing::info!(session = %key, "Loaded session state from storage");
                    return CollabSession {
                        code: stored
                            .code
                            .unwrap_or_else(|| self.code_template.clone()),
                        whiteboard: stored.whiteboard.unwrap_or_default(),
                        revision: 0,
                    };
                }
                Ok(None) => {
                    tracing::debug!(session = %key, "No stored state, starting fresh");
                }
                Err(e) => {
                    tracing::warn!(session = %key, error = %e, "Storage load failed, starting fresh");
                }
            }
        }
        CollabSession {
            code: self.code_template.clone(),
            whiteboard: Vec::new(),
            revision: 0,
        }
    }

    async fn key_for(&self, conn_id: &str) -> Result<SessionKey> {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(conn_id)
            .map(|s| s.key.clone())
            .ok_or_else(|| RtcError::SessionNotFound(format!("no subscription for {}", conn_id)))
    }

    async fn broadcast(&self, key: &SessionKey, from_conn: &str, event: CollabServerEvent) {
        let subscribers = self.subscribers.read().await;
        for (conn_id, subscriber) in subscribers.iter() {
            if subscriber.key != *key || conn_id == from_conn {
                continue;
            }
            if subscriber.sender.send(event.clone()).is_err() {
                tracing::debug!(conn_id = %conn_id, "Dropping update for closed subscriber");
            }
        }
    }
}
