//! Session Store
//!
//! Storage abstraction for sessions and their history. The tutor only ever
//! creates a session, reads a snapshot of it, or appends a finished message,
//! so that is the whole capability surface.
//!
//! [`InMemorySessionStore`] keeps everything in process memory for the
//! lifetime of the daemon. A durable store can be swapped in by implementing
//! [`SessionStore`]; nothing in the multiplexer or reassembler depends on it.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::messages::SessionId;
use crate::session::{ConversationMessage, Session, SessionSettings};

/// Errors raised by a session store
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No session with this identifier exists
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

/// Session storage capability
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session with a fresh identifier
    async fn create(&self, settings: SessionSettings) -> Session;

    /// Fetch a snapshot of a session and its full history
    async fn get(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Append a message to a session's history
    async fn append(&self, id: &SessionId, message: ConversationMessage) -> Result<(), StoreError>;

    /// Whether a session exists
    async fn contains(&self, id: &SessionId) -> bool {
        self.get(id).await.is_ok()
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn create(&self, settings: SessionSettings) -> Session {
        (**self).create(settings).await
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        (**self).get(id).await
    }

    async fn append(&self, id: &SessionId, message: ConversationMessage) -> Result<(), StoreError> {
        (**self).append(id, message).await
    }

    async fn contains(&self, id: &SessionId) -> bool {
        (**self).contains(id).await
    }
}

/// Process-lifetime, in-memory session store
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, settings: SessionSettings) -> Session {
        let session = Session::new(settings);
        self.sessions.insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, total = self.sessions.len(), "Session created");
        session
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn append(&self, id: &SessionId, message: ConversationMessage) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        entry.push(message);
        Ok(())
    }

    async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }
}
