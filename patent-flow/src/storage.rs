use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{error::Result, session::PatentSession};

/// Shared handle to one live session. Holding the lock is the only way to
/// mutate it, so requests for the same session run one at a time.
pub type SessionHandle = Arc<Mutex<PatentSession>>;

/// Trait for storing and retrieving live sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: PatentSession) -> Result<SessionHandle>;
    async fn get(&self, id: &str) -> Result<Option<SessionHandle>>;
    /// Returns whether a session was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// In-memory implementation of SessionStorage
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: PatentSession) -> Result<SessionHandle> {
        let id = session.id().to_string();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    async fn get(&self, id: &str) -> Result<Option<SessionHandle>> {
        Ok(self.sessions.get(id).map(|entry| Arc::clone(entry.value())))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.remove(id).is_some())
    }
}
