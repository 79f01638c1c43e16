//! SessionRunner: convenience wrapper that looks a session up, locks it, runs
//! **one** operation against it and releases it.
//!
//! Sessions live in storage behind a per-session mutex, so there is no
//! explicit save step: the mutation is visible to the next request as soon as
//! the lock is dropped. Two requests for the same session queue on that
//! lock; requests for different sessions never contend.
//!
//! ## Usage in a stateless HTTP service
//! Create the runner once at startup and share it across requests:
//! ```rust,ignore
//! struct AppState {
//!     runner: SessionRunner,
//! }
//!
//! // In request handler
//! let reply = state.runner.submit(&session_id, &content).await?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::{
    error::{FlowError, Result},
    explain::Explanation,
    ranker::Ranking,
    session::{PatentFinder, PatentSession, TurnReply},
    storage::{SessionHandle, SessionStorage},
};

/// High-level helper that orchestrates the common _lookup → lock → run_ pattern.
#[derive(Clone)]
pub struct SessionRunner {
    finder: Arc<PatentFinder>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionRunner {
    pub fn new(finder: Arc<PatentFinder>, storage: Arc<dyn SessionStorage>) -> Self {
        Self { finder, storage }
    }

    /// Starts a new session and returns its id.
    pub async fn create(&self) -> Result<String> {
        let session = PatentSession::new();
        let id = session.id().to_string();
        self.storage.save(session).await?;
        info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Shared handle for read-only inspection; lock it to read.
    pub async fn session(&self, session_id: &str) -> Result<SessionHandle> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }

    /// Feeds one user turn to the session.
    pub async fn submit(&self, session_id: &str, text: &str) -> Result<TurnReply> {
        let handle = self.session(session_id).await?;
        let mut session = handle.lock().await;
        Ok(self.finder.submit_turn(&mut session, text).await)
    }

    pub async fn ranked_results(&self, session_id: &str) -> Result<Option<Ranking>> {
        let handle = self.session(session_id).await?;
        let session = handle.lock().await;
        Ok(self.finder.ranked_results(&session))
    }

    pub async fn explanations(&self, session_id: &str, n: usize) -> Result<Option<Vec<Explanation>>> {
        let handle = self.session(session_id).await?;
        let mut session = handle.lock().await;
        Ok(self.finder.explanations(&mut session, n).await)
    }

    /// Ends the session. Its state is discarded.
    pub async fn end(&self, session_id: &str) -> Result<()> {
        if self.storage.delete(session_id).await? {
            info!(session_id = %session_id, "Session ended");
            Ok(())
        } else {
            Err(FlowError::SessionNotFound(session_id.to_string()))
        }
    }
}
