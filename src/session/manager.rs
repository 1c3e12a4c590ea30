//! Registry of sessions, keyed by id.
//!
//! Finished sessions stay registered so their history and events remain
//! readable, up to a retention cap; the oldest finished sessions are evicted
//! first. Each started session gets a fresh backend from the provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::runner::{spawn_session, SessionHandle};
use super::{SessionConfig, SessionError, SessionMode, SessionStatus};

/// Finished sessions kept in memory when no cap is configured.
pub const DEFAULT_FINISHED_RETENTION: usize = 50;
use crate::backend::{BackendKind, BackendProvider, BackendSelection, WindowInfo};
use crate::oracle::Oracle;
use crate::tools::ToolRegistry;

/// Request to start a session.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSession {
    pub task: String,
    #[serde(default)]
    pub mode: SessionMode,
    pub backend: BackendSelection,
    #[serde(default)]
    pub max_steps: Option<u32>,
}

/// One line of the session list.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub task: String,
    pub mode: SessionMode,
    pub backend: BackendKind,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    provider: Arc<dyn BackendProvider>,
    oracle: Option<Arc<dyn Oracle>>,
    registry: Arc<ToolRegistry>,
    default_max_steps: u32,
    recapture_delay: Duration,
    finished_retention: usize,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn BackendProvider>,
        oracle: Option<Arc<dyn Oracle>>,
        default_max_steps: u32,
        recapture_delay: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            provider,
            oracle,
            registry: Arc::new(ToolRegistry::new()),
            default_max_steps: default_max_steps.max(1),
            recapture_delay,
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }

    /// Cap the number of finished sessions kept for inspection.
    pub fn with_finished_retention(mut self, retention: usize) -> Self {
        self.finished_retention = retention;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Bind a backend and start the loop. Returns once the session is registered.
    pub async fn start(&self, request: StartSession) -> Result<Arc<SessionHandle>, SessionError> {
        if request.task.trim().is_empty() {
            return Err(SessionError::InvalidRequest("task must not be empty".to_string()));
        }
        if request.max_steps == Some(0) {
            return Err(SessionError::InvalidRequest(
                "max_steps must be at least 1".to_string(),
            ));
        }
        let oracle = self.oracle.clone().ok_or(SessionError::OracleUnavailable)?;
        let backend = self.provider.open(&request.backend).await?;

        let mut config = SessionConfig::new(
            request.task,
            request.mode,
            request.max_steps.unwrap_or(self.default_max_steps),
        );
        config.recapture_delay = self.recapture_delay;

        let handle = spawn_session(config, backend, oracle, self.registry.clone());
        tracing::info!(
            session_id = %handle.id,
            backend = %handle.backend,
            "Session registered"
        );
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.id, handle.clone());
        evict_finished(&mut sessions, self.finished_retention);
        Ok(handle)
    }

    /// Drop the oldest finished sessions beyond the retention cap.
    pub async fn prune_finished(&self) -> usize {
        evict_finished(&mut *self.sessions.write().await, self.finished_retention)
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// All sessions, newest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(|handle| SessionSummary {
                session_id: handle.id,
                task: handle.task.clone(),
                mode: handle.mode,
                backend: handle.backend,
                status: handle.status(),
                created_at: handle.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub async fn resume(&self, id: Uuid) -> Result<(), SessionError> {
        self.get(id).await?.resume()
    }

    pub async fn abort(&self, id: Uuid) -> Result<(), SessionError> {
        self.get(id).await?.abort()
    }

    pub fn windows(&self) -> Result<Vec<WindowInfo>, SessionError> {
        Ok(self.provider.windows()?)
    }

    /// Cancel every live session and wait up to `grace` for their backends
    /// to be released. Used on server shutdown.
    pub async fn abort_all(&self, grace: Duration) {
        let live: Vec<Arc<SessionHandle>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|handle| !handle.status().is_terminal())
            .cloned()
            .collect();
        if live.is_empty() {
            return;
        }
        for handle in &live {
            if let Err(e) = handle.abort() {
                tracing::warn!(session_id = %handle.id, error = %e, "Abort on shutdown failed");
            }
        }
        let finished = futures::future::join_all(live.iter().map(|handle| handle.wait()));
        if tokio::time::timeout(grace, finished).await.is_err() {
            tracing::warn!(
                sessions = live.len(),
                "Sessions still running at shutdown deadline"
            );
        }
    }
}

fn evict_finished(sessions: &mut HashMap<Uuid, Arc<SessionHandle>>, keep: usize) -> usize {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = sessions
        .values()
        .filter(|handle| handle.status().is_terminal())
        .map(|handle| (handle.created_at, handle.id))
        .collect();
    if finished.len() <= keep {
        return 0;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in &finished[..excess] {
        sessions.remove(id);
        tracing::debug!(session_id = %id, "Evicted finished session");
    }
    excess
}
