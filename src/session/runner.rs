//! The per-session control loop and the handle used to steer it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{EventKind, EventLog, EventSubscription};
use super::{
    AbortReason, ActionRecord, ErrorKind, Outcome, SessionConfig, SessionError, SessionMode,
    SessionSnapshot, SessionStatus,
};
use crate::backend::{
    Backend, BackendError, BackendKind, BackendResult, Capture, ScreenshotStore,
};
use crate::oracle::{Oracle, OracleReply, OracleRequest};
use crate::tools::{ResolvedAction, ToolRegistry};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared view of a running or finished session.
pub struct SessionHandle {
    pub id: Uuid,
    pub task: String,
    pub mode: SessionMode,
    pub backend: BackendKind,
    pub max_steps: u32,
    pub created_at: DateTime<Utc>,
    status: watch::Receiver<SessionStatus>,
    events: Arc<EventLog>,
    history: Arc<RwLock<Vec<ActionRecord>>>,
    outcome: Arc<RwLock<Option<Outcome>>>,
    screenshots: ScreenshotStore,
    resume_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Let a single-step session run its next step.
    pub fn resume(&self) -> Result<(), SessionError> {
        let status = self.status();
        if status != SessionStatus::AwaitingConfirmation {
            return Err(SessionError::NotAwaitingConfirmation { status });
        }
        // Capacity one: a second resume before the loop picks up the first is refused.
        self.resume_tx
            .try_send(())
            .map_err(|_| SessionError::NotAwaitingConfirmation { status })
    }

    /// Request cancellation. Takes effect at the loop's next suspension point.
    pub fn abort(&self) -> Result<(), SessionError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(SessionError::AlreadyFinished { status });
        }
        tracing::info!(session_id = %self.id, "Abort requested");
        self.cancel.cancel();
        Ok(())
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn screenshots(&self) -> &ScreenshotStore {
        &self.screenshots
    }

    pub async fn outcome(&self) -> Option<Outcome> {
        self.outcome.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let history = self.history.read().await.clone();
        SessionSnapshot {
            session_id: self.id,
            task: self.task.clone(),
            mode: self.mode,
            backend: self.backend,
            status: self.status(),
            max_steps: self.max_steps,
            steps: history.len(),
            history,
            outcome: self.outcome().await,
            created_at: self.created_at,
        }
    }

    /// Wait until the session reaches a terminal status.
    pub async fn wait(&self) -> SessionStatus {
        let mut rx = self.status.clone();
        let result = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        result
    }

    /// Wait until the session is paused for confirmation or finished.
    pub async fn wait_for_pause(&self) -> SessionStatus {
        let mut rx = self.status.clone();
        let result = match rx
            .wait_for(|status| {
                *status == SessionStatus::AwaitingConfirmation || status.is_terminal()
            })
            .await
        {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        result
    }
}

/// Start the control loop on its own task.
pub fn spawn_session(
    config: SessionConfig,
    backend: Box<dyn Backend>,
    oracle: Arc<dyn Oracle>,
    registry: Arc<ToolRegistry>,
) -> Arc<SessionHandle> {
    let id = Uuid::new_v4();
    let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
    let (resume_tx, resume_rx) = mpsc::channel(1);
    let events = EventLog::new(id);
    let history = Arc::new(RwLock::new(Vec::new()));
    let outcome = Arc::new(RwLock::new(None));
    let cancel = CancellationToken::new();

    let handle = Arc::new(SessionHandle {
        id,
        task: config.task.clone(),
        mode: config.mode,
        backend: backend.kind(),
        max_steps: config.max_steps,
        created_at: Utc::now(),
        status: status_rx,
        events: events.clone(),
        history: history.clone(),
        outcome: outcome.clone(),
        screenshots: backend.screenshots(),
        resume_tx,
        cancel: cancel.clone(),
    });

    let runner = SessionRunner {
        id,
        config,
        backend,
        oracle,
        registry,
        status_tx,
        events,
        records: Vec::new(),
        history,
        outcome,
        resume_rx,
        cancel,
    };
    tokio::spawn(runner.run());
    handle
}

enum Step {
    Continue,
    Finished(Outcome),
}

struct SessionRunner {
    id: Uuid,
    config: SessionConfig,
    backend: Box<dyn Backend>,
    oracle: Arc<dyn Oracle>,
    registry: Arc<ToolRegistry>,
    status_tx: watch::Sender<SessionStatus>,
    events: Arc<EventLog>,
    /// Local copy the oracle reads from; `history` mirrors it for observers.
    records: Vec<ActionRecord>,
    history: Arc<RwLock<Vec<ActionRecord>>>,
    outcome: Arc<RwLock<Option<Outcome>>>,
    resume_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl SessionRunner {
    async fn run(mut self) {
        tracing::info!(
            session_id = %self.id,
            backend = %self.backend.kind(),
            mode = ?self.config.mode,
            max_steps = self.config.max_steps,
            "Session started"
        );
        self.status_tx.send_replace(SessionStatus::Running);
        self.events.emit(
            None,
            EventKind::Started {
                task: self.config.task.clone(),
                mode: self.config.mode,
                backend: self.backend.kind(),
                max_steps: self.config.max_steps,
            },
        );

        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(session_id = %self.id, "Session cancelled");
                Outcome::aborted(AbortReason::Cancelled)
            }
            outcome = self.drive() => outcome,
        };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.backend.shutdown())
            .await
            .is_err()
        {
            tracing::warn!(session_id = %self.id, "Backend shutdown timed out");
        }
        self.finish(outcome).await;
    }

    async fn finish(&mut self, outcome: Outcome) {
        tracing::info!(
            session_id = %self.id,
            status = %outcome.status,
            reason = ?outcome.reason,
            steps = self.records.len(),
            "Session finished"
        );
        *self.outcome.write().await = Some(outcome.clone());
        let status = outcome.status;
        self.events
            .emit(self.records.last().map(|r| r.step_index), EventKind::Finished(outcome));
        self.status_tx.send_replace(status);
    }

    async fn drive(&mut self) -> Outcome {
        let mut index: u32 = 0;
        loop {
            match self.step(index).await {
                Ok(Step::Continue) => {}
                Ok(Step::Finished(outcome)) | Err(outcome) => return outcome,
            }
            index += 1;

            if index >= self.config.max_steps {
                tracing::info!(session_id = %self.id, steps = index, "Step limit reached");
                return Outcome::aborted(AbortReason::StepLimit);
            }

            if self.config.mode == SessionMode::SingleStep {
                // A resume left over from the previous pause must not skip this one.
                while self.resume_rx.try_recv().is_ok() {}
                self.status_tx
                    .send_replace(SessionStatus::AwaitingConfirmation);
                self.events
                    .emit(Some(index - 1), EventKind::AwaitingConfirmation);
                if self.resume_rx.recv().await.is_none() {
                    return Outcome::aborted(AbortReason::Cancelled);
                }
                self.status_tx.send_replace(SessionStatus::Running);
                self.events.emit(Some(index), EventKind::Resumed);
            }
        }
    }

    async fn step(&mut self, index: u32) -> Result<Step, Outcome> {
        self.events.emit(Some(index), EventKind::StepStarted);

        let capture = self
            .capture()
            .await
            .map_err(|e| self.backend_failure(index, e))?;

        let reply = self
            .oracle
            .ask(OracleRequest {
                screenshot: &capture.screenshot,
                instruction: &self.config.task,
                history: &self.records,
            })
            .await
            .map_err(|e| {
                self.fail(
                    index,
                    ErrorKind::Backend,
                    format!("oracle unavailable: {}", e),
                )
            })?;

        let mut calls = match reply {
            OracleReply::Terminate { message } => {
                tracing::info!(
                    session_id = %self.id,
                    step = index,
                    "Oracle ended the task without a tool call"
                );
                let summary = (!message.trim().is_empty()).then_some(message);
                return Ok(Step::Finished(Outcome::completed(summary, true)));
            }
            OracleReply::ToolCalls(calls) => calls,
        };
        if calls.is_empty() {
            return Ok(Step::Finished(Outcome::completed(None, true)));
        }
        if calls.len() > 1 {
            let message = format!(
                "oracle returned {} tool calls; executing only '{}'",
                calls.len(),
                calls[0].name
            );
            tracing::warn!(session_id = %self.id, step = index, "{}", message);
            self.events.emit(Some(index), EventKind::Warning { message });
        }
        let call = calls.swap_remove(0);

        let validated = self
            .registry
            .validate(&call, self.backend.kind(), self.backend.capabilities())
            .map_err(|e| self.fail(index, ErrorKind::Validation, e.to_string()))?;

        let action = validated
            .action
            .resolve(&capture.geometry)
            .map_err(|e| self.fail(index, ErrorKind::Geometry, e.to_string()))?;

        tracing::debug!(session_id = %self.id, step = index, tool = %validated.tool, "Dispatching");
        let result = match &action {
            ResolvedAction::Wait { seconds } => {
                tokio::time::sleep(Duration::from_secs_f64(*seconds)).await;
                BackendResult::ok(format!("waited {}s", seconds))
            }
            ResolvedAction::TaskComplete { .. } => BackendResult::ok("task marked complete"),
            _ => match self.backend.execute(&validated, &action).await {
                Ok(result) => result,
                Err(BackendError::SafetyAbort) => {
                    let message = BackendError::SafetyAbort.to_string();
                    tracing::warn!(session_id = %self.id, step = index, "Safety trigger fired");
                    self.events.emit(
                        Some(index),
                        EventKind::Error {
                            kind: ErrorKind::SafetyAbort,
                            message: message.clone(),
                        },
                    );
                    return Err(Outcome::aborted(AbortReason::SafetyTrigger)
                        .with_cause(ErrorKind::SafetyAbort, message));
                }
                Err(e) => return Err(self.backend_failure(index, e)),
            },
        };
        if !result.success {
            tracing::warn!(
                session_id = %self.id,
                step = index,
                detail = %result.detail,
                "Action reported failure"
            );
        }

        let after = match &action {
            ResolvedAction::TaskComplete { .. } => capture,
            _ => self
                .capture()
                .await
                .map_err(|e| self.backend_failure(index, e))?,
        };

        let record = ActionRecord {
            step_index: index,
            tool_call: call,
            absolute_coordinates: action.points(),
            result,
            screenshot: Some(after.screenshot.to_ref()),
            timestamp: Utc::now(),
        };
        self.records.push(record.clone());
        self.history.write().await.push(record.clone());
        self.events.emit(
            Some(index),
            EventKind::Progress {
                record,
                screenshot: after.screenshot,
            },
        );

        match action {
            ResolvedAction::TaskComplete { summary, success } => {
                Ok(Step::Finished(Outcome::completed(summary, success)))
            }
            _ => Ok(Step::Continue),
        }
    }

    /// Capture with one bounded retry on transient failure.
    async fn capture(&mut self) -> Result<Capture, BackendError> {
        match self.backend.capture().await {
            Ok(capture) => Ok(capture),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    session_id = %self.id,
                    error = %e,
                    "Screenshot failed, retrying once"
                );
                tokio::time::sleep(self.config.recapture_delay).await;
                self.backend.capture().await
            }
            Err(e) => Err(e),
        }
    }

    fn backend_failure(&self, index: u32, error: BackendError) -> Outcome {
        let kind = match error {
            BackendError::Geometry(_) => ErrorKind::Geometry,
            _ => ErrorKind::Backend,
        };
        self.fail(index, kind, error.to_string())
    }

    fn fail(&self, index: u32, kind: ErrorKind, message: String) -> Outcome {
        tracing::error!(session_id = %self.id, step = index, kind = ?kind, "{}", message);
        self.events.emit(
            Some(index),
            EventKind::Error {
                kind,
                message: message.clone(),
            },
        );
        Outcome::failed(kind, message)
    }
}
