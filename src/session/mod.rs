//! Agent sessions.
//!
//! A session is one bounded run of the control loop against one task and one
//! bound backend: observe, ask the oracle, validate, dispatch, record, emit,
//! then continue or stop.
//!
//! # Invariants
//! - steps within a session never overlap
//! - history is written only by the session's own loop
//! - exactly one terminal event closes the event log

mod events;
mod manager;
mod runner;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::{BackendError, BackendKind, BackendResult, ScreenshotRef};
use crate::geometry::AbsolutePoint;
use crate::tools::ToolCall;

pub use events::{EventKind, EventLog, EventSubscription, SessionEvent};
pub use manager::{SessionManager, SessionSummary, StartSession, DEFAULT_FINISHED_RETENTION};
pub use runner::{spawn_session, SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Pause for an external resume after every step.
    SingleStep,
    #[default]
    Autonomous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    AwaitingConfirmation,
    Completed,
    Aborted,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    StepLimit,
    SafetyTrigger,
    Cancelled,
}

/// Failure taxonomy carried on error and terminal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Backend,
    Geometry,
    SafetyAbort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: ErrorKind,
    pub message: String,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AbortReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl Outcome {
    pub fn completed(summary: Option<String>, success: bool) -> Self {
        Self {
            status: SessionStatus::Completed,
            reason: None,
            cause: None,
            summary,
            success: Some(success),
        }
    }

    pub fn aborted(reason: AbortReason) -> Self {
        Self {
            status: SessionStatus::Aborted,
            reason: Some(reason),
            cause: None,
            summary: None,
            success: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Failed,
            reason: None,
            cause: Some(FailureCause {
                kind,
                message: message.into(),
            }),
            summary: None,
            success: None,
        }
    }

    pub fn with_cause(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.cause = Some(FailureCause {
            kind,
            message: message.into(),
        });
        self
    }
}

/// One executed step. Append-only; owned by the session that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step_index: u32,
    pub tool_call: ToolCall,
    pub absolute_coordinates: Vec<AbsolutePoint>,
    pub result: BackendResult,
    /// Screenshot taken after the action.
    pub screenshot: Option<ScreenshotRef>,
    pub timestamp: DateTime<Utc>,
}

/// Per-session settings fixed at start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub task: String,
    pub mode: SessionMode,
    pub max_steps: u32,
    pub recapture_delay: Duration,
}

impl SessionConfig {
    pub fn new(task: impl Into<String>, mode: SessionMode, max_steps: u32) -> Self {
        Self {
            task: task.into(),
            mode,
            max_steps: max_steps.max(1),
            recapture_delay: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub task: String,
    pub mode: SessionMode,
    pub backend: BackendKind,
    pub status: SessionStatus,
    pub max_steps: u32,
    pub steps: usize,
    pub history: Vec<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session is {status}, not awaiting confirmation")]
    NotAwaitingConfirmation { status: SessionStatus },

    #[error("session already finished as {status}")]
    AlreadyFinished { status: SessionStatus },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no oracle configured (set LLM_API_KEY or OPENROUTER_API_KEY)")]
    OracleUnavailable,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::AwaitingConfirmation.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(Outcome::aborted(AbortReason::StepLimit)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "status": "aborted", "reason": "step_limit" })
        );
        let json =
            serde_json::to_value(Outcome::failed(ErrorKind::Validation, "bad call")).unwrap();
        assert_eq!(json["cause"]["kind"], "validation");
    }
}
