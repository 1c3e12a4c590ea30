//! API request and response types.

use serde::Serialize;
use uuid::Uuid;

use crate::backend::BackendKind;
use crate::session::SessionStatus;

pub use crate::session::StartSession as StartSessionRequest;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether sessions can be started (oracle credentials present).
    pub oracle_configured: bool,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub backend: BackendKind,
    pub max_steps: u32,
}

/// Response to resume and abort.
#[derive(Debug, Clone, Serialize)]
pub struct SessionControlResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
}
