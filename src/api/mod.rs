//! HTTP API for deskpilot.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/tools` - Tool catalog
//! - `GET /api/windows` - Addressable background windows
//! - `POST /api/sessions` - Start a session
//! - `GET /api/sessions` - List sessions
//! - `GET /api/sessions/{id}` - Session snapshot with history
//! - `GET /api/sessions/{id}/events` - Replay and follow events via SSE
//! - `POST /api/sessions/{id}/resume` - Continue a single-step session
//! - `POST /api/sessions/{id}/abort` - Cancel a session
//! - `GET /api/sessions/{id}/screenshots/{shot_id}` - Raw screenshot bytes

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
