//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::types::*;
use crate::backend::{BackendError, SystemBackends, WindowInfo};
use crate::config::Config;
use crate::llm::OpenRouterClient;
use crate::oracle::{LlmOracle, Oracle};
use crate::session::{SessionError, SessionEvent, SessionManager, SessionSnapshot, SessionSummary};
use crate::tools::ToolInfo;

/// How long shutdown waits for live sessions to release their backends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Shared application state.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    /// Wire the real oracle and backends from configuration.
    pub fn from_config(config: Arc<Config>) -> Self {
        let oracle: Option<Arc<dyn Oracle>> = match &config.llm.api_key {
            Some(key) => {
                let client =
                    OpenRouterClient::with_base_url(key.clone(), config.llm.base_url.clone());
                Some(Arc::new(LlmOracle::new(
                    Arc::new(client),
                    config.llm.model.clone(),
                    config.history_window,
                )))
            }
            None => {
                tracing::warn!("No LLM API key configured; sessions cannot be started");
                None
            }
        };
        let provider = Arc::new(SystemBackends::new(config.clone()));
        let sessions = Arc::new(
            SessionManager::new(provider, oracle, config.max_steps, config.recapture_delay)
                .with_finished_retention(config.finished_retention),
        );
        Self { config, sessions }
    }
}

/// Start the HTTP server and run until interrupted.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(AppState::from_config(config.clone()));
    let sessions = state.sessions.clone();
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(model = %config.llm.model, "Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.abort_all(SHUTDOWN_GRACE).await;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/windows", get(list_windows))
        .route("/api/sessions", post(start_session).get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/events", get(stream_events))
        .route("/api/sessions/:id/resume", post(resume_session))
        .route("/api/sessions/:id/abort", post(abort_session))
        .route(
            "/api/sessions/:id/screenshots/:shot_id",
            get(get_screenshot),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn error_response(error: SessionError) -> (StatusCode, String) {
    let status = match &error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::NotAwaitingConfirmation { .. } | SessionError::AlreadyFinished { .. } => {
            StatusCode::CONFLICT
        }
        SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SessionError::OracleUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Backend(BackendError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Backend(_) => StatusCode::BAD_GATEWAY,
    };
    (status, error.to_string())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        oracle_configured: state.config.llm.api_key.is_some(),
        model: state.config.llm.model.clone(),
    })
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    Json(state.sessions.registry().list_tools())
}

async fn list_windows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WindowInfo>>, (StatusCode, String)> {
    state.sessions.windows().map(Json).map_err(error_response)
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), (StatusCode, String)> {
    let handle = state.sessions.start(req).await.map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: handle.id,
            status: handle.status(),
            backend: handle.backend,
            max_steps: handle.max_steps,
        }),
    ))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list().await)
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    let handle = state.sessions.get(id).await.map_err(error_response)?;
    Ok(Json(handle.snapshot().await))
}

async fn resume_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionControlResponse>, (StatusCode, String)> {
    let handle = state.sessions.get(id).await.map_err(error_response)?;
    handle.resume().map_err(error_response)?;
    Ok(Json(SessionControlResponse {
        session_id: id,
        status: handle.status(),
    }))
}

async fn abort_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionControlResponse>, (StatusCode, String)> {
    let handle = state.sessions.get(id).await.map_err(error_response)?;
    handle.abort().map_err(error_response)?;
    Ok(Json(SessionControlResponse {
        session_id: id,
        status: handle.wait().await,
    }))
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let handle = state.sessions.get(id).await.map_err(error_response)?;
    let stream = handle.subscribe().into_stream().map(|event| Ok(to_sse(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &SessionEvent) -> Event {
    let sse = Event::default()
        .event(event.kind.name())
        .id(event.seq.to_string());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => {
            tracing::error!(seq = event.seq, "Failed to serialize event: {}", e);
            sse.data("{}")
        }
    }
}

async fn get_screenshot(
    State(state): State<Arc<AppState>>,
    Path((id, shot_id)): Path<(Uuid, String)>,
) -> Result<Response, (StatusCode, String)> {
    let handle = state.sessions.get(id).await.map_err(error_response)?;
    let shot = handle
        .screenshots()
        .get(&shot_id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("screenshot {} not found", shot_id)))?;
    Ok((
        [(header::CONTENT_TYPE, shot.mime.clone())],
        Bytes::copy_from_slice(&shot.data),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::backend::{
        Backend, BackendKind, BackendProvider, BackendResult, BackendSelection, Capture,
        Screenshot, ScreenshotStore,
    };
    use crate::geometry::SurfaceGeometry;
    use crate::oracle::{OracleError, OracleReply, OracleRequest};
    use crate::session::{SessionMode, SessionStatus, StartSession};
    use crate::tools::{Capabilities, ResolvedAction, ToolCall, ValidatedCall};

    struct StillBackend {
        store: ScreenshotStore,
    }

    #[async_trait]
    impl Backend for StillBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Desktop
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::ALL
        }

        fn screenshots(&self) -> ScreenshotStore {
            self.store.clone()
        }

        async fn capture(&mut self) -> Result<Capture, BackendError> {
            let screenshot = Screenshot::png(640, 480, b"frame".to_vec());
            self.store.insert(screenshot.clone()).await;
            Ok(Capture {
                screenshot,
                geometry: SurfaceGeometry::new(640, 480),
            })
        }

        async fn execute(
            &mut self,
            _call: &ValidatedCall,
            _action: &ResolvedAction,
        ) -> Result<BackendResult, BackendError> {
            Ok(BackendResult::ok("done"))
        }
    }

    struct Provider;

    #[async_trait]
    impl BackendProvider for Provider {
        async fn open(
            &self,
            _selection: &BackendSelection,
        ) -> Result<Box<dyn Backend>, BackendError> {
            Ok(Box::new(StillBackend {
                store: ScreenshotStore::new(),
            }))
        }

        fn windows(&self) -> Result<Vec<WindowInfo>, BackendError> {
            Err(BackendError::Unavailable("no window layer".into()))
        }
    }

    struct Clicker;

    #[async_trait]
    impl Oracle for Clicker {
        async fn ask(&self, _request: OracleRequest<'_>) -> Result<OracleReply, OracleError> {
            Ok(OracleReply::ToolCalls(vec![ToolCall::new(
                "mouse_click",
                json!({ "x": 10, "y": 10 }),
            )]))
        }
    }

    fn state() -> Arc<AppState> {
        let sessions = SessionManager::new(
            Arc::new(Provider),
            Some(Arc::new(Clicker)),
            2,
            Duration::from_millis(1),
        );
        Arc::new(AppState {
            config: Arc::new(Config::default()),
            sessions: Arc::new(sessions),
        })
    }

    fn start_request(mode: SessionMode) -> StartSession {
        StartSession {
            task: "click the corner".to_string(),
            mode,
            backend: BackendSelection::Desktop,
            max_steps: None,
        }
    }

    #[test]
    fn test_error_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(error_response(SessionError::NotFound(id)).0, StatusCode::NOT_FOUND);
        assert_eq!(
            error_response(SessionError::NotAwaitingConfirmation {
                status: SessionStatus::Running
            })
            .0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_response(SessionError::OracleUnavailable).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(SessionError::Backend(BackendError::Input("x".into()))).0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_handlers() {
        let state = state();
        let (code, Json(started)) =
            start_session(State(state.clone()), Json(start_request(SessionMode::Autonomous)))
                .await
                .unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(started.max_steps, 2);

        let handle = state.sessions.get(started.session_id).await.unwrap();
        assert_eq!(handle.wait().await, SessionStatus::Aborted);

        let Json(snapshot) = get_session(State(state.clone()), Path(started.session_id))
            .await
            .unwrap();
        assert_eq!(snapshot.steps, 2);
        let shot_id = snapshot.history[0].screenshot.as_ref().unwrap().id.clone();

        let response = get_screenshot(State(state.clone()), Path((started.session_id, shot_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let Err((code, _)) = get_screenshot(
            State(state.clone()),
            Path((started.session_id, "nope".to_string())),
        )
        .await
        else {
            panic!("expected a missing screenshot");
        };
        assert_eq!(code, StatusCode::NOT_FOUND);

        let conflict = resume_session(State(state.clone()), Path(started.session_id))
            .await
            .unwrap_err();
        assert_eq!(conflict.0, StatusCode::CONFLICT);

        let Json(list) = list_sessions(State(state)).await;
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_single_step_session() {
        let state = state();
        let (_, Json(started)) =
            start_session(State(state.clone()), Json(start_request(SessionMode::SingleStep)))
                .await
                .unwrap();
        let handle = state.sessions.get(started.session_id).await.unwrap();
        assert_eq!(
            handle.wait_for_pause().await,
            SessionStatus::AwaitingConfirmation
        );

        let Json(aborted) = abort_session(State(state.clone()), Path(started.session_id))
            .await
            .unwrap();
        assert_eq!(aborted.status, SessionStatus::Aborted);
    }

    #[tokio::test]
    async fn test_windows_unavailable() {
        let err = list_windows(State(state())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_event_frames_carry_type_and_seq() {
        let state = state();
        let (_, Json(started)) =
            start_session(State(state.clone()), Json(start_request(SessionMode::Autonomous)))
                .await
                .unwrap();
        let handle = state.sessions.get(started.session_id).await.unwrap();
        handle.wait().await;

        let events = handle.events().snapshot();
        assert_eq!(events.first().unwrap().kind.name(), "started");
        assert_eq!(events.last().unwrap().kind.name(), "finished");
        // Building the frame must not panic for any event kind.
        for event in &events {
            let _ = to_sse(event);
        }
    }
}
