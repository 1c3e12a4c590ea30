//! Execution backends.
//!
//! A backend is the surface the agent acts on: a browser page, the physical
//! desktop, or a single background window. Every backend offers the same two
//! operations, `capture` and `execute`, and reports its [`Capabilities`] so the
//! tool registry can reject calls it cannot perform before dispatch.
//!
//! # Invariants
//! - one backend instance is owned by exactly one session
//! - geometry comes from `capture` and is never cached across steps
//! - screenshots live in the backend's [`ScreenshotStore`] for as long as the backend

mod browser;
mod cdp;
mod desktop;
mod input;
mod window;
mod xdo;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::geometry::{GeometryError, SurfaceGeometry};
use crate::safety::SafetyMonitor;
use crate::tools::{Capabilities, ResolvedAction, ValidatedCall};

pub use browser::{BrowserBackend, BrowserDriver};
pub use cdp::CdpBrowser;
pub use desktop::{DesktopBackend, DesktopDriver};
pub use input::{InputDriver, DRAG_STEPS};
pub use window::{
    is_compositing_class, BackgroundWindowBackend, WindowCapture, WindowDirectory,
    WindowHandle, WindowInfo, WindowMessage, WindowMessenger,
};
pub use xdo::XdoDriver;

/// Which kind of surface a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Browser,
    Desktop,
    BackgroundWindow,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browser => write!(f, "browser"),
            Self::Desktop => write!(f, "desktop"),
            Self::BackgroundWindow => write!(f, "background-window"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The surface is gone or was never reachable (closed window, crashed browser).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The surface could not be screenshotted right now.
    #[error("screenshot unavailable: {0}")]
    Capture(String),

    /// An input primitive failed to reach the surface.
    #[error("input delivery failed: {0}")]
    Input(String),

    /// The surface reported a size that cannot anchor coordinates.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The operator tripped the corner trigger while the action was in flight.
    #[error("aborted by safety trigger")]
    SafetyAbort,
}

impl BackendError {
    /// Whether a single bounded re-capture may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Capture(_))
    }
}

/// An opaque screenshot blob, addressed by content hash.
#[derive(Debug, Clone, Serialize)]
pub struct Screenshot {
    pub id: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Arc<[u8]>,
}

fn serialize_base64<S: Serializer>(data: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

impl Screenshot {
    pub fn new(mime: impl Into<String>, width: u32, height: u32, data: Vec<u8>) -> Self {
        let digest = Sha256::digest(&data);
        let mut id = hex::encode(digest);
        id.truncate(16);
        Self {
            id,
            mime: mime.into(),
            width,
            height,
            data: data.into(),
        }
    }

    pub fn png(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new("image/png", width, height, data)
    }

    /// `data:` URL suitable for an `image_url` content part.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }

    pub fn to_ref(&self) -> ScreenshotRef {
        ScreenshotRef {
            id: self.id.clone(),
            mime: self.mime.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

/// Reference to a screenshot held by a [`ScreenshotStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotRef {
    pub id: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// Content-addressed screenshot storage shared between a backend and its session.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotStore {
    shots: Arc<RwLock<HashMap<String, Screenshot>>>,
}

impl ScreenshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a screenshot; identical bytes collapse onto one entry.
    pub async fn insert(&self, screenshot: Screenshot) -> ScreenshotRef {
        let reference = screenshot.to_ref();
        self.shots
            .write()
            .await
            .entry(screenshot.id.clone())
            .or_insert(screenshot);
        reference
    }

    pub async fn get(&self, id: &str) -> Option<Screenshot> {
        self.shots.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.shots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Result of [`Backend::capture`].
#[derive(Debug, Clone)]
pub struct Capture {
    pub screenshot: Screenshot,
    pub geometry: SurfaceGeometry,
}

/// Outcome of one primitive action on a live surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResult {
    pub success: bool,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_geometry: Option<SurfaceGeometry>,
}

impl BackendResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            new_geometry: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            new_geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: SurfaceGeometry) -> Self {
        self.new_geometry = Some(geometry);
        self
    }
}

/// Capability interface shared by the three surfaces.
#[async_trait]
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Shared handle to the screenshots this backend has produced.
    fn screenshots(&self) -> ScreenshotStore;

    /// Screenshot the surface and report its current geometry.
    async fn capture(&mut self) -> Result<Capture, BackendError>;

    /// Perform one validated action at absolute coordinates.
    async fn execute(
        &mut self,
        call: &ValidatedCall,
        action: &ResolvedAction,
    ) -> Result<BackendResult, BackendError>;

    /// Release the surface. Called once when the session ends.
    async fn shutdown(&mut self) {}
}

/// Backend choice carried by a start-session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSelection {
    Browser {
        #[serde(default)]
        start_url: Option<String>,
    },
    Desktop,
    BackgroundWindow {
        handle: WindowHandle,
    },
}

impl BackendSelection {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Browser { .. } => BackendKind::Browser,
            Self::Desktop => BackendKind::Desktop,
            Self::BackgroundWindow { .. } => BackendKind::BackgroundWindow,
        }
    }
}

/// Opens a fresh backend instance for each session.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn open(&self, selection: &BackendSelection) -> Result<Box<dyn Backend>, BackendError>;

    /// Addressable background windows, for picking a target.
    fn windows(&self) -> Result<Vec<WindowInfo>, BackendError>;
}

/// Provider wired to the real drivers.
pub struct SystemBackends {
    config: Arc<Config>,
    messenger: Option<Arc<dyn WindowMessenger>>,
    directory: Option<Arc<dyn WindowDirectory>>,
}

impl SystemBackends {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            messenger: None,
            directory: None,
        }
    }

    /// Install the platform window-message layer used by background-window sessions.
    pub fn with_window_layer(
        mut self,
        messenger: Arc<dyn WindowMessenger>,
        directory: Arc<dyn WindowDirectory>,
    ) -> Self {
        self.messenger = Some(messenger);
        self.directory = Some(directory);
        self
    }
}

#[async_trait]
impl BackendProvider for SystemBackends {
    async fn open(&self, selection: &BackendSelection) -> Result<Box<dyn Backend>, BackendError> {
        match selection {
            BackendSelection::Browser { start_url } => {
                let url = start_url
                    .clone()
                    .unwrap_or_else(|| self.config.browser.start_url.clone());
                let driver = CdpBrowser::launch(&self.config.browser, &url).await?;
                Ok(Box::new(BrowserBackend::new(driver)))
            }
            BackendSelection::Desktop => {
                let driver = XdoDriver::new(self.config.display.clone());
                let monitor = SafetyMonitor::new(self.config.safety.clone());
                Ok(Box::new(DesktopBackend::new(driver, monitor)))
            }
            BackendSelection::BackgroundWindow { handle } => {
                let messenger = self.messenger.clone().ok_or_else(|| {
                    BackendError::Unavailable(
                        "no window-message layer is installed on this host".to_string(),
                    )
                })?;
                let backend = BackgroundWindowBackend::attach(messenger, *handle)?;
                Ok(Box::new(backend))
            }
        }
    }

    fn windows(&self) -> Result<Vec<WindowInfo>, BackendError> {
        match &self.directory {
            Some(directory) => directory.list_windows(),
            None => Err(BackendError::Unavailable(
                "window enumeration is not available on this host".to_string(),
            )),
        }
    }
}
