//! Desktop backend: live input on the full physical display, guarded by the
//! corner trigger.

use std::sync::Arc;

use async_trait::async_trait;

use super::input::{perform, InputDriver};
use super::{
    Backend, BackendError, BackendKind, BackendResult, Capture, Screenshot, ScreenshotStore,
};
use crate::geometry::SurfaceGeometry;
use crate::safety::{CursorProbe, SafetyMonitor};
use crate::tools::{Capabilities, ResolvedAction, ValidatedCall};

#[async_trait]
pub trait DesktopDriver: InputDriver {
    /// Full screen resolution.
    async fn display_geometry(&mut self) -> Result<SurfaceGeometry, BackendError>;

    async fn screenshot_png(&mut self) -> Result<Vec<u8>, BackendError>;

    /// Independent handle for sampling the cursor while input is in flight.
    fn cursor_probe(&self) -> Arc<dyn CursorProbe>;
}

pub struct DesktopBackend<D> {
    driver: D,
    monitor: SafetyMonitor,
    store: ScreenshotStore,
}

impl<D: DesktopDriver> DesktopBackend<D> {
    pub fn new(driver: D, monitor: SafetyMonitor) -> Self {
        Self {
            driver,
            monitor,
            store: ScreenshotStore::new(),
        }
    }
}

#[async_trait]
impl<D: DesktopDriver> Backend for DesktopBackend<D> {
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
        let geometry = self.driver.display_geometry().await?;
        geometry.validate()?;
        let png = self.driver.screenshot_png().await?;
        let screenshot = Screenshot::png(geometry.width_px as u32, geometry.height_px as u32, png);
        self.store.insert(screenshot.clone()).await;
        Ok(Capture {
            screenshot,
            geometry,
        })
    }

    async fn execute(
        &mut self,
        call: &ValidatedCall,
        action: &ResolvedAction,
    ) -> Result<BackendResult, BackendError> {
        let geometry = self.driver.display_geometry().await?;
        let guard = self.monitor.arm(self.driver.cursor_probe(), geometry);
        tracing::debug!(tool = %call.tool, "Desktop action (safety armed)");

        let outcome = tokio::select! {
            biased;
            _ = guard.triggered() => Err(BackendError::SafetyAbort),
            result = perform(&mut self.driver, action) => result,
        };

        // A trigger racing with completion still wins.
        if guard.is_triggered() {
            return Err(BackendError::SafetyAbort);
        }
        drop(guard);
        outcome.map(|result| result.with_geometry(geometry))
    }
}
