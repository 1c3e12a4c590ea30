//! Browser backend: an isolated browser context, addressed in CSS viewport pixels.

use async_trait::async_trait;

use super::input::{perform, InputDriver};
use super::{
    Backend, BackendError, BackendKind, BackendResult, Capture, Screenshot, ScreenshotStore,
};
use crate::geometry::SurfaceGeometry;
use crate::tools::{Capabilities, ResolvedAction, ValidatedCall};

/// A controllable browser page.
#[async_trait]
pub trait BrowserDriver: InputDriver {
    /// Current viewport size in CSS pixels.
    async fn viewport(&mut self) -> Result<SurfaceGeometry, BackendError>;

    /// PNG of the visible viewport.
    async fn screenshot_png(&mut self) -> Result<Vec<u8>, BackendError>;

    async fn close(&mut self) {}
}

pub struct BrowserBackend<D> {
    driver: D,
    store: ScreenshotStore,
}

impl<D: BrowserDriver> BrowserBackend<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            store: ScreenshotStore::new(),
        }
    }
}

#[async_trait]
impl<D: BrowserDriver> Backend for BrowserBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Browser
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn screenshots(&self) -> ScreenshotStore {
        self.store.clone()
    }

    async fn capture(&mut self) -> Result<Capture, BackendError> {
        let geometry = self.driver.viewport().await?;
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
        tracing::debug!(tool = %call.tool, "Browser action");
        let result = perform(&mut self.driver, action).await?;
        // Navigation triggered by the action may resize the layout viewport.
        match self.driver.viewport().await {
            Ok(geometry) => Ok(result.with_geometry(geometry)),
            Err(_) => Ok(result),
        }
    }

    async fn shutdown(&mut self) {
        self.driver.close().await;
    }
}
