//! Chromium driver over the DevTools protocol.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton as CdpMouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::input::InputDriver;
use super::{BackendError, BrowserDriver};
use crate::config::BrowserSettings;
use crate::geometry::{AbsolutePoint, SurfaceGeometry};
use crate::tools::keys::NamedKey;
use crate::tools::{Key, MouseButton};

const WHEEL_PX_PER_NOTCH: f64 = 100.0;

/// One isolated Chromium instance with a throwaway profile and a single page.
pub struct CdpBrowser {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ViewportProbe {
    w: i32,
    h: i32,
}

impl CdpBrowser {
    pub async fn launch(settings: &BrowserSettings, start_url: &str) -> Result<Self, BackendError> {
        let profile_dir =
            std::env::temp_dir().join(format!("deskpilot-browser-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .window_size(settings.viewport_width, settings.viewport_height)
            .viewport(Viewport {
                width: settings.viewport_width,
                height: settings.viewport_height,
                ..Default::default()
            })
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run");
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BackendError::Unavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser
            .new_page(start_url)
            .await
            .map_err(|e| {
                BackendError::Unavailable(format!("failed to open {}: {}", start_url, e))
            })?;

        tracing::info!(
            url = %start_url,
            headless = settings.headless,
            profile = %profile_dir.display(),
            "Browser launched"
        );

        Ok(Self {
            browser,
            page,
            handler,
            profile_dir,
        })
    }

    fn ensure_alive(&self) -> Result<(), BackendError> {
        if self.handler.is_finished() {
            return Err(BackendError::Unavailable(
                "browser connection closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn mouse(
        &mut self,
        kind: DispatchMouseEventType,
        at: AbsolutePoint,
        button: Option<MouseButton>,
        click_count: u32,
    ) -> Result<(), BackendError> {
        self.ensure_alive()?;
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(f64::from(at.x))
            .y(f64::from(at.y));
        if let Some(button) = button {
            builder = builder
                .button(cdp_button(button))
                .click_count(i64::from(click_count));
        }
        let params = builder.build().map_err(BackendError::Input)?;
        self.page.execute(params).await.map_err(input_err)?;
        Ok(())
    }

    async fn key_event(
        &mut self,
        kind: DispatchKeyEventType,
        key: &Key,
        text: Option<String>,
        modifiers: i64,
    ) -> Result<(), BackendError> {
        self.ensure_alive()?;
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key.dom_key())
            .windows_virtual_key_code(i64::from(key.virtual_key()))
            .modifiers(modifiers);
        if let Some(text) = text {
            builder = builder.text(text);
        }
        let params = builder.build().map_err(BackendError::Input)?;
        self.page.execute(params).await.map_err(input_err)?;
        Ok(())
    }
}

fn cdp_button(button: MouseButton) -> CdpMouseButton {
    match button {
        MouseButton::Left => CdpMouseButton::Left,
        MouseButton::Right => CdpMouseButton::Right,
        MouseButton::Middle => CdpMouseButton::Middle,
    }
}

fn input_err(e: CdpError) -> BackendError {
    BackendError::Input(e.to_string())
}

/// Text a key produces when pressed without modifiers, if any.
fn key_text(key: &Key) -> Option<String> {
    match key {
        Key::Char(c) => Some(c.to_string()),
        Key::Named(NamedKey::Enter) => Some("\r".to_string()),
        Key::Named(NamedKey::Space) => Some(" ".to_string()),
        Key::Named(NamedKey::Tab) => Some("\t".to_string()),
        Key::Named(_) => None,
    }
}

#[async_trait]
impl InputDriver for CdpBrowser {
    async fn move_to(&mut self, at: AbsolutePoint) -> Result<(), BackendError> {
        self.mouse(DispatchMouseEventType::MouseMoved, at, None, 0)
            .await
    }

    async fn button(
        &mut self,
        at: AbsolutePoint,
        button: MouseButton,
        pressed: bool,
        click_count: u32,
    ) -> Result<(), BackendError> {
        let kind = if pressed {
            DispatchMouseEventType::MousePressed
        } else {
            DispatchMouseEventType::MouseReleased
        };
        self.mouse(kind, at, Some(button), click_count).await
    }

    async fn wheel(
        &mut self,
        at: AbsolutePoint,
        notches_x: i32,
        notches_y: i32,
    ) -> Result<(), BackendError> {
        self.ensure_alive()?;
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(f64::from(at.x))
            .y(f64::from(at.y))
            .delta_x(f64::from(notches_x) * WHEEL_PX_PER_NOTCH)
            .delta_y(f64::from(notches_y) * WHEEL_PX_PER_NOTCH)
            .build()
            .map_err(BackendError::Input)?;
        self.page.execute(params).await.map_err(input_err)?;
        Ok(())
    }

    async fn key(
        &mut self,
        key: &Key,
        pressed: bool,
        modifiers: &[Key],
    ) -> Result<(), BackendError> {
        let mask = modifiers
            .iter()
            .map(Key::cdp_modifier_bit)
            .fold(0, |acc, bit| acc | bit);
        if !pressed {
            return self
                .key_event(DispatchKeyEventType::KeyUp, key, None, mask)
                .await;
        }
        // Shortcuts must not insert their character.
        let text = if mask == 0 || mask == 8 { key_text(key) } else { None };
        let kind = if text.is_some() {
            DispatchKeyEventType::KeyDown
        } else {
            DispatchKeyEventType::RawKeyDown
        };
        self.key_event(kind, key, text, mask).await
    }

    async fn type_ascii(&mut self, text: &str) -> Result<(), BackendError> {
        for c in text.chars() {
            let key = match c {
                '\n' => Key::Named(NamedKey::Enter),
                '\t' => Key::Named(NamedKey::Tab),
                ' ' => Key::Named(NamedKey::Space),
                other => Key::Char(other),
            };
            self.key(&key, true, &[]).await?;
            self.key(&key, false, &[]).await?;
        }
        Ok(())
    }

    async fn paste_text(&mut self, text: &str) -> Result<(), BackendError> {
        self.ensure_alive()?;
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(input_err)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for CdpBrowser {
    async fn viewport(&mut self) -> Result<SurfaceGeometry, BackendError> {
        self.ensure_alive()?;
        let probe: ViewportProbe = self
            .page
            .evaluate("({ w: window.innerWidth, h: window.innerHeight })")
            .await
            .map_err(|e| BackendError::Capture(e.to_string()))?
            .into_value()
            .map_err(|e| BackendError::Capture(format!("viewport probe: {}", e)))?;
        Ok(SurfaceGeometry::new(probe.w, probe.h))
    }

    async fn screenshot_png(&mut self) -> Result<Vec<u8>, BackendError> {
        self.ensure_alive()?;
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let resp = self
            .page
            .execute(params)
            .await
            .map_err(|e| BackendError::Capture(e.to_string()))?;
        let data: &str = resp.data.as_ref();
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| BackendError::Capture(format!("base64 decode failed: {}", e)))
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!("Failed to close browser cleanly: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            tracing::debug!(
                "Failed to remove browser profile {}: {}",
                self.profile_dir.display(),
                e
            );
        }
        tracing::info!("Browser closed");
    }
}
