//! X11 desktop driver built on `xdotool`, `xclip` and ImageMagick `import`.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::input::InputDriver;
use super::{BackendError, DesktopDriver};
use crate::geometry::{AbsolutePoint, SurfaceGeometry};
use crate::safety::CursorProbe;
use crate::tools::{Key, MouseButton};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const TYPE_DELAY_MS: &str = "12";

/// Drives the X display named by `display`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct XdoDriver {
    display: String,
    timeout: Duration,
}

/// Run a command against the configured display, killing it on timeout or drop.
async fn run_with_display(
    display: &str,
    program: &str,
    args: &[&str],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> anyhow::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .env("DISPLAY", display)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", program, e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        drop(pipe);
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow::anyhow!("Command {} timed out", program))??;

    if !output.status.success() {
        anyhow::bail!(
            "{} exited with {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

fn x_button(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "1",
        MouseButton::Middle => "2",
        MouseButton::Right => "3",
    }
}

fn parse_display_geometry(stdout: &str) -> Option<SurfaceGeometry> {
    let mut parts = stdout.split_whitespace();
    let w = parts.next()?.parse().ok()?;
    let h = parts.next()?.parse().ok()?;
    Some(SurfaceGeometry::new(w, h))
}

fn parse_mouse_location(stdout: &str) -> Option<AbsolutePoint> {
    let mut x = None;
    let mut y = None;
    for line in stdout.lines() {
        if let Some(v) = line.strip_prefix("X=") {
            x = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("Y=") {
            y = v.trim().parse().ok();
        }
    }
    Some(AbsolutePoint::new(x?, y?))
}

impl XdoDriver {
    pub fn new(display: impl Into<String>) -> Self {
        Self {
            display: display.into(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    async fn xdotool(&self, args: &[&str]) -> Result<String, BackendError> {
        tracing::debug!(display = %self.display, "xdotool {}", args.join(" "));
        let output = run_with_display(&self.display, "xdotool", args, None, self.timeout)
            .await
            .map_err(|e| BackendError::Input(e.to_string()))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl InputDriver for XdoDriver {
    async fn move_to(&mut self, at: AbsolutePoint) -> Result<(), BackendError> {
        let (x, y) = (at.x.to_string(), at.y.to_string());
        self.xdotool(&["mousemove", "--sync", &x, &y]).await?;
        Ok(())
    }

    async fn button(
        &mut self,
        _at: AbsolutePoint,
        button: MouseButton,
        pressed: bool,
        _click_count: u32,
    ) -> Result<(), BackendError> {
        let verb = if pressed { "mousedown" } else { "mouseup" };
        self.xdotool(&[verb, x_button(button)]).await?;
        Ok(())
    }

    async fn wheel(
        &mut self,
        _at: AbsolutePoint,
        notches_x: i32,
        notches_y: i32,
    ) -> Result<(), BackendError> {
        // X11 maps the wheel onto buttons 4/5 (vertical) and 6/7 (horizontal).
        let moves = [
            (notches_y, "5", "4"),
            (notches_x, "7", "6"),
        ];
        for (notches, forward, backward) in moves {
            if notches == 0 {
                continue;
            }
            let button = if notches > 0 { forward } else { backward };
            let repeat = notches.unsigned_abs().to_string();
            self.xdotool(&["click", "--repeat", &repeat, button]).await?;
        }
        Ok(())
    }

    async fn key(
        &mut self,
        key: &Key,
        pressed: bool,
        _modifiers: &[Key],
    ) -> Result<(), BackendError> {
        let verb = if pressed { "keydown" } else { "keyup" };
        let keysym = key.keysym();
        self.xdotool(&[verb, &keysym]).await?;
        Ok(())
    }

    async fn type_ascii(&mut self, text: &str) -> Result<(), BackendError> {
        self.xdotool(&["type", "--delay", TYPE_DELAY_MS, "--", text])
            .await?;
        Ok(())
    }

    async fn paste_text(&mut self, text: &str) -> Result<(), BackendError> {
        run_with_display(
            &self.display,
            "xclip",
            &["-selection", "clipboard"],
            Some(text.as_bytes()),
            self.timeout,
        )
        .await
        .map_err(|e| BackendError::Input(format!("clipboard: {}", e)))?;
        self.xdotool(&["key", "--clearmodifiers", "ctrl+v"]).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorProbe for XdoDriver {
    async fn cursor_position(&self) -> Result<AbsolutePoint, BackendError> {
        let out = self.xdotool(&["getmouselocation", "--shell"]).await?;
        parse_mouse_location(&out).ok_or_else(|| {
            BackendError::Input(format!("unexpected getmouselocation output: {}", out))
        })
    }
}

#[async_trait]
impl DesktopDriver for XdoDriver {
    async fn display_geometry(&mut self) -> Result<SurfaceGeometry, BackendError> {
        let out = self
            .xdotool(&["getdisplaygeometry"])
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        parse_display_geometry(&out).ok_or_else(|| {
            BackendError::Capture(format!("unexpected getdisplaygeometry output: {}", out))
        })
    }

    async fn screenshot_png(&mut self) -> Result<Vec<u8>, BackendError> {
        let output = run_with_display(
            &self.display,
            "import",
            &["-window", "root", "png:-"],
            None,
            self.timeout,
        )
        .await
        .map_err(|e| BackendError::Capture(e.to_string()))?;
        Ok(output.stdout)
    }

    fn cursor_probe(&self) -> std::sync::Arc<dyn CursorProbe> {
        std::sync::Arc::new(self.clone())
    }
}
