//! Pointer and keyboard primitives shared by the browser and desktop backends.

use std::time::Duration;

use async_trait::async_trait;

use super::{BackendError, BackendResult};
use crate::geometry::AbsolutePoint;
use crate::tools::keys::{is_key_typable, NamedKey};
use crate::tools::{Key, MouseButton, ResolvedAction};

/// Intermediate pointer positions between drag endpoints.
pub const DRAG_STEPS: i32 = 10;
const DRAG_STEP_DELAY: Duration = Duration::from_millis(20);
const PRESS_DELAY: Duration = Duration::from_millis(50);
const FOCUS_DELAY: Duration = Duration::from_millis(150);

/// Low-level input a surface must accept.
#[async_trait]
pub trait InputDriver: Send {
    async fn move_to(&mut self, at: AbsolutePoint) -> Result<(), BackendError>;

    async fn button(
        &mut self,
        at: AbsolutePoint,
        button: MouseButton,
        pressed: bool,
        click_count: u32,
    ) -> Result<(), BackendError>;

    /// Scroll by wheel notches; positive is down/right.
    async fn wheel(
        &mut self,
        at: AbsolutePoint,
        notches_x: i32,
        notches_y: i32,
    ) -> Result<(), BackendError>;

    /// Press or release one key while `modifiers` are held.
    async fn key(&mut self, key: &Key, pressed: bool, modifiers: &[Key])
        -> Result<(), BackendError>;

    /// Type printable ASCII as individual key events.
    async fn type_ascii(&mut self, text: &str) -> Result<(), BackendError>;

    /// Deliver arbitrary text through the clipboard/IME path.
    async fn paste_text(&mut self, text: &str) -> Result<(), BackendError>;
}

async fn click<D: InputDriver + ?Sized>(
    driver: &mut D,
    at: AbsolutePoint,
    button: MouseButton,
    clicks: u32,
) -> Result<(), BackendError> {
    driver.move_to(at).await?;
    for count in 1..=clicks {
        driver.button(at, button, true, count).await?;
        driver.button(at, button, false, count).await?;
    }
    Ok(())
}

async fn press_combo<D: InputDriver + ?Sized>(
    driver: &mut D,
    keys: &[Key],
) -> Result<(), BackendError> {
    let Some((main, modifiers)) = keys.split_last() else {
        return Ok(());
    };
    for (i, modifier) in modifiers.iter().enumerate() {
        driver.key(modifier, true, &modifiers[..i]).await?;
    }
    driver.key(main, true, modifiers).await?;
    driver.key(main, false, modifiers).await?;
    for (i, modifier) in modifiers.iter().enumerate().rev() {
        driver.key(modifier, false, &modifiers[..i]).await?;
    }
    Ok(())
}

async fn clear_field<D: InputDriver + ?Sized>(driver: &mut D) -> Result<(), BackendError> {
    press_combo(driver, &[Key::Named(NamedKey::Ctrl), Key::Char('a')]).await?;
    tokio::time::sleep(PRESS_DELAY).await;
    press_combo(driver, &[Key::Named(NamedKey::Delete)]).await
}

async fn enter_text<D: InputDriver + ?Sized>(
    driver: &mut D,
    text: &str,
) -> Result<&'static str, BackendError> {
    if text.is_empty() {
        return Ok("nothing");
    }
    if is_key_typable(text) {
        driver.type_ascii(text).await?;
        Ok("keys")
    } else {
        driver.paste_text(text).await?;
        Ok("paste")
    }
}

/// Drive one resolved action through `driver`.
///
/// `wait` and `task_complete` never reach a backend; they report success untouched.
pub(crate) async fn perform<D: InputDriver + ?Sized>(
    driver: &mut D,
    action: &ResolvedAction,
) -> Result<BackendResult, BackendError> {
    let result = match action {
        ResolvedAction::Click { at, button } => {
            click(driver, *at, *button, 1).await?;
            BackendResult::ok(format!("clicked {:?} at ({}, {})", button, at.x, at.y))
        }
        ResolvedAction::DoubleClick { at, button } => {
            click(driver, *at, *button, 2).await?;
            BackendResult::ok(format!("double-clicked at ({}, {})", at.x, at.y))
        }
        ResolvedAction::Hover { at } => {
            driver.move_to(*at).await?;
            BackendResult::ok(format!("moved pointer to ({}, {})", at.x, at.y))
        }
        ResolvedAction::Drag { path } => {
            driver.move_to(path.start).await?;
            driver.button(path.start, MouseButton::Left, true, 1).await?;
            tokio::time::sleep(PRESS_DELAY).await;
            for step in 1..=DRAG_STEPS {
                driver.move_to(interpolate(path.start, path.end, step)).await?;
                tokio::time::sleep(DRAG_STEP_DELAY).await;
            }
            driver.button(path.end, MouseButton::Left, false, 1).await?;
            BackendResult::ok(format!(
                "dragged ({}, {}) -> ({}, {})",
                path.start.x, path.start.y, path.end.x, path.end.y
            ))
        }
        ResolvedAction::Scroll {
            at,
            notches_x,
            notches_y,
        } => {
            driver.move_to(*at).await?;
            driver.wheel(*at, *notches_x, *notches_y).await?;
            BackendResult::ok(format!("scrolled ({}, {}) notches", notches_x, notches_y))
        }
        ResolvedAction::TypeText {
            text,
            clear_existing,
        } => {
            if *clear_existing {
                clear_field(driver).await?;
            }
            let via = enter_text(driver, text).await?;
            BackendResult::ok(format!("typed {} chars via {}", text.chars().count(), via))
        }
        ResolvedAction::PressKeys { keys } => {
            press_combo(driver, keys).await?;
            BackendResult::ok(format!("pressed {} key(s)", keys.len()))
        }
        ResolvedAction::ClearText => {
            clear_field(driver).await?;
            BackendResult::ok("cleared focused field")
        }
        ResolvedAction::ClickAndType {
            at,
            text,
            clear_existing,
        } => {
            click(driver, *at, MouseButton::Left, 1).await?;
            tokio::time::sleep(FOCUS_DELAY).await;
            if *clear_existing {
                clear_field(driver).await?;
            }
            let via = enter_text(driver, text).await?;
            BackendResult::ok(format!(
                "clicked ({}, {}) and typed {} chars via {}",
                at.x,
                at.y,
                text.chars().count(),
                via
            ))
        }
        ResolvedAction::Wait { .. } | ResolvedAction::TaskComplete { .. } => {
            BackendResult::ok("handled by session")
        }
    };
    Ok(result)
}

pub(crate) fn interpolate(start: AbsolutePoint, end: AbsolutePoint, step: i32) -> AbsolutePoint {
    let t = f64::from(step) / f64::from(DRAG_STEPS);
    let lerp = |a: i32, b: i32| (f64::from(a) + f64::from(b - a) * t).round() as i32;
    AbsolutePoint::new(lerp(start.x, end.x), lerp(start.y, end.y))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every primitive it receives.
    #[derive(Debug, Default)]
    pub struct RecordingDriver {
        pub ops: Vec<String>,
    }

    #[async_trait]
    impl InputDriver for RecordingDriver {
        async fn move_to(&mut self, at: AbsolutePoint) -> Result<(), BackendError> {
            self.ops.push(format!("move {} {}", at.x, at.y));
            Ok(())
        }

        async fn button(
            &mut self,
            _at: AbsolutePoint,
            button: MouseButton,
            pressed: bool,
            click_count: u32,
        ) -> Result<(), BackendError> {
            let dir = if pressed { "down" } else { "up" };
            self.ops.push(format!("{:?} {} {}", button, dir, click_count));
            Ok(())
        }

        async fn wheel(
            &mut self,
            _at: AbsolutePoint,
            notches_x: i32,
            notches_y: i32,
        ) -> Result<(), BackendError> {
            self.ops.push(format!("wheel {} {}", notches_x, notches_y));
            Ok(())
        }

        async fn key(
            &mut self,
            key: &Key,
            pressed: bool,
            modifiers: &[Key],
        ) -> Result<(), BackendError> {
            let dir = if pressed { "down" } else { "up" };
            self.ops
                .push(format!("key {} {} +{}", key.dom_key(), dir, modifiers.len()));
            Ok(())
        }

        async fn type_ascii(&mut self, text: &str) -> Result<(), BackendError> {
            self.ops.push(format!("type {}", text));
            Ok(())
        }

        async fn paste_text(&mut self, text: &str) -> Result<(), BackendError> {
            self.ops.push(format!("paste {}", text));
            Ok(())
        }
    }
}
