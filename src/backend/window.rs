//! Background-window backend: input delivered as window messages, so the
//! operator's foreground application keeps focus.
//!
//! The platform layer ([`WindowMessenger`], [`WindowDirectory`]) is injected;
//! this module owns the message encoding. Windows whose content is drawn by a
//! compositing toolkit ignore synthesized keyboard messages, so such targets
//! are bound spatial-only and keyboard tools fail validation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::input::{interpolate, DRAG_STEPS};
use super::{
    Backend, BackendError, BackendKind, BackendResult, Capture, Screenshot, ScreenshotStore,
};
use crate::geometry::{AbsolutePoint, SurfaceGeometry};
use crate::tools::keys::NamedKey;
use crate::tools::{Capabilities, Key, MouseButton, ResolvedAction, ValidatedCall};

pub type WindowHandle = u64;

pub const WM_KEYDOWN: u32 = 0x0100;
pub const WM_KEYUP: u32 = 0x0101;
pub const WM_CHAR: u32 = 0x0102;
pub const WM_MOUSEMOVE: u32 = 0x0200;
pub const WM_LBUTTONDOWN: u32 = 0x0201;
pub const WM_LBUTTONUP: u32 = 0x0202;
pub const WM_LBUTTONDBLCLK: u32 = 0x0203;
pub const WM_RBUTTONDOWN: u32 = 0x0204;
pub const WM_RBUTTONUP: u32 = 0x0205;
pub const WM_RBUTTONDBLCLK: u32 = 0x0206;
pub const WM_MBUTTONDOWN: u32 = 0x0207;
pub const WM_MBUTTONUP: u32 = 0x0208;
pub const WM_MBUTTONDBLCLK: u32 = 0x0209;
pub const WM_MOUSEWHEEL: u32 = 0x020A;
pub const WM_MOUSEHWHEEL: u32 = 0x020E;
pub const WM_CUT: u32 = 0x0300;
pub const WM_COPY: u32 = 0x0301;
pub const WM_PASTE: u32 = 0x0302;
pub const WM_CLEAR: u32 = 0x0303;
pub const EM_SETSEL: u32 = 0x00B1;

const MK_LBUTTON: usize = 0x0001;
const MK_RBUTTON: usize = 0x0002;
const MK_MBUTTON: usize = 0x0010;
const WHEEL_DELTA: i32 = 120;
const KEY_UP_FLAGS: u32 = 0xC000_0000;

const PRESS_DELAY: Duration = Duration::from_millis(50);
const DRAG_STEP_DELAY: Duration = Duration::from_millis(20);
const CHAR_DELAY: Duration = Duration::from_millis(10);
const COMBO_DELAY: Duration = Duration::from_millis(30);
const CLEAR_DELAY: Duration = Duration::from_millis(20);
const FOCUS_DELAY: Duration = Duration::from_millis(150);

/// Window classes whose input is routed through a compositor rather than
/// the window's own message queue.
const COMPOSITING_CLASS_PREFIXES: &[&str] = &[
    "Chrome_WidgetWin_",
    "MozillaWindowClass",
    "HwndWrapper",
    "Windows.UI.Core.CoreWindow",
    "ApplicationFrameWindow",
];

pub fn is_compositing_class(class_name: &str) -> bool {
    if COMPOSITING_CLASS_PREFIXES
        .iter()
        .any(|prefix| class_name.starts_with(prefix))
    {
        return true;
    }
    class_name.starts_with("Qt") && class_name.contains("QWindow")
}

/// One posted or sent window message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub msg: u32,
    pub wparam: usize,
    pub lparam: isize,
}

impl WindowMessage {
    pub fn new(msg: u32, wparam: usize, lparam: isize) -> Self {
        Self { msg, wparam, lparam }
    }
}

/// Client-area screenshot of a window, taken without raising it.
#[derive(Debug, Clone)]
pub struct WindowCapture {
    pub png: Vec<u8>,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub class_name: String,
    /// Keyboard tools are unavailable on this window.
    #[serde(default)]
    pub degraded: bool,
}

/// Platform message delivery for one host.
pub trait WindowMessenger: Send + Sync {
    fn is_window(&self, handle: WindowHandle) -> bool;

    fn class_name(&self, handle: WindowHandle) -> Result<String, BackendError>;

    fn title(&self, handle: WindowHandle) -> Result<String, BackendError>;

    fn capture(&self, handle: WindowHandle) -> Result<WindowCapture, BackendError>;

    /// Queue a message without waiting for it to be handled.
    fn post(&self, handle: WindowHandle, message: WindowMessage) -> Result<(), BackendError>;

    /// Deliver a message and wait for the window procedure to return.
    fn send(&self, handle: WindowHandle, message: WindowMessage) -> Result<isize, BackendError>;

    /// Hardware scan code for a virtual key.
    fn scan_code(&self, virtual_key: u32) -> u32;
}

/// Enumerates addressable top-level windows.
pub trait WindowDirectory: Send + Sync {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, BackendError>;
}

/// Pack client coordinates into an `LPARAM`: `(y << 16) | (x & 0xFFFF)`.
pub fn make_lparam(x: i32, y: i32) -> isize {
    let packed = ((y as u32 & 0xFFFF) << 16) | (x as u32 & 0xFFFF);
    packed as isize
}

/// Pack a wheel delta into the high word of `WPARAM`.
pub fn wheel_wparam(delta: i32) -> usize {
    ((delta as u32 & 0xFFFF) << 16) as usize
}

/// `LPARAM` for `WM_KEYDOWN`/`WM_KEYUP`: repeat count 1, scan code, transition bits on release.
pub fn key_lparam(scan_code: u32, key_up: bool) -> isize {
    let mut lparam = 1 | ((scan_code & 0xFF) << 16);
    if key_up {
        lparam |= KEY_UP_FLAGS;
    }
    lparam as isize
}

/// Edit-control command equivalent to a shortcut.
///
/// Posted key messages leave the thread's keyboard state untouched, so a
/// target never sees a modifier as held. Clipboard and selection shortcuts
/// go out as the command messages the control handles directly instead.
pub fn edit_command(keys: &[Key]) -> Option<WindowMessage> {
    let msg = match keys {
        [Key::Named(NamedKey::Ctrl), Key::Char(c)]
        | [Key::Char(c), Key::Named(NamedKey::Ctrl)] => match *c {
            'a' => return Some(WindowMessage::new(EM_SETSEL, 0, -1)),
            'c' => WM_COPY,
            'v' => WM_PASTE,
            'x' => WM_CUT,
            _ => return None,
        },
        [Key::Named(NamedKey::Delete)] => WM_CLEAR,
        _ => return None,
    };
    Some(WindowMessage::new(msg, 0, 0))
}

fn button_messages(button: MouseButton) -> (u32, u32, u32, usize) {
    match button {
        MouseButton::Left => (WM_LBUTTONDOWN, WM_LBUTTONUP, WM_LBUTTONDBLCLK, MK_LBUTTON),
        MouseButton::Right => (WM_RBUTTONDOWN, WM_RBUTTONUP, WM_RBUTTONDBLCLK, MK_RBUTTON),
        MouseButton::Middle => (WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MBUTTONDBLCLK, MK_MBUTTON),
    }
}

pub struct BackgroundWindowBackend {
    messenger: Arc<dyn WindowMessenger>,
    handle: WindowHandle,
    class_name: String,
    capabilities: Capabilities,
    store: ScreenshotStore,
}

impl BackgroundWindowBackend {
    /// Bind to `handle`, classifying its toolkit once at bind time.
    pub fn attach(
        messenger: Arc<dyn WindowMessenger>,
        handle: WindowHandle,
    ) -> Result<Self, BackendError> {
        if !messenger.is_window(handle) {
            return Err(BackendError::Unavailable(format!(
                "window {:#x} does not exist",
                handle
            )));
        }
        let class_name = messenger.class_name(handle)?;
        let capabilities = if is_compositing_class(&class_name) {
            tracing::warn!(
                handle,
                class = %class_name,
                "Target window uses a compositing toolkit; keyboard input disabled"
            );
            Capabilities::SPATIAL_ONLY
        } else {
            Capabilities::ALL
        };
        tracing::info!(
            handle,
            class = %class_name,
            title = %messenger.title(handle).unwrap_or_default(),
            "Bound background window"
        );
        Ok(Self {
            messenger,
            handle,
            class_name,
            capabilities,
            store: ScreenshotStore::new(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    fn ensure_alive(&self) -> Result<(), BackendError> {
        if !self.messenger.is_window(self.handle) {
            return Err(BackendError::Unavailable(format!(
                "window {:#x} was closed",
                self.handle
            )));
        }
        Ok(())
    }

    fn post(&self, msg: u32, wparam: usize, lparam: isize) -> Result<(), BackendError> {
        self.messenger
            .post(self.handle, WindowMessage::new(msg, wparam, lparam))
    }

    fn send(&self, msg: u32, wparam: usize, lparam: isize) -> Result<isize, BackendError> {
        self.messenger
            .send(self.handle, WindowMessage::new(msg, wparam, lparam))
    }

    async fn click(
        &self,
        at: AbsolutePoint,
        button: MouseButton,
        double: bool,
    ) -> Result<(), BackendError> {
        let (down, up, dblclk, mk) = button_messages(button);
        let lparam = make_lparam(at.x, at.y);
        self.post(down, mk, lparam)?;
        tokio::time::sleep(PRESS_DELAY).await;
        self.post(up, 0, lparam)?;
        if double {
            self.post(dblclk, mk, lparam)?;
            tokio::time::sleep(PRESS_DELAY).await;
            self.post(up, 0, lparam)?;
        }
        Ok(())
    }

    async fn drag(&self, start: AbsolutePoint, end: AbsolutePoint) -> Result<(), BackendError> {
        self.post(WM_LBUTTONDOWN, MK_LBUTTON, make_lparam(start.x, start.y))?;
        tokio::time::sleep(PRESS_DELAY).await;
        for step in 1..=DRAG_STEPS {
            let p = interpolate(start, end, step);
            self.post(WM_MOUSEMOVE, MK_LBUTTON, make_lparam(p.x, p.y))?;
            tokio::time::sleep(DRAG_STEP_DELAY).await;
        }
        self.post(WM_LBUTTONUP, 0, make_lparam(end.x, end.y))
    }

    fn scroll(
        &self,
        at: AbsolutePoint,
        notches_x: i32,
        notches_y: i32,
    ) -> Result<(), BackendError> {
        let lparam = make_lparam(at.x, at.y);
        if notches_y != 0 {
            // Positive wheel delta scrolls up; positive notches mean down.
            self.post(WM_MOUSEWHEEL, wheel_wparam(-notches_y * WHEEL_DELTA), lparam)?;
        }
        if notches_x != 0 {
            self.post(WM_MOUSEHWHEEL, wheel_wparam(notches_x * WHEEL_DELTA), lparam)?;
        }
        Ok(())
    }

    async fn clear_field(&self) -> Result<(), BackendError> {
        self.send(EM_SETSEL, 0, -1)?;
        tokio::time::sleep(CLEAR_DELAY).await;
        self.send(WM_CLEAR, 0, 0)?;
        tokio::time::sleep(CLEAR_DELAY).await;
        Ok(())
    }

    async fn type_chars(&self, text: &str) -> Result<(), BackendError> {
        let mut units = [0u16; 2];
        for c in text.chars() {
            for unit in c.encode_utf16(&mut units).iter() {
                self.post(WM_CHAR, usize::from(*unit), 0)?;
            }
            tokio::time::sleep(CHAR_DELAY).await;
        }
        Ok(())
    }

    async fn press_combo(&self, keys: &[Key]) -> Result<(), BackendError> {
        let Some((main, modifiers)) = keys.split_last() else {
            return Ok(());
        };
        let vk = |key: &Key| key.virtual_key();
        for modifier in modifiers {
            let scan = self.messenger.scan_code(vk(modifier));
            self.post(WM_KEYDOWN, vk(modifier) as usize, key_lparam(scan, false))?;
            tokio::time::sleep(CHAR_DELAY).await;
        }
        let scan = self.messenger.scan_code(vk(main));
        self.post(WM_KEYDOWN, vk(main) as usize, key_lparam(scan, false))?;
        tokio::time::sleep(COMBO_DELAY).await;
        self.post(WM_KEYUP, vk(main) as usize, key_lparam(scan, true))?;
        for modifier in modifiers.iter().rev() {
            let scan = self.messenger.scan_code(vk(modifier));
            self.post(WM_KEYUP, vk(modifier) as usize, key_lparam(scan, true))?;
            tokio::time::sleep(CHAR_DELAY).await;
        }
        Ok(())
    }

    async fn dispatch(&self, action: &ResolvedAction) -> Result<BackendResult, BackendError> {
        let result = match action {
            ResolvedAction::Click { at, button } => {
                self.click(*at, *button, false).await?;
                BackendResult::ok(format!("posted click at ({}, {})", at.x, at.y))
            }
            ResolvedAction::DoubleClick { at, button } => {
                self.click(*at, *button, true).await?;
                BackendResult::ok(format!("posted double-click at ({}, {})", at.x, at.y))
            }
            ResolvedAction::Hover { at } => {
                self.post(WM_MOUSEMOVE, 0, make_lparam(at.x, at.y))?;
                BackendResult::ok(format!("posted move to ({}, {})", at.x, at.y))
            }
            ResolvedAction::Drag { path } => {
                self.drag(path.start, path.end).await?;
                BackendResult::ok("posted drag")
            }
            ResolvedAction::Scroll {
                at,
                notches_x,
                notches_y,
            } => {
                self.scroll(*at, *notches_x, *notches_y)?;
                BackendResult::ok(format!("posted wheel ({}, {})", notches_x, notches_y))
            }
            ResolvedAction::TypeText {
                text,
                clear_existing,
            } => {
                if *clear_existing {
                    self.clear_field().await?;
                }
                self.type_chars(text).await?;
                BackendResult::ok(format!("posted {} chars", text.chars().count()))
            }
            ResolvedAction::PressKeys { keys } => match edit_command(keys) {
                Some(command) => {
                    self.send(command.msg, command.wparam, command.lparam)?;
                    BackendResult::ok(format!("sent edit command {:#06x}", command.msg))
                }
                None => {
                    self.press_combo(keys).await?;
                    BackendResult::ok(format!("posted {} key(s)", keys.len()))
                }
            },
            ResolvedAction::ClearText => {
                self.clear_field().await?;
                BackendResult::ok("cleared focused field")
            }
            ResolvedAction::ClickAndType {
                at,
                text,
                clear_existing,
            } => {
                self.click(*at, MouseButton::Left, false).await?;
                tokio::time::sleep(FOCUS_DELAY).await;
                if *clear_existing {
                    self.clear_field().await?;
                }
                self.type_chars(text).await?;
                BackendResult::ok(format!(
                    "posted click at ({}, {}) and {} chars",
                    at.x,
                    at.y,
                    text.chars().count()
                ))
            }
            ResolvedAction::Wait { .. } | ResolvedAction::TaskComplete { .. } => {
                BackendResult::ok("handled by session")
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl Backend for BackgroundWindowBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BackgroundWindow
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn screenshots(&self) -> ScreenshotStore {
        self.store.clone()
    }

    async fn capture(&mut self) -> Result<Capture, BackendError> {
        self.ensure_alive()?;
        let shot = self.messenger.capture(self.handle)?;
        // Coordinates are client-relative, so the origin is always (0, 0).
        let geometry = SurfaceGeometry::new(shot.width, shot.height);
        geometry.validate()?;
        let screenshot = Screenshot::png(shot.width as u32, shot.height as u32, shot.png);
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
        self.ensure_alive()?;
        tracing::debug!(tool = %call.tool, handle = self.handle, "Posting window messages");
        self.dispatch(action).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::tools::{ToolCall, ToolRegistry, ValidationError};

    struct RecordingMessenger {
        class_name: String,
        alive: Mutex<bool>,
        log: Mutex<Vec<(bool, WindowMessage)>>,
    }

    impl RecordingMessenger {
        fn new(class_name: &str) -> Arc<Self> {
            Arc::new(Self {
                class_name: class_name.to_string(),
                alive: Mutex::new(true),
                log: Mutex::new(Vec::new()),
            })
        }

        fn posted(&self) -> Vec<WindowMessage> {
            self.log.lock().unwrap().iter().map(|(_, m)| *m).collect()
        }
    }

    impl WindowMessenger for RecordingMessenger {
        fn is_window(&self, _handle: WindowHandle) -> bool {
            *self.alive.lock().unwrap()
        }
        fn class_name(&self, _handle: WindowHandle) -> Result<String, BackendError> {
            Ok(self.class_name.clone())
        }
        fn title(&self, _handle: WindowHandle) -> Result<String, BackendError> {
            Ok("Notepad".to_string())
        }
        fn capture(&self, _handle: WindowHandle) -> Result<WindowCapture, BackendError> {
            Ok(WindowCapture {
                png: vec![7; 4],
                width: 800,
                height: 600,
            })
        }
        fn post(
            &self,
            _handle: WindowHandle,
            message: WindowMessage,
        ) -> Result<(), BackendError> {
            self.log.lock().unwrap().push((false, message));
            Ok(())
        }
        fn send(
            &self,
            _handle: WindowHandle,
            message: WindowMessage,
        ) -> Result<isize, BackendError> {
            self.log.lock().unwrap().push((true, message));
            Ok(0)
        }
        fn scan_code(&self, virtual_key: u32) -> u32 {
            match virtual_key {
                0x0D => 0x1C,
                0x11 => 0x1D,
                _ => 0x1E,
            }
        }
    }

    async fn run(
        messenger: Arc<RecordingMessenger>,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<BackendResult, BackendError> {
        let mut backend = BackgroundWindowBackend::attach(messenger, 0x10).unwrap();
        let geometry = backend.capture().await.unwrap().geometry;
        let call = ToolRegistry::new()
            .validate(&ToolCall::new(tool, args), backend.kind(), backend.capabilities())
            .unwrap();
        let action = call.action.resolve(&geometry).unwrap();
        backend.execute(&call, &action).await
    }

    #[test]
    fn test_lparam_packing() {
        assert_eq!(make_lparam(100, 200), (200 << 16) | 100);
        assert_eq!(make_lparam(0xFFFF + 3, 1), (1 << 16) | 2);
        assert_eq!(wheel_wparam(-120), 0xFF88_0000);
        assert_eq!(wheel_wparam(240), 0x00F0_0000);
        assert_eq!(key_lparam(0x1C, false), 0x001C_0001);
        assert_eq!(key_lparam(0x1C, true), 0xC01C_0001_u32 as isize);
    }

    #[test]
    fn test_compositing_classes() {
        assert!(is_compositing_class("Chrome_WidgetWin_1"));
        assert!(is_compositing_class("MozillaWindowClass"));
        assert!(is_compositing_class("Qt5152QWindowIcon"));
        assert!(is_compositing_class("HwndWrapper[App;;abc]"));
        assert!(!is_compositing_class("Notepad"));
        assert!(!is_compositing_class("QtTooltip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_posts_button_pair_in_client_coords() {
        let messenger = RecordingMessenger::new("Notepad");
        run(messenger.clone(), "mouse_click", json!({ "x": 500, "y": 500 }))
            .await
            .unwrap();
        let lparam = make_lparam(400, 300);
        assert_eq!(
            messenger.posted(),
            vec![
                WindowMessage::new(WM_LBUTTONDOWN, MK_LBUTTON, lparam),
                WindowMessage::new(WM_LBUTTONUP, 0, lparam),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_down_is_negative_wheel_delta() {
        let messenger = RecordingMessenger::new("Notepad");
        run(messenger.clone(), "mouse_scroll", json!({ "scroll_y": 2 }))
            .await
            .unwrap();
        let posted = messenger.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].msg, WM_MOUSEWHEEL);
        assert_eq!(posted[0].wparam, wheel_wparam(-240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_clears_then_sends_utf16_chars() {
        let messenger = RecordingMessenger::new("Edit");
        run(
            messenger.clone(),
            "keyboard_type",
            json!({ "text": "a😀", "clear_existing": true }),
        )
        .await
        .unwrap();
        let log = messenger.log.lock().unwrap().clone();
        assert_eq!(log[0], (true, WindowMessage::new(EM_SETSEL, 0, -1)));
        assert_eq!(log[1], (true, WindowMessage::new(WM_CLEAR, 0, 0)));
        let chars: Vec<_> = log[2..].iter().map(|(_, m)| m.wparam).collect();
        assert_eq!(chars, vec![0x61, 0xD83D, 0xDE00]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_key_lparams() {
        let messenger = RecordingMessenger::new("Edit");
        run(messenger.clone(), "keyboard_press", json!({ "keys": ["enter"] }))
            .await
            .unwrap();
        assert_eq!(
            messenger.posted(),
            vec![
                WindowMessage::new(WM_KEYDOWN, 0x0D, key_lparam(0x1C, false)),
                WindowMessage::new(WM_KEYUP, 0x0D, key_lparam(0x1C, true)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_text_sends_select_all_then_clear() {
        let messenger = RecordingMessenger::new("Edit");
        run(messenger.clone(), "clear_text", json!({})).await.unwrap();
        assert_eq!(
            messenger.log.lock().unwrap().clone(),
            vec![
                (true, WindowMessage::new(EM_SETSEL, 0, -1)),
                (true, WindowMessage::new(WM_CLEAR, 0, 0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clipboard_shortcuts_become_edit_commands() {
        for (keys, expected) in [
            (json!(["ctrl", "a"]), WindowMessage::new(EM_SETSEL, 0, -1)),
            (json!(["ctrl", "c"]), WindowMessage::new(WM_COPY, 0, 0)),
            (json!(["Ctrl", "V"]), WindowMessage::new(WM_PASTE, 0, 0)),
            (json!(["ctrl", "x"]), WindowMessage::new(WM_CUT, 0, 0)),
            (json!(["delete"]), WindowMessage::new(WM_CLEAR, 0, 0)),
        ] {
            let messenger = RecordingMessenger::new("Edit");
            run(messenger.clone(), "keyboard_press", json!({ "keys": keys }))
                .await
                .unwrap();
            assert_eq!(messenger.log.lock().unwrap().clone(), vec![(true, expected)]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_shortcut_posts_key_messages() {
        let messenger = RecordingMessenger::new("Edit");
        run(messenger.clone(), "keyboard_press", json!({ "keys": ["ctrl", "s"] }))
            .await
            .unwrap();
        let msgs: Vec<u32> = messenger.posted().iter().map(|m| m.msg).collect();
        assert_eq!(msgs, vec![WM_KEYDOWN, WM_KEYDOWN, WM_KEYUP, WM_KEYUP]);
        assert!(messenger.log.lock().unwrap().iter().all(|(sent, _)| !sent));
    }

    #[test]
    fn test_edit_command_ignores_other_modifiers() {
        let alt_a = [Key::Named(NamedKey::Alt), Key::Char('a')];
        assert_eq!(edit_command(&alt_a), None);
        let ctrl_shift_v = [
            Key::Named(NamedKey::Ctrl),
            Key::Named(NamedKey::Shift),
            Key::Char('v'),
        ];
        assert_eq!(edit_command(&ctrl_shift_v), None);
    }

    #[tokio::test]
    async fn test_zero_size_client_area_is_a_geometry_error() {
        struct Minimized;
        impl WindowMessenger for Minimized {
            fn is_window(&self, _handle: WindowHandle) -> bool {
                true
            }
            fn class_name(&self, _handle: WindowHandle) -> Result<String, BackendError> {
                Ok("Edit".to_string())
            }
            fn title(&self, _handle: WindowHandle) -> Result<String, BackendError> {
                Ok(String::new())
            }
            fn capture(&self, _handle: WindowHandle) -> Result<WindowCapture, BackendError> {
                Ok(WindowCapture {
                    png: Vec::new(),
                    width: 0,
                    height: 0,
                })
            }
            fn post(&self, _: WindowHandle, _: WindowMessage) -> Result<(), BackendError> {
                Ok(())
            }
            fn send(&self, _: WindowHandle, _: WindowMessage) -> Result<isize, BackendError> {
                Ok(0)
            }
            fn scan_code(&self, _virtual_key: u32) -> u32 {
                0
            }
        }
        let mut backend = BackgroundWindowBackend::attach(Arc::new(Minimized), 9).unwrap();
        assert!(matches!(
            backend.capture().await,
            Err(BackendError::Geometry(_))
        ));
    }

    #[tokio::test]
    async fn test_compositing_window_rejects_keyboard_tools() {
        let messenger = RecordingMessenger::new("Chrome_WidgetWin_1");
        let backend = BackgroundWindowBackend::attach(messenger, 1).unwrap();
        assert_eq!(backend.capabilities(), Capabilities::SPATIAL_ONLY);
        let err = ToolRegistry::new()
            .validate(
                &ToolCall::new("click_and_type", json!({ "x": 1, "y": 1, "text": "hi" })),
                backend.kind(),
                backend.capabilities(),
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedByBackend { .. }));
    }

    #[tokio::test]
    async fn test_closed_window_is_unavailable() {
        let messenger = RecordingMessenger::new("Notepad");
        let mut backend = BackgroundWindowBackend::attach(messenger.clone(), 3).unwrap();
        *messenger.alive.lock().unwrap() = false;
        assert!(matches!(
            backend.capture().await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(BackgroundWindowBackend::attach(messenger, 4).is_err());
    }
}
