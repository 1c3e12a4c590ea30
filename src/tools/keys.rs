//! Key names accepted by `keyboard_press`, with their per-backend encodings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedKey {
    Enter,
    Tab,
    Space,
    Backspace,
    Delete,
    Escape,
    Ctrl,
    Alt,
    Shift,
    Meta,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    F(u8),
}

/// A single key of a `keyboard_press` combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Named(NamedKey),
    Char(char),
}

impl Key {
    /// Parse a key name as the oracle writes it (`"enter"`, `"Ctrl"`, `"a"`, `"F5"`).
    pub fn parse(name: &str) -> Option<Self> {
        if name == " " {
            return Some(Key::Named(NamedKey::Space));
        }
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Some(Key::Char(c.to_ascii_lowercase()));
        }

        let lower = trimmed.to_lowercase();
        let named = match lower.as_str() {
            "enter" | "return" => NamedKey::Enter,
            "tab" => NamedKey::Tab,
            "space" => NamedKey::Space,
            "backspace" => NamedKey::Backspace,
            "delete" | "del" => NamedKey::Delete,
            "escape" | "esc" => NamedKey::Escape,
            "ctrl" | "control" => NamedKey::Ctrl,
            "alt" | "option" => NamedKey::Alt,
            "shift" => NamedKey::Shift,
            "win" | "meta" | "cmd" | "command" | "super" => NamedKey::Meta,
            "up" | "arrowup" => NamedKey::Up,
            "down" | "arrowdown" => NamedKey::Down,
            "left" | "arrowleft" => NamedKey::Left,
            "right" | "arrowright" => NamedKey::Right,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "pageup" | "page_up" => NamedKey::PageUp,
            "pagedown" | "page_down" => NamedKey::PageDown,
            "insert" => NamedKey::Insert,
            other => {
                let n: u8 = other.strip_prefix('f')?.parse().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                NamedKey::F(n)
            }
        };
        Some(Key::Named(named))
    }

    pub fn is_modifier(&self) -> bool {
        matches!(
            self,
            Key::Named(NamedKey::Ctrl | NamedKey::Alt | NamedKey::Shift | NamedKey::Meta)
        )
    }

    /// Win32 virtual-key code.
    pub fn virtual_key(&self) -> u32 {
        match self {
            Key::Char(c) => {
                let upper = c.to_ascii_uppercase();
                if upper.is_ascii_alphanumeric() {
                    upper as u32
                } else {
                    oem_virtual_key(upper)
                }
            }
            Key::Named(named) => match named {
                NamedKey::Enter => 0x0D,
                NamedKey::Tab => 0x09,
                NamedKey::Space => 0x20,
                NamedKey::Backspace => 0x08,
                NamedKey::Delete => 0x2E,
                NamedKey::Escape => 0x1B,
                NamedKey::Ctrl => 0x11,
                NamedKey::Alt => 0x12,
                NamedKey::Shift => 0x10,
                NamedKey::Meta => 0x5B,
                NamedKey::Up => 0x26,
                NamedKey::Down => 0x28,
                NamedKey::Left => 0x25,
                NamedKey::Right => 0x27,
                NamedKey::Home => 0x24,
                NamedKey::End => 0x23,
                NamedKey::PageUp => 0x21,
                NamedKey::PageDown => 0x22,
                NamedKey::Insert => 0x2D,
                NamedKey::F(n) => 0x6F + u32::from(*n),
            },
        }
    }

    /// X11 keysym name as understood by `xdotool key`.
    pub fn keysym(&self) -> String {
        match self {
            Key::Char(c) => match c {
                '+' => "plus".to_string(),
                '-' => "minus".to_string(),
                '.' => "period".to_string(),
                ',' => "comma".to_string(),
                '/' => "slash".to_string(),
                other => other.to_string(),
            },
            Key::Named(named) => match named {
                NamedKey::Enter => "Return".to_string(),
                NamedKey::Tab => "Tab".to_string(),
                NamedKey::Space => "space".to_string(),
                NamedKey::Backspace => "BackSpace".to_string(),
                NamedKey::Delete => "Delete".to_string(),
                NamedKey::Escape => "Escape".to_string(),
                NamedKey::Ctrl => "ctrl".to_string(),
                NamedKey::Alt => "alt".to_string(),
                NamedKey::Shift => "shift".to_string(),
                NamedKey::Meta => "super".to_string(),
                NamedKey::Up => "Up".to_string(),
                NamedKey::Down => "Down".to_string(),
                NamedKey::Left => "Left".to_string(),
                NamedKey::Right => "Right".to_string(),
                NamedKey::Home => "Home".to_string(),
                NamedKey::End => "End".to_string(),
                NamedKey::PageUp => "Page_Up".to_string(),
                NamedKey::PageDown => "Page_Down".to_string(),
                NamedKey::Insert => "Insert".to_string(),
                NamedKey::F(n) => format!("F{}", n),
            },
        }
    }

    /// DOM `KeyboardEvent.key` value used for CDP key events.
    pub fn dom_key(&self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Named(named) => match named {
                NamedKey::Enter => "Enter".to_string(),
                NamedKey::Tab => "Tab".to_string(),
                NamedKey::Space => " ".to_string(),
                NamedKey::Backspace => "Backspace".to_string(),
                NamedKey::Delete => "Delete".to_string(),
                NamedKey::Escape => "Escape".to_string(),
                NamedKey::Ctrl => "Control".to_string(),
                NamedKey::Alt => "Alt".to_string(),
                NamedKey::Shift => "Shift".to_string(),
                NamedKey::Meta => "Meta".to_string(),
                NamedKey::Up => "ArrowUp".to_string(),
                NamedKey::Down => "ArrowDown".to_string(),
                NamedKey::Left => "ArrowLeft".to_string(),
                NamedKey::Right => "ArrowRight".to_string(),
                NamedKey::Home => "Home".to_string(),
                NamedKey::End => "End".to_string(),
                NamedKey::PageUp => "PageUp".to_string(),
                NamedKey::PageDown => "PageDown".to_string(),
                NamedKey::Insert => "Insert".to_string(),
                NamedKey::F(n) => format!("F{}", n),
            },
        }
    }

    /// CDP modifier bit (Alt=1, Ctrl=2, Meta=4, Shift=8); zero for non-modifiers.
    pub fn cdp_modifier_bit(&self) -> i64 {
        match self {
            Key::Named(NamedKey::Alt) => 1,
            Key::Named(NamedKey::Ctrl) => 2,
            Key::Named(NamedKey::Meta) => 4,
            Key::Named(NamedKey::Shift) => 8,
            _ => 0,
        }
    }
}

fn oem_virtual_key(c: char) -> u32 {
    match c {
        ';' => 0xBA,
        '=' | '+' => 0xBB,
        ',' => 0xBC,
        '-' => 0xBD,
        '.' => 0xBE,
        '/' => 0xBF,
        '`' => 0xC0,
        '[' => 0xDB,
        '\\' => 0xDC,
        ']' => 0xDD,
        '\'' => 0xDE,
        other => other as u32,
    }
}

/// Whether `text` can be delivered as plain key events.
///
/// Anything outside printable ASCII (CJK, emoji, accents) goes through the
/// clipboard-paste path instead.
pub fn is_key_typable(text: &str) -> bool {
    text.chars()
        .all(|c| c == '\n' || c == '\t' || (c.is_ascii() && !c.is_ascii_control()))
}
