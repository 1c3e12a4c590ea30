//! Configuration management.
//!
//! Configuration can be set via environment variables:
//! - `DESKPILOT_HOST` / `DESKPILOT_PORT` - HTTP bind address (default `127.0.0.1:8765`)
//! - `LLM_API_KEY` or `OPENROUTER_API_KEY` - Oracle credentials. Required to start sessions.
//! - `LLM_BASE_URL` - OpenAI-compatible endpoint (default OpenRouter)
//! - `DESKPILOT_MODEL` - Vision model id
//! - `DESKPILOT_MAX_STEPS` - Default step limit per session
//! - `DESKPILOT_HISTORY_WINDOW` - Action records replayed into each oracle prompt
//! - `DESKPILOT_HEADLESS`, `DESKPILOT_VIEWPORT`, `DESKPILOT_START_URL` - Browser backend
//! - `DISPLAY` - X display for the desktop backend
//! - `DESKPILOT_SAFETY_POLL_MS`, `DESKPILOT_SAFETY_ZONE_PX` - Corner trigger tuning
//! - `DESKPILOT_RECAPTURE_DELAY_MS` - Delay before the single screenshot retry
//! - `DESKPILOT_FINISHED_RETENTION` - Finished sessions kept in memory

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::safety::SafetySettings;
use crate::session::DEFAULT_FINISHED_RETENTION;

pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Serialize)]
pub struct LlmSettings {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub start_url: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            start_url: "about:blank".to_string(),
        }
    }
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub llm: LlmSettings,
    pub max_steps: u32,
    pub history_window: usize,
    pub browser: BrowserSettings,
    pub display: String,
    pub safety: SafetySettings,
    #[serde(skip)]
    pub recapture_delay: Duration,
    pub finished_retention: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            llm: LlmSettings {
                api_key: None,
                base_url: DEFAULT_BASE_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
            },
            max_steps: 30,
            history_window: 20,
            browser: BrowserSettings::default(),
            display: ":0".to_string(),
            safety: SafetySettings::default(),
            recapture_delay: Duration::from_millis(500),
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("LLM_API_KEY").or_else(|| var("OPENROUTER_API_KEY"));
        let (viewport_width, viewport_height) = match var("DESKPILOT_VIEWPORT") {
            Some(raw) => parse_viewport(&raw).unwrap_or_else(|| {
                tracing::warn!("Invalid DESKPILOT_VIEWPORT '{}', using default", raw);
                (
                    defaults.browser.viewport_width,
                    defaults.browser.viewport_height,
                )
            }),
            None => (
                defaults.browser.viewport_width,
                defaults.browser.viewport_height,
            ),
        };

        Self {
            host: var("DESKPILOT_HOST").unwrap_or(defaults.host),
            port: parse_or("DESKPILOT_PORT", var("DESKPILOT_PORT"), defaults.port),
            llm: LlmSettings {
                api_key,
                base_url: var("LLM_BASE_URL").unwrap_or(defaults.llm.base_url),
                model: var("DESKPILOT_MODEL").unwrap_or(defaults.llm.model),
            },
            max_steps: parse_or(
                "DESKPILOT_MAX_STEPS",
                var("DESKPILOT_MAX_STEPS"),
                defaults.max_steps,
            )
            .max(1),
            history_window: parse_or(
                "DESKPILOT_HISTORY_WINDOW",
                var("DESKPILOT_HISTORY_WINDOW"),
                defaults.history_window,
            ),
            browser: BrowserSettings {
                headless: parse_bool(var("DESKPILOT_HEADLESS"), defaults.browser.headless),
                viewport_width,
                viewport_height,
                start_url: var("DESKPILOT_START_URL").unwrap_or(defaults.browser.start_url),
            },
            display: var("DISPLAY").unwrap_or(defaults.display),
            safety: SafetySettings {
                poll_interval: Duration::from_millis(parse_or(
                    "DESKPILOT_SAFETY_POLL_MS",
                    var("DESKPILOT_SAFETY_POLL_MS"),
                    defaults.safety.poll_interval.as_millis() as u64,
                )
                .max(1)),
                zone_px: parse_or(
                    "DESKPILOT_SAFETY_ZONE_PX",
                    var("DESKPILOT_SAFETY_ZONE_PX"),
                    defaults.safety.zone_px,
                )
                .max(1),
            },
            recapture_delay: Duration::from_millis(parse_or(
                "DESKPILOT_RECAPTURE_DELAY_MS",
                var("DESKPILOT_RECAPTURE_DELAY_MS"),
                defaults.recapture_delay.as_millis() as u64,
            )),
            finished_retention: parse_or(
                "DESKPILOT_FINISHED_RETENTION",
                var("DESKPILOT_FINISHED_RETENTION"),
                defaults.finished_retention,
            ),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            default
        }),
        None => default,
    }
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_viewport(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.trim().split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8765");
        assert_eq!(cfg.max_steps, 30);
        assert_eq!(cfg.history_window, 20);
        assert!(cfg.browser.headless);
        assert_eq!(cfg.safety.poll_interval, Duration::from_millis(50));
        assert_eq!(cfg.llm.api_key, None);
        assert_eq!(cfg.finished_retention, 50);
    }

    #[test]
    fn test_overrides_and_key_fallback() {
        let cfg = config(&[
            ("OPENROUTER_API_KEY", "sk-or"),
            ("DESKPILOT_MAX_STEPS", "5"),
            ("DESKPILOT_VIEWPORT", "1920x1080"),
            ("DESKPILOT_HEADLESS", "false"),
            ("DISPLAY", ":99"),
            ("DESKPILOT_FINISHED_RETENTION", "3"),
        ]);
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-or"));
        assert_eq!(cfg.max_steps, 5);
        assert_eq!(cfg.browser.viewport_width, 1920);
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.display, ":99");
        assert_eq!(cfg.finished_retention, 3);

        let cfg = config(&[("LLM_API_KEY", "primary"), ("OPENROUTER_API_KEY", "sk-or")]);
        assert_eq!(cfg.llm.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = config(&[
            ("DESKPILOT_PORT", "eighty"),
            ("DESKPILOT_VIEWPORT", "wide"),
            ("DESKPILOT_MAX_STEPS", "0"),
        ]);
        assert_eq!(cfg.port, 8765);
        assert_eq!(cfg.browser.viewport_height, 800);
        assert_eq!(cfg.max_steps, 1);
    }

    #[test]
    fn test_parse_viewport() {
        assert_eq!(parse_viewport("1280x800"), Some((1280, 800)));
        assert_eq!(parse_viewport(" 800 X 600 "), Some((800, 600)));
        assert_eq!(parse_viewport("0x600"), None);
        assert_eq!(parse_viewport("800"), None);
    }
}
