//! Parsing of oracle tool calls into typed actions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::keys::Key;
use super::{Capability, Idempotency, ParamKind, ToolKind, ToolSpec};
use crate::backend::BackendKind;
use crate::geometry::{
    rect_to_absolute, to_absolute, AbsolutePoint, AbsoluteRect, GeometryError, NormalizedPoint,
    NormalizedRect, SurfaceGeometry, NORMALIZED_MAX,
};

/// Scroll amounts beyond this many notches are clamped.
pub const MAX_SCROLL_NOTCHES: i64 = 50;
/// Bounds for the `wait` tool, in seconds.
pub const WAIT_MIN_SECS: f64 = 1.0;
pub const WAIT_MAX_SECS: f64 = 30.0;

/// A tool call as produced by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Parameter name → value. A non-object here is rejected during validation.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("tool '{tool}' is missing required parameter '{param}'")]
    MissingParameter { tool: String, param: String },

    #[error("tool '{tool}' parameter '{param}' must be a {expected}")]
    InvalidParameter {
        tool: String,
        param: String,
        expected: String,
    },

    #[error("tool '{tool}' parameter '{param}' = {value} is outside 0..=1000")]
    OutOfRange {
        tool: String,
        param: String,
        value: f64,
    },

    #[error("tool '{tool}' needs {capability}, which the {backend} backend does not support")]
    UnsupportedByBackend {
        tool: String,
        backend: BackendKind,
        capability: Capability,
    },

    #[error("tool '{tool}' arguments are malformed: {detail}")]
    MalformedArguments { tool: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// A typed, range-checked action in normalized coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click {
        at: NormalizedPoint,
        button: MouseButton,
    },
    DoubleClick {
        at: NormalizedPoint,
        button: MouseButton,
    },
    Hover {
        at: NormalizedPoint,
    },
    Drag {
        path: NormalizedRect,
    },
    Scroll {
        at: Option<NormalizedPoint>,
        notches_x: i32,
        notches_y: i32,
    },
    TypeText {
        text: String,
        clear_existing: bool,
    },
    PressKeys {
        keys: Vec<Key>,
    },
    ClearText,
    ClickAndType {
        at: NormalizedPoint,
        text: String,
        clear_existing: bool,
    },
    Wait {
        seconds: f64,
    },
    TaskComplete {
        summary: Option<String>,
        success: bool,
    },
}

impl Action {
    /// Translate every normalized coordinate onto `geometry`.
    ///
    /// A scroll without a position targets the surface centre.
    pub fn resolve(&self, geometry: &SurfaceGeometry) -> Result<ResolvedAction, GeometryError> {
        geometry.validate()?;
        let resolved = match self {
            Action::Click { at, button } => ResolvedAction::Click {
                at: to_absolute(*at, geometry)?,
                button: *button,
            },
            Action::DoubleClick { at, button } => ResolvedAction::DoubleClick {
                at: to_absolute(*at, geometry)?,
                button: *button,
            },
            Action::Hover { at } => ResolvedAction::Hover {
                at: to_absolute(*at, geometry)?,
            },
            Action::Drag { path } => ResolvedAction::Drag {
                path: rect_to_absolute(*path, geometry)?,
            },
            Action::Scroll {
                at,
                notches_x,
                notches_y,
            } => {
                let at = at.unwrap_or(NormalizedPoint::new(
                    NORMALIZED_MAX / 2.0,
                    NORMALIZED_MAX / 2.0,
                ));
                ResolvedAction::Scroll {
                    at: to_absolute(at, geometry)?,
                    notches_x: *notches_x,
                    notches_y: *notches_y,
                }
            }
            Action::TypeText {
                text,
                clear_existing,
            } => ResolvedAction::TypeText {
                text: text.clone(),
                clear_existing: *clear_existing,
            },
            Action::PressKeys { keys } => ResolvedAction::PressKeys { keys: keys.clone() },
            Action::ClearText => ResolvedAction::ClearText,
            Action::ClickAndType {
                at,
                text,
                clear_existing,
            } => ResolvedAction::ClickAndType {
                at: to_absolute(*at, geometry)?,
                text: text.clone(),
                clear_existing: *clear_existing,
            },
            Action::Wait { seconds } => ResolvedAction::Wait { seconds: *seconds },
            Action::TaskComplete { summary, success } => ResolvedAction::TaskComplete {
                summary: summary.clone(),
                success: *success,
            },
        };
        Ok(resolved)
    }
}

/// An [`Action`] with absolute pixel coordinates for the current surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolvedAction {
    Click {
        at: AbsolutePoint,
        button: MouseButton,
    },
    DoubleClick {
        at: AbsolutePoint,
        button: MouseButton,
    },
    Hover {
        at: AbsolutePoint,
    },
    Drag {
        path: AbsoluteRect,
    },
    Scroll {
        at: AbsolutePoint,
        notches_x: i32,
        notches_y: i32,
    },
    TypeText {
        text: String,
        clear_existing: bool,
    },
    PressKeys {
        keys: Vec<Key>,
    },
    ClearText,
    ClickAndType {
        at: AbsolutePoint,
        text: String,
        clear_existing: bool,
    },
    Wait {
        seconds: f64,
    },
    TaskComplete {
        summary: Option<String>,
        success: bool,
    },
}

impl ResolvedAction {
    /// Every absolute point this action touches, in order.
    pub fn points(&self) -> Vec<AbsolutePoint> {
        match self {
            Self::Click { at, .. }
            | Self::DoubleClick { at, .. }
            | Self::Hover { at }
            | Self::Scroll { at, .. }
            | Self::ClickAndType { at, .. } => vec![*at],
            Self::Drag { path } => vec![path.start, path.end],
            _ => Vec::new(),
        }
    }
}

/// A tool call that passed validation against the bound backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedCall {
    pub tool: ToolKind,
    pub idempotency: Idempotency,
    pub action: Action,
    pub call: ToolCall,
}

struct Args<'a> {
    spec: &'a ToolSpec,
    map: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    fn tool(&self) -> String {
        self.spec.name().to_string()
    }

    fn kind_of(&self, param: &str) -> ParamKind {
        self.spec
            .params
            .iter()
            .find(|p| p.name == param)
            .map(|p| p.kind)
            .unwrap_or(ParamKind::Text)
    }

    fn invalid(&self, param: &str) -> ValidationError {
        ValidationError::InvalidParameter {
            tool: self.tool(),
            param: param.to_string(),
            expected: self.kind_of(param).expected().to_string(),
        }
    }

    fn present(&self, param: &str) -> Option<&'a Value> {
        self.map.get(param).filter(|v| !v.is_null())
    }

    fn require(&self, param: &str) -> Result<&'a Value, ValidationError> {
        self.present(param)
            .ok_or_else(|| ValidationError::MissingParameter {
                tool: self.tool(),
                param: param.to_string(),
            })
    }

    fn coordinate_value(&self, param: &str, value: &Value) -> Result<f64, ValidationError> {
        let v = value.as_f64().ok_or_else(|| self.invalid(param))?;
        if !NormalizedPoint::in_range(v) {
            return Err(ValidationError::OutOfRange {
                tool: self.tool(),
                param: param.to_string(),
                value: v,
            });
        }
        Ok(v)
    }

    fn point(&self, x: &str, y: &str) -> Result<NormalizedPoint, ValidationError> {
        let raw_x = self.require(x)?;
        let raw_y = self.require(y)?;
        let x = self.coordinate_value(x, raw_x)?;
        let y = self.coordinate_value(y, raw_y)?;
        Ok(NormalizedPoint::new(x, y))
    }

    fn optional_point(&self, x: &str, y: &str) -> Result<Option<NormalizedPoint>, ValidationError> {
        match (self.present(x), self.present(y)) {
            (None, None) => Ok(None),
            _ => self.point(x, y).map(Some),
        }
    }

    fn text(&self, param: &str) -> Result<String, ValidationError> {
        self.require(param)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(param))
    }

    fn optional_text(&self, param: &str) -> Result<Option<String>, ValidationError> {
        self.present(param)
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| self.invalid(param)))
            .transpose()
    }

    fn optional_bool(&self, param: &str) -> Result<Option<bool>, ValidationError> {
        self.present(param)
            .map(|v| v.as_bool().ok_or_else(|| self.invalid(param)))
            .transpose()
    }

    fn integer(&self, value: &Value, param: &str) -> Result<i64, ValidationError> {
        if let Some(i) = value.as_i64() {
            return Ok(i);
        }
        match value.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
            _ => Err(self.invalid(param)),
        }
    }

    fn optional_number(&self, param: &str) -> Result<Option<f64>, ValidationError> {
        self.present(param)
            .map(|v| {
                v.as_f64()
                    .filter(|f| f.is_finite())
                    .ok_or_else(|| self.invalid(param))
            })
            .transpose()
    }

    fn optional_integer(&self, param: &str) -> Result<Option<i64>, ValidationError> {
        self.present(param)
            .map(|v| self.integer(v, param))
            .transpose()
    }

    fn button(&self) -> Result<MouseButton, ValidationError> {
        match self.optional_text("button")?.as_deref() {
            None | Some("left") => Ok(MouseButton::Left),
            Some("right") => Ok(MouseButton::Right),
            Some("middle") => Ok(MouseButton::Middle),
            Some(_) => Err(self.invalid("button")),
        }
    }

    fn keys(&self) -> Result<Vec<Key>, ValidationError> {
        let list = self
            .require("keys")?
            .as_array()
            .filter(|list| !list.is_empty())
            .ok_or_else(|| self.invalid("keys"))?;
        list.iter()
            .map(|v| v.as_str().and_then(Key::parse).ok_or_else(|| self.invalid("keys")))
            .collect()
    }
}

/// Build the typed action for `spec` from raw JSON arguments.
pub(super) fn parse_action(spec: &ToolSpec, arguments: &Value) -> Result<Action, ValidationError> {
    let empty = Map::new();
    let map = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        Value::String(raw) => {
            return Err(ValidationError::MalformedArguments {
                tool: spec.name().to_string(),
                detail: format!("expected a JSON object, got unparsed text ({} chars)", raw.len()),
            })
        }
        other => {
            return Err(ValidationError::MalformedArguments {
                tool: spec.name().to_string(),
                detail: format!("expected a JSON object, got {}", json_type(other)),
            })
        }
    };
    let args = Args { spec, map };

    let action = match spec.kind {
        ToolKind::MouseClick => Action::Click {
            at: args.point("x", "y")?,
            button: args.button()?,
        },
        ToolKind::MouseDoubleClick => Action::DoubleClick {
            at: args.point("x", "y")?,
            button: args.button()?,
        },
        ToolKind::MouseHover => Action::Hover {
            at: args.point("x", "y")?,
        },
        ToolKind::MouseDrag => Action::Drag {
            path: NormalizedRect {
                start: args.point("start_x", "start_y")?,
                end: args.point("end_x", "end_y")?,
            },
        },
        ToolKind::MouseScroll => {
            let scroll_y = args.integer(args.require("scroll_y")?, "scroll_y")?;
            let scroll_x = args.optional_integer("scroll_x")?.unwrap_or(0);
            Action::Scroll {
                at: args.optional_point("x", "y")?,
                notches_x: scroll_x.clamp(-MAX_SCROLL_NOTCHES, MAX_SCROLL_NOTCHES) as i32,
                notches_y: scroll_y.clamp(-MAX_SCROLL_NOTCHES, MAX_SCROLL_NOTCHES) as i32,
            }
        }
        ToolKind::KeyboardType => Action::TypeText {
            text: args.text("text")?,
            clear_existing: args.optional_bool("clear_existing")?.unwrap_or(false),
        },
        ToolKind::KeyboardPress => Action::PressKeys { keys: args.keys()? },
        ToolKind::ClearText => Action::ClearText,
        ToolKind::ClickAndType => {
            let at = args.point("x", "y")?;
            Action::ClickAndType {
                at,
                text: args.text("text")?,
                clear_existing: args.optional_bool("clear_existing")?.unwrap_or(true),
            }
        }
        ToolKind::Wait => {
            let seconds = args.optional_number("seconds")?.unwrap_or(WAIT_MIN_SECS);
            Action::Wait {
                seconds: seconds.clamp(WAIT_MIN_SECS, WAIT_MAX_SECS),
            }
        }
        ToolKind::TaskComplete => Action::TaskComplete {
            summary: args.optional_text("summary")?,
            success: args.optional_bool("success")?.unwrap_or(true),
        },
    };
    Ok(action)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::{Capabilities, ToolRegistry};

    fn validate(name: &str, args: Value) -> Result<ValidatedCall, ValidationError> {
        ToolRegistry::new().validate(
            &ToolCall::new(name, args),
            BackendKind::Desktop,
            Capabilities::ALL,
        )
    }

    #[test]
    fn test_unknown_tool() {
        let err = validate("launch_rockets", json!({})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownTool {
                name: "launch_rockets".to_string()
            }
        );
    }

    #[test]
    fn test_click_and_type_missing_text() {
        let err = validate("click_and_type", json!({ "x": 10, "y": 20 })).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingParameter {
                tool: "click_and_type".to_string(),
                param: "text".to_string()
            }
        );
    }

    #[test]
    fn test_out_of_range_coordinates() {
        for (x, y) in [(-1.0, 5.0), (5.0, 1000.01), (1001.0, 0.0), (0.0, -0.5)] {
            let err = validate("mouse_click", json!({ "x": x, "y": y })).unwrap_err();
            assert!(
                matches!(err, ValidationError::OutOfRange { .. }),
                "{x},{y}: {err:?}"
            );
        }
        let err = validate(
            "mouse_drag",
            json!({ "start_x": 0, "start_y": 0, "end_x": 500, "end_y": 1200 }),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { ref param, .. } if param == "end_y"));
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let call = validate("mouse_click", json!({ "x": 0, "y": 1000 })).unwrap();
        assert_eq!(
            call.action,
            Action::Click {
                at: NormalizedPoint { x: 0.0, y: 1000.0 },
                button: MouseButton::Left
            }
        );
    }

    #[test]
    fn test_wrong_types() {
        let err = validate("mouse_click", json!({ "x": "left", "y": 3 })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { .. }));
        let err = validate("keyboard_press", json!({ "keys": [] })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { .. }));
        let err = validate("keyboard_press", json!({ "keys": ["ctrl", "warp"] })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { .. }));
    }

    #[test]
    fn test_malformed_arguments() {
        let err = validate("mouse_click", json!("{x: 1")).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedArguments { .. }));
        let err = validate("mouse_click", json!([1, 2])).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedArguments { .. }));
    }

    #[test]
    fn test_unsupported_by_backend() {
        let err = ToolRegistry::new()
            .validate(
                &ToolCall::new("keyboard_type", json!({ "text": "hi" })),
                BackendKind::BackgroundWindow,
                Capabilities::SPATIAL_ONLY,
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedByBackend {
                tool: "keyboard_type".to_string(),
                backend: BackendKind::BackgroundWindow,
                capability: Capability::KeyboardInput,
            }
        );

        // Tools without requirements pass on any backend.
        assert!(ToolRegistry::new()
            .validate(
                &ToolCall::new("wait", json!({})),
                BackendKind::BackgroundWindow,
                Capabilities::SPATIAL_ONLY,
            )
            .is_ok());
    }

    #[test]
    fn test_defaults_and_clamping() {
        let call = validate("wait", json!({ "seconds": 500 })).unwrap();
        assert_eq!(call.action, Action::Wait { seconds: 30.0 });
        let call = validate("wait", json!(null)).unwrap();
        assert_eq!(call.action, Action::Wait { seconds: 1.0 });
        let call = validate("wait", json!({ "seconds": 1.5 })).unwrap();
        assert_eq!(call.action, Action::Wait { seconds: 1.5 });
        let call = validate("wait", json!({ "seconds": 0.2 })).unwrap();
        assert_eq!(call.action, Action::Wait { seconds: 1.0 });
        assert!(matches!(
            validate("wait", json!({ "seconds": "soon" })),
            Err(ValidationError::InvalidParameter { .. })
        ));

        let call = validate("mouse_scroll", json!({ "scroll_y": -400 })).unwrap();
        assert_eq!(
            call.action,
            Action::Scroll {
                at: None,
                notches_x: 0,
                notches_y: -50
            }
        );

        let call = validate("click_and_type", json!({ "x": 1, "y": 2, "text": "hi" })).unwrap();
        assert!(matches!(
            call.action,
            Action::ClickAndType {
                clear_existing: true,
                ..
            }
        ));

        let call = validate("task_complete", json!({ "summary": "done" })).unwrap();
        assert_eq!(
            call.action,
            Action::TaskComplete {
                summary: Some("done".to_string()),
                success: true
            }
        );
    }

    #[test]
    fn test_resolve_scroll_defaults_to_centre() {
        let call = validate("mouse_scroll", json!({ "scroll_y": 3 })).unwrap();
        let resolved = call
            .action
            .resolve(&SurfaceGeometry::new(1000, 600))
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedAction::Scroll {
                at: AbsolutePoint::new(500, 300),
                notches_x: 0,
                notches_y: 3
            }
        );
    }

    #[test]
    fn test_resolve_drag_uses_both_corners() {
        let call = validate(
            "mouse_drag",
            json!({ "start_x": 100, "start_y": 100, "end_x": 900, "end_y": 500 }),
        )
        .unwrap();
        let resolved = call
            .action
            .resolve(&SurfaceGeometry::new(1920, 1080))
            .unwrap();
        assert_eq!(
            resolved.points(),
            vec![AbsolutePoint::new(192, 108), AbsolutePoint::new(1728, 540)]
        );
    }
}
