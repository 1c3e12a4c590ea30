//! Tool registry for the agent.
//!
//! Tools are the only way the oracle can act on a surface. The catalog is
//! closed: anything the oracle names that is not listed in [`catalog::CATALOG`]
//! is rejected before it can reach a backend.

mod catalog;
pub mod keys;
mod validation;

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::backend::BackendKind;
use crate::llm::{FunctionDefinition, ToolDefinition};

pub use catalog::CATALOG;
pub use keys::Key;
pub use validation::{
    Action, MouseButton, ResolvedAction, ToolCall, ValidatedCall, ValidationError,
};

/// Input capability a backend may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SpatialInput,
    KeyboardInput,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SpatialInput => write!(f, "spatial-input"),
            Self::KeyboardInput => write!(f, "keyboard-input"),
        }
    }
}

/// The capability set of a bound backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub spatial: bool,
    pub keyboard: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        spatial: true,
        keyboard: true,
    };

    pub const SPATIAL_ONLY: Self = Self {
        spatial: true,
        keyboard: false,
    };

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::SpatialInput => self.spatial,
            Capability::KeyboardInput => self.keyboard,
        }
    }
}

/// Whether re-issuing a tool after an unknown outcome is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    SafeToRetry,
    NotIdempotent,
}

/// Parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Normalized 0..=1000 coordinate component.
    Coordinate,
    Integer,
    Number,
    Bool,
    Text,
    KeyList,
    Choice(&'static [&'static str]),
}

impl ParamKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::Coordinate => "number in 0..=1000",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "boolean",
            Self::Text => "string",
            Self::KeyList => "array of key names",
            Self::Choice(_) => "one of the allowed values",
        }
    }

    fn json_schema(&self, description: &str) -> Value {
        match self {
            Self::Coordinate => json!({
                "type": "number",
                "minimum": 0,
                "maximum": 1000,
                "description": description,
            }),
            Self::Integer => json!({ "type": "integer", "description": description }),
            Self::Number => json!({ "type": "number", "description": description }),
            Self::Bool => json!({ "type": "boolean", "description": description }),
            Self::Text => json!({ "type": "string", "description": description }),
            Self::KeyList => json!({
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "description": description,
            }),
            Self::Choice(values) => json!({
                "type": "string",
                "enum": values,
                "description": description,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Names of every tool in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    MouseClick,
    MouseDoubleClick,
    MouseHover,
    MouseDrag,
    MouseScroll,
    KeyboardType,
    KeyboardPress,
    ClearText,
    ClickAndType,
    Wait,
    TaskComplete,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MouseClick => "mouse_click",
            Self::MouseDoubleClick => "mouse_double_click",
            Self::MouseHover => "mouse_hover",
            Self::MouseDrag => "mouse_drag",
            Self::MouseScroll => "mouse_scroll",
            Self::KeyboardType => "keyboard_type",
            Self::KeyboardPress => "keyboard_press",
            Self::ClearText => "clear_text",
            Self::ClickAndType => "click_and_type",
            Self::Wait => "wait",
            Self::TaskComplete => "task_complete",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Definition of one catalog entry.
#[derive(Debug)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub description: &'static str,
    /// Capabilities the bound backend must offer. Empty = handled by the session itself.
    pub requires: &'static [Capability],
    pub idempotency: Idempotency,
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Whether the tool needs a backend at all.
    pub fn needs_backend(&self) -> bool {
        !self.requires.is_empty()
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in self.params {
            properties.insert(
                param.name.to_string(),
                param.kind.json_schema(param.description),
            );
            if param.required {
                required.push(param.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Information about a tool for display purposes.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub requires: Vec<Capability>,
    pub idempotency: Idempotency,
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<&'static str, &'static ToolSpec>,
}

impl ToolRegistry {
    /// Create a registry holding the whole catalog.
    pub fn new() -> Self {
        let tools = CATALOG.iter().map(|spec| (spec.name(), spec)).collect();
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&'static ToolSpec> {
        self.tools.get(name).copied()
    }

    /// List all available tools, in catalog order.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        CATALOG
            .iter()
            .filter(|spec| self.tools.contains_key(spec.name()))
            .map(|spec| ToolInfo {
                name: spec.name().to_string(),
                description: spec.description.to_string(),
                requires: spec.requires.to_vec(),
                idempotency: spec.idempotency,
            })
            .collect()
    }

    /// Get tool schemas in LLM-compatible format.
    pub fn get_tool_schemas(&self) -> Vec<ToolDefinition> {
        CATALOG
            .iter()
            .filter(|spec| self.tools.contains_key(spec.name()))
            .map(|spec| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: spec.name().to_string(),
                    description: spec.description.to_string(),
                    parameters: spec.parameters_schema(),
                },
            })
            .collect()
    }

    /// Validate an oracle tool call against the catalog and the bound backend.
    ///
    /// Checks, in order: the tool exists, the arguments are an object, required
    /// parameters are present and well-typed, coordinates lie in `0..=1000`, and
    /// the backend offers every capability the tool requires.
    pub fn validate(
        &self,
        call: &ToolCall,
        backend: BackendKind,
        capabilities: Capabilities,
    ) -> Result<ValidatedCall, ValidationError> {
        let spec = self
            .get(&call.name)
            .ok_or_else(|| ValidationError::UnknownTool {
                name: call.name.clone(),
            })?;

        let action = validation::parse_action(spec, &call.arguments)?;

        if let Some(missing) = spec
            .requires
            .iter()
            .find(|capability| !capabilities.supports(**capability))
        {
            return Err(ValidationError::UnsupportedByBackend {
                tool: spec.name().to_string(),
                backend,
                capability: *missing,
            });
        }

        Ok(ValidatedCall {
            tool: spec.kind,
            idempotency: spec.idempotency,
            action,
            call: call.clone(),
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_unique() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.list_tools().len(), CATALOG.len());
    }

    #[test]
    fn test_schemas_mark_required_params() {
        let registry = ToolRegistry::new();
        let schemas = registry.get_tool_schemas();
        let click_and_type = schemas
            .iter()
            .find(|s| s.function.name == "click_and_type")
            .unwrap();
        let required = click_and_type.function.parameters["required"]
            .as_array()
            .unwrap();
        assert!(required.contains(&json!("text")));
        assert!(required.contains(&json!("x")));
        assert!(!required.contains(&json!("clear_existing")));
        assert_eq!(
            click_and_type.function.parameters["properties"]["x"]["maximum"],
            json!(1000)
        );
    }

    #[test]
    fn test_backendless_tools() {
        let registry = ToolRegistry::new();
        assert!(!registry.get("wait").unwrap().needs_backend());
        assert!(!registry.get("task_complete").unwrap().needs_backend());
        assert!(registry.get("mouse_click").unwrap().needs_backend());
        assert_eq!(
            registry.get("mouse_hover").unwrap().idempotency,
            Idempotency::SafeToRetry
        );
    }
}
