use serde::{Deserialize, Serialize};

use crate::schema::JsonSchema;

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: JsonSchema,
}

/// A fully-assembled tool call, as handed to dispatch. `parameters` is
/// the raw JSON the model streamed (opaque to dispatch itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: serde_json::Value,
}

/// What a tool run produces. Failures are data, not errors: a tool that
/// cannot do its job returns `is_error = true` with a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_constructors() {
        assert!(!ToolResult::ok("fine").is_error);
        assert!(ToolResult::error("broken").is_error);
    }

    #[test]
    fn tool_definition_serializes_schema() {
        let def = ToolDefinition {
            name: "echo".into(),
            description: "Echo the input".into(),
            parameters: JsonSchema::object(vec![("x", JsonSchema::string("Value"))], &["x"]),
        };
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["parameters"]["type"], "object");
        assert!(json["parameters"]["properties"]["x"].is_object());
    }
}
