//! Tool descriptors, the call result envelope, and the connector trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Static tool descriptor returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Content block inside a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

/// Uniform tool call envelope: `{content: [...], isError?}`.
///
/// Failure is signaled only through `is_error`; tool calls never surface as
/// JSON-RPC level errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "isError",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Successful result with a plain text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Successful result with a JSON payload serialized to text.
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// Error result with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }

    /// Error result carrying a structured `{"error": {...}}` payload with a
    /// machine-readable code, the style used by the infra connectors.
    pub fn structured_error(err: &Error) -> Self {
        let mut payload = serde_json::json!({
            "error": {
                "message": err.to_string(),
                "code": err.code(),
            }
        });
        if let Some(status) = err.http_status() {
            payload["error"]["http_status"] = Value::from(status);
        }
        Self::error(payload.to_string())
    }

    /// Like [`ToolResult::structured_error`], but generic upstream failures
    /// carry the connector's own code (`PROMETHEUS_ERROR`,
    /// `ELASTICSEARCH_ERROR`, ...) instead of the shared `API_ERROR`.
    pub fn vendor_error(err: &Error, default_code: &str) -> Self {
        let code = match err {
            Error::Api { .. } | Error::Http(_) | Error::Serialization(_) => default_code,
            other => other.code(),
        };
        let mut payload = serde_json::json!({
            "error": {
                "message": err.to_string(),
                "code": code,
            }
        });
        if let Some(status) = err.http_status() {
            payload["error"]["http_status"] = Value::from(status);
        }
        Self::error(payload.to_string())
    }

    /// True when the envelope signals failure.
    pub fn failed(&self) -> bool {
        self.is_error == Some(true)
    }

    /// The first text block, for assertions and logging.
    pub fn text_content(&self) -> &str {
        match self.content.first() {
            Some(ToolContent::Text { text }) => text,
            None => "",
        }
    }
}

/// Normalize a tool name to the `[a-z0-9_-]` character class accepted by
/// host tooling. Dots become underscores and camelCase boundaries are
/// transliterated (`notion.listDatabases` -> `notion_list_databases`).
pub fn normalize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            // '.', '/', spaces and anything else collapse to '_'
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out
}

/// Deserialize tool arguments into a typed params struct. `null` (absent
/// arguments) is treated as an empty object; anything that does not fit the
/// declared shape becomes an `INVALID_REQUEST` error.
pub fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> crate::error::Result<T> {
    let value = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(value).map_err(|e| Error::InvalidRequest(e.to_string()))
}

/// One vendor-specific adapter exposing a fixed set of tools.
///
/// A connector owns its session configuration and performs the outbound
/// calls; the MCP server only routes `(name, arguments)` pairs into it.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short connector identifier, e.g. "gitlab".
    fn name(&self) -> &'static str;

    /// Static tool descriptors, returned verbatim by `tools/list`.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Execute a tool by (possibly non-normalized) name. Implementations
    /// must catch every failure and fold it into the envelope: this method
    /// does not return `Result`.
    async fn call(&self, name: &str, arguments: Value) -> ToolResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dotted_camel_case() {
        assert_eq!(
            normalize_tool_name("notion.listDatabases"),
            "notion_list_databases"
        );
        assert_eq!(normalize_tool_name("figma.getFrameSpec"), "figma_get_frame_spec");
        assert_eq!(normalize_tool_name("gitlab.health"), "gitlab_health");
    }

    #[test]
    fn test_normalize_already_normal() {
        assert_eq!(normalize_tool_name("db_query"), "db_query");
        assert_eq!(normalize_tool_name("search_repositories"), "search_repositories");
        assert_eq!(normalize_tool_name("azure-vm-list"), "azure-vm-list");
    }

    #[test]
    fn test_normalized_names_match_character_class() {
        for name in [
            "confluence.listSpaces",
            "zephyr_enterprise.addTestCasesToCycle",
            "azure.vm.start",
            "observability.getServiceHealthSummary",
        ] {
            let normalized = normalize_tool_name(name);
            assert!(
                normalized
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'),
                "{normalized} contains invalid characters"
            );
        }
    }

    #[test]
    fn test_envelope_serialization() {
        let ok = ToolResult::text("hello");
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(!json.contains("isError"));

        let err = ToolResult::error("boom");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"isError\":true"));
    }

    #[test]
    fn test_structured_error_payload() {
        let result = ToolResult::structured_error(&Error::rate_limited("throttled", Some(2)));
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "RATE_LIMITED");
        assert_eq!(payload["error"]["http_status"], 429);
    }
}
