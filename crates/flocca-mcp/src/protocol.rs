//! JSON-RPC 2.0 message types for the MCP wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version emitted in every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version advertised by `initialize`.
pub const MCP_VERSION: &str = "2024-11-05";

/// Request ID: string, number, or null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

/// Incoming JSON-RPC request.
///
/// The `jsonrpc` member is accepted as optional: several host clients omit
/// it and the servers this shell replaces never validated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Incoming notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: Self::INVALID_PARAMS,
            message: format!("Invalid params: {detail}"),
        }
    }
}

/// `tools/call` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_jsonrpc_member() {
        // Hosts are allowed to omit the version member entirely.
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"method":"initialize","id":0}"#).unwrap();
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, RequestId::Number(0));
        assert!(req.jsonrpc.is_none());
    }

    #[test]
    fn test_request_id_variants() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        assert_eq!(req.id, RequestId::String("abc".to_string()));

        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, RequestId::Null);
    }

    #[test]
    fn test_notification_has_no_id() {
        // A message without `id` fails to parse as a request.
        let raw = r#"{"jsonrpc":"2.0","method":"initialized"}"#;
        assert!(serde_json::from_str::<JsonRpcRequest>(raw).is_err());
        let notif: JsonRpcNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(notif.method, "initialized");
    }

    #[test]
    fn test_response_serialization() {
        let resp = JsonRpcResponse::success(RequestId::Number(7), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("\"error\""));

        let resp = JsonRpcResponse::error(RequestId::Null, JsonRpcError::method_not_found("x/y"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("-32601"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_tool_call_params() {
        let params: ToolCallParams =
            serde_json::from_str(r#"{"name":"db_query","arguments":{"text":"SELECT 1"}}"#).unwrap();
        assert_eq!(params.name, "db_query");
        assert!(params.arguments.is_some());

        let params: ToolCallParams = serde_json::from_str(r#"{"name":"db_get_schema"}"#).unwrap();
        assert!(params.arguments.is_none());
    }
}
