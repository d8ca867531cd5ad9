//! Method dispatcher for the MCP tool server.
//!
//! The read loop never blocks on a tool handler: each `tools/call` runs as
//! its own task and responses are emitted in completion order, so slow
//! outbound calls do not hold up later requests.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use flocca_core::{Connector, ToolResult};

use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, ToolCallParams, MCP_VERSION,
};
use crate::transport::{self, Incoming};

/// What to do with a request whose method is not part of the MCP triad.
///
/// The servers this shell replaces silently ignored unknown methods; strict
/// mode answers with a JSON-RPC `method_not_found` error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownMethodPolicy {
    #[default]
    Ignore,
    Reject,
}

/// MCP server wrapping a single connector.
pub struct ToolServer {
    connector: Arc<dyn Connector>,
    policy: UnknownMethodPolicy,
}

impl ToolServer {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            policy: UnknownMethodPolicy::default(),
        }
    }

    pub fn with_unknown_method_policy(mut self, policy: UnknownMethodPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the server over stdin/stdout until EOF.
    pub async fn run_stdio(self) -> std::io::Result<()> {
        self.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Run the server over arbitrary streams (tests use in-memory pipes).
    pub async fn run<R, W>(self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(connector = self.connector.name(), "MCP server starting");

        let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
        let writer_task = transport::spawn_writer(writer, rx);

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            match transport::parse_line(&line) {
                Some(Incoming::Request(request)) => self.dispatch(request, &tx).await,
                Some(Incoming::Notification(notification)) => {
                    tracing::debug!(method = %notification.method, "notification received");
                }
                None => {}
            }
        }

        tracing::info!("EOF received, shutting down");
        drop(tx);
        let _ = writer_task.await;
        Ok(())
    }

    /// Route one request. Cheap methods are answered inline; `tools/call`
    /// is spawned so the loop can keep reading.
    async fn dispatch(&self, request: JsonRpcRequest, tx: &mpsc::Sender<JsonRpcResponse>) {
        tracing::debug!(method = %request.method, id = ?request.id, "handling request");

        if request.method == "tools/call" {
            let connector = Arc::clone(&self.connector);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = call_tool(connector, request.id, request.params).await;
                let _ = tx.send(response).await;
            });
            return;
        }

        if let Some(response) = self.handle_request(request).await {
            let _ = tx.send(response).await;
        }
    }

    /// Handle a request to completion. Returns `None` when the method is
    /// unknown and the policy says to stay silent.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => {
                Some(call_tool(Arc::clone(&self.connector), request.id, request.params).await)
            }
            "ping" => Some(JsonRpcResponse::success(request.id, json!({}))),
            method => match self.policy {
                UnknownMethodPolicy::Ignore => {
                    tracing::debug!(method, "ignoring unknown method");
                    None
                }
                UnknownMethodPolicy::Reject => {
                    tracing::warn!(method, "rejecting unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::method_not_found(method),
                    ))
                }
            },
        }
    }

    /// `initialize` always succeeds, regardless of configuration state.
    fn handle_initialize(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": format!("{}-mcp", self.connector.name()),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(id, json!({ "tools": self.connector.tools() }))
    }
}

/// Execute a tool call. Failures of any kind - bad params, unknown tool,
/// handler errors - are folded into the `isError` envelope; the caller
/// always receives a JSON-RPC `result`.
async fn call_tool(
    connector: Arc<dyn Connector>,
    id: RequestId,
    params: Option<Value>,
) -> JsonRpcResponse {
    let result = match params.map(serde_json::from_value::<ToolCallParams>) {
        Some(Ok(params)) => {
            tracing::info!(tool = %params.name, "calling tool");
            connector
                .call(&params.name, params.arguments.unwrap_or(Value::Null))
                .await
        }
        Some(Err(e)) => ToolResult::error(format!("Invalid tool call params: {e}")),
        None => ToolResult::error("Invalid tool call params: missing params"),
    };

    JsonRpcResponse::success(id, json!(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flocca_core::ToolDefinition;

    struct EchoConnector;

    #[async_trait]
    impl Connector for EchoConnector {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn tools(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition::new(
                "echo_text",
                "Echo the input back",
                json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            )]
        }

        async fn call(&self, name: &str, arguments: Value) -> ToolResult {
            match name {
                "echo_text" => ToolResult::text(
                    arguments["text"].as_str().unwrap_or_default().to_string(),
                ),
                other => ToolResult::error(format!("Unknown tool: {other}")),
            }
        }
    }

    fn server() -> ToolServer {
        ToolServer::new(Arc::new(EchoConnector))
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: RequestId::Number(1),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_initialize_shape() {
        let resp = server()
            .handle_request(request("initialize", None))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], "echo-mcp");
    }

    #[tokio::test]
    async fn test_initialize_succeeds_repeatedly() {
        let server = server();
        for _ in 0..2 {
            let resp = server
                .handle_request(request("initialize", None))
                .await
                .unwrap();
            assert!(resp.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_tools_list() {
        let resp = server()
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        let tools = resp.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "echo_text");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call_roundtrip() {
        let resp = server()
            .handle_request(request(
                "tools/call",
                Some(json!({"name": "echo_text", "arguments": {"text": "hi"}})),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool_is_error_envelope() {
        let resp = server()
            .handle_request(request("tools/call", Some(json!({"name": "nope"}))))
            .await
            .unwrap();
        // Failure rides in the result envelope, never the JSON-RPC error.
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_tools_call_missing_params_is_error_envelope() {
        let resp = server()
            .handle_request(request("tools/call", None))
            .await
            .unwrap();
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_method_ignored_by_default() {
        let resp = server()
            .handle_request(request("resources/list", None))
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected_in_strict_mode() {
        let server = server().with_unknown_method_policy(UnknownMethodPolicy::Reject);
        let resp = server
            .handle_request(request("resources/list", None))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = server().handle_request(request("ping", None)).await.unwrap();
        assert!(resp.result.unwrap().as_object().unwrap().is_empty());
    }
}
