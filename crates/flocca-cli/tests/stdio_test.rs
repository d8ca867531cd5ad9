//! End-to-end tests over the newline-delimited stdio transport.
//!
//! The server runs against in-memory pipes: requests are written as JSON
//! lines, the input side is closed, and the emitted lines are collected
//! once the server shuts down.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use flocca_core::{Connector, ToolDefinition, ToolResult};
use flocca_mcp::ToolServer;

/// Drive a server with raw input lines and collect its output lines.
async fn run_session(connector: Arc<dyn Connector>, input: &str) -> Vec<Value> {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);

    let server = ToolServer::new(connector);
    let server_task =
        tokio::spawn(async move { server.run(BufReader::new(server_read), server_write).await });

    client_io.write_all(input.as_bytes()).await.unwrap();
    client_io.shutdown().await.unwrap();

    let mut output = String::new();
    client_io.read_to_string(&mut output).await.unwrap();
    server_task.await.unwrap().unwrap();

    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("server emitted invalid JSON"))
        .collect()
}

#[tokio::test]
async fn test_initialize_then_tools_list_on_db_connector() {
    let responses = run_session(
        Arc::new(flocca_db::DbConnector::new()),
        "{\"method\":\"initialize\",\"id\":0}\n{\"method\":\"tools/list\",\"id\":1}\n",
    )
    .await;

    assert_eq!(responses.len(), 2);

    let init = &responses[0];
    assert_eq!(init["id"], 0);
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert!(init["result"]["capabilities"]["tools"].is_object());
    assert_eq!(init["result"]["serverInfo"]["name"], "db-mcp");

    let list = &responses[1];
    assert_eq!(list["id"], 1);
    let tools = list["result"]["tools"].as_array().unwrap();
    assert!(!tools.is_empty());
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"db_query"));
    for name in names {
        assert!(
            name.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'),
            "invalid tool name on the wire: {name}"
        );
    }
}

#[tokio::test]
async fn test_unparseable_lines_and_unknown_methods_are_silent() {
    let input = concat!(
        "this is not json\n",
        "{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"resources/list\"}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"initialized\"}\n",
        "{\"jsonrpc\":\"2.0\",\"id\":6,\"method\":\"ping\"}\n",
    );
    let responses = run_session(Arc::new(flocca_db::DbConnector::new()), input).await;

    // Only the ping gets an answer: garbage, the unknown method, and the
    // notification produce no output lines at all.
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 6);
    assert!(responses[0]["result"].is_object());
}

#[tokio::test]
async fn test_tool_call_failure_rides_in_result_not_error() {
    let input = "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/call\",\"params\":{\"name\":\"db_query\",\"arguments\":{\"text\":\"SELECT 1\"}}}\n";
    let responses = run_session(Arc::new(flocca_db::DbConnector::new()), input).await;

    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    // Unconfigured connector: failure is in the envelope, not JSON-RPC.
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    assert!(response["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("not configured"));
}

/// Connector with one slow and one fast tool, to observe completion-order
/// responses.
struct TwoSpeedConnector;

#[async_trait]
impl Connector for TwoSpeedConnector {
    fn name(&self) -> &'static str {
        "twospeed"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("slow_op", "Slow", json!({ "type": "object", "properties": {} })),
            ToolDefinition::new("fast_op", "Fast", json!({ "type": "object", "properties": {} })),
        ]
    }

    async fn call(&self, name: &str, _arguments: Value) -> ToolResult {
        match name {
            "slow_op" => {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                ToolResult::text("slow done")
            }
            "fast_op" => ToolResult::text("fast done"),
            other => ToolResult::error(format!("Unknown tool: {other}")),
        }
    }
}

#[tokio::test]
async fn test_in_flight_calls_complete_out_of_order() {
    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"slow_op\"}}\n",
        "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"fast_op\"}}\n",
    );
    let responses = run_session(Arc::new(TwoSpeedConnector), input).await;

    assert_eq!(responses.len(), 2);
    // The fast call overtakes the slow one: responses are emitted in
    // completion order, not request order.
    assert_eq!(responses[0]["id"], 2);
    assert_eq!(responses[1]["id"], 1);
    assert_eq!(responses[1]["result"]["content"][0]["text"], "slow done");
}
