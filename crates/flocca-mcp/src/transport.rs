//! Line-oriented JSON-RPC transport.
//!
//! One input line yields at most one parsed message; lines that are not
//! valid JSON-RPC are dropped without a response. Outgoing responses are
//! funneled through a single writer task so concurrent tool calls cannot
//! interleave bytes on stdout.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// A successfully parsed input line.
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// Parse one input line. Returns `None` for anything unusable; the caller
/// drops those silently.
pub fn parse_line(line: &str) -> Option<Incoming> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    // A request carries an id; try that shape first.
    if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(line) {
        return Some(Incoming::Request(request));
    }
    if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(line) {
        return Some(Incoming::Notification(notification));
    }

    tracing::debug!(line, "dropping unparseable input line");
    None
}

/// Spawn the writer task draining `rx` onto `writer`, one JSON line per
/// response, flushing after each.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<JsonRpcResponse>,
) -> tokio::task::JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize response");
                    continue;
                }
            };
            tracing::debug!(%json, "sending");
            if writer.write_all(json.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                tracing::error!("output stream closed, stopping writer");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;

    #[test]
    fn test_parse_request() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        match msg {
            Some(Incoming::Request(req)) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id, RequestId::Number(1));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","method":"initialized"}"#);
        assert!(matches!(msg, Some(Incoming::Notification(_))));
    }

    #[test]
    fn test_garbage_is_dropped() {
        assert!(parse_line("not json at all").is_none());
        assert!(parse_line("{\"half\":").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        // Valid JSON but not a JSON-RPC message shape.
        assert!(parse_line("[1,2,3]").is_none());
        assert!(parse_line("42").is_none());
    }

    #[tokio::test]
    async fn test_writer_emits_one_line_per_response() {
        let (client, server) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_writer(server, rx);

        tx.send(JsonRpcResponse::success(
            RequestId::Number(1),
            serde_json::json!({"a": 1}),
        ))
        .await
        .unwrap();
        tx.send(JsonRpcResponse::success(
            RequestId::Number(2),
            serde_json::json!({"b": 2}),
        ))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut out = String::new();
        let mut client = client;
        client.read_to_string(&mut out).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"id\":1"));
        assert!(lines[1].contains("\"id\":2"));
    }
}
