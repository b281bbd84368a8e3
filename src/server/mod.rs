//! MCP server over stdio.
//!
//! Each request runs on its own task so a long execution does not hold up
//! `ping` or `tools/list`. Responses go through a single writer task.
//! `notifications/cancelled` aborts the matching task; end of input aborts
//! them all. Aborting drops the worker handle, which kills the worker.
pub mod protocol;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::state::AppState;
use crate::tools::{ToolError, ToolRegistry};
use protocol::{Message, RpcError};

/// Largest accepted message. Bindings alone may be 10 MiB before JSON escaping.
const MAX_MESSAGE_BYTES: usize = 32 * 1024 * 1024;

/// One newline-terminated message from the input.
#[derive(Debug, PartialEq)]
enum Frame {
    Line(Vec<u8>),
    /// Longer than the limit; its bytes were discarded.
    Oversized,
}

/// Reads up to the next newline without decoding. Bytes past `limit` are
/// skipped rather than buffered. `None` at end of input.
async fn read_frame<R>(reader: &mut R, limit: usize) -> std::io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut oversized = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (oversized, line.is_empty()) {
                (true, _) => Some(Frame::Oversized),
                (false, true) => None,
                (false, false) => Some(Frame::Line(line)),
            });
        }
        let newline = available.iter().position(|&b| b == b'\n');
        let chunk = match newline {
            Some(pos) => &available[..pos],
            None => available,
        };
        if !oversized {
            if line.len() + chunk.len() > limit {
                oversized = true;
                line = Vec::new();
            } else {
                line.extend_from_slice(chunk);
            }
        }
        let consumed = newline.map_or(available.len(), |pos| pos + 1);
        reader.consume(consumed);
        if newline.is_some() {
            return Ok(Some(if oversized { Frame::Oversized } else { Frame::Line(line) }));
        }
    }
}

#[derive(Clone)]
pub struct McpServer {
    state: Arc<AppState>,
    tools: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(state: AppState, tools: ToolRegistry) -> Self {
        Self {
            state: Arc::new(state),
            tools: Arc::new(tools),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves stdin/stdout until stdin closes.
    pub async fn run_stdio(self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(100);

        let write_handle = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = out_rx.recv().await {
                let mut line = message.to_string();
                line.push('\n');
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!("Write error: {e}");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Flush error: {e}");
                    break;
                }
            }
        });

        let mut in_flight: HashMap<String, AbortHandle> = HashMap::new();
        let mut reader = BufReader::new(reader);

        while let Some(frame) = read_frame(&mut reader, MAX_MESSAGE_BYTES).await? {
            let bytes = match frame {
                Frame::Line(bytes) => bytes,
                Frame::Oversized => {
                    warn!("Dropping message larger than {MAX_MESSAGE_BYTES} bytes");
                    let error = RpcError::new(
                        protocol::INVALID_REQUEST,
                        format!("Message exceeds {MAX_MESSAGE_BYTES} bytes"),
                    );
                    let _ = out_tx.send(protocol::build_error(Value::Null, &error)).await;
                    continue;
                }
            };
            let Ok(text) = std::str::from_utf8(&bytes) else {
                warn!("Dropping message that is not valid UTF-8");
                let error = RpcError::new(protocol::PARSE_ERROR, "Parse error: invalid UTF-8");
                let _ = out_tx.send(protocol::build_error(Value::Null, &error)).await;
                continue;
            };
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            in_flight.retain(|_, handle| !handle.is_finished());

            match protocol::parse_message(line) {
                Ok(Message::Request { id, method, params }) => {
                    debug!("Request {id}: {method}");
                    let server = self.clone();
                    let out_tx = out_tx.clone();
                    let key = id.to_string();
                    let handle = tokio::spawn(async move {
                        let response = match server.dispatch(&method, params).await {
                            Ok(result) => protocol::build_result(id, result),
                            Err(e) => {
                                debug!("Request failed: {e}");
                                protocol::build_error(id, &e)
                            }
                        };
                        let _ = out_tx.send(response).await;
                    });
                    in_flight.insert(key, handle.abort_handle());
                }
                Ok(Message::Notification { method, params }) => {
                    self.notify(&method, &params, &mut in_flight);
                }
                Ok(Message::Response { id }) => {
                    debug!("Ignoring response {id}");
                }
                Err((id, e)) => {
                    warn!("Bad message: {e}");
                    let _ = out_tx.send(protocol::build_error(id, &e)).await;
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Input closed, aborting {} pending request(s)", in_flight.len());
        }
        for (_, handle) in in_flight.drain() {
            handle.abort();
        }
        drop(out_tx);
        let _ = write_handle.await;
        Ok(())
    }

    fn notify(&self, method: &str, params: &Value, in_flight: &mut HashMap<String, AbortHandle>) {
        match method {
            "notifications/initialized" => info!("Client initialized"),
            "notifications/cancelled" => {
                let key = params["requestId"].to_string();
                if let Some(handle) = in_flight.remove(&key) {
                    info!("Cancelling request {key}");
                    handle.abort();
                }
            }
            other => debug!("Ignoring notification {other}"),
        }
    }

    /// Result of one request method.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                let version = params["protocolVersion"]
                    .as_str()
                    .unwrap_or(protocol::PROTOCOL_VERSION);
                Ok(json!({
                    "protocolVersion": version,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {
                        "name": self.state.config.server.name,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": self.tools.tool_definitions()})),
            "tools/call" => self.call_tool(params).await,
            other => Err(RpcError::method_not_found(other)),
        }
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcError> {
        let name = params["name"]
            .as_str()
            .ok_or_else(|| RpcError::invalid_params("Missing required parameter: name"))?;
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool: {name}")))?;
        let arguments = match &params["arguments"] {
            Value::Null => json!({}),
            args @ Value::Object(_) => args.clone(),
            _ => return Err(RpcError::invalid_params("arguments must be an object")),
        };

        info!("Calling tool {name}");
        match tool.execute(arguments, &self.state).await {
            Ok(output) => Ok(protocol::tool_result(&output)),
            Err(ToolError::InvalidParams(message)) => Err(RpcError::invalid_params(message)),
            Err(ToolError::Internal(e)) => {
                error!("Tool {name} failed: {e:#}");
                Err(RpcError::new(protocol::INTERNAL_ERROR, format!("Tool {name} failed")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn server() -> (tempfile::TempDir, McpServer) {
        let (dir, state) = test_support::state();
        (dir, McpServer::new(state, ToolRegistry::with_builtin_tools()))
    }

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let (_dir, server) = server();
        let result = server
            .dispatch("initialize", json!({"protocolVersion": "2025-03-26"}))
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "code-execution");
        assert!(result["capabilities"]["tools"].is_object());

        assert_eq!(server.dispatch("ping", Value::Null).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_tools_list() {
        let (_dir, server) = server();
        let result = server.dispatch("tools/list", Value::Null).await.unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 14);
    }

    #[tokio::test]
    async fn test_tools_call_errors() {
        let (_dir, server) = server();
        let err = server
            .dispatch("tools/call", json!({"name": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, protocol::INVALID_PARAMS);

        let err = server
            .dispatch("tools/call", json!({"name": "sanitize_pii", "arguments": {}}))
            .await
            .unwrap_err();
        assert_eq!(err.code, protocol::INVALID_PARAMS);

        let err = server.dispatch("resources/list", Value::Null).await.unwrap_err();
        assert_eq!(err.code, protocol::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_call_result_shape() {
        let (_dir, server) = server();
        let result = server
            .dispatch(
                "tools/call",
                json!({"name": "sanitize_pii", "arguments": {"text": "mail a@b.io"}}),
            )
            .await
            .unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"]["pii_types"], json!(["EMAIL"]));
        assert!(result["content"][0]["text"].as_str().unwrap().contains("EMAIL_"));
    }

    #[tokio::test]
    async fn test_read_frame_splits_and_caps() {
        let input: &[u8] = b"short\n0123456789abcdef\nok\ntail";
        let mut reader = BufReader::with_capacity(4, input);
        assert_eq!(
            read_frame(&mut reader, 8).await.unwrap(),
            Some(Frame::Line(b"short".to_vec()))
        );
        assert_eq!(read_frame(&mut reader, 8).await.unwrap(), Some(Frame::Oversized));
        assert_eq!(
            read_frame(&mut reader, 8).await.unwrap(),
            Some(Frame::Line(b"ok".to_vec()))
        );
        assert_eq!(
            read_frame(&mut reader, 8).await.unwrap(),
            Some(Frame::Line(b"tail".to_vec()))
        );
        assert_eq!(read_frame(&mut reader, 8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_server() {
        let (_dir, server) = server();
        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, client_out) = duplex(64 * 1024);
        let serve = tokio::spawn(server.serve(server_in, server_out));

        client_in
            .write_all(b"\xff\xfe garbage\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(client_out).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["id"], Value::Null);
        assert_eq!(first["error"]["code"], protocol::PARSE_ERROR);
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["id"], 2);
        assert_eq!(second["result"], json!({}));

        drop(client_in);
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_over_pipes() {
        let (_dir, server) = server();
        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, client_out) = duplex(64 * 1024);
        let serve = tokio::spawn(server.serve(server_in, server_out));

        client_in
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\
                  {\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
                  not json\n",
            )
            .await
            .unwrap();

        let mut lines = BufReader::new(client_out).lines();
        let mut responses = Vec::new();
        for _ in 0..2 {
            let line = lines.next_line().await.unwrap().unwrap();
            responses.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        let ping = responses.iter().find(|r| r["id"] == 1).unwrap();
        assert_eq!(ping["result"], json!({}));
        let parse_error = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse_error["error"]["code"], protocol::PARSE_ERROR);

        drop(client_in);
        serve.await.unwrap().unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
