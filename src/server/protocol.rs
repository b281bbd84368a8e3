//! JSON-RPC 2.0 framing for the MCP stdio transport: one JSON message per
//! line in each direction.
use serde_json::{json, Value};
use thiserror::Error;

use crate::tools::ToolOutput;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request { id: Value, method: String, params: Value },
    Notification { method: String, params: Value },
    /// A response to something we never send; ignored.
    Response { id: Value },
}

/// Decodes a line. On failure, returns the id to answer with (`null` when
/// it could not be read) and the error.
pub fn parse_message(line: &str) -> Result<Message, (Value, RpcError)> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| (Value::Null, RpcError::new(PARSE_ERROR, format!("Parse error: {e}"))))?;

    let Value::Object(mut obj) = value else {
        return Err((Value::Null, RpcError::new(INVALID_REQUEST, "Invalid request")));
    };
    let id = obj.remove("id");
    let params = obj.remove("params").unwrap_or(Value::Null);

    match (obj.remove("method"), id) {
        (Some(Value::String(method)), Some(id)) if !id.is_null() => {
            Ok(Message::Request { id, method, params })
        }
        (Some(Value::String(method)), _) => Ok(Message::Notification { method, params }),
        (None, Some(id)) if obj.contains_key("result") || obj.contains_key("error") => {
            Ok(Message::Response { id })
        }
        (_, id) => Err((
            id.unwrap_or(Value::Null),
            RpcError::new(INVALID_REQUEST, "Invalid request"),
        )),
    }
}

pub fn build_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn build_error(id: Value, error: &RpcError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message,
        },
    })
}

/// `tools/call` result: the value as pretty JSON text plus structured content.
pub fn tool_result(output: &ToolOutput) -> Value {
    let text = serde_json::to_string_pretty(&output.value).unwrap_or_else(|_| output.value.to_string());
    json!({
        "content": [{"type": "text", "text": text}],
        "structuredContent": output.value,
        "isError": output.is_error,
    })
}
