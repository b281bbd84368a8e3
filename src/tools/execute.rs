use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Tool, ToolError, ToolOutput};
use crate::sandbox::{ExecutionRequest, ExecutionResult, LimitsOverride};
use crate::state::AppState;

/// Runs a script in the sandbox and returns its `result` and output.
pub struct ExecuteCodeTool;

fn request_from_params(params: &Value) -> Result<ExecutionRequest, ToolError> {
    let code = required_str(params, "code")?;

    // `context_vars` is the historical name of `bindings`.
    let bindings = match (&params["bindings"], &params["context_vars"]) {
        (Value::Object(map), _) | (Value::Null, Value::Object(map)) => map.clone(),
        (Value::Null, Value::Null) => serde_json::Map::new(),
        _ => {
            return Err(ToolError::InvalidParams(
                "Parameter bindings must be an object".to_string(),
            ))
        }
    };

    let timeout_seconds = match &params["timeout_seconds"] {
        Value::Null => None,
        v => Some(v.as_f64().ok_or_else(|| {
            ToolError::InvalidParams("Parameter timeout_seconds must be a number".to_string())
        })?),
    };
    let memory_mb = match &params["memory_mb"] {
        Value::Null => None,
        v => Some(v.as_u64().ok_or_else(|| {
            ToolError::InvalidParams("Parameter memory_mb must be a positive integer".to_string())
        })?),
    };

    let mut request = ExecutionRequest::new(code);
    request.bindings = bindings;
    if timeout_seconds.is_some() || memory_mb.is_some() {
        request = request.with_limits(LimitsOverride {
            timeout_seconds,
            memory_mb,
        });
    }
    Ok(request)
}

pub fn result_to_json(result: &ExecutionResult) -> Value {
    json!({
        "success": result.is_success(),
        "outcome": result.outcome.as_str(),
        "result": result.result,
        "output": result.output,
        "output_truncated": result.output_truncated,
        "error": result.error,
        "execution_time_ms": result.execution_time_ms,
        "execution_id": result.execution_id.to_string(),
    })
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute a script in the sandbox. Process large data inside the sandbox and return only \
         a summary: assign the value to return to `result`, use print() for diagnostics. \
         Available: json, re, math, statistics, datetime, base64, collections, the data helpers \
         (filter_by_field, summarize_list, aggregate_stats, format_output) and the workspace \
         helpers (read_file, write_file, list_files, delete_file)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Script source"
                },
                "bindings": {
                    "type": "object",
                    "description": "Variables made available to the script by name"
                },
                "context_vars": {
                    "type": "object",
                    "description": "Alias of bindings"
                },
                "timeout_seconds": {
                    "type": "number",
                    "description": "Wall-clock limit (default 30, clamped to the configured maximum)"
                },
                "memory_mb": {
                    "type": "integer",
                    "description": "Memory limit in MB (default 500, clamped to the configured maximum)"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let request = request_from_params(&params)?;
        let result = state.controller.execute(request).await;
        let value = result_to_json(&result);
        Ok(if result.is_success() {
            ToolOutput::ok(value)
        } else {
            ToolOutput::failed(value)
        })
    }
}

/// Reports workspace, skills, catalog, limits and execution counters.
pub struct ExecutionStatsTool;

#[async_trait]
impl Tool for ExecutionStatsTool {
    fn name(&self) -> &str {
        "get_execution_stats"
    }

    fn description(&self) -> &str {
        "Statistics about the execution environment: workspace size, saved skills, \
         tool catalog, configured limits and execution counters."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let sandbox = state.controller.config();
        let limits = sandbox.default_limits();
        let categories: Vec<String> = state.catalog.categories().keys().cloned().collect();

        Ok(ToolOutput::ok(json!({
            "workspace": {
                "path": state.workspace().root().display().to_string(),
                "file_count": state.workspace().file_count(),
            },
            "skills": {
                "count": state.skills.count(),
                "path": state.skills.dir().display().to_string(),
            },
            "tool_registry": {
                "categories": categories,
                "total_tools": state.catalog.total_tools(),
            },
            "capabilities": [
                "sandboxed_execution",
                "progressive_tool_discovery",
                "pii_tokenization",
                "skills_persistence",
                "workspace_files",
            ],
            "limits": {
                "default_timeout_seconds": limits.timeout.as_secs_f64(),
                "default_memory_mb": limits.memory_bytes / (1024 * 1024),
                "max_timeout_seconds": sandbox.max_timeout_seconds,
                "max_memory_mb": sandbox.max_memory_mb,
                "max_output_bytes": sandbox.max_output_bytes,
                "max_concurrent_executions": sandbox.max_concurrent_executions,
            },
            "executions": state.controller.stats().snapshot(),
            "pii_tokens": state.tokenizer.vault().len(),
        })))
    }
}
