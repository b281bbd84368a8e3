pub mod discovery;
pub mod execute;
pub mod pii;
pub mod registry;
pub mod skills;
pub mod workspace;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::SandboxError;
use crate::state::AppState;

pub use registry::ToolRegistry;

/// What a tool call produced. `is_error` marks a failed operation whose
/// details are still in `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    pub fn failed(value: Value) -> Self {
        Self {
            value,
            is_error: true,
        }
    }

    /// `{"success": false, "error": .., "kind": ..}` for a domain failure.
    pub fn from_error(err: &SandboxError) -> Self {
        Self::failed(json!({
            "success": false,
            "error": err.to_string(),
            "kind": err.kind(),
        }))
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments that do not match the tool's schema.
    #[error("{0}")]
    InvalidParams(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// An operation exposed to clients through `tools/call`.
///
/// Every tool is registered in a [`ToolRegistry`]; the server looks it up by
/// name and passes the shared [`AppState`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier, lowercase with underscores (e.g. "execute_code").
    fn name(&self) -> &str;

    /// Shown to clients so they know when to call the tool.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments, used as `inputSchema`.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError>;
}

pub(crate) fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params[name]
        .as_str()
        .ok_or_else(|| ToolError::InvalidParams(format!("Missing required parameter: {name}")))
}

pub(crate) fn optional_str<'a>(params: &'a Value, name: &str) -> Result<Option<&'a str>, ToolError> {
    match &params[name] {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(ToolError::InvalidParams(format!("Parameter {name} must be a string"))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use crate::config::{Config, PathsConfig};
    use crate::state::AppState;

    /// State rooted in a temp dir. The worker path cannot start, so only
    /// requests rejected before spawning succeed or fail meaningfully.
    pub fn state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths = PathsConfig::rooted_at(dir.path());
        config.sandbox.worker_program = Some(PathBuf::from("/nonexistent/code-sandbox"));
        let state = AppState::new(config).unwrap();
        (dir, state)
    }
}
