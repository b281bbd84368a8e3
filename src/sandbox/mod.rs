//! Sandboxed execution engine.
//!
//! The security model is layered:
//!
//! 1. Request validation and static screening (controller, surface)
//! 2. A fixed capability surface built fresh for every run (surface)
//! 3. An interpreter with no ambient I/O of its own (script)
//! 4. Process isolation: each execution is a separate worker process
//! 5. Kernel rlimits plus a host-side watchdog (limits)
pub mod controller;
pub mod limits;
pub mod script;
pub mod surface;
pub mod worker;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use controller::SandboxController;

/// One piece of code to evaluate. Immutable once built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    /// Pre-bound variables, visible to the code by name.
    #[serde(default)]
    pub bindings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub limits: Option<LimitsOverride>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_binding(mut self, name: &str, value: serde_json::Value) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    pub fn with_limits(mut self, limits: LimitsOverride) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Per-call limit overrides. Clamped by the controller, never trusted.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LimitsOverride {
    pub timeout_seconds: Option<f64>,
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub timeout: Duration,
    pub memory_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_bytes: 500 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    TimedOut,
    MemoryExceeded,
    RuntimeError,
    CapabilityViolation,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::TimedOut => "timed_out",
            Outcome::MemoryExceeded => "memory_exceeded",
            Outcome::RuntimeError => "runtime_error",
            Outcome::CapabilityViolation => "capability_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    /// The limit that was hit: seconds for timeouts, bytes for memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub result: Option<serde_json::Value>,
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<ErrorInfo>,
    pub execution_time_ms: u64,
    pub execution_id: Uuid,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// A result for a request rejected before any worker was started.
    pub fn rejected(execution_id: Uuid, outcome: Outcome, error: ErrorInfo) -> Self {
        Self {
            outcome,
            result: None,
            output: String::new(),
            output_truncated: false,
            error: Some(error),
            execution_time_ms: 0,
            execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ExecutionRequest = serde_json::from_str(r#"{"code": "result = 1"}"#).unwrap();
        assert_eq!(request.code, "result = 1");
        assert!(request.bindings.is_empty());
        assert!(request.limits.is_none());
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(serde_json::to_value(Outcome::TimedOut).unwrap(), "timed_out");
        assert_eq!(Outcome::CapabilityViolation.as_str(), "capability_violation");
    }

    #[test]
    fn test_error_info_omits_missing_limit() {
        let json = serde_json::to_value(ErrorInfo::new("ValueError", "bad")).unwrap();
        assert!(json.get("limit").is_none());
    }
}
