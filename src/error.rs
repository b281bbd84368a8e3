//! Error taxonomy shared by the sandbox, the PII vault and the collaborators
//! (workspace, skill store, tool catalog).
//!
//! Every failure that can reach a caller is one of these variants. The
//! `kind()` tag is stable and is what goes over the wire.
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// Malformed or oversized request, rejected before any work is done.
    #[error("{0}")]
    Validation(String),

    /// Blocked primitive, module or path (including path traversal).
    #[error("{0}")]
    CapabilityViolation(String),

    #[error("execution exceeded the {}s wall-clock limit", .limit.as_secs_f64())]
    TimedOut { limit: Duration },

    #[error("execution exceeded the {} byte memory limit", .limit)]
    MemoryExceeded { limit: u64 },

    /// Exception raised by sandboxed logic itself.
    #[error("{kind}: {message}")]
    Runtime { kind: String, message: String },

    /// Token, skill, tool or file lookup miss.
    #[error("{0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Stable snake_case tag used in structured responses.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::Validation(_) => "validation_error",
            SandboxError::CapabilityViolation(_) => "capability_violation",
            SandboxError::TimedOut { .. } => "timed_out",
            SandboxError::MemoryExceeded { .. } => "memory_exceeded",
            SandboxError::Runtime { .. } => "runtime_error",
            SandboxError::NotFound(_) => "not_found",
            SandboxError::Io(_) => "io_error",
        }
    }

    pub fn capability(message: impl Into<String>) -> Self {
        SandboxError::CapabilityViolation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        SandboxError::NotFound(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(SandboxError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(SandboxError::capability("x").kind(), "capability_violation");
        assert_eq!(
            SandboxError::TimedOut { limit: Duration::from_secs(1) }.kind(),
            "timed_out"
        );
        assert_eq!(SandboxError::MemoryExceeded { limit: 1 }.kind(), "memory_exceeded");
        assert_eq!(SandboxError::not_found("x").kind(), "not_found");
    }

    #[test]
    fn test_display_includes_limit() {
        let err = SandboxError::TimedOut { limit: Duration::from_secs(30) };
        assert_eq!(err.to_string(), "execution exceeded the 30s wall-clock limit");

        let err = SandboxError::MemoryExceeded { limit: 1024 };
        assert_eq!(err.to_string(), "execution exceeded the 1024 byte memory limit");
    }

    #[test]
    fn test_runtime_display() {
        let err = SandboxError::Runtime {
            kind: "ValueError".into(),
            message: "bad input".into(),
        };
        assert_eq!(err.to_string(), "ValueError: bad input");
        assert_eq!(err.kind(), "runtime_error");
    }
}
