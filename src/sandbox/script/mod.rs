//! The constrained scripting language evaluated inside a sandbox worker.
//!
//! A small, Python-flavoured, indentation-structured language:
//!
//! - `lexer` / `parser` turn source text into an [`ast::Program`]
//! - `interp` walks the tree against a [`CapabilitySurface`](super::surface::CapabilitySurface)
//! - `builtins`, `methods` and `modules` implement everything callable
//!
//! The interpreter has no I/O of its own. The only side effects available to
//! a script are the workspace helpers and `print`, both injected through the
//! surface.
pub mod ast;
pub mod builtins;
pub mod interp;
pub mod lexer;
pub mod methods;
pub mod modules;
pub mod parser;
pub mod value;

use std::fmt;

pub use interp::{Interpreter, RunOutput};
pub use parser::parse_program;
pub use value::Value;

/// Source that could not be tokenized or parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

/// Abnormal termination of evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// A script-level exception. Catchable by `try/except`.
    Raised { kind: String, message: String },
    /// Reference to something outside the capability surface. Never catchable.
    Capability(String),
    /// An allocation the interpreter refused up front. Never catchable.
    Memory(String),
}

impl Fault {
    pub fn raised(kind: &str, message: impl Into<String>) -> Self {
        Fault::Raised {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raised("ValueError", message)
    }

    pub fn overflow() -> Self {
        Self::raised("OverflowError", "integer overflow")
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Raised { kind, message } if message.is_empty() => write!(f, "{kind}"),
            Fault::Raised { kind, message } => write!(f, "{kind}: {message}"),
            Fault::Capability(message) | Fault::Memory(message) => write!(f, "{message}"),
        }
    }
}

impl From<SyntaxError> for Fault {
    fn from(err: SyntaxError) -> Self {
        Fault::raised("SyntaxError", err.to_string())
    }
}
