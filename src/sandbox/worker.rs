//! Worker side of an execution: one request in on stdin, one report out on
//! stdout, then exit. Runs in a fresh process started by the limiter.
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::script::value::{from_json, to_json};
use super::script::{parse_program, Fault, Interpreter};
use super::surface::CapabilitySurface;
use super::{ErrorInfo, Outcome};
use crate::workspace::Workspace;

/// Command-line flag that selects worker mode.
pub const WORKER_FLAG: &str = "--sandbox-worker";

const EVAL_STACK_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    #[serde(default)]
    pub bindings: serde_json::Map<String, serde_json::Value>,
    pub workspace_root: Option<PathBuf>,
    pub max_output_bytes: usize,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub outcome: Outcome,
    pub result: Option<serde_json::Value>,
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<ErrorInfo>,
}

impl WorkerReport {
    /// A report carrying only an error, for runs that produced nothing usable.
    pub fn failed(outcome: Outcome, error: ErrorInfo) -> Self {
        Self {
            outcome,
            result: None,
            output: String::new(),
            output_truncated: false,
            error: Some(error),
        }
    }
}

/// Entry point of worker mode.
pub fn run_worker() -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read worker request")?;
    let request: WorkerRequest =
        serde_json::from_str(&input).context("Failed to parse worker request")?;

    // Evaluation is recursive; give it a deep stack of its own.
    let handle = thread::Builder::new()
        .name("sandbox-eval".to_string())
        .stack_size(EVAL_STACK_BYTES)
        .spawn(move || evaluate(&request))
        .context("Failed to start evaluation thread")?;

    let report = handle.join().unwrap_or_else(|_| {
        WorkerReport::failed(
            Outcome::RuntimeError,
            ErrorInfo::new("InternalError", "the interpreter failed unexpectedly"),
        )
    });

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &report).context("Failed to write worker report")?;
    stdout.flush()?;
    Ok(())
}

/// Evaluates one request in-process against a fresh capability surface.
pub fn evaluate(request: &WorkerRequest) -> WorkerReport {
    let program = match parse_program(&request.code) {
        Ok(program) => program,
        Err(err) => {
            return WorkerReport::failed(
                Outcome::RuntimeError,
                ErrorInfo::new("SyntaxError", err.to_string()),
            )
        }
    };

    let mut interp = Interpreter::new(CapabilitySurface::build())
        .with_output_limit(request.max_output_bytes)
        .with_memory_limit(request.memory_bytes);
    if let Some(root) = &request.workspace_root {
        match Workspace::open(root) {
            Ok(workspace) => interp = interp.with_workspace(workspace),
            Err(err) => {
                return WorkerReport::failed(
                    Outcome::RuntimeError,
                    ErrorInfo::new("OSError", err.to_string()),
                )
            }
        }
    }
    for (name, value) in &request.bindings {
        interp.bind(name, from_json(value));
    }

    let status = interp.run(&program);
    let run = interp.finish();

    let (outcome, error) = match status {
        Ok(()) => (Outcome::Success, None),
        Err(Fault::Raised { kind, message }) => {
            (Outcome::RuntimeError, Some(ErrorInfo::new(kind, message)))
        }
        Err(Fault::Capability(message)) => (
            Outcome::CapabilityViolation,
            Some(ErrorInfo::new("capability_violation", message)),
        ),
        Err(Fault::Memory(message)) => (
            Outcome::MemoryExceeded,
            Some(ErrorInfo::new("memory_exceeded", message)),
        ),
    };

    let result = match (&outcome, &run.result) {
        (Outcome::Success, Some(value)) => {
            Some(to_json(value).unwrap_or_else(|_| serde_json::Value::String(value.repr())))
        }
        _ => None,
    };

    WorkerReport {
        outcome,
        result,
        output: run.output,
        output_truncated: run.output_truncated,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn request(code: &str) -> WorkerRequest {
        WorkerRequest {
            code: code.to_string(),
            bindings: serde_json::Map::new(),
            workspace_root: None,
            max_output_bytes: 64 * 1024,
            memory_bytes: 64 * 1024 * 1024,
        }
    }

    #[test]
    fn test_result_binding_is_returned() {
        let report = evaluate(&request("result = 2 ** 10"));
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.result, Some(json!(1024)));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_missing_result_is_null() {
        let report = evaluate(&request("x = 1"));
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.result, None);
    }

    #[test]
    fn test_bindings_are_visible() {
        let mut req = request("result = sum([r['v'] for r in rows])");
        req.bindings.insert("rows".to_string(), json!([{"v": 1}, {"v": 2}]));
        let report = evaluate(&req);
        assert_eq!(report.result, Some(json!(3)), "{:?}", report.error);
    }

    #[test]
    fn test_print_output_is_captured_and_capped() {
        let mut req = request("for i in range(100):\n    print('line', i)\n");
        req.max_output_bytes = 20;
        let report = evaluate(&req);
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.output.len(), 20);
        assert!(report.output_truncated);
        assert!(report.output.starts_with("line 0\nline 1\n"));
    }

    #[test]
    fn test_runtime_error_keeps_output() {
        let report = evaluate(&request("print('before')\nraise ValueError('bad input')\n"));
        assert_eq!(report.outcome, Outcome::RuntimeError);
        assert_eq!(report.output, "before\n");
        let error = report.error.unwrap();
        assert_eq!(error.kind, "ValueError");
        assert_eq!(error.message, "bad input");
    }

    #[test]
    fn test_syntax_error() {
        let report = evaluate(&request("def f(:\n"));
        assert_eq!(report.outcome, Outcome::RuntimeError);
        assert_eq!(report.error.unwrap().kind, "SyntaxError");
    }

    #[test]
    fn test_name_outside_surface_is_capability_violation() {
        let report = evaluate(&request("result = undefined_thing + 1"));
        assert_eq!(report.outcome, Outcome::CapabilityViolation);
        assert!(report.error.unwrap().message.contains("undefined_thing"));
    }

    #[test]
    fn test_oversized_allocation_is_memory_exceeded() {
        let mut req = request("result = 'x' * (10 ** 12)");
        req.memory_bytes = 1024 * 1024;
        let report = evaluate(&req);
        assert_eq!(report.outcome, Outcome::MemoryExceeded);
    }

    #[test]
    fn test_workspace_helpers_without_workspace() {
        let report = evaluate(&request("read_file('a.txt')"));
        assert_eq!(report.outcome, Outcome::CapabilityViolation);
    }

    #[test]
    fn test_workspace_helpers_and_traversal() {
        let dir = TempDir::new().unwrap();
        let mut req = request("write_file('out.txt', 'hi')\nresult = read_file('out.txt')");
        req.workspace_root = Some(dir.path().to_path_buf());
        let report = evaluate(&req);
        assert_eq!(report.result, Some(json!("hi")), "{:?}", report.error);

        let mut req = request("result = read_file('../../etc/passwd')");
        req.workspace_root = Some(dir.path().to_path_buf());
        let report = evaluate(&req);
        assert_eq!(report.outcome, Outcome::CapabilityViolation);
    }

    #[test]
    fn test_unserializable_result_falls_back_to_repr() {
        let report = evaluate(&request("def f():\n    return 1\nresult = f"));
        assert_eq!(report.outcome, Outcome::Success);
        let text = report.result.unwrap();
        assert!(text.as_str().unwrap().contains("function"));
    }
}
