/// Execution sandbox controller.
///
/// Drives one execution end to end, strictly in order:
///
/// 1. validate the request (no process is started for a bad one)
/// 2. parse and statically screen the code
/// 3. start a worker under the resource limiter
/// 4. map what happened to exactly one [`Outcome`]
///
/// Every failure becomes an [`ExecutionResult`]; nothing panics or escapes
/// as an error to the caller. Host paths never appear in returned messages.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::limits::{self, LimitedRun, LimitsPolicy, Verdict, WorkerCommand};
use super::script::parse_program;
use super::surface;
use super::worker::{WorkerReport, WorkerRequest, WORKER_FLAG};
use super::{ErrorInfo, ExecutionRequest, ExecutionResult, Outcome, ResourceLimits};
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::stats::ExecutionStats;
use crate::workspace::{sanitize_paths, Workspace};

/// Room in the worker's report for the `result` value and JSON escaping,
/// on top of the print output cap.
const REPORT_OVERHEAD_BYTES: usize = 32 * 1024 * 1024;

pub struct SandboxController {
    config: SandboxConfig,
    workspace: Workspace,
    worker_program: PathBuf,
    semaphore: Arc<Semaphore>,
    stats: ExecutionStats,
}

impl SandboxController {
    /// Creates a controller whose workers run inside `workspace`.
    pub fn new(config: SandboxConfig, workspace: Workspace) -> Result<Self> {
        let worker_program = match &config.worker_program {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("Cannot locate the worker executable")?,
        };
        let permits = config.max_concurrent_executions.max(1);
        info!(
            "Sandbox ready: {} concurrent execution(s), worker {}",
            permits,
            worker_program.display()
        );
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            workspace,
            worker_program,
            stats: ExecutionStats::default(),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Runs one request. Dropping the returned future kills its worker.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let limits = self.config.resolve_limits(request.limits.as_ref());
        debug!(%execution_id, ?limits, "Execution requested ({} bytes of code)", request.code.len());

        let result = match self.prepare(&request) {
            Ok(()) => self.run(execution_id, request, limits).await,
            Err(err) => self.reject(execution_id, err),
        };
        self.log(&result);
        self.stats.record(&result);
        result
    }

    /// Validation and static screening. Nothing here starts a process.
    fn prepare(&self, request: &ExecutionRequest) -> Result<(), SandboxError> {
        if request.code.trim().is_empty() {
            return Err(SandboxError::Validation("code must not be empty".to_string()));
        }
        if request.code.len() > self.config.max_source_bytes {
            return Err(SandboxError::Validation(format!(
                "code is {} bytes, the limit is {}",
                request.code.len(),
                self.config.max_source_bytes
            )));
        }
        let bindings_size = serde_json::to_vec(&request.bindings)
            .map(|b| b.len())
            .unwrap_or(usize::MAX);
        if bindings_size > self.config.max_bindings_bytes {
            return Err(SandboxError::Validation(format!(
                "bindings are {} bytes, the limit is {}",
                bindings_size, self.config.max_bindings_bytes
            )));
        }

        let program = parse_program(&request.code).map_err(|err| SandboxError::Runtime {
            kind: "SyntaxError".to_string(),
            message: err.to_string(),
        })?;
        surface::screen(&program)
    }

    fn reject(&self, execution_id: Uuid, err: SandboxError) -> ExecutionResult {
        let (outcome, kind) = match &err {
            SandboxError::CapabilityViolation(_) => (Outcome::CapabilityViolation, err.kind().to_string()),
            // Validation shares the capability outcome: the request never ran.
            SandboxError::Validation(_) => (Outcome::CapabilityViolation, err.kind().to_string()),
            SandboxError::Runtime { kind, .. } => (Outcome::RuntimeError, kind.clone()),
            _ => (Outcome::RuntimeError, err.kind().to_string()),
        };
        let message = match err {
            SandboxError::Runtime { message, .. } => message,
            other => other.to_string(),
        };
        ExecutionResult::rejected(execution_id, outcome, ErrorInfo::new(kind, self.sanitize(&message)))
    }

    async fn run(&self, execution_id: Uuid, request: ExecutionRequest, limits: ResourceLimits) -> ExecutionResult {
        let started = Instant::now();
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.reject(
                    execution_id,
                    SandboxError::Runtime {
                        kind: "InternalError".to_string(),
                        message: "sandbox is shutting down".to_string(),
                    },
                )
            }
        };

        let payload = WorkerRequest {
            code: request.code,
            bindings: request.bindings,
            workspace_root: Some(self.workspace.root().to_path_buf()),
            max_output_bytes: self.config.max_output_bytes,
            memory_bytes: limits.memory_bytes,
        };
        let payload = match serde_json::to_vec(&payload) {
            Ok(payload) => payload,
            Err(err) => return self.internal_error(execution_id, started, format!("cannot encode request: {err}")),
        };

        let policy = LimitsPolicy {
            timeout: limits.timeout,
            memory_bytes: limits.memory_bytes,
            max_capture_bytes: self.config.max_output_bytes.saturating_mul(6) + REPORT_OVERHEAD_BYTES,
        };
        let command = WorkerCommand {
            program: self.worker_program.clone(),
            args: vec![WORKER_FLAG.to_string()],
            cwd: self.workspace.root().to_path_buf(),
        };

        let run = match limits::run_with_limits(&policy, &command, payload).await {
            Ok(run) => run,
            Err(err) => return self.internal_error(execution_id, started, format!("cannot start worker: {err}")),
        };
        debug!(
            %execution_id,
            elapsed_ms = run.elapsed.as_millis() as u64,
            peak_rss = run.peak_rss,
            "Worker finished: {:?}",
            run.termination
        );

        self.conclude(execution_id, started, &run, limits)
    }

    /// Turns a supervised run into the result the caller sees.
    fn conclude(&self, execution_id: Uuid, started: Instant, run: &LimitedRun, limits: ResourceLimits) -> ExecutionResult {
        let execution_time_ms = started.elapsed().as_millis() as u64;
        let timed_out = |limits: ResourceLimits| {
            let err = SandboxError::TimedOut { limit: limits.timeout };
            let mut info = ErrorInfo::new(err.kind(), err.to_string());
            info.limit = Some(serde_json::json!(limits.timeout.as_secs_f64()));
            info
        };
        let memory_exceeded = |limits: ResourceLimits| {
            let err = SandboxError::MemoryExceeded { limit: limits.memory_bytes };
            let mut info = ErrorInfo::new(err.kind(), err.to_string());
            info.limit = Some(serde_json::json!(limits.memory_bytes));
            info
        };

        let report = match limits::classify(run) {
            Verdict::TimedOut => WorkerReport::failed(Outcome::TimedOut, timed_out(limits)),
            Verdict::MemoryExceeded => WorkerReport::failed(Outcome::MemoryExceeded, memory_exceeded(limits)),
            Verdict::Crashed(reason) => WorkerReport::failed(
                Outcome::RuntimeError,
                ErrorInfo::new("WorkerCrashed", reason),
            ),
            Verdict::Completed if run.stdout_truncated => WorkerReport::failed(
                Outcome::RuntimeError,
                ErrorInfo::new("ValueError", "result is too large to return"),
            ),
            Verdict::Completed => match serde_json::from_slice::<WorkerReport>(&run.stdout) {
                Ok(mut report) => {
                    if report.outcome == Outcome::MemoryExceeded {
                        report.error = Some(memory_exceeded(limits));
                    }
                    report
                }
                Err(err) => WorkerReport::failed(
                    Outcome::RuntimeError,
                    ErrorInfo::new("InternalError", format!("unreadable worker report: {err}")),
                ),
            },
        };

        ExecutionResult {
            outcome: report.outcome,
            result: report.result,
            output: report.output,
            output_truncated: report.output_truncated,
            error: report.error.map(|mut info| {
                info.message = self.sanitize(&info.message);
                info
            }),
            execution_time_ms,
            execution_id,
        }
    }

    fn internal_error(&self, execution_id: Uuid, started: Instant, message: String) -> ExecutionResult {
        let mut result = ExecutionResult::rejected(
            execution_id,
            Outcome::RuntimeError,
            ErrorInfo::new("InternalError", self.sanitize(&message)),
        );
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn sanitize(&self, message: &str) -> String {
        sanitize_paths(message, self.workspace.root())
    }

    fn log(&self, result: &ExecutionResult) {
        let execution_id = result.execution_id;
        let message = result.error.as_ref().map(|e| e.message.as_str()).unwrap_or("");
        match result.outcome {
            Outcome::Success => info!(%execution_id, "Execution succeeded in {}ms", result.execution_time_ms),
            Outcome::CapabilityViolation => {
                warn!(%execution_id, "capability violation: {message}")
            }
            Outcome::TimedOut | Outcome::MemoryExceeded => {
                warn!(%execution_id, "Execution hit a resource limit: {message}")
            }
            Outcome::RuntimeError => {
                let kind = result.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("");
                info!(%execution_id, "Execution raised {kind}: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A controller whose worker is never reached by these tests.
    fn controller() -> (TempDir, SandboxController) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        let config = SandboxConfig {
            max_source_bytes: 64,
            max_bindings_bytes: 32,
            worker_program: Some(PathBuf::from("/nonexistent/worker")),
            ..SandboxConfig::default()
        };
        (dir, SandboxController::new(config, workspace).unwrap())
    }

    #[tokio::test]
    async fn test_empty_code_is_rejected() {
        let (_dir, controller) = controller();
        let result = controller.execute(ExecutionRequest::new("   \n")).await;
        assert_eq!(result.outcome, Outcome::CapabilityViolation);
        assert_eq!(result.error.unwrap().kind, "validation_error");
    }

    #[tokio::test]
    async fn test_oversized_code_is_rejected() {
        let (_dir, controller) = controller();
        let result = controller.execute(ExecutionRequest::new("x = 1\n".repeat(20))).await;
        assert_eq!(result.outcome, Outcome::CapabilityViolation);
        assert!(result.error.unwrap().message.contains("limit"));
    }

    #[tokio::test]
    async fn test_oversized_bindings_are_rejected() {
        let (_dir, controller) = controller();
        let request = ExecutionRequest::new("result = data")
            .with_binding("data", serde_json::json!("a".repeat(100)));
        let result = controller.execute(request).await;
        assert_eq!(result.error.unwrap().kind, "validation_error");
    }

    #[tokio::test]
    async fn test_syntax_error_is_runtime_error() {
        let (_dir, controller) = controller();
        let result = controller.execute(ExecutionRequest::new("if x\n")).await;
        assert_eq!(result.outcome, Outcome::RuntimeError);
        assert_eq!(result.error.unwrap().kind, "SyntaxError");
    }

    #[tokio::test]
    async fn test_blocked_import_never_starts_worker() {
        let (_dir, controller) = controller();
        let result = controller
            .execute(ExecutionRequest::new("import os\nos.system('ls')"))
            .await;
        assert_eq!(result.outcome, Outcome::CapabilityViolation);
        assert_eq!(result.error.unwrap().kind, "capability_violation");
        assert_eq!(controller.stats().snapshot().capability_violations, 1);
    }

    #[tokio::test]
    async fn test_missing_worker_is_internal_error() {
        let (_dir, controller) = controller();
        let result = controller.execute(ExecutionRequest::new("result = 1")).await;
        assert_eq!(result.outcome, Outcome::RuntimeError);
        let error = result.error.unwrap();
        assert_eq!(error.kind, "InternalError");
        assert!(!error.message.contains("/nonexistent"));
    }

    fn finished(stdout: &str) -> LimitedRun {
        LimitedRun {
            termination: limits::Termination::Exited(0),
            stdout: stdout.as_bytes().to_vec(),
            stdout_truncated: false,
            stderr: String::new(),
            elapsed: std::time::Duration::from_millis(3),
            peak_rss: 0,
        }
    }

    #[tokio::test]
    async fn test_conclude_attaches_limits() {
        let (_dir, controller) = controller();
        let limits = controller.config().default_limits();

        let mut run = finished("");
        run.termination = limits::Termination::Deadline;
        let result = controller.conclude(Uuid::new_v4(), Instant::now(), &run, limits);
        assert_eq!(result.outcome, Outcome::TimedOut);
        assert_eq!(result.error.unwrap().limit, Some(serde_json::json!(30.0)));

        run.termination = limits::Termination::MemoryBreach;
        let result = controller.conclude(Uuid::new_v4(), Instant::now(), &run, limits);
        assert_eq!(result.outcome, Outcome::MemoryExceeded);
        assert_eq!(result.error.unwrap().limit, Some(serde_json::json!(500u64 * 1024 * 1024)));
    }

    #[tokio::test]
    async fn test_conclude_sanitizes_worker_messages() {
        let (_dir, controller) = controller();
        let root = controller.workspace().root().display().to_string();
        let report = format!(
            r#"{{"outcome":"runtime_error","result":null,"output":"","output_truncated":false,"error":{{"kind":"OSError","message":"cannot open {root}/x.txt"}}}}"#
        );
        let result = controller.conclude(
            Uuid::new_v4(),
            Instant::now(),
            &finished(&report),
            controller.config().default_limits(),
        );
        assert_eq!(result.error.unwrap().message, "cannot open <workspace>/x.txt");
    }

    #[tokio::test]
    async fn test_conclude_rejects_garbage_report() {
        let (_dir, controller) = controller();
        let result = controller.conclude(
            Uuid::new_v4(),
            Instant::now(),
            &finished("not json"),
            controller.config().default_limits(),
        );
        assert_eq!(result.outcome, Outcome::RuntimeError);
        assert_eq!(result.error.unwrap().kind, "InternalError");
    }
}
