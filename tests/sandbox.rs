//! End-to-end executions through the real worker binary.
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use code_sandbox::config::{Config, PathsConfig};
use code_sandbox::pii::{TokenVault, Tokenizer};
use code_sandbox::sandbox::{ExecutionRequest, LimitsOverride, Outcome, SandboxController};
use code_sandbox::workspace::Workspace;

fn controller() -> (TempDir, SandboxController) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.paths = PathsConfig::rooted_at(dir.path());
    config.sandbox.worker_program = Some(PathBuf::from(env!("CARGO_BIN_EXE_code-sandbox")));
    let workspace = Workspace::open(&config.paths.workspace_dir()).unwrap();
    let controller = SandboxController::new(config.sandbox, workspace).unwrap();
    (dir, controller)
}

#[tokio::test]
async fn test_simple_result() {
    let (_dir, controller) = controller();
    let result = controller.execute(ExecutionRequest::new("result = 2 ** 10")).await;
    assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
    assert_eq!(result.result, Some(json!(1024)));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_bindings_and_output() {
    let (_dir, controller) = controller();
    let request = ExecutionRequest::new(
        "total = sum([r['amount'] for r in rows])\nprint('rows:', len(rows))\nresult = {'total': total}",
    )
    .with_binding("rows", json!([{"amount": 10}, {"amount": 32}]));
    let result = controller.execute(request).await;
    assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
    assert_eq!(result.result, Some(json!({"total": 42})));
    assert_eq!(result.output, "rows: 2\n");
    assert!(!result.output_truncated);
}

#[tokio::test]
async fn test_import_is_capability_violation() {
    let (_dir, controller) = controller();
    let result = controller.execute(ExecutionRequest::new("import os\nresult = os.getcwd()")).await;
    assert_eq!(result.outcome, Outcome::CapabilityViolation);
    assert_eq!(result.error.unwrap().kind, "capability_violation");
    assert_eq!(controller.stats().snapshot().capability_violations, 1);
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let (_dir, controller) = controller();
    let request = ExecutionRequest::new("while True:\n    pass\n").with_limits(LimitsOverride {
        timeout_seconds: Some(1.0),
        memory_mb: None,
    });
    let result = controller.execute(request).await;
    assert_eq!(result.outcome, Outcome::TimedOut);
    let error = result.error.unwrap();
    assert_eq!(error.kind, "timed_out");
    assert_eq!(error.limit, Some(json!(1.0)));
    assert!(result.execution_time_ms >= 1000);
    assert!(result.execution_time_ms < 10_000);
}

#[tokio::test]
async fn test_growing_memory_is_stopped() {
    let (_dir, controller) = controller();
    let request = ExecutionRequest::new(
        "data = []\nwhile True:\n    data.append('x' * 1000000 + str(len(data)))\n",
    )
    .with_limits(LimitsOverride {
        timeout_seconds: Some(20.0),
        memory_mb: Some(32),
    });
    let result = controller.execute(request).await;
    assert_eq!(result.outcome, Outcome::MemoryExceeded, "{:?}", result.error);
    let error = result.error.unwrap();
    assert_eq!(error.kind, "memory_exceeded");
    assert_eq!(error.limit, Some(json!(32 * 1024 * 1024)));
}

#[tokio::test]
async fn test_runtime_error_keeps_output() {
    let (_dir, controller) = controller();
    let result = controller
        .execute(ExecutionRequest::new("print('step 1')\nx = 1 / 0\n"))
        .await;
    assert_eq!(result.outcome, Outcome::RuntimeError);
    assert_eq!(result.error.unwrap().kind, "ZeroDivisionError");
    assert_eq!(result.output, "step 1\n");
}

#[tokio::test]
async fn test_workspace_is_shared_with_host() {
    let (_dir, controller) = controller();
    controller.workspace().write("input.csv", "a,b\n1,2\n").unwrap();

    let result = controller
        .execute(ExecutionRequest::new(
            "lines = read_file('input.csv').strip().split('\\n')\n\
             write_file('out/count.txt', str(len(lines)))\n\
             result = list_files()",
        ))
        .await;
    assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
    assert_eq!(result.result, Some(json!(["input.csv", "out/count.txt"])));
    assert_eq!(controller.workspace().read("out/count.txt").unwrap(), "2");
}

#[tokio::test]
async fn test_traversal_is_rejected() {
    let (_dir, controller) = controller();
    let result = controller
        .execute(ExecutionRequest::new("result = read_file('../../../etc/passwd')"))
        .await;
    assert_eq!(result.outcome, Outcome::CapabilityViolation);
    assert!(result.result.is_none());
}

#[tokio::test]
async fn test_concurrent_executions_are_isolated() {
    let (_dir, controller) = controller();
    let controller = Arc::new(controller);

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let request = ExecutionRequest::new("counter = n * 10\nresult = counter")
                    .with_binding("n", json!(i));
                (i, controller.execute(request).await)
            })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!(i * 10)));
    }
    assert_eq!(controller.stats().snapshot().successes, 6);
}

#[tokio::test]
async fn test_modules_available_in_worker() {
    let (_dir, controller) = controller();
    let result = controller
        .execute(ExecutionRequest::new(
            "import json\nimport math\nresult = json.loads('{\"a\": 4}')['a'] + math.sqrt(16)",
        ))
        .await;
    assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
    assert_eq!(result.result, Some(json!(8.0)));
}

#[test]
fn test_pii_roundtrip_hides_values() {
    let tokenizer = Tokenizer::new(Arc::new(TokenVault::new()));
    let text = "Contact john@example.com at 555-123-4567";
    let sanitized = tokenizer.sanitize(text);
    assert!(!sanitized.text.contains("john@example.com"));
    assert!(!sanitized.text.contains("555-123-4567"));
    assert_eq!(sanitized.categories, vec!["EMAIL", "PHONE"]);
    assert_eq!(tokenizer.restore(&sanitized.text).text, text);
}
