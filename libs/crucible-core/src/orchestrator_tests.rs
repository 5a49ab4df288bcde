// End-to-end runs through the orchestrator using the fake compiler, so the
// whole request lifecycle is exercised without a C++ toolchain.

use crate::config::{IsolationMode, LimitsConfig, RunnerConfig, ToolchainConfig};
use crate::error::RunnerError;
use crate::orchestrator::Orchestrator;
use crate::test_support::{fake_toolchain, script};
use crate::types::{ExecutionRequest, ExecutionResponse, Outcome};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(dir: &Path) -> RunnerConfig {
    let mut config = RunnerConfig {
        scratch_root: dir.join("scratch"),
        toolchain: fake_toolchain(dir),
        limits: LimitsConfig {
            compile_timeout_ms: 5_000,
            execution_timeout_ms: 5_000,
            ..LimitsConfig::default()
        },
        ..RunnerConfig::default()
    };
    config.isolation.mode = IsolationMode::None;
    config
}

fn orchestrator(config: &RunnerConfig) -> Orchestrator {
    Orchestrator::from_config(config).unwrap()
}

fn leftover_workspaces(config: &RunnerConfig) -> usize {
    match std::fs::read_dir(&config.scratch_root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_success_returns_trimmed_stdout() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("echo 'Hello'"), ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.response, ExecutionResponse::new("Hello", ""));
    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test]
async fn test_stdin_is_delivered() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("read a b\necho $((a + b))"), "5 7\n"))
        .await
        .unwrap();

    assert_eq!(report.response.output, "12");
    assert_eq!(report.response.error, "");
}

#[tokio::test]
async fn test_compile_error_never_runs_program() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let marker = tmp.path().join("ran");

    let source = script(&format!("# SYNTAX_ERROR\ntouch '{}'", marker.display()));
    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(source, ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::CompileFailed);
    assert_eq!(report.response.output, "");
    assert!(report.response.error.starts_with("Compilation failed:\n"));
    assert!(report.response.error.contains("error: expected ';'"));
    assert!(!marker.exists());
    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test]
async fn test_compile_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.limits.compile_timeout_ms = 300;

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("# SLOW_COMPILE\necho hi"), ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::CompileFailed);
    assert_eq!(report.response.output, "");
    assert!(report
        .response
        .error
        .ends_with("Compilation timed out after 0.3 seconds."));
    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test]
async fn test_infinite_loop_hits_server_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.limits.execution_timeout_ms = 500;

    let start = Instant::now();
    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("echo started\nwhile :; do :; done"), ""))
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.outcome, Outcome::RunFailed);
    assert_eq!(report.response.output, "started");
    assert_eq!(
        report.response.error,
        "Execution timed out after 0.5 seconds (server limit)."
    );
    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test]
async fn test_sandbox_ceiling_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.isolation.mode = IsolationMode::Timeout;
    config.isolation.sandbox_timeout_ms = 300;
    config.limits.execution_timeout_ms = 10_000;

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("exec sleep 30"), ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::RunFailed);
    assert_eq!(
        report.response.error,
        "Execution timed out after 0.3 seconds (sandbox limit)."
    );
}

#[tokio::test]
async fn test_server_limit_wins_over_longer_ceiling() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.isolation.mode = IsolationMode::Timeout;
    config.isolation.sandbox_timeout_ms = 5_000;
    config.limits.execution_timeout_ms = 300;

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("exec sleep 30"), ""))
        .await
        .unwrap();

    assert_eq!(
        report.response.error,
        "Execution timed out after 0.3 seconds (server limit)."
    );
}

#[tokio::test]
async fn test_silent_failure_reports_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("exit 3"), ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::RunFailed);
    assert_eq!(
        report.response,
        ExecutionResponse::failure("Execution failed with exit code 3.")
    );
}

#[tokio::test]
async fn test_runtime_stderr_passes_through() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(script("echo partial\necho 'oops' >&2\nexit 1"), ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::RunFailed);
    assert_eq!(report.response, ExecutionResponse::new("partial", "oops"));
}

#[tokio::test]
async fn test_warnings_reported_and_compiler_stdout_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let source = script("# WARNING\n# COMPILER_STDOUT\necho 12");
    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(source, ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.response.output, "12");
    assert!(report.response.error.contains("warning: unused variable 'x'"));
    assert!(!report.response.error.contains("compiler chatter"));
    assert!(!report.response.output.contains("compiler chatter"));
}

#[tokio::test]
async fn test_missing_compiler_is_server_fault() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.toolchain = ToolchainConfig {
        command: "no-such-gxx-for-tests".to_string(),
        ..ToolchainConfig::default()
    };

    let report = orchestrator(&config)
        .run(&ExecutionRequest::new("int main() {}", ""))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::ToolchainUnavailable);
    assert!(report.outcome.is_server_fault());
    assert!(report.response.error.starts_with("Failed to start compiler"));
    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test]
async fn test_empty_code_is_rejected_without_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let err = orchestrator(&config)
        .run(&ExecutionRequest::new("   ", ""))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::InvalidRequest(_)));
    assert_eq!(err.to_string(), "No code provided");
    assert!(!config.scratch_root.exists());
}

#[tokio::test]
async fn test_unusable_scratch_root_is_internal_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.scratch_root = tmp.path().join("not-a-dir");
    std::fs::write(&config.scratch_root, "file").unwrap();

    let err = orchestrator(&config)
        .run(&ExecutionRequest::new(script("echo hi"), ""))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Workspace(_)));
    assert_eq!(err.status_code(), 500);
    assert!(err.public_message().starts_with("Server error:"));
}

#[tokio::test]
async fn test_sequential_requests_leave_no_workspaces() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let orchestrator = orchestrator(&config);

    let sources = [
        script("echo ok"),
        script("# SYNTAX_ERROR"),
        script("exit 2"),
        script("echo bad >&2; exit 1"),
        script("read x; echo $x"),
    ];
    for _ in 0..4 {
        for source in &sources {
            orchestrator
                .run(&ExecutionRequest::new(source.clone(), "7\n"))
                .await
                .unwrap();
        }
    }

    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let orchestrator = Arc::new(orchestrator(&config));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let source = script(&format!("read x\necho \"req-{}:$x\"", i));
                let report = orchestrator
                    .run(&ExecutionRequest::new(source, format!("{}\n", i * 10)))
                    .await
                    .unwrap();
                (i, report)
            })
        })
        .collect();

    for handle in handles {
        let (i, report) = handle.await.unwrap();
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(report.response.output, format!("req-{}:{}", i, i * 10));
    }
    assert_eq!(leftover_workspaces(&config), 0);
}

#[tokio::test]
#[ignore = "requires g++ on PATH"]
async fn test_real_gxx_sum() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.toolchain = ToolchainConfig::default();
    config.limits.compile_timeout_ms = 30_000;

    let source = r#"
#include <iostream>
int main() {
    int a, b;
    std::cin >> a >> b;
    std::cout << a + b << std::endl;
    return 0;
}
"#;
    let report = orchestrator(&config)
        .run(&ExecutionRequest::new(source, "5 7\n"))
        .await
        .unwrap();

    assert_eq!(report.response, ExecutionResponse::new("12", ""));
}
