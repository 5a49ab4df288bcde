/// Execution Stage
///
/// Runs the compiled binary through the configured sandbox and turns the raw
/// `ProcessResult` into program stdout plus diagnostics text.
///
/// **Timeout layers:**
/// - server: the deadline handed to the sandbox, always enforced here
/// - sandbox: the isolation layer's own ceiling, when it has one
///
/// When both could apply the server layer wins, because it is the one that
/// actually terminated the process.

use crate::config::format_secs;
use crate::sandbox::Sandbox;
use crate::supervisor::{ExitStatus, ProcessOutcome, ProcessResult};
use crate::workspace::Workspace;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Exit status 0, no timeout
    Succeeded,
    /// Non-zero exit, signal, or either timeout layer fired
    Failed,
    /// The binary (or its sandbox) could not be started
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub stdout: String,
    pub diagnostics: String,
}

/// Which timeout layer stopped the program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutLayer {
    Server,
    Sandbox,
}

pub struct Executor {
    sandbox: Arc<dyn Sandbox>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl Executor {
    pub fn new(sandbox: Arc<dyn Sandbox>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            timeout,
            max_output_bytes,
        }
    }

    pub fn sandbox_name(&self) -> &'static str {
        self.sandbox.name()
    }

    #[instrument(skip_all, fields(workspace = %workspace.id(), sandbox = self.sandbox.name()))]
    pub async fn execute(&self, workspace: &Workspace, binary: &Path, stdin: &[u8]) -> RunOutcome {
        let result = self.sandbox.run(workspace, binary, stdin, self.timeout).await;
        let outcome = self.interpret(&result);

        match outcome.status {
            RunStatus::Succeeded => info!(
                elapsed_ms = result.elapsed.as_millis() as u64,
                stdout_bytes = result.stdout.len(),
                "Execution completed"
            ),
            RunStatus::Failed => info!(
                elapsed_ms = result.elapsed.as_millis() as u64,
                outcome = ?result.outcome,
                timeout_layer = ?self.timeout_layer(&result),
                "Execution failed"
            ),
            RunStatus::Unavailable => warn!(
                error = %outcome.diagnostics,
                "Executable could not be started"
            ),
        }
        outcome
    }

    /// Outer layer first: a server timeout is never reported as a sandbox one
    pub fn timeout_layer(&self, result: &ProcessResult) -> Option<TimeoutLayer> {
        if result.timed_out() {
            Some(TimeoutLayer::Server)
        } else if self.sandbox.ceiling_fired(result) {
            Some(TimeoutLayer::Sandbox)
        } else {
            None
        }
    }

    fn timeout_notice(&self, layer: TimeoutLayer) -> String {
        match layer {
            TimeoutLayer::Server => format!(
                "Execution timed out after {} seconds (server limit).",
                format_secs(self.timeout)
            ),
            TimeoutLayer::Sandbox => format!(
                "Execution timed out after {} seconds (sandbox limit).",
                format_secs(self.sandbox.ceiling().unwrap_or_default())
            ),
        }
    }

    fn interpret(&self, result: &ProcessResult) -> RunOutcome {
        let stdout = result.stdout_text();
        let stderr = result.stderr_text();

        let (status, mut diagnostics) = if let ProcessOutcome::SpawnFailed(message) = &result.outcome {
            (
                RunStatus::Unavailable,
                append_line(stderr.trim(), &format!("Failed to start executable: {}", message)),
            )
        } else if let Some(layer) = self.timeout_layer(result) {
            (
                RunStatus::Failed,
                append_line(stderr.trim(), &self.timeout_notice(layer)),
            )
        } else {
            match result.exit_status() {
                Some(status) if status.success() => (RunStatus::Succeeded, stderr),
                // stderr already explains the failure; pass it through as-is
                Some(_) if !stderr.trim().is_empty() => (RunStatus::Failed, stderr),
                Some(status) => (RunStatus::Failed, silent_failure_message(status)),
                None => (RunStatus::Failed, stderr),
            }
        };

        if result.truncated() {
            diagnostics = append_line(
                diagnostics.trim_end(),
                &format!("Output truncated after {} bytes.", self.max_output_bytes),
            );
        }

        RunOutcome {
            status,
            stdout,
            diagnostics,
        }
    }
}

/// Diagnostic for a program that failed without writing anything to stderr
fn silent_failure_message(status: ExitStatus) -> String {
    match status {
        ExitStatus::Code(code) => format!("Execution failed with exit code {}.", code),
        ExitStatus::Signal(_) => format!("Execution terminated by {}.", status),
    }
}

fn append_line(text: &str, line: &str) -> String {
    if text.is_empty() {
        line.to_string()
    } else {
        format!("{}\n{}", text, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CEILING_EXIT_CODE;
    use crate::workspace::WorkspaceManager;
    use async_trait::async_trait;

    /// Sandbox replaying a canned result
    struct Canned {
        result: ProcessResult,
        ceiling: Option<Duration>,
    }

    #[async_trait]
    impl Sandbox for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn ceiling(&self) -> Option<Duration> {
            self.ceiling
        }

        async fn run(&self, _: &Workspace, _: &Path, _: &[u8], _: Duration) -> ProcessResult {
            self.result.clone()
        }
    }

    fn result(outcome: ProcessOutcome, stdout: &str, stderr: &str) -> ProcessResult {
        ProcessResult {
            outcome,
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            stdout_truncated: false,
            stderr_truncated: false,
            elapsed: Duration::from_millis(20),
        }
    }

    async fn run(result: ProcessResult, ceiling: Option<Duration>) -> RunOutcome {
        let tmp = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path()).acquire().await.unwrap();
        let executor = Executor::new(
            Arc::new(Canned { result, ceiling }),
            Duration::from_secs(10),
            1024,
        );
        let outcome = executor.execute(&ws, &ws.file("main.out"), b"").await;
        ws.release().await;
        outcome
    }

    #[tokio::test]
    async fn test_success_passes_stdout_through() {
        let outcome = run(result(ProcessOutcome::Exited(ExitStatus::Code(0)), "12\n", ""), None).await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.stdout, "12\n");
        assert_eq!(outcome.diagnostics, "");
    }

    #[tokio::test]
    async fn test_silent_non_zero_exit_gets_generic_message() {
        let outcome = run(result(ProcessOutcome::Exited(ExitStatus::Code(3)), "", "  \n"), None).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.diagnostics, "Execution failed with exit code 3.");
    }

    #[tokio::test]
    async fn test_stderr_is_not_double_reported() {
        let stderr = "terminate called after throwing an instance of 'std::runtime_error'\n";
        let outcome = run(result(ProcessOutcome::Exited(ExitStatus::Code(134)), "", stderr), None).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.diagnostics, stderr);
        assert!(!outcome.diagnostics.contains("exit code"));
    }

    #[tokio::test]
    async fn test_silent_signal_gets_named() {
        let outcome = run(result(ProcessOutcome::Exited(ExitStatus::Signal(11)), "", ""), None).await;
        assert_eq!(outcome.diagnostics, "Execution terminated by signal 11 (SIGSEGV).");
    }

    #[tokio::test]
    async fn test_server_timeout_notice_keeps_partial_output() {
        let outcome = run(result(ProcessOutcome::TimedOut, "partial\n", "warn\n"), Some(Duration::from_secs(5))).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.stdout, "partial\n");
        assert_eq!(
            outcome.diagnostics,
            "warn\nExecution timed out after 10 seconds (server limit)."
        );
    }

    #[tokio::test]
    async fn test_sandbox_ceiling_notice() {
        let outcome = run(
            result(ProcessOutcome::Exited(ExitStatus::Code(CEILING_EXIT_CODE)), "", ""),
            Some(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(outcome.diagnostics, "Execution timed out after 5 seconds (sandbox limit).");
    }

    #[tokio::test]
    async fn test_exit_124_without_ceiling_is_plain_failure() {
        let outcome = run(
            result(ProcessOutcome::Exited(ExitStatus::Code(CEILING_EXIT_CODE)), "", ""),
            None,
        )
        .await;
        assert_eq!(outcome.diagnostics, "Execution failed with exit code 124.");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_distinguishable() {
        let outcome = run(
            result(ProcessOutcome::SpawnFailed("Permission denied (os error 13)".into()), "", ""),
            None,
        )
        .await;
        assert_eq!(outcome.status, RunStatus::Unavailable);
        assert_eq!(
            outcome.diagnostics,
            "Failed to start executable: Permission denied (os error 13)"
        );
    }

    #[tokio::test]
    async fn test_truncation_is_reported() {
        let mut truncated = result(ProcessOutcome::Exited(ExitStatus::Code(0)), "yyyy", "");
        truncated.stdout_truncated = true;
        let outcome = run(truncated, None).await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.diagnostics, "Output truncated after 1024 bytes.");
    }

    #[test]
    fn test_server_layer_takes_precedence() {
        let executor = Executor::new(
            Arc::new(Canned {
                result: result(ProcessOutcome::TimedOut, "", ""),
                ceiling: Some(Duration::from_millis(1)),
            }),
            Duration::from_secs(10),
            1024,
        );
        let timed_out = result(ProcessOutcome::TimedOut, "", "");
        assert_eq!(executor.timeout_layer(&timed_out), Some(TimeoutLayer::Server));

        let ceiling = result(ProcessOutcome::Exited(ExitStatus::Code(CEILING_EXIT_CODE)), "", "");
        assert_eq!(executor.timeout_layer(&ceiling), Some(TimeoutLayer::Sandbox));

        let clean = result(ProcessOutcome::Exited(ExitStatus::Code(0)), "", "");
        assert_eq!(executor.timeout_layer(&clean), None);
    }
}
