/// Compilation Stage
///
/// Writes the submitted source verbatim into the workspace and runs the
/// toolchain on it through the Supervisor. A program that does not compile is
/// an ordinary outcome, reported as diagnostics text; only failing to write
/// the source file is an error.

use crate::config::{format_secs, ToolchainConfig};
use crate::error::Result;
use crate::supervisor::{CommandSpec, ProcessOutcome, ProcessResult, Supervisor};
use crate::workspace::Workspace;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Exit status 0; `warnings` is whatever the compiler printed on stderr
    Compiled { binary: PathBuf, warnings: String },
    /// Non-zero exit or compiler timeout
    Rejected { diagnostics: String },
    /// The compiler could not be started at all
    Unavailable { diagnostics: String },
}

#[derive(Debug, Clone)]
pub struct Compiler {
    toolchain: ToolchainConfig,
    timeout: Duration,
    supervisor: Supervisor,
}

impl Compiler {
    pub fn new(toolchain: ToolchainConfig, timeout: Duration, supervisor: Supervisor) -> Self {
        Self {
            toolchain,
            timeout,
            supervisor,
        }
    }

    /// `<compiler> <flags…> <source> -o <binary>`, run inside the workspace
    fn command(&self, workspace: &Workspace) -> CommandSpec {
        CommandSpec::new(&self.toolchain.command)
            .args(&self.toolchain.flags)
            .arg(&self.toolchain.source_name)
            .arg("-o")
            .arg(&self.toolchain.binary_name)
            .current_dir(workspace.path())
    }

    #[instrument(skip_all, fields(workspace = %workspace.id(), compiler = %self.toolchain.command))]
    pub async fn compile(&self, workspace: &Workspace, source_code: &str) -> Result<CompileOutcome> {
        let source_path = workspace.file(&self.toolchain.source_name);
        tokio::fs::write(&source_path, source_code).await?;
        debug!(path = %source_path.display(), bytes = source_code.len(), "Wrote source file");

        let result = self
            .supervisor
            .run(&self.command(workspace), b"", self.timeout)
            .await;

        let stdout = result.stdout_text();
        if !stdout.trim().is_empty() {
            // compiler stdout is never program output
            debug!(compiler_stdout = %stdout.trim(), "Compiler wrote to stdout");
        }

        let outcome = self.classify(&result, workspace);
        match &outcome {
            CompileOutcome::Compiled { .. } => info!(
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Compilation succeeded"
            ),
            CompileOutcome::Rejected { diagnostics } => info!(
                elapsed_ms = result.elapsed.as_millis() as u64,
                timed_out = result.timed_out(),
                error_preview = diagnostics.lines().nth(1).unwrap_or(""),
                "Compilation failed"
            ),
            CompileOutcome::Unavailable { diagnostics } => {
                warn!(error = %diagnostics, "Compiler could not be started")
            }
        }
        Ok(outcome)
    }

    fn classify(&self, result: &ProcessResult, workspace: &Workspace) -> CompileOutcome {
        let stderr = result.stderr_text();
        match &result.outcome {
            ProcessOutcome::SpawnFailed(message) => CompileOutcome::Unavailable {
                diagnostics: format!(
                    "Failed to start compiler '{}': {}",
                    self.toolchain.command, message
                ),
            },
            ProcessOutcome::Exited(status) if status.success() => CompileOutcome::Compiled {
                binary: workspace.file(&self.toolchain.binary_name),
                warnings: stderr.trim().to_string(),
            },
            ProcessOutcome::Exited(_) => CompileOutcome::Rejected {
                diagnostics: format!("Compilation failed:\n{}", stderr.trim()),
            },
            ProcessOutcome::TimedOut => {
                let notice = format!(
                    "Compilation timed out after {} seconds.",
                    format_secs(self.timeout)
                );
                let stderr = stderr.trim();
                let body = if stderr.is_empty() {
                    notice
                } else {
                    format!("{}\n{}", stderr, notice)
                };
                CompileOutcome::Rejected {
                    diagnostics: format!("Compilation failed:\n{}", body),
                }
            }
        }
    }
}
