/// Request Orchestrator - local execution backend
///
/// **Responsibility:**
/// Sequence Workspace → Compilation → Execution for one request and normalize
/// the result into an `ExecutionResponse`.
///
/// **Lifecycle (linear, no back-edges):**
/// `Init → WorkspaceAcquired → Compiling → {CompileFailed | Compiled} → Running → Completed`
///
/// Anything that escapes as an `Err` lands in `InternalError`. The workspace is
/// released exactly once on every one of these paths; a panic or a dropped
/// future falls back to the workspace's drop guard.
///
/// This module is glue: it knows nothing about how processes are spawned
/// (supervisor) or isolated (sandbox).

use crate::backend::Backend;
use crate::compiler::{CompileOutcome, Compiler};
use crate::config::{LimitsConfig, RunnerConfig};
use crate::error::Result;
use crate::executor::{Executor, RunStatus};
use crate::sandbox::{self, Sandbox};
use crate::supervisor::Supervisor;
use crate::types::{ExecutionReport, ExecutionRequest, ExecutionResponse, Outcome};
use crate::workspace::{Workspace, WorkspaceManager};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    WorkspaceAcquired,
    Compiling,
    CompileFailed,
    Compiled,
    Running,
    Completed,
    InternalError,
}

pub struct Orchestrator {
    workspaces: WorkspaceManager,
    compiler: Compiler,
    executor: Executor,
    limits: LimitsConfig,
}

impl Orchestrator {
    pub fn new(config: &RunnerConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        let supervisor = Supervisor::new(config.limits.max_output_bytes);
        Self {
            workspaces: WorkspaceManager::new(&config.scratch_root),
            compiler: Compiler::new(
                config.toolchain.clone(),
                config.limits.compile_timeout(),
                supervisor,
            ),
            executor: Executor::new(
                sandbox,
                config.limits.execution_timeout(),
                config.limits.max_output_bytes,
            ),
            limits: config.limits.clone(),
        }
    }

    /// Orchestrator with the isolation strategy named in `config`
    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        Ok(Self::new(config, sandbox::from_config(config)?))
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    #[instrument(
        name = "request",
        skip_all,
        fields(
            request_id = tracing::field::Empty,
            source_size = request.code.len(),
            stdin_size = request.input.len(),
        )
    )]
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionReport> {
        let start = Instant::now();
        request.validate(&self.limits)?;
        transition(Stage::Init);

        let workspace = match self.workspaces.acquire().await {
            Ok(workspace) => workspace,
            Err(e) => {
                transition(Stage::InternalError);
                error!(error = %e, "Failed to acquire workspace");
                return Err(e.into());
            }
        };
        Span::current().record("request_id", tracing::field::display(workspace.id()));
        transition(Stage::WorkspaceAcquired);

        let result = self.run_stages(&workspace, request).await;
        workspace.release().await;

        match &result {
            Ok(report) => info!(
                outcome = %report.outcome,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request finished"
            ),
            Err(e) => {
                transition(Stage::InternalError);
                error!(error = %e, "Request failed");
            }
        }
        result
    }

    async fn run_stages(&self, workspace: &Workspace, request: &ExecutionRequest) -> Result<ExecutionReport> {
        transition(Stage::Compiling);
        let (binary, warnings) = match self.compiler.compile(workspace, &request.code).await? {
            CompileOutcome::Compiled { binary, warnings } => (binary, warnings),
            CompileOutcome::Rejected { diagnostics } => {
                transition(Stage::CompileFailed);
                return Ok(ExecutionReport::new(
                    Outcome::CompileFailed,
                    ExecutionResponse::failure(diagnostics.trim()),
                ));
            }
            CompileOutcome::Unavailable { diagnostics } => {
                transition(Stage::CompileFailed);
                return Ok(ExecutionReport::new(
                    Outcome::ToolchainUnavailable,
                    ExecutionResponse::failure(diagnostics.trim()),
                ));
            }
        };
        transition(Stage::Compiled);

        transition(Stage::Running);
        let run = self
            .executor
            .execute(workspace, &binary, request.input.as_bytes())
            .await;
        transition(Stage::Completed);

        let outcome = match run.status {
            RunStatus::Succeeded => Outcome::Succeeded,
            RunStatus::Failed => Outcome::RunFailed,
            RunStatus::Unavailable => Outcome::ToolchainUnavailable,
        };
        let error = join_diagnostics(&warnings, &run.diagnostics);

        Ok(ExecutionReport::new(
            outcome,
            ExecutionResponse::new(run.stdout.trim(), error.trim()),
        ))
    }
}

fn transition(stage: Stage) {
    debug!(stage = ?stage, "Stage transition");
}

/// Compile diagnostics first, then run diagnostics, one per line
fn join_diagnostics(compile: &str, run: &str) -> String {
    match (compile.trim().is_empty(), run.trim().is_empty()) {
        (true, _) => run.to_string(),
        (false, true) => compile.to_string(),
        (false, false) => format!("{}\n{}", compile.trim_end(), run),
    }
}

#[async_trait]
impl Backend for Orchestrator {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport> {
        self.run(&request).await
    }
}
