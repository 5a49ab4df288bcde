/// Isolation strategies for the Execution Stage
///
/// A sandbox runs the compiled binary once and reports a `ProcessResult`.
/// Each one enforces the server (outer) timeout it is handed; strategies that
/// also impose their own ceiling report it through `ceiling()`, and signal that
/// it fired with exit status 124, the coreutils `timeout` convention.

mod container;
mod host;

pub use container::ContainerSandbox;
pub use host::HostSandbox;

use crate::config::{IsolationMode, RunnerConfig};
use crate::error::Result;
use crate::supervisor::{ExitStatus, ProcessResult, Supervisor};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Exit status `timeout(1)` uses when the time limit fired
pub const CEILING_EXIT_CODE: i32 = 124;

/// Grace `timeout(1)` gives a program between TERM and KILL
pub const CEILING_KILL_AFTER: &str = "1s";

#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Time limit the isolation layer enforces by itself, if any
    fn ceiling(&self) -> Option<Duration>;

    async fn run(
        &self,
        workspace: &Workspace,
        binary: &Path,
        stdin: &[u8],
        timeout: Duration,
    ) -> ProcessResult;

    /// Whether `result` means the sandbox ceiling (not the server timeout) stopped the program.
    ///
    /// A program that traps TERM is KILLed by `timeout` after the grace period,
    /// which takes `timeout` down with it; that shows up as SIGKILL (or 137 from
    /// a shell) once the ceiling has elapsed.
    fn ceiling_fired(&self, result: &ProcessResult) -> bool {
        let Some(ceiling) = self.ceiling() else {
            return false;
        };
        match result.exit_status() {
            Some(ExitStatus::Code(CEILING_EXIT_CODE)) => true,
            Some(ExitStatus::Signal(9)) | Some(ExitStatus::Code(137)) => result.elapsed >= ceiling,
            _ => false,
        }
    }
}

/// Build the sandbox selected by `config.isolation.mode`
pub fn from_config(config: &RunnerConfig) -> Result<Arc<dyn Sandbox>> {
    let supervisor = Supervisor::new(config.limits.max_output_bytes);
    let sandbox: Arc<dyn Sandbox> = match config.isolation.mode {
        IsolationMode::None => Arc::new(HostSandbox::new(supervisor, None)),
        IsolationMode::Timeout => Arc::new(HostSandbox::new(
            supervisor,
            Some(config.isolation.sandbox_timeout()),
        )),
        IsolationMode::Docker => Arc::new(ContainerSandbox::connect(
            &config.isolation,
            config.limits.max_output_bytes,
        )?),
    };
    Ok(sandbox)
}
