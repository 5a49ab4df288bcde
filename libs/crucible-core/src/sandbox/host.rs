// Runs the binary as a plain child process, optionally under coreutils `timeout`
use super::{Sandbox, CEILING_KILL_AFTER};
use crate::config::format_secs;
use crate::supervisor::{CommandSpec, ProcessResult, Supervisor};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HostSandbox {
    supervisor: Supervisor,
    ceiling: Option<Duration>,
}

impl HostSandbox {
    pub fn new(supervisor: Supervisor, ceiling: Option<Duration>) -> Self {
        Self { supervisor, ceiling }
    }

    fn command(&self, workspace: &Workspace, binary: &Path) -> CommandSpec {
        let spec = match self.ceiling {
            // TERM first so timeout(1) can report 124; KILL follows for programs that trap it
            Some(ceiling) => CommandSpec::new("timeout")
                .args(["-k", CEILING_KILL_AFTER])
                .arg(format!("{}s", format_secs(ceiling)))
                .arg(binary),
            None => CommandSpec::new(binary),
        };
        spec.current_dir(workspace.path())
    }
}

#[async_trait]
impl Sandbox for HostSandbox {
    fn name(&self) -> &'static str {
        if self.ceiling.is_some() {
            "timeout"
        } else {
            "none"
        }
    }

    fn ceiling(&self) -> Option<Duration> {
        self.ceiling
    }

    async fn run(
        &self,
        workspace: &Workspace,
        binary: &Path,
        stdin: &[u8],
        timeout: Duration,
    ) -> ProcessResult {
        self.supervisor
            .run(&self.command(workspace, binary), stdin, timeout)
            .await
    }
}
