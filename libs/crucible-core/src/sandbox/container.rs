/// Docker isolation for the compiled binary
///
/// **Container rules:**
/// 1. Pulls the configured image if it is not cached
/// 2. Bind-mounts the workspace at the same path and runs there
/// 3. Network disabled, memory (no swap) and CPU capped
/// 4. stdin comes from a file in the workspace, so nothing has to be attached
/// 5. The program runs under `timeout(1)`, the sandbox ceiling
/// 6. The server timeout kills the container; removal happens on every path
///
/// The daemon must see the workspace at the same path the service does.

use super::{Sandbox, CEILING_KILL_AFTER};
use crate::config::{format_secs, IsolationConfig};
use crate::error::{Result, RunnerError};
use crate::supervisor::{ExitStatus, OutputBuffer, ProcessOutcome, ProcessResult};
use crate::workspace::Workspace;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STDIN_FILE: &str = "stdin.txt";

/// Removes the container when dropped, whatever path the run took
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

pub struct ContainerSandbox {
    docker: Docker,
    image: String,
    memory_bytes: i64,
    nano_cpus: i64,
    ceiling: Duration,
    max_output_bytes: usize,
}

impl ContainerSandbox {
    pub fn connect(config: &IsolationConfig, max_output_bytes: usize) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RunnerError::Config(format!("failed to connect to Docker daemon: {}", e)))?;

        Ok(Self {
            docker,
            image: config.docker_image.clone(),
            memory_bytes: i64::from(config.memory_limit_mb) * 1024 * 1024,
            nano_cpus: (config.cpu_limit * 1_000_000_000.0) as i64,
            ceiling: config.sandbox_timeout(),
            max_output_bytes,
        })
    }

    /// Shell line run inside the container
    fn shell_command(&self, binary_name: &str) -> String {
        format!(
            "timeout -k {} {}s ./{} < {}",
            CEILING_KILL_AFTER,
            format_secs(self.ceiling),
            binary_name,
            STDIN_FILE
        )
    }

    async fn ensure_image(&self) -> std::result::Result<(), bollard::errors::Error> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }
        info!(image = %self.image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, workspace: &Workspace, binary_name: &str) -> Config<String> {
        let mount = workspace.path().to_string_lossy().into_owned();
        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                self.shell_command(binary_name),
            ]),
            working_dir: Some(mount.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_bytes),
                memory_swap: Some(self.memory_bytes),
                nano_cpus: Some(self.nano_cpus),
                network_mode: Some("none".to_string()),
                binds: Some(vec![format!("{}:{}", mount, mount)]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Stream logs into the caller's buffers until the container stops, then fetch its exit code.
    ///
    /// The buffers live outside this future so output survives it being cancelled.
    async fn collect(
        &self,
        container_id: &str,
        stdout: &mut OutputBuffer,
        stderr: &mut OutputBuffer,
    ) -> Option<i64> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });
        let mut logs = self.docker.logs(container_id, logs_options);
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!(container = %container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut wait = self.docker.wait_container(container_id, wait_options);
        let exit_code = match wait.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container = %container_id, error = %e, "Failed to wait for container");
                None
            }
            None => None,
        };

        exit_code
    }

    async fn oom_killed(&self, container_id: &str) -> bool {
        self.docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.oom_killed)
            .unwrap_or(false)
    }
}

/// Container exit codes follow the shell convention: 128+n means signal n
pub(crate) fn status_from_container_code(code: i64) -> ExitStatus {
    match code {
        // 137 stays a code so the ceiling check can see timeout's KILL escalation
        137 => ExitStatus::Code(137),
        129..=159 => ExitStatus::Signal((code - 128) as i32),
        _ => ExitStatus::Code(code as i32),
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn ceiling(&self) -> Option<Duration> {
        Some(self.ceiling)
    }

    async fn run(
        &self,
        workspace: &Workspace,
        binary: &Path,
        stdin: &[u8],
        timeout: Duration,
    ) -> ProcessResult {
        let start = Instant::now();

        let Some(binary_name) = binary.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return ProcessResult::spawn_failed("binary path has no file name", start.elapsed());
        };
        if let Err(e) = tokio::fs::write(workspace.file(STDIN_FILE), stdin).await {
            return ProcessResult::spawn_failed(format!("failed to stage stdin: {}", e), start.elapsed());
        }
        if let Err(e) = self.ensure_image().await {
            return ProcessResult::spawn_failed(
                format!("failed to pull image '{}': {}", self.image, e),
                start.elapsed(),
            );
        }

        let container_name = format!("crucible-{}", workspace.id());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = match self
            .docker
            .create_container(Some(create_options), self.container_config(workspace, &binary_name))
            .await
        {
            Ok(container) => container,
            Err(e) => {
                return ProcessResult::spawn_failed(
                    format!("failed to create container: {}", e),
                    start.elapsed(),
                )
            }
        };
        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            return ProcessResult::spawn_failed(
                format!("failed to start container: {}", e),
                start.elapsed(),
            );
        }

        let mut stdout = OutputBuffer::new(self.max_output_bytes);
        let mut stderr = OutputBuffer::new(self.max_output_bytes);
        let waited = tokio::time::timeout(
            timeout,
            self.collect(&container_id, &mut stdout, &mut stderr),
        )
        .await;

        let outcome = match waited {
            Ok(Some(code)) => {
                if code != 0 && self.oom_killed(&container_id).await {
                    stderr.push(b"\n[Container killed: memory limit exceeded]");
                }
                ProcessOutcome::Exited(status_from_container_code(code))
            }
            Ok(None) => ProcessOutcome::SpawnFailed("container exit status unavailable".to_string()),
            Err(_) => {
                debug!(container = %container_id, "Container timed out, killing");
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = %container_id, error = %e, "Failed to kill timed-out container");
                }
                // partial output streamed before the deadline is kept
                ProcessOutcome::TimedOut
            }
        };

        ProcessResult {
            outcome,
            stdout: stdout.data,
            stderr: stderr.data,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            elapsed: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationMode;
    use crate::workspace::WorkspaceManager;

    fn sandbox() -> ContainerSandbox {
        let config = IsolationConfig {
            mode: IsolationMode::Docker,
            ..IsolationConfig::default()
        };
        // connecting is lazy; no daemon is contacted until a request is made
        ContainerSandbox::connect(&config, 1024).unwrap()
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(status_from_container_code(0), ExitStatus::Code(0));
        assert_eq!(status_from_container_code(124), ExitStatus::Code(124));
        assert_eq!(status_from_container_code(139), ExitStatus::Signal(11));
        assert_eq!(status_from_container_code(137), ExitStatus::Code(137));
        assert_eq!(status_from_container_code(1), ExitStatus::Code(1));
    }

    #[tokio::test]
    async fn test_limits_from_config() {
        let sandbox = sandbox();
        assert_eq!(sandbox.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(sandbox.nano_cpus, 1_000_000_000);
        assert_eq!(sandbox.ceiling(), Some(Duration::from_secs(5)));
        assert_eq!(sandbox.shell_command("main.out"), "timeout -k 1s 5s ./main.out < stdin.txt");
    }

    #[tokio::test]
    async fn test_container_config_is_locked_down() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path()).acquire().await.unwrap();
        let config = sandbox().container_config(&ws, "main.out");
        let mount = ws.path().to_string_lossy().into_owned();

        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.working_dir.as_deref(), Some(mount.as_str()));
        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, host.memory_swap);
        assert_eq!(host.binds, Some(vec![format!("{}:{}", mount, mount)]));
        ws.release().await;
    }

    #[tokio::test]
    #[ignore] // Requires a Docker daemon and the gcc image
    async fn test_runs_script_in_container() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path()).acquire().await.unwrap();
        let binary = ws.file("main.out");
        std::process::Command::new("sh")
            .arg("-c")
            .arg(format!(
                "printf '#!/bin/sh\\nread a b\\necho $((a + b))\\n' > {0} && chmod +x {0}",
                binary.display()
            ))
            .status()
            .unwrap();

        let result = sandbox().run(&ws, &binary, b"5 7\n", Duration::from_secs(30)).await;
        assert!(result.success(), "{:?}", result);
        assert_eq!(result.stdout_text().trim(), "12");
        ws.release().await;
    }

    #[tokio::test]
    #[ignore] // Requires a Docker daemon and the gcc image
    async fn test_container_timeout_keeps_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path()).acquire().await.unwrap();
        let binary = ws.file("main.out");
        std::process::Command::new("sh")
            .arg("-c")
            .arg(format!(
                "printf '#!/bin/sh\\necho started\\nsleep 30\\n' > {0} && chmod +x {0}",
                binary.display()
            ))
            .status()
            .unwrap();

        // warm the image cache so the deadline only covers the run itself
        sandbox().ensure_image().await.unwrap();
        let result = sandbox().run(&ws, &binary, b"", Duration::from_secs(3)).await;
        assert!(result.timed_out(), "{:?}", result);
        assert_eq!(result.stdout_text().trim(), "started");
        ws.release().await;
    }
}
