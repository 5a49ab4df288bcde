/// Process Supervisor - spawn, stream, wait-or-kill
///
/// **Responsibility:**
/// Run one child process to a single terminal outcome.
///
/// **Guarantees:**
/// - stdin is written by its own task and closed afterwards, so a child that
///   reads to EOF terminates and a child that never reads cannot wedge us
/// - stdout/stderr are drained concurrently while the child runs; full pipe
///   buffers never deadlock the child
/// - capture is bounded per stream; the excess is read and discarded
/// - the timer starts at spawn; on expiry the child's whole process group gets
///   SIGKILL, so wrappers like `timeout` or `sh` cannot leave orphans holding
///   the pipes
/// - a failed spawn is reported as data, uniformly with "ran and failed"

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long reader tasks may keep draining after the child is gone
const READER_GRACE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8 * 1024;

/// Exit status of a process that terminated on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Code(status.code().unwrap_or(-1))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(sig) => match signal_name(*sig) {
                Some(name) => write!(f, "signal {} ({})", sig, name),
                None => write!(f, "signal {}", sig),
            },
        }
    }
}

/// The one terminal outcome of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited (or was signalled) before the deadline
    Exited(ExitStatus),
    /// Still running at the deadline and force-killed
    TimedOut,
    /// Never started, or could not be supervised
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: ProcessOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl ProcessResult {
    pub fn spawn_failed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            outcome: ProcessOutcome::SpawnFailed(message.into()),
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            elapsed,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, ProcessOutcome::Exited(status) if status.success())
    }

    pub fn timed_out(&self) -> bool {
        self.outcome == ProcessOutcome::TimedOut
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.outcome {
            ProcessOutcome::Exited(status) => Some(status),
            _ => None,
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

/// Program, arguments and working directory of a child to supervise
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    max_output_bytes: usize,
}

impl Supervisor {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run `spec` with `stdin` under a wall-clock `timeout`
    pub async fn run(&self, spec: &CommandSpec, stdin: &[u8], timeout: Duration) -> ProcessResult {
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        // Own process group so a timeout can take down the whole tree
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %spec.display_name(), error = %e, "Failed to spawn process");
                return ProcessResult::spawn_failed(e.to_string(), start.elapsed());
            }
        };
        let pid = child.id();

        let stdin_task = child.stdin.take().map(|mut pipe| {
            let input = stdin.to_vec();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    // the child may exit without reading everything
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        debug!(error = %e, "Failed to write stdin");
                    }
                }
                let _ = pipe.shutdown().await;
            })
        });
        let stdout_buf = SharedBuffer::new(self.max_output_bytes);
        let stderr_buf = SharedBuffer::new(self.max_output_bytes);
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(capture(pipe, stdout_buf.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(capture(pipe, stderr_buf.clone())));

        let outcome = match tokio::time::timeout(timeout, wait_and_reap(&mut child, pid)).await {
            Ok(Ok(status)) => ProcessOutcome::Exited(status.into()),
            Ok(Err(e)) => {
                warn!(program = %spec.display_name(), error = %e, "Failed to wait for process");
                terminate(&mut child, pid).await;
                ProcessOutcome::SpawnFailed(format!("failed to wait for process: {}", e))
            }
            Err(_) => {
                debug!(
                    program = %spec.display_name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Process timed out, killing"
                );
                terminate(&mut child, pid).await;
                ProcessOutcome::TimedOut
            }
        };

        if let Some(task) = stdin_task {
            task.abort();
        }
        let stdout = collect(stdout_task, stdout_buf).await;
        let stderr = collect(stderr_task, stderr_buf).await;

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

/// Wait for the child to exit, SIGKILL whatever it left in its group, then reap it.
///
/// The group is killed while the leader is still an unreaped zombie: its pid,
/// and with it the group id, cannot be handed to another process until then.
async fn wait_and_reap(child: &mut Child, pid: Option<u32>) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            match wait_exited(pid).await {
                Ok(()) => kill_process_group(Some(pid)),
                Err(e) => debug!(error = %e, "waitid failed, skipping group cleanup"),
            }
        }
    }
    child.wait().await
}

/// Block (on the blocking pool) until `pid` has exited, without reaping it
#[cfg(unix)]
async fn wait_exited(pid: u32) -> std::io::Result<()> {
    let handle = tokio::task::spawn_blocking(move || loop {
        // SAFETY: siginfo_t is plain data and waitid only writes into it
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    });
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
    }
}

/// Force-kill the child and its group, then reap it. Safe on exited children.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);
    // errors here only mean the child is already gone
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// SIGKILL every process in the group led by `pid`; ESRCH is ignored
pub fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Bounded capture buffer; bytes past `limit` are counted as truncation and dropped
#[derive(Debug, Default)]
pub(crate) struct OutputBuffer {
    pub(crate) data: Vec<u8>,
    pub(crate) truncated: bool,
    limit: usize,
}

impl OutputBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            truncated: false,
            limit,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Capture buffer shared between a reader task and the supervisor, so bytes
/// read so far survive the reader being abandoned
#[derive(Debug, Clone)]
struct SharedBuffer(Arc<Mutex<OutputBuffer>>);

impl SharedBuffer {
    fn new(limit: usize) -> Self {
        Self(Arc::new(Mutex::new(OutputBuffer::new(limit))))
    }

    fn lock(&self) -> MutexGuard<'_, OutputBuffer> {
        // a reader panicking mid-push leaves the buffer usable
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> OutputBuffer {
        std::mem::take(&mut *self.lock())
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, buffer: SharedBuffer) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => buffer.lock().push(&buf[..n]),
            Err(e) => {
                debug!(error = %e, "Pipe read failed");
                break;
            }
        }
    }
}

async fn collect(task: Option<JoinHandle<()>>, buffer: SharedBuffer) -> OutputBuffer {
    let Some(mut task) = task else {
        return OutputBuffer::default();
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Output reader task failed"),
        Err(_) => {
            // something outside the process group still holds the pipe
            warn!("Output reader did not finish after process exit, abandoning");
            task.abort();
            let mut captured = buffer.take();
            captured.truncated = true;
            return captured;
        }
    }
    buffer.take()
}

/// Conventional name of a POSIX signal number
pub fn signal_name(signal: i32) -> Option<&'static str> {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        5 => "SIGTRAP",
        6 => "SIGABRT",
        7 => "SIGBUS",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        24 => "SIGXCPU",
        25 => "SIGXFSZ",
        _ => return None,
    };
    Some(name)
}
