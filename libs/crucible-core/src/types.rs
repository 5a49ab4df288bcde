use crate::config::LimitsConfig;
use crate::error::{Result, RunnerError};
use serde::{Deserialize, Deserializer, Serialize};

/// Inbound request body: `{ "code": "...", "input": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub input: String,
}

/// `null` is treated like an absent field
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input: input.into(),
        }
    }

    /// Reject requests the runner will not even try to compile
    pub fn validate(&self, limits: &LimitsConfig) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(RunnerError::InvalidRequest("No code provided".to_string()));
        }
        if self.code.len() > limits.max_source_bytes {
            return Err(RunnerError::InvalidRequest(format!(
                "Source code exceeds maximum size of {} bytes",
                limits.max_source_bytes
            )));
        }
        if self.input.len() > limits.max_input_bytes {
            return Err(RunnerError::InvalidRequest(format!(
                "Input exceeds maximum size of {} bytes",
                limits.max_input_bytes
            )));
        }
        Ok(())
    }
}

/// The only externally observable artifact of a request.
///
/// `details` is only populated for remote-delegation failures, where the
/// delegate's own body is passed back for debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ExecutionResponse {
    pub fn new(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: error.into(),
            details: None,
        }
    }

    /// Response carrying only an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self::new(String::new(), error)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Terminal state a request reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Both stages finished with exit status 0 and no timeout
    Succeeded,
    /// Compiler exited non-zero or timed out; the program never ran
    CompileFailed,
    /// Program exited non-zero, timed out, or was killed by a signal
    RunFailed,
    /// Compiler or program could not be launched at all
    ToolchainUnavailable,
    /// Response came back verbatim from a remote runner
    Relayed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::CompileFailed => "compile_failed",
            Outcome::RunFailed => "run_failed",
            Outcome::ToolchainUnavailable => "toolchain_unavailable",
            Outcome::Relayed => "relayed",
        }
    }

    /// Whether the runner itself is at fault rather than the submitted code
    pub fn is_server_fault(&self) -> bool {
        matches!(self, Outcome::ToolchainUnavailable)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response plus the terminal state that produced it
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    pub response: ExecutionResponse,
}

impl ExecutionReport {
    pub fn new(outcome: Outcome, response: ExecutionResponse) -> Self {
        Self { outcome, response }
    }
}
