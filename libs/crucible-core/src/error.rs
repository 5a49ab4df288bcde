use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Failures that escape the normal request state machine.
///
/// A program that fails to compile or crashes is not an error here: those
/// outcomes are carried in `ExecutionReport` and answered with HTTP 200.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("External runner service responded with status {status}.")]
    RemoteStatus { status: u16, details: String },

    #[error("Request to external runner service timed out ({secs} seconds).")]
    RemoteTimeout { secs: String },

    #[error("Error connecting to external service: {0}")]
    RemoteUnreachable(String),

    #[error("External runner service returned an unreadable response: {0}")]
    RemoteInvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RunnerError {
    /// Transport status this error should be answered with
    pub fn status_code(&self) -> u16 {
        match self {
            RunnerError::InvalidRequest(_) => 400,
            RunnerError::Workspace(_) | RunnerError::Config(_) => 500,
            RunnerError::RemoteStatus { status, .. } if (400..=599).contains(status) => *status,
            RunnerError::RemoteStatus { .. } => 500,
            RunnerError::RemoteTimeout { .. } | RunnerError::RemoteUnreachable(_) => 503,
            RunnerError::RemoteInvalidResponse(_) => 502,
        }
    }

    /// Human-readable text for the `error` field of the response body
    pub fn public_message(&self) -> String {
        match self {
            RunnerError::Workspace(_) | RunnerError::Config(_) => format!("Server error: {}", self),
            _ => self.to_string(),
        }
    }

    /// Extra context for the `details` field, if any
    pub fn details(&self) -> Option<String> {
        match self {
            RunnerError::RemoteStatus { details, .. } => Some(details.clone()),
            RunnerError::RemoteUnreachable(msg) | RunnerError::RemoteInvalidResponse(msg) => {
                Some(msg.clone())
            }
            _ => None,
        }
    }
}
