pub mod backend;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod remote;
pub mod sandbox;
pub mod supervisor;
pub mod types;
pub mod workspace;

#[cfg(test)]
mod orchestrator_tests;
#[cfg(test)]
mod test_support;

pub use backend::Backend;
pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use orchestrator::Orchestrator;
pub use remote::RemoteBackend;
pub use types::{ExecutionReport, ExecutionRequest, ExecutionResponse, Outcome};
