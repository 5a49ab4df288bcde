// Execution backends: run locally or delegate to another runner instance
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::remote::RemoteBackend;
use crate::types::{ExecutionReport, ExecutionRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// One request in, one report out. Implementations are chosen once from
/// configuration; callers never branch on which one they hold.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport>;
}

/// Remote delegate when `remote.url` is set, local orchestrator otherwise
pub fn from_config(config: &RunnerConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match &config.remote.url {
        Some(url) => Arc::new(RemoteBackend::new(url, config.remote.timeout(), config.limits.clone())?),
        None => Arc::new(Orchestrator::from_config(config)?),
    };
    Ok(backend)
}
