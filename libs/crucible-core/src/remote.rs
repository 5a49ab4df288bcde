/// Remote delegation backend
///
/// Forwards `{code, input}` to another runner instance and relays its
/// `{output, error}` unchanged. The delegate is trusted to enforce its own
/// compile and run limits; this side only bounds the whole round trip.

use crate::backend::Backend;
use crate::config::{format_secs, LimitsConfig};
use crate::error::{Result, RunnerError};
use crate::types::{ExecutionReport, ExecutionRequest, ExecutionResponse, Outcome};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument, warn};

const NO_DETAILS: &str = "No details available from external service.";

pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    limits: LimitsConfig,
}

impl RemoteBackend {
    pub fn new(url: &str, timeout: Duration, limits: LimitsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunnerError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            limits,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, e: reqwest::Error) -> RunnerError {
        if e.is_timeout() {
            RunnerError::RemoteTimeout {
                secs: format_secs(self.timeout),
            }
        } else {
            RunnerError::RemoteUnreachable(e.to_string())
        }
    }

    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn forward(&self, request: &ExecutionRequest) -> Result<ExecutionReport> {
        request.validate(&self.limits)?;

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "External runner request failed");
                self.transport_error(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let details = if body.trim().is_empty() {
                NO_DETAILS.to_string()
            } else {
                body
            };
            warn!(status = status.as_u16(), "External runner returned an error status");
            return Err(RunnerError::RemoteStatus {
                status: status.as_u16(),
                details,
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let relayed: ExecutionResponse = serde_json::from_str(&body)
            .map_err(|e| RunnerError::RemoteInvalidResponse(e.to_string()))?;

        info!(status = status.as_u16(), "Relayed response from external runner");
        Ok(ExecutionReport::new(Outcome::Relayed, relayed))
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport> {
        self.forward(&request).await
    }
}
