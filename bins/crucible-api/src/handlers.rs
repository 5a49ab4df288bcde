// HTTP route handlers for the Crucible API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use crucible_core::{ExecutionRequest, ExecutionResponse, RunnerError};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

/// Error answered with the same `{output, error}` body as every other outcome
pub struct ApiError {
    status: StatusCode,
    body: ExecutionResponse,
}

impl ApiError {
    fn new(status: StatusCode, body: ExecutionResponse) -> Self {
        Self { status, body }
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = ExecutionResponse::failure(err.public_message());
        body.details = err.details();
        Self::new(status, body)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            rejection.status(),
            ExecutionResponse::failure(rejection.body_text()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// POST /run - Compile and run a C++ program
pub async fn run_code(
    State(state): State<AppState>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExecutionResponse>), ApiError> {
    let start = Instant::now();
    let _in_flight = metrics::InFlightGuard::enter();

    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected malformed request body");
        metrics::observe("invalid_request", start.elapsed().as_secs_f64());
        ApiError::from(rejection)
    })?;

    // Run on its own task so a panic anywhere in the pipeline becomes a 500
    let backend = state.backend.clone();
    let joined = tokio::spawn(async move { backend.execute(request).await }).await;

    let result = match joined {
        Ok(result) => result,
        Err(join_error) => {
            error!(error = %join_error, "Execution task failed");
            metrics::observe("internal_error", start.elapsed().as_secs_f64());
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ExecutionResponse::failure(format!("Server error: {}", join_error)),
            ));
        }
    };

    match result {
        Ok(report) => {
            metrics::observe(report.outcome.as_str(), start.elapsed().as_secs_f64());
            let status = if report.outcome.is_server_fault() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            info!(
                outcome = %report.outcome,
                status = status.as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Run request served"
            );
            Ok((status, Json(report.response)))
        }
        Err(e) => {
            let label = match &e {
                RunnerError::InvalidRequest(_) => "invalid_request",
                RunnerError::Workspace(_) | RunnerError::Config(_) => "internal_error",
                _ => "remote_error",
            };
            metrics::observe(label, start.elapsed().as_secs_f64());
            warn!(error = %e, status = e.status_code(), "Run request failed");
            Err(e.into())
        }
    }
}

/// GET /health - Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
