// Prometheus metrics for the /run endpoint
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "crucible_requests_total",
        "Run requests by terminal outcome",
        &["outcome"]
    )
    .expect("metric registration");
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "crucible_request_duration_seconds",
        "Wall-clock time spent serving a run request",
        &["outcome"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]
    )
    .expect("metric registration");
    pub static ref IN_FLIGHT: IntGauge = register_int_gauge!(
        "crucible_requests_in_flight",
        "Run requests currently being served"
    )
    .expect("metric registration");
}

pub fn observe(outcome: &str, elapsed_secs: f64) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    REQUEST_DURATION
        .with_label_values(&[outcome])
        .observe(elapsed_secs);
}

/// Decrements the in-flight gauge when dropped, so cancelled requests are counted out too
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn enter() -> Self {
        IN_FLIGHT.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.dec();
    }
}

/// Text exposition of the default registry
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
