// Prometheus metrics for the sandbox API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use sandbox_common::types::ExecutionResult;
use std::sync::Once;
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // API requests by endpoint and response status
    pub static ref API_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("sandbox_api_requests_total", "Total API requests"),
        &["endpoint", "status"]
    )
    .expect("metric can be created");

    // Finished requests by language and outcome (`completed` or an error kind)
    pub static ref EXECUTIONS: CounterVec = CounterVec::new(
        Opts::new("sandbox_executions_total", "Total execution requests handled"),
        &["language", "outcome"]
    )
    .expect("metric can be created");

    // Per-input results by language and run status
    pub static ref RUN_RESULTS: CounterVec = CounterVec::new(
        Opts::new("sandbox_run_results_total", "Total per-input run results"),
        &["language", "status"]
    )
    .expect("metric can be created");

    // Wall time of a whole request, provisioning included
    pub static ref EXECUTION_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "sandbox_execution_time_ms",
            "Request execution time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["language"]
    )
    .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Register collectors; later calls are no-ops
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(API_REQUESTS.clone()),
            Box::new(EXECUTIONS.clone()),
            Box::new(RUN_RESULTS.clone()),
            Box::new(EXECUTION_TIME.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!(error = %e, "Failed to register collector");
            }
        }
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(endpoint: &str, status: u16) {
    API_REQUESTS
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

pub fn record_execution(
    language: &str,
    outcome: &str,
    results: &[ExecutionResult],
    execution_time_ms: f64,
) {
    EXECUTIONS.with_label_values(&[language, outcome]).inc();
    EXECUTION_TIME
        .with_label_values(&[language])
        .observe(execution_time_ms);
    for result in results {
        RUN_RESULTS
            .with_label_values(&[language, result.status.as_str()])
            .inc();
    }
}
