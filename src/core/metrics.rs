// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the remoting core.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Connection Gauges and Counters ---
    /// The number of connections currently open, client and server side.
    pub static ref OPEN_CONNECTIONS: Gauge =
        register_gauge!("remora_open_connections", "Number of currently open connections.").unwrap();
    /// The total number of connections accepted by servers since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("remora_connections_accepted_total", "Total number of inbound connections accepted.").unwrap();
    /// The total number of outbound connections established by connection factories.
    pub static ref CONNECTIONS_CREATED_TOTAL: Counter =
        register_counter!("remora_connections_created_total", "Total number of outbound connections created.").unwrap();


    // --- Invocation Counters ---
    /// The total number of invocations issued, labeled by invocation style.
    pub static ref INVOCATIONS_TOTAL: CounterVec =
        register_counter_vec!("remora_invocations_total", "Total number of invocations issued, labeled by style.", &["style"]).unwrap();
    /// The total number of invoke futures failed by their timeout.
    pub static ref INVOKE_TIMEOUTS_TOTAL: Counter =
        register_counter!("remora_invoke_timeouts_total", "Total number of invocations that timed out.").unwrap();
    /// The total number of invoke futures failed because their connection closed.
    pub static ref DRAINED_FUTURES_TOTAL: Counter =
        register_counter!("remora_drained_futures_total", "Total number of invoke futures drained on connection close.").unwrap();
    /// The total number of completions that arrived after a future was already filled.
    pub static ref LATE_COMPLETIONS_TOTAL: Counter =
        register_counter!("remora_late_completions_total", "Total number of completions ignored because the future was already done.").unwrap();
    /// The total number of inbound requests discarded because their caller already gave up.
    pub static ref REQUESTS_DISCARDED_TOTAL: Counter =
        register_counter!("remora_requests_discarded_total", "Total number of requests discarded after their timeout elapsed.").unwrap();


    // --- Histograms ---
    /// A histogram of server-side request processing latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("remora_request_latency_seconds", "Latency of request processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
