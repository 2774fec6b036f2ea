// src/metrics.rs

//! Prometheus metrics for the remote filter, registered once globally
//! via `lazy_static`, the same way this codebase's server-wide metrics
//! are registered.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Puts/checks/sweeps/advances issued, labeled by operation and outcome
    /// (`hit`, `miss`, `error`).
    pub static ref OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "gcbf_operations_total",
        "Total number of filter operations issued, labeled by operation and outcome.",
        &["operation", "outcome"]
    )
    .unwrap();

    /// Bytes read from the backing store per round-trip, labeled by operation.
    pub static ref BYTES_READ_TOTAL: CounterVec = register_counter_vec!(
        "gcbf_bytes_read_total",
        "Total bytes read from the backing store, labeled by operation.",
        &["operation"]
    )
    .unwrap();

    /// Bytes written to the backing store per round-trip, labeled by operation.
    pub static ref BYTES_WRITTEN_TOTAL: CounterVec = register_counter_vec!(
        "gcbf_bytes_written_total",
        "Total bytes written to the backing store, labeled by operation.",
        &["operation"]
    )
    .unwrap();

    /// Round-trip latency, labeled by operation and direction (`read`/`write`).
    pub static ref ROUND_TRIP_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        "gcbf_round_trip_latency_seconds",
        "Latency of a single backing-store round-trip, labeled by operation and direction.",
        &["operation", "direction"]
    )
    .unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
