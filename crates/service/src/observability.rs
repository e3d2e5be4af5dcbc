use once_cell::sync::Lazy;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

// Prometheus metrics (default registry)
pub static MUTATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kv_cache_mutations_total",
        "Total set/delete operations applied to the store"
    )
    .expect("register mutations_total")
});

pub static PERSIST_WRITES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kv_cache_persist_writes_total",
        "Snapshots successfully written to disk"
    )
    .expect("register persist_writes_total")
});

pub static PERSIST_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kv_cache_persist_failures_total",
        "Snapshot encode or write failures"
    )
    .expect("register persist_failures_total")
});

pub static PERSIST_DEFERRED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kv_cache_persist_deferred_total",
        "Snapshots parked in the overflow slot because the persistence queue stayed full"
    )
    .expect("register persist_deferred_total")
});

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    // touch the counters so they are exported before the first event
    Lazy::force(&MUTATIONS_TOTAL);
    Lazy::force(&PERSIST_WRITES_TOTAL);
    Lazy::force(&PERSIST_FAILURES_TOTAL);
    Lazy::force(&PERSIST_DEFERRED_TOTAL);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    match String::from_utf8(buffer) {
        Ok(body) => (axum::http::StatusCode::OK, body),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        ),
    }
}
