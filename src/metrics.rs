// src/metrics.rs
//
// Prometheus metrics for the sync engine. Everything compiles to a no-op unless
// the `observability` feature is enabled.

#[cfg(feature = "observability")]
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    #[cfg(feature = "observability")]
    {
        describe_histogram!(
            "rpc_call_duration_seconds",
            "Latency of chain RPC calls by method."
        );
        describe_counter!("rpc_call_failures_total", "Failed or timed-out chain RPC calls.");
        describe_histogram!(
            "multicall_batch_size",
            "Number of calls packed into one aggregate3 request."
        );
        describe_counter!(
            "multicall_chunk_failures_total",
            "aggregate3 chunks that failed, timed out or returned a mismatched result count."
        );
        describe_counter!(
            "indexing_attempts_total",
            "Indexing-service attempts, labelled by outcome."
        );
        describe_counter!(
            "indexing_exhausted_total",
            "Logical indexing calls that failed on every endpoint."
        );
        describe_histogram!("sync_cycle_duration_seconds", "Duration of a sync cycle.");
        describe_counter!("sync_pools_updated_total", "Pool state records emitted.");
        describe_gauge!("sync_cursor_block", "Last persisted cursor block.");
    }
}

/// Installs the Prometheus HTTP exporter on `addr`.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

pub fn record_rpc_call(method: &'static str, duration: Duration, success: bool) {
    #[cfg(feature = "observability")]
    {
        histogram!("rpc_call_duration_seconds", duration.as_secs_f64(), "method" => method);
        if !success {
            counter!("rpc_call_failures_total", 1, "method" => method);
        }
    }
    #[cfg(not(feature = "observability"))]
    let _ = (method, duration, success);
}

pub fn record_multicall_batch_size(size: usize) {
    #[cfg(feature = "observability")]
    histogram!("multicall_batch_size", size as f64);
    #[cfg(not(feature = "observability"))]
    let _ = size;
}

pub fn increment_multicall_chunk_failures() {
    #[cfg(feature = "observability")]
    counter!("multicall_chunk_failures_total", 1);
}

pub fn record_indexing_attempt(success: bool) {
    #[cfg(feature = "observability")]
    {
        let outcome = if success { "success" } else { "failure" };
        counter!("indexing_attempts_total", 1, "outcome" => outcome);
    }
    #[cfg(not(feature = "observability"))]
    let _ = success;
}

pub fn increment_indexing_exhausted() {
    #[cfg(feature = "observability")]
    counter!("indexing_exhausted_total", 1);
}

pub fn record_sync_cycle(chain: &str, duration: Duration, pools_updated: usize, cursor: u64) {
    #[cfg(feature = "observability")]
    {
        histogram!("sync_cycle_duration_seconds", duration.as_secs_f64(), "chain" => chain.to_string());
        counter!("sync_pools_updated_total", pools_updated as u64, "chain" => chain.to_string());
        gauge!("sync_cursor_block", cursor as f64, "chain" => chain.to_string());
    }
    #[cfg(not(feature = "observability"))]
    let _ = (chain, duration, pools_updated, cursor);
}
