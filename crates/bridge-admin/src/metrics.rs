//! Prometheus metric definitions for the bridge, following the corpus's
//! `<service>_<noun>_total` / `_seconds` naming conventions. Installed once
//! at process start; every gauge here is re-sampled from `SystemStats` on
//! each `/metrics` scrape rather than pushed incrementally, since the
//! orchestrator's stats refresh is already the single source of truth.

use bridge_common::SystemStats;
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and returns the handle used to
/// render `/metrics` text exposition. Call once at process start, before
/// any gauge is set.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install Prometheus metrics recorder: {e}"))
}

/// Re-samples every gauge from a fresh `SystemStats` snapshot. Called on
/// each `/metrics` scrape so the exposition always reflects the latest
/// values the stats task has written, without a separate push path.
pub fn record_snapshot(stats: &SystemStats) {
    gauge!("bridge_servers_total").set(stats.servers_total as f64);
    gauge!("bridge_servers_active").set(stats.servers_active as f64);
    gauge!("bridge_channels_total").set(stats.channels_total as f64);
    gauge!("bridge_channels_accessible").set(stats.channels_accessible as f64);
    gauge!("bridge_messages_processed_today").set(stats.messages_processed_today as f64);
    gauge!("bridge_messages_processed_total").set(stats.messages_processed_total as f64);
    gauge!("bridge_memory_usage_mb").set(stats.memory_usage_mb);
    gauge!("bridge_uptime_seconds").set(stats.uptime_seconds as f64);
    gauge!("bridge_source_requests_last_hour").set(stats.source_requests_last_hour as f64);
    gauge!("bridge_sink_requests_last_hour").set(stats.sink_requests_last_hour as f64);
    gauge!("bridge_errors_last_hour").set(stats.errors_last_hour as f64);
    gauge!("bridge_health_score").set(stats.health_score());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_snapshot_does_not_panic_without_a_recorder() {
        record_snapshot(&SystemStats::default());
    }
}
