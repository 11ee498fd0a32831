//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Events durably appended (counter).
pub const EVENTS_PUBLISHED_TOTAL: &str = "relay_events_published_total";
/// Publish attempts that hit a sequence conflict and were retried (counter).
pub const PUBLISH_CONFLICTS_TOTAL: &str = "relay_publish_conflicts_total";
/// Live pushes enqueued on a device's channel (counter).
pub const DISPATCH_DELIVERIES_TOTAL: &str = "relay_dispatch_deliveries_total";
/// Live pushes that failed (counter, labels: reason).
pub const DISPATCH_FAILURES_TOTAL: &str = "relay_dispatch_failures_total";
/// Events dropped because the dispatch queue was full (counter).
pub const DISPATCH_DROPPED_TOTAL: &str = "relay_dispatch_dropped_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "relay_ws_connections_active";
/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "relay_ws_connections_total";
/// Presence transitions applied by the sweeper (counter, labels: status).
pub const SWEEPER_TRANSITIONS_TOTAL: &str = "relay_sweeper_transitions_total";
/// Rows removed by retention (counter).
pub const RETENTION_PRUNED_TOTAL: &str = "relay_retention_pruned_total";
/// Catch-up pages served (counter).
pub const CATCH_UP_REQUESTS_TOTAL: &str = "relay_catch_up_requests_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            EVENTS_PUBLISHED_TOTAL,
            PUBLISH_CONFLICTS_TOTAL,
            DISPATCH_DELIVERIES_TOTAL,
            DISPATCH_FAILURES_TOTAL,
            DISPATCH_DROPPED_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTIONS_TOTAL,
            SWEEPER_TRANSITIONS_TOTAL,
            RETENTION_PRUNED_TOTAL,
            CATCH_UP_REQUESTS_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("relay_"));
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
