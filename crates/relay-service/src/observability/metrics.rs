//! Metrics definitions for the Channel Relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: ~14 values (parameterized paths, everything else is `/other`)
//! - `outcome`: bounded by code (success, not_found, start_failed, ...)
//! - channel ids and user identities are never used as labels

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("relay_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Switches include the stop grace window and the startup probe
        .set_buckets_for_metric(
            Matcher::Prefix("relay_channel_switch".to_string()),
            &[0.100, 0.250, 0.500, 1.000, 1.500, 2.000, 3.000, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set channel switch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("relay_upstream_uptime_seconds".to_string()),
            &[1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 14400.0],
        )
        .map_err(|e| format!("Failed to set upstream uptime buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `relay_http_requests_total`, `relay_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("relay_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("relay_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 | 101 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" | "/ws" | "/toggle_favorite"
        | "/api/channels" | "/api/favorites" | "/api/stop" | "/api/status"
        | "/api/online_users" | "/api/heartbeat" | "/api/logout" | "/stream/live.ts" => {
            path.to_string()
        }
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace channel ids and segment names with placeholders.
fn normalize_dynamic_endpoint(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/api/play/") {
        if !rest.is_empty() && !rest.contains('/') {
            return "/api/play/{channel_id}".to_string();
        }
    }

    if let Some(rest) = path.strip_prefix("/stream/") {
        if rest.ends_with(".m3u8") {
            return "/stream/{playlist}".to_string();
        }
        if rest.ends_with(".ts") {
            return "/stream/{segment}".to_string();
        }
    }

    "/other".to_string()
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a channel switch (select) and its outcome.
///
/// Metric: `relay_channel_switches_total`, `relay_channel_switch_duration_seconds`
/// Labels: `outcome` (success, not_found, tool_not_found, start_failed, error)
pub fn record_channel_switch(outcome: &str, duration: Duration) {
    histogram!("relay_channel_switch_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
    counter!("relay_channel_switches_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an explicit stop request.
///
/// Metric: `relay_session_stops_total`
pub fn record_session_stop() {
    counter!("relay_session_stops_total").increment(1);
}

/// Record an automatic restart attempt after an upstream crash.
///
/// Metric: `relay_upstream_restarts_total`
/// Labels: `outcome` (success, failed)
pub fn record_upstream_restart(outcome: &str) {
    counter!("relay_upstream_restarts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record that the session gave up after its retry budget was spent.
///
/// Metric: `relay_stream_errors_total`
pub fn record_stream_error() {
    counter!("relay_stream_errors_total").increment(1);
}

// ============================================================================
// Upstream Process Metrics
// ============================================================================

/// Number of live upstream processes (0 or 1).
///
/// Metric: `relay_upstream_live`
pub fn set_upstream_live(count: usize) {
    gauge!("relay_upstream_live").set(count as f64);
}

/// Record an upstream process exit.
///
/// Metric: `relay_upstream_exits_total`
/// Labels: `requested` (true, false), `success` (true, false)
pub fn record_upstream_exit(requested: bool, success: bool) {
    counter!("relay_upstream_exits_total",
        "requested" => requested.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

/// Record how long an upstream ran before it was stopped or crashed.
///
/// Metric: `relay_upstream_uptime_seconds`
pub fn record_upstream_uptime(uptime: Duration) {
    histogram!("relay_upstream_uptime_seconds").record(uptime.as_secs_f64());
}

/// Record a stop that needed SIGKILL.
///
/// Metric: `relay_upstream_stop_escalations_total`
pub fn record_stop_escalation() {
    counter!("relay_upstream_stop_escalations_total").increment(1);
}

// ============================================================================
// Viewer Metrics
// ============================================================================

/// Number of identities currently online.
///
/// Metric: `relay_online_users`
pub fn set_online_users(count: usize) {
    gauge!("relay_online_users").set(count as f64);
}

/// Track open viewer WebSocket connections.
///
/// Metric: `relay_viewer_connections`
pub fn viewer_connected() {
    gauge!("relay_viewer_connections").increment(1.0);
}

/// See [`viewer_connected`].
pub fn viewer_disconnected() {
    gauge!("relay_viewer_connections").decrement(1.0);
}

/// Track open continuous-stream subscribers.
///
/// Metric: `relay_stream_subscribers`
pub fn stream_subscriber_added() {
    gauge!("relay_stream_subscribers").increment(1.0);
}

/// See [`stream_subscriber_added`].
pub fn stream_subscriber_removed() {
    gauge!("relay_stream_subscribers").decrement(1.0);
}

// ============================================================================
// Relay Metrics
// ============================================================================

/// Record a chunk published to the fan-out channel.
///
/// Metric: `relay_chunks_published_total`, `relay_bytes_published_total`
pub fn record_chunk_published(bytes: usize) {
    counter!("relay_chunks_published_total").increment(1);
    counter!("relay_bytes_published_total").increment(bytes as u64);
}

/// Record chunks skipped by a lagging receiver.
///
/// Metric: `relay_chunks_lagged_total`
/// Labels: `receiver` (stream, events)
pub fn record_lagged(receiver: &str, skipped: u64) {
    counter!("relay_chunks_lagged_total", "receiver" => receiver.to_string()).increment(skipped);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn test_normalize_endpoint_static_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/api/channels"), "/api/channels");
        assert_eq!(normalize_endpoint("/toggle_favorite"), "/toggle_favorite");
        assert_eq!(normalize_endpoint("/stream/live.ts"), "/stream/live.ts");
    }

    #[test]
    fn test_normalize_endpoint_dynamic_paths() {
        assert_eq!(normalize_endpoint("/api/play/42"), "/api/play/{channel_id}");
        assert_eq!(normalize_endpoint("/api/play/"), "/other");
        assert_eq!(normalize_endpoint("/api/play/1/extra"), "/other");
        assert_eq!(normalize_endpoint("/stream/playlist.m3u8"), "/stream/{playlist}");
        assert_eq!(normalize_endpoint("/stream/playlist17.ts"), "/stream/{segment}");
        assert_eq!(normalize_endpoint("/wp-admin"), "/other");
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(101), "success");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(504), "timeout");
    }

    #[test]
    fn test_metrics_are_recorded_under_relay_prefix() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_http_request("GET", "/api/status", 200, Duration::from_millis(3));
            record_channel_switch("success", Duration::from_millis(900));
            record_session_stop();
            record_upstream_restart("success");
            record_stream_error();
            set_upstream_live(1);
            record_upstream_exit(false, false);
            record_upstream_uptime(Duration::from_secs(12));
            record_stop_escalation();
            set_online_users(2);
            viewer_connected();
            stream_subscriber_added();
            record_chunk_published(188 * 7);
            record_lagged("stream", 3);
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "relay_http_requests_total",
            "relay_http_request_duration_seconds",
            "relay_channel_switches_total",
            "relay_upstream_live",
            "relay_upstream_exits_total",
            "relay_online_users",
            "relay_viewer_connections",
            "relay_chunks_lagged_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
        assert!(names.iter().all(|n| n.starts_with("relay_")));
    }
}
