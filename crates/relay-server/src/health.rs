//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections on this instance.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_fields() {
        let resp = health_check(Instant::now(), 3);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.connections, 3);
        assert!(resp.uptime_secs < 5);
    }

    #[test]
    fn health_serializes_camel_case() {
        let json = serde_json::to_value(health_check(Instant::now(), 0)).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptimeSecs"].is_u64());
        assert_eq!(json["connections"], 0);
    }
}
