//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between protocol Ping frames, in seconds.
    pub keepalive_interval_secs: u64,
    /// Close a socket silent for this many seconds.
    pub keepalive_timeout_secs: u64,
    /// Outbound buffer per live connection.
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 128 * 1024,
            keepalive_interval_secs: 30,
            keepalive_timeout_secs: 60,
            channel_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Take the listener and socket settings from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            keepalive_interval_secs: settings.server.keepalive_interval_secs,
            keepalive_timeout_secs: settings.server.keepalive_timeout_secs,
            channel_capacity: settings.dispatch.channel_capacity,
        }
    }

    /// Ping interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Pong timeout.
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_message_size, 128 * 1024);
        assert_eq!(cfg.keepalive_interval(), Duration::from_secs(30));
    }

    #[test]
    fn from_settings_copies_values() {
        let mut settings = RelaySettings::default();
        settings.server.port = 4242;
        settings.dispatch.channel_capacity = 8;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 4242);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.channel_capacity, 8);
        assert_eq!(cfg.keepalive_timeout(), Duration::from_secs(60));
    }
}
