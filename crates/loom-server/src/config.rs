//! Server configuration.

use std::time::Duration;

use loom_settings::LoomSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the Loom server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// `SQLite` path, `~` expanded (`:memory:` for an ephemeral store).
    pub db_path: String,
    /// Frames buffered between a turn and its SSE client.
    pub stream_buffer: usize,
    /// Background job workers.
    pub worker_count: usize,
    /// Fallback job poll interval.
    pub poll_interval: Duration,
    /// How long shutdown waits for running jobs.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &LoomSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            db_path: settings.server.db_path.clone(),
            stream_buffer: settings.server.stream_buffer.max(1),
            worker_count: settings.jobs.worker_count.max(1),
            poll_interval: Duration::from_millis(settings.jobs.poll_interval_ms),
            ..Self::default()
        }
    }

    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            db_path: ":memory:".into(),
            stream_buffer: 256,
            worker_count: 2,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
