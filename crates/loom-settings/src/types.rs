//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may specify any subset of fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoomSettings {
    /// Settings schema version.
    pub version: String,
    /// HTTP server and storage.
    pub server: ServerSettings,
    /// Turn loop limits and dedup.
    pub runtime: RuntimeSettings,
    /// Background job workers.
    pub jobs: JobSettings,
    /// Subagent fan-out.
    pub subagents: SubagentSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for LoomSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            runtime: RuntimeSettings::default(),
            jobs: JobSettings::default(),
            subagents: SubagentSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl LoomSettings {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.runtime.max_iterations == 0, "runtime.maxIterations must be at least 1"),
            (self.runtime.append_retry_limit == 0, "runtime.appendRetryLimit must be at least 1"),
            (self.jobs.worker_count == 0, "jobs.workerCount must be at least 1"),
            (self.jobs.poll_interval_ms == 0, "jobs.pollIntervalMs must be at least 1"),
            (self.subagents.max_parallel == 0, "subagents.maxParallel must be at least 1"),
            (self.subagents.max_tasks == 0, "subagents.maxTasks must be at least 1"),
            (self.subagents.default_timeout_secs == 0, "subagents.defaultTimeoutSecs must be at least 1"),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, message)) => Err(SettingsError::InvalidValue((*message).to_string())),
            None => Ok(()),
        }
    }
}

/// HTTP server and storage settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// `SQLite` database path (`:memory:` for an ephemeral store).
    pub db_path: String,
    /// Bounded buffer between a turn and its SSE client.
    pub stream_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: "~/.loom/loom.db".to_string(),
            stream_buffer: 256,
        }
    }
}

/// Turn loop settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Default iteration cap per turn.
    pub max_iterations: u32,
    /// Previous turns (besides the current one) searched for duplicate calls.
    pub dedup_window_turns: usize,
    /// Attempts for an append that loses the head race.
    pub append_retry_limit: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            dedup_window_turns: 3,
            append_retry_limit: 3,
        }
    }
}

/// Background job settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSettings {
    /// Worker tasks pulling queued jobs.
    pub worker_count: usize,
    /// Fallback poll interval when no wakeup arrives.
    pub poll_interval_ms: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval_ms: 500,
        }
    }
}

/// Subagent fan-out settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentSettings {
    /// Children running at once.
    pub max_parallel: usize,
    /// Per-child timeout when the call does not set one.
    pub default_timeout_secs: u64,
    /// Maximum tasks in one fan-out.
    pub max_tasks: usize,
    /// Characters kept in each child preview.
    pub preview_chars: usize,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            default_timeout_secs: 120,
            max_tasks: 8,
            preview_chars: 280,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
