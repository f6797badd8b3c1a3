//! Global `tracing` subscriber setup.
//!
//! Loom logs through `tracing` spans and structured fields (`worldline_id`,
//! `job_id`, `turn_id`, `call_id`). [`init_subscriber`] installs a stderr
//! formatter once per process, honoring `RUST_LOG` when it is set.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum level (or full filter directive) when `RUST_LOG` is unset.
/// * `json` - Emit newline-delimited JSON instead of the compact text format.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json();
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact();
        // set_global_default is a no-op if already set
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_noop() {
        init_subscriber("debug", false);
        init_subscriber("info", true);
        tracing::info!(worldline_id = "wl_1", "subscriber ready");
    }
}
