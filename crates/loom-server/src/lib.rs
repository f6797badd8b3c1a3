//! # loom-server
//!
//! Axum REST and SSE surface over the Loom runtime.
//!
//! - **Routes**: threads, worldlines, branching, timeline paging, interactive
//!   chat streams, and background job management
//! - **Errors**: JSON `{error, code}` bodies with status mapped from store
//!   and runtime errors
//! - **Metrics**: Prometheus text at `/metrics`
//! - **Startup**: settings-driven store, runner, and scheduler wiring with
//!   graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::{ApiError, ApiResult, StartupError};
pub use server::{AppState, Collaborators, LoomServer};

/// Load settings, install the log subscriber and metrics recorder, and serve
/// until Ctrl-C.
///
/// Provider, executor, and artifact storage are supplied by the embedding
/// binary.
pub async fn run(collaborators: Collaborators) -> Result<(), StartupError> {
    let settings = loom_settings::load_settings()?;
    loom_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let handle = crate::metrics::install_recorder()?;
    let server = LoomServer::open(&settings, collaborators)?.with_metrics(handle);
    let shutdown = server.shutdown().clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.shutdown();
        }
    }));
    server.serve().await
}
