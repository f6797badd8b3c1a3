//! `LoomServer`: store, turn runner, job scheduler, and the Axum router.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use loom_events::sqlite::ConnectionConfig;
use loom_events::{EventStore, JobStore};
use loom_runtime::{
    ArtifactStore, Executor, JobScheduler, ProviderFactory, RuntimeConfig, TurnRunner,
};
use loom_settings::{LoomSettings, expand_home};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::errors::StartupError;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;

/// External collaborators the turn loop calls into.
pub struct Collaborators {
    /// Creates a provider per turn from its provider and model names.
    pub providers: Arc<dyn ProviderFactory>,
    /// Runs SQL/code tool calls and restores engine state on branches.
    pub executor: Arc<dyn Executor>,
    /// Receives inline artifact bytes, when configured.
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event log.
    pub store: Arc<EventStore>,
    /// Turn loop shared by interactive streams and jobs.
    pub runner: TurnRunner,
    /// Background jobs.
    pub scheduler: Arc<JobScheduler>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics` when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Loom HTTP server.
pub struct LoomServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl LoomServer {
    /// Server over an open store.
    pub fn new(
        config: ServerConfig,
        runtime: RuntimeConfig,
        store: Arc<EventStore>,
        collaborators: Collaborators,
    ) -> Self {
        let mut runner = TurnRunner::new(
            store.clone(),
            collaborators.providers,
            collaborators.executor,
            runtime,
        );
        if let Some(artifacts) = collaborators.artifacts {
            runner = runner.with_artifact_store(artifacts);
        }
        let scheduler = JobScheduler::new(
            JobStore::new(store.pool().clone()),
            runner.clone(),
            config.worker_count,
            config.poll_interval,
        );
        Self {
            state: AppState {
                store,
                runner,
                scheduler: Arc::new(scheduler),
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics: None,
            },
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Open the configured database and build the server.
    pub fn open(settings: &LoomSettings, collaborators: Collaborators) -> Result<Self, StartupError> {
        let config = ServerConfig::from_settings(settings);
        let store = open_store(&config.db_path)?;
        Ok(Self::new(
            config,
            RuntimeConfig::from_settings(settings),
            Arc::new(store),
            collaborators,
        ))
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn serve(self) -> Result<(), StartupError> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        self.serve_on(listener).await
    }

    /// Serve on an existing listener until shutdown, then drain job workers.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), StartupError> {
        info!(addr = %listener.local_addr()?, "loom server listening");
        self.state.scheduler.start()?;
        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;
        self.shutdown
            .drain(&self.state.scheduler, self.state.config.shutdown_timeout)
            .await;
        info!("loom server stopped");
        Ok(())
    }
}

fn open_store(db_path: &str) -> Result<EventStore, StartupError> {
    if db_path == ":memory:" {
        return Ok(EventStore::in_memory()?);
    }
    let path = expand_home(db_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| StartupError::InvalidPath(path.display().to_string()))?;
    info!(db_path = path_str, "opening event store");
    Ok(EventStore::open(path_str, &ConnectionConfig::default())?)
}
