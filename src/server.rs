//! Daemon runner (§4.7–4.8, §5): binds the HTTP listener, wires the
//! provisioning router, and owns the reload/shutdown lifecycle.
//!
//! `ServerState` mirrors the teacher's `AppState` shape — one `Arc`-cloneable
//! struct threaded through `axum::extract::State` — but its read path is a
//! `RwLock<Arc<ConfigSnapshot>>` rather than a plain `Arc<Service>`, since a
//! snapshot (controller config + node/profile document) must be swapped
//! wholesale on reload while in-flight requests keep reading the snapshot
//! they started with.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::discovery::{DiscoveryCoordinator, StatusTracker};
use crate::domain::store::ConfigStore;
use crate::overlay::BuildCoordinator;

/// A consistent, swappable snapshot of everything a provisioning request
/// reads without synchronizing against the discovery/mutation path.
pub struct ConfigSnapshot {
    pub controller: ControllerConfig,
    pub store: ConfigStore,
}

pub struct ServerState {
    pub snapshot: RwLock<Arc<ConfigSnapshot>>,
    pub discovery: Arc<DiscoveryCoordinator>,
    pub overlay_cache: BuildCoordinator,
    pub status: StatusTracker,
    config_path: PathBuf,
    nodes_path: PathBuf,
}

impl ServerState {
    async fn load(config_path: &std::path::Path, nodes_path: &std::path::Path) -> Result<ConfigSnapshot> {
        let controller = crate::config::load(config_path)?;
        let store = ConfigStore::open(nodes_path)
            .await
            .with_context(|| format!("loading {}", nodes_path.display()))?;
        Ok(ConfigSnapshot { controller, store })
    }

    /// Re-read both the controller config and the node/profile document
    /// from disk and swap them in as the active snapshot. Used both for the
    /// `SIGHUP` reload trigger and, internally, right after a successful
    /// discovery bind so subsequent reads see the newly-bound node.
    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::load(&self.config_path, &self.nodes_path).await?;
        let mut guard = self.snapshot.write().await;
        *guard = Arc::new(fresh);
        Ok(())
    }

    pub async fn current(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.read().await.clone()
    }
}

pub async fn run(config_path: PathBuf, nodes_path: PathBuf) -> Result<()> {
    let bootstrap = ServerState::load(&config_path, &nodes_path).await?;
    bootstrap
        .controller
        .validate()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("controller configuration is incomplete")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&bootstrap.controller.log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();

    info!(version = env!("CARGO_PKG_VERSION"), "cinder daemon starting");

    let http_addr = bootstrap.controller.http_addr.clone();
    let discovery_store = ConfigStore::open(&nodes_path)
        .await
        .with_context(|| format!("loading {}", nodes_path.display()))?;

    let state = Arc::new(ServerState {
        snapshot: RwLock::new(Arc::new(bootstrap)),
        discovery: Arc::new(DiscoveryCoordinator::new(discovery_store)),
        overlay_cache: BuildCoordinator::new(),
        status: StatusTracker::new(),
        config_path: config_path.clone(),
        nodes_path: nodes_path.clone(),
    });

    let app = crate::api::rest::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    spawn_reload_listener(state.clone());

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding to {http_addr}"))?;
    info!(addr = %http_addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    info!("cinder daemon stopped");
    Ok(())
}

/// `SIGHUP` is the sole reload trigger — no admin endpoint (§5, §9).
fn spawn_reload_listener(state: Arc<ServerState>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut sig = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "failed to install SIGHUP handler, reload disabled");
                return;
            }
        };
        loop {
            sig.recv().await;
            info!("SIGHUP received, reloading configuration");
            if let Err(err) = state.reload().await {
                warn!(error = %err, "configuration reload failed, keeping previous snapshot");
            }
        }
    });

    #[cfg(not(unix))]
    let _ = state;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
