/// HTTP server for the dashboard backend
/// Hosts the telemetry WebSocket, a health check and the static web UI

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use routes::create_router;

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{ContainerStatsSource, DemoContainers, DemoHost, DockerManager, HostStats, SystemStatsSource};
use crate::hub::{spawn_producers, Hub, SessionSettings};
use crate::utils::{AppConfig, WS_PATH};

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub session_settings: SessionSettings,
}

/// The metric sources feeding the producers
pub struct Sources {
    pub system: Arc<dyn SystemStatsSource>,
    /// `None` when no container runtime is reachable
    pub containers: Option<Arc<dyn ContainerStatsSource>>,
}

impl Sources {
    /// Generated data for demo mode
    pub fn demo() -> Self {
        Self {
            system: Arc::new(DemoHost::new()),
            containers: Some(Arc::new(DemoContainers::new())),
        }
    }

    /// The local host and Docker daemon. Runs without container stats when
    /// Docker cannot be reached.
    pub fn local() -> Self {
        let containers: Option<Arc<dyn ContainerStatsSource>> = match DockerManager::new() {
            Ok(docker) => Some(Arc::new(docker)),
            Err(e) => {
                warn!("Container stats disabled: {:#}", e);
                None
            }
        };

        Self {
            system: Arc::new(HostStats::new()),
            containers,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        if config.server.demo_mode {
            Self::demo()
        } else {
            Self::local()
        }
    }
}

/// Bind the configured address and serve until Ctrl-C
pub async fn run(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Aperture server v{} listening on http://{}", crate::cli::get_version(), addr);
    info!("Telemetry WebSocket at ws://{}{}", addr, WS_PATH);
    info!("Static files from {}", config.server.static_path.display());
    if config.server.demo_mode {
        info!("Demo mode: serving generated telemetry, Docker not required");
    }

    let sources = Sources::from_config(&config);
    serve(listener, &config, sources, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    config: &AppConfig,
    sources: Sources,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = Hub::spawn();
    let producers = spawn_producers(
        &hub.broadcaster(),
        sources.system,
        sources.containers,
        &config.producer_settings(),
    );

    let state = AppState {
        hub,
        session_settings: config.session_settings(),
    };
    let app = create_router(state, &config.server.static_path, config.server.cors);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed");

    for producer in producers {
        producer.abort();
    }

    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
}
