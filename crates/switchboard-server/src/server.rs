use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use switchboard_broker::Broker;
use switchboard_settings::SwitchboardSettings;
use switchboard_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::StartError;
use crate::gateway::{Gateway, GatewayConfig};
use crate::handlers;
use crate::provision::SessionProvisioner;
use crate::registry::SessionRegistry;
use crate::responder::Responder;
use crate::router::PullRouter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&SwitchboardSettings::default())
    }
}

impl From<&SwitchboardSettings> for ServerConfig {
    fn from(settings: &SwitchboardSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            gateway: GatewayConfig::from(&settings.gateway),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub provisioner: Arc<SessionProvisioner>,
    pub gateway: Arc<Gateway>,
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        broker: Arc<dyn Broker>,
        responder: Arc<dyn Responder>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let provisioner = Arc::new(SessionProvisioner::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            responder,
            Arc::clone(&metrics),
        ));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&registry),
            broker,
            Arc::clone(&metrics),
            config.gateway.clone(),
        ));
        Self {
            registry,
            provisioner,
            gateway,
            metrics,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/sign_in", post(handlers::sign_in))
        .route("/sign_out", post(handlers::sign_out))
        .route("/health", get(handlers::health))
        .route("/ws", get(handlers::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the pull router and the HTTP listener. Returns a handle to shut both down.
pub async fn start(
    config: ServerConfig,
    broker: Arc<dyn Broker>,
    responder: Arc<dyn Responder>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, StartError> {
    let cancel = CancellationToken::new();

    let router_task = PullRouter::new(Arc::clone(&broker), Arc::clone(&metrics))
        .start(cancel.child_token())
        .await?;

    let state = AppState::new(&config, Arc::clone(&broker), responder, metrics);
    let provisioner = Arc::clone(&state.provisioner);
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            cancel.cancel();
            return Err(e.into());
        }
    };
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "switchboard server started");

    let shutdown = cancel.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        provisioner,
        broker,
        server_task,
        router_task,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    provisioner: Arc<SessionProvisioner>,
    broker: Arc<dyn Broker>,
    server_task: JoinHandle<()>,
    router_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, stop every consumer and close the broker.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        if tokio::time::timeout(SHUTDOWN_GRACE, self.server_task)
            .await
            .is_err()
        {
            tracing::warn!("HTTP server did not stop within grace period");
        }
        let _ = self.router_task.await;
        self.provisioner.shutdown().await;

        if let Err(e) = self.broker.close().await {
            tracing::warn!(error = %e, "failed to close broker");
        }
        tracing::info!("switchboard server stopped");
    }
}
