use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use switchboard_broker::{Broker, InMemoryBroker};
use switchboard_server::{EchoResponder, ServerConfig};
use switchboard_settings::{BrokerKind, BrokerSettings, SwitchboardSettings};
use switchboard_telemetry::{init_telemetry, TelemetryConfig};

/// WebSocket gateway that routes session messages through a broker.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
struct Cli {
    /// Settings file. Defaults to ~/.switchboard/settings.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// `memory` or `amqp`.
    #[arg(long)]
    broker: Option<BrokerKind>,
}

impl Cli {
    fn apply(&self, settings: &mut SwitchboardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(kind) = self.broker {
            settings.broker.kind = kind;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => switchboard_settings::load_settings_from_path(path),
        None => switchboard_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply(&mut settings);

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.clone(),
        module_levels: Vec::new(),
        json: settings.logging.json,
    });

    tracing::info!(broker = ?settings.broker.kind, "starting switchboard");

    let broker = connect_broker(&settings.broker).await?;
    let handle = switchboard_server::start(
        ServerConfig::from(&settings),
        broker,
        Arc::new(EchoResponder),
        telemetry.metrics(),
    )
    .await
    .context("failed to start server")?;

    tracing::info!(port = handle.port, "switchboard ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn connect_broker(settings: &BrokerSettings) -> anyhow::Result<Arc<dyn Broker>> {
    match settings.kind {
        BrokerKind::Memory => Ok(Arc::new(InMemoryBroker::new())),
        #[cfg(feature = "amqp")]
        BrokerKind::Amqp => {
            let broker = switchboard_broker::AmqpBroker::connect(&settings.amqp_uri)
                .await
                .context("failed to connect to AMQP broker")?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "amqp"))]
        BrokerKind::Amqp => {
            anyhow::bail!("AMQP broker requested but switchboard was built without the `amqp` feature")
        }
    }
}
