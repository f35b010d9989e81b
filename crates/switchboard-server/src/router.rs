use std::sync::Arc;

use bytes::Bytes;
use switchboard_broker::{consume, Broker, BrokerError};
use switchboard_core::{ChannelName, Envelope};
use switchboard_telemetry::metrics::{ROUTER_DROPPED, ROUTER_FORWARDED};
use switchboard_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RouteError;

/// Single consumer of the shared `pull` channel.
///
/// Each payload is forwarded unchanged to `push.<id>` where `id` is the
/// envelope's session id. Payloads without a usable id, or whose destination
/// does not exist, are dropped.
#[derive(Clone)]
pub struct PullRouter {
    broker: Arc<dyn Broker>,
    metrics: Arc<MetricsRecorder>,
}

impl PullRouter {
    pub fn new(broker: Arc<dyn Broker>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { broker, metrics }
    }

    /// Declare the pull channel and start consuming it.
    pub async fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>, BrokerError> {
        let pull = ChannelName::pull();
        self.broker.declare_channel(&pull).await?;
        tracing::info!(channel = %pull, "pull router started");

        Ok(tokio::spawn(async move {
            let result = consume(self.broker.as_ref(), &pull, cancel, |payload| {
                self.forward(payload)
            })
            .await;
            if let Err(e) = result {
                tracing::error!(channel = %pull, error = %e, "pull router stopped");
            }
        }))
    }

    /// Route one payload. Returns the destination channel.
    pub async fn route(&self, payload: Bytes) -> Result<ChannelName, RouteError> {
        let session_id = Envelope::route_target(&payload)?;
        let destination = ChannelName::push(&session_id);
        self.broker.publish(&destination, payload).await?;
        Ok(destination)
    }

    async fn forward(&self, payload: Bytes) -> Result<(), RouteError> {
        match self.route(payload).await {
            Ok(destination) => {
                self.metrics.counter_inc(ROUTER_FORWARDED, 1);
                tracing::trace!(channel = %destination, "envelope forwarded");
                Ok(())
            }
            Err(e) => {
                self.metrics.counter_inc(ROUTER_DROPPED, 1);
                Err(e)
            }
        }
    }
}
