//! WebSocket connection gateway.
//!
//! A connection is not tied to a session at upgrade time. Each inbound frame
//! names its session, and the first valid frame binds the connection to it.
//! Replies produced by the session consumer come back through the same
//! bounded outbound queue as publish acks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use switchboard_broker::Broker;
use switchboard_core::{ChannelName, ConnectionId, Envelope, MessageType, OutboundFrame, SessionId};
use switchboard_settings::GatewaySettings;
use switchboard_telemetry::metrics::{CONNECTIONS_ACTIVE, GATEWAY_PUBLISHED, GATEWAY_REJECTED};
use switchboard_telemetry::MetricsRecorder;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::registry::{BindOutcome, ConnectionHandle, SessionRegistry};

const UNKNOWN_SESSION: &str = "unknown session";
const GENERIC_ERROR: &str = "error";
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub heartbeat_interval: Duration,
    pub send_queue: usize,
    pub unbind_on_close: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for GatewayConfig {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs)
                .max(MIN_HEARTBEAT),
            send_queue: settings.send_queue,
            unbind_on_close: settings.unbind_on_close,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingBind,
    Bound,
    Closed,
}

/// Per-connection bookkeeping owned by the reader loop.
#[derive(Debug)]
pub struct ConnectionContext {
    pub handle: ConnectionHandle,
    bound: HashSet<SessionId>,
    state: ConnectionState,
}

impl ConnectionContext {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            bound: HashSet::new(),
            state: ConnectionState::AwaitingBind,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.handle.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

pub struct Gateway {
    registry: Arc<SessionRegistry>,
    broker: Arc<dyn Broker>,
    metrics: Arc<MetricsRecorder>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        registry: Arc<SessionRegistry>,
        broker: Arc<dyn Broker>,
        metrics: Arc<MetricsRecorder>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            broker,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open a connection: allocate its outbound queue and count it.
    pub fn open(&self) -> (ConnectionContext, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.config.send_queue.max(1));
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);
        self.metrics.gauge_inc(CONNECTIONS_ACTIVE, 1);
        (ConnectionContext::new(handle), rx)
    }

    /// Handle one inbound text frame. Returns the frame to send back, if any.
    pub async fn handle_text(
        &self,
        ctx: &mut ConnectionContext,
        text: &str,
    ) -> Option<OutboundFrame> {
        if text.is_empty() {
            return None;
        }

        match self.process(ctx, text).await {
            Ok(reply) => reply,
            Err(GatewayError::UnknownSession(id)) => {
                tracing::debug!(connection_id = %ctx.id(), session_id = %id, "frame for unknown session");
                self.metrics.counter_inc(GATEWAY_REJECTED, 1);
                Some(OutboundFrame::failure(UNKNOWN_SESSION))
            }
            Err(e) => {
                tracing::warn!(connection_id = %ctx.id(), error = %e, "rejected frame");
                self.metrics.counter_inc(GATEWAY_REJECTED, 1);
                Some(OutboundFrame::failure(GENERIC_ERROR))
            }
        }
    }

    async fn process(
        &self,
        ctx: &mut ConnectionContext,
        text: &str,
    ) -> Result<Option<OutboundFrame>, GatewayError> {
        let mut frame = switchboard_core::InboundFrame::parse(text)?;
        let session_id = frame.session_id.clone();

        let outcome = self
            .registry
            .bind(&session_id, &ctx.handle)
            .ok_or_else(|| GatewayError::UnknownSession(session_id.clone()))?;
        match outcome {
            BindOutcome::Bound => {
                tracing::info!(connection_id = %ctx.id(), session_id = %session_id, "connection bound");
            }
            BindOutcome::Replaced { previous } => {
                tracing::info!(
                    connection_id = %ctx.id(),
                    session_id = %session_id,
                    previous = %previous,
                    "connection rebound"
                );
            }
            BindOutcome::AlreadyBound => {}
        }
        let _ = ctx.bound.insert(session_id.clone());
        ctx.state = ConnectionState::Bound;
        let _ = self.registry.touch(&session_id);

        match frame.message_type()? {
            Some(MessageType::Publish) => {
                let body = frame.take_body()?;
                let payload = Envelope::new(session_id.clone(), body).to_bytes()?;
                self.broker
                    .publish(&ChannelName::pull(), Bytes::from(payload))
                    .await?;
                self.metrics.counter_inc(GATEWAY_PUBLISHED, 1);
                tracing::trace!(session_id = %session_id, "published to pull");
                Ok(Some(OutboundFrame::publish_ack()))
            }
            other => {
                tracing::debug!(session_id = %session_id, msg_type = ?other, "frame not dispatched");
                Ok(None)
            }
        }
    }

    /// Close a connection: clear its bindings and uncount it.
    pub fn close(&self, ctx: &mut ConnectionContext) {
        if ctx.state == ConnectionState::Closed {
            return;
        }
        if self.config.unbind_on_close {
            for session_id in ctx.bound.drain() {
                if self.registry.unbind(&session_id, &ctx.handle.id) {
                    tracing::debug!(connection_id = %ctx.handle.id, session_id = %session_id, "connection unbound");
                }
            }
        }
        ctx.state = ConnectionState::Closed;
        self.metrics.gauge_inc(CONNECTIONS_ACTIVE, -1);
    }
}

/// Drive one WebSocket connection until it closes.
///
/// The writer drains the outbound queue and sends heartbeat pings. The reader
/// handles inbound frames in order. Either side finishing closes the connection.
pub async fn run_connection(socket: WebSocket, gateway: Arc<Gateway>) {
    let (mut ctx, mut rx) = gateway.open();
    let connection_id = ctx.id().clone();
    tracing::info!(connection_id = %connection_id, "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let heartbeat = gateway.config().heartbeat_interval.max(MIN_HEARTBEAT);
    let writer_cid = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader = async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "transport error");
                    break;
                }
            };
            match msg {
                WsMessage::Text(text) => {
                    if let Some(reply) = gateway.handle_text(&mut ctx, text.as_str()).await {
                        match reply.to_text() {
                            Ok(text) => {
                                let _ = ctx.handle.try_send(text);
                            }
                            Err(e) => {
                                tracing::warn!(connection_id = %connection_id, error = %e, "failed to encode reply");
                            }
                        }
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }

    gateway.close(&mut ctx);
    writer.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket client disconnected");
}
