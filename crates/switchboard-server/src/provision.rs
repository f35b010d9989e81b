use std::sync::Arc;

use bytes::Bytes;
use switchboard_broker::{consume, Broker};
use switchboard_core::{ChannelName, Envelope, OutboundFrame, SessionId};
use switchboard_telemetry::metrics::{SESSIONS_ACTIVE, SESSION_DELIVERED, SESSION_UNDELIVERABLE};
use switchboard_telemetry::MetricsRecorder;
use tokio_util::sync::CancellationToken;

use crate::error::{DeliveryError, ProvisionError};
use crate::registry::{ConsumerHandle, Reservation, SessionRegistry};
use crate::responder::Responder;

/// Outcome of a sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignIn {
    /// A new session and its delivery channel were created.
    Created(SessionId),
    /// The alias already had an active session; nothing was provisioned.
    Existing(SessionId),
}

impl SignIn {
    pub fn id(&self) -> &SessionId {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Creates and tears down sessions together with their broker resources.
pub struct SessionProvisioner {
    registry: Arc<SessionRegistry>,
    broker: Arc<dyn Broker>,
    deliverer: Arc<Deliverer>,
    metrics: Arc<MetricsRecorder>,
}

impl SessionProvisioner {
    pub fn new(
        registry: Arc<SessionRegistry>,
        broker: Arc<dyn Broker>,
        responder: Arc<dyn Responder>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let deliverer = Arc::new(Deliverer {
            registry: Arc::clone(&registry),
            responder,
            metrics: Arc::clone(&metrics),
        });
        Self {
            registry,
            broker,
            deliverer,
            metrics,
        }
    }

    /// Return the active session for `alias`, or create one with its own
    /// delivery channel and consumer.
    pub async fn sign_in(&self, alias: &str) -> Result<SignIn, ProvisionError> {
        if alias.trim().is_empty() {
            return Err(ProvisionError::BlankAlias);
        }

        let candidate = SessionId::derive(alias);
        let id = match self.registry.reserve(alias, candidate) {
            Reservation::Existing(id) => {
                tracing::debug!(session_id = %id, alias, "alias already active");
                return Ok(SignIn::Existing(id));
            }
            Reservation::Reserved(id) => id,
        };

        let channel = ChannelName::push(&id);
        if let Err(e) = self.broker.declare_channel(&channel).await {
            let _ = self.registry.remove(&id);
            tracing::warn!(session_id = %id, channel = %channel, error = %e, "session provisioning failed");
            return Err(e.into());
        }

        let consumer = self.spawn_consumer(id.clone(), channel.clone());
        if let Err(consumer) = self.registry.attach_consumer(&id, consumer) {
            // Signed out while the channel was being declared.
            let _ = consumer.stop();
            self.release_channel(&id, &channel).await;
            tracing::debug!(session_id = %id, "session removed during provisioning");
            return Err(ProvisionError::SignedOut(id));
        }

        self.update_gauge();
        tracing::info!(session_id = %id, alias, channel = %channel, "session created");
        Ok(SignIn::Created(id))
    }

    /// Remove the session, stop its consumer and delete its channel.
    /// Returns false for unknown ids.
    pub async fn sign_out(&self, id: &SessionId) -> bool {
        let Some(session) = self.registry.remove(id) else {
            tracing::debug!(session_id = %id, "sign-out for unknown session");
            return false;
        };

        if let Some(consumer) = session.into_consumer() {
            let _ = consumer.stop();
        }
        self.release_channel(id, &ChannelName::push(id)).await;

        self.update_gauge();
        tracing::info!(session_id = %id, "session removed");
        true
    }

    /// Stop every session consumer. Channels are left to the broker.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        let count = sessions.len();
        let tasks: Vec<_> = sessions
            .into_iter()
            .filter_map(|s| s.into_consumer())
            .map(ConsumerHandle::stop)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        self.update_gauge();
        tracing::info!(sessions = count, "session consumers stopped");
    }

    async fn release_channel(&self, id: &SessionId, channel: &ChannelName) {
        if let Err(e) = self.broker.delete_channel(channel).await {
            tracing::warn!(session_id = %id, channel = %channel, error = %e, "failed to delete session channel");
        }
    }

    fn spawn_consumer(&self, session_id: SessionId, channel: ChannelName) -> ConsumerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let broker = Arc::clone(&self.broker);
        let deliverer = Arc::clone(&self.deliverer);

        let task = tokio::spawn(async move {
            let result = consume(broker.as_ref(), &channel, token, |payload| {
                deliverer.deliver(payload)
            })
            .await;
            match result {
                Ok(()) => tracing::debug!(session_id = %session_id, "session consumer stopped"),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, channel = %channel, error = %e, "session consumer failed");
                }
            }
        });

        ConsumerHandle::new(cancel, task)
    }

    fn update_gauge(&self) {
        self.metrics
            .gauge_set(SESSIONS_ACTIVE, self.registry.len() as i64);
    }
}

/// Handler behind every per-session consumer.
struct Deliverer {
    registry: Arc<SessionRegistry>,
    responder: Arc<dyn Responder>,
    metrics: Arc<MetricsRecorder>,
}

impl Deliverer {
    async fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        let envelope = Envelope::from_slice(&payload)?;

        // No bound connection: the reply has nowhere to go.
        let Some(connection) = self.registry.connection(&envelope.session_id) else {
            self.metrics.counter_inc(SESSION_UNDELIVERABLE, 1);
            tracing::debug!(session_id = %envelope.session_id, "no connection bound, message dropped");
            return Ok(());
        };

        let Some(reply) = self.responder.respond(&envelope).await else {
            return Ok(());
        };

        let text = OutboundFrame::deliver(reply).to_text()?;
        if connection.try_send(text) {
            self.metrics.counter_inc(SESSION_DELIVERED, 1);
        } else {
            self.metrics.counter_inc(SESSION_UNDELIVERABLE, 1);
            tracing::debug!(
                session_id = %envelope.session_id,
                connection_id = %connection.id,
                "connection gone, message dropped"
            );
        }
        Ok(())
    }
}
