use switchboard_broker::BrokerError;
use switchboard_core::{EnvelopeError, FrameError, SessionId};

/// Failure while handling one inbound WebSocket frame.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("alias must not be blank")]
    BlankAlias,

    #[error("session {0} was signed out during provisioning")]
    SignedOut(SessionId),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Failure while routing one envelope off the pull channel.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Failure while delivering one envelope from a session channel.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("bind failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}
