use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope has no session id")]
    MissingSession,
}

/// Unit exchanged through the broker.
///
/// On the wire this is `{"id": <session id>, "msg": <body>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "id")]
    pub session_id: SessionId,
    #[serde(rename = "msg")]
    pub body: Value,
}

/// Just enough of an envelope to route it.
#[derive(Deserialize)]
struct RoutingHeader {
    id: Option<String>,
}

impl Envelope {
    pub fn new(session_id: SessionId, body: Value) -> Self {
        Self { session_id, body }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(payload)?;
        if envelope.session_id.as_str().is_empty() {
            return Err(EnvelopeError::MissingSession);
        }
        Ok(envelope)
    }

    /// Destination session of a raw payload, without requiring a body.
    pub fn route_target(payload: &[u8]) -> Result<SessionId, EnvelopeError> {
        let header: RoutingHeader = serde_json::from_slice(payload)?;
        match header.id {
            Some(id) if !id.is_empty() => Ok(SessionId::from_raw(id)),
            _ => Err(EnvelopeError::MissingSession),
        }
    }
}
