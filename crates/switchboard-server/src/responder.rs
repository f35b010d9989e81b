use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::Envelope;

/// Turns an inbound envelope into the reply delivered to its session.
///
/// `None` means no reply; nothing is sent to the client.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    async fn respond(&self, envelope: &Envelope) -> Option<Value>;
}

/// Replies with the body it was given.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, envelope: &Envelope) -> Option<Value> {
        Some(envelope.body.clone())
    }
}
