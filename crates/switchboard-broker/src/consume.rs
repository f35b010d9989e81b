use std::fmt::Display;
use std::future::Future;

use bytes::Bytes;
use futures::StreamExt;
use switchboard_core::ChannelName;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::Broker;

/// Run the consume loop for `name` until the channel goes away or `cancel`
/// fires.
///
/// Messages are acknowledged on receipt; a handler error is logged and the
/// message is lost. Handlers run one at a time, so channel order is kept.
pub async fn consume<B, F, Fut, E>(
    broker: &B,
    name: &ChannelName,
    cancel: CancellationToken,
    mut handler: F,
) -> Result<()>
where
    B: Broker + ?Sized,
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    let mut subscription = broker.subscribe(name).await?;
    tracing::debug!(channel = %name, "consumer started");

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(channel = %name, "consumer cancelled");
                return Ok(());
            }
            next = subscription.next() => next,
        };

        match next {
            Some(Ok(payload)) => {
                if let Err(e) = handler(payload).await {
                    tracing::warn!(channel = %name, error = %e, "handler failed, message dropped");
                }
            }
            Some(Err(e)) => {
                tracing::warn!(channel = %name, error = %e, "delivery failed, message dropped");
            }
            None => {
                tracing::debug!(channel = %name, "channel closed, consumer stopping");
                return Ok(());
            }
        }
    }
}
