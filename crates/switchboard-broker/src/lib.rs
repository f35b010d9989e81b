//! Broker client.
//!
//! Channels are named, addressable queues. Publishing is fire-and-forget and
//! consuming acknowledges automatically, so every hop is at-most-once.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod consume;
pub mod error;
pub mod memory;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use consume::consume;
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use switchboard_core::ChannelName;

/// Stream of payloads from one channel. Each item is already acknowledged.
pub type Subscription = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Create `name` if it does not exist. Safe to call repeatedly.
    async fn declare_channel(&self, name: &ChannelName) -> Result<()>;

    /// Remove `name` and end its subscriptions. Unknown names are a no-op.
    async fn delete_channel(&self, name: &ChannelName) -> Result<()>;

    /// Returns once the broker has accepted the payload. No delivery
    /// confirmation, no retry.
    async fn publish(&self, name: &ChannelName, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, name: &ChannelName) -> Result<Subscription>;

    async fn close(&self) -> Result<()>;
}
