use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use switchboard_core::ChannelName;
use tokio::sync::{mpsc, Mutex};

use crate::error::{BrokerError, Result};
use crate::{Broker, Subscription};

/// One FIFO queue. Consumers compete for messages through the shared receiver.
struct Queue {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// Process-local broker.
///
/// Messages published before a consumer attaches wait in the queue. Deleting a
/// channel drops its sender, so subscriptions drain what is left and then end.
#[derive(Default)]
pub struct InMemoryBroker {
    channels: RwLock<HashMap<ChannelName, Queue>>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_channel(&self, name: &ChannelName) -> bool {
        self.channels.read().contains_key(name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_channel(&self, name: &ChannelName) -> Result<()> {
        self.ensure_open()?;
        let _ = self
            .channels
            .write()
            .entry(name.clone())
            .or_insert_with(Queue::new);
        tracing::debug!(channel = %name, "channel declared");
        Ok(())
    }

    async fn delete_channel(&self, name: &ChannelName) -> Result<()> {
        if self.channels.write().remove(name).is_some() {
            tracing::debug!(channel = %name, "channel deleted");
        }
        Ok(())
    }

    async fn publish(&self, name: &ChannelName, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let tx = self
            .channels
            .read()
            .get(name)
            .map(|q| q.tx.clone())
            .ok_or_else(|| BrokerError::UnknownChannel(name.clone()))?;
        tx.send(payload).map_err(|_| BrokerError::UnknownChannel(name.clone()))
    }

    async fn subscribe(&self, name: &ChannelName) -> Result<Subscription> {
        self.ensure_open()?;
        let rx = self
            .channels
            .read()
            .get(name)
            .map(|q| Arc::clone(&q.rx))
            .ok_or_else(|| BrokerError::UnknownChannel(name.clone()))?;

        let stream = futures::stream::unfold(rx, |rx| async move {
            let next = rx.lock().await.recv().await;
            next.map(|payload| (Ok(payload), rx))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.channels.write().clear();
        Ok(())
    }
}
