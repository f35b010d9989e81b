//! AMQP 0.9.1 broker (RabbitMQ).
//!
//! Each channel name maps to a fanout exchange `x.<name>` bound to a queue
//! `q.<name>`. One connection is held for the life of the broker.
//!
//! Declares, deletes and publishes share one AMQP channel in confirm mode.
//! The server closes an AMQP channel on any channel-level error, such as a
//! publish to an exchange deleted by a sign-out, so the shared channel is
//! reopened on the next call once it is no longer connected. Every
//! subscription gets its own AMQP channel and is not affected.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use switchboard_core::ChannelName;
use tokio::sync::Mutex;

use crate::error::{BrokerError, Result};
use crate::{Broker, Subscription};

pub struct AmqpBroker {
    connection: Connection,
    channel: Mutex<Channel>,
    consumer_seq: AtomicU64,
}

impl AmqpBroker {
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(connection_err)?;
        let channel = open_confirm_channel(&connection).await?;
        tracing::info!("connected to AMQP broker");
        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            consumer_seq: AtomicU64::new(0),
        })
    }

    /// The shared channel, reopened if the server has closed it.
    async fn channel(&self) -> Result<Channel> {
        let mut channel = self.channel.lock().await;
        if !channel.status().connected() {
            tracing::warn!(channel_id = channel.id(), "AMQP channel closed, reopening");
            *channel = open_confirm_channel(&self.connection).await?;
        }
        Ok(channel.clone())
    }

    fn consumer_tag(&self, name: &ChannelName) -> String {
        let seq = self.consumer_seq.fetch_add(1, Ordering::Relaxed);
        format!("switchboard.{name}.{seq}")
    }
}

async fn open_confirm_channel(connection: &Connection) -> Result<Channel> {
    let channel = connection.create_channel().await.map_err(connection_err)?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(connection_err)?;
    Ok(channel)
}

fn connection_err(e: lapin::Error) -> BrokerError {
    BrokerError::Connection(e.to_string())
}

fn declare_err(name: &ChannelName) -> impl Fn(lapin::Error) -> BrokerError + '_ {
    move |e| BrokerError::Declare {
        channel: name.clone(),
        reason: e.to_string(),
    }
}

fn publish_err(name: &ChannelName) -> impl Fn(lapin::Error) -> BrokerError + '_ {
    move |e| BrokerError::Publish {
        channel: name.clone(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_channel(&self, name: &ChannelName) -> Result<()> {
        let channel = self.channel().await?;
        let queue = name.queue();
        let exchange = name.exchange();
        let _ = channel
            .queue_declare(&queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(declare_err(name))?;
        channel
            .exchange_declare(
                &exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(declare_err(name))?;
        channel
            .queue_bind(
                &queue,
                &exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(declare_err(name))?;
        tracing::debug!(channel = %name, %exchange, %queue, "channel declared");
        Ok(())
    }

    async fn delete_channel(&self, name: &ChannelName) -> Result<()> {
        let channel = self.channel().await?;
        let _ = channel
            .queue_delete(&name.queue(), QueueDeleteOptions::default())
            .await
            .map_err(declare_err(name))?;
        channel
            .exchange_delete(&name.exchange(), ExchangeDeleteOptions::default())
            .await
            .map_err(declare_err(name))?;
        tracing::debug!(channel = %name, "channel deleted");
        Ok(())
    }

    async fn publish(&self, name: &ChannelName, payload: Bytes) -> Result<()> {
        let channel = self.channel().await?;
        // Waiting for the confirm surfaces a missing exchange as an error here
        // instead of as a silent channel close.
        let confirmation = channel
            .basic_publish(
                &name.exchange(),
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(publish_err(name))?
            .await
            .map_err(publish_err(name))?;

        match confirmation {
            Confirmation::Nack(_) => Err(BrokerError::Publish {
                channel: name.clone(),
                reason: "rejected by broker".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn subscribe(&self, name: &ChannelName) -> Result<Subscription> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(connection_err)?;
        let consumer = channel
            .basic_consume(
                &name.queue(),
                &self.consumer_tag(name),
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume {
                channel: name.clone(),
                reason: e.to_string(),
            })?;

        let name = name.clone();
        Ok(consumer
            .map(move |delivery| {
                // The subscription owns its AMQP channel.
                let _owner = &channel;
                delivery
                    .map(|d| Bytes::from(d.data))
                    .map_err(|e| BrokerError::Consume {
                        channel: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .boxed())
    }

    async fn close(&self) -> Result<()> {
        self.connection
            .close(200, "switchboard shutting down")
            .await
            .map_err(connection_err)
    }
}
