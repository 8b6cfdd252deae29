// transport/amqp.rs

// `Transport` implementation on top of `lapin`, the AMQP 0.9.1 client used
// for both publishers (plm_walker, visual) and the inbound telemetry
// subscriber.

use futures_util::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use log::{debug, error};

use async_trait::async_trait;

use crate::coordinator::TelemetryRecord;
use crate::error::TransportError;
use crate::telemetry::decode_and_validate;

use super::Transport;

/// A single AMQP connection and channel, reused for every publish and
/// subscribe call the service loop makes.
pub struct LapinTransport {
    channel: Channel,
}

impl LapinTransport {
    pub async fn connect(uri: &str) -> Result<Self, TransportError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(LapinTransport { channel })
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<(), TransportError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.declare_exchange(exchange).await?;
        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|err| TransportError::Publish {
                exchange: exchange.to_string(),
                source: Box::new(err),
            })?
            .await
            .map_err(|err| TransportError::Publish {
                exchange: exchange.to_string(),
                source: Box::new(err),
            })?;
        Ok(())
    }

    async fn subscribe(
        &self,
        binding: &str,
        on_message: Box<dyn Fn(TelemetryRecord) + Send + Sync>,
    ) -> Result<(), TransportError> {
        self.declare_exchange(binding).await?;
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| TransportError::Subscribe {
                binding: binding.to_string(),
                source: Box::new(err),
            })?;

        self.channel
            .queue_bind(
                queue.name().as_str(),
                binding,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| TransportError::Subscribe {
                binding: binding.to_string(),
                source: Box::new(err),
            })?;

        let mut consumer = self
            .channel
            .basic_consume(
                queue.name().as_str(),
                "personnel-rakf",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| TransportError::Subscribe {
                binding: binding.to_string(),
                source: Box::new(err),
            })?;

        tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        if let Some(record) = decode_and_validate(&delivery.data) {
                            on_message(record);
                        }
                        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                            error!("failed to ack AMQP delivery: {err}");
                        }
                    }
                    Err(err) => {
                        error!("AMQP consumer error: {err}");
                    }
                }
            }
            debug!("AMQP consumer stream ended");
        });

        Ok(())
    }
}
