// src/rabbitmq/channel.rs

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions, ExchangeDeleteOptions},
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tracing::debug;

use super::errors::Result;

/// Reply code sent with a normal channel/connection close.
pub const REPLY_SUCCESS: u16 = 200;

/// The slice of an AMQP channel the sender needs.
///
/// Implemented for `lapin::Channel`; tests use `rabbitmq::mock::MockChannel`
/// (behind the `mock` feature).
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Channel number, for logging.
    fn id(&self) -> u16;

    /// Whether the channel can still carry commands.
    fn is_connected(&self) -> bool;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<()>;

    async fn exchange_delete(&self, exchange: &str) -> Result<()>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<()>;

    /// Put the channel in transactional mode.
    async fn tx_select(&self) -> Result<()>;

    async fn tx_commit(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl AmqpChannel for Channel {
    fn id(&self) -> u16 {
        Channel::id(self)
    }

    fn is_connected(&self) -> bool {
        self.status().connected()
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<()> {
        Channel::exchange_declare(self, exchange, kind, options, FieldTable::default()).await?;
        Ok(())
    }

    async fn exchange_delete(&self, exchange: &str) -> Result<()> {
        Channel::exchange_delete(self, exchange, ExchangeDeleteOptions::default()).await?;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        // No confirm_select on these channels, so the returned confirm
        // resolves immediately and carries nothing worth waiting for.
        let _confirm = Channel::basic_publish(
            self,
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            payload,
            properties,
        )
        .await?;
        Ok(())
    }

    async fn tx_select(&self) -> Result<()> {
        Channel::tx_select(self).await?;
        Ok(())
    }

    async fn tx_commit(&self) -> Result<()> {
        Channel::tx_commit(self).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.status().connected() {
            debug!(channel_id = %Channel::id(self), "Channel already closed");
            return Ok(());
        }
        Channel::close(self, REPLY_SUCCESS, "Closing sender").await?;
        Ok(())
    }
}
