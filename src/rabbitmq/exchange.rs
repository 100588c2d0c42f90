use async_trait::async_trait;
use lapin::{options::ExchangeDeclareOptions, ExchangeKind};
use tracing::debug;

use super::channel::AmqpChannel;
use super::errors::Result;
use super::listeners::ChannelSetupListener;

pub const EXCHANGE_DURABLE: bool = false;
pub const EXCHANGE_AUTO_DELETE: bool = false;

/// The exchange a `MessageSender` publishes to: always fanout, neither
/// durable nor auto-deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeBinding {
    pub name: String,
}

impl ExchangeBinding {
    pub fn fanout(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn kind(&self) -> ExchangeKind {
        ExchangeKind::Fanout
    }

    pub fn declare_options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            durable: EXCHANGE_DURABLE,
            auto_delete: EXCHANGE_AUTO_DELETE,
            ..ExchangeDeclareOptions::default()
        }
    }

    pub async fn declare(&self, channel: &dyn AmqpChannel) -> Result<()> {
        debug!(
            exchange = %self.name,
            channel_id = %channel.id(),
            "Declaring fanout exchange"
        );
        channel
            .exchange_declare(&self.name, self.kind(), self.declare_options())
            .await
    }
}

/// Setup listener that re-declares the sender's exchange on every new
/// channel, so the exchange comes back after a broker-side delete or restart.
#[derive(Debug, Default)]
pub struct FanoutExchangeDeclarer;

#[async_trait]
impl ChannelSetupListener for FanoutExchangeDeclarer {
    async fn channel_setup(&self, channel: &dyn AmqpChannel, exchange_name: &str) -> Result<()> {
        ExchangeBinding::fanout(exchange_name).declare(channel).await
    }
}
