use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::channel::AmqpChannel;
use super::connection::Connector;
use super::errors::{RabbitMQError, Result};
use super::listeners::{ChannelSetupListener, ListenerRegistry, MessageSentListener};
use crate::message::Message;

struct ChannelSlot {
    channel: Arc<dyn AmqpChannel>,
    // Whether tx_select ran on this channel. The flag on the sender may have
    // changed since.
    transactional: bool,
}

/// Publishes messages to a named exchange over channels obtained from a
/// [`Connector`].
///
/// Every time a channel is (re)established the registered setup listeners run
/// against it in registration order. A dropped channel is replaced on the next
/// send.
pub struct Sender {
    connector: Arc<dyn Connector>,
    exchange_name: String,
    transactional: bool,
    setup_listeners: ListenerRegistry<dyn ChannelSetupListener>,
    sent_listeners: ListenerRegistry<dyn MessageSentListener>,
    slot: Mutex<Option<ChannelSlot>>,
}

impl Sender {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            exchange_name: String::new(),
            transactional: false,
            setup_listeners: ListenerRegistry::new(),
            sent_listeners: ListenerRegistry::new(),
            slot: Mutex::new(None),
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn set_exchange_name(&mut self, exchange_name: impl Into<String>) {
        self.exchange_name = exchange_name.into();
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Takes effect on the next channel the sender establishes.
    pub fn set_transactional(&mut self, transactional: bool) {
        self.transactional = transactional;
    }

    pub fn add_setup_listener(&mut self, listener: Arc<dyn ChannelSetupListener>) -> bool {
        self.setup_listeners.add(listener)
    }

    pub fn remove_setup_listener(&mut self, listener: &Arc<dyn ChannelSetupListener>) -> bool {
        self.setup_listeners.remove(listener)
    }

    pub fn add_message_sent_listener(&mut self, listener: Arc<dyn MessageSentListener>) -> bool {
        self.sent_listeners.add(listener)
    }

    pub fn remove_message_sent_listener(&mut self, listener: &Arc<dyn MessageSentListener>) -> bool {
        self.sent_listeners.remove(listener)
    }

    pub fn create_message(&self) -> Message {
        Message::default()
    }

    /// Opens a channel and runs the setup listeners on it.
    pub async fn init(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        *slot = Some(self.establish().await?);
        Ok(())
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let current = self.live_channel(&mut slot).await?;

        current
            .channel
            .basic_publish(
                &self.exchange_name,
                &message.routing_key,
                &message.payload,
                message.properties(),
            )
            .await?;

        if current.transactional {
            current.channel.tx_commit().await?;
        }
        drop(slot);

        debug!(
            exchange = %self.exchange_name,
            routing_key = %message.routing_key,
            message_id = %message.id,
            bytes = message.payload.len(),
            "Published message"
        );

        for listener in self.sent_listeners.iter() {
            listener.message_sent(message);
        }

        Ok(())
    }

    /// Deletes the exchange, re-establishing a dropped channel first.
    pub async fn delete_exchange(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let current = self.live_channel(&mut slot).await?;

        info!(exchange = %self.exchange_name, "Deleting exchange");
        current.channel.exchange_delete(&self.exchange_name).await
    }

    /// Closes the channel, then the connector. Both are always attempted; the
    /// first failure is returned.
    pub async fn close(&self) -> Result<()> {
        let channel_result = match self.slot.lock().await.take() {
            Some(current) => current.channel.close().await,
            None => Ok(()),
        };
        let connector_result = self.connector.close().await;

        channel_result.and(connector_result)
    }

    // Returns the slot's channel, replacing it first if it is missing or
    // no longer connected.
    async fn live_channel<'a>(&self, slot: &'a mut Option<ChannelSlot>) -> Result<&'a ChannelSlot> {
        let live = slot
            .as_ref()
            .map_or(false, |current| current.channel.is_connected());
        if !live {
            if slot.is_some() {
                warn!(exchange = %self.exchange_name, "Channel lost, re-establishing");
            }
            *slot = Some(self.establish().await?);
        }

        slot.as_ref()
            .ok_or_else(|| RabbitMQError::ChannelError("No channel available".to_string()))
    }

    async fn establish(&self) -> Result<ChannelSlot> {
        let channel = self.connector.open_channel().await?;

        if let Err(err) = self.prepare(&*channel).await {
            if let Err(close_err) = channel.close().await {
                warn!(
                    channel_id = %channel.id(),
                    error = %close_err,
                    "Failed to close channel after setup error"
                );
            }
            return Err(err);
        }

        debug!(
            exchange = %self.exchange_name,
            channel_id = %channel.id(),
            transactional = self.transactional,
            "Channel established"
        );

        Ok(ChannelSlot {
            channel,
            transactional: self.transactional,
        })
    }

    async fn prepare(&self, channel: &dyn AmqpChannel) -> Result<()> {
        for listener in self.setup_listeners.iter() {
            listener.channel_setup(channel, &self.exchange_name).await?;
        }

        if self.transactional {
            channel.tx_select().await?;
        }
        Ok(())
    }
}
