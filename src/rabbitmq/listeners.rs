// src/rabbitmq/listeners.rs
// Callbacks the sender fires around channel setup and message delivery.

use std::sync::Arc;

use async_trait::async_trait;

use super::channel::AmqpChannel;
use super::errors::Result;
use crate::message::Message;

/// Runs every time the sender establishes a channel, before the
/// establishing call returns. Typically declares topology.
#[async_trait]
pub trait ChannelSetupListener: Send + Sync {
    async fn channel_setup(&self, channel: &dyn AmqpChannel, exchange_name: &str) -> Result<()>;
}

/// Observes each message after it was handed to the broker.
pub trait MessageSentListener: Send + Sync {
    fn message_sent(&self, message: &Message);
}

impl<F> MessageSentListener for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn message_sent(&self, message: &Message) {
        self(message)
    }
}

/// Ordered set of listeners keyed by `Arc` identity.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: Vec<Arc<L>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if this exact listener was already registered.
    pub fn add(&mut self, listener: Arc<L>) -> bool {
        if self.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Returns false if the listener was not registered.
    pub fn remove(&mut self, listener: &Arc<L>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !same_listener(l, listener));
        self.listeners.len() != before
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.listeners.iter().any(|l| same_listener(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<L>> {
        self.listeners.iter()
    }
}

// Compare data pointers only; vtable pointers for the same type may differ
// between codegen units.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
