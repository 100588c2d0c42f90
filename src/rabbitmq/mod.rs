// src/rabbitmq/mod.rs
// Fanout publishing over RabbitMQ

pub mod channel;
pub mod connection;
pub mod errors;
pub mod exchange;
pub mod listeners;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod publisher;
pub mod sender;

// Re-export specific items to simplify imports elsewhere
pub use channel::AmqpChannel;
pub use connection::{ConnectionManager, Connector, ReconnectPolicy};
pub use errors::{RabbitMQError, Result};
pub use exchange::{ExchangeBinding, FanoutExchangeDeclarer};
pub use listeners::{ChannelSetupListener, ListenerRegistry, MessageSentListener};
pub use publisher::{Lifecycle, MessageSender};
pub use sender::Sender;
