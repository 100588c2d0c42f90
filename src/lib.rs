//! Publish-only sender bound to a single RabbitMQ fanout exchange.
//!
//! [`MessageSender`] declares its exchange on every channel it establishes,
//! publishes through a [`Sender`], and deletes the exchange again on stop.

pub mod config;
pub mod message;
pub mod rabbitmq;

pub use message::Message;
pub use rabbitmq::{ConnectionManager, Connector, MessageSender, RabbitMQError, Result, Sender};
