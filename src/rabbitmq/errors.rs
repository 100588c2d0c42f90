// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("AMQP transport error: {0}")]
    TransportError(#[from] LapinError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Connection timeout: {0}")]
    TimeoutError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("Message serialization error: {0}")]
    SerializationError(#[from] SerdeError),

    #[error("Invalid sender state: {0}")]
    StateError(String),

    #[error("Runtime failure: {0}")]
    RuntimeError(#[source] Box<RabbitMQError>),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl RabbitMQError {
    /// True for failures raised by the transport itself (broker, socket),
    /// as opposed to failures of this crate's own bookkeeping.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RabbitMQError::TransportError(_) | RabbitMQError::IoError(_)
        )
    }

    /// Wraps a non-transport failure so callers see it as a generic runtime
    /// failure. Transport failures pass through untouched.
    pub fn into_runtime(self) -> Self {
        if self.is_transport() {
            self
        } else {
            RabbitMQError::RuntimeError(Box::new(self))
        }
    }
}

impl From<Elapsed> for RabbitMQError {
    fn from(_: Elapsed) -> Self {
        RabbitMQError::TimeoutError("Connection timed out".to_string())
    }
}

impl From<String> for RabbitMQError {
    fn from(message: String) -> Self {
        RabbitMQError::Unknown(message)
    }
}

impl From<&str> for RabbitMQError {
    fn from(message: &str) -> Self {
        RabbitMQError::Unknown(message.to_string())
    }
}
