use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::channel::{AmqpChannel, REPLY_SUCCESS};
use super::errors::{RabbitMQError, Result};

/// Longest pause between two connection attempts.
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Hands out channels and owns the connection they live on.
///
/// The sender asks for a fresh channel whenever it has none or the current one
/// dropped; reconnecting is the connector's business.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>>;

    async fn close(&self) -> Result<()>;
}

/// How hard the connection manager tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_ms,
        }
    }

    /// Exponential backoff, capped.
    pub fn next_delay(&self, current_ms: u64) -> u64 {
        current_ms.saturating_mul(2).min(MAX_RECONNECT_DELAY_MS)
    }

    /// `delay_ms` with up to ±15% jitter applied.
    pub fn jittered(&self, delay_ms: u64) -> u64 {
        let jitter = (rand::random::<f64>() * 0.3 - 0.15) * delay_ms as f64;
        (delay_ms as f64 + jitter).max(0.0) as u64
    }
}

/// `Connector` backed by a single lapin connection.
pub struct ConnectionManager {
    uri: String,
    connection: Mutex<Option<Connection>>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(uri: &str) -> Self {
        ConnectionManager {
            uri: uri.to_string(),
            connection: Mutex::new(None),
            policy: ReconnectPolicy::default(),
            connect_timeout: Duration::from_millis(5000),
        }
    }

    pub fn with_reconnect_policy(mut self, max_attempts: u32, initial_delay_ms: u64) -> Self {
        self.policy = ReconnectPolicy::new(max_attempts, initial_delay_ms);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Adds a `heartbeat` query parameter unless the URI already carries one.
    pub fn with_heartbeat(mut self, heartbeat_seconds: u16) -> Self {
        self.uri = uri_with_heartbeat(&self.uri, heartbeat_seconds);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    async fn establish_connection(&self) -> Result<Connection> {
        let mut delay = self.policy.initial_delay_ms;
        let mut attempts = 0;

        loop {
            info!(uri = %redact(&self.uri), "Attempting to connect to RabbitMQ");

            let attempt = timeout(
                self.connect_timeout,
                Connection::connect(&self.uri, ConnectionProperties::default()),
            )
            .await;

            let err: RabbitMQError = match attempt {
                Ok(Ok(conn)) => {
                    info!("Successfully connected to RabbitMQ");
                    return Ok(conn);
                }
                Ok(Err(err)) => err.into(),
                Err(elapsed) => elapsed.into(),
            };

            attempts += 1;
            error!(
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                error = %err,
                "Failed to connect to RabbitMQ"
            );

            if attempts >= self.policy.max_attempts {
                error!("Max reconnection attempts reached. Giving up.");
                return Err(err);
            }

            let sleep_time = self.policy.jittered(delay);
            info!("Waiting {}ms before next reconnect attempt", sleep_time);
            sleep(Duration::from_millis(sleep_time)).await;

            delay = self.policy.next_delay(delay);
        }
    }
}

#[async_trait]
impl Connector for ConnectionManager {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>> {
        let mut guard = self.connection.lock().await;

        let connected = guard
            .as_ref()
            .map_or(false, |conn| conn.status().connected());
        if !connected {
            if guard.is_some() {
                warn!("RabbitMQ connection lost, reconnecting");
            }
            *guard = Some(self.establish_connection().await?);
        }

        let connection = guard
            .as_ref()
            .ok_or_else(|| RabbitMQError::ChannelError("No active connection".to_string()))?;
        let channel = connection.create_channel().await?;
        debug!(channel_id = %channel.id(), "Opened channel");

        Ok(Arc::new(channel))
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.connection.lock().await.take() {
            if conn.status().connected() {
                info!("Closing RabbitMQ connection gracefully");
                conn.close(REPLY_SUCCESS, "Closing connection").await?;
            }
        }
        Ok(())
    }
}

fn uri_with_heartbeat(uri: &str, heartbeat_seconds: u16) -> String {
    if uri.contains("heartbeat=") {
        return uri.to_string();
    }
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{}{}heartbeat={}", uri, separator, heartbeat_seconds)
}

/// Strips the password from an AMQP URI so it can be logged.
fn redact(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    match rest.split_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}", scheme, user, host)
        }
        None => uri.to_string(),
    }
}
