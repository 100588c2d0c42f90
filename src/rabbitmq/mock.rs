//! In-memory connector and channel for testing.
//!
//! Every channel handed out by a [`MockConnector`] records its commands into
//! one shared log, so a test can assert on the exact sequence the sender
//! produced. Failures are injected one shot at a time.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{options::ExchangeDeclareOptions, BasicProperties, ExchangeKind};
use tokio::sync::Mutex;

use super::channel::AmqpChannel;
use super::connection::Connector;
use super::errors::{RabbitMQError, Result};

/// One command a mock channel received.
#[derive(Debug, Clone)]
pub enum ChannelOp {
    Declare {
        channel_id: u16,
        exchange: String,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    },
    Delete {
        channel_id: u16,
        exchange: String,
    },
    Publish {
        channel_id: u16,
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        properties: BasicProperties,
    },
    TxSelect {
        channel_id: u16,
    },
    TxCommit {
        channel_id: u16,
    },
    Close {
        channel_id: u16,
    },
}

#[derive(Default)]
struct MockState {
    operations: Mutex<Vec<ChannelOp>>,
    fail_declare: Mutex<Option<RabbitMQError>>,
    fail_delete: Mutex<Option<RabbitMQError>>,
    fail_publish: Mutex<Option<RabbitMQError>>,
}

impl MockState {
    async fn record(&self, op: ChannelOp) {
        self.operations.lock().await.push(op);
    }
}

/// Channel that records instead of talking to a broker.
pub struct MockChannel {
    id: u16,
    connected: Arc<AtomicBool>,
    state: Arc<MockState>,
}

#[async_trait]
impl AmqpChannel for MockChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<()> {
        if let Some(err) = self.state.fail_declare.lock().await.take() {
            return Err(err);
        }
        self.state
            .record(ChannelOp::Declare {
                channel_id: self.id,
                exchange: exchange.to_string(),
                kind,
                options,
            })
            .await;
        Ok(())
    }

    async fn exchange_delete(&self, exchange: &str) -> Result<()> {
        if let Some(err) = self.state.fail_delete.lock().await.take() {
            return Err(err);
        }
        self.state
            .record(ChannelOp::Delete {
                channel_id: self.id,
                exchange: exchange.to_string(),
            })
            .await;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        if let Some(err) = self.state.fail_publish.lock().await.take() {
            return Err(err);
        }
        self.state
            .record(ChannelOp::Publish {
                channel_id: self.id,
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
                properties,
            })
            .await;
        Ok(())
    }

    async fn tx_select(&self) -> Result<()> {
        self.state.record(ChannelOp::TxSelect { channel_id: self.id }).await;
        Ok(())
    }

    async fn tx_commit(&self) -> Result<()> {
        self.state.record(ChannelOp::TxCommit { channel_id: self.id }).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.record(ChannelOp::Close { channel_id: self.id }).await;
        Ok(())
    }
}

/// Connector that hands out [`MockChannel`]s.
#[derive(Default)]
pub struct MockConnector {
    state: Arc<MockState>,
    current: Mutex<Option<Arc<AtomicBool>>>,
    next_channel_id: AtomicU16,
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_open: Mutex<Option<RabbitMQError>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `open_channel` call fails with `err`.
    pub async fn fail_next_open(&self, err: RabbitMQError) {
        *self.fail_open.lock().await = Some(err);
    }

    /// The next exchange declaration on any channel fails with `err`.
    pub async fn fail_next_declare(&self, err: RabbitMQError) {
        *self.state.fail_declare.lock().await = Some(err);
    }

    /// The next exchange deletion on any channel fails with `err`.
    pub async fn fail_next_delete(&self, err: RabbitMQError) {
        *self.state.fail_delete.lock().await = Some(err);
    }

    /// The next publish on any channel fails with `err`.
    pub async fn fail_next_publish(&self, err: RabbitMQError) {
        *self.state.fail_publish.lock().await = Some(err);
    }

    /// Drops the most recently opened channel, as a broker restart would.
    pub async fn disconnect(&self) {
        if let Some(connected) = self.current.lock().await.as_ref() {
            connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn opened_channels(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn operations(&self) -> Vec<ChannelOp> {
        self.state.operations.lock().await.clone()
    }

    pub async fn declared_exchanges(&self) -> Vec<String> {
        self.operations()
            .await
            .into_iter()
            .filter_map(|op| match op {
                ChannelOp::Declare { exchange, .. } => Some(exchange),
                _ => None,
            })
            .collect()
    }

    pub async fn deleted_exchanges(&self) -> Vec<String> {
        self.operations()
            .await
            .into_iter()
            .filter_map(|op| match op {
                ChannelOp::Delete { exchange, .. } => Some(exchange),
                _ => None,
            })
            .collect()
    }

    pub async fn published_count(&self) -> usize {
        self.operations()
            .await
            .iter()
            .filter(|op| matches!(op, ChannelOp::Publish { .. }))
            .count()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>> {
        if let Some(err) = self.fail_open.lock().await.take() {
            return Err(err);
        }

        let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
        let connected = Arc::new(AtomicBool::new(true));
        *self.current.lock().await = Some(connected.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MockChannel {
            id,
            connected,
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
