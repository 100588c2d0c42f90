use std::sync::Arc;

use tracing::{debug, info_span, warn, Instrument, Span};

use super::connection::Connector;
use super::errors::{RabbitMQError, Result};
use super::exchange::FanoutExchangeDeclarer;
use super::listeners::{ChannelSetupListener, MessageSentListener};
use super::sender::Sender;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Constructed,
    Started,
    Stopped,
}

/// Publish-only view of a [`Sender`] bound to one fanout exchange.
///
/// The exchange is declared (fanout, non-durable, not auto-deleted) on every
/// channel the sender establishes and deleted again on [`stop`](Self::stop).
pub struct MessageSender {
    sender: Sender,
    lifecycle: Lifecycle,
    span: Span,
}

impl MessageSender {
    pub fn new(connector: Arc<dyn Connector>, exchange_name: &str) -> Self {
        let mut sender = Sender::new(connector);
        sender.set_exchange_name(exchange_name);
        sender.add_setup_listener(Arc::new(FanoutExchangeDeclarer));

        Self {
            sender,
            lifecycle: Lifecycle::Constructed,
            span: info_span!("message_sender", exchange = %exchange_name),
        }
    }

    /// Logs lifecycle events under `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        self.sender.connector()
    }

    pub fn exchange_name(&self) -> &str {
        self.sender.exchange_name()
    }

    pub fn set_exchange_name(&mut self, exchange_name: &str) {
        if self.lifecycle == Lifecycle::Started {
            let _entered = self.span.enter();
            warn!(
                from = %self.sender.exchange_name(),
                to = %exchange_name,
                "Exchange renamed after start; the declared exchange is left as is"
            );
        }
        self.sender.set_exchange_name(exchange_name);
    }

    pub fn is_transactional(&self) -> bool {
        self.sender.is_transactional()
    }

    pub fn set_transactional(&mut self, transactional: bool) {
        self.sender.set_transactional(transactional);
    }

    pub fn add_setup_listener(&mut self, listener: Arc<dyn ChannelSetupListener>) {
        self.sender.add_setup_listener(listener);
    }

    pub fn remove_setup_listener(&mut self, listener: &Arc<dyn ChannelSetupListener>) {
        self.sender.remove_setup_listener(listener);
    }

    pub fn add_message_sent_listener(&mut self, listener: Arc<dyn MessageSentListener>) {
        self.sender.add_message_sent_listener(listener);
    }

    pub fn remove_message_sent_listener(&mut self, listener: &Arc<dyn MessageSentListener>) {
        self.sender.remove_message_sent_listener(listener);
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Constructed {
            return Err(RabbitMQError::StateError(format!(
                "cannot start a sender that is {:?}",
                self.lifecycle
            )));
        }

        let span = self.span.clone();
        self.start_sender().instrument(span).await
    }

    /// Deletes the exchange, then closes the sender.
    ///
    /// The sender is closed even when deletion fails. Transport failures from
    /// the deletion come back unchanged; anything else comes back as
    /// [`RabbitMQError::RuntimeError`].
    pub async fn stop(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Started {
            return Err(RabbitMQError::StateError(format!(
                "cannot stop a sender that is {:?}",
                self.lifecycle
            )));
        }

        let span = self.span.clone();
        self.stop_sender().instrument(span).await
    }

    /// A new message with an empty routing key, so delivery fans out to every
    /// bound queue.
    pub fn create_message(&self) -> Message {
        self.sender.create_message().with_routing_key("")
    }

    pub async fn send(&self, message: Message) -> Result<()> {
        if self.lifecycle != Lifecycle::Started {
            return Err(RabbitMQError::StateError(format!(
                "cannot send through a sender that is {:?}",
                self.lifecycle
            )));
        }

        self.sender
            .send(&message)
            .instrument(self.span.clone())
            .await
    }

    async fn start_sender(&mut self) -> Result<()> {
        debug!("Starting MessageSender for exchange {}...", self.exchange_name());
        self.sender.init().await?;
        self.lifecycle = Lifecycle::Started;
        debug!("MessageSender started.");
        Ok(())
    }

    async fn stop_sender(&mut self) -> Result<()> {
        debug!("Stopping MessageSender for exchange {}...", self.exchange_name());

        let deleted = self
            .sender
            .delete_exchange()
            .await
            .map_err(RabbitMQError::into_runtime);
        let closed = self.sender.close().await;
        self.lifecycle = Lifecycle::Stopped;

        if let Err(err) = &deleted {
            warn!(error = %err, "Exchange deletion failed; sender closed anyway");
        }
        deleted.and(closed)?;

        debug!("MessageSender stopped.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rabbitmq::channel::AmqpChannel;
    use crate::rabbitmq::mock::{ChannelOp, MockConnector};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSetup(AtomicUsize);

    #[async_trait]
    impl ChannelSetupListener for CountingSetup {
        async fn channel_setup(&self, _channel: &dyn AmqpChannel, _exchange: &str) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Declares a side exchange named after the bound one.
    struct AuditExchangeDeclarer;

    #[async_trait]
    impl ChannelSetupListener for AuditExchangeDeclarer {
        async fn channel_setup(&self, channel: &dyn AmqpChannel, exchange: &str) -> Result<()> {
            channel
                .exchange_declare(
                    &format!("{}.audit", exchange),
                    lapin::ExchangeKind::Fanout,
                    Default::default(),
                )
                .await
        }
    }

    fn broken_pipe() -> RabbitMQError {
        io::Error::new(io::ErrorKind::BrokenPipe, "connection reset by broker").into()
    }

    #[test]
    fn test_create_message_has_empty_routing_key() {
        let sender = MessageSender::new(Arc::new(MockConnector::new()), "alerts");
        assert_eq!(sender.create_message().routing_key, "");
    }

    #[tokio::test]
    async fn test_start_stop_declares_and_deletes_once() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        sender.start().await.unwrap();
        sender.stop().await.unwrap();

        let ops = connector.operations().await;
        let declares: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                ChannelOp::Declare { exchange, kind, options, .. } => Some((exchange, kind, options)),
                _ => None,
            })
            .collect();
        assert_eq!(declares.len(), 1);
        let (exchange, kind, options) = declares[0];
        assert_eq!(exchange, "alerts");
        assert!(matches!(kind, lapin::ExchangeKind::Fanout));
        assert!(!options.durable);
        assert!(!options.auto_delete);

        assert_eq!(connector.deleted_exchanges().await, vec!["alerts"]);
        assert_eq!(sender.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_renamed_exchange_is_declared() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        sender.set_exchange_name("alerts.v2");
        assert_eq!(sender.exchange_name(), "alerts.v2");

        sender.start().await.unwrap();

        assert_eq!(connector.declared_exchanges().await, vec!["alerts.v2"]);
    }

    #[tokio::test]
    async fn test_stop_passes_transport_error_through_and_closes() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        sender.start().await.unwrap();

        connector.fail_next_delete(broken_pipe()).await;
        let result = sender.stop().await;

        assert!(matches!(result, Err(RabbitMQError::IoError(_))));
        assert_eq!(connector.close_count(), 1);
        assert_eq!(sender.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_stop_wraps_other_errors_and_closes() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        sender.start().await.unwrap();

        connector
            .fail_next_delete(RabbitMQError::ChannelError("precondition failed".to_string()))
            .await;
        let result = sender.stop().await;

        match result {
            Err(RabbitMQError::RuntimeError(inner)) => {
                assert!(matches!(*inner, RabbitMQError::ChannelError(_)));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_after_dropped_channel_still_deletes() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        sender.start().await.unwrap();

        connector.disconnect().await;
        sender.stop().await.unwrap();

        assert_eq!(connector.opened_channels(), 2);
        assert_eq!(connector.deleted_exchanges().await, vec!["alerts"]);
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_surfaces_reconnect_failure_as_transport_error() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        sender.start().await.unwrap();

        connector.disconnect().await;
        connector.fail_next_open(broken_pipe()).await;
        let result = sender.stop().await;

        assert!(matches!(result, Err(RabbitMQError::IoError(_))));
        assert_eq!(connector.close_count(), 1);
        assert_eq!(sender.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_failed_start_closes_the_channel() {
        let connector = Arc::new(MockConnector::new());
        connector
            .fail_next_declare(RabbitMQError::ChannelError("access refused".to_string()))
            .await;
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        assert!(sender.start().await.is_err());

        let ops = connector.operations().await;
        assert!(matches!(ops.as_slice(), [ChannelOp::Close { .. }]));
        assert_eq!(sender.lifecycle(), Lifecycle::Constructed);
    }

    #[tokio::test]
    async fn test_duplicate_setup_listener_runs_once_per_channel() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        let setup = Arc::new(CountingSetup(AtomicUsize::new(0)));
        let handle: Arc<dyn ChannelSetupListener> = setup.clone();
        sender.add_setup_listener(handle.clone());
        sender.add_setup_listener(handle);

        sender.start().await.unwrap();
        assert_eq!(setup.0.load(Ordering::SeqCst), 1);

        connector.disconnect().await;
        sender.send(sender.create_message()).await.unwrap();
        assert_eq!(setup.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exchange_declared_before_user_setup_listeners() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        sender.add_setup_listener(Arc::new(AuditExchangeDeclarer));

        sender.start().await.unwrap();

        let ops = connector.operations().await;
        assert!(matches!(&ops[0], ChannelOp::Declare { exchange, .. } if exchange == "alerts"));
        assert!(matches!(&ops[1], ChannelOp::Declare { exchange, .. } if exchange == "alerts.audit"));
    }

    #[tokio::test]
    async fn test_start_failure_is_returned_unchanged() {
        let connector = Arc::new(MockConnector::new());
        connector.fail_next_open(broken_pipe()).await;
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        let result = sender.start().await;

        assert!(matches!(result, Err(RabbitMQError::IoError(_))));
        assert_eq!(sender.lifecycle(), Lifecycle::Constructed);
        assert_eq!(connector.opened_channels(), 0);
    }

    #[tokio::test]
    async fn test_removed_listeners_never_fire() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        let setup = Arc::new(CountingSetup(AtomicUsize::new(0)));
        let setup_handle: Arc<dyn ChannelSetupListener> = setup.clone();
        sender.add_setup_listener(setup_handle.clone());
        sender.remove_setup_listener(&setup_handle);

        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();
        let sent_handle: Arc<dyn MessageSentListener> = Arc::new(move |_: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sender.add_message_sent_listener(sent_handle.clone());
        sender.remove_message_sent_listener(&sent_handle);

        sender.start().await.unwrap();
        connector.disconnect().await;
        sender.send(sender.create_message()).await.unwrap();

        assert_eq!(connector.opened_channels(), 2);
        assert_eq!(setup.0.load(Ordering::SeqCst), 0);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sent_listener_sees_each_message() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();
        sender.add_message_sent_listener(Arc::new(move |message: &Message| {
            log.lock().unwrap().push(message.id);
        }));
        sender.start().await.unwrap();

        let first = sender.create_message().with_payload("one");
        let second = sender.create_message().with_payload("two");
        let ids = vec![first.id, second.id];
        sender.send(first).await.unwrap();
        sender.send(second).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), ids);
    }

    #[tokio::test]
    async fn test_lifecycle_is_linear() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        assert!(matches!(
            sender.send(sender.create_message()).await,
            Err(RabbitMQError::StateError(_))
        ));
        assert!(matches!(sender.stop().await, Err(RabbitMQError::StateError(_))));

        sender.start().await.unwrap();
        assert!(matches!(sender.start().await, Err(RabbitMQError::StateError(_))));

        sender.stop().await.unwrap();
        assert!(matches!(sender.start().await, Err(RabbitMQError::StateError(_))));
        assert!(matches!(sender.stop().await, Err(RabbitMQError::StateError(_))));
    }

    #[tokio::test]
    async fn test_transactional_pass_through() {
        let connector = Arc::new(MockConnector::new());
        let mut sender = MessageSender::new(connector.clone(), "alerts");

        assert!(!sender.is_transactional());
        sender.set_transactional(true);
        assert!(sender.is_transactional());

        sender.start().await.unwrap();
        sender.send(sender.create_message()).await.unwrap();

        let ops = connector.operations().await;
        assert!(ops.iter().any(|op| matches!(op, ChannelOp::TxSelect { .. })));
        assert!(ops.iter().any(|op| matches!(op, ChannelOp::TxCommit { .. })));
    }
}
