// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker doubles shared by the unit tests.

use crate::{
    consumer::{ConsumerDefinition, PrefetchQos},
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    message::Message,
    queue::QueueDefinition,
    transport::{
        Acknowledger, AmqpChannel, CloseNotification, DeliveryStream, Transport,
        TransportConnection,
    },
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::{types::FieldTable, BasicProperties};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

/// Polls `cond` every millisecond until it holds, panicking after 10k polls.
pub(crate) async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelOp {
    Qos(u16),
    ExchangeDeclare(String, ExchangeKind),
    QueueDeclare(String),
    /// queue, routing key, exchange
    QueueBind(String, String, String),
    /// queue, consumer name
    Consume(String, String),
    /// exchange, routing key, body
    Publish(String, String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ack,
    Nack { requeue: bool },
    Reject { requeue: bool },
}

/// Broker-side state resulting from the declarations made on a channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct Broker {
    pub(crate) exchanges: BTreeMap<String, ExchangeKind>,
    pub(crate) queues: BTreeSet<String>,
    pub(crate) bindings: BTreeSet<(String, String, String)>,
}

type Feed = mpsc::UnboundedSender<Result<Message, AmqpError>>;

#[derive(Default)]
struct ChannelInner {
    ops: Mutex<Vec<ChannelOp>>,
    broker: Mutex<Broker>,
    feeds: Mutex<Vec<Feed>>,
    outcomes: Mutex<Vec<(u64, Outcome)>>,
    auto_ack: AtomicBool,
    closed: AtomicBool,
    next_tag: AtomicU64,
    generated_queues: AtomicUsize,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    refuse_queues: Arc<AtomicBool>,
}

/// Channel double recording every operation, with a tiny broker model:
/// nacked-with-requeue deliveries come back on the consumer feed.
#[derive(Clone, Default)]
pub(crate) struct FakeChannel {
    inner: Arc<ChannelInner>,
}

impl FakeChannel {
    pub(crate) fn new() -> FakeChannel {
        FakeChannel::default()
    }

    pub(crate) fn ops(&self) -> Vec<ChannelOp> {
        self.inner.ops.lock().unwrap().clone()
    }

    pub(crate) fn broker(&self) -> Broker {
        self.inner.broker.lock().unwrap().clone()
    }

    pub(crate) fn outcomes(&self) -> Vec<(u64, Outcome)> {
        self.inner.outcomes.lock().unwrap().clone()
    }

    pub(crate) fn consumers(&self) -> usize {
        self.inner.feeds.lock().unwrap().len()
    }

    /// Number of publishes that started while another one was in flight.
    pub(crate) fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    pub(crate) fn published(&self) -> Vec<ChannelOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, ChannelOp::Publish(..)))
            .collect()
    }

    /// Pushes a delivery to the latest consumer. Returns its delivery tag.
    pub(crate) fn deliver(&self, body: &str) -> u64 {
        self.push(body, false)
    }

    /// Drops every consumer feed and fails further operations.
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.feeds.lock().unwrap().clear();
    }

    fn push(&self, body: &str, redelivered: bool) -> u64 {
        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1;

        let acker = (!self.inner.auto_ack.load(Ordering::SeqCst)).then(|| {
            Arc::new(FakeAcker {
                channel: self.clone(),
                tag,
                body: body.to_owned(),
            }) as Arc<dyn Acknowledger>
        });

        let msg = Message::from_delivery(
            &BasicProperties::default(),
            body.as_bytes().to_vec(),
            tag,
            redelivered,
            acker,
        );

        if let Some(feed) = self.inner.feeds.lock().unwrap().last() {
            let _ = feed.send(Ok(msg));
        }

        tag
    }

    fn record(&self, op: ChannelOp) {
        self.inner.ops.lock().unwrap().push(op);
    }

    fn ensure_open(&self) -> Result<(), AmqpError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AmqpError::ChannelError("channel closed".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn basic_qos(&self, qos: &PrefetchQos) -> Result<(), AmqpError> {
        self.ensure_open()?;
        self.record(ChannelOp::Qos(qos.count));
        Ok(())
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.ensure_open()?;
        self.record(ChannelOp::ExchangeDeclare(
            def.name().to_owned(),
            def.exchange_kind(),
        ));
        self.inner
            .broker
            .lock()
            .unwrap()
            .exchanges
            .insert(def.name().to_owned(), def.exchange_kind());
        Ok(())
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        self.ensure_open()?;
        if self.inner.refuse_queues.load(Ordering::SeqCst) {
            return Err(AmqpError::DeclareQueueError(format!(
                "{}: PRECONDITION_FAILED",
                def.name()
            )));
        }

        let name = if def.name().is_empty() {
            let n = self.inner.generated_queues.fetch_add(1, Ordering::SeqCst);
            format!("amq.gen-{n}")
        } else {
            def.name().to_owned()
        };

        self.record(ChannelOp::QueueDeclare(name.clone()));
        self.inner.broker.lock().unwrap().queues.insert(name.clone());
        Ok(name)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _args: FieldTable,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        self.record(ChannelOp::QueueBind(
            queue.to_owned(),
            routing_key.to_owned(),
            exchange.to_owned(),
        ));
        self.inner.broker.lock().unwrap().bindings.insert((
            queue.to_owned(),
            routing_key.to_owned(),
            exchange.to_owned(),
        ));
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        def: &ConsumerDefinition,
    ) -> Result<DeliveryStream, AmqpError> {
        self.ensure_open()?;
        self.record(ChannelOp::Consume(queue.to_owned(), def.name().to_owned()));
        self.inner.auto_ack.store(def.is_auto_ack(), Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.feeds.lock().unwrap().push(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _mandatory: bool,
        _immediate: bool,
        msg: &Message,
    ) -> Result<(), AmqpError> {
        if self.inner.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        let result = self.ensure_open().map(|_| {
            self.record(ChannelOp::Publish(
                exchange.to_owned(),
                routing_key.to_owned(),
                String::from_utf8_lossy(msg.body()).into_owned(),
            ))
        });

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map_err(|err| AmqpError::PublishingError(err.to_string()))
    }
}

struct FakeAcker {
    channel: FakeChannel,
    tag: u64,
    body: String,
}

impl FakeAcker {
    fn resolve(&self, outcome: Outcome) {
        self.channel
            .inner
            .outcomes
            .lock()
            .unwrap()
            .push((self.tag, outcome));
    }
}

#[async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.resolve(Outcome::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.resolve(Outcome::Nack { requeue });
        if requeue {
            self.channel.push(&self.body, true);
        }
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.resolve(Outcome::Reject { requeue });
        if requeue {
            self.channel.push(&self.body, true);
        }
        Ok(())
    }
}

struct ConnectionInner {
    channels: Mutex<Vec<FakeChannel>>,
    close_tx: Mutex<Option<oneshot::Sender<Option<AmqpError>>>>,
    channel_failures: Arc<AtomicUsize>,
    refuse_queues: Arc<AtomicBool>,
}

/// Connection double; the test decides when and how it closes.
#[derive(Clone)]
pub(crate) struct FakeConnection {
    inner: Arc<ConnectionInner>,
}

impl FakeConnection {
    /// Latest channel opened on this connection.
    pub(crate) fn channel(&self) -> FakeChannel {
        self.inner
            .channels
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no channel opened")
    }

    /// Closes the connection, reporting `err` to the close listener.
    pub(crate) fn close(&self, err: Option<AmqpError>) {
        for channel in self.inner.channels.lock().unwrap().iter() {
            channel.close();
        }
        if let Some(tx) = self.inner.close_tx.lock().unwrap().take() {
            let _ = tx.send(err);
        }
    }

    /// Simulates a network failure.
    pub(crate) fn lose(&self) {
        self.close(Some(AmqpError::ConnectionClosedError(
            "connection reset by peer".to_owned(),
        )));
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if take_one(&self.inner.channel_failures) {
            return Err(AmqpError::ChannelError("channel refused".to_owned()));
        }

        let channel = FakeChannel {
            inner: Arc::new(ChannelInner {
                refuse_queues: self.inner.refuse_queues.clone(),
                ..Default::default()
            }),
        };
        self.inner.channels.lock().unwrap().push(channel.clone());
        Ok(Arc::new(channel))
    }

    fn notify_close(&self) -> CloseNotification {
        let (tx, rx) = oneshot::channel();
        *self.inner.close_tx.lock().unwrap() = Some(tx);
        rx
    }
}

/// Transport double with scripted dial and channel failures.
#[derive(Default)]
pub(crate) struct FakeTransport {
    dial_failures: AtomicUsize,
    channel_failures: Arc<AtomicUsize>,
    refuse_queues: Arc<AtomicBool>,
    dials: Mutex<Vec<Instant>>,
    connections: Mutex<Vec<FakeConnection>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<FakeTransport> {
        Arc::new(FakeTransport::default())
    }

    pub(crate) fn fail_next_dials(&self, n: usize) {
        self.dial_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_channels(&self, n: usize) {
        self.channel_failures.store(n, Ordering::SeqCst);
    }

    /// Every queue declaration fails from now on, as with mismatched arguments.
    pub(crate) fn refuse_queue_declarations(&self) {
        self.refuse_queues.store(true, Ordering::SeqCst);
    }

    /// Instants of every dial attempt, failed ones included.
    pub(crate) fn dials(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().clone()
    }

    /// The `index`-th connection successfully dialed.
    pub(crate) fn connection(&self, index: usize) -> FakeConnection {
        self.connections.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn dial(
        &self,
        _uri: &str,
        _connection_name: Option<String>,
    ) -> Result<Arc<dyn TransportConnection>, AmqpError> {
        self.dials.lock().unwrap().push(Instant::now());

        if take_one(&self.dial_failures) {
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }

        let conn = FakeConnection {
            inner: Arc::new(ConnectionInner {
                channels: Mutex::new(vec![]),
                close_tx: Mutex::new(None),
                channel_failures: self.channel_failures.clone(),
                refuse_queues: self.refuse_queues.clone(),
            }),
        };
        self.connections.lock().unwrap().push(conn.clone());

        Ok(Arc::new(conn))
    }
}
