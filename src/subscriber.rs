// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Subscriber
//!
//! Installs a [`SubscriberTopology`], consumes its queue and dispatches every
//! delivery to a [`MessageHandler`] on its own task.
//!
//! The subscriber registers a reconnect hook on the connection. After every
//! reconnect the hook reinstalls the topology on the new channel and opens a
//! new delivery feed, which it hands to the subscribe loop. Deliveries that
//! were in flight on the lost channel are requeued by the broker.

use crate::{
    connection::{reconnect_hook, RabbitMQConnection, ReconnectHook},
    consumer::{consume, ConsumerDefinition, MessageHandler, PrefetchQos},
    errors::AmqpError,
    topology::SubscriberTopology,
    transport::{AmqpChannel, DeliveryStream},
};
use futures_util::StreamExt;
use opentelemetry::global;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

type FeedResult = Result<DeliveryStream, AmqpError>;

pub struct RabbitMQSubscriber {
    conn: Arc<RabbitMQConnection>,
    topology: SubscriberTopology,
    consumer: ConsumerDefinition,
    subscribed: AtomicBool,
}

impl RabbitMQSubscriber {
    /// Creates a subscriber. The consumer prefetch, when set, is the one
    /// applied to the channel.
    ///
    /// # Parameters
    /// * `conn` - Connection, possibly shared with publishers
    /// * `topology` - Exchanges, queue and bindings to install
    /// * `consumer` - Consumer identity and delivery settings
    ///
    /// # Returns
    /// The subscriber, ready for [`RabbitMQSubscriber::subscribe`]
    pub fn new(
        conn: Arc<RabbitMQConnection>,
        topology: SubscriberTopology,
        consumer: ConsumerDefinition,
    ) -> Arc<RabbitMQSubscriber> {
        let topology = if consumer.qos() != PrefetchQos::default() {
            topology.qos(consumer.qos())
        } else {
            topology
        };

        Arc::new(RabbitMQSubscriber {
            conn,
            topology,
            consumer,
            subscribed: AtomicBool::new(false),
        })
    }

    pub fn topology(&self) -> &SubscriberTopology {
        &self.topology
    }

    pub fn consumer(&self) -> &ConsumerDefinition {
        &self.consumer
    }

    /// Installs the topology and consumes until the process exits.
    ///
    /// The first setup runs on a leased channel and the reconnect hook is
    /// registered under that same lease, so no reconnect can open a second
    /// consumer for this subscriber. A transport failure during the first
    /// setup is absorbed: the subscription starts on the next reconnect.
    ///
    /// # Parameters
    /// * `handler` - Handler run for every delivery, each on its own task
    ///
    /// # Returns
    /// Only returns on error: a topology failure (initially or after a
    /// reconnect), a consumer that cannot be started, or a second call.
    /// Once it has returned, the subscriber stops reacting to reconnects.
    pub async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<(), AmqpError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(AmqpError::ConsumerError(format!(
                "{} is already subscribed",
                self.consumer.name()
            )));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let result = self.run(handler, &closed).await;
        closed.store(true, Ordering::SeqCst);

        result
    }

    async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        closed: &Arc<AtomicBool>,
    ) -> Result<(), AmqpError> {
        let (feeds_tx, mut feeds_rx) = mpsc::channel::<FeedResult>(1);

        let initial = {
            let lease = self.conn.lease_channel().await;
            let opened = open_feed(&self.topology, &self.consumer, lease.channel().as_ref()).await;

            match &opened {
                Err(err) if err.is_fatal() => {}
                _ => self
                    .conn
                    .add_reconnect_hook(self.resubscribe_hook(feeds_tx, closed.clone())),
            }

            opened
        };

        let mut feed = match initial {
            Ok(feed) => Some(feed),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    "failure to subscribe, waiting for the next reconnect"
                );
                None
            }
        };

        let limiter = Arc::new(Semaphore::new(self.consumer.concurrency_limit()));

        loop {
            if let Some(feed) = feed.take() {
                self.dispatch(feed, &handler, &limiter).await;

                warn!(
                    consumer = self.consumer.name(),
                    "delivery feed closed, waiting for the connection to recover"
                );
            }

            match feeds_rx.recv().await {
                Some(Ok(next)) => {
                    debug!(consumer = self.consumer.name(), "consuming again");
                    feed = Some(next);
                }
                Some(Err(err)) if err.is_fatal() => {
                    error!(error = err.to_string(), "failure to resubscribe");
                    return Err(err);
                }
                Some(Err(err)) => warn!(
                    error = err.to_string(),
                    "failure to resubscribe, waiting for the next reconnect"
                ),
                None => return Err(AmqpError::InternalError),
            }
        }
    }

    /// Hook reinstalling the topology and handing a fresh feed to the
    /// subscribe loop. Inert once `closed` is set.
    fn resubscribe_hook(
        &self,
        feeds: mpsc::Sender<FeedResult>,
        closed: Arc<AtomicBool>,
    ) -> ReconnectHook {
        let topology = self.topology.clone();
        let consumer = self.consumer.clone();

        reconnect_hook(move |channel: Arc<dyn AmqpChannel>| {
            let topology = topology.clone();
            let consumer = consumer.clone();
            let feeds = feeds.clone();
            let closed = closed.clone();

            async move {
                if closed.load(Ordering::SeqCst) {
                    return Ok(());
                }

                let opened = open_feed(&topology, &consumer, channel.as_ref()).await;
                let outcome = opened.as_ref().map(|_| ()).map_err(|err| err.clone());

                if feeds.send(opened).await.is_err() {
                    warn!("subscriber is gone, dropping the new delivery feed");
                }

                outcome
            }
        })
    }

    /// Reads `feed` until it ends, running the handler for every delivery.
    async fn dispatch(
        &self,
        mut feed: DeliveryStream,
        handler: &Arc<dyn MessageHandler>,
        limiter: &Arc<Semaphore>,
    ) {
        while let Some(item) = feed.next().await {
            let msg = match item {
                Ok(msg) => msg,
                Err(err) => {
                    error!(error = err.to_string(), "error receiving delivery");
                    continue;
                }
            };

            let Ok(permit) = limiter.clone().acquire_owned().await else {
                error!("dispatch limiter closed");
                return;
            };

            let handler = handler.clone();
            tokio::spawn(async move {
                let tracer = global::tracer("amqp consumer");
                if let Err(err) = consume(&tracer, msg, handler).await {
                    error!(error = err.to_string(), "failure to resolve the delivery");
                }
                drop(permit);
            });
        }
    }
}

/// Installs the topology on `channel` and starts consuming the queue.
async fn open_feed(
    topology: &SubscriberTopology,
    consumer: &ConsumerDefinition,
    channel: &dyn AmqpChannel,
) -> FeedResult {
    let queue = topology.install(channel).await?;

    debug!(
        queue = queue.as_str(),
        consumer = consumer.name(),
        "starting consumer"
    );

    channel.basic_consume(&queue, consumer).await.map_err(|err| {
        error!(error = err.to_string(), "error to start the consumer");
        err
    })
}
