// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Seams
//!
//! The connection, publisher and subscriber never talk to lapin directly.
//! They go through these traits, which the `channel` module implements on top
//! of lapin and which tests replace with fakes.

use crate::{
    consumer::{ConsumerDefinition, PrefetchQos},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::Message,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::types::FieldTable;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Stream of deliveries for one consumer. It ends when the channel goes away.
pub type DeliveryStream = BoxStream<'static, Result<Message, AmqpError>>;

/// Receives the closure of a connection: `None` when the close was requested,
/// `Some(err)` when the connection was lost.
pub type CloseNotification = oneshot::Receiver<Option<AmqpError>>;

/// Dials the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(
        &self,
        uri: &str,
        connection_name: Option<String>,
    ) -> Result<Arc<dyn TransportConnection>, AmqpError>;
}

/// One live connection to the broker.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Returns a receiver fired once, on the first closure event of this connection.
    fn notify_close(&self) -> CloseNotification;
}

/// A channel over a connection; the unit on which declarations, consumes
/// and publishes happen.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn basic_qos(&self, qos: &PrefetchQos) -> Result<(), AmqpError>;

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares the queue and returns its name, as assigned by the broker.
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        def: &ConsumerDefinition,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        msg: &Message,
    ) -> Result<(), AmqpError>;
}

/// Resolves a single delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError>;
}
