// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Sends messages to an exchange over the shared connection. The channel is
//! not safe for concurrent use, so publishes are serialized behind a lock.
//! A publish issued while the connection is being recovered waits for the
//! new channel. There is no buffering and no retry: a publish that fails on
//! the channel is reported to the caller, who may retry.

use crate::{connection::RabbitMQConnection, errors::AmqpError, message::Message, otel};
use opentelemetry::Context;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Where and how a message is published.
///
/// Built from an exchange name, then refined with the builder methods:
///
/// ```
/// use rabbitmq_resilient::publisher::PublishOptions;
///
/// let options = PublishOptions::new("orders").routing_key("order.created").mandatory();
/// assert_eq!(options.routing_key, "order.created");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl PublishOptions {
    /// Creates options publishing to `exchange` with an empty routing key.
    ///
    /// # Parameters
    /// * `exchange` - Exchange name; empty for the default exchange
    pub fn new(exchange: &str) -> PublishOptions {
        PublishOptions {
            exchange: exchange.to_owned(),
            ..Default::default()
        }
    }

    /// Sets the routing key used by direct and topic exchanges.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    /// Asks the broker to return the message when no queue is bound.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Asks the broker to return the message when no consumer can take it
    /// right away. RabbitMQ 3.x refuses this flag.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

pub struct RabbitMQPublisher {
    conn: Arc<RabbitMQConnection>,
    guard: Mutex<()>,
}

impl RabbitMQPublisher {
    /// Creates a publisher over a (possibly shared) connection.
    ///
    /// The publisher keeps no broker-side state, so it registers no reconnect hook.
    pub fn new(conn: Arc<RabbitMQConnection>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher {
            conn,
            guard: Mutex::new(()),
        })
    }

    /// Publishes `msg` to `exchange`, with an empty routing key when none is given.
    ///
    /// While the connection is being recovered the call waits for the new
    /// channel. The reconnect retries forever, so during an outage that never
    /// ends the call never returns; wrap it in `tokio::time::timeout` when the
    /// caller needs a bound.
    ///
    /// # Parameters
    /// * `msg` - Message to publish
    /// * `exchange` - Target exchange
    /// * `routing_key` - Routing key, `None` for an empty one
    ///
    /// # Returns
    /// Ok(()) once the channel accepted the message, or the publish error as is
    pub async fn publish(
        &self,
        msg: Message,
        exchange: &str,
        routing_key: Option<&str>,
    ) -> Result<(), AmqpError> {
        let options = PublishOptions::new(exchange).routing_key(routing_key.unwrap_or_default());
        self.publish_with(&options, msg).await
    }

    /// Publishes `msg` with explicit options.
    ///
    /// The current OpenTelemetry context is injected into the message headers.
    /// Blocks during a reconnect, like [`RabbitMQPublisher::publish`].
    ///
    /// # Parameters
    /// * `options` - Exchange, routing key and delivery flags
    /// * `msg` - Message to publish
    ///
    /// # Returns
    /// Ok(()) once the channel accepted the message, or the publish error as is
    pub async fn publish_with(
        &self,
        options: &PublishOptions,
        mut msg: Message,
    ) -> Result<(), AmqpError> {
        otel::inject_context(&Context::current(), &mut msg);

        let _guard = self.guard.lock().await;
        let channel = self.conn.channel().await;

        match channel
            .basic_publish(
                &options.exchange,
                &options.routing_key,
                options.mandatory,
                options.immediate,
                &msg,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = options.exchange.as_str(),
                    "error publishing message"
                );
                Err(err)
            }
            _ => {
                debug!(
                    exchange = options.exchange.as_str(),
                    key = options.routing_key.as_str(),
                    "message published"
                );
                Ok(())
            }
        }
    }
}
