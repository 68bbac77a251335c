// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriber Topology
//!
//! Everything the broker must know about before a subscriber consumes: the
//! channel prefetch, the exchanges, the queue, and one binding per exchange.
//!
//! Installing is idempotent. AMQP declarations with identical arguments are
//! no-ops on the broker and binding twice with the same key adds nothing, so
//! the subscriber simply reinstalls the whole topology on every reconnect.

use crate::{
    consumer::PrefetchQos,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::QueueDefinition,
    transport::AmqpChannel,
};
use lapin::types::FieldTable;
use tracing::{debug, error};

/// Topology required by one subscriber.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriberTopology {
    pub(crate) qos: PrefetchQos,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queue: QueueDefinition,
}

impl SubscriberTopology {
    pub fn new(queue: QueueDefinition) -> SubscriberTopology {
        SubscriberTopology {
            queue,
            ..Default::default()
        }
    }

    pub fn qos(mut self, qos: PrefetchQos) -> Self {
        self.qos = qos;
        self
    }

    /// Adds an exchange; the queue will be bound to it with the exchange's routing key.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    pub fn exchanges(&self) -> &[ExchangeDefinition] {
        &self.exchanges
    }

    /// Installs the topology on `channel`.
    ///
    /// Steps, in order: prefetch, exchanges, queue, bindings. The first
    /// failure aborts the install. Returns the declared queue name, which
    /// differs from the configured one for server-named queues.
    pub async fn install(&self, channel: &dyn AmqpChannel) -> Result<String, AmqpError> {
        self.install_qos(channel).await?;
        self.install_exchanges(channel).await?;
        let queue_name = self.install_queue(channel).await?;
        self.binding_queue(channel, &queue_name).await?;

        Ok(queue_name)
    }

    async fn install_qos(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        debug!(count = self.qos.count, "configuring qos");

        channel.basic_qos(&self.qos).await.map_err(|err| {
            error!(error = err.to_string(), "error to configure qos");
            err
        })
    }

    async fn install_exchanges(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            if let Err(err) = channel.exchange_declare(exch).await {
                error!(
                    error = err.to_string(),
                    name = exch.name.as_str(),
                    "error to declare the exchange"
                );
                return Err(err);
            }

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self, channel: &dyn AmqpChannel) -> Result<String, AmqpError> {
        debug!("creating queue: {}", self.queue.name);

        match channel.queue_declare(&self.queue).await {
            Ok(name) => {
                debug!("queue: {} was created", name);
                Ok(name)
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = self.queue.name.as_str(),
                    "error to declare the queue"
                );
                Err(err)
            }
        }
    }

    async fn binding_queue(
        &self,
        channel: &dyn AmqpChannel,
        queue_name: &str,
    ) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                queue_name, exch.name, exch.routing_key
            );

            if let Err(err) = channel
                .queue_bind(
                    queue_name,
                    &exch.name,
                    &exch.routing_key,
                    FieldTable::from(exch.binding_params.clone()),
                )
                .await
            {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(err);
            }
        }

        debug!("queue was bound");

        Ok(())
    }
}
