// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Transport over lapin
//!
//! Implements the transport seams with lapin: dialing, channel creation,
//! closure notification, declarations, consumption, publishing and
//! delivery acknowledgement.

use crate::{
    consumer::{ConsumerDefinition, PrefetchQos},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::Message,
    queue::QueueDefinition,
    transport::{
        Acknowledger, AmqpChannel, CloseNotification, DeliveryStream, Transport,
        TransportConnection,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use std::{fmt, sync::Arc};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Dials RabbitMQ with lapin.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinTransport;

#[async_trait]
impl Transport for LapinTransport {
    async fn dial(
        &self,
        uri: &str,
        connection_name: Option<String>,
    ) -> Result<Arc<dyn TransportConnection>, AmqpError> {
        debug!("creating amqp connection...");

        let mut options = ConnectionProperties::default();
        if let Some(name) = connection_name {
            options = options.with_connection_name(LongString::from(name));
        }

        match Connection::connect(uri, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(LapinConnection { conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

pub struct LapinConnection {
    conn: Connection,
}

#[async_trait]
impl TransportConnection for LapinConnection {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");

        match self.conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel { channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    /// lapin reports abnormal closures through the connection error
    /// callback; only the first one is forwarded.
    fn notify_close(&self) -> CloseNotification {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);

        self.conn.on_error(move |err| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(Some(AmqpError::ConnectionClosedError(err.to_string())));
            }
        });

        rx
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn basic_qos(&self, qos: &PrefetchQos) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(qos.count, BasicQosOptions { global: qos.global })
            .await
            .map_err(|err| AmqpError::QoSDeclarationError(err.to_string()))
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.params.clone()),
            )
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(format!("{}: {}", def.name, err)))
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        self.channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                def.args(),
            )
            .await
            .map(|queue| queue.name().to_string())
            .map_err(|err| AmqpError::DeclareQueueError(format!("{}: {}", def.name, err)))
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                args,
            )
            .await
            .map_err(|err| binding_error(exchange, queue, routing_key, &err))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        def: &ConsumerDefinition,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &def.name,
                BasicConsumeOptions {
                    no_local: def.no_local,
                    no_ack: def.auto_ack,
                    exclusive: def.exclusive,
                    nowait: def.no_wait,
                },
                def.args(),
            )
            .await
            .map_err(|err| AmqpError::BindingConsumerError(format!("{}: {}", def.name, err)))?;

        let auto_ack = def.auto_ack;

        Ok(consumer
            .map(move |result| {
                result
                    .map(|delivery| delivery_message(delivery, auto_ack))
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        msg: &Message,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory,
                    immediate,
                },
                msg.body(),
                msg.properties(),
            )
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::PublishingError(err.to_string()))
    }
}

fn binding_error(
    exchange: &str,
    queue: &str,
    routing_key: &str,
    reason: &dyn fmt::Display,
) -> AmqpError {
    error!(
        error = reason.to_string(),
        queue = queue,
        exchange = exchange,
        routing_key = routing_key,
        "error to bind queue"
    );
    AmqpError::BindingExchangeToQueueError(
        exchange.to_owned(),
        queue.to_owned(),
        reason.to_string(),
    )
}

/// Auto-ack deliveries get no acknowledger: the broker already settled them.
fn delivery_message(delivery: Delivery, auto_ack: bool) -> Message {
    let mut delivery = delivery;
    let data = std::mem::take(&mut delivery.data);

    let acker = (!auto_ack).then(|| {
        Arc::new(LapinAcknowledger {
            acker: delivery.acker.clone(),
        }) as Arc<dyn Acknowledger>
    });

    Message::from_delivery(
        &delivery.properties,
        data,
        delivery.delivery_tag,
        delivery.redelivered,
        acker,
    )
}

pub struct LapinAcknowledger {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for LapinAcknowledger {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                AmqpError::RejectMessageError
            })
    }
}
