// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! `AmqpError` covers every failure the link, the publisher and the subscriber
//! can report. Errors fall in two groups: transport errors, which the
//! connection absorbs into its reconnect loop, and topology/configuration
//! errors, which are never retried and are handed back to the caller.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// The connection was closed abnormally by the server or the network
    #[error("connection closed `{0}`")]
    ConnectionClosedError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange: exchange, queue, broker reason
    #[error("failure to bind queue `{1}` to exchange `{0}`: {2}")]
    BindingExchangeToQueueError(String, String, String),

    /// Error opening a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// The delivery was already acked, nacked or rejected
    #[error("message already resolved")]
    AlreadyResolved,

    /// The message carries no delivery handle (outgoing message or auto-ack consumer)
    #[error("message has no delivery to resolve")]
    MissingDeliveryError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error returned by a message handler
    #[error("handler failure `{0}`")]
    HandlerError(String),

    /// Error encoding or decoding a message payload
    #[error("failure to parse payload `{0}`")]
    ParsePayloadError(String),

    /// Invalid configuration values
    #[error("invalid configuration `{0}`")]
    ConfigError(String),
}

impl AmqpError {
    /// Reports whether the error stems from a misconfiguration that retrying
    /// can never fix.
    ///
    /// Fatal errors stop the subscriber; everything else is either absorbed
    /// by the reconnect loop or reported to the caller of a single operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AmqpError::QoSDeclarationError(_)
                | AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::BindingExchangeToQueueError(..)
                | AmqpError::BindingConsumerError(_)
                | AmqpError::ConfigError(_)
        )
    }
}
