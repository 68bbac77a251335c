// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! `Message` is both the outgoing publishing payload and the incoming
//! delivery handed to subscriber handlers. Incoming messages keep a handle to
//! their delivery so the handler can resolve them with Ack, Nack or Reject.
//! A delivery resolves at most once.

use crate::{errors::AmqpError, transport::Acknowledger};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::warn;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode for messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

#[derive(Default)]
pub struct Message {
    message_id: Option<String>,
    correlation_id: Option<String>,
    headers: FieldTable,
    content_type: Option<String>,
    content_encoding: Option<String>,
    body: Vec<u8>,
    delivery_mode: Option<u8>,
    priority: Option<u8>,
    reply_to: Option<String>,
    expiration: Option<Duration>,
    kind: Option<String>,
    user_id: Option<String>,
    app_id: Option<String>,
    timestamp: Option<u64>,
    delivery_tag: u64,
    redelivered: bool,
    acker: Option<Arc<dyn Acknowledger>>,
    resolved: AtomicBool,
}

impl Message {
    /// Creates an outgoing message with a random message id.
    pub fn new() -> Message {
        Message {
            message_id: Some(Uuid::new_v4().to_string()),
            ..Default::default()
        }
    }

    /// Builds an incoming message from the delivery properties and payload.
    ///
    /// Ids are kept as the broker sent them; nothing is parsed away.
    pub fn from_delivery(
        props: &BasicProperties,
        body: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Option<Arc<dyn Acknowledger>>,
    ) -> Message {
        let expiration = props.expiration().as_ref().and_then(|raw| {
            raw.as_str()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| warn!(expiration = raw.as_str(), "ignoring malformed expiration"))
                .ok()
        });

        Message {
            message_id: short_string(props.message_id()),
            correlation_id: short_string(props.correlation_id()),
            headers: props.headers().clone().unwrap_or_default(),
            content_type: short_string(props.content_type()),
            content_encoding: short_string(props.content_encoding()),
            body,
            delivery_mode: *props.delivery_mode(),
            priority: *props.priority(),
            reply_to: short_string(props.reply_to()),
            expiration,
            kind: short_string(props.kind()),
            user_id: short_string(props.user_id()),
            app_id: short_string(props.app_id()),
            timestamp: *props.timestamp(),
            delivery_tag,
            redelivered,
            acker,
            resolved: AtomicBool::new(false),
        }
    }

    /// AMQP properties used when publishing this message.
    pub fn properties(&self) -> BasicProperties {
        let mut props = BasicProperties::default().with_headers(self.headers.clone());

        if let Some(v) = &self.message_id {
            props = props.with_message_id(ShortString::from(v.as_str()));
        }
        if let Some(v) = &self.correlation_id {
            props = props.with_correlation_id(ShortString::from(v.as_str()));
        }
        if let Some(v) = &self.content_type {
            props = props.with_content_type(ShortString::from(v.as_str()));
        }
        if let Some(v) = &self.content_encoding {
            props = props.with_content_encoding(ShortString::from(v.as_str()));
        }
        if let Some(v) = self.delivery_mode {
            props = props.with_delivery_mode(v);
        }
        if let Some(v) = self.priority {
            props = props.with_priority(v);
        }
        if let Some(v) = &self.reply_to {
            props = props.with_reply_to(ShortString::from(v.as_str()));
        }
        if let Some(v) = self.expiration_millis() {
            props = props.with_expiration(ShortString::from(v));
        }
        if let Some(v) = &self.kind {
            props = props.with_type(ShortString::from(v.as_str()));
        }
        if let Some(v) = &self.user_id {
            props = props.with_user_id(ShortString::from(v.as_str()));
        }
        if let Some(v) = &self.app_id {
            props = props.with_app_id(ShortString::from(v.as_str()));
        }
        if let Some(v) = self.timestamp {
            props = props.with_timestamp(v);
        }

        props
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn set_message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_owned());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn set_correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_owned());
        self
    }

    pub fn header(&self, key: &str) -> Option<&AMQPValue> {
        self.headers.inner().get(key)
    }

    pub fn headers(&self) -> &FieldTable {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut FieldTable {
        &mut self.headers
    }

    pub fn set_header(mut self, key: &str, value: AMQPValue) -> Self {
        self.headers.insert(ShortString::from(key), value);
        self
    }

    pub fn set_headers(mut self, headers: FieldTable) -> Self {
        self.headers = headers;
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(mut self, v: &str) -> Self {
        self.content_type = Some(v.to_owned());
        self
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn set_content_encoding(mut self, v: &str) -> Self {
        self.content_encoding = Some(v.to_owned());
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the body and marks the content type as JSON.
    pub fn set_json_body<T: Serialize>(mut self, value: &T) -> Result<Self, AmqpError> {
        self.body =
            serde_json::to_vec(value).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))?;
        self.content_type = Some(JSON_CONTENT_TYPE.to_owned());
        Ok(self)
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_slice(&self.body).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
    }

    pub fn delivery_mode(&self) -> Option<u8> {
        self.delivery_mode
    }

    pub fn set_delivery_mode_persistent(mut self) -> Self {
        self.delivery_mode = Some(PERSISTENT_DELIVERY_MODE);
        self
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn set_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn set_reply_to(mut self, v: &str) -> Self {
        self.reply_to = Some(v.to_owned());
        self
    }

    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Sets the per-message TTL. Zero clears it.
    pub fn set_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = (!expiration.is_zero()).then_some(expiration);
        self
    }

    /// Expiration as sent on the wire: milliseconds, as a decimal string.
    pub fn expiration_millis(&self) -> Option<String> {
        self.expiration.map(|exp| exp.as_millis().to_string())
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn set_kind(mut self, v: &str) -> Self {
        self.kind = Some(v.to_owned());
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn set_user_id(mut self, v: &str) -> Self {
        self.user_id = Some(v.to_owned());
        self
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn set_app_id(mut self, v: &str) -> Self {
        self.app_id = Some(v.to_owned());
        self
    }

    /// Seconds since the unix epoch.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn set_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Whether the delivery was already acked, nacked or rejected.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub(crate) fn can_resolve(&self) -> bool {
        self.acker.is_some() && !self.is_resolved()
    }

    /// Acknowledges the delivery.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.claim()?.ack().await
    }

    /// Negative-acknowledges the delivery and asks the broker to requeue it.
    pub async fn nack(&self) -> Result<(), AmqpError> {
        self.claim()?.nack(true).await
    }

    /// Rejects the delivery without requeue.
    pub async fn reject(&self) -> Result<(), AmqpError> {
        self.claim()?.reject(false).await
    }

    fn claim(&self) -> Result<&Arc<dyn Acknowledger>, AmqpError> {
        let acker = self.acker.as_ref().ok_or(AmqpError::MissingDeliveryError)?;

        if self.resolved.swap(true, Ordering::AcqRel) {
            return Err(AmqpError::AlreadyResolved);
        }

        Ok(acker)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("correlation_id", &self.correlation_id)
            .field("kind", &self.kind)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

fn short_string(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}
