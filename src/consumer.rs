// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! Consumer identity (name, prefetch, ack mode, exclusivity), the handler
//! contract, and the processing of a single delivery.
//!
//! Each delivery must end with exactly one of Ack, Nack (requeue) or Reject.
//! Handlers may resolve the message themselves; when they return without
//! doing so, the outcome is derived from the handler result: `Ok` acks,
//! `Err` nacks with requeue so the broker redelivers it.

use crate::{errors::AmqpError, message::Message, otel};
use async_trait::async_trait;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap, sync::Arc};
use tracing::{debug, error, warn};

/// In-flight handler limit used when the prefetch count is unbounded (0)
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// Channel prefetch: how many unacknowledged deliveries the broker grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchQos {
    pub count: u16,
    pub global: bool,
}

/// Handles the messages delivered to a subscriber.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message.
    ///
    /// `ctx` carries the trace context propagated by the publisher.
    async fn exec(&self, ctx: &Context, msg: &Message) -> Result<(), AmqpError>;
}

/// Consumer identity and delivery settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerDefinition {
    pub(crate) name: String,
    pub(crate) qos: PrefetchQos,
    pub(crate) auto_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_local: bool,
    pub(crate) no_wait: bool,
    pub(crate) max_concurrency: Option<usize>,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl ConsumerDefinition {
    /// Creates a consumer with manual acknowledgement and no prefetch limit.
    ///
    /// # Parameters
    /// * `name` - Consumer tag; empty to let the broker assign one
    ///
    /// # Returns
    /// A new ConsumerDefinition, refined with the builder methods
    pub fn new(name: &str) -> ConsumerDefinition {
        ConsumerDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qos(&self) -> PrefetchQos {
        self.qos
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Limits the unacknowledged deliveries the broker grants.
    ///
    /// The count also bounds the handlers running at once, unless
    /// [`ConsumerDefinition::max_concurrency`] is set.
    ///
    /// # Parameters
    /// * `count` - Prefetch count; 0 means unlimited
    pub fn prefetch(mut self, count: u16) -> Self {
        self.qos.count = count;
        self
    }

    /// Applies the prefetch to the whole channel instead of each consumer.
    pub fn global_prefetch(mut self) -> Self {
        self.qos.global = true;
        self
    }

    /// The broker considers messages acknowledged as soon as they are sent.
    pub fn auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn no_local(mut self) -> Self {
        self.no_local = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Overrides the number of handlers allowed to run at once.
    ///
    /// # Parameters
    /// * `max` - Handler limit, raised to 1 when 0
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    pub fn param(mut self, key: &str, value: AMQPValue) -> Self {
        self.params.insert(ShortString::from(key), value);
        self
    }

    pub(crate) fn args(&self) -> FieldTable {
        FieldTable::from(self.params.clone())
    }

    /// Number of handlers that may run concurrently: the explicit limit, else
    /// the prefetch count, else `DEFAULT_MAX_CONCURRENCY`.
    pub fn concurrency_limit(&self) -> usize {
        match (self.max_concurrency, self.qos.count) {
            (Some(max), _) => max,
            (None, 0) => DEFAULT_MAX_CONCURRENCY,
            (None, count) => count as usize,
        }
    }
}

/// Runs the handler for one delivery and applies its terminal outcome.
///
/// Returns the error of the ack/nack call, if any; handler errors are
/// turned into a requeue, not returned.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    msg: Message,
    handler: Arc<dyn MessageHandler>,
) -> Result<(), AmqpError> {
    let (ctx, mut span) = otel::new_span(&msg, tracer);

    debug!(
        tag = msg.delivery_tag(),
        kind = msg.kind().unwrap_or_default(),
        "received message"
    );

    let result = handler.exec(&ctx, &msg).await;

    match &result {
        Ok(_) => span.set_status(Status::Ok),
        Err(err) => {
            span.record_error(err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
        }
    }

    if !msg.can_resolve() {
        return Ok(());
    }

    match result {
        Ok(_) => {
            debug!("message successfully processed");
            msg.ack().await.map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                err
            })
        }
        Err(err) => {
            warn!(
                error = err.to_string(),
                "error whiling handling msg, requeuing for latter"
            );
            msg.nack().await.map_err(|err| {
                error!(error = err.to_string(), "error whiling requeuing");
                err
            })
        }
    }
}
