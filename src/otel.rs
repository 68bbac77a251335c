// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels in the message headers: the publisher injects the
//! current context, the subscriber extracts it and opens a consumer span per
//! delivery.

use crate::message::Message;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;
use tracing::error;

/// Name of the span opened for deliveries without a message type
const UNTYPED_MESSAGE_SPAN: &str = "amqp message";

/// Writes trace context entries into outgoing message headers.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut FieldTable,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut FieldTable) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            ShortString::from(key.to_lowercase()),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// Reads trace context entries from incoming message headers.
pub(crate) struct HeaderExtractor<'a> {
    headers: &'a FieldTable,
}

impl<'a> HeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a FieldTable) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    /// Only long string headers can carry trace context.
    fn get(&self, key: &str) -> Option<&str> {
        match self.headers.inner().get(key) {
            Some(AMQPValue::LongString(value)) => std::str::from_utf8(value.as_bytes())
                .map_err(|e| error!("Error decoding header value {:?}", e))
                .ok(),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.inner().keys().map(|key| key.as_str()).collect()
    }
}

/// Injects `ctx` into the headers of an outgoing message.
pub(crate) fn inject_context(ctx: &Context, msg: &mut Message) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector::new(msg.headers_mut()))
    });
}

/// Extracts the publisher's context from `msg` and opens a consumer span
/// named after the message type.
pub(crate) fn new_span(msg: &Message, tracer: &BoxedTracer) -> (Context, BoxedSpan) {
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(msg.headers()))
    });

    let name = msg.kind().unwrap_or(UNTYPED_MESSAGE_SPAN).to_owned();

    let span = tracer
        .span_builder(Cow::from(name))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
