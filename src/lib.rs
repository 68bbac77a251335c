// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! RabbitMQ publisher and subscriber over a self-healing connection.
//!
//! A [`connection::RabbitMQConnection`] is shared by any number of
//! [`publisher::RabbitMQPublisher`]s and [`subscriber::RabbitMQSubscriber`]s.
//! When the broker connection drops it is reopened with exponential backoff
//! and every subscriber reinstalls its topology before consuming again.

mod otel;

pub mod backoff;
pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod subscriber;
pub mod topology;
pub mod transport;

#[cfg(test)]
mod testing;
