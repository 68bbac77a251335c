// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Resilient AMQP Connection
//!
//! `RabbitMQConnection` owns one transport connection and one channel, shared
//! by publishers and subscribers. When the connection is lost it reconnects
//! in the background with an exponential backoff and then runs the registered
//! reconnect hooks, so dependents can rebuild their broker-side state on the
//! new channel.
//!
//! Failure detection uses two tasks per connection generation: the first
//! waits for the transport closure and hands the event over a single-slot
//! channel, the second receives it and drives the reconnection. A requested
//! (error-free) closure never triggers a reconnect.
//!
//! While a reconnect is in progress the link state is write-locked: callers
//! of [`RabbitMQConnection::channel`] wait until the new channel is open and
//! every hook has completed.

use crate::{
    backoff::Backoff,
    channel::LapinTransport,
    config::ConnectionOptions,
    errors::AmqpError,
    transport::{AmqpChannel, Transport, TransportConnection},
};
use futures_util::{future::BoxFuture, FutureExt};
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::{mpsc, RwLock, RwLockReadGuard};
use tracing::{debug, error, warn};

/// Callback run after every successful reconnect, in registration order.
///
/// Hooks receive the freshly opened channel. They run while the link is
/// still locked, so they must use that channel and never call
/// [`RabbitMQConnection::channel`].
pub type ReconnectHook =
    Arc<dyn Fn(Arc<dyn AmqpChannel>) -> BoxFuture<'static, Result<(), AmqpError>> + Send + Sync>;

/// Wraps an async closure into a [`ReconnectHook`].
pub fn reconnect_hook<F, Fut>(hook: F) -> ReconnectHook
where
    F: Fn(Arc<dyn AmqpChannel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
{
    Arc::new(move |channel: Arc<dyn AmqpChannel>| hook(channel).boxed())
}

struct LinkState {
    connection: Arc<dyn TransportConnection>,
    channel: Arc<dyn AmqpChannel>,
    generation: u64,
}

/// The current channel, pinned: no reconnect can swap it or run hooks
/// until the lease is dropped.
pub struct ChannelLease<'a> {
    state: RwLockReadGuard<'a, LinkState>,
}

impl ChannelLease<'_> {
    pub fn channel(&self) -> Arc<dyn AmqpChannel> {
        self.state.channel.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }
}

pub struct RabbitMQConnection {
    options: ConnectionOptions,
    transport: Arc<dyn Transport>,
    state: RwLock<LinkState>,
    backoff: Mutex<Backoff>,
    hooks: Mutex<Vec<ReconnectHook>>,
}

impl RabbitMQConnection {
    /// Connects to RabbitMQ with lapin.
    ///
    /// The first connection is not retried: an unreachable broker at startup
    /// is reported to the caller.
    pub async fn connect(options: ConnectionOptions) -> Result<Arc<RabbitMQConnection>, AmqpError> {
        Self::connect_with(options, Arc::new(LapinTransport)).await
    }

    /// Connects through the given transport.
    ///
    /// # Parameters
    /// * `options` - Broker URI, connection name and backoff bounds
    /// * `transport` - Transport used to dial, now and on every reconnect
    ///
    /// # Returns
    /// The connected link, already watching for connection loss
    pub async fn connect_with(
        options: ConnectionOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<RabbitMQConnection>, AmqpError> {
        let (connection, channel) = open(transport.as_ref(), &options).await?;

        let link = Arc::new(RabbitMQConnection {
            backoff: Mutex::new(Backoff::from(&options)),
            options,
            transport,
            state: RwLock::new(LinkState {
                connection: connection.clone(),
                channel,
                generation: 1,
            }),
            hooks: Mutex::new(vec![]),
        });

        link.watch(connection);

        Ok(link)
    }

    /// Current channel. Waits while a reconnect is in progress.
    ///
    /// Do not keep the returned handle across a reconnect; fetch it again.
    pub async fn channel(&self) -> Arc<dyn AmqpChannel> {
        self.state.read().await.channel.clone()
    }

    /// Leases the current channel, holding reconnects off while the lease lives.
    ///
    /// Waits while a reconnect is in progress, so the leased channel is always
    /// the one every registered hook has already run on. Registering a hook
    /// while holding the lease guarantees the hook sees every later reconnect
    /// and none before it.
    ///
    /// # Returns
    /// A [`ChannelLease`] over the current channel and its generation
    pub async fn lease_channel(&self) -> ChannelLease<'_> {
        ChannelLease {
            state: self.state.read().await,
        }
    }

    /// Current transport connection. Waits while a reconnect is in progress.
    pub async fn connection(&self) -> Arc<dyn TransportConnection> {
        self.state.read().await.connection.clone()
    }

    /// Number of connections established so far, the initial one included.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Interval the next reconnect attempt will wait for.
    pub fn current_backoff(&self) -> Duration {
        self.lock_backoff().current()
    }

    /// Replaces the registered hooks.
    pub fn set_reconnect_hooks(&self, hooks: Vec<ReconnectHook>) {
        *self.lock_hooks() = hooks;
    }

    /// Appends a hook, keeping the ones already registered.
    pub fn add_reconnect_hook(&self, hook: ReconnectHook) {
        self.lock_hooks().push(hook);
    }

    fn lock_backoff(&self) -> MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Vec<ReconnectHook>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arms failure detection for `connection`.
    fn watch(self: &Arc<Self>, connection: Arc<dyn TransportConnection>) {
        let notification = connection.notify_close();
        let (handoff_tx, mut handoff_rx) = mpsc::channel::<Option<AmqpError>>(1);

        tokio::spawn(async move {
            // a dropped notifier means the connection went away without an error
            let event = notification.await.unwrap_or(None);
            let _ = handoff_tx.send(event).await;
        });

        let link = Arc::clone(self);
        tokio::spawn(async move {
            match handoff_rx.recv().await {
                Some(Some(err)) => {
                    warn!(error = err.to_string(), "amqp connection lost, reconnecting");
                    link.reconnect().await;
                }
                _ => debug!("amqp connection closed"),
            }
        });
    }

    async fn reconnect(self: &Arc<Self>) {
        let mut state = self.state.write().await;

        let (connection, channel) = loop {
            let interval = self.current_backoff();
            debug!(
                backoff_ms = interval.as_millis() as u64,
                "waiting before reconnecting"
            );
            tokio::time::sleep(interval).await;

            match open(self.transport.as_ref(), &self.options).await {
                Ok(opened) => break opened,
                Err(err) => {
                    error!(error = err.to_string(), "failure to reconnect");
                    self.lock_backoff().increase();
                }
            }
        };

        self.lock_backoff().reset();

        state.connection = connection.clone();
        state.channel = channel.clone();
        state.generation += 1;

        debug!(generation = state.generation, "amqp reconnected");

        let hooks = self.lock_hooks().clone();
        for hook in hooks {
            if let Err(err) = hook(channel.clone()).await {
                error!(error = err.to_string(), "reconnect hook failure");
            }
        }

        drop(state);

        self.watch(connection);
    }
}

/// Dials and opens the operational channel.
async fn open(
    transport: &dyn Transport,
    options: &ConnectionOptions,
) -> Result<(Arc<dyn TransportConnection>, Arc<dyn AmqpChannel>), AmqpError> {
    let connection = transport
        .dial(&options.uri, options.connection_name.clone())
        .await?;
    let channel = connection.open_channel().await?;

    Ok((connection, channel))
}
