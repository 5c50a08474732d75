//! Stream client implementation.
//!
//! Provides the main client for consuming real-time streams: one logical
//! connection multiplexing any number of group and item subscriptions,
//! re-established automatically across reconnects.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::types::{ConnectionState, SubscriptionKey};

use super::adapter::{SocketAdapter, TungsteniteAdapter};
use super::config::StreamConfig;
use super::connection;
use super::dispatcher::Dispatcher;
use super::error::StreamError;
use super::registry::SubscriptionRegistry;
use super::subscription::{GroupSubscription, ItemSubscription};

/// Capacity of the protocol error broadcast channel.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Client for Flowline real-time streams.
///
/// Connecting starts immediately on construction. Subscriptions taken while
/// the connection is still being established are announced as soon as it
/// opens, and re-announced after every reconnect, so consumers never have to
/// care about transport state. Dropping the client (or calling
/// [`close`](Self::close)) tears the connection down for good.
#[derive(Debug)]
pub struct FlowlineStreamClient {
    config: StreamConfig,
    registry: SubscriptionRegistry,
    state_rx: watch::Receiver<ConnectionState>,
    errors_tx: broadcast::Sender<StreamError>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlowlineStreamClient {
    /// Creates a client and starts connecting over the default WebSocket
    /// transport. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        Self::with_adapter(config, Arc::new(TungsteniteAdapter))
    }

    /// Creates a client with the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, StreamError> {
        Self::new(StreamConfig::new(url))
    }

    /// Creates a client over an injected transport adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_adapter(
        config: StreamConfig,
        adapter: Arc<dyn SocketAdapter>,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let registry = SubscriptionRegistry::new(outbound_tx);
        let (errors_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let dispatcher = Dispatcher::new(registry.clone(), errors_tx.clone());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = connection::spawn(
            config.clone(),
            adapter,
            registry.clone(),
            dispatcher,
            outbound_rx,
            state_tx,
            shutdown_rx,
        );

        Ok(Self {
            config,
            registry,
            state_rx,
            errors_tx,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Subscribes to the full live-updating collection under a grouping
    /// key. Handles for the same stream and group share one server
    /// subscription and one materialized collection.
    #[must_use]
    pub fn subscribe_group(
        &self,
        stream_name: impl Into<String>,
        group_key: impl Into<String>,
    ) -> GroupSubscription {
        let key = SubscriptionKey::group(stream_name, group_key);
        let handle = self.registry.acquire(key.clone());
        GroupSubscription::new(key, handle, self.registry.clone())
    }

    /// Subscribes to a single record within a group.
    #[must_use]
    pub fn subscribe_item(
        &self,
        stream_name: impl Into<String>,
        group_key: impl Into<String>,
        item_id: impl Into<String>,
    ) -> ItemSubscription {
        let key = SubscriptionKey::item(stream_name, group_key, item_id);
        let handle = self.registry.acquire(key.clone());
        ItemSubscription::new(key, handle, self.registry.clone())
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.registry.connection_state()
    }

    /// Returns a receiver that observes connection state changes, for
    /// consumers that surface connectivity in a UI.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Returns a receiver for protocol errors: malformed or unexpected
    /// inbound messages that were discarded. These never tear the
    /// connection down and are kept separate from data listeners.
    #[must_use]
    pub fn protocol_errors(&self) -> broadcast::Receiver<StreamError> {
        self.errors_tx.subscribe()
    }

    /// Closes the client: the transport is shut down, reconnecting stops,
    /// and every subscription is cleared. Terminal and idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
