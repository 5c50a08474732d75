//! Connection management.
//!
//! Maintains one logical connection on top of a sequence of physical
//! transports. On every (re)connect the registry's live subscriptions are
//! replayed, in creation order, before the connection is reported open; on
//! transport loss the task backs off and retries until the client is
//! explicitly closed.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::ConnectionState;

use super::adapter::{SocketAdapter, TransportEvent, TransportSink};
use super::config::StreamConfig;
use super::dispatcher::Dispatcher;
use super::messages::ClientMessage;
use super::registry::SubscriptionRegistry;

/// Capped exponential backoff with optional full jitter.
///
/// The delay starts at the configured initial value, doubles after every
/// failed attempt up to the cap, and resets once a connection opens. With
/// jitter enabled the actual delay is drawn uniformly from zero to the
/// current value, spreading reconnecting clients out instead of having them
/// stampede the server together.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: bool,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            initial,
            max,
            jitter,
            current: initial,
        }
    }

    /// Returns the delay to sleep before the next attempt and advances the
    /// schedule.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        if self.jitter {
            let millis = base.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            base
        }
    }

    /// Resets the schedule after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Spawns the connection task.
pub(crate) fn spawn(
    config: StreamConfig,
    adapter: Arc<dyn SocketAdapter>,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(
        config, adapter, registry, dispatcher, outbound, state_tx, shutdown,
    ))
}

async fn run(
    config: StreamConfig,
    adapter: Arc<dyn SocketAdapter>,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(
        config.reconnect_delay,
        config.max_reconnect_delay,
        config.jitter,
    );
    let mut attempt: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let state = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        registry.set_state(state);
        let _ = state_tx.send(state);
        attempt += 1;

        debug!("connecting to {}", config.url);
        let opened = tokio::select! {
            opened = adapter.open(&config.url) => opened,
            _ = wait_shutdown(&mut shutdown) => break,
        };

        let (mut sink, mut source) = match opened {
            Ok(halves) => halves,
            Err(e) => {
                debug!("connect failed: {}", e);
                registry.set_state(ConnectionState::Reconnecting);
                let _ = state_tx.send(ConnectionState::Reconnecting);
                if sleep_or_shutdown(&mut backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        // Control messages queued against a dead transport are stale; the
        // registry replay below carries everything that still matters.
        while outbound.try_recv().is_ok() {}

        let replay = registry.begin_replay();
        if !replay.is_empty() {
            info!("replaying {} subscriptions", replay.len());
        }

        let mut lost = false;
        for message in replay {
            if send_message(&mut sink, &message).await.is_err() {
                lost = true;
                break;
            }
        }
        if !lost {
            // Subscriptions acquired while replay was in flight; flushed
            // before anything queued after the open flip.
            for message in registry.finish_replay() {
                if send_message(&mut sink, &message).await.is_err() {
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            registry.mark_disconnected();
            if sleep_or_shutdown(&mut backoff, &mut shutdown).await {
                break;
            }
            continue;
        }

        let _ = state_tx.send(ConnectionState::Open);
        info!("stream connection open");
        backoff.reset();

        loop {
            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => {
                    sink.close().await;
                    finish_closed(&registry, &state_tx);
                    return;
                }
                message = outbound.recv() => match message {
                    Some(message) => {
                        if send_message(&mut sink, &message).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        sink.close().await;
                        finish_closed(&registry, &state_tx);
                        return;
                    }
                },
                event = source.next_event() => match event {
                    Some(TransportEvent::Message(text)) => dispatcher.dispatch(&text),
                    Some(TransportEvent::Closed { code, reason }) => {
                        warn!(
                            "stream connection closed by peer (code {:?}): {}",
                            code, reason
                        );
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("stream transport error: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }

        registry.mark_disconnected();
        let _ = state_tx.send(ConnectionState::Reconnecting);
        warn!("stream connection lost, reconnecting");

        if sleep_or_shutdown(&mut backoff, &mut shutdown).await {
            break;
        }
    }

    finish_closed(&registry, &state_tx);
}

async fn send_message(
    sink: &mut Box<dyn TransportSink>,
    message: &ClientMessage,
) -> Result<(), super::error::StreamError> {
    match serde_json::to_string(message) {
        Ok(text) => sink.send(text).await,
        Err(e) => {
            warn!("dropping unserializable control message: {}", e);
            Ok(())
        }
    }
}

/// Resolves once the client is told to shut down, either explicitly or by
/// the client handle being dropped.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_or_shutdown(backoff: &mut Backoff, shutdown: &mut watch::Receiver<bool>) -> bool {
    let delay = backoff.next_delay();
    debug!("reconnecting in {:?}", delay);
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        _ = wait_shutdown(shutdown) => true,
    }
}

fn finish_closed(registry: &SubscriptionRegistry, state_tx: &watch::Sender<ConnectionState>) {
    registry.set_closed();
    let _ = state_tx.send(ConnectionState::Closed);
}
