//! Transport adapter for the stream client.
//!
//! The connection layer talks to the wire through [`SocketAdapter`], so the
//! platform binding is injected rather than hard-coded. An open transport is
//! handed out as a write half plus a read half, letting the connection task
//! send while it polls. The production implementation rides on
//! `tokio-tungstenite`; tests substitute a channel-backed mock.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::StreamError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An event surfaced by an open transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete text frame arrived.
    Message(String),

    /// The peer closed the transport.
    Closed {
        /// Close code, if the peer supplied one.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// The transport failed.
    Error(String),
}

/// Factory for physical transports.
///
/// An adapter carries no retry logic of its own; reconnecting is the
/// connection manager's responsibility.
#[async_trait]
pub trait SocketAdapter: Send + Sync {
    /// Opens a new transport to the given URL, returning its write and
    /// read halves.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be established.
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), StreamError>;
}

/// Write half of an open transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be transmitted.
    async fn send(&mut self, text: String) -> Result<(), StreamError>;

    /// Closes the transport gracefully.
    async fn close(&mut self);
}

/// Read half of an open transport.
#[async_trait]
pub trait TransportSource: Send {
    /// Waits for the next transport event. Returns `None` once the
    /// transport is exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Production adapter over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteAdapter;

#[async_trait]
impl SocketAdapter for TungsteniteAdapter {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), StreamError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        let (sink, source) = ws.split();
        Ok((
            Box::new(TungsteniteSink { sink }),
            Box::new(TungsteniteSource { source }),
        ))
    }
}

struct TungsteniteSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for TungsteniteSink {
    async fn send(&mut self, text: String) -> Result<(), StreamError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

struct TungsteniteSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl TransportSource for TungsteniteSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.source.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(TransportEvent::Message(text.to_string()));
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Some(TransportEvent::Closed { code, reason });
                }
                // Binary, ping and pong frames carry no stream events.
                Ok(_) => continue,
                Err(e) => return Some(TransportEvent::Error(e.to_string())),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockAdapter;
    use super::*;

    #[tokio::test]
    async fn test_mock_adapter_round_trip() {
        let (adapter, mut conns) = MockAdapter::with_connections(1);
        let mut conn = conns.remove(0);

        let (mut sink, mut source) = adapter.open("ws://mock").await.expect("open");
        sink.send("hello".to_string()).await.expect("send");
        assert_eq!(conn.sent.recv().await.as_deref(), Some("hello"));

        conn.inject
            .send(TransportEvent::Message("world".to_string()))
            .expect("inject");
        match source.next_event().await {
            Some(TransportEvent::Message(text)) => assert_eq!(text, "world"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_adapter_exhausted() {
        let (adapter, _conns) = MockAdapter::with_connections(0);
        assert!(adapter.open("ws://mock").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_source_ends_when_inject_dropped() {
        let (adapter, mut conns) = MockAdapter::with_connections(1);
        let conn = conns.remove(0);

        let (_sink, mut source) = adapter.open("ws://mock").await.expect("open");
        drop(conn.inject);
        assert!(source.next_event().await.is_none());
    }
}
