//! Real-time stream client.
//!
//! This module provides the WebSocket client for consuming Flowline
//! real-time streams: collection ("group") feeds and single-record ("item")
//! feeds multiplexed over one logical connection that survives transport
//! loss by reconnecting and replaying every live subscription.
//!
//! # Example
//!
//! ```rust,ignore
//! use flowline_sdk::stream::{FlowlineStreamClient, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlowlineStreamClient::with_url("wss://streams.flowline.example/v1/stream")?;
//!
//!     // Subscribe to a live collection.
//!     let logs = client.subscribe_group("logs", "default");
//!     logs.add_listener(|update| {
//!         println!("logs changed: {:?}", update);
//!     });
//!
//!     // Subscriptions survive reconnects; dispose when done.
//!     tokio::signal::ctrl_c().await?;
//!     logs.dispose();
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod client;
pub mod config;
mod connection;
mod dispatcher;
pub mod error;
pub mod messages;
mod registry;
pub mod subscription;

pub use adapter::{SocketAdapter, TransportEvent, TransportSink, TransportSource, TungsteniteAdapter};
pub use client::FlowlineStreamClient;
pub use config::StreamConfig;
pub use error::StreamError;
pub use messages::{ClientMessage, EventKind, ServerEvent};
pub use subscription::{
    GroupSubscription, GroupUpdate, HandleId, ItemSubscription, ItemUpdate, ListenerId,
};
