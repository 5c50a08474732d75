//! Flowline SDK - Rust client library for Flowline real-time streams.
//!
//! This crate provides a typed publish/subscribe stream client: one logical
//! WebSocket connection per server that multiplexes any number of
//! collection ("group") and single-record ("item") subscriptions, delivers
//! ordered snapshots and deltas to listeners, and transparently survives
//! transport loss by reconnecting and replaying every live subscription.
//!
//! # Core Types
//!
//! - [`FlowlineStreamClient`] — the client facade; one per server endpoint
//! - [`GroupSubscription`], [`ItemSubscription`] — per-consumer handles
//! - [`GroupUpdate`], [`ItemUpdate`] — listener notifications
//! - [`StreamItem`] — a record: an `id` plus arbitrary JSON fields
//! - [`StreamConfig`] — connection and reconnect configuration
//! - [`Uploader`] — presigned URL upload with progress reporting
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use flowline_sdk::StreamConfig;
//!
//! let config = StreamConfig::new("wss://streams.flowline.example/v1/stream")
//!     .with_reconnect_delay(Duration::from_secs(1))
//!     .with_max_reconnect_delay(Duration::from_secs(30));
//! assert!(config.validate().is_ok());
//! ```

pub mod stream;
pub mod types;
pub mod upload;

pub use stream::{
    ClientMessage, EventKind, FlowlineStreamClient, GroupSubscription, GroupUpdate,
    ItemSubscription, ItemUpdate, ServerEvent, SocketAdapter, StreamConfig, StreamError,
    TungsteniteAdapter,
};
pub use types::{ConnectionState, Scope, StreamItem, SubscriptionKey};
pub use upload::{UploadError, Uploader};
