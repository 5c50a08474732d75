//! Core types shared across the SDK.
//!
//! Provides the record, scope, and connection-state types used by the
//! stream client.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single record in a stream.
///
/// Every record carries a server-assigned `id`; all remaining fields are
/// kept as raw JSON so a stream can carry any payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    /// Record identifier, unique within its group.
    pub id: String,

    /// Remaining payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StreamItem {
    /// Creates a new record with the given id and no payload fields.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Sets a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Returns a payload field by name.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Scope of a subscription within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The full live-updating collection under one grouping key.
    Group {
        /// Grouping key.
        group_key: String,
    },

    /// A single record within a group.
    Item {
        /// Grouping key.
        group_key: String,
        /// Record identifier.
        item_id: String,
    },
}

impl Scope {
    /// Creates a group scope.
    #[must_use]
    pub fn group(group_key: impl Into<String>) -> Self {
        Self::Group {
            group_key: group_key.into(),
        }
    }

    /// Creates an item scope.
    #[must_use]
    pub fn item(group_key: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self::Item {
            group_key: group_key.into(),
            item_id: item_id.into(),
        }
    }

    /// Returns the grouping key.
    #[must_use]
    pub fn group_key(&self) -> &str {
        match self {
            Self::Group { group_key } | Self::Item { group_key, .. } => group_key,
        }
    }

    /// Returns the record identifier for item scopes.
    #[must_use]
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::Group { .. } => None,
            Self::Item { item_id, .. } => Some(item_id),
        }
    }
}

/// Uniquely identifies a subscription: stream name plus scope.
///
/// Multiple consumer handles for the same key share one underlying server
/// subscription and one materialized state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Stream name.
    pub stream_name: String,

    /// Subscription scope.
    pub scope: Scope,
}

impl SubscriptionKey {
    /// Creates a group subscription key.
    #[must_use]
    pub fn group(stream_name: impl Into<String>, group_key: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            scope: Scope::group(group_key),
        }
    }

    /// Creates an item subscription key.
    #[must_use]
    pub fn item(
        stream_name: impl Into<String>,
        group_key: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            scope: Scope::item(group_key, item_id),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Group { group_key } => {
                write!(f, "{}:group:{}", self.stream_name, group_key)
            }
            Scope::Item { group_key, item_id } => {
                write!(f, "{}:group:{}:item:{}", self.stream_name, group_key, item_id)
            }
        }
    }
}

/// State of the logical stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,

    /// Connected; every live subscription has been announced.
    Open,

    /// Transport lost; a reconnect attempt is pending or in progress.
    Reconnecting,

    /// Terminal; the client was explicitly closed.
    Closed,
}

impl ConnectionState {
    /// Returns true if the connection is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if the client was explicitly closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
