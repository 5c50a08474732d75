//! Stream wire message types.
//!
//! Defines the JSON envelopes exchanged with the stream server.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Scope, SubscriptionKey};

/// Kind of an inbound stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Full replacement of a group collection or an item record.
    Snapshot,
    /// A record was added to a group.
    Create,
    /// A record was changed.
    Update,
    /// A record was removed.
    Delete,
    /// The targeted item does not exist.
    NotFound,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => write!(f, "snapshot"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::NotFound => write!(f, "not-found"),
        }
    }
}

/// Client-to-server control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Register interest in a group or item feed.
    Subscribe {
        /// Stream name.
        stream_name: String,
        /// Grouping key.
        group_key: String,
        /// Record identifier for item subscriptions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
    },
    /// Drop interest in a group or item feed.
    Unsubscribe {
        /// Stream name.
        stream_name: String,
        /// Grouping key.
        group_key: String,
        /// Record identifier for item subscriptions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
    },
}

impl ClientMessage {
    /// Creates a subscribe message for the given subscription key.
    #[must_use]
    pub fn subscribe(key: &SubscriptionKey) -> Self {
        Self::Subscribe {
            stream_name: key.stream_name.clone(),
            group_key: key.scope.group_key().to_string(),
            item_id: key.scope.item_id().map(String::from),
        }
    }

    /// Creates an unsubscribe message for the given subscription key.
    #[must_use]
    pub fn unsubscribe(key: &SubscriptionKey) -> Self {
        Self::Unsubscribe {
            stream_name: key.stream_name.clone(),
            group_key: key.scope.group_key().to_string(),
            item_id: key.scope.item_id().map(String::from),
        }
    }

    /// Returns the subscription key this message addresses.
    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        let (stream_name, group_key, item_id) = match self {
            Self::Subscribe {
                stream_name,
                group_key,
                item_id,
            }
            | Self::Unsubscribe {
                stream_name,
                group_key,
                item_id,
            } => (stream_name, group_key, item_id),
        };

        let scope = match item_id {
            Some(id) => Scope::item(group_key.clone(), id.clone()),
            None => Scope::group(group_key.clone()),
        };

        SubscriptionKey {
            stream_name: stream_name.clone(),
            scope,
        }
    }
}

/// Server-to-client event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Stream name.
    pub stream_name: String,

    /// Grouping key.
    pub group_key: String,

    /// Record identifier when the event addresses a single item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Payload: an array of records for group snapshots, a single record
    /// otherwise. Absent for `delete` and `not-found`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
