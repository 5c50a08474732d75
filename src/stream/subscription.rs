//! Subscription handles.
//!
//! A handle is one consumer's view of a shared subscription: it carries its
//! own listener set and a read-only window onto the materialized state owned
//! by the registry. Disposing a handle releases its reference; the last
//! release tears the server subscription down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::{StreamItem, SubscriptionKey};

use super::registry::SubscriptionRegistry;

/// Identifies one consumer handle within a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub(crate) u64);

/// Identifies one registered listener within a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Change notification delivered to group listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupUpdate {
    /// The collection was replaced wholesale.
    Snapshot {
        /// Full collection in server order.
        items: Vec<StreamItem>,
    },

    /// A record was added.
    Created {
        /// The new record.
        item: StreamItem,
    },

    /// A record was changed in place.
    Updated {
        /// The new version of the record.
        item: StreamItem,
    },

    /// A record was removed.
    Deleted {
        /// Identifier of the removed record.
        id: String,
    },
}

/// Change notification delivered to item listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemUpdate {
    /// The record was created, replaced, or changed.
    Snapshot {
        /// Current version of the record.
        item: StreamItem,
    },

    /// The record does not exist (deleted, or never existed).
    Absent,
}

/// A consumer's handle on a group subscription.
///
/// Dropping the handle disposes it.
#[derive(Debug)]
pub struct GroupSubscription {
    key: SubscriptionKey,
    handle: HandleId,
    registry: SubscriptionRegistry,
    disposed: AtomicBool,
}

impl GroupSubscription {
    pub(crate) fn new(
        key: SubscriptionKey,
        handle: HandleId,
        registry: SubscriptionRegistry,
    ) -> Self {
        Self {
            key,
            handle,
            registry,
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the stream name.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.key.stream_name
    }

    /// Returns the grouping key.
    #[must_use]
    pub fn group_key(&self) -> &str {
        self.key.scope.group_key()
    }

    /// Returns a copy of the current materialized collection, in server
    /// order. Empty until the first snapshot arrives.
    #[must_use]
    pub fn state(&self) -> Vec<StreamItem> {
        self.registry.group_state(&self.key)
    }

    /// Registers a listener on this handle. Listeners on other handles for
    /// the same subscription are unaffected.
    pub fn add_listener(
        &self,
        listener: impl Fn(&GroupUpdate) + Send + Sync + 'static,
    ) -> ListenerId {
        self.registry
            .add_group_listener(&self.key, self.handle, Arc::new(listener))
    }

    /// Removes a previously registered listener. Safe to call during
    /// fan-out; the removed listener is not invoked for the event currently
    /// being dispatched.
    pub fn remove_listener(&self, listener: ListenerId) {
        self.registry
            .remove_listener(&self.key, self.handle, listener);
    }

    /// Releases this handle. Idempotent, and safe to call from inside a
    /// listener callback.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.registry.release(&self.key, self.handle);
        }
    }
}

impl Drop for GroupSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A consumer's handle on an item subscription.
///
/// Dropping the handle disposes it.
#[derive(Debug)]
pub struct ItemSubscription {
    key: SubscriptionKey,
    handle: HandleId,
    registry: SubscriptionRegistry,
    disposed: AtomicBool,
}

impl ItemSubscription {
    pub(crate) fn new(
        key: SubscriptionKey,
        handle: HandleId,
        registry: SubscriptionRegistry,
    ) -> Self {
        Self {
            key,
            handle,
            registry,
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the stream name.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.key.stream_name
    }

    /// Returns the grouping key.
    #[must_use]
    pub fn group_key(&self) -> &str {
        self.key.scope.group_key()
    }

    /// Returns the record identifier.
    #[must_use]
    pub fn item_id(&self) -> &str {
        self.key.scope.item_id().unwrap_or_default()
    }

    /// Returns a copy of the current record, or `None` while absent.
    #[must_use]
    pub fn state(&self) -> Option<StreamItem> {
        self.registry.item_state(&self.key)
    }

    /// Registers a listener on this handle.
    pub fn add_listener(
        &self,
        listener: impl Fn(&ItemUpdate) + Send + Sync + 'static,
    ) -> ListenerId {
        self.registry
            .add_item_listener(&self.key, self.handle, Arc::new(listener))
    }

    /// Removes a previously registered listener.
    pub fn remove_listener(&self, listener: ListenerId) {
        self.registry
            .remove_listener(&self.key, self.handle, listener);
    }

    /// Releases this handle. Idempotent, and safe to call from inside a
    /// listener callback.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.registry.release(&self.key, self.handle);
        }
    }
}

impl Drop for ItemSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
