//! Subscription registry.
//!
//! The single source of truth for what the server should currently believe
//! this client is subscribed to. Entries are reference-counted across
//! consumer handles, replayed in creation order after every reconnect, and
//! hold the materialized state that the dispatcher mutates.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{ConnectionState, Scope, StreamItem, SubscriptionKey};

use super::messages::ClientMessage;
use super::subscription::{GroupUpdate, HandleId, ItemUpdate, ListenerId};

/// Listener stored for a group-scoped entry.
pub(crate) type GroupListener = Arc<dyn Fn(&GroupUpdate) + Send + Sync>;

/// Listener stored for an item-scoped entry.
pub(crate) type ItemListener = Arc<dyn Fn(&ItemUpdate) + Send + Sync>;

enum EntryListener {
    Group(GroupListener),
    Item(ItemListener),
}

/// Materialized state for one entry; mutated only through the dispatcher.
enum Materialized {
    Group(Vec<StreamItem>),
    Item(Option<StreamItem>),
}

impl Materialized {
    fn for_scope(scope: &Scope) -> Self {
        match scope {
            Scope::Group { .. } => Self::Group(Vec::new()),
            Scope::Item { .. } => Self::Item(None),
        }
    }
}

struct Entry {
    ref_count: usize,
    /// True once the subscribe message for this entry has been issued on
    /// the current physical connection.
    announced: bool,
    materialized: Materialized,
    /// Listener sets, keyed per handle then per listener. Ordered maps so
    /// fan-out order is registration order.
    handles: BTreeMap<HandleId, BTreeMap<ListenerId, EntryListener>>,
}

impl Entry {
    fn new(scope: &Scope) -> Self {
        Self {
            ref_count: 0,
            announced: false,
            materialized: Materialized::for_scope(scope),
            handles: BTreeMap::new(),
        }
    }
}

struct RegistryInner {
    state: ConnectionState,
    entries: HashMap<SubscriptionKey, Entry>,
    /// Creation order of live entries; drives deterministic replay.
    order: Vec<SubscriptionKey>,
    next_handle: u64,
    next_listener: u64,
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

/// Shared, lock-protected subscription table.
///
/// The lock is never held across an await point or a listener call.
#[derive(Clone)]
pub(crate) struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubscriptionRegistry")
    }
}

impl SubscriptionRegistry {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                state: ConnectionState::Connecting,
                entries: HashMap::new(),
                order: Vec::new(),
                next_handle: 0,
                next_listener: 0,
                outbound,
            })),
        }
    }

    /// Registers a consumer handle for the given key, creating the entry on
    /// first acquire. Sends the subscribe message immediately when the
    /// connection is open; otherwise the entry waits for replay.
    pub(crate) fn acquire(&self, key: SubscriptionKey) -> HandleId {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let handle = HandleId(inner.next_handle);
        inner.next_handle += 1;

        let created = !inner.entries.contains_key(&key);
        if created {
            inner.order.push(key.clone());
            inner.entries.insert(key.clone(), Entry::new(&key.scope));
        }

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.ref_count += 1;
            entry.handles.insert(handle, BTreeMap::new());

            if created && inner.state.is_open() {
                entry.announced = true;
                let _ = inner.outbound.send(ClientMessage::subscribe(&key));
            }
        }

        handle
    }

    /// Releases one consumer handle. The entry is removed at zero
    /// references; the unsubscribe message is sent only while open.
    pub(crate) fn release(&self, key: &SubscriptionKey, handle: HandleId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let remove = match inner.entries.get_mut(key) {
            Some(entry) => {
                if entry.handles.remove(&handle).is_none() {
                    return;
                }
                entry.ref_count = entry.ref_count.saturating_sub(1);
                entry.ref_count == 0
            }
            None => return,
        };

        if remove {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);

            if inner.state.is_open() {
                let _ = inner.outbound.send(ClientMessage::unsubscribe(key));
            }
        }
    }

    pub(crate) fn add_group_listener(
        &self,
        key: &SubscriptionKey,
        handle: HandleId,
        listener: GroupListener,
    ) -> ListenerId {
        self.add_listener(key, handle, EntryListener::Group(listener))
    }

    pub(crate) fn add_item_listener(
        &self,
        key: &SubscriptionKey,
        handle: HandleId,
        listener: ItemListener,
    ) -> ListenerId {
        self.add_listener(key, handle, EntryListener::Item(listener))
    }

    fn add_listener(
        &self,
        key: &SubscriptionKey,
        handle: HandleId,
        listener: EntryListener,
    ) -> ListenerId {
        let mut inner = self.inner.lock();

        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;

        if let Some(listeners) = inner
            .entries
            .get_mut(key)
            .and_then(|entry| entry.handles.get_mut(&handle))
        {
            listeners.insert(id, listener);
        }

        id
    }

    pub(crate) fn remove_listener(
        &self,
        key: &SubscriptionKey,
        handle: HandleId,
        listener: ListenerId,
    ) {
        let mut inner = self.inner.lock();
        if let Some(listeners) = inner
            .entries
            .get_mut(key)
            .and_then(|entry| entry.handles.get_mut(&handle))
        {
            listeners.remove(&listener);
        }
    }

    /// Returns true if the listener is still registered. Checked by the
    /// dispatcher immediately before each callback so removal and disposal
    /// observed mid-fan-out suppress delivery.
    pub(crate) fn listener_alive(
        &self,
        key: &SubscriptionKey,
        handle: HandleId,
        listener: ListenerId,
    ) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .and_then(|entry| entry.handles.get(&handle))
            .is_some_and(|listeners| listeners.contains_key(&listener))
    }

    pub(crate) fn group_state(&self, key: &SubscriptionKey) -> Vec<StreamItem> {
        let inner = self.inner.lock();
        match inner.entries.get(key).map(|e| &e.materialized) {
            Some(Materialized::Group(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn item_state(&self, key: &SubscriptionKey) -> Option<StreamItem> {
        let inner = self.inner.lock();
        match inner.entries.get(key).map(|e| &e.materialized) {
            Some(Materialized::Item(record)) => record.clone(),
            _ => None,
        }
    }

    /// Applies a mutation to a group entry's collection and snapshots the
    /// group listeners for fan-out. Returns `None` when the entry is gone
    /// or the mutation produced no observable change.
    pub(crate) fn update_group<F>(
        &self,
        key: &SubscriptionKey,
        mutate: F,
    ) -> Option<(GroupUpdate, Vec<(HandleId, ListenerId, GroupListener)>)>
    where
        F: FnOnce(&mut Vec<StreamItem>) -> Option<GroupUpdate>,
    {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(key)?;

        let update = match &mut entry.materialized {
            Materialized::Group(items) => mutate(items)?,
            Materialized::Item(_) => return None,
        };

        let listeners = snapshot_group_listeners(entry);
        Some((update, listeners))
    }

    /// Applies a mutation to an item entry's record and snapshots the item
    /// listeners for fan-out.
    pub(crate) fn update_item<F>(
        &self,
        key: &SubscriptionKey,
        mutate: F,
    ) -> Option<(ItemUpdate, Vec<(HandleId, ListenerId, ItemListener)>)>
    where
        F: FnOnce(&mut Option<StreamItem>) -> Option<ItemUpdate>,
    {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(key)?;

        let update = match &mut entry.materialized {
            Materialized::Item(record) => mutate(record)?,
            Materialized::Group(_) => return None,
        };

        let listeners = snapshot_item_listeners(entry);
        Some((update, listeners))
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.lock().state = state;
    }

    /// Collects the subscribe messages for every live entry, in creation
    /// order, marking each as announced on the new connection.
    pub(crate) fn begin_replay(&self) -> Vec<ClientMessage> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut messages = Vec::with_capacity(inner.order.len());
        for key in &inner.order {
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.announced = true;
                messages.push(ClientMessage::subscribe(key));
            }
        }
        messages
    }

    /// Flips the connection to open, returning subscribe messages for any
    /// entries acquired while replay was in flight. Atomic with the state
    /// change, so a concurrent acquire either lands here or sends directly.
    pub(crate) fn finish_replay(&self) -> Vec<ClientMessage> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut messages = Vec::new();
        for key in &inner.order {
            if let Some(entry) = inner.entries.get_mut(key) {
                if !entry.announced {
                    entry.announced = true;
                    messages.push(ClientMessage::subscribe(key));
                }
            }
        }

        inner.state = ConnectionState::Open;
        messages
    }

    /// Records transport loss: entries must be announced again on the next
    /// connection.
    pub(crate) fn mark_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Reconnecting;
        for entry in inner.entries.values_mut() {
            entry.announced = false;
        }
    }

    /// Terminal teardown: clears every subscription.
    pub(crate) fn set_closed(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Closed;
        inner.entries.clear();
        inner.order.clear();
    }
}

fn snapshot_group_listeners(entry: &Entry) -> Vec<(HandleId, ListenerId, GroupListener)> {
    let mut listeners = Vec::new();
    for (handle, set) in &entry.handles {
        for (id, listener) in set {
            if let EntryListener::Group(f) = listener {
                listeners.push((*handle, *id, Arc::clone(f)));
            }
        }
    }
    listeners
}

fn snapshot_item_listeners(entry: &Entry) -> Vec<(HandleId, ListenerId, ItemListener)> {
    let mut listeners = Vec::new();
    for (handle, set) in &entry.handles {
        for (id, listener) in set {
            if let EntryListener::Item(f) = listener {
                listeners.push((*handle, *id, Arc::clone(f)));
            }
        }
    }
    listeners
}
