//! Inbound event dispatch.
//!
//! Interprets server event envelopes, applies snapshot/delta semantics to
//! the materialized state held by the registry, and fans the change out to
//! the listeners that are still alive at delivery time. Malformed messages
//! are discarded and reported on the protocol error channel; they never
//! tear the connection down.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{StreamItem, SubscriptionKey};

use super::error::StreamError;
use super::messages::{EventKind, ServerEvent};
use super::registry::SubscriptionRegistry;
use super::subscription::{GroupUpdate, ItemUpdate};

/// Routes inbound messages to subscriptions.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    registry: SubscriptionRegistry,
    errors: broadcast::Sender<StreamError>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: SubscriptionRegistry,
        errors: broadcast::Sender<StreamError>,
    ) -> Self {
        Self { registry, errors }
    }

    /// Handles one raw text frame from the transport.
    pub(crate) fn dispatch(&self, raw: &str) {
        let event: ServerEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                self.report(format!("malformed stream event: {}", e));
                return;
            }
        };

        match event.item_id.clone() {
            Some(item_id) => self.dispatch_item_scoped(&event, &item_id),
            None => self.dispatch_group_scoped(&event),
        }
    }

    /// Events addressed to a single record update the item entry and, for
    /// deltas, the owning group's collection as well.
    fn dispatch_item_scoped(&self, event: &ServerEvent, item_id: &str) {
        let item_key =
            SubscriptionKey::item(&event.stream_name, &event.group_key, item_id);

        match event.kind {
            EventKind::Snapshot | EventKind::Create | EventKind::Update => {
                let Some(item) = self.parse_record(event) else {
                    return;
                };

                if item.id != item_id {
                    self.report(format!(
                        "record id {:?} does not match envelope item id {:?}",
                        item.id, item_id
                    ));
                    return;
                }

                let record = item.clone();
                self.fan_out_item(&item_key, move |current| {
                    *current = Some(record);
                    Some(ItemUpdate::Snapshot { item })
                });
            }
            EventKind::Delete | EventKind::NotFound => {
                self.fan_out_item(&item_key, |current| {
                    *current = None;
                    Some(ItemUpdate::Absent)
                });
            }
        }

        // Item snapshots answer an item subscribe; everything else is also
        // a delta against the owning group.
        if event.kind != EventKind::Snapshot && event.kind != EventKind::NotFound {
            self.apply_group_delta(event, item_id);
        }
    }

    fn dispatch_group_scoped(&self, event: &ServerEvent) {
        match event.kind {
            EventKind::Snapshot => {
                let group_key =
                    SubscriptionKey::group(&event.stream_name, &event.group_key);
                let Some(items) = self.parse_collection(event) else {
                    return;
                };

                self.fan_out_group(&group_key, move |current| {
                    *current = items.clone();
                    Some(GroupUpdate::Snapshot { items })
                });
            }
            EventKind::Create | EventKind::Update | EventKind::Delete => {
                let Some(item) = self.parse_record(event) else {
                    return;
                };
                let id = item.id.clone();
                self.apply_group_delta(event, &id);
            }
            EventKind::NotFound => {
                self.report("not-found event without an item id".to_string());
            }
        }
    }

    /// Applies a create/update/delete to the group collection.
    fn apply_group_delta(&self, event: &ServerEvent, item_id: &str) {
        let group_key = SubscriptionKey::group(&event.stream_name, &event.group_key);

        match event.kind {
            EventKind::Create => {
                let Some(item) = self.parse_record(event) else {
                    return;
                };
                self.fan_out_group(&group_key, move |items| apply_create(items, item));
            }
            EventKind::Update => {
                let Some(item) = self.parse_record(event) else {
                    return;
                };
                self.fan_out_group(&group_key, move |items| apply_update(items, item));
            }
            EventKind::Delete => {
                let id = item_id.to_string();
                self.fan_out_group(&group_key, move |items| apply_delete(items, &id));
            }
            EventKind::Snapshot | EventKind::NotFound => {}
        }
    }

    /// Mutates a group entry under the registry lock, then invokes each
    /// snapshotted listener that is still registered. A listener removed or
    /// disposed mid-fan-out is skipped for this event.
    fn fan_out_group<F>(&self, key: &SubscriptionKey, mutate: F)
    where
        F: FnOnce(&mut Vec<StreamItem>) -> Option<GroupUpdate>,
    {
        let Some((update, listeners)) = self.registry.update_group(key, mutate) else {
            debug!("discarding event for inactive subscription {}", key);
            return;
        };

        for (handle, id, listener) in listeners {
            if self.registry.listener_alive(key, handle, id) {
                listener(&update);
            }
        }
    }

    fn fan_out_item<F>(&self, key: &SubscriptionKey, mutate: F)
    where
        F: FnOnce(&mut Option<StreamItem>) -> Option<ItemUpdate>,
    {
        let Some((update, listeners)) = self.registry.update_item(key, mutate) else {
            debug!("discarding event for inactive subscription {}", key);
            return;
        };

        for (handle, id, listener) in listeners {
            if self.registry.listener_alive(key, handle, id) {
                listener(&update);
            }
        }
    }

    /// Parses the payload as a single record.
    fn parse_record(&self, event: &ServerEvent) -> Option<StreamItem> {
        let data = match &event.data {
            Some(data) => data.clone(),
            None => {
                self.report(format!("{} event without data", event.kind));
                return None;
            }
        };

        match serde_json::from_value(data) {
            Ok(item) => Some(item),
            Err(e) => {
                self.report(format!("invalid record payload: {}", e));
                None
            }
        }
    }

    /// Parses the payload as a full collection.
    fn parse_collection(&self, event: &ServerEvent) -> Option<Vec<StreamItem>> {
        let data = match &event.data {
            Some(Value::Array(_)) => event.data.clone()?,
            Some(_) => {
                self.report("group snapshot data is not an array".to_string());
                return None;
            }
            None => {
                self.report("group snapshot without data".to_string());
                return None;
            }
        };

        match serde_json::from_value(data) {
            Ok(items) => Some(items),
            Err(e) => {
                self.report(format!("invalid snapshot payload: {}", e));
                None
            }
        }
    }

    fn report(&self, message: String) {
        warn!("stream protocol error: {}", message);
        let _ = self.errors.send(StreamError::Protocol(message));
    }
}

/// Appends a record unless its id is already present.
fn apply_create(items: &mut Vec<StreamItem>, item: StreamItem) -> Option<GroupUpdate> {
    if items.iter().any(|existing| existing.id == item.id) {
        return None;
    }
    items.push(item.clone());
    Some(GroupUpdate::Created { item })
}

/// Upserts a record: replaced in place when present, appended otherwise.
fn apply_update(items: &mut Vec<StreamItem>, item: StreamItem) -> Option<GroupUpdate> {
    match items.iter_mut().find(|existing| existing.id == item.id) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
    Some(GroupUpdate::Updated { item })
}

/// Removes a record by id; a miss is a no-op.
fn apply_delete(items: &mut Vec<StreamItem>, id: &str) -> Option<GroupUpdate> {
    let before = items.len();
    items.retain(|existing| existing.id != id);
    if items.len() == before {
        return None;
    }
    Some(GroupUpdate::Deleted { id: id.to_string() })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::types::Scope;

    fn setup() -> (
        Dispatcher,
        SubscriptionRegistry,
        broadcast::Receiver<StreamError>,
    ) {
        let (outbound, _outbound_rx) = mpsc::unbounded_channel();
        let registry = SubscriptionRegistry::new(outbound);
        let (errors_tx, errors_rx) = broadcast::channel(16);
        let dispatcher = Dispatcher::new(registry.clone(), errors_tx);
        (dispatcher, registry, errors_rx)
    }

    fn item(id: &str, msg: &str) -> StreamItem {
        StreamItem::new(id).with_field("msg", json!(msg))
    }

    fn collect_group(
        registry: &SubscriptionRegistry,
        key: &SubscriptionKey,
    ) -> Arc<Mutex<Vec<GroupUpdate>>> {
        let handle = registry.acquire(key.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.add_group_listener(
            key,
            handle,
            Arc::new(move |update| sink.lock().push(update.clone())),
        );
        seen
    }

    #[test]
    fn test_apply_create_appends() {
        let mut items = vec![item("a", "x")];
        let update = apply_create(&mut items, item("b", "y"));
        assert_eq!(
            update,
            Some(GroupUpdate::Created { item: item("b", "y") })
        );
        assert_eq!(items, vec![item("a", "x"), item("b", "y")]);
    }

    #[test]
    fn test_apply_create_duplicate_ignored() {
        let mut items = vec![item("a", "x")];
        assert!(apply_create(&mut items, item("a", "x2")).is_none());
        assert_eq!(items, vec![item("a", "x")]);
    }

    #[test]
    fn test_apply_update_preserves_position() {
        let mut items = vec![item("a", "x"), item("b", "y")];
        apply_update(&mut items, item("a", "x2"));
        assert_eq!(items, vec![item("a", "x2"), item("b", "y")]);
    }

    #[test]
    fn test_apply_update_is_idempotent() {
        let mut items = vec![item("a", "x")];
        apply_update(&mut items, item("a", "x2"));
        apply_update(&mut items, item("a", "x2"));
        assert_eq!(items, vec![item("a", "x2")]);
    }

    #[test]
    fn test_apply_update_missing_id_appends() {
        let mut items = vec![item("a", "x")];
        apply_update(&mut items, item("c", "z"));
        assert_eq!(items, vec![item("a", "x"), item("c", "z")]);
    }

    #[test]
    fn test_apply_delete_then_create_is_fresh_create() {
        let mut items = vec![item("a", "x")];
        apply_delete(&mut items, "a");
        let update = apply_create(&mut items, item("a", "x3"));
        assert!(update.is_some());
        assert_eq!(items, vec![item("a", "x3")]);
    }

    #[test]
    fn test_apply_delete_missing_is_noop() {
        let mut items = vec![item("a", "x")];
        assert!(apply_delete(&mut items, "zz").is_none());
        assert_eq!(items, vec![item("a", "x")]);
    }

    #[test]
    fn test_group_snapshot_update_delete_scenario() {
        let (dispatcher, registry, _errors) = setup();
        let key = SubscriptionKey::group("logs", "default");
        let seen = collect_group(&registry, &key);

        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"snapshot",
                "data":[{"id":"a","msg":"x"},{"id":"b","msg":"y"}]}"#,
        );
        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","itemId":"a","type":"update",
                "data":{"id":"a","msg":"x2"}}"#,
        );
        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","itemId":"b","type":"delete"}"#,
        );

        assert_eq!(registry.group_state(&key), vec![item("a", "x2")]);

        let events = seen.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(
            *events,
            vec![
                GroupUpdate::Snapshot {
                    items: vec![item("a", "x"), item("b", "y")],
                },
                GroupUpdate::Updated { item: item("a", "x2") },
                GroupUpdate::Deleted { id: "b".to_string() },
            ]
        );
    }

    #[test]
    fn test_group_delta_without_item_id_uses_payload_id() {
        let (dispatcher, registry, _errors) = setup();
        let key = SubscriptionKey::group("logs", "default");
        let _seen = collect_group(&registry, &key);

        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"create",
                "data":{"id":"a","msg":"x"}}"#,
        );
        assert_eq!(registry.group_state(&key), vec![item("a", "x")]);
    }

    #[test]
    fn test_item_snapshot_and_not_found() {
        let (dispatcher, registry, _errors) = setup();
        let key = SubscriptionKey {
            stream_name: "state".to_string(),
            scope: Scope::item("default", "a"),
        };
        let handle = registry.acquire(key.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.add_item_listener(
            &key,
            handle,
            Arc::new(move |update| sink.lock().push(update.clone())),
        );

        dispatcher.dispatch(
            r#"{"streamName":"state","groupKey":"default","itemId":"a","type":"snapshot",
                "data":{"id":"a","msg":"x"}}"#,
        );
        assert_eq!(registry.item_state(&key), Some(item("a", "x")));

        dispatcher.dispatch(
            r#"{"streamName":"state","groupKey":"default","itemId":"a","type":"not-found"}"#,
        );
        assert_eq!(registry.item_state(&key), None);

        assert_eq!(
            *seen.lock(),
            vec![
                ItemUpdate::Snapshot { item: item("a", "x") },
                ItemUpdate::Absent,
            ]
        );
    }

    #[test]
    fn test_item_delta_also_updates_group() {
        let (dispatcher, registry, _errors) = setup();
        let group = SubscriptionKey::group("logs", "default");
        let _seen = collect_group(&registry, &group);

        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"snapshot",
                "data":[{"id":"a","msg":"x"}]}"#,
        );
        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","itemId":"a","type":"update",
                "data":{"id":"a","msg":"x2"}}"#,
        );

        assert_eq!(registry.group_state(&group), vec![item("a", "x2")]);
    }

    #[test]
    fn test_item_snapshot_does_not_touch_group() {
        let (dispatcher, registry, _errors) = setup();
        let group = SubscriptionKey::group("logs", "default");
        let _seen = collect_group(&registry, &group);

        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"snapshot",
                "data":[{"id":"a","msg":"x"}]}"#,
        );
        // An item subscribe answer for a record the group already holds.
        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","itemId":"a","type":"snapshot",
                "data":{"id":"a","msg":"other"}}"#,
        );

        assert_eq!(registry.group_state(&group), vec![item("a", "x")]);
    }

    #[test]
    fn test_unknown_key_discarded_silently() {
        let (dispatcher, _registry, mut errors) = setup();
        dispatcher.dispatch(
            r#"{"streamName":"ghost","groupKey":"none","type":"snapshot","data":[]}"#,
        );
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_malformed_json_reported() {
        let (dispatcher, _registry, mut errors) = setup();
        dispatcher.dispatch("{not json");
        match errors.try_recv() {
            Ok(StreamError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_kind_reported() {
        let (dispatcher, _registry, mut errors) = setup();
        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"mystery"}"#,
        );
        assert!(matches!(errors.try_recv(), Ok(StreamError::Protocol(_))));
    }

    #[test]
    fn test_group_not_found_reported() {
        let (dispatcher, _registry, mut errors) = setup();
        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"not-found"}"#,
        );
        assert!(matches!(errors.try_recv(), Ok(StreamError::Protocol(_))));
    }

    #[test]
    fn test_snapshot_with_object_data_reported() {
        let (dispatcher, registry, mut errors) = setup();
        let key = SubscriptionKey::group("logs", "default");
        let _seen = collect_group(&registry, &key);

        dispatcher.dispatch(
            r#"{"streamName":"logs","groupKey":"default","type":"snapshot",
                "data":{"id":"a"}}"#,
        );
        assert!(matches!(errors.try_recv(), Ok(StreamError::Protocol(_))));
        assert!(registry.group_state(&key).is_empty());
    }

    #[test]
    fn test_mismatched_item_id_reported() {
        let (dispatcher, _registry, mut errors) = setup();
        dispatcher.dispatch(
            r#"{"streamName":"state","groupKey":"default","itemId":"a","type":"snapshot",
                "data":{"id":"b","msg":"x"}}"#,
        );
        assert!(matches!(errors.try_recv(), Ok(StreamError::Protocol(_))));
    }
}
