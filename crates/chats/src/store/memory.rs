//! In-process realtime store.
//!
//! Keeps a JSON tree and pushes child/value changes to listeners the way the
//! hosted realtime database does: new list listeners first receive every
//! existing child as `Added`, value listeners first receive the current
//! value. Entry ids sort in insertion order.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{ChangeFeed, ListChange, RealtimeStore, StoreError};
use crate::paths::Path;
use crate::types::{EventType, ListData};

type ListSender = mpsc::UnboundedSender<Result<ListChange, StoreError>>;
type ValueSender = mpsc::UnboundedSender<Result<Option<Value>, StoreError>>;

struct StoreState {
    root: Value,
    sequence: u64,
    writes: u64,
    list_listeners: Vec<(Path, ListSender)>,
    value_listeners: Vec<(Path, ValueSender)>,
    failures: Vec<(Path, String)>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
            sequence: 0,
            writes: 0,
            list_listeners: Vec::new(),
            value_listeners: Vec::new(),
            failures: Vec::new(),
        }
    }
}

fn get_at<'a>(node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(node, |current, segment| current.get(segment.as_str()))
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    match segments.split_first() {
        None => *node = value,
        Some((head, rest)) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(head.clone()).or_insert(Value::Null);
                set_at(child, rest, value);
            }
        }
    }
}

fn remove_at(node: &mut Value, segments: &[String]) -> Option<Value> {
    match segments.split_first() {
        None => None,
        Some((head, [])) => node.as_object_mut()?.remove(head),
        Some((head, rest)) => remove_at(node.as_object_mut()?.get_mut(head)?, rest),
    }
}

/// Missing, null and empty objects all read as "nothing stored".
fn normalized(value: Option<&Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(value) => Some(value.clone()),
    }
}

fn children(node: &Value, path: &Path) -> BTreeMap<String, Value> {
    match get_at(node, path.segments()) {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, value)| normalized(Some(value)).map(|value| (key.clone(), value)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn related(listener: &Path, written: &Path) -> bool {
    listener.starts_with(written) || written.starts_with(listener)
}

fn diff_children(
    before: &BTreeMap<String, Value>,
    after: &BTreeMap<String, Value>,
) -> Vec<ListChange> {
    let mut changes = Vec::new();
    for (key, value) in before {
        if !after.contains_key(key) {
            changes.push(ListChange::new(
                EventType::Removed,
                ListData::new(key.clone(), value.clone()),
            ));
        }
    }
    for (key, value) in after {
        match before.get(key) {
            None => changes.push(ListChange::new(
                EventType::Added,
                ListData::new(key.clone(), value.clone()),
            )),
            Some(previous) if previous != value => changes.push(ListChange::new(
                EventType::Modified,
                ListData::new(key.clone(), value.clone()),
            )),
            Some(_) => {}
        }
    }
    changes
}

impl StoreState {
    fn check_writable(&self, written: &Path) -> Result<(), StoreError> {
        match self
            .failures
            .iter()
            .find(|(prefix, _)| written.starts_with(prefix))
        {
            Some((_, reason)) => Err(StoreError::rejected(written.to_string(), reason.clone())),
            None => Ok(()),
        }
    }

    fn next_entry_id(&mut self) -> String {
        self.sequence += 1;
        format!("{:012}-{}", self.sequence, cuid2::create_id())
    }

    /// Apply `op` to the tree and notify every listener whose view changed.
    fn mutate(&mut self, written: &Path, op: impl FnOnce(&mut Value)) {
        let list_before: Vec<BTreeMap<String, Value>> = self
            .list_listeners
            .iter()
            .map(|(path, _)| {
                if related(path, written) {
                    children(&self.root, path)
                } else {
                    BTreeMap::new()
                }
            })
            .collect();
        let value_before: Vec<Option<Value>> = self
            .value_listeners
            .iter()
            .map(|(path, _)| normalized(get_at(&self.root, path.segments())))
            .collect();

        op(&mut self.root);
        self.writes += 1;

        let root = &self.root;
        let mut index = 0;
        self.list_listeners.retain(|(path, sender)| {
            let before = &list_before[index];
            index += 1;
            if !related(path, written) {
                return !sender.is_closed();
            }
            let after = children(root, path);
            diff_children(before, &after)
                .into_iter()
                .all(|change| sender.send(Ok(change)).is_ok())
        });

        let mut index = 0;
        self.value_listeners.retain(|(path, sender)| {
            let before = &value_before[index];
            index += 1;
            let after = normalized(get_at(root, path.segments()));
            if &after == before {
                return !sender.is_closed();
            }
            sender.send(Ok(after)).is_ok()
        });
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every write at or below `path` with `reason`.
    pub fn fail_writes_under(&self, path: &Path, reason: impl Into<String>) {
        self.state().failures.push((path.clone(), reason.into()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// The value currently stored at `path`.
    pub fn value_at(&self, path: &Path) -> Option<Value> {
        normalized(get_at(&self.state().root, path.segments()))
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.state().writes
    }
}

#[async_trait]
impl RealtimeStore for InMemoryStore {
    fn list_changes(&self, path: &Path) -> ChangeFeed<ListChange> {
        let mut state = self.state();
        let (sender, receiver) = mpsc::unbounded_channel();
        for (key, value) in children(&state.root, path) {
            let _ = sender.send(Ok(ListChange::new(
                EventType::Added,
                ListData::new(key, value),
            )));
        }
        state.list_listeners.push((path.clone(), sender));
        debug!(%path, "list listener registered");
        UnboundedReceiverStream::new(receiver).boxed()
    }

    fn value_changes(&self, path: &Path) -> ChangeFeed<Option<Value>> {
        let mut state = self.state();
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Ok(normalized(get_at(&state.root, path.segments()))));
        state.value_listeners.push((path.clone(), sender));
        debug!(%path, "value listener registered");
        UnboundedReceiverStream::new(receiver).boxed()
    }

    async fn add_entry(&self, path: &Path, value: Value) -> Result<String, StoreError> {
        let mut state = self.state();
        let id = state.next_entry_id();
        let written = path.child(id.clone());
        state.check_writable(&written)?;
        let segments = written.segments().to_vec();
        state.mutate(&written, |root| set_at(root, &segments, value));
        Ok(id)
    }

    async fn set_field(&self, path: &Path, key: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.state();
        let written = path.child(key);
        state.check_writable(&written)?;
        let segments = written.segments().to_vec();
        if value.is_null() {
            state.mutate(&written, |root| {
                remove_at(root, &segments);
            });
        } else {
            state.mutate(&written, |root| set_at(root, &segments, value));
        }
        Ok(())
    }

    async fn remove_entry(&self, path: &Path) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_writable(path)?;
        let segments = path.segments().to_vec();
        state.mutate(path, |root| {
            remove_at(root, &segments);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn next_change(feed: &mut ChangeFeed<ListChange>) -> ListChange {
        feed.next().await.expect("feed ended").expect("feed error")
    }

    #[tokio::test]
    async fn test_list_listener_replays_then_streams() {
        let store = InMemoryStore::new();
        let users = Path::new(["chats", "c1", "users"]);
        store.set_field(&users, "u1", json!({ "role": "owner" })).await.unwrap();

        let mut feed = store.list_changes(&users);
        let first = next_change(&mut feed).await;
        assert_eq!(first.event_type, EventType::Added);
        assert_eq!(first.entry.id, "u1");

        store.set_field(&users, "u1", json!({ "role": "admin" })).await.unwrap();
        let modified = next_change(&mut feed).await;
        assert_eq!(modified.event_type, EventType::Modified);
        assert_eq!(modified.entry.get_str("role"), Some("admin"));

        store.remove_entry(&users.child("u1")).await.unwrap();
        assert_eq!(next_change(&mut feed).await.event_type, EventType::Removed);
    }

    #[tokio::test]
    async fn test_removing_ancestor_removes_children() {
        let store = InMemoryStore::new();
        let users = Path::new(["chats", "c1", "users"]);
        store.set_field(&users, "u1", json!({ "role": "owner" })).await.unwrap();
        let mut feed = store.list_changes(&users);
        next_change(&mut feed).await;

        store.remove_entry(&Path::new(["chats", "c1"])).await.unwrap();

        let removed = next_change(&mut feed).await;
        assert_eq!(removed.event_type, EventType::Removed);
        assert_eq!(removed.entry.id, "u1");
    }

    #[tokio::test]
    async fn test_added_entries_keep_insertion_order() {
        let store = InMemoryStore::new();
        let messages = Path::new(["chats", "c1", "messages"]);
        let mut ids = Vec::new();
        for text in ["one", "two", "three"] {
            ids.push(store.add_entry(&messages, json!({ "text": text })).await.unwrap());
        }

        let mut feed = store.list_changes(&messages);
        let mut replayed = Vec::new();
        for _ in 0..3 {
            replayed.push(next_change(&mut feed).await.entry.id);
        }
        assert_eq!(replayed, ids);
    }

    #[tokio::test]
    async fn test_value_listener_only_fires_on_change() {
        let store = InMemoryStore::new();
        let meta = Path::new(["chats", "c1", "meta"]);
        let mut feed = store.value_changes(&meta);
        assert_eq!(feed.next().await, Some(Ok(None)));

        store.set_field(&meta, "name", json!("Team")).await.unwrap();
        store.set_field(&meta, "name", json!("Team")).await.unwrap();
        store.set_field(&meta, "name", json!("Crew")).await.unwrap();

        assert_eq!(feed.next().await, Some(Ok(Some(json!({ "name": "Team" })))));
        assert_eq!(feed.next().await, Some(Ok(Some(json!({ "name": "Crew" })))));
    }

    #[tokio::test]
    async fn test_injected_failures_reject_writes() {
        let store = InMemoryStore::new();
        let chats = Path::new(["chats"]);
        store.fail_writes_under(&chats, "read only");

        let error = store.add_entry(&chats, json!({})).await.unwrap_err();
        assert!(matches!(error, StoreError::Rejected { ref reason, .. } if reason == "read only"));
        assert_eq!(store.write_count(), 0);

        store.clear_failures();
        assert!(store.add_entry(&chats, json!({ "a": 1 })).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }
}
