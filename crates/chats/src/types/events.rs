//! Event types for real-time chat updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change an [`Event`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Added,
    Removed,
    Modified,
    SessionStarted,
    LocalAddition,
}

impl EventType {
    /// Get event type name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "added",
            EventType::Removed => "removed",
            EventType::Modified => "modified",
            EventType::SessionStarted => "session_started",
            EventType::LocalAddition => "local_addition",
        }
    }
}

/// Raw entry of a store list: the child key and the value stored under it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListData {
    pub id: String,
    pub data: Value,
}

impl ListData {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Look up a field of the stored value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Look up a string field of the stored value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// An immutable change notification carrying a payload of type `T`.
///
/// When the event was derived from a store change it also carries the raw
/// [`ListData`] snapshot it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    event_type: EventType,
    payload: T,
    data: Option<ListData>,
}

impl<T> Event<T> {
    pub fn new(event_type: EventType, payload: T) -> Self {
        Self {
            event_type,
            payload,
            data: None,
        }
    }

    pub fn with_data(event_type: EventType, payload: T, data: ListData) -> Self {
        Self {
            event_type,
            payload,
            data: Some(data),
        }
    }

    pub fn added(payload: T) -> Self {
        Self::new(EventType::Added, payload)
    }

    pub fn removed(payload: T) -> Self {
        Self::new(EventType::Removed, payload)
    }

    pub fn modified(payload: T) -> Self {
        Self::new(EventType::Modified, payload)
    }

    pub fn get(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn type_is(&self, event_type: EventType) -> bool {
        self.event_type == event_type
    }

    pub fn data(&self) -> Option<&ListData> {
        self.data.as_ref()
    }

    /// Re-wrap this change around a higher-level payload, keeping the type
    /// and the raw snapshot.
    pub fn to<U>(&self, payload: U) -> Event<U> {
        Event {
            event_type: self.event_type,
            payload,
            data: self.data.clone(),
        }
    }

    pub fn map<U>(self, transform: impl FnOnce(T) -> U) -> Event<U> {
        Event {
            event_type: self.event_type,
            payload: transform(self.payload),
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_keeps_type_and_snapshot() {
        let raw = ListData::new("u1", json!({ "role": "admin" }));
        let event = Event::with_data(EventType::Modified, raw.clone(), raw.clone());

        let derived = event.to("u1".to_string());

        assert!(derived.type_is(EventType::Modified));
        assert_eq!(derived.get(), "u1");
        assert_eq!(derived.data(), Some(&raw));
        assert_eq!(raw.get_str("role"), Some("admin"));
    }

    #[test]
    fn test_map_transforms_payload() {
        let event = Event::removed(2).map(|value| value * 10);
        assert_eq!(event.event_type(), EventType::Removed);
        assert_eq!(*event.get(), 20);
    }
}
