//! Contract with the external realtime key-value store.
//!
//! The chat layer never talks to a concrete backend. It listens to change
//! feeds and issues three kinds of writes through [`RealtimeStore`]; the
//! adapter owns encoding, retries and timeouts.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::paths::Path;
use crate::types::{Event, EventType, ListData};

pub use memory::InMemoryStore;

/// Errors reported by a store adapter
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("write to {path} rejected: {reason}")]
    Rejected { path: String, reason: String },

    #[error("nothing stored at {path}")]
    NotFound { path: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub fn rejected(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// One change of a list: an entry was added, modified or removed
#[derive(Debug, Clone, PartialEq)]
pub struct ListChange {
    pub event_type: EventType,
    pub entry: ListData,
}

impl ListChange {
    pub fn new(event_type: EventType, entry: ListData) -> Self {
        Self { event_type, entry }
    }

    pub fn into_event(self) -> Event<ListData> {
        Event::with_data(self.event_type, self.entry.clone(), self.entry)
    }
}

/// Cancelable stream of changes; dropping it ends the subscription
pub type ChangeFeed<T> = BoxStream<'static, Result<T, StoreError>>;

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Child-level changes of the list stored at `path`
    fn list_changes(&self, path: &Path) -> ChangeFeed<ListChange>;

    /// The value stored at `path`, each time it changes
    fn value_changes(&self, path: &Path) -> ChangeFeed<Option<Value>>;

    /// Store `value` under a fresh child of `path` and return the child id
    async fn add_entry(&self, path: &Path, value: Value) -> Result<String, StoreError>;

    /// Set the field `key` of the object at `path`
    async fn set_field(&self, path: &Path, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove whatever is stored at `path`
    async fn remove_entry(&self, path: &Path) -> Result<(), StoreError>;
}
