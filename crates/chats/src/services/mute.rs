//! Mute state for chats and users.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use crate::context::ChatContext;
use crate::store::RealtimeStore;
use crate::types::{ChatResult, Event, EventType, ListData};

/// Mute bookkeeping keyed by chat or user id
#[async_trait]
pub trait MuteState: Send + Sync {
    /// Mute `id` until `until`, or indefinitely when no date is given
    async fn mute(&self, id: &str, until: Option<DateTime<Utc>>) -> ChatResult<()>;

    async fn unmute(&self, id: &str) -> ChatResult<()>;

    fn muted_until(&self, id: &str) -> Option<DateTime<Utc>>;

    fn is_muted(&self, id: &str) -> bool {
        self.muted_until(id)
            .map(|until| until > Utc::now())
            .unwrap_or(false)
    }
}

/// Mute state persisted under the signed-in user's `muted` path and
/// mirrored locally.
pub struct MuteService {
    store: Arc<dyn RealtimeStore>,
    context: Arc<ChatContext>,
    muted: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MuteService {
    pub fn new(store: Arc<dyn RealtimeStore>, context: Arc<ChatContext>) -> Self {
        Self {
            store,
            context,
            muted: RwLock::new(HashMap::new()),
        }
    }

    /// Fold a change of the muted list into the local mirror.
    pub fn apply(&self, change: &Event<ListData>) {
        let entry = change.get();
        let until = entry
            .data
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        let mut muted = self.muted.write().unwrap_or_else(PoisonError::into_inner);
        match (change.event_type(), until) {
            (EventType::Removed, _) | (_, None) => {
                muted.remove(&entry.id);
            }
            (_, Some(until)) => {
                muted.insert(entry.id.clone(), until);
            }
        }
    }

    pub fn clear(&self) {
        self.muted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl MuteState for MuteService {
    async fn mute(&self, id: &str, until: Option<DateTime<Utc>>) -> ChatResult<()> {
        let until = until.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let path = self.context.paths().user_muted()?;
        self.store
            .set_field(&path, id, Value::from(until.timestamp_millis()))
            .await?;
        debug!(id, %until, "muted");
        self.muted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), until);
        Ok(())
    }

    async fn unmute(&self, id: &str) -> ChatResult<()> {
        let path = self.context.paths().user_muted()?;
        self.store.remove_entry(&path.child(id)).await?;
        debug!(id, "unmuted");
        self.muted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }

    fn muted_until(&self, id: &str) -> Option<DateTime<Utc>> {
        self.muted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Duration;
    use switchboard_config::AppConfig;

    fn service() -> (Arc<InMemoryStore>, MuteService) {
        let store = Arc::new(InMemoryStore::new());
        let context = Arc::new(ChatContext::new(AppConfig::default()));
        context.sign_in("u1").unwrap();
        let service = MuteService::new(store.clone(), context);
        (store, service)
    }

    #[tokio::test]
    async fn test_mute_without_date_is_indefinite() {
        let (store, service) = service();
        service.mute("c1", None).await.unwrap();

        assert!(service.is_muted("c1"));
        assert_eq!(service.muted_until("c1"), Some(DateTime::<Utc>::MAX_UTC));
        let path = crate::paths::Path::parse("switchboard/prod/users/u1/muted/c1");
        assert!(store.value_at(&path).is_some());

        service.unmute("c1").await.unwrap();
        assert!(!service.is_muted("c1"));
        assert!(store.value_at(&path).is_none());
    }

    #[tokio::test]
    async fn test_expired_mute_reads_as_unmuted() {
        let (_store, service) = service();
        service
            .mute("c1", Some(Utc::now() - Duration::minutes(5)))
            .await
            .unwrap();
        assert!(service.muted_until("c1").is_some());
        assert!(!service.is_muted("c1"));
    }

    #[test]
    fn test_apply_mirrors_remote_changes() {
        let (_store, service) = service();
        let until = Utc::now() + Duration::hours(1);
        service.apply(&Event::added(ListData::new(
            "u2",
            Value::from(until.timestamp_millis()),
        )));
        assert!(service.is_muted("u2"));

        service.apply(&Event::removed(ListData::new("u2", Value::Null)));
        assert!(!service.is_muted("u2"));
    }
}
