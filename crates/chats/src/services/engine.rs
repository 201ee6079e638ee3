//! Behaviour shared by every chat.
//!
//! [`ChatEngine`] owns the listener lifecycle, the roster and sendable write
//! primitives and the per-type event surface. Concrete chats decide which
//! paths to listen on and which operations to gate.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ChatContext;
use crate::entities::{
    DataProvider, DeliveryReceipt, Invitation, Message, Presence, Sendable, TypedSendable,
    TypingState, User,
};
use crate::hub::{MultiQueue, Subscription};
use crate::paths::Path;
use crate::store::RealtimeStore;
use crate::types::{ChatError, ChatResult, DeliveryReceiptType, Event, ListData, SendableId};

type ReceiptKey = (Path, SendableId, DeliveryReceiptType);

/// One hub per sendable type, plus the untyped stream of everything.
///
/// Decode and listener failures are reported on [`SendableEvents::errors`].
#[derive(Debug, Clone, Default)]
pub struct SendableEvents {
    sendables: MultiQueue<Event<TypedSendable>>,
    messages: MultiQueue<Event<Message>>,
    typing_states: MultiQueue<Event<TypingState>>,
    delivery_receipts: MultiQueue<Event<DeliveryReceipt>>,
    invitations: MultiQueue<Event<Invitation>>,
    presences: MultiQueue<Event<Presence>>,
}

impl SendableEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sendables(&self) -> &MultiQueue<Event<TypedSendable>> {
        &self.sendables
    }

    pub fn messages(&self) -> &MultiQueue<Event<Message>> {
        &self.messages
    }

    pub fn typing_states(&self) -> &MultiQueue<Event<TypingState>> {
        &self.typing_states
    }

    pub fn delivery_receipts(&self) -> &MultiQueue<Event<DeliveryReceipt>> {
        &self.delivery_receipts
    }

    pub fn invitations(&self) -> &MultiQueue<Event<Invitation>> {
        &self.invitations
    }

    pub fn presences(&self) -> &MultiQueue<Event<Presence>> {
        &self.presences
    }

    pub fn errors(&self) -> Subscription<ChatError> {
        self.sendables.errors()
    }

    /// Publish on the untyped hub, then on the hub matching the variant.
    pub fn publish(&self, event: Event<TypedSendable>) {
        self.sendables.publish(event.clone());
        match event.get() {
            TypedSendable::Message(inner) => self.messages.publish(event.to(inner.clone())),
            TypedSendable::TypingState(inner) => {
                self.typing_states.publish(event.to(inner.clone()))
            }
            TypedSendable::DeliveryReceipt(inner) => {
                self.delivery_receipts.publish(event.to(inner.clone()))
            }
            TypedSendable::Invitation(inner) => self.invitations.publish(event.to(inner.clone())),
            TypedSendable::Presence(inner) => self.presences.publish(event.to(inner.clone())),
        }
    }

    pub fn publish_error(&self, error: ChatError) {
        self.sendables.publish_error(error);
    }

    pub fn dispose(&self) {
        self.sendables.dispose();
        self.messages.dispose();
        self.typing_states.dispose();
        self.delivery_receipts.dispose();
        self.invitations.dispose();
        self.presences.dispose();
    }
}

pub struct ChatEngine {
    store: Arc<dyn RealtimeStore>,
    context: Arc<ChatContext>,
    events: SendableEvents,
    connected: AtomicBool,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    acknowledged: Mutex<HashSet<ReceiptKey>>,
}

impl ChatEngine {
    pub fn new(store: Arc<dyn RealtimeStore>, context: Arc<ChatContext>) -> Self {
        Self {
            store,
            context,
            events: SendableEvents::new(),
            connected: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RealtimeStore> {
        &self.store
    }

    pub fn context(&self) -> &Arc<ChatContext> {
        &self.context
    }

    pub fn events(&self) -> &SendableEvents {
        &self.events
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Claim the connected state. Returns `false` if the engine was already
    /// connected, in which case the caller must not register listeners again.
    pub fn begin_connect(&self) -> bool {
        !self.connected.swap(true, Ordering::SeqCst)
    }

    /// Run `task` until it finishes or the engine disconnects.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|listener| !listener.is_finished());
        listeners.push(handle);
    }

    /// Register a list listener on `path` and feed every change to `handler`.
    ///
    /// The listener is registered before this returns; changes arrive
    /// asynchronously. Feed errors go to the error channel.
    pub fn listen_list<F>(&self, path: &Path, mut handler: F)
    where
        F: FnMut(Event<ListData>) + Send + 'static,
    {
        let mut feed = self.store.list_changes(path);
        let events = self.events.clone();
        let path = path.clone();
        self.spawn(async move {
            while let Some(change) = feed.next().await {
                match change {
                    Ok(change) => handler(change.into_event()),
                    Err(error) => {
                        warn!(%path, %error, "list listener error");
                        events.publish_error(error.into());
                    }
                }
            }
            debug!(%path, "list feed ended");
        });
    }

    /// Register a value listener on `path`.
    pub fn listen_value<F>(&self, path: &Path, mut handler: F)
    where
        F: FnMut(Option<Value>) + Send + 'static,
    {
        let mut feed = self.store.value_changes(path);
        let events = self.events.clone();
        let path = path.clone();
        self.spawn(async move {
            while let Some(change) = feed.next().await {
                match change {
                    Ok(value) => handler(value),
                    Err(error) => {
                        warn!(%path, %error, "value listener error");
                        events.publish_error(error.into());
                    }
                }
            }
            debug!(%path, "value feed ended");
        });
    }

    /// Decode every entry of the sendable stream at `path` and publish it on
    /// the matching hub. Malformed entries are reported and skipped.
    pub fn listen_sendables(&self, path: &Path) {
        let events = self.events.clone();
        self.listen_list(path, move |event| {
            match TypedSendable::decode(event.get()) {
                Ok(sendable) => events.publish(event.to(sendable)),
                Err(error) => {
                    warn!(id = %event.get().id, %error, "skipping malformed sendable");
                    events.publish_error(error);
                }
            }
        });
    }

    /// Cancel every listener. Safe to call repeatedly or before connecting.
    pub fn disconnect(&self) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let cancelled = listeners.len();
        for listener in listeners {
            listener.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) || cancelled > 0 {
            debug!(cancelled, "chat engine disconnected");
        }
    }

    pub async fn add_user_at(
        &self,
        path: &Path,
        provider: DataProvider,
        user: &User,
    ) -> ChatResult<()> {
        self.store
            .set_field(path, user.id(), provider(user))
            .await?;
        Ok(())
    }

    /// Write every user concurrently and wait for all of them.
    pub async fn add_users_at(
        &self,
        path: &Path,
        provider: DataProvider,
        users: &[User],
    ) -> ChatResult<()> {
        try_join_all(users.iter().map(|user| self.add_user_at(path, provider, user))).await?;
        Ok(())
    }

    pub async fn update_user_at(
        &self,
        path: &Path,
        provider: DataProvider,
        user: &User,
    ) -> ChatResult<()> {
        self.add_user_at(path, provider, user).await
    }

    pub async fn update_users_at(
        &self,
        path: &Path,
        provider: DataProvider,
        users: &[User],
    ) -> ChatResult<()> {
        self.add_users_at(path, provider, users).await
    }

    pub async fn remove_user_at(&self, path: &Path, user: &User) -> ChatResult<()> {
        self.store.remove_entry(&path.child(user.id())).await?;
        Ok(())
    }

    pub async fn remove_users_at(&self, path: &Path, users: &[User]) -> ChatResult<()> {
        try_join_all(users.iter().map(|user| self.remove_user_at(path, user))).await?;
        Ok(())
    }

    /// Append `sendable` to the stream at `path` and return it with the id
    /// the store assigned.
    pub async fn send_at(
        &self,
        path: &Path,
        sendable: impl Into<Sendable>,
    ) -> ChatResult<Sendable> {
        let mut sendable = sendable.into();
        let id = self.store.add_entry(path, sendable.to_value()).await?;
        debug!(%path, %id, kind = sendable.kind().as_str(), "sendable sent");
        sendable.assign_id(id)?;
        Ok(sendable)
    }

    pub async fn delete_sendable_at(&self, path: &Path) -> ChatResult<()> {
        self.store.remove_entry(path).await?;
        debug!(%path, "sendable deleted");
        Ok(())
    }

    /// Current value stored at `path`.
    pub async fn snapshot(&self, path: &Path) -> ChatResult<Option<Value>> {
        let mut feed = self.store.value_changes(path);
        match feed.next().await {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(error.into()),
            None => Ok(None),
        }
    }

    /// Append `receipt` to the stream at `path` unless its author already
    /// stored a receipt of the same type for the same message there.
    ///
    /// Returns `None` when nothing was written.
    pub async fn send_receipt_once(
        &self,
        path: &Path,
        receipt: DeliveryReceipt,
    ) -> ChatResult<Option<Sendable>> {
        let (Some(receipt_type), Some(message_id)) =
            (receipt.receipt_type(), receipt.message_id())
        else {
            return Err(ChatError::validation(
                "delivery receipt needs a type and a message id",
            ));
        };
        let key: ReceiptKey = (path.clone(), message_id.to_string(), receipt_type);
        if !self.acknowledged().insert(key.clone()) {
            debug!(%path, message_id, "receipt already sent");
            return Ok(None);
        }

        let result = match self.stored_receipt_exists(path, &receipt).await {
            Ok(true) => {
                debug!(%path, message_id = %key.1, "receipt already stored");
                return Ok(None);
            }
            Ok(false) => self.send_at(path, receipt).await.map(Some),
            Err(error) => Err(error),
        };
        if result.is_err() {
            self.acknowledged().remove(&key);
        }
        result
    }

    async fn stored_receipt_exists(
        &self,
        path: &Path,
        receipt: &DeliveryReceipt,
    ) -> ChatResult<bool> {
        let Some(Value::Object(entries)) = self.snapshot(path).await? else {
            return Ok(false);
        };
        Ok(entries.into_iter().any(|(id, value)| {
            match TypedSendable::decode(&ListData::new(id, value)) {
                Ok(TypedSendable::DeliveryReceipt(stored)) => {
                    stored.sender() == receipt.sender()
                        && stored.receipt_type() == receipt.receipt_type()
                        && stored.message_id() == receipt.message_id()
                }
                _ => false,
            }
        }))
    }

    fn acknowledged(&self) -> MutexGuard<'_, HashSet<ReceiptKey>> {
        self.acknowledged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        for listener in self
            .listeners
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::role_type_data_provider;
    use crate::store::InMemoryStore;
    use crate::types::RoleType;
    use serde_json::json;
    use std::time::Duration;
    use switchboard_config::AppConfig;
    use tokio::time::timeout;

    fn engine() -> (Arc<InMemoryStore>, ChatEngine) {
        let store = Arc::new(InMemoryStore::new());
        let context = Arc::new(ChatContext::new(AppConfig::default()));
        context.sign_in("u1").unwrap();
        (store.clone(), ChatEngine::new(store, context))
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_stop_delivery() {
        let (store, engine) = engine();
        let path = Path::new(["chats", "c1", "messages"]);
        let mut messages = engine.events().messages().all_events();
        let mut errors = engine.events().errors();

        assert!(engine.begin_connect());
        engine.listen_sendables(&path);

        store.add_entry(&path, json!({ "from": "u2" })).await.unwrap();
        engine
            .send_at(&path, Message::with_text("u2", "still here"))
            .await
            .unwrap();

        let error = timeout(Duration::from_secs(1), errors.recv()).await.unwrap();
        assert!(matches!(error, Some(ChatError::MalformedSendable { .. })));

        let event = timeout(Duration::from_secs(1), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.get().text(), Some("still here"));
        engine.disconnect();
    }

    #[tokio::test]
    async fn test_connect_claim_is_idempotent() {
        let (_store, engine) = engine();
        assert!(engine.begin_connect());
        assert!(!engine.begin_connect());
        engine.disconnect();
        engine.disconnect();
        assert!(!engine.is_connected());
        assert!(engine.begin_connect());
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let (_store, engine) = engine();
        let path = Path::new(["chats", "c1", "messages"]);
        let mut all = engine.events().sendables().all_events();
        engine.listen_sendables(&path);
        engine.disconnect();

        engine
            .send_at(&path, Message::with_text("u1", "unheard"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(all.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_roster_primitives_write_through() {
        let (store, engine) = engine();
        let path = Path::new(["chats", "c1", "users"]);
        let users = vec![
            User::new("u1").with_role(RoleType::Owner),
            User::new("u2"),
        ];

        engine
            .add_users_at(&path, role_type_data_provider, &users)
            .await
            .unwrap();
        assert_eq!(
            store.value_at(&path),
            Some(json!({
                "u1": { "role": "owner" },
                "u2": { "role": "member" },
            }))
        );

        engine.remove_users_at(&path, &users[1..]).await.unwrap();
        assert_eq!(store.value_at(&path.child("u2")), None);
    }

    #[tokio::test]
    async fn test_send_assigns_store_id() {
        let (store, engine) = engine();
        let path = Path::new(["users", "u2", "messages"]);
        let sent = engine
            .send_at(&path, Message::with_text("u1", "hi"))
            .await
            .unwrap();

        let id = sent.id().unwrap().to_string();
        assert!(store.value_at(&path.child(id.as_str())).is_some());

        engine.delete_sendable_at(&path.child(id.as_str())).await.unwrap();
        assert!(store.value_at(&path.child(id.as_str())).is_none());
    }
}
