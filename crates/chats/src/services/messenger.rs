//! Per-user messaging surface.
//!
//! The [`Messenger`] is the signed-in user's one-to-one channel: it listens
//! on the user's inbox, contact and block lists, muted list and chat
//! directory, and owns the group chats the user belongs to.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context::ChatContext;
use crate::entities::{
    contact_type_data_provider, date_data_provider, DeliveryReceipt, Invitation, Message,
    Presence, Sendable, TypingState, User,
};
use crate::hub::MultiQueue;
use crate::paths::Keys;
use crate::services::chat::{Chat, ChatEnv};
use crate::services::engine::{ChatEngine, SendableEvents};
use crate::services::mute::{MuteService, MuteState};
use crate::store::RealtimeStore;
use crate::types::{
    ChatError, ChatResult, ContactType, DeliveryReceiptType, Event, EventType, InvitationType,
    ListData, PresenceType, RoleType, TypingStateType,
};
use crate::utils::PermissionGate;

/// A roster kept in sync with a store list, with its change hub
#[derive(Default)]
struct Roster {
    users: RwLock<Vec<User>>,
    events: MultiQueue<Event<User>>,
}

impl Roster {
    fn apply(&self, change: Event<ListData>) {
        let user = User::from_list_data(change.get());
        let event = change.to(user.clone());
        {
            let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
            users.retain(|existing| existing != &user);
            if !event.type_is(EventType::Removed) {
                users.push(user);
            }
        }
        self.events.publish(event);
    }

    fn users(&self) -> Vec<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn contains(&self, user: &User) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user)
    }

    fn clear(&self) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

struct MessengerState {
    env: ChatEnv,
    engine: ChatEngine,
    mute: Arc<MuteService>,
    contacts: Roster,
    blocked: Roster,
    chats: RwLock<Vec<Chat>>,
    chat_events: MultiQueue<Event<Chat>>,
}

impl MessengerState {
    /// Track `chat` and connect it. Returns `false` if it was already known.
    fn insert_chat(&self, chat: Chat) -> bool {
        {
            let mut chats = self.chats.write().unwrap_or_else(PoisonError::into_inner);
            if chats.contains(&chat) {
                return false;
            }
            chats.push(chat.clone());
        }

        let connecting = chat.clone();
        self.engine.spawn(async move {
            if let Err(error) = connecting.connect().await {
                warn!(chat_id = %connecting.id(), %error, "failed to connect chat");
            }
        });
        self.chat_events.publish(Event::added(chat));
        true
    }

    fn remove_chat(&self, chat_id: &str) -> Option<Chat> {
        let removed = {
            let mut chats = self.chats.write().unwrap_or_else(PoisonError::into_inner);
            let index = chats.iter().position(|chat| chat.id() == chat_id)?;
            chats.remove(index)
        };
        removed.disconnect();
        self.chat_events.publish(Event::removed(removed.clone()));
        Some(removed)
    }

    fn apply_directory_change(&self, change: Event<ListData>) {
        if change.type_is(EventType::Removed) {
            self.remove_chat(&change.get().id);
        } else if !change.type_is(EventType::Modified) {
            self.insert_chat(Chat::from_list_data(change.get(), &self.env));
        }
    }
}

/// Entry point for everything the signed-in user does.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerState>,
}

impl Messenger {
    pub fn new(store: Arc<dyn RealtimeStore>, context: Arc<ChatContext>) -> Self {
        let mute = Arc::new(MuteService::new(store.clone(), context.clone()));
        let env = ChatEnv {
            store: store.clone(),
            context: context.clone(),
            mute: mute.clone(),
        };
        Self {
            inner: Arc::new(MessengerState {
                env,
                engine: ChatEngine::new(store, context),
                mute,
                contacts: Roster::default(),
                blocked: Roster::default(),
                chats: RwLock::new(Vec::new()),
                chat_events: MultiQueue::new(),
            }),
        }
    }

    fn context(&self) -> &Arc<ChatContext> {
        &self.inner.env.context
    }

    pub fn is_connected(&self) -> bool {
        self.inner.engine.is_connected()
    }

    /// Start listening on everything the signed-in user owns.
    ///
    /// Incoming messages are acknowledged with `received` receipts and chat
    /// invitations are accepted when the configuration asks for it.
    pub async fn connect(&self) -> ChatResult<()> {
        let me = self.context().current_user_id()?;
        let paths = self.context().paths();
        let (contacts, blocked, muted, directory, inbox) = (
            paths.contacts()?,
            paths.blocked()?,
            paths.user_muted()?,
            paths.user_chats()?,
            paths.current_user_messages()?,
        );
        let engine = &self.inner.engine;
        if !engine.begin_connect() {
            return Ok(());
        }

        let state: Weak<MessengerState> = Arc::downgrade(&self.inner);
        engine.listen_list(&contacts, move |change| {
            if let Some(state) = state.upgrade() {
                state.contacts.apply(change);
            }
        });

        let state = Arc::downgrade(&self.inner);
        engine.listen_list(&blocked, move |change| {
            if let Some(state) = state.upgrade() {
                state.blocked.apply(change);
            }
        });

        let mute = Arc::downgrade(&self.inner.mute);
        engine.listen_list(&muted, move |change| {
            if let Some(mute) = mute.upgrade() {
                mute.apply(&change);
            }
        });

        let state = Arc::downgrade(&self.inner);
        engine.listen_list(&directory, move |change| {
            if let Some(state) = state.upgrade() {
                state.apply_directory_change(change);
            }
        });

        if self.context().delivery_receipts_enabled() {
            let mut messages = engine.events().messages().all_events();
            let state = Arc::downgrade(&self.inner);
            let me = me.clone();
            engine.spawn(async move {
                while let Some(event) = messages.recv().await {
                    let message = event.get();
                    if !event.type_is(EventType::Added) || message.sender() == me {
                        continue;
                    }
                    let (Some(id), Some(inner)) = (message.id(), state.upgrade()) else {
                        continue;
                    };
                    let messenger = Messenger { inner };
                    if let Err(error) = messenger.mark_received(message.sender(), id).await {
                        warn!(%error, "automatic delivery receipt failed");
                        messenger.events().publish_error(error);
                    }
                }
            });
        }

        if self.context().auto_accept_chat_invite() {
            let mut invitations = engine.events().invitations().all_events();
            let state = Arc::downgrade(&self.inner);
            engine.spawn(async move {
                while let Some(event) = invitations.recv().await {
                    let invitation = event.get();
                    if !event.type_is(EventType::Added)
                        || invitation.invitation_type() != Some(InvitationType::Chat)
                    {
                        continue;
                    }
                    let (Some(chat_id), Some(inner)) = (invitation.chat_id(), state.upgrade())
                    else {
                        continue;
                    };
                    let messenger = Messenger { inner };
                    if let Err(error) = messenger.join_chat(chat_id).await {
                        warn!(chat_id, %error, "failed to accept chat invitation");
                        messenger.events().publish_error(error);
                    }
                }
            });
        }

        engine.listen_sendables(&inbox);
        info!(user_id = %me, "messenger connected");
        Ok(())
    }

    /// Stop every listener and forget the user's local state.
    pub fn disconnect(&self) {
        self.inner.engine.disconnect();
        let chats: Vec<Chat> = self
            .inner
            .chats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for chat in &chats {
            chat.disconnect();
        }
        self.inner.contacts.clear();
        self.inner.blocked.clear();
        self.inner.mute.clear();
        debug!(chats = chats.len(), "messenger disconnected");
    }

    /// Inbox events of the signed-in user
    pub fn events(&self) -> &SendableEvents {
        self.inner.engine.events()
    }

    /// Send `sendable` to the inbox of `to_user`.
    pub async fn send(&self, to_user: &str, sendable: impl Into<Sendable>) -> ChatResult<Sendable> {
        let inbox = self.context().paths().messages(to_user);
        self.inner.engine.send_at(&inbox, sendable).await
    }

    pub async fn send_message_with_text(&self, to_user: &str, text: &str) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(to_user, Message::with_text(me, text)).await
    }

    pub async fn send_message_with_body(
        &self,
        to_user: &str,
        body: Map<String, Value>,
    ) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(to_user, Message::with_body(me, body)).await
    }

    pub async fn send_typing_indicator(
        &self,
        to_user: &str,
        state: TypingStateType,
    ) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(to_user, TypingState::new(me, state)).await
    }

    pub async fn send_delivery_receipt(
        &self,
        to_user: &str,
        receipt: DeliveryReceiptType,
        message_id: &str,
    ) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(to_user, DeliveryReceipt::new(me, receipt, message_id))
            .await
    }

    pub async fn send_invitation(&self, to_user: &str, chat_id: &str) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(to_user, Invitation::new(me, InvitationType::Chat, chat_id))
            .await
    }

    pub async fn send_presence(
        &self,
        to_user: &str,
        presence: PresenceType,
    ) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(to_user, Presence::new(me, presence)).await
    }

    /// Tell `from_user` their message arrived. Only the first call for a
    /// message stores a receipt; later calls return `None`.
    pub async fn mark_received(
        &self,
        from_user: &str,
        message_id: &str,
    ) -> ChatResult<Option<Sendable>> {
        self.acknowledge(from_user, DeliveryReceiptType::Received, message_id)
            .await
    }

    pub async fn mark_read(
        &self,
        from_user: &str,
        message_id: &str,
    ) -> ChatResult<Option<Sendable>> {
        self.acknowledge(from_user, DeliveryReceiptType::Read, message_id)
            .await
    }

    async fn acknowledge(
        &self,
        from_user: &str,
        receipt: DeliveryReceiptType,
        message_id: &str,
    ) -> ChatResult<Option<Sendable>> {
        let me = self.context().current_user_id()?;
        let inbox = self.context().paths().messages(from_user);
        self.inner
            .engine
            .send_receipt_once(&inbox, DeliveryReceipt::new(me, receipt, message_id))
            .await
    }

    /// Remove a sendable from the signed-in user's inbox.
    pub async fn delete_sendable(&self, sendable_id: &str) -> ChatResult<()> {
        let path = self.context().paths().current_user_message(sendable_id)?;
        self.inner.engine.delete_sendable_at(&path).await
    }

    pub async fn add_contact(&self, user: &User, contact: ContactType) -> ChatResult<()> {
        debug!(user_id = %user.id(), contact = contact.as_str(), "adding contact");
        let path = self.context().paths().contacts()?;
        self.inner
            .engine
            .add_user_at(&path, contact_type_data_provider, user)
            .await
    }

    pub async fn remove_contact(&self, user: &User) -> ChatResult<()> {
        let path = self.context().paths().contacts()?;
        self.inner.engine.remove_user_at(&path, user).await
    }

    pub fn contacts(&self) -> Vec<User> {
        self.inner.contacts.users()
    }

    pub fn contact_events(&self) -> &MultiQueue<Event<User>> {
        &self.inner.contacts.events
    }

    pub async fn block(&self, user: &User) -> ChatResult<()> {
        let path = self.context().paths().blocked()?;
        self.inner
            .engine
            .add_user_at(&path, date_data_provider, user)
            .await?;
        info!(user_id = %user.id(), "user blocked");
        Ok(())
    }

    pub async fn unblock(&self, user: &User) -> ChatResult<()> {
        let path = self.context().paths().blocked()?;
        self.inner.engine.remove_user_at(&path, user).await
    }

    pub fn blocked(&self) -> Vec<User> {
        self.inner.blocked.users()
    }

    pub fn is_blocked(&self, user: &User) -> bool {
        self.inner.blocked.contains(user)
    }

    pub fn blocked_events(&self) -> &MultiQueue<Event<User>> {
        &self.inner.blocked.events
    }

    /// Create a group chat owned by the signed-in user and add it to the
    /// user's chat directory.
    pub async fn create_chat(
        &self,
        name: &str,
        image_url: &str,
        data: Map<String, Value>,
        users: Vec<User>,
    ) -> ChatResult<Chat> {
        let chat = Chat::create(&self.inner.env, name, image_url, data, users).await?;
        self.inner.insert_chat(chat.clone());
        self.join_chat(chat.id()).await?;
        Ok(chat)
    }

    /// Record `chat_id` in the signed-in user's chat directory.
    pub async fn join_chat(&self, chat_id: &str) -> ChatResult<()> {
        let directory = self.context().paths().user_chats()?;
        let mut entry = Map::new();
        entry.insert(Keys::DATE.to_string(), Value::from(Utc::now().timestamp_millis()));
        self.inner
            .env
            .store
            .set_field(&directory, chat_id, Value::Object(entry))
            .await?;
        info!(chat_id, "joined chat");
        Ok(())
    }

    /// Leave a chat and drop it from the directory.
    pub async fn leave_chat(&self, chat_id: &str) -> ChatResult<()> {
        let chat = self
            .chat(chat_id)
            .ok_or_else(|| ChatError::chat_not_found(chat_id))?;
        chat.leave().await?;
        let entry = self.context().paths().user_chat(chat_id)?;
        self.inner.env.store.remove_entry(&entry).await?;
        self.inner.remove_chat(chat_id);
        Ok(())
    }

    pub fn chat(&self, chat_id: &str) -> Option<Chat> {
        self.inner
            .chats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|chat| chat.id() == chat_id)
            .cloned()
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.inner
            .chats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn chat_events(&self) -> &MultiQueue<Event<Chat>> {
        &self.inner.chat_events
    }

    pub async fn mute(&self, user: &User, until: Option<DateTime<Utc>>) -> ChatResult<()> {
        self.inner.mute.mute(user.id(), until).await
    }

    pub async fn unmute(&self, user: &User) -> ChatResult<()> {
        self.inner.mute.unmute(user.id()).await
    }

    pub fn muted_until(&self, user: &User) -> Option<DateTime<Utc>> {
        self.inner.mute.muted_until(user.id())
    }

    pub fn is_muted(&self, user: &User) -> bool {
        self.inner.mute.is_muted(user.id())
    }
}

/// One-to-one traffic is not role gated.
impl PermissionGate for Messenger {
    fn has_permission(&self, _required: RoleType) -> bool {
        true
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("connected", &self.is_connected())
            .field("chats", &self.chats().len())
            .finish()
    }
}
