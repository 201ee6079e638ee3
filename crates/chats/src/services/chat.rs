//! Group chat.
//!
//! The roster and the meta object are the chat's state. Both are changed
//! only by the chat itself: through its own writes followed by an
//! optimistic local update, or through change notifications from the store.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, TimeZone, Utc};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context::ChatContext;
use crate::entities::{
    role_type_data_provider, DataProvider, DeliveryReceipt, Invitation, Message, Meta, Sendable,
    TypingState, User,
};
use crate::hub::MultiQueue;
use crate::paths::{Keys, Path};
use crate::services::engine::{ChatEngine, SendableEvents};
use crate::services::mute::MuteState;
use crate::store::RealtimeStore;
use crate::types::{
    ChatError, ChatId, ChatResult, DeliveryReceiptType, Event, EventType, InvitationType,
    ListData, RoleType, TypingStateType,
};
use crate::utils::{PermissionChecker, PermissionGate, Validator};

/// Collaborators every chat needs
#[derive(Clone)]
pub struct ChatEnv {
    pub store: Arc<dyn RealtimeStore>,
    pub context: Arc<ChatContext>,
    pub mute: Arc<dyn MuteState>,
}

struct ChatState {
    id: ChatId,
    joined: Option<DateTime<Utc>>,
    engine: ChatEngine,
    mute: Arc<dyn MuteState>,
    users: RwLock<Vec<User>>,
    meta: RwLock<Meta>,
    user_events: MultiQueue<Event<User>>,
    name_changes: MultiQueue<String>,
    image_url_changes: MultiQueue<String>,
    custom_data_changes: MultiQueue<Map<String, Value>>,
}

impl ChatState {
    fn users(&self) -> Vec<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dedup by id: drop the stale entry, re-add unless the user was removed.
    fn apply_roster_change(&self, change: Event<ListData>) {
        let user = User::from_list_data(change.get());
        let event = change.to(user.clone());
        {
            let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
            users.retain(|existing| existing != &user);
            if !event.type_is(EventType::Removed) {
                users.push(user);
            }
        }
        self.user_events.publish(event);
    }

    fn add_local_users(&self, added: &[User]) {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        for user in added {
            users.retain(|existing| existing != user);
            users.push(user.clone());
        }
    }

    fn replace_name(&self, name: &str) {
        let changed = {
            let mut meta = self.meta.write().unwrap_or_else(PoisonError::into_inner);
            if meta.name == name {
                false
            } else {
                meta.name = name.to_string();
                true
            }
        };
        if changed {
            self.name_changes.publish(name.to_string());
        }
    }

    fn replace_image_url(&self, url: &str) {
        let changed = {
            let mut meta = self.meta.write().unwrap_or_else(PoisonError::into_inner);
            if meta.image_url == url {
                false
            } else {
                meta.image_url = url.to_string();
                true
            }
        };
        if changed {
            self.image_url_changes.publish(url.to_string());
        }
    }

    fn replace_custom_data(&self, data: &Map<String, Value>) {
        let changed = {
            let mut meta = self.meta.write().unwrap_or_else(PoisonError::into_inner);
            if meta.data == *data {
                false
            } else {
                meta.data = data.clone();
                true
            }
        };
        if changed {
            self.custom_data_changes.publish(data.clone());
        }
    }

    /// Fold a meta snapshot from the store into the local copy. Echoes of
    /// values already held are no-ops.
    fn apply_meta(&self, value: Option<Value>) {
        let Some(value) = value else {
            return;
        };
        let incoming = Meta::from_value(Some(&value));
        if !incoming.name.is_empty() {
            self.replace_name(&incoming.name);
        }
        if !incoming.image_url.is_empty() {
            self.replace_image_url(&incoming.image_url);
        }
        if value.get(Keys::DATA).is_some() {
            self.replace_custom_data(&incoming.data);
        }
        if incoming.created.is_some() {
            self.meta
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .created = incoming.created;
        }
    }
}

/// A group chat with a role-gated roster and shared metadata.
///
/// Cloning is cheap and every clone refers to the same chat.
#[derive(Clone)]
pub struct Chat {
    inner: Arc<ChatState>,
}

impl Chat {
    fn build(id: ChatId, joined: Option<DateTime<Utc>>, meta: Meta, env: &ChatEnv) -> Self {
        Self {
            inner: Arc::new(ChatState {
                id,
                joined,
                engine: ChatEngine::new(env.store.clone(), env.context.clone()),
                mute: env.mute.clone(),
                users: RwLock::new(Vec::new()),
                meta: RwLock::new(meta),
                user_events: MultiQueue::new(),
                name_changes: MultiQueue::new(),
                image_url_changes: MultiQueue::new(),
                custom_data_changes: MultiQueue::new(),
            }),
        }
    }

    /// Handle on an existing chat. Nothing is loaded until [`Chat::connect`].
    pub fn new(id: impl Into<ChatId>, env: &ChatEnv) -> Self {
        Self::build(id.into(), None, Meta::default(), env)
    }

    /// Handle on a chat listed in the user's chat directory; the entry may
    /// carry the date the user joined.
    pub fn from_list_data(entry: &ListData, env: &ChatEnv) -> Self {
        let joined = entry
            .get(Keys::DATE)
            .and_then(Value::as_i64)
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        Self::build(entry.id.clone(), joined, Meta::default(), env)
    }

    /// Create a chat owned by the signed-in user.
    ///
    /// Every other user is added as a member, unless a role was given, and
    /// receives an invitation.
    pub async fn create(
        env: &ChatEnv,
        name: &str,
        image_url: &str,
        data: Map<String, Value>,
        users: Vec<User>,
    ) -> ChatResult<Chat> {
        let me = env.context.current_user_id()?;
        Validator::chat_name(name)?;

        let meta = Meta::new(name, image_url)
            .with_data(data)
            .with_timestamp();
        let mut record = Map::new();
        record.insert(Keys::META.to_string(), meta.to_value());
        let chat_id = env
            .store
            .add_entry(&env.context.paths().chats(), Value::Object(record))
            .await?;
        info!(chat_id = %chat_id, name, "group chat created");

        // The creator is the only owner.
        let mut members: Vec<User> = Vec::new();
        for user in users {
            if user.id() == me || members.contains(&user) {
                continue;
            }
            let role = match user.role() {
                Some(RoleType::Owner) | None => RoleType::Member,
                Some(role) => role,
            };
            members.push(user.with_role(role));
        }
        members.push(User::new(me).with_role(RoleType::Owner));

        let chat = Self::build(chat_id, None, meta, env);
        chat.write_users(true, &members).await?;
        Ok(chat)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn joined(&self) -> Option<DateTime<Utc>> {
        self.inner.joined
    }

    fn context(&self) -> &Arc<ChatContext> {
        self.inner.engine.context()
    }

    fn users_path(&self) -> Path {
        self.context().paths().chat_users(&self.inner.id)
    }

    fn messages_path(&self) -> Path {
        self.context().paths().chat_messages(&self.inner.id)
    }

    pub fn path(&self) -> Path {
        self.context().paths().chat(&self.inner.id)
    }

    pub fn meta_path(&self) -> Path {
        self.context().paths().chat_meta(&self.inner.id)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.engine.is_connected()
    }

    /// Start listening on the roster, the meta object and the message stream.
    ///
    /// A second call while connected does nothing. When delivery receipts are
    /// enabled every incoming message from another user is answered with a
    /// `received` receipt.
    pub async fn connect(&self) -> ChatResult<()> {
        let me = self.context().current_user_id()?;
        let engine = &self.inner.engine;
        if !engine.begin_connect() {
            debug!(chat_id = %self.inner.id, "already connected");
            return Ok(());
        }

        let state: Weak<ChatState> = Arc::downgrade(&self.inner);
        engine.listen_list(&self.users_path(), move |change| {
            if let Some(state) = state.upgrade() {
                state.apply_roster_change(change);
            }
        });

        let state = Arc::downgrade(&self.inner);
        engine.listen_value(&self.meta_path(), move |value| {
            if let Some(state) = state.upgrade() {
                state.apply_meta(value);
            }
        });

        if self.context().delivery_receipts_enabled() {
            let mut messages = engine.events().messages().all_events();
            let state = Arc::downgrade(&self.inner);
            engine.spawn(async move {
                while let Some(event) = messages.recv().await {
                    if !event.type_is(EventType::Added) || event.get().sender() == me {
                        continue;
                    }
                    let Some(message_id) = event.get().id().map(str::to_string) else {
                        continue;
                    };
                    let Some(inner) = state.upgrade() else {
                        break;
                    };
                    let chat = Chat { inner };
                    if let Err(error) = chat.mark_received(&message_id).await {
                        warn!(chat_id = %chat.id(), %error, "automatic delivery receipt failed");
                        chat.events().publish_error(error);
                    }
                }
            });
        }

        engine.listen_sendables(&self.messages_path());
        info!(chat_id = %self.inner.id, "connected to chat");
        Ok(())
    }

    pub fn disconnect(&self) {
        self.inner.engine.disconnect();
    }

    /// Leave the chat.
    ///
    /// Owners must empty the roster first; an owner alone in the chat
    /// deletes it. The decision uses the stored roster, so it holds on a
    /// handle that has not received its roster yet.
    pub async fn leave(&self) -> ChatResult<()> {
        let me = User::new(self.context().current_user_id()?);
        let roster = self.stored_users().await?;
        let my_role = roster
            .iter()
            .find(|user| **user == me)
            .and_then(User::role);
        if my_role == Some(RoleType::Owner) {
            if roster.len() > 1 {
                return Err(ChatError::GroupMustBeEmpty);
            }
            self.inner.engine.store().remove_entry(&self.path()).await?;
            info!(chat_id = %self.inner.id, "last owner left, chat deleted");
        } else {
            self.inner
                .engine
                .remove_user_at(&self.users_path(), &me)
                .await?;
            info!(chat_id = %self.inner.id, "left chat");
        }
        self.disconnect();
        Ok(())
    }

    async fn stored_users(&self) -> ChatResult<Vec<User>> {
        let users = match self.inner.engine.snapshot(&self.users_path()).await? {
            Some(Value::Object(entries)) => entries
                .into_iter()
                .map(|(id, data)| User::from_list_data(&ListData::new(id, data)))
                .collect(),
            _ => Vec::new(),
        };
        Ok(users)
    }

    pub fn meta(&self) -> Meta {
        self.inner
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn name(&self) -> String {
        self.meta().name
    }

    pub fn image_url(&self) -> String {
        self.meta().image_url
    }

    pub fn custom_data(&self) -> Map<String, Value> {
        self.meta().data
    }

    async fn write_meta_field(&self, key: &str, value: Value) -> ChatResult<()> {
        self.inner
            .engine
            .store()
            .set_field(&self.meta_path(), key, value)
            .await?;
        Ok(())
    }

    pub async fn set_name(&self, name: &str) -> ChatResult<()> {
        self.require(RoleType::Admin)?;
        Validator::chat_name(name)?;
        if self.name() == name {
            return Ok(());
        }
        self.write_meta_field(Keys::NAME, Value::from(name)).await?;
        self.inner.replace_name(name);
        Ok(())
    }

    pub async fn set_image_url(&self, url: &str) -> ChatResult<()> {
        self.require(RoleType::Admin)?;
        if self.image_url() == url {
            return Ok(());
        }
        self.write_meta_field(Keys::IMAGE_URL, Value::from(url)).await?;
        self.inner.replace_image_url(url);
        Ok(())
    }

    pub async fn set_custom_data(&self, data: Map<String, Value>) -> ChatResult<()> {
        self.require(RoleType::Admin)?;
        if self.custom_data() == data {
            return Ok(());
        }
        self.write_meta_field(Keys::DATA, Value::Object(data.clone()))
            .await?;
        self.inner.replace_custom_data(&data);
        Ok(())
    }

    pub fn name_changes(&self) -> &MultiQueue<String> {
        &self.inner.name_changes
    }

    pub fn image_url_changes(&self) -> &MultiQueue<String> {
        &self.inner.image_url_changes
    }

    pub fn custom_data_changes(&self) -> &MultiQueue<Map<String, Value>> {
        &self.inner.custom_data_changes
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.users()
    }

    pub fn user_events(&self) -> &MultiQueue<Event<User>> {
        &self.inner.user_events
    }

    pub fn users_for_role(&self, role: RoleType) -> Vec<User> {
        self.inner
            .users()
            .into_iter()
            .filter(|user| user.has_role(role))
            .collect()
    }

    pub fn role_for(&self, user: &User) -> Option<RoleType> {
        self.inner
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|candidate| *candidate == user)
            .and_then(User::role)
    }

    pub fn my_role(&self) -> Option<RoleType> {
        let me = self.context().current_user_id().ok()?;
        self.role_for(&User::new(me))
    }

    /// Roles the signed-in user may assign to `user`.
    pub fn available_roles(&self, user: &User) -> Vec<RoleType> {
        PermissionChecker::available_roles(
            self.my_role(),
            self.role_for(user),
            self.context().is_me(user.id()),
        )
    }

    pub async fn set_role(&self, user: &User, role: RoleType) -> ChatResult<()> {
        let required = PermissionChecker::required_for_role_change(role, self.role_for(user));
        self.require(required)?;
        let updated = user.clone().with_role(role);
        self.inner
            .engine
            .update_user_at(&self.users_path(), role_type_data_provider, &updated)
            .await?;
        info!(chat_id = %self.inner.id, user_id = %user.id(), %role, "role changed");
        Ok(())
    }

    async fn write_users(&self, send_invite: bool, users: &[User]) -> ChatResult<()> {
        self.inner
            .engine
            .add_users_at(&self.users_path(), role_type_data_provider, users)
            .await?;
        if send_invite {
            self.invite_users(users).await?;
        }
        self.inner.add_local_users(users);
        Ok(())
    }

    /// Add users with their role (member when none is set), optionally
    /// inviting them. Adding an owner takes an owner.
    pub async fn add_users(&self, send_invite: bool, users: &[User]) -> ChatResult<()> {
        let adds_owner = users.iter().any(|user| user.has_role(RoleType::Owner));
        self.require(if adds_owner {
            RoleType::Owner
        } else {
            RoleType::Admin
        })?;
        let users: Vec<User> = users
            .iter()
            .map(|user| {
                let role = user.role().unwrap_or(RoleType::Member);
                user.clone().with_role(role)
            })
            .collect();
        self.write_users(send_invite, &users).await
    }

    pub async fn add_user(&self, send_invite: bool, user: &User) -> ChatResult<()> {
        self.add_users(send_invite, std::slice::from_ref(user)).await
    }

    /// Raw roster write at an explicit path with an explicit projection.
    pub async fn add_users_at(
        &self,
        path: &Path,
        provider: DataProvider,
        users: &[User],
    ) -> ChatResult<()> {
        self.inner.engine.add_users_at(path, provider, users).await
    }

    pub async fn update_users(&self, users: &[User]) -> ChatResult<()> {
        self.require(RoleType::Admin)?;
        self.inner
            .engine
            .update_users_at(&self.users_path(), role_type_data_provider, users)
            .await
    }

    pub async fn update_user(&self, user: &User) -> ChatResult<()> {
        self.update_users(std::slice::from_ref(user)).await
    }

    pub async fn update_users_at(
        &self,
        path: &Path,
        provider: DataProvider,
        users: &[User],
    ) -> ChatResult<()> {
        self.inner.engine.update_users_at(path, provider, users).await
    }

    pub async fn remove_users(&self, users: &[User]) -> ChatResult<()> {
        self.require(RoleType::Admin)?;
        self.inner
            .engine
            .remove_users_at(&self.users_path(), users)
            .await
    }

    pub async fn remove_user(&self, user: &User) -> ChatResult<()> {
        self.remove_users(std::slice::from_ref(user)).await
    }

    pub async fn remove_users_at(&self, path: &Path, users: &[User]) -> ChatResult<()> {
        self.inner.engine.remove_users_at(path, users).await
    }

    /// Send a chat invitation to each user's inbox, skipping the signed-in
    /// user.
    pub async fn invite_users(&self, users: &[User]) -> ChatResult<()> {
        let context = self.context();
        let me = context.current_user_id()?;
        let paths = context.paths();
        let engine = &self.inner.engine;
        let invitations = users
            .iter()
            .filter(|user| user.id() != me)
            .map(|user| {
                let invitation = Invitation::new(me.as_str(), InvitationType::Chat, self.id());
                let inbox = paths.messages(user.id());
                async move { engine.send_at(&inbox, invitation).await }
            });
        let sent = try_join_all(invitations).await?;
        debug!(chat_id = %self.inner.id, invited = sent.len(), "invitations sent");
        Ok(())
    }

    pub fn events(&self) -> &SendableEvents {
        self.inner.engine.events()
    }

    /// Send to the chat's message stream. Members only.
    pub async fn send(&self, sendable: impl Into<Sendable>) -> ChatResult<Sendable> {
        self.require(RoleType::Member)?;
        self.inner
            .engine
            .send_at(&self.messages_path(), sendable)
            .await
    }

    pub async fn send_message_with_text(&self, text: &str) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(Message::with_text(me, text)).await
    }

    pub async fn send_message_with_body(&self, body: Map<String, Value>) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(Message::with_body(me, body)).await
    }

    pub async fn send_typing_indicator(&self, state: TypingStateType) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(TypingState::new(me, state)).await
    }

    pub async fn send_delivery_receipt(
        &self,
        receipt: DeliveryReceiptType,
        message_id: &str,
    ) -> ChatResult<Sendable> {
        let me = self.context().current_user_id()?;
        self.send(DeliveryReceipt::new(me, receipt, message_id))
            .await
    }

    /// Acknowledge `message_id` as received. Only the first call stores a
    /// receipt, across reconnects too; later calls return `None`.
    pub async fn mark_received(&self, message_id: &str) -> ChatResult<Option<Sendable>> {
        self.acknowledge(DeliveryReceiptType::Received, message_id)
            .await
    }

    pub async fn mark_read(&self, message_id: &str) -> ChatResult<Option<Sendable>> {
        self.acknowledge(DeliveryReceiptType::Read, message_id).await
    }

    async fn acknowledge(
        &self,
        receipt: DeliveryReceiptType,
        message_id: &str,
    ) -> ChatResult<Option<Sendable>> {
        self.require(RoleType::Member)?;
        let me = self.context().current_user_id()?;
        self.inner
            .engine
            .send_receipt_once(
                &self.messages_path(),
                DeliveryReceipt::new(me, receipt, message_id),
            )
            .await
    }

    /// Delete a sent sendable; it must carry the id the store assigned.
    pub async fn delete_sendable(&self, sendable: &Sendable) -> ChatResult<()> {
        let id = sendable
            .id()
            .ok_or_else(|| ChatError::validation("sendable has not been sent"))?;
        self.delete_sendable_id(id).await
    }

    pub async fn delete_sendable_id(&self, id: &str) -> ChatResult<()> {
        self.require(RoleType::Member)?;
        self.inner
            .engine
            .delete_sendable_at(&self.messages_path().child(id))
            .await
    }

    pub async fn mute(&self, until: Option<DateTime<Utc>>) -> ChatResult<()> {
        self.inner.mute.mute(&self.inner.id, until).await
    }

    pub async fn unmute(&self) -> ChatResult<()> {
        self.inner.mute.unmute(&self.inner.id).await
    }

    pub fn muted_until(&self) -> Option<DateTime<Utc>> {
        self.inner.mute.muted_until(&self.inner.id)
    }

    pub fn is_muted(&self) -> bool {
        self.inner.mute.is_muted(&self.inner.id)
    }
}

impl PermissionGate for Chat {
    fn has_permission(&self, required: RoleType) -> bool {
        self.my_role()
            .map(|role| role.test(required))
            .unwrap_or(false)
    }
}

impl PartialEq for Chat {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat")
            .field("id", &self.inner.id)
            .field("users", &self.inner.users().len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
