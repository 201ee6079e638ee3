//! # Switchboard Chats Crate
//!
//! Client-side coordination layer for realtime chat on top of a
//! hierarchical realtime key-value store. It turns raw store change feeds
//! into typed, fan-out event streams and enforces the group chat role model
//! before any write reaches the store.
//!
//! ## Architecture
//!
//! - **Hub**: multi-queue event fan-out ([`MultiQueue`])
//! - **Paths**: store locations derived from the session ([`Paths`])
//! - **Entities**: users, chat metadata and the sendable protocol
//! - **Services**: the shared chat engine, group chats and the messenger
//! - **Store**: the collaborator contract and an in-memory implementation
//! - **Types**: roles, protocol type tags, events and errors
//! - **Utils**: permission rules and validation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use switchboard_chats::{ChatContext, InMemoryStore, Messenger, User};
//! use switchboard_config::AppConfig;
//!
//! # async fn run() -> switchboard_chats::ChatResult<()> {
//! let context = Arc::new(ChatContext::new(AppConfig::default()));
//! context.sign_in("alice")?;
//!
//! let messenger = Messenger::new(Arc::new(InMemoryStore::new()), context);
//! messenger.connect().await?;
//!
//! let chat = messenger
//!     .create_chat("Team", "", Default::default(), vec![User::new("bob")])
//!     .await?;
//! chat.send_message_with_text("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod entities;
pub mod hub;
pub mod paths;
pub mod services;
pub mod store;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use context::ChatContext;
pub use entities::{
    DeliveryReceipt, Invitation, Message, Meta, Presence, Sendable, SendableKind, TypedSendable,
    TypingState, User,
};
pub use hub::{MultiQueue, Subscription};
pub use paths::{Keys, Path, Paths};
pub use services::{Chat, ChatEngine, ChatEnv, Messenger, MuteService, MuteState, SendableEvents};
pub use store::{InMemoryStore, RealtimeStore, StoreError};
pub use types::{
    ChatError, ChatResult, ContactType, DeliveryReceiptType, Event, EventType, InvitationType,
    ListData, PresenceType, RoleType, TypingStateType,
};
pub use utils::{PermissionChecker, PermissionGate};
