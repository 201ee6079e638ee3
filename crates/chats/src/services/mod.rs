//! Services for the chat system.
//!
//! [`ChatEngine`] carries the behaviour every chat shares. [`Chat`] is the
//! role-gated group chat built on it and [`Messenger`] is the signed-in
//! user's own surface, which also owns the user's chats.

pub mod chat;
pub mod engine;
pub mod messenger;
pub mod mute;

// Re-export all services
pub use chat::{Chat, ChatEnv};
pub use engine::{ChatEngine, SendableEvents};
pub use messenger::Messenger;
pub use mute::{MuteService, MuteState};
