//! Domain entities for the chat system.
//!
//! Roster users, group metadata and the sendable protocol model. These are
//! plain values; the services own every mutation.

pub mod meta;
pub mod sendable;
pub mod user;

// Re-export all entity types
pub use meta::Meta;
pub use sendable::{
    DeliveryReceipt, Invitation, Message, Presence, Sendable, SendableKind, TypedSendable,
    TypingState,
};
pub use user::{
    contact_type_data_provider, date_data_provider, role_type_data_provider, DataProvider, User,
};
