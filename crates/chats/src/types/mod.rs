//! Shared types and interfaces for the chat system.
//!
//! This module contains the role model, the protocol-level type tags carried
//! inside sendable bodies, and the event wrapper every hub publishes.

pub mod errors;
pub mod events;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use errors::{ChatError, ChatResult};
pub use events::{Event, EventType, ListData};

// Common type aliases
pub type ChatId = String;
pub type UserId = String;
pub type SendableId = String;

/// Role of a user inside a group chat, ordered by privilege:
/// owner > admin > member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Owner,
    Admin,
    Member,
}

impl RoleType {
    /// Get the permission level for this role (higher number = more permissions)
    pub fn permission_level(&self) -> u8 {
        match self {
            RoleType::Owner => 3,
            RoleType::Admin => 2,
            RoleType::Member => 1,
        }
    }

    /// Check if this role grants at least the permissions of `required`
    pub fn test(&self, required: RoleType) -> bool {
        self.permission_level() >= required.permission_level()
    }

    /// All roles, most privileged first
    pub fn all() -> Vec<RoleType> {
        vec![RoleType::Owner, RoleType::Admin, RoleType::Member]
    }

    /// All roles apart from the excluded ones, most privileged first
    pub fn all_excluding(excluded: &[RoleType]) -> Vec<RoleType> {
        Self::all()
            .into_iter()
            .filter(|role| !excluded.contains(role))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Owner => "owner",
            RoleType::Admin => "admin",
            RoleType::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(RoleType::Owner),
            "admin" => Some(RoleType::Admin),
            "member" => Some(RoleType::Member),
            _ => None,
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typing indicator state carried by a `typing` sendable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingStateType {
    Typing,
    None,
}

impl TypingStateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypingStateType::Typing => "typing",
            TypingStateType::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "typing" => Some(TypingStateType::Typing),
            "none" => Some(TypingStateType::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryReceiptType {
    Received,
    Read,
}

impl DeliveryReceiptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryReceiptType::Received => "received",
            DeliveryReceiptType::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(DeliveryReceiptType::Received),
            "read" => Some(DeliveryReceiptType::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationType {
    Chat,
}

impl InvitationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationType::Chat => "chat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(InvitationType::Chat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Available,
    Busy,
    Away,
    Unavailable,
}

impl PresenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceType::Available => "available",
            PresenceType::Busy => "busy",
            PresenceType::Away => "away",
            PresenceType::Unavailable => "unavailable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(PresenceType::Available),
            "busy" => Some(PresenceType::Busy),
            "away" => Some(PresenceType::Away),
            "unavailable" => Some(PresenceType::Unavailable),
            _ => None,
        }
    }
}

/// Relationship stored in a user's contact roster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactType {
    Contact,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::Contact => "contact",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "contact" => Some(ContactType::Contact),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(RoleType::Owner.test(RoleType::Admin));
        assert!(RoleType::Owner.test(RoleType::Member));
        assert!(RoleType::Admin.test(RoleType::Member));
        assert!(RoleType::Admin.test(RoleType::Admin));
        assert!(!RoleType::Member.test(RoleType::Admin));
        assert!(!RoleType::Admin.test(RoleType::Owner));
    }

    #[test]
    fn test_all_excluding_keeps_privilege_order() {
        assert_eq!(
            RoleType::all_excluding(&[RoleType::Owner]),
            vec![RoleType::Admin, RoleType::Member]
        );
        assert_eq!(
            RoleType::all_excluding(&[RoleType::Owner, RoleType::Admin]),
            vec![RoleType::Member]
        );
    }

    #[test]
    fn test_role_conversion() {
        for role in RoleType::all() {
            assert_eq!(RoleType::parse(role.as_str()), Some(role));
        }
        assert_eq!(RoleType::parse("watcher"), None);
        assert_eq!(serde_json::to_value(RoleType::Admin).unwrap(), "admin");
    }

    #[test]
    fn test_protocol_tags_round_trip() {
        assert_eq!(TypingStateType::parse("typing"), Some(TypingStateType::Typing));
        assert_eq!(DeliveryReceiptType::parse("read"), Some(DeliveryReceiptType::Read));
        assert_eq!(InvitationType::parse("chat"), Some(InvitationType::Chat));
        assert_eq!(PresenceType::parse("away"), Some(PresenceType::Away));
        assert_eq!(ContactType::parse("contact"), Some(ContactType::Contact));
        assert_eq!(DeliveryReceiptType::parse("seen"), None);
    }
}
