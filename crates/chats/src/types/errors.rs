//! Error types for the chat system.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::RoleType;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Main error type for the chat system.
///
/// Errors are `Clone` so a single failure can be fanned out to every
/// subscriber of a hub error channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    #[error("Permission denied: {required} role required")]
    PermissionDenied { required: RoleType },

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Malformed sendable: {reason}")]
    MalformedSendable { reason: String },

    #[error("Group must be empty to close")]
    GroupMustBeEmpty,

    #[error("Write failed: {0}")]
    WriteFailed(#[from] StoreError),

    #[error("Chat not found: {id}")]
    ChatNotFound { id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl ChatError {
    /// Create a permission denied error for the role that was required
    pub fn permission_denied(required: RoleType) -> Self {
        Self::PermissionDenied { required }
    }

    /// Create a malformed sendable error
    pub fn malformed_sendable(reason: impl Into<String>) -> Self {
        Self::MalformedSendable {
            reason: reason.into(),
        }
    }

    /// Create a not found error for chats
    pub fn chat_not_found(id: impl Into<String>) -> Self {
        Self::ChatNotFound { id: id.into() }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether this error was raised by a role check
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_names_required_role() {
        let error = ChatError::permission_denied(RoleType::Admin);
        assert!(error.is_permission_denied());
        assert_eq!(error.to_string(), "Permission denied: admin role required");
    }

    #[test]
    fn test_store_errors_are_carried_verbatim() {
        let source = StoreError::rejected("a/b", "read only");
        let error: ChatError = source.clone().into();
        assert_eq!(error, ChatError::WriteFailed(source));
    }
}
