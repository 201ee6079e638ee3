//! Validation utilities.

use crate::types::ChatError;

const MAX_IDENTIFIER_LENGTH: usize = 128;
const MAX_CHAT_NAME_LENGTH: usize = 255;

/// Validation utilities
pub struct Validator;

impl Validator {
    /// Validate an identifier that ends up as a store path segment
    pub fn identifier(id: &str) -> Result<(), ChatError> {
        if id.trim().is_empty() {
            return Err(ChatError::validation("Identifier cannot be empty"));
        }

        if id.len() > MAX_IDENTIFIER_LENGTH {
            return Err(ChatError::validation(format!(
                "Identifier too long (max {} characters)",
                MAX_IDENTIFIER_LENGTH
            )));
        }

        // Segments are joined with '/', the store treats '.', '#', '$', '[' and ']' as reserved
        if id.chars().any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']')) {
            return Err(ChatError::validation(format!(
                "Identifier contains a reserved character: {id}"
            )));
        }

        Ok(())
    }

    /// Validate chat name
    pub fn chat_name(name: &str) -> Result<(), ChatError> {
        if name.len() > MAX_CHAT_NAME_LENGTH {
            return Err(ChatError::validation(format!(
                "Chat name too long (max {} characters)",
                MAX_CHAT_NAME_LENGTH
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(Validator::identifier("user_42").is_ok());
        assert!(Validator::identifier("-Nf3kq").is_ok());
        assert!(Validator::identifier("").is_err());
        assert!(Validator::identifier("   ").is_err());
        assert!(Validator::identifier("a/b").is_err());
        assert!(Validator::identifier("a.b").is_err());
        assert!(Validator::identifier(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_chat_name_validation() {
        // Group chats may be unnamed.
        assert!(Validator::chat_name("").is_ok());
        assert!(Validator::chat_name("Team").is_ok());
        assert!(Validator::chat_name(&"a".repeat(256)).is_err());
    }
}
