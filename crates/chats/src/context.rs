//! Explicit session context shared by every chat component.
//!
//! Holds the namespace configuration and the identity of the signed-in user.
//! Components receive an `Arc<ChatContext>` instead of reaching for global
//! state; sign-in must happen before any user-scoped path is computed.

use std::sync::{PoisonError, RwLock};

use switchboard_config::AppConfig;
use tracing::info;

use crate::paths::Paths;
use crate::types::{ChatError, ChatResult, UserId};
use crate::utils::Validator;

#[derive(Debug)]
pub struct ChatContext {
    config: AppConfig,
    user_id: RwLock<Option<UserId>>,
}

impl ChatContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            user_id: RwLock::new(None),
        }
    }

    /// Bind the context to the identity resolved by the authentication layer.
    pub fn sign_in(&self, user_id: impl Into<String>) -> ChatResult<()> {
        let user_id = user_id.into();
        Validator::identifier(&user_id)?;
        info!(user_id = %user_id, "signed in");
        *self
            .user_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(user_id);
        Ok(())
    }

    pub fn sign_out(&self) {
        let previous = self
            .user_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user_id) = previous {
            info!(user_id = %user_id, "signed out");
        }
    }

    pub fn current_user_id(&self) -> ChatResult<UserId> {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ChatError::NotSignedIn)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current_user_id().is_ok()
    }

    /// Whether `user_id` is the signed-in user.
    pub fn is_me(&self, user_id: &str) -> bool {
        self.current_user_id()
            .map(|me| me == user_id)
            .unwrap_or(false)
    }

    /// Snapshot of the location registry for the current session.
    pub fn paths(&self) -> Paths {
        Paths::new(
            self.config.realtime.root.clone(),
            self.config.realtime.sandbox.clone(),
            self.current_user_id().ok(),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn delivery_receipts_enabled(&self) -> bool {
        self.config.messaging.delivery_receipts_enabled
    }

    pub fn auto_accept_chat_invite(&self) -> bool {
        self.config.messaging.auto_accept_chat_invite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_lifecycle() {
        let context = ChatContext::new(AppConfig::default());
        assert_eq!(context.current_user_id(), Err(ChatError::NotSignedIn));
        assert_eq!(context.paths().user_chats(), Err(ChatError::NotSignedIn));

        context.sign_in("alice").unwrap();
        assert!(context.is_me("alice"));
        assert!(!context.is_me("bob"));
        assert_eq!(
            context.paths().user_chats().unwrap().to_string(),
            "switchboard/prod/users/alice/chats"
        );

        context.sign_out();
        assert!(!context.is_signed_in());
    }

    #[test]
    fn test_sign_in_rejects_unusable_identifiers() {
        let context = ChatContext::new(AppConfig::default());
        assert!(context.sign_in("").is_err());
        assert!(context.sign_in("a/b").is_err());
        assert!(!context.is_signed_in());
    }
}
