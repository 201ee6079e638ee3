//! Hierarchical store locations.
//!
//! [`Paths`] is a pure function layer: every location is derived from the
//! configured root/sandbox namespaces and, where needed, the signed-in user.

use std::fmt;

use crate::types::{ChatError, ChatResult};

/// Reserved keys shared with existing store data.
pub struct Keys;

impl Keys {
    pub const USERS: &'static str = "users";
    pub const MESSAGES: &'static str = "messages";
    pub const CHATS: &'static str = "chats";
    pub const MUTED: &'static str = "muted";
    pub const CONTACTS: &'static str = "contacts";
    pub const BLOCKED: &'static str = "blocked";
    pub const META: &'static str = "meta";
    pub const NAME: &'static str = "name";
    pub const IMAGE_URL: &'static str = "image-url";
    pub const DATA: &'static str = "data";
    pub const CREATED: &'static str = "created";
    pub const DATE: &'static str = "date";
    pub const FROM: &'static str = "from";
    pub const TYPE: &'static str = "type";
    pub const BODY: &'static str = "body";
    pub const ROLE: &'static str = "role";
    pub const TEXT: &'static str = "text";
    pub const ID: &'static str = "id";
}

/// Ordered sequence of path segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a `/`-separated path, ignoring empty segments
    pub fn parse(path: &str) -> Self {
        Self::new(path.split('/').filter(|segment| !segment.is_empty()))
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` equals `other` or lies below it
    pub fn starts_with(&self, other: &Path) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Location registry bound to one namespace and, optionally, a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: String,
    sandbox: String,
    user_id: Option<String>,
}

impl Paths {
    pub fn new(
        root: impl Into<String>,
        sandbox: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            root: root.into(),
            sandbox: sandbox.into(),
            user_id,
        }
    }

    fn current_user_id(&self) -> ChatResult<&str> {
        self.user_id.as_deref().ok_or(ChatError::NotSignedIn)
    }

    pub fn root(&self) -> Path {
        Path::new([self.root.as_str(), self.sandbox.as_str()])
    }

    pub fn users(&self) -> Path {
        self.root().child(Keys::USERS)
    }

    pub fn user(&self, user_id: &str) -> Path {
        self.users().child(user_id)
    }

    pub fn current_user(&self) -> ChatResult<Path> {
        Ok(self.user(self.current_user_id()?))
    }

    /// Inbox of `user_id`
    pub fn messages(&self, user_id: &str) -> Path {
        self.user(user_id).child(Keys::MESSAGES)
    }

    pub fn current_user_messages(&self) -> ChatResult<Path> {
        Ok(self.messages(self.current_user_id()?))
    }

    /// A message inside the inbox of `user_id`
    pub fn message(&self, user_id: &str, message_id: &str) -> Path {
        self.messages(user_id).child(message_id)
    }

    /// A message inside the signed-in user's inbox
    pub fn current_user_message(&self, message_id: &str) -> ChatResult<Path> {
        Ok(self.message(self.current_user_id()?, message_id))
    }

    pub fn user_chats(&self) -> ChatResult<Path> {
        Ok(self.current_user()?.child(Keys::CHATS))
    }

    pub fn user_chat(&self, chat_id: &str) -> ChatResult<Path> {
        Ok(self.user_chats()?.child(chat_id))
    }

    pub fn user_muted(&self) -> ChatResult<Path> {
        Ok(self.current_user()?.child(Keys::MUTED))
    }

    pub fn contacts(&self) -> ChatResult<Path> {
        Ok(self.current_user()?.child(Keys::CONTACTS))
    }

    pub fn blocked(&self) -> ChatResult<Path> {
        Ok(self.current_user()?.child(Keys::BLOCKED))
    }

    pub fn chats(&self) -> Path {
        self.root().child(Keys::CHATS)
    }

    pub fn chat(&self, chat_id: &str) -> Path {
        self.chats().child(chat_id)
    }

    pub fn chat_meta(&self, chat_id: &str) -> Path {
        self.chat(chat_id).child(Keys::META)
    }

    pub fn chat_users(&self, chat_id: &str) -> Path {
        self.chat(chat_id).child(Keys::USERS)
    }

    pub fn chat_messages(&self, chat_id: &str) -> Path {
        self.chat(chat_id).child(Keys::MESSAGES)
    }

    pub fn chat_message(&self, chat_id: &str, message_id: &str) -> Path {
        self.chat_messages(chat_id).child(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in() -> Paths {
        Paths::new("switchboard", "test", Some("u1".to_string()))
    }

    #[test]
    fn test_chat_paths() {
        let paths = signed_in();
        assert_eq!(paths.root().to_string(), "switchboard/test");
        assert_eq!(paths.chat_meta("c1").to_string(), "switchboard/test/chats/c1/meta");
        assert_eq!(paths.chat_users("c1").to_string(), "switchboard/test/chats/c1/users");
        assert_eq!(
            paths.chat_message("c1", "m1").to_string(),
            "switchboard/test/chats/c1/messages/m1"
        );
    }

    #[test]
    fn test_user_paths() {
        let paths = signed_in();
        assert_eq!(
            paths.user_chat("c1").unwrap().to_string(),
            "switchboard/test/users/u1/chats/c1"
        );
        assert_eq!(
            paths.message("u2", "m9").to_string(),
            "switchboard/test/users/u2/messages/m9"
        );
        assert_eq!(
            paths.current_user_message("m9").unwrap(),
            paths.message("u1", "m9")
        );
        assert_eq!(
            paths.blocked().unwrap().to_string(),
            "switchboard/test/users/u1/blocked"
        );
    }

    #[test]
    fn test_current_user_paths_require_sign_in() {
        let paths = Paths::new("switchboard", "test", None);
        assert_eq!(paths.contacts(), Err(ChatError::NotSignedIn));
        assert_eq!(paths.user_muted(), Err(ChatError::NotSignedIn));
        assert_eq!(paths.current_user_messages(), Err(ChatError::NotSignedIn));
        // Paths that name the user explicitly stay available.
        assert_eq!(paths.messages("u2").to_string(), "switchboard/test/users/u2/messages");
    }

    #[test]
    fn test_path_navigation() {
        let path = Path::parse("/a/b//c");
        assert_eq!(path.segments(), &["a", "b", "c"]);
        assert_eq!(path.last(), Some("c"));
        assert_eq!(path.parent(), Some(Path::new(["a", "b"])));
        assert!(path.starts_with(&Path::new(["a"])));
        assert!(!Path::new(["a"]).starts_with(&path));
        assert_eq!(Path::new(Vec::<String>::new()).parent(), None);
    }
}
