use chrono::Utc;
use serde_json::{Map, Value};

use crate::paths::Keys;
use crate::types::{ContactType, ListData, RoleType, UserId};

/// Projection of a user onto the value stored for it in a roster.
pub type DataProvider = fn(&User) -> Value;

/// A roster member. Two users are the same user when their ids match.
#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    role: Option<RoleType>,
    data: Map<String, Value>,
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl User {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            role: None,
            data: Map::new(),
        }
    }

    pub fn with_role(mut self, role: RoleType) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Build a user from a roster entry: the key is the user id, the
    /// stored value carries the role and any extra fields.
    pub fn from_list_data(entry: &ListData) -> Self {
        let data = entry.data.as_object().cloned().unwrap_or_default();
        let role = data
            .get(Keys::ROLE)
            .and_then(Value::as_str)
            .and_then(RoleType::parse);
        Self {
            id: entry.id.clone(),
            role,
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Option<RoleType> {
        self.role
    }

    pub fn set_role(&mut self, role: RoleType) {
        self.role = Some(role);
    }

    pub fn has_role(&self, role: RoleType) -> bool {
        self.role == Some(role)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Stores `{"role": <role>}`; users without a role are stored as members.
pub fn role_type_data_provider(user: &User) -> Value {
    single_field(Keys::ROLE, user.role.unwrap_or(RoleType::Member).as_str())
}

/// Stores `{"type": "contact"}`.
pub fn contact_type_data_provider(_user: &User) -> Value {
    single_field(Keys::TYPE, ContactType::Contact.as_str())
}

/// Stores `{"date": <epoch millis>}` with the time of the write.
pub fn date_data_provider(_user: &User) -> Value {
    let mut fields = Map::new();
    fields.insert(Keys::DATE.to_string(), Value::from(Utc::now().timestamp_millis()));
    Value::Object(fields)
}

fn single_field(key: &str, value: &str) -> Value {
    let mut fields = Map::new();
    fields.insert(key.to_string(), Value::from(value));
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_ignores_role() {
        let owner = User::new("u1").with_role(RoleType::Owner);
        let plain = User::new("u1");
        assert_eq!(owner, plain);
        assert_ne!(owner, User::new("u2"));
    }

    #[test]
    fn test_from_roster_entry() {
        let user = User::from_list_data(&ListData::new("u2", json!({ "role": "admin" })));
        assert_eq!(user.id(), "u2");
        assert_eq!(user.role(), Some(RoleType::Admin));

        let unknown = User::from_list_data(&ListData::new("u3", json!({ "role": "guest" })));
        assert_eq!(unknown.role(), None);
    }

    #[test]
    fn test_data_providers() {
        let admin = User::new("u1").with_role(RoleType::Admin);
        assert_eq!(role_type_data_provider(&admin), json!({ "role": "admin" }));
        assert_eq!(role_type_data_provider(&User::new("u2")), json!({ "role": "member" }));
        assert_eq!(contact_type_data_provider(&admin), json!({ "type": "contact" }));
        assert!(date_data_provider(&admin)["date"].as_i64().is_some());
    }
}
