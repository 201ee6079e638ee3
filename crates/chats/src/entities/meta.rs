use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::paths::Keys;

/// Group chat metadata stored under `chats/<id>/meta`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub name: String,
    pub image_url: String,
    pub data: Map<String, Value>,
    pub created: Option<DateTime<Utc>>,
}

impl Meta {
    pub fn new(name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_url: image_url.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_timestamp(mut self) -> Self {
        self.created = Some(Utc::now());
        self
    }

    /// Decode a stored meta object; missing fields take their defaults.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Object(fields)) = value else {
            return Self::default();
        };
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            name: text(Keys::NAME),
            image_url: text(Keys::IMAGE_URL),
            data: fields
                .get(Keys::DATA)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            created: fields
                .get(Keys::CREATED)
                .and_then(Value::as_i64)
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Map::new();
        fields.insert(Keys::NAME.to_string(), Value::String(self.name.clone()));
        fields.insert(Keys::IMAGE_URL.to_string(), Value::String(self.image_url.clone()));
        if !self.data.is_empty() {
            fields.insert(Keys::DATA.to_string(), Value::Object(self.data.clone()));
        }
        if let Some(created) = self.created {
            fields.insert(Keys::CREATED.to_string(), Value::from(created.timestamp_millis()));
        }
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_value_keys() {
        let meta = Meta::new("Team", "https://img/1.png").with_data(
            json!({ "topic": "rust" }).as_object().cloned().unwrap(),
        );
        let value = meta.to_value();
        assert_eq!(value["name"], "Team");
        assert_eq!(value["image-url"], "https://img/1.png");
        assert_eq!(value["data"]["topic"], "rust");
        assert!(value.get("created").is_none());

        assert_eq!(Meta::from_value(Some(&value)), meta);
    }

    #[test]
    fn test_partial_meta_decodes_with_defaults() {
        let meta = Meta::from_value(Some(&json!({
            "name": "Crew",
            "created": 1_700_000_000_000i64,
        })));
        assert_eq!(meta.name, "Crew");
        assert_eq!(meta.image_url, "");
        assert!(meta.data.is_empty());
        assert_eq!(meta.created.map(|c| c.timestamp_millis()), Some(1_700_000_000_000));

        assert_eq!(Meta::from_value(None), Meta::default());
    }
}
