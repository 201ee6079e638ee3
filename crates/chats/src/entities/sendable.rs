//! Sendable protocol model.
//!
//! Every item written to a sendable stream shares one wire shape:
//!
//! ```json
//! { "from": "<sender id>", "date": 1700000000000, "type": "<discriminator>", "body": { } }
//! ```
//!
//! The discriminators and the reserved body keys are shared with existing
//! store data and must not change.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::paths::Keys;
use crate::types::{
    ChatError, ChatId, ChatResult, DeliveryReceiptType, InvitationType, ListData, PresenceType,
    SendableId, TypingStateType, UserId,
};

/// Wire discriminator of a sendable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendableKind {
    Message,
    TypingState,
    DeliveryReceipt,
    Invitation,
    Presence,
}

impl SendableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendableKind::Message => "message",
            SendableKind::TypingState => "typing",
            SendableKind::DeliveryReceipt => "delivery-receipt",
            SendableKind::Invitation => "invitation",
            SendableKind::Presence => "presence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        DECODERS
            .iter()
            .find(|(kind, _)| kind.as_str() == value)
            .map(|(kind, _)| *kind)
    }
}

/// Untyped sendable: sender, timestamp, discriminator and body.
///
/// Once written to the store a sendable carries the id the store assigned;
/// equality is by that id, so two unsent sendables are never equal.
#[derive(Debug, Clone)]
pub struct Sendable {
    id: Option<SendableId>,
    from: UserId,
    date: DateTime<Utc>,
    kind: SendableKind,
    body: Map<String, Value>,
}

impl PartialEq for Sendable {
    fn eq(&self, other: &Self) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Sendable {
    pub fn new(kind: SendableKind, from: impl Into<UserId>, body: Map<String, Value>) -> Self {
        Self {
            id: None,
            from: from.into(),
            date: Utc::now(),
            kind,
            body,
        }
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Record the id assigned by the store. An id can only be set once.
    pub fn assign_id(&mut self, id: impl Into<SendableId>) -> ChatResult<()> {
        let id = id.into();
        match &self.id {
            Some(existing) if *existing != id => Err(ChatError::validation(format!(
                "sendable already has id {existing}"
            ))),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    pub fn sender(&self) -> &str {
        &self.from
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn kind(&self) -> SendableKind {
        self.kind
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// Structured value as written to the store
    pub fn to_value(&self) -> Value {
        let mut value = Map::new();
        value.insert(Keys::FROM.to_string(), Value::String(self.from.clone()));
        value.insert(Keys::DATE.to_string(), Value::from(self.date.timestamp_millis()));
        value.insert(Keys::TYPE.to_string(), Value::from(self.kind.as_str()));
        value.insert(Keys::BODY.to_string(), Value::Object(self.body.clone()));
        Value::Object(value)
    }

    /// Decode a stored value. Missing sender, date or body are tolerated; a
    /// missing or unknown discriminator is not.
    pub fn from_value(id: Option<&str>, value: &Value) -> ChatResult<Self> {
        let discriminator = value
            .get(Keys::TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::malformed_sendable("missing type"))?;
        let kind = SendableKind::parse(discriminator).ok_or_else(|| {
            ChatError::malformed_sendable(format!("unknown type {discriminator}"))
        })?;

        let date = value
            .get(Keys::DATE)
            .and_then(Value::as_i64)
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .unwrap_or_default();
        let body = match value.get(Keys::BODY) {
            Some(Value::Object(body)) => body.clone(),
            _ => Map::new(),
        };

        Ok(Self {
            id: id.map(str::to_string),
            from: value
                .get(Keys::FROM)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            date,
            kind,
            body,
        })
    }

    pub fn from_list_data(data: &ListData) -> ChatResult<Self> {
        Self::from_value(Some(&data.id), &data.data)
    }
}

macro_rules! typed_sendable {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(Sendable);

        impl $name {
            pub const KIND: SendableKind = $kind;

            pub fn sendable(&self) -> &Sendable {
                &self.0
            }

            pub fn into_sendable(self) -> Sendable {
                self.0
            }

            pub fn id(&self) -> Option<&str> {
                self.0.id()
            }

            pub fn sender(&self) -> &str {
                self.0.sender()
            }
        }

        impl TryFrom<Sendable> for $name {
            type Error = ChatError;

            fn try_from(sendable: Sendable) -> ChatResult<Self> {
                if sendable.kind() == Self::KIND {
                    Ok(Self(sendable))
                } else {
                    Err(ChatError::malformed_sendable(format!(
                        "expected {}, got {}",
                        Self::KIND.as_str(),
                        sendable.kind().as_str()
                    )))
                }
            }
        }

        impl From<$name> for Sendable {
            fn from(typed: $name) -> Sendable {
                typed.0
            }
        }
    };
}

typed_sendable!(
    /// Chat message with a free-form body
    Message,
    SendableKind::Message
);
typed_sendable!(
    /// Typing indicator; the body is absent until the first state change
    TypingState,
    SendableKind::TypingState
);
typed_sendable!(DeliveryReceipt, SendableKind::DeliveryReceipt);
typed_sendable!(
    /// Invitation to join a group chat
    Invitation,
    SendableKind::Invitation
);
typed_sendable!(Presence, SendableKind::Presence);

fn body_of<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

impl Message {
    pub fn with_body(from: impl Into<UserId>, body: Map<String, Value>) -> Self {
        Self(Sendable::new(Self::KIND, from, body))
    }

    pub fn with_text(from: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self::with_body(from, body_of([(Keys::TEXT, Value::String(text.into()))]))
    }

    pub fn text(&self) -> Option<&str> {
        self.0.body_str(Keys::TEXT)
    }

    pub fn body(&self) -> &Map<String, Value> {
        self.0.body()
    }
}

impl TypingState {
    pub fn new(from: impl Into<UserId>, state: TypingStateType) -> Self {
        Self(Sendable::new(
            Self::KIND,
            from,
            body_of([(Keys::TYPE, Value::from(state.as_str()))]),
        ))
    }

    /// `None` until the sender has reported a state
    pub fn state(&self) -> Option<TypingStateType> {
        self.0.body_str(Keys::TYPE).and_then(TypingStateType::parse)
    }
}

impl DeliveryReceipt {
    pub fn new(
        from: impl Into<UserId>,
        receipt: DeliveryReceiptType,
        message_id: impl Into<SendableId>,
    ) -> Self {
        Self(Sendable::new(
            Self::KIND,
            from,
            body_of([
                (Keys::TYPE, Value::from(receipt.as_str())),
                (Keys::ID, Value::String(message_id.into())),
            ]),
        ))
    }

    pub fn receipt_type(&self) -> Option<DeliveryReceiptType> {
        self.0.body_str(Keys::TYPE).and_then(DeliveryReceiptType::parse)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.0.body_str(Keys::ID)
    }
}

impl Invitation {
    pub fn new(
        from: impl Into<UserId>,
        invitation: InvitationType,
        chat_id: impl Into<ChatId>,
    ) -> Self {
        Self(Sendable::new(
            Self::KIND,
            from,
            body_of([
                (Keys::TYPE, Value::from(invitation.as_str())),
                (Keys::ID, Value::String(chat_id.into())),
            ]),
        ))
    }

    pub fn invitation_type(&self) -> Option<InvitationType> {
        self.0.body_str(Keys::TYPE).and_then(InvitationType::parse)
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.0.body_str(Keys::ID)
    }
}

impl Presence {
    pub fn new(from: impl Into<UserId>, presence: PresenceType) -> Self {
        Self(Sendable::new(
            Self::KIND,
            from,
            body_of([(Keys::TYPE, Value::from(presence.as_str()))]),
        ))
    }

    pub fn presence_type(&self) -> Option<PresenceType> {
        self.0.body_str(Keys::TYPE).and_then(PresenceType::parse)
    }
}

/// A decoded sendable, tagged by its discriminator
#[derive(Debug, Clone, PartialEq)]
pub enum TypedSendable {
    Message(Message),
    TypingState(TypingState),
    DeliveryReceipt(DeliveryReceipt),
    Invitation(Invitation),
    Presence(Presence),
}

type Decoder = fn(Sendable) -> TypedSendable;

/// Discriminator to decoder registry
const DECODERS: [(SendableKind, Decoder); 5] = [
    (SendableKind::Message, decode_message),
    (SendableKind::TypingState, decode_typing_state),
    (SendableKind::DeliveryReceipt, decode_delivery_receipt),
    (SendableKind::Invitation, decode_invitation),
    (SendableKind::Presence, decode_presence),
];

fn decode_message(sendable: Sendable) -> TypedSendable {
    TypedSendable::Message(Message(sendable))
}

fn decode_typing_state(sendable: Sendable) -> TypedSendable {
    TypedSendable::TypingState(TypingState(sendable))
}

fn decode_delivery_receipt(sendable: Sendable) -> TypedSendable {
    TypedSendable::DeliveryReceipt(DeliveryReceipt(sendable))
}

fn decode_invitation(sendable: Sendable) -> TypedSendable {
    TypedSendable::Invitation(Invitation(sendable))
}

fn decode_presence(sendable: Sendable) -> TypedSendable {
    TypedSendable::Presence(Presence(sendable))
}

impl TypedSendable {
    pub fn decode(data: &ListData) -> ChatResult<Self> {
        Sendable::from_list_data(data).map(Self::from)
    }

    pub fn sendable(&self) -> &Sendable {
        match self {
            TypedSendable::Message(inner) => inner.sendable(),
            TypedSendable::TypingState(inner) => inner.sendable(),
            TypedSendable::DeliveryReceipt(inner) => inner.sendable(),
            TypedSendable::Invitation(inner) => inner.sendable(),
            TypedSendable::Presence(inner) => inner.sendable(),
        }
    }

    pub fn kind(&self) -> SendableKind {
        self.sendable().kind()
    }
}

impl From<Sendable> for TypedSendable {
    fn from(sendable: Sendable) -> Self {
        let kind = sendable.kind();
        match DECODERS.iter().find(|(candidate, _)| *candidate == kind) {
            Some((_, decode)) => decode(sendable),
            None => TypedSendable::Message(Message(sendable)),
        }
    }
}

impl From<TypedSendable> for Sendable {
    fn from(typed: TypedSendable) -> Self {
        match typed {
            TypedSendable::Message(inner) => inner.into_sendable(),
            TypedSendable::TypingState(inner) => inner.into_sendable(),
            TypedSendable::DeliveryReceipt(inner) => inner.into_sendable(),
            TypedSendable::Invitation(inner) => inner.into_sendable(),
            TypedSendable::Presence(inner) => inner.into_sendable(),
        }
    }
}
