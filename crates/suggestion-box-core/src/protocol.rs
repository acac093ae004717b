use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::identity::{StoreIdentity, UserIdentity, scalar_text};

pub const READY_MESSAGE_TYPE: &str = "SUGGESTION_FORM_READY";
pub const INIT_MESSAGE_TYPE: &str = "INIT_SUGGESTION_FORM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ready,
    Init,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => READY_MESSAGE_TYPE,
            Self::Init => INIT_MESSAGE_TYPE,
        }
    }

    #[must_use]
    pub fn from_type(raw: &str) -> Option<Self> {
        match raw {
            READY_MESSAGE_TYPE => Some(Self::Ready),
            INIT_MESSAGE_TYPE => Some(Self::Init),
            _ => None,
        }
    }
}

/// Identity payload sent from the host to the embedded form.
///
/// `visitor_id` is the raw store id. `store_id` is the display composite
/// `"<id> - <trade name>"`, or the raw id alone when either part is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompositeIdentity {
    #[serde(deserialize_with = "lenient_string")]
    pub account_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub visitor_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user_full_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user_email: String,
    #[serde(rename = "storePhone1", deserialize_with = "lenient_string")]
    pub store_phone1: String,
    #[serde(deserialize_with = "lenient_string")]
    pub trade_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub store_id: String,
}

impl CompositeIdentity {
    #[must_use]
    pub fn assemble(user: &UserIdentity, store: &StoreIdentity) -> Self {
        Self {
            account_id: user.account_id.clone(),
            visitor_id: store.visitor_id.clone(),
            user_full_name: user.user_full_name.clone(),
            user_email: user.user_email.clone(),
            store_phone1: store.store_phone.clone(),
            trade_name: store.trade_name.clone(),
            store_id: display_store_id(&store.visitor_id, &store.trade_name),
        }
    }

    /// Host-side success condition: the account, store id and trade name
    /// are all known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.account_id.is_empty() && !self.visitor_id.is_empty() && !self.trade_name.is_empty()
    }
}

#[must_use]
pub fn display_store_id(raw_store_id: &str, trade_name: &str) -> String {
    if raw_store_id.is_empty() || trade_name.is_empty() {
        raw_store_id.to_string()
    } else {
        format!("{raw_store_id} - {trade_name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    #[serde(rename = "SUGGESTION_FORM_READY")]
    Ready,
    #[serde(rename = "INIT_SUGGESTION_FORM")]
    Init(CompositeIdentity),
}

impl HandshakeMessage {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ready => MessageKind::Ready,
            Self::Init(_) => MessageKind::Init,
        }
    }

    pub fn to_value(&self) -> Result<Value, DecodeError> {
        serde_json::to_value(self).map_err(|error| DecodeError::Malformed(error.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not an object")]
    NotAnObject,
    #[error("message has no string type discriminator")]
    MissingType,
    #[error("unknown message type {0}")]
    UnknownType(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Reads the `type` discriminator without decoding the rest of the payload.
pub fn message_kind(data: &Value) -> Result<MessageKind, DecodeError> {
    let object = data.as_object().ok_or(DecodeError::NotAnObject)?;
    let raw = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    MessageKind::from_type(raw).ok_or_else(|| DecodeError::UnknownType(raw.to_string()))
}

pub fn decode_message(data: &Value) -> Result<HandshakeMessage, DecodeError> {
    message_kind(data)?;
    HandshakeMessage::deserialize(data).map_err(|error| DecodeError::Malformed(error.to_string()))
}

/// Decodes `data` only when its discriminator matches `kind`.
#[must_use]
pub fn accept(kind: MessageKind, data: &Value) -> Option<HandshakeMessage> {
    match message_kind(data) {
        Ok(found) if found == kind => decode_message(data).ok(),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_text(&value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_signal_has_type_only() {
        let value = HandshakeMessage::Ready.to_value().expect("serialize");
        assert_eq!(value, json!({"type": "SUGGESTION_FORM_READY"}));
    }

    #[test]
    fn init_message_uses_wire_field_names() {
        let identity = CompositeIdentity::assemble(
            &UserIdentity {
                account_id: "42".to_string(),
                user_full_name: "Ana".to_string(),
                user_email: String::new(),
            },
            &StoreIdentity {
                visitor_id: "7".to_string(),
                trade_name: "Loja X".to_string(),
                store_phone: "5599999".to_string(),
            },
        );
        let value = HandshakeMessage::Init(identity).to_value().expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "INIT_SUGGESTION_FORM",
                "accountId": "42",
                "visitorId": "7",
                "userFullName": "Ana",
                "userEmail": "",
                "storePhone1": "5599999",
                "tradeName": "Loja X",
                "storeId": "7 - Loja X"
            })
        );
    }

    #[test]
    fn store_id_composite_needs_both_parts() {
        assert_eq!(
            display_store_id("63702", "Loja Teste"),
            "63702 - Loja Teste"
        );
        assert_eq!(display_store_id("63702", ""), "63702");
        assert_eq!(display_store_id("", "Loja Teste"), "");
    }

    #[test]
    fn decoding_is_lenient_about_missing_and_numeric_fields() {
        let message = decode_message(&json!({
            "type": "INIT_SUGGESTION_FORM",
            "accountId": 88251,
            "visitorId": null,
            "userFullName": "Igor"
        }))
        .expect("decode");
        assert_eq!(
            message,
            HandshakeMessage::Init(CompositeIdentity {
                account_id: "88251".to_string(),
                user_full_name: "Igor".to_string(),
                ..CompositeIdentity::default()
            })
        );
    }

    #[test]
    fn discriminator_filter_rejects_other_traffic() {
        assert_eq!(message_kind(&json!("hello")), Err(DecodeError::NotAnObject));
        assert_eq!(
            message_kind(&json!({"source": "react-devtools"})),
            Err(DecodeError::MissingType)
        );
        assert_eq!(
            message_kind(&json!({"type": "webpackOk"})),
            Err(DecodeError::UnknownType("webpackOk".to_string()))
        );
        let ready = json!({"type": "SUGGESTION_FORM_READY"});
        assert_eq!(accept(MessageKind::Init, &ready), None);
        assert_eq!(
            accept(MessageKind::Ready, &ready),
            Some(HandshakeMessage::Ready)
        );
    }

    #[test]
    fn completeness_requires_account_store_and_trade_name() {
        let mut identity = CompositeIdentity {
            account_id: "1".to_string(),
            visitor_id: "2".to_string(),
            trade_name: "Loja".to_string(),
            ..CompositeIdentity::default()
        };
        assert!(identity.is_complete());
        identity.trade_name.clear();
        assert!(!identity.is_complete());
    }
}
