//! Wire protocol: inbound text frames and outbound relayed messages.
//!
//! Inbound:
//!
//! ```json
//! { "type": "1" | "-1" | "...", "userId": "alice", "msg": "hi", "sendTo": "bob" }
//! ```
//!
//! `"1"` logs in, `"-1"` logs out, any other `type` (or none) relays `msg`
//! to `sendTo`, or to everyone when `sendTo` is absent or blank.
//!
//! Outbound: `{ "msg": "hi", "from": "alice" }`.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RouteError;
use crate::ids::UserId;

/// `type` value for a login frame.
pub const LOGIN: &str = "1";
/// `type` value for a logout frame.
pub const LOGOUT: &str = "-1";

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Bind the connection to `user_id`.
    Login {
        /// Identity to register under.
        user_id: UserId,
    },
    /// Drop the connection's current binding.
    ///
    /// The connection index is authoritative for which binding is removed;
    /// `user_id` is only what the client claimed.
    Logout {
        /// Identity named in the frame, if any.
        user_id: Option<UserId>,
    },
    /// Deliver `body` to `target`, or to every open session when `None`.
    Relay {
        /// Sender label supplied in the frame.
        user_id: UserId,
        /// Message text.
        body: String,
        /// Recipient identity; `None` means broadcast.
        target: Option<UserId>,
    },
}

impl Message {
    /// Decode one inbound text frame.
    pub fn decode(raw: &str) -> Result<Self, RouteError> {
        let frame: InboundFrame = serde_json::from_str(raw)?;
        frame.try_into()
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout { .. } => "logout",
            Self::Relay { .. } => "relay",
        }
    }
}

/// Raw inbound frame, before field requirements are checked.
///
/// Every field is read as a scalar string: clients that send `"type": 1`
/// are treated the same as `"type": "1"`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(default, rename = "type", deserialize_with = "scalar_string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    user_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    msg: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    send_to: Option<String>,
}

impl TryFrom<InboundFrame> for Message {
    type Error = RouteError;

    fn try_from(frame: InboundFrame) -> Result<Self, Self::Error> {
        match frame.kind.as_deref() {
            Some(LOGIN) => {
                let user_id = frame
                    .user_id
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| RouteError::Decode("login requires a non-empty userId".into()))?;
                Ok(Self::Login {
                    user_id: UserId::from_raw(user_id),
                })
            }
            Some(LOGOUT) => Ok(Self::Logout {
                user_id: frame.user_id.map(UserId::from_raw),
            }),
            _ => {
                let user_id = frame
                    .user_id
                    .ok_or_else(|| RouteError::Decode("relay requires userId".into()))?;
                let body = frame
                    .msg
                    .ok_or_else(|| RouteError::Decode("relay requires msg".into()))?;
                // Blank means broadcast; a non-blank target is looked up verbatim.
                let target = frame
                    .send_to
                    .filter(|t| !t.trim().is_empty())
                    .map(UserId::from_raw);
                Ok(Self::Relay {
                    user_id: UserId::from_raw(user_id),
                    body,
                    target,
                })
            }
        }
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(Value::Array(_)) => Err(de::Error::custom("expected a scalar, found an array")),
        Some(Value::Object(_)) => Err(de::Error::custom("expected a scalar, found an object")),
    }
}

/// Payload delivered to recipients of a relayed message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Message text.
    pub msg: String,
    /// Sender label.
    pub from: String,
}

impl OutboundFrame {
    /// Build the payload for `body` sent by `from`.
    pub fn new(body: impl Into<String>, from: &UserId) -> Self {
        Self {
            msg: body.into(),
            from: from.as_str().to_owned(),
        }
    }

    /// Serialize to the text frame sent on the wire.
    pub fn encode(&self) -> String {
        // Two string fields: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
