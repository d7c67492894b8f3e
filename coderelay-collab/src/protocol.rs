//! Event protocol between a participant connection and the room server.
//!
//! Every message is one WebSocket text frame carrying a JSON envelope:
//! ```text
//! ┌────────────────────────┬──────────────────────────────┐
//! │ "event": <event name>  │ "data": <payload, optional>  │
//! └────────────────────────┴──────────────────────────────┘
//! ```
//!
//! | Direction | Event            | Payload                          |
//! |-----------|------------------|----------------------------------|
//! | C → S     | `join`           | `{roomId, userName}`             |
//! | C → S     | `leave`          | none                             |
//! | C → S     | `codeChange`     | `{roomId, code}`                 |
//! | C → S     | `languageChange` | `{roomId, language}`             |
//! | C → S     | `typing`         | `{roomId, userName}`             |
//! | S → C     | `userJoined`     | `[name, …]` in join order        |
//! | S → C     | `codeUpdate`     | `text`                           |
//! | S → C     | `languageUpdate` | `language`                       |
//! | S → C     | `userTyping`     | `name`                           |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const EVENT_JOIN: &str = "join";
pub const EVENT_LEAVE: &str = "leave";
/// Older clients announce leaving under this name.
pub const EVENT_LEAVE_ROOM: &str = "leaveRoom";
pub const EVENT_CODE_CHANGE: &str = "codeChange";
pub const EVENT_LANGUAGE_CHANGE: &str = "languageChange";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_USER_JOINED: &str = "userJoined";
pub const EVENT_CODE_UPDATE: &str = "codeUpdate";
pub const EVENT_LANGUAGE_UPDATE: &str = "languageUpdate";
pub const EVENT_USER_TYPING: &str = "userTyping";

/// Syntax-highlighting language shared by a room.
///
/// The well-known tags get their own variant; anything else is carried
/// verbatim in `Other` so newer clients can introduce tags without a
/// server upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    #[default]
    Javascript,
    Python,
    Java,
    Cpp,
    Other(String),
}

impl Language {
    pub fn as_str(&self) -> &str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Other(tag) => tag,
        }
    }

    /// Whether this is one of the tags every client knows how to highlight.
    pub fn is_known(&self) -> bool {
        !matches!(self, Language::Other(_))
    }
}

impl From<&str> for Language {
    fn from(tag: &str) -> Self {
        match tag {
            "javascript" => Language::Javascript,
            "python" => Language::Python,
            "java" => Language::Java,
            "cpp" => Language::Cpp,
            other => Language::Other(other.to_string()),
        }
    }
}

impl From<String> for Language {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "javascript" | "python" | "java" | "cpp" => Language::from(tag.as_str()),
            _ => Language::Other(tag),
        }
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        match language {
            Language::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    room_id: String,
    #[serde(alias = "displayName")]
    user_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeChangePayload {
    room_id: String,
    #[serde(alias = "text")]
    code: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguageChangePayload {
    room_id: String,
    #[serde(alias = "Language")]
    language: Language,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    room_id: String,
    #[serde(alias = "displayName")]
    user_name: String,
}

#[derive(Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    data: Value,
}

fn encode_frame<T: Serialize>(event: &str, data: Option<&T>) -> Result<String, ProtocolError> {
    let data = match data {
        Some(payload) => serde_json::to_value(payload)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?,
        None => Value::Null,
    };
    serde_json::to_string(&OutboundFrame { event, data })
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_frame(frame: &str) -> Result<InboundFrame, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data)
        .map_err(|e| ProtocolError::InvalidPayload { event: event.to_string(), reason: e.to_string() })
}

/// Messages a participant sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join { room_id: String, user_name: String },
    /// Leaves whatever room the sending connection currently occupies.
    Leave,
    CodeChange { room_id: String, code: String },
    LanguageChange { room_id: String, language: Language },
    Typing { room_id: String, user_name: String },
}

impl ClientMessage {
    pub fn join(room_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self::Join { room_id: room_id.into(), user_name: user_name.into() }
    }

    pub fn code_change(room_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self::CodeChange { room_id: room_id.into(), code: code.into() }
    }

    pub fn language_change(room_id: impl Into<String>, language: impl Into<Language>) -> Self {
        Self::LanguageChange { room_id: room_id.into(), language: language.into() }
    }

    pub fn typing(room_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self::Typing { room_id: room_id.into(), user_name: user_name.into() }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => EVENT_JOIN,
            Self::Leave => EVENT_LEAVE,
            Self::CodeChange { .. } => EVENT_CODE_CHANGE,
            Self::LanguageChange { .. } => EVENT_LANGUAGE_CHANGE,
            Self::Typing { .. } => EVENT_TYPING,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let event = self.event_name();
        match self {
            Self::Join { room_id, user_name } => encode_frame(
                event,
                Some(&JoinPayload { room_id: room_id.clone(), user_name: user_name.clone() }),
            ),
            Self::Leave => encode_frame::<Value>(event, None),
            Self::CodeChange { room_id, code } => encode_frame(
                event,
                Some(&CodeChangePayload { room_id: room_id.clone(), code: code.clone() }),
            ),
            Self::LanguageChange { room_id, language } => encode_frame(
                event,
                Some(&LanguageChangePayload { room_id: room_id.clone(), language: language.clone() }),
            ),
            Self::Typing { room_id, user_name } => encode_frame(
                event,
                Some(&TypingPayload { room_id: room_id.clone(), user_name: user_name.clone() }),
            ),
        }
    }

    /// Parse a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let InboundFrame { event, data } = decode_frame(frame)?;
        match event.as_str() {
            EVENT_JOIN => {
                let p: JoinPayload = payload(&event, data)?;
                Ok(Self::Join { room_id: p.room_id, user_name: p.user_name })
            }
            EVENT_LEAVE | EVENT_LEAVE_ROOM => Ok(Self::Leave),
            EVENT_CODE_CHANGE => {
                let p: CodeChangePayload = payload(&event, data)?;
                Ok(Self::CodeChange { room_id: p.room_id, code: p.code })
            }
            EVENT_LANGUAGE_CHANGE => {
                let p: LanguageChangePayload = payload(&event, data)?;
                Ok(Self::LanguageChange { room_id: p.room_id, language: p.language })
            }
            EVENT_TYPING => {
                let p: TypingPayload = payload(&event, data)?;
                Ok(Self::Typing { room_id: p.room_id, user_name: p.user_name })
            }
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }
}

/// Messages the server pushes to participants.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Full participant list of the room, in join order.
    UserJoined(Vec<String>),
    CodeUpdate(String),
    LanguageUpdate(Language),
    UserTyping(String),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => EVENT_USER_JOINED,
            Self::CodeUpdate(_) => EVENT_CODE_UPDATE,
            Self::LanguageUpdate(_) => EVENT_LANGUAGE_UPDATE,
            Self::UserTyping(_) => EVENT_USER_TYPING,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let event = self.event_name();
        match self {
            Self::UserJoined(names) => encode_frame(event, Some(names)),
            Self::CodeUpdate(text) => encode_frame(event, Some(text)),
            Self::LanguageUpdate(language) => encode_frame(event, Some(language)),
            Self::UserTyping(name) => encode_frame(event, Some(name)),
        }
    }

    /// Parse a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let InboundFrame { event, data } = decode_frame(frame)?;
        match event.as_str() {
            EVENT_USER_JOINED => Ok(Self::UserJoined(payload(&event, data)?)),
            EVENT_CODE_UPDATE => Ok(Self::CodeUpdate(payload(&event, data)?)),
            EVENT_LANGUAGE_UPDATE => Ok(Self::LanguageUpdate(payload(&event, data)?)),
            EVENT_USER_TYPING => Ok(Self::UserTyping(payload(&event, data)?)),
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    UnknownEvent(String),
    InvalidPayload { event: String, reason: String },
    /// A room-scoped operation was attempted outside any room.
    NotJoined,
    ConnectionClosed,
    Timeout,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::UnknownEvent(event) => write!(f, "Unknown event: {event}"),
            Self::InvalidPayload { event, reason } => {
                write!(f, "Invalid payload for {event}: {reason}")
            }
            Self::NotJoined => write!(f, "Not joined to a room"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
