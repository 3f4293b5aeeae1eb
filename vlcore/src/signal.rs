//! Chat-thread message codec.
//!
//! Chat messages, typing indicators and the four call signaling kinds all
//! travel over the same per-thread channel as JSON objects tagged by a
//! `type` field. [`decode`] never panics: malformed text, unknown kinds and
//! missing fields come back as a [`DecodeError`] so callers can drop the
//! message and keep going.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::user::UserId;

/// Wire value of the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ChatMessage,
    Typing,
    Offer,
    Answer,
    IceCandidate,
    Hangup,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        Self::ChatMessage,
        Self::Typing,
        Self::Offer,
        Self::Answer,
        Self::IceCandidate,
        Self::Hangup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::Typing => "typing",
            Self::Offer => "webrtc_offer",
            Self::Answer => "webrtc_answer",
            Self::IceCandidate => "webrtc_ice_candidate",
            Self::Hangup => "webrtc_hangup",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether this kind belongs to the call signaling path.
    pub fn is_call_signal(&self) -> bool {
        matches!(
            self,
            Self::Offer | Self::Answer | Self::IceCandidate | Self::Hangup
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as produced by a peer link (`{"type": ..., "sdp": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A discovered network path proposal, in the shape browsers serialize it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_first_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typing {
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_first_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_first_name: String,
    pub offer_sdp: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub sender_id: UserId,
    pub answer_sdp: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub sender_id: UserId,
    pub candidate: IceCandidateInit,
}

/// End or refusal of a call.
///
/// Declining, hanging up and rejecting a call because we are busy all
/// produce this same message. `target_id` names the participant the hangup
/// is meant for; everyone else in the thread ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hangup {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<UserId>,
}

impl Hangup {
    /// Whether a participant with id `me` should act on this hangup.
    pub fn is_addressed_to(&self, me: &UserId) -> bool {
        self.target_id.as_ref().is_none_or(|target| target == me)
    }
}

/// One message on a chat thread's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "chat_message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "typing")]
    Typing(Typing),
    #[serde(rename = "webrtc_offer")]
    Offer(Offer),
    #[serde(rename = "webrtc_answer")]
    Answer(Answer),
    #[serde(rename = "webrtc_ice_candidate")]
    IceCandidate(IceCandidate),
    #[serde(rename = "webrtc_hangup")]
    Hangup(Hangup),
}

impl SignalMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ChatMessage(_) => MessageKind::ChatMessage,
            Self::Typing(_) => MessageKind::Typing,
            Self::Offer(_) => MessageKind::Offer,
            Self::Answer(_) => MessageKind::Answer,
            Self::IceCandidate(_) => MessageKind::IceCandidate,
            Self::Hangup(_) => MessageKind::Hangup,
        }
    }

    pub fn sender_id(&self) -> &UserId {
        match self {
            Self::ChatMessage(m) => &m.sender_id,
            Self::Typing(m) => &m.sender_id,
            Self::Offer(m) => &m.sender_id,
            Self::Answer(m) => &m.sender_id,
            Self::IceCandidate(m) => &m.sender_id,
            Self::Hangup(m) => &m.sender_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("unrecognized message type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} message: {source}")]
    InvalidFields {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Unknown kinds are expected from newer peers and only worth a debug line.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

/// Serialize a message for the channel.
pub fn encode(message: &SignalMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parse one inbound channel message.
///
/// An object without a `type` field is a plain chat message, which is how
/// the chat server treats it too.
pub fn decode(text: &str) -> Result<SignalMessage, DecodeError> {
    let mut value: Value = serde_json::from_str(text)?;
    let object = value.as_object_mut().ok_or(DecodeError::NotAnObject)?;

    let kind = match object.get("type") {
        None => {
            object.insert(
                "type".to_string(),
                Value::String(MessageKind::ChatMessage.as_str().to_string()),
            );
            MessageKind::ChatMessage
        }
        Some(Value::String(tag)) => {
            MessageKind::from_wire(tag).ok_or_else(|| DecodeError::UnknownType(tag.clone()))?
        }
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields { kind, source })
}
