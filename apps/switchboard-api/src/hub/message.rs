//! Chat messages and their JSON wire format.
//!
//! Frames in both directions look like
//! `{"email": "...", "username": "...", "message": "..."}`. Inbound `email`
//! and `username` are never read: the sender always comes from the
//! connection the frame arrived on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// An inbound frame that has been decoded but not yet attributed.
///
/// Only [`InboundDraft::stamp`] turns it into something the hub will send.
#[derive(Debug, Deserialize)]
pub struct InboundDraft {
    #[serde(rename = "message")]
    text: String,
}

/// A frame that could not be decoded into a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed frame: {}", self.0)
    }
}

impl InboundDraft {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|e| DecodeError(e.to_string()))
    }

    /// Attribute the draft to `identity`.
    pub fn stamp(self, identity: &Identity) -> ChatMessage {
        ChatMessage {
            sender: Sender::from(identity),
            text: self.text,
            enqueued_at: Utc::now(),
        }
    }
}

/// Snapshot of the identity a message was sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub display_name: String,
}

impl From<&Identity> for Sender {
    fn from(identity: &Identity) -> Self {
        Self {
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
        }
    }
}

/// An attributed message waiting for, or undergoing, fan-out.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Outbound wire frame.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    pub email: String,
    pub username: String,
    pub message: String,
}

impl ChatMessage {
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            email: self.sender.email.clone(),
            username: self.sender.display_name.clone(),
            message: self.text.clone(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_wire())
    }
}
