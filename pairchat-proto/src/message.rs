//! Core data model for direct messages.
//!
//! A [`Message`] is immutable once stored except for its `seen` flag,
//! which transitions `false -> true` exactly once and never reverts.
//! The server-side store owns every `Message`; clients hold copies for
//! display only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message text size in bytes (16 KB).
pub const MAX_TEXT_SIZE: usize = 16 * 1024;

/// Opaque, stable identity of a registered user.
///
/// Issued by the external auth collaborator; the core only compares,
/// hashes, and displays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identity from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identity is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither text nor a media reference was supplied.
    #[error("message has no text and no media reference")]
    EmptyBody,
    /// Message text exceeds the maximum allowed size.
    #[error("message text too large ({size} bytes, max {max} bytes)")]
    TextTooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Content of an outgoing message: text, a media reference, or both.
///
/// The media reference is an opaque URL-like string produced by the
/// external upload collaborator; the core stores it verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    /// Plain text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Ready-to-store media reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

impl MessageBody {
    /// Creates a text-only body.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            media_ref: None,
        }
    }

    /// Creates a media-only body.
    #[must_use]
    pub fn media(media_ref: impl Into<String>) -> Self {
        Self {
            text: None,
            media_ref: Some(media_ref.into()),
        }
    }

    /// Validates this body for sending.
    ///
    /// At least one of text or media reference must be present, and the
    /// text must not exceed [`MAX_TEXT_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyBody`] or
    /// [`ValidationError::TextTooLarge`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_text = self.text.as_ref().is_some_and(|t| !t.is_empty());
        let has_media = self.media_ref.as_ref().is_some_and(|m| !m.is_empty());
        if !has_text && !has_media {
            return Err(ValidationError::EmptyBody);
        }
        if let Some(text) = &self.text
            && text.len() > MAX_TEXT_SIZE
        {
            return Err(ValidationError::TextTooLarge {
                size: text.len(),
                max: MAX_TEXT_SIZE,
            });
        }
        Ok(())
    }
}

/// A stored direct message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// Who sent this message.
    pub sender_id: UserId,
    /// Who the message is addressed to.
    pub receiver_id: UserId,
    /// Plain text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Media reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    /// Whether the receiver has seen this message.
    pub seen: bool,
    /// When the message was created.
    pub created_at: Timestamp,
}

impl Message {
    /// Creates a new unseen message with a fresh id and the current time.
    #[must_use]
    pub fn new(sender_id: UserId, receiver_id: UserId, body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            text: body.text,
            media_ref: body.media_ref,
            seen: false,
            created_at: Timestamp::now(),
        }
    }

    /// Returns `true` if this message belongs to the conversation between
    /// `a` and `b`, in either direction.
    #[must_use]
    pub fn involves_pair(&self, a: &UserId, b: &UserId) -> bool {
        (self.sender_id == *a && self.receiver_id == *b)
            || (self.sender_id == *b && self.receiver_id == *a)
    }
}

/// Per-peer count of unseen messages addressed to the current user.
///
/// Derived from the message store, never persisted independently; a
/// recount against the store must always reproduce it.
pub type UnseenMap = HashMap<UserId, u64>;
