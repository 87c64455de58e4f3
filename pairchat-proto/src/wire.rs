//! Wire frames exchanged between PairChat clients and the server.
//!
//! One WebSocket connection carries everything for a session: the client
//! identifies itself with [`ClientMessage::Hello`], then sends tagged
//! requests and receives matching [`ServerMessage::Response`] frames,
//! interleaved with [`ServerMessage::NewMessage`] pushes. Because every
//! server-to-client frame for a connection flows through one channel,
//! pushes to the same recipient preserve send order.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageBody, MessageId, UnseenMap, UserId};

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Identifies the caller. Must be the first frame on a connection.
    ///
    /// The identity is issued by the external auth collaborator; the
    /// server binds it to this connection and uses it as the sender of
    /// every subsequent request.
    #[serde(rename_all = "camelCase")]
    Hello {
        /// The authenticated caller identity.
        user_id: UserId,
    },

    /// A pull request. The `id` is chosen by the client and echoed back
    /// in the matching [`ServerMessage::Response`].
    Request {
        /// Client-chosen correlation id.
        id: u64,
        /// The requested operation.
        op: RequestOp,
    },
}

/// Operations a client can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestOp {
    /// List all known peers plus the caller's unseen-message counts.
    ListPeers,

    /// Fetch the full conversation with a peer.
    ///
    /// Side effect: all unseen messages from that peer to the caller are
    /// marked seen (fetch implies seen).
    #[serde(rename_all = "camelCase")]
    FetchConversation {
        /// The other participant.
        peer: UserId,
    },

    /// Send a message to a peer.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// The recipient.
        to: UserId,
        /// The message content.
        body: MessageBody,
    },

    /// Mark a single message seen (live-delivered-while-open path).
    #[serde(rename_all = "camelCase")]
    MarkSeen {
        /// The message to mark.
        message_id: MessageId,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a successful [`ClientMessage::Hello`].
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// The identity that was bound to this connection (echoed back).
        user_id: UserId,
    },

    /// Answers the request with the same `id`.
    Response {
        /// Correlation id from the request.
        id: u64,
        /// The result envelope.
        result: ApiResult,
    },

    /// Best-effort push of a newly stored message addressed to this
    /// connection's user.
    NewMessage {
        /// The full message payload.
        message: Message,
    },
}

/// Response envelope: a success indicator plus, on failure, a
/// human-readable message. No structured error codes beyond the boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable failure description, present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Operation-specific payload, present when `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl ApiResult {
    /// Builds a success envelope carrying `data`.
    #[must_use]
    pub const fn ok(data: ResponseData) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Builds a failure envelope with a human-readable message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Operation-specific response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResponseData {
    /// Sidebar data: all peers plus unseen counts per peer.
    #[serde(rename_all = "camelCase")]
    Peers {
        /// Every known user except the caller.
        users: Vec<UserId>,
        /// Unseen count per peer; peers with zero unseen are absent.
        unseen_messages: UnseenMap,
    },

    /// Full conversation history, ordered by creation time ascending.
    Conversation {
        /// The messages of the conversation.
        messages: Vec<Message>,
    },

    /// The stored message resulting from a send.
    #[serde(rename_all = "camelCase")]
    Sent {
        /// The newly stored message.
        new_message: Message,
    },

    /// Acknowledgment of a mark-seen request.
    Marked,
}
