//! Best-effort push delivery of newly stored messages.
//!
//! Delivery never affects persistence or the sender's response: if the
//! recipient is offline or their channel is gone, the message simply
//! waits in the store to be pulled later.

use std::sync::Arc;

use tracing::debug;

use pairchat_proto::message::Message;
use pairchat_proto::wire::ServerMessage;

use crate::presence::PresenceRegistry;

/// Pushes stored messages to online recipients.
#[derive(Clone)]
pub struct DeliveryChannel {
    presence: Arc<PresenceRegistry>,
}

impl DeliveryChannel {
    /// Builds a delivery channel over the given presence registry.
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Attempts to push `message` to its recipient's live connection.
    ///
    /// Absence and send failures are swallowed by design of the
    /// at-most-once push path; the durable copy is already stored.
    pub async fn send(&self, message: &Message) {
        let Some(handle) = self.presence.lookup(&message.receiver_id).await else {
            debug!(receiver = %message.receiver_id, "recipient offline, skipping push");
            return;
        };
        let frame = ServerMessage::NewMessage {
            message: message.clone(),
        };
        if handle.send(frame).is_err() {
            debug!(receiver = %message.receiver_id, "recipient channel closed, skipping push");
        }
    }
}
