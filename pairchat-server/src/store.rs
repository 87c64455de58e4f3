//! Durable append-only message record: the sole source of truth.
//!
//! Defines the [`MessageStore`] trait for persisting messages and their
//! seen state, plus [`MemoryStore`], the in-memory implementation used by
//! the server binary and tests. Every message is immutable after append
//! except its `seen` flag, which only ever flips `false -> true`.

use tokio::sync::RwLock;

use pairchat_proto::message::{Message, MessageBody, MessageId, UnseenMap, UserId};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The underlying storage is unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Trait for persisting direct messages and their seen state.
///
/// Operations may block on storage I/O. Mutations are scoped to one
/// (sender, receiver) pair or one message id; unrelated pairs never
/// contend semantically, so implementations need pair-level atomicity
/// but no global serialization.
pub trait MessageStore: Send + Sync {
    /// Creates and durably stores a new message with `seen = false` and
    /// `created_at` set to now. On error the caller must not assume the
    /// message was stored.
    fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: MessageBody,
    ) -> impl std::future::Future<Output = Result<Message, PersistenceError>> + Send;

    /// Returns every message between `a` and `b` (either direction),
    /// ordered by creation time ascending. Read-only.
    fn list_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, PersistenceError>> + Send;

    /// Atomically marks every unseen message from `sender` to `receiver`
    /// as seen, returning the number of messages newly flipped.
    ///
    /// Idempotent: a repeat call with nothing left to mark returns 0 and
    /// changes nothing. A message appended concurrently may be left
    /// unseen; the next call picks it up.
    fn mark_seen(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> impl std::future::Future<Output = Result<u64, PersistenceError>> + Send;

    /// Marks a single message as seen, provided it is addressed to
    /// `receiver`. Idempotent; an unknown id or a message addressed to
    /// someone else is a no-op, so a sender cannot flip their own
    /// outgoing messages.
    fn mark_seen_by_id(
        &self,
        id: &MessageId,
        receiver: &UserId,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;

    /// Returns the unseen count per sender for messages addressed to
    /// `receiver`, as one grouped pass over the store. Senders with no
    /// unseen messages are absent from the map.
    fn unseen_counts(
        &self,
        receiver: &UserId,
    ) -> impl std::future::Future<Output = Result<UnseenMap, PersistenceError>> + Send;
}

/// In-memory [`MessageStore`] backed by an append-ordered log.
///
/// Thread-safe via [`RwLock`]. Append order equals creation order, so
/// conversation listings come straight off the log without re-sorting.
pub struct MemoryStore {
    log: RwLock<Vec<Message>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Vec::new()),
        }
    }

    /// Returns the total number of stored messages.
    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    /// Returns `true` if the store holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryStore {
    async fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: MessageBody,
    ) -> Result<Message, PersistenceError> {
        let message = Message::new(sender, receiver, body);
        let mut log = self.log.write().await;
        log.push(message.clone());
        drop(log);
        Ok(message)
    }

    async fn list_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<Message>, PersistenceError> {
        let log = self.log.read().await;
        Ok(log
            .iter()
            .filter(|m| m.involves_pair(a, b))
            .cloned()
            .collect())
    }

    async fn mark_seen(&self, sender: &UserId, receiver: &UserId) -> Result<u64, PersistenceError> {
        let mut log = self.log.write().await;
        let mut flipped = 0u64;
        for msg in log.iter_mut() {
            if !msg.seen && msg.sender_id == *sender && msg.receiver_id == *receiver {
                msg.seen = true;
                flipped += 1;
            }
        }
        drop(log);
        Ok(flipped)
    }

    async fn mark_seen_by_id(
        &self,
        id: &MessageId,
        receiver: &UserId,
    ) -> Result<(), PersistenceError> {
        let mut log = self.log.write().await;
        if let Some(msg) = log
            .iter_mut()
            .find(|m| m.id == *id && m.receiver_id == *receiver)
        {
            msg.seen = true;
        }
        drop(log);
        Ok(())
    }

    async fn unseen_counts(&self, receiver: &UserId) -> Result<UnseenMap, PersistenceError> {
        let log = self.log.read().await;
        let mut counts = UnseenMap::new();
        for msg in log.iter() {
            if !msg.seen && msg.receiver_id == *receiver {
                *counts.entry(msg.sender_id.clone()).or_insert(0) += 1;
            }
        }
        drop(log);
        Ok(counts)
    }
}
