//! Unseen-count derivation over the message store.
//!
//! Counts are never stored independently; they are always derived from
//! the `seen` flags, so they cannot drift from the record itself.

use std::sync::Arc;

use pairchat_proto::message::{UnseenMap, UserId};

use crate::store::{MessageStore, PersistenceError};

/// Derives per-peer unseen counts and resets them on read.
pub struct UnseenCounter<S> {
    store: Arc<S>,
}

impl<S: MessageStore> UnseenCounter<S> {
    /// Wraps the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the caller's sidebar counts: unseen messages addressed to
    /// `self_id`, grouped by sender, in one pass over the store.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn counts_for_sidebar(
        &self,
        self_id: &UserId,
    ) -> Result<UnseenMap, PersistenceError> {
        self.store.unseen_counts(self_id).await
    }

    /// Clears the count for one peer by marking every unseen message from
    /// `peer_id` to `self_id` as seen. Returns how many were flipped.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn reset(&self, self_id: &UserId, peer_id: &UserId) -> Result<u64, PersistenceError> {
        self.store.mark_seen(peer_id, self_id).await
    }
}
