//! Volatile presence registry mapping online users to their connection.
//!
//! At most one live connection per user: a newer connection displaces the
//! older one's entry. Entries carry no durable state; a restart simply
//! starts empty and clients re-register.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use pairchat_proto::message::UserId;
use pairchat_proto::wire::ServerMessage;

/// The sending half of a connection's outbound frame channel.
pub type ChannelHandle = mpsc::UnboundedSender<ServerMessage>;

/// Tracks which users currently have a live connection.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, ChannelHandle>>,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `user` to `handle`, displacing any previous binding.
    ///
    /// Returns the displaced handle, if any, so the caller can decide
    /// what to do with the superseded connection.
    pub async fn register(&self, user: UserId, handle: ChannelHandle) -> Option<ChannelHandle> {
        let mut entries = self.entries.write().await;
        let displaced = entries.insert(user.clone(), handle);
        drop(entries);
        if displaced.is_some() {
            debug!(user = %user, "displaced existing presence entry");
        }
        displaced
    }

    /// Removes the binding for `user`, but only if it still points at
    /// `handle`. A disconnect racing a fresh registration must not evict
    /// the newer connection.
    ///
    /// Returns `true` if an entry was removed.
    pub async fn unregister(&self, user: &UserId, handle: &ChannelHandle) -> bool {
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(user)
            .is_some_and(|current| current.same_channel(handle));
        if matches {
            entries.remove(user);
        }
        drop(entries);
        matches
    }

    /// Returns the connection handle for `user`, if online.
    pub async fn lookup(&self, user: &UserId) -> Option<ChannelHandle> {
        self.entries.read().await.get(user).cloned()
    }

    /// Returns the number of online users.
    pub async fn online_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
