//! Known-user roster backing the sidebar peer list.
//!
//! Users become known when they connect or receive a message. The roster
//! is kept sorted so peer listings are stable across calls.

use std::collections::BTreeSet;

use tokio::sync::RwLock;

use pairchat_proto::message::UserId;

/// The set of user identities the server has seen.
#[derive(Default)]
pub struct Roster {
    users: RwLock<BTreeSet<UserId>>,
}

impl Roster {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a user identity. Idempotent.
    pub async fn record(&self, user: UserId) {
        self.users.write().await.insert(user);
    }

    /// Returns every known user except `caller`, in sorted order.
    pub async fn list_except(&self, caller: &UserId) -> Vec<UserId> {
        self.users
            .read()
            .await
            .iter()
            .filter(|u| *u != caller)
            .cloned()
            .collect()
    }
}
