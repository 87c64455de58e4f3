//! Conversation state machine and session driver.
//!
//! [`ConversationState`] is the pure core: which peer is selected, the
//! loaded history, the sidebar peer list, and per-peer unseen counts.
//! Selecting a peer produces a generation token; a history load that
//! returns after the user moved on is recognized as stale and discarded.
//!
//! [`ChatSession`] drives the state over a [`ChatApi`], consuming pushes
//! and emitting [`ClientEvent`]s for a UI layer to render.

use tokio::sync::{Mutex, mpsc};

use pairchat_proto::message::{Message, MessageBody, UnseenMap, UserId};

use crate::api::{ApiError, ChatApi};

/// Which conversation, if any, the user currently has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No conversation open; pushes only bump unseen counts.
    Idle,
    /// A peer was selected and its history is being fetched.
    Loading {
        /// The selected peer.
        peer: UserId,
        /// Token identifying this selection; a stale load carries an
        /// older one.
        generation: u64,
    },
    /// The conversation with `peer` is open and its history is loaded.
    Active {
        /// The open peer.
        peer: UserId,
    },
}

/// What [`ConversationState::apply_push`] did with an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the open conversation; the caller should mark it seen
    /// on the server.
    Appended,
    /// Not for the open conversation; the sender's unseen count was
    /// bumped to `count`.
    Counted {
        /// The sender whose count changed.
        peer: UserId,
        /// The new count.
        count: u64,
    },
    /// A copy of our own outgoing message; dropped.
    IgnoredEcho,
    /// Already present in the open conversation; dropped.
    Duplicate,
}

/// Pure client-side chat state: selection, history, peers, unseen counts.
pub struct ConversationState {
    self_id: UserId,
    selection: Selection,
    messages: Vec<Message>,
    peers: Vec<UserId>,
    unseen: UnseenMap,
    next_generation: u64,
}

impl ConversationState {
    /// Creates idle state for the given local identity.
    #[must_use]
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            selection: Selection::Idle,
            messages: Vec::new(),
            peers: Vec::new(),
            unseen: UnseenMap::new(),
            next_generation: 0,
        }
    }

    /// Begins loading the conversation with `peer`, returning the
    /// generation token that a matching [`history_loaded`](Self::history_loaded)
    /// must present. Any previously open conversation is closed.
    pub fn select(&mut self, peer: UserId) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.selection = Selection::Loading { peer, generation };
        self.messages.clear();
        generation
    }

    /// Completes a history load. Returns `false` and changes nothing if
    /// the selection moved on since the matching [`select`](Self::select)
    /// (different generation, deselected, or already active).
    pub fn history_loaded(&mut self, generation: u64, messages: Vec<Message>) -> bool {
        let Selection::Loading {
            peer,
            generation: current,
        } = &self.selection
        else {
            return false;
        };
        if *current != generation {
            return false;
        }
        let peer = peer.clone();
        // The fetch marked everything from this peer seen on the server.
        self.unseen.remove(&peer);
        self.messages = messages;
        self.selection = Selection::Active { peer };
        true
    }

    /// Closes the open conversation, returning to idle.
    pub fn deselect(&mut self) {
        self.selection = Selection::Idle;
        self.messages.clear();
    }

    /// Applies an incoming pushed message.
    ///
    /// A push from the open peer is appended with `seen` already set,
    /// since the user is looking at it; everything else bumps the
    /// sender's unseen count. A count bumped while that peer's history is
    /// still loading is harmless: the load completion clears it.
    pub fn apply_push(&mut self, mut message: Message) -> PushOutcome {
        if message.sender_id == self.self_id {
            return PushOutcome::IgnoredEcho;
        }

        if let Selection::Active { peer } = &self.selection
            && *peer == message.sender_id
        {
            if self.messages.iter().any(|m| m.id == message.id) {
                return PushOutcome::Duplicate;
            }
            message.seen = true;
            self.messages.push(message);
            return PushOutcome::Appended;
        }

        let count = self
            .unseen
            .entry(message.sender_id.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        PushOutcome::Counted {
            peer: message.sender_id,
            count: *count,
        }
    }

    /// Records a message we sent, appending it to the open conversation
    /// if it belongs there.
    pub fn record_sent(&mut self, message: Message) {
        if let Selection::Active { peer } = &self.selection
            && *peer == message.receiver_id
            && !self.messages.iter().any(|m| m.id == message.id)
        {
            self.messages.push(message);
        }
    }

    /// Replaces the sidebar data with a fresh peer listing.
    pub fn apply_peer_list(&mut self, peers: Vec<UserId>, unseen: UnseenMap) {
        self.peers = peers;
        self.unseen = unseen;
        // The open conversation is seen by definition.
        if let Selection::Active { peer } = &self.selection {
            self.unseen.remove(peer);
        }
    }

    /// The current selection.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Messages of the open conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Known peers, as last listed by the server.
    pub fn peers(&self) -> &[UserId] {
        &self.peers
    }

    /// The unseen count for one peer (0 if absent).
    pub fn unseen_count(&self, peer: &UserId) -> u64 {
        self.unseen.get(peer).copied().unwrap_or(0)
    }

    /// The full unseen map.
    pub fn unseen(&self) -> &UnseenMap {
        &self.unseen
    }
}

/// Events emitted by [`ChatSession`] for UI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A conversation finished loading.
    ConversationLoaded {
        /// The opened peer.
        peer: UserId,
        /// Its full history, oldest first.
        messages: Vec<Message>,
    },
    /// A message was appended to the open conversation (sent or received).
    MessageAppended {
        /// The appended message.
        message: Message,
    },
    /// A peer's unseen count changed.
    UnseenChanged {
        /// The peer whose count changed.
        peer: UserId,
        /// The new count.
        count: u64,
    },
    /// The sidebar peer listing was refreshed.
    PeersUpdated {
        /// Every known peer.
        peers: Vec<UserId>,
        /// Unseen counts per peer.
        unseen: UnseenMap,
    },
    /// An operation failed; the attempted transition was abandoned.
    Error {
        /// Human-readable notice for the user.
        notice: String,
    },
}

/// Drives [`ConversationState`] over a [`ChatApi`].
///
/// The UI calls the async methods; pushes are fed in via
/// [`handle_push`](Self::handle_push) (or the [`run`](Self::run) pump).
/// Events for rendering come out of the receiver returned by
/// [`new`](Self::new).
pub struct ChatSession<A> {
    api: A,
    state: Mutex<ConversationState>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl<A: ChatApi> ChatSession<A> {
    /// Creates a session for `self_id` over the given API.
    ///
    /// Returns the session and a receiver for [`ClientEvent`]s.
    pub fn new(api: A, self_id: UserId, event_buffer: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let session = Self {
            api,
            state: Mutex::new(ConversationState::new(self_id)),
            event_tx,
        };
        (session, event_rx)
    }

    /// Refreshes the sidebar: peers plus unseen counts.
    ///
    /// # Errors
    ///
    /// Propagates API failures; the local state is left unchanged on error.
    pub async fn refresh_peers(&self) -> Result<(), ApiError> {
        let (peers, unseen) = match self.api.list_peers().await {
            Ok(listing) => listing,
            Err(e) => {
                self.notify_error(format!("could not refresh peers: {e}"));
                return Err(e);
            }
        };
        let mut state = self.state.lock().await;
        state.apply_peer_list(peers.clone(), unseen.clone());
        drop(state);
        let _ = self.event_tx.try_send(ClientEvent::PeersUpdated { peers, unseen });
        Ok(())
    }

    /// Opens the conversation with `peer`: fetches its history and clears
    /// its unseen count. If the user selects another peer before the
    /// fetch returns, the stale result is discarded.
    ///
    /// # Errors
    ///
    /// Propagates API failures. A failed fetch abandons the selection
    /// (back to idle) unless the user has already moved on.
    pub async fn open_conversation(&self, peer: &UserId) -> Result<(), ApiError> {
        let generation = self.state.lock().await.select(peer.clone());

        let messages = match self.api.fetch_conversation(peer).await {
            Ok(messages) => messages,
            Err(e) => {
                let mut state = self.state.lock().await;
                if matches!(
                    state.selection(),
                    Selection::Loading { generation: current, .. } if *current == generation
                ) {
                    state.deselect();
                }
                drop(state);
                self.notify_error(format!("could not open conversation with {peer}: {e}"));
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        if state.history_loaded(generation, messages.clone()) {
            drop(state);
            let _ = self.event_tx.try_send(ClientEvent::ConversationLoaded {
                peer: peer.clone(),
                messages,
            });
        } else {
            tracing::debug!(peer = %peer, "discarding stale history load");
        }
        Ok(())
    }

    /// Closes the open conversation.
    pub async fn close_conversation(&self) {
        self.state.lock().await.deselect();
    }

    /// Sends a message to `peer` and appends the stored copy locally.
    ///
    /// # Errors
    ///
    /// Propagates validation and API failures; nothing is appended on error.
    pub async fn send(&self, peer: &UserId, body: MessageBody) -> Result<Message, ApiError> {
        let message = match self.api.send_message(peer, body).await {
            Ok(message) => message,
            Err(e) => {
                self.notify_error(format!("send to {peer} failed: {e}"));
                return Err(e);
            }
        };
        let mut state = self.state.lock().await;
        state.record_sent(message.clone());
        drop(state);
        let _ = self.event_tx.try_send(ClientEvent::MessageAppended {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Handles one pushed message.
    ///
    /// A push into the open conversation is appended and reported seen to
    /// the server; anything else bumps the sender's unseen count. A
    /// failed mark-seen call is logged and tolerated: the next fetch of
    /// that conversation settles the record.
    pub async fn handle_push(&self, message: Message) {
        let mut state = self.state.lock().await;
        let outcome = state.apply_push(message.clone());
        drop(state);

        match outcome {
            PushOutcome::Appended => {
                let _ = self.event_tx.try_send(ClientEvent::MessageAppended {
                    message: message.clone(),
                });
                if let Err(e) = self.api.mark_seen(&message.id).await {
                    tracing::warn!(message_id = %message.id, err = %e, "mark seen failed");
                }
            }
            PushOutcome::Counted { peer, count } => {
                let _ = self
                    .event_tx
                    .try_send(ClientEvent::UnseenChanged { peer, count });
            }
            PushOutcome::IgnoredEcho | PushOutcome::Duplicate => {
                tracing::debug!(message_id = %message.id, ?outcome, "push dropped");
            }
        }
    }

    /// Pumps pushes from the receiver until the connection ends.
    pub async fn run(&self, mut pushes: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = pushes.recv().await {
            self.handle_push(message).await;
        }
        tracing::info!("push stream ended");
    }

    /// Runs `f` against the current state snapshot.
    pub async fn with_state<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    fn notify_error(&self, notice: String) {
        tracing::warn!(%notice, "session operation failed");
        let _ = self.event_tx.try_send(ClientEvent::Error { notice });
    }
}
