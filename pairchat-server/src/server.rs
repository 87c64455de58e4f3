//! Server core: shared state, WebSocket session handler, and request
//! dispatch.
//!
//! The server accepts WebSocket connections, binds each one to a user
//! identity via the `Hello` handshake, and serves pull requests over the
//! same connection that carries `NewMessage` pushes. Because every
//! outbound frame for a connection flows through one channel and one
//! writer task, pushes to a recipient arrive in the order they were sent.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use pairchat_proto::codec;
use pairchat_proto::message::UserId;
use pairchat_proto::wire::{ApiResult, ClientMessage, RequestOp, ResponseData, ServerMessage};

use crate::delivery::DeliveryChannel;
use crate::presence::PresenceRegistry;
use crate::roster::Roster;
use crate::store::{MemoryStore, MessageStore};
use crate::unseen::UnseenCounter;

/// Shared server state holding the store and the volatile registries.
pub struct ServerState<S> {
    /// Durable message record.
    pub store: Arc<S>,
    /// Online users and their connections.
    pub presence: Arc<PresenceRegistry>,
    /// Every identity the server has seen.
    pub roster: Roster,
    /// Best-effort push path.
    pub delivery: DeliveryChannel,
    /// Unseen-count derivation over the store.
    pub unseen: UnseenCounter<S>,
}

impl ServerState<MemoryStore> {
    /// Creates server state backed by a fresh in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl Default for ServerState<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MessageStore> ServerState<S> {
    /// Creates server state over a caller-provided store.
    pub fn with_store(store: S) -> Self {
        let store = Arc::new(store);
        let presence = Arc::new(PresenceRegistry::new());
        Self {
            store: Arc::clone(&store),
            presence: Arc::clone(&presence),
            roster: Roster::new(),
            delivery: DeliveryChannel::new(presence),
            unseen: UnseenCounter::new(store),
        }
    }
}

/// Handles an upgraded WebSocket connection for a single user.
///
/// The connection lifecycle:
/// 1. Wait for a `Hello` frame carrying the caller identity.
/// 2. Register presence (displacing any older connection) and record the
///    identity in the roster.
/// 3. Send `Welcome` back.
/// 4. Enter the request loop; responses and pushes share one writer task.
/// 5. On disconnect, unregister presence if the entry is still ours.
pub async fn handle_socket<S: MessageStore + 'static>(socket: WebSocket, state: Arc<ServerState<S>>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user_id) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before hello");
        return;
    };

    tracing::info!(user = %user_id, "user connecting");

    // One channel per connection: responses and pushes both go through it,
    // so frames to this user keep their send order.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    if state.presence.register(user_id.clone(), tx.clone()).await.is_some() {
        tracing::info!(user = %user_id, "replaced existing connection");
    }
    state.roster.record(user_id.clone()).await;

    let welcome = ServerMessage::Welcome {
        user_id: user_id.clone(),
    };
    if let Err(e) = send_server_msg(&mut ws_sender, &welcome).await {
        tracing::error!(user = %user_id, error = %e, "failed to send welcome");
        state.presence.unregister(&user_id, &tx).await;
        return;
    }

    tracing::info!(user = %user_id, "user connected");

    // Writer task: forwards frames from the channel to the WebSocket.
    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match codec::encode_server(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(user = %writer_user, error = %e, "failed to encode frame");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(text.into())).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: dispatch requests, answering through the writer channel.
    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let reader_tx = tx.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_text_frame(&reader_user, &text, &reader_state, &reader_tx).await;
                }
                WsMessage::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Only drop the presence entry if it still points at this connection;
    // a reconnect may already have replaced it.
    if state.presence.unregister(&user_id, &tx).await {
        tracing::info!(user = %user_id, "user disconnected and unregistered");
    } else {
        tracing::info!(user = %user_id, "user disconnected, newer connection kept");
    }
}

/// Waits for the first frame on the WebSocket, expecting a `Hello`.
///
/// Returns the caller identity if a valid `Hello` with a non-empty id
/// arrives, or `None` if the connection closes or something else shows up.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<WsMessage, axum::Error>> + Unpin),
) -> Option<UserId> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(text) => match codec::decode_client(&text) {
                Ok(ClientMessage::Hello { user_id }) => {
                    if user_id.is_empty() {
                        tracing::warn!("received hello with empty user id");
                        return None;
                    }
                    return Some(user_id);
                }
                Ok(other) => {
                    tracing::warn!(msg = ?other, "expected hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode hello frame");
                    return None;
                }
            },
            WsMessage::Close(_) => return None,
            _ => {
                // Skip non-text frames (ping/pong) during the handshake.
            }
        }
    }
    None
}

/// Handles a text frame from an identified user.
async fn handle_text_frame<S: MessageStore>(
    user_id: &UserId,
    text: &str,
    state: &Arc<ServerState<S>>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let msg = match codec::decode_client(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(user = %user_id, error = %e, "failed to decode frame");
            return;
        }
    };

    match msg {
        ClientMessage::Request { id, op } => {
            let result = handle_request(state, user_id, op).await;
            if tx.send(ServerMessage::Response { id, result }).is_err() {
                tracing::warn!(user = %user_id, "connection gone before response");
            }
        }
        ClientMessage::Hello { user_id: new_id } => {
            tracing::warn!(
                user = %user_id,
                new_id = %new_id,
                "received duplicate hello from identified user"
            );
        }
    }
}

/// Dispatches one request. Every failure becomes an error envelope; the
/// connection itself stays up.
pub async fn handle_request<S: MessageStore>(
    state: &Arc<ServerState<S>>,
    caller: &UserId,
    op: RequestOp,
) -> ApiResult {
    match op {
        RequestOp::ListPeers => {
            let users = state.roster.list_except(caller).await;
            match state.unseen.counts_for_sidebar(caller).await {
                Ok(unseen_messages) => ApiResult::ok(ResponseData::Peers {
                    users,
                    unseen_messages,
                }),
                Err(e) => {
                    tracing::warn!(user = %caller, error = %e, "list peers failed");
                    ApiResult::err(e.to_string())
                }
            }
        }
        RequestOp::FetchConversation { peer } => {
            // List first, then mark: the returned copies may still show
            // unseen, but the record is seen once this returns.
            let messages = match state.store.list_conversation(caller, &peer).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(user = %caller, error = %e, "fetch conversation failed");
                    return ApiResult::err(e.to_string());
                }
            };
            if let Err(e) = state.unseen.reset(caller, &peer).await {
                tracing::warn!(user = %caller, error = %e, "mark seen on fetch failed");
                return ApiResult::err(e.to_string());
            }
            ApiResult::ok(ResponseData::Conversation { messages })
        }
        RequestOp::SendMessage { to, body } => {
            if let Err(e) = body.validate() {
                return ApiResult::err(e.to_string());
            }
            let message = match state.store.append(caller.clone(), to.clone(), body).await {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(user = %caller, error = %e, "send failed");
                    return ApiResult::err(e.to_string());
                }
            };
            // Receivers become known users even before they ever connect.
            state.roster.record(to).await;
            state.delivery.send(&message).await;
            ApiResult::ok(ResponseData::Sent {
                new_message: message,
            })
        }
        // The connection identity is the receiver; a caller can only flip
        // messages addressed to them.
        RequestOp::MarkSeen { message_id } => {
            match state.store.mark_seen_by_id(&message_id, caller).await {
                Ok(()) => ApiResult::ok(ResponseData::Marked),
                Err(e) => {
                    tracing::warn!(user = %caller, error = %e, "mark seen failed");
                    ApiResult::err(e.to_string())
                }
            }
        }
    }
}

/// Encodes and sends a server frame directly on a WebSocket sender.
async fn send_server_msg(
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    msg: &ServerMessage,
) -> Result<(), String> {
    let text = codec::encode_server(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with pre-configured [`ServerState`], e.g. over a
/// custom store.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: MessageStore + 'static>(
    addr: &str,
    state: Arc<ServerState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S>))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler<S: MessageStore + 'static>(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState<S>>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
