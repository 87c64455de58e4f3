//! WebSocket client API for the `PairChat` server.
//!
//! [`WsApi`] owns one WebSocket connection: requests are tagged with a
//! client-chosen id and matched against the server's `response` frames by
//! a background reader task, while `newMessage` pushes are forwarded out
//! of band on a separate channel. The [`ChatApi`] trait is the seam used
//! by [`crate::conversation::ChatSession`] so tests can drive the session
//! against a scripted stand-in.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pairchat_proto::codec;
use pairchat_proto::message::{Message, MessageBody, MessageId, UnseenMap, UserId};
use pairchat_proto::wire::{ApiResult, ClientMessage, RequestOp, ResponseData, ServerMessage};

/// Type alias for the write half of the WebSocket connection.
type WsSender =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, WsFrame>;

/// Type alias for the read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for waiting for the `welcome` acknowledgment.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single request/response round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A timeout expired while waiting for the server.
    #[error("timed out waiting for server")]
    Timeout,

    /// The connection to the server is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] pairchat_proto::codec::CodecError),

    /// The server answered with an error envelope.
    #[error("server error: {0}")]
    Server(String),

    /// The server answered with a payload the operation did not expect.
    #[error("unexpected response payload")]
    UnexpectedPayload,
}

/// Operations a chat client can perform against the server.
///
/// The semantics mirror the server's request surface: fetching a
/// conversation marks its unseen messages seen, and sending returns the
/// stored copy with its server-assigned id and timestamp.
pub trait ChatApi: Send + Sync {
    /// Lists every known peer plus the caller's unseen counts.
    fn list_peers(
        &self,
    ) -> impl std::future::Future<Output = Result<(Vec<UserId>, UnseenMap), ApiError>> + Send;

    /// Fetches the full conversation with `peer`, oldest first.
    fn fetch_conversation(
        &self,
        peer: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Sends a message, returning the stored copy.
    fn send_message(
        &self,
        to: &UserId,
        body: MessageBody,
    ) -> impl std::future::Future<Output = Result<Message, ApiError>> + Send;

    /// Marks one message seen.
    fn mark_seen(
        &self,
        message_id: &MessageId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;
}

/// WebSocket-backed [`ChatApi`] implementation.
///
/// Created via [`WsApi::connect`], which performs the hello handshake and
/// spawns a background reader task. Pushes arrive on the receiver returned
/// alongside the API handle.
pub struct WsApi {
    /// This client's identity, as acknowledged by the server.
    user_id: UserId,
    /// Write half of the WebSocket (shared for concurrent requests).
    ws_sender: Arc<AsyncMutex<WsSender>>,
    /// In-flight requests waiting for their response frame.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<ApiResult>>>>,
    /// Next request correlation id.
    next_id: AtomicU64,
    /// Whether the connection is still up.
    connected: Arc<AtomicBool>,
    /// Handle to the background reader task.
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl WsApi {
    /// Connect to a server and identify as `user_id`.
    ///
    /// Performs the following steps:
    /// 1. Establishes the WebSocket connection (10s timeout)
    /// 2. Sends a `hello` frame with the caller identity
    /// 3. Waits for the `welcome` acknowledgment (5s timeout)
    /// 4. Spawns a background task that routes responses and pushes
    ///
    /// Returns the API handle and a receiver for `newMessage` pushes.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Timeout`] if connection or handshake times out.
    /// - [`ApiError::Connect`] if the URL cannot be reached.
    /// - [`ApiError::ConnectionClosed`] if the server drops the
    ///   connection during the handshake (e.g. rejected identity).
    pub async fn connect(
        url: &str,
        user_id: UserId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Message>), ApiError> {
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "WebSocket connect timed out");
                ApiError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "WebSocket connect failed");
                ApiError::Connect(e.to_string())
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = ClientMessage::Hello {
            user_id: user_id.clone(),
        };
        let text = codec::encode_client(&hello)?;
        ws_sender
            .send(WsFrame::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send hello");
                ApiError::ConnectionClosed
            })?;

        wait_for_welcome(&mut ws_reader, &user_id).await?;

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<ApiResult>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            push_tx,
            Arc::clone(&connected),
        ));

        Ok((
            Self {
                user_id,
                ws_sender: Arc::new(AsyncMutex::new(ws_sender)),
                pending,
                next_id: AtomicU64::new(1),
                connected,
                _reader_handle: reader_handle,
            },
            push_rx,
        ))
    }

    /// Return the identity this connection is bound to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Check whether the connection to the server is still active.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Send one request and wait for its matching response envelope.
    async fn request(&self, op: RequestOp) -> Result<ApiResult, ApiError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(ApiError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = ClientMessage::Request { id, op };
        let text = match codec::encode_client(&frame) {
            Ok(text) => text,
            Err(e) => {
                self.pending.lock().remove(&id);
                return Err(e.into());
            }
        };

        {
            let mut sender = self.ws_sender.lock().await;
            if let Err(e) = sender.send(WsFrame::Text(text.into())).await {
                tracing::warn!(err = %e, "request send failed");
                self.pending.lock().remove(&id);
                self.connected.store(false, Ordering::Relaxed);
                return Err(ApiError::ConnectionClosed);
            }
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ApiError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ApiError::Timeout)
            }
        }
    }
}

impl ChatApi for WsApi {
    async fn list_peers(&self) -> Result<(Vec<UserId>, UnseenMap), ApiError> {
        match expect_data(self.request(RequestOp::ListPeers).await?)? {
            ResponseData::Peers {
                users,
                unseen_messages,
            } => Ok((users, unseen_messages)),
            _ => Err(ApiError::UnexpectedPayload),
        }
    }

    async fn fetch_conversation(&self, peer: &UserId) -> Result<Vec<Message>, ApiError> {
        let op = RequestOp::FetchConversation { peer: peer.clone() };
        match expect_data(self.request(op).await?)? {
            ResponseData::Conversation { messages } => Ok(messages),
            _ => Err(ApiError::UnexpectedPayload),
        }
    }

    async fn send_message(&self, to: &UserId, body: MessageBody) -> Result<Message, ApiError> {
        let op = RequestOp::SendMessage {
            to: to.clone(),
            body,
        };
        match expect_data(self.request(op).await?)? {
            ResponseData::Sent { new_message } => Ok(new_message),
            _ => Err(ApiError::UnexpectedPayload),
        }
    }

    async fn mark_seen(&self, message_id: &MessageId) -> Result<(), ApiError> {
        let op = RequestOp::MarkSeen {
            message_id: message_id.clone(),
        };
        match expect_data(self.request(op).await?)? {
            ResponseData::Marked => Ok(()),
            _ => Err(ApiError::UnexpectedPayload),
        }
    }
}

/// Unwraps an [`ApiResult`], turning error envelopes into [`ApiError::Server`].
fn expect_data(result: ApiResult) -> Result<ResponseData, ApiError> {
    if !result.success {
        return Err(ApiError::Server(
            result.message.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    result.data.ok_or(ApiError::UnexpectedPayload)
}

/// Waits for the `welcome` frame after sending `hello`.
async fn wait_for_welcome(ws_reader: &mut WsReader, expected: &UserId) -> Result<(), ApiError> {
    let ack = tokio::time::timeout(HELLO_TIMEOUT, ws_reader.next())
        .await
        .map_err(|_| {
            tracing::warn!("welcome acknowledgment timed out");
            ApiError::Timeout
        })?;

    match ack {
        Some(Ok(WsFrame::Text(text))) => match codec::decode_server(&text) {
            Ok(ServerMessage::Welcome { user_id }) if user_id == *expected => {
                tracing::info!(user = %user_id, "connected to server");
                Ok(())
            }
            Ok(other) => {
                tracing::warn!(?other, "unexpected frame during handshake");
                Err(ApiError::Connect("unexpected handshake response".into()))
            }
            Err(e) => {
                tracing::warn!(err = %e, "malformed handshake response");
                Err(e.into())
            }
        },
        Some(Ok(WsFrame::Close(_))) | None => {
            tracing::warn!("server closed connection during handshake");
            Err(ApiError::ConnectionClosed)
        }
        Some(Ok(_)) => Err(ApiError::Connect(
            "unexpected non-text frame during handshake".into(),
        )),
        Some(Err(e)) => {
            tracing::warn!(err = %e, "WebSocket error during handshake");
            Err(ApiError::ConnectionClosed)
        }
    }
}

/// Background task that routes incoming frames.
///
/// Responses go to their waiting request via the pending map; pushes go
/// out on the push channel. Malformed frames are logged and skipped.
/// Sets `connected` to `false` and drops all in-flight requests when the
/// connection ends.
async fn reader_loop(
    mut ws_reader: WsReader,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<ApiResult>>>>,
    push_tx: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame_result) = ws_reader.next().await {
        match frame_result {
            Ok(WsFrame::Text(text)) => match codec::decode_server(&text) {
                Ok(ServerMessage::Response { id, result }) => {
                    let Some(waiter) = pending.lock().remove(&id) else {
                        tracing::debug!(id, "response for unknown or timed-out request");
                        continue;
                    };
                    let _ = waiter.send(result);
                }
                Ok(ServerMessage::NewMessage { message }) => {
                    if push_tx.send(message).is_err() {
                        // Push receiver dropped; the API handle is gone.
                        break;
                    }
                }
                Ok(ServerMessage::Welcome { user_id }) => {
                    tracing::debug!(user = %user_id, "unexpected welcome after handshake");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(WsFrame::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore binary, ping, pong frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    // Fail any request still waiting for a response.
    pending.lock().clear();
    tracing::info!("reader task exiting");
}
