//! Integration tests for best-effort live push delivery.
//!
//! Both participants online: new messages are pushed over the open
//! WebSocket in send order, the session appends pushes into the open
//! conversation and reports them seen, and pushes for other peers bump
//! unseen counts instead.

use std::sync::Arc;
use std::time::Duration;

use pairchat::api::{ChatApi, WsApi};
use pairchat::conversation::{ChatSession, ClientEvent};
use pairchat_proto::message::{MessageBody, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = pairchat_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server");
    (format!("ws://{addr}/ws"), handle)
}

/// Connect a session for `user` with its push pump running.
async fn connect_session(
    url: &str,
    user: &str,
) -> (Arc<ChatSession<WsApi>>, tokio::sync::mpsc::Receiver<ClientEvent>) {
    let (api, pushes) = WsApi::connect(url, UserId::new(user))
        .await
        .expect("connect failed");
    let (session, events) = ChatSession::new(api, UserId::new(user), 64);
    let session = Arc::new(session);
    let pump = Arc::clone(&session);
    tokio::spawn(async move {
        pump.run(pushes).await;
    });
    (session, events)
}

async fn next_event(events: &mut tokio::sync::mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event timed out")
        .expect("event channel closed")
}

// ===========================================================================
// Push ordering and append-on-push
// ===========================================================================

/// Pushes into the open conversation arrive appended in send order.
#[tokio::test]
async fn pushes_append_in_send_order() {
    let (url, _handle) = start_test_server().await;

    let (alice, _alice_events) = connect_session(&url, "alice").await;
    let (bob, mut bob_events) = connect_session(&url, "bob").await;

    bob.open_conversation(&UserId::new("alice")).await.unwrap();
    let _ = next_event(&mut bob_events).await; // ConversationLoaded (empty)

    for text in ["one", "two", "three"] {
        alice
            .send(&UserId::new("bob"), MessageBody::text(text))
            .await
            .unwrap();
    }

    for expected in ["one", "two", "three"] {
        match next_event(&mut bob_events).await {
            ClientEvent::MessageAppended { message } => {
                assert_eq!(message.text.as_deref(), Some(expected));
            }
            other => panic!("expected MessageAppended, got {other:?}"),
        }
    }

    bob.with_state(|s| {
        assert_eq!(s.messages().len(), 3);
        assert!(s.messages().iter().all(|m| m.seen));
    })
    .await;
}

/// A push appended to the open conversation is reported seen to the
/// server, so the sender's next fetch shows the flip.
#[tokio::test]
async fn appended_push_settles_seen_on_the_server() {
    let (url, _handle) = start_test_server().await;

    let (alice, _alice_events) = connect_session(&url, "alice").await;
    let (bob, mut bob_events) = connect_session(&url, "bob").await;

    bob.open_conversation(&UserId::new("alice")).await.unwrap();
    let _ = next_event(&mut bob_events).await;

    alice
        .send(&UserId::new("bob"), MessageBody::text("watch me"))
        .await
        .unwrap();
    let _ = next_event(&mut bob_events).await; // MessageAppended

    // Poll the record until the recipient's mark-seen lands.
    let checker = WsApi::connect(&url, UserId::new("alice"))
        .await
        .map(|(api, _)| api);
    let checker = checker.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let messages = checker
            .fetch_conversation(&UserId::new("bob"))
            .await
            .unwrap();
        if messages.iter().any(|m| m.seen) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "mark-seen never reached the store"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Pushes for a peer other than the open one bump that sender's unseen
/// count without touching the open view.
#[tokio::test]
async fn push_for_other_peer_bumps_count() {
    let (url, _handle) = start_test_server().await;

    let (_alice, _alice_events) = connect_session(&url, "alice").await;
    let (carol, _carol_events) = connect_session(&url, "carol").await;
    let (bob, mut bob_events) = connect_session(&url, "bob").await;

    bob.open_conversation(&UserId::new("alice")).await.unwrap();
    let _ = next_event(&mut bob_events).await;

    carol
        .send(&UserId::new("bob"), MessageBody::text("psst"))
        .await
        .unwrap();

    match next_event(&mut bob_events).await {
        ClientEvent::UnseenChanged { peer, count } => {
            assert_eq!(peer, UserId::new("carol"));
            assert_eq!(count, 1);
        }
        other => panic!("expected UnseenChanged, got {other:?}"),
    }

    bob.with_state(|s| {
        assert!(s.messages().is_empty(), "open view must be untouched");
        assert_eq!(s.unseen_count(&UserId::new("carol")), 1);
    })
    .await;
}

/// Switching to the peer whose pushes were only counted loads the full
/// history and clears the count.
#[tokio::test]
async fn switching_conversations_clears_the_count() {
    let (url, _handle) = start_test_server().await;

    let (carol, _carol_events) = connect_session(&url, "carol").await;
    let (bob, mut bob_events) = connect_session(&url, "bob").await;

    bob.open_conversation(&UserId::new("alice")).await.unwrap();
    let _ = next_event(&mut bob_events).await;

    carol
        .send(&UserId::new("bob"), MessageBody::text("over here"))
        .await
        .unwrap();
    let _ = next_event(&mut bob_events).await; // UnseenChanged

    bob.open_conversation(&UserId::new("carol")).await.unwrap();
    match next_event(&mut bob_events).await {
        ClientEvent::ConversationLoaded { peer, messages } => {
            assert_eq!(peer, UserId::new("carol"));
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].text.as_deref(), Some("over here"));
        }
        other => panic!("expected ConversationLoaded, got {other:?}"),
    }

    bob.with_state(|s| assert_eq!(s.unseen_count(&UserId::new("carol")), 0))
        .await;
}

/// Delivery is best-effort: a recipient who is offline simply pulls the
/// message later, and the sender is never told apart.
#[tokio::test]
async fn offline_recipient_pulls_later() {
    let (url, _handle) = start_test_server().await;

    let (alice, _alice_events) = connect_session(&url, "alice").await;
    alice
        .send(&UserId::new("bob"), MessageBody::text("catch up"))
        .await
        .unwrap();

    // Bob connects after the fact; nothing was lost.
    let (bob, mut bob_events) = connect_session(&url, "bob").await;
    bob.open_conversation(&UserId::new("alice")).await.unwrap();
    match next_event(&mut bob_events).await {
        ClientEvent::ConversationLoaded { messages, .. } => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].text.as_deref(), Some("catch up"));
        }
        other => panic!("expected ConversationLoaded, got {other:?}"),
    }
}

/// The sender's own connection never receives an echo push.
#[tokio::test]
async fn sender_receives_no_echo() {
    let (url, _handle) = start_test_server().await;

    let (alice_api, mut alice_pushes) = WsApi::connect(&url, UserId::new("alice")).await.unwrap();
    let (_bob, _bob_events) = connect_session(&url, "bob").await;

    alice_api
        .send_message(&UserId::new("bob"), MessageBody::text("no echo"))
        .await
        .unwrap();

    let echo = tokio::time::timeout(Duration::from_millis(300), alice_pushes.recv()).await;
    assert!(echo.is_err(), "sender must not be pushed their own message");
}
