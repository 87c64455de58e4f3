//! Integration tests for the pull-driven session flow.
//!
//! Exercises the full client/server path over a real WebSocket:
//! connect, list peers with unseen counts, open a conversation (which
//! marks its messages seen), and send while the recipient is offline.

use std::time::Duration;

use pairchat::api::{ApiError, ChatApi, WsApi};
use pairchat::conversation::{ChatSession, ClientEvent, Selection};
use pairchat::prefs::Prefs;
use pairchat_proto::message::{MessageBody, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Start an in-process server and return a ws:// URL for connecting.
async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = pairchat_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server");
    (format!("ws://{addr}/ws"), handle)
}

/// Connect a [`WsApi`] for `user`, discarding the push receiver.
async fn connect(url: &str, user: &str) -> WsApi {
    let (api, _pushes) = WsApi::connect(url, UserId::new(user))
        .await
        .expect("connect failed");
    api
}

/// Receive the next event within a timeout.
async fn next_event(events: &mut tokio::sync::mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event timed out")
        .expect("event channel closed")
}

// ===========================================================================
// Sidebar and unseen counts
// ===========================================================================

/// An offline recipient finds the sender and the pending count when they
/// next connect.
#[tokio::test]
async fn offline_messages_surface_in_sidebar() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("first"))
        .await
        .unwrap();
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("second"))
        .await
        .unwrap();

    let bob = connect(&url, "bob").await;
    let (users, unseen) = bob.list_peers().await.unwrap();
    assert!(users.contains(&UserId::new("alice")));
    assert_eq!(unseen.get(&UserId::new("alice")), Some(&2));
}

/// Counts are grouped per sender, and senders with nothing unseen are
/// absent rather than zero.
#[tokio::test]
async fn counts_group_by_sender() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    let carol = connect(&url, "carol").await;
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("from alice"))
        .await
        .unwrap();
    carol
        .send_message(&UserId::new("bob"), MessageBody::text("from carol 1"))
        .await
        .unwrap();
    carol
        .send_message(&UserId::new("bob"), MessageBody::text("from carol 2"))
        .await
        .unwrap();

    let bob = connect(&url, "bob").await;
    let (_, unseen) = bob.list_peers().await.unwrap();
    assert_eq!(unseen.get(&UserId::new("alice")), Some(&1));
    assert_eq!(unseen.get(&UserId::new("carol")), Some(&2));
    assert_eq!(unseen.len(), 2);
}

// ===========================================================================
// Fetch implies seen
// ===========================================================================

/// Opening a conversation clears its unseen count and settles the seen
/// flags on the record.
#[tokio::test]
async fn fetching_a_conversation_marks_it_seen() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("unread"))
        .await
        .unwrap();

    let bob = connect(&url, "bob").await;
    let first = bob.fetch_conversation(&UserId::new("alice")).await.unwrap();
    assert_eq!(first.len(), 1);

    // The count is gone.
    let (_, unseen) = bob.list_peers().await.unwrap();
    assert!(unseen.is_empty());

    // The sender observes the flip on their next fetch.
    let alices_view = alice
        .fetch_conversation(&UserId::new("bob"))
        .await
        .unwrap();
    assert!(alices_view[0].seen, "recipient's fetch settled the record");
}

/// Fetching one conversation leaves other senders' counts untouched.
#[tokio::test]
async fn fetch_is_scoped_to_one_peer() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    let carol = connect(&url, "carol").await;
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("a"))
        .await
        .unwrap();
    carol
        .send_message(&UserId::new("bob"), MessageBody::text("c"))
        .await
        .unwrap();

    let bob = connect(&url, "bob").await;
    bob.fetch_conversation(&UserId::new("alice")).await.unwrap();

    let (_, unseen) = bob.list_peers().await.unwrap();
    assert!(unseen.get(&UserId::new("alice")).is_none());
    assert_eq!(unseen.get(&UserId::new("carol")), Some(&1));
}

// ===========================================================================
// Conversation ordering
// ===========================================================================

/// A conversation interleaves both directions in creation order.
#[tokio::test]
async fn conversation_preserves_creation_order() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    let bob = connect(&url, "bob").await;

    alice
        .send_message(&UserId::new("bob"), MessageBody::text("1 from alice"))
        .await
        .unwrap();
    bob.send_message(&UserId::new("alice"), MessageBody::text("2 from bob"))
        .await
        .unwrap();
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("3 from alice"))
        .await
        .unwrap();

    let messages = bob.fetch_conversation(&UserId::new("alice")).await.unwrap();
    let texts: Vec<_> = messages.iter().filter_map(|m| m.text.as_deref()).collect();
    assert_eq!(texts, vec!["1 from alice", "2 from bob", "3 from alice"]);
}

// ===========================================================================
// Session driver over the live server
// ===========================================================================

/// The session driver carries the whole flow: refresh the sidebar, open
/// the pending conversation, and watch the unseen count clear.
#[tokio::test]
async fn session_opens_pending_conversation() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("waiting"))
        .await
        .unwrap();

    let (api, _pushes) = WsApi::connect(&url, UserId::new("bob")).await.unwrap();
    let (session, mut events) = ChatSession::new(api, UserId::new("bob"), 16);

    session.refresh_peers().await.unwrap();
    match next_event(&mut events).await {
        ClientEvent::PeersUpdated { peers, unseen } => {
            assert!(peers.contains(&UserId::new("alice")));
            assert_eq!(unseen.get(&UserId::new("alice")), Some(&1));
        }
        other => panic!("expected PeersUpdated, got {other:?}"),
    }

    session.open_conversation(&UserId::new("alice")).await.unwrap();
    match next_event(&mut events).await {
        ClientEvent::ConversationLoaded { peer, messages } => {
            assert_eq!(peer, UserId::new("alice"));
            assert_eq!(messages.len(), 1);
        }
        other => panic!("expected ConversationLoaded, got {other:?}"),
    }

    session
        .with_state(|s| {
            assert_eq!(
                s.selection(),
                &Selection::Active {
                    peer: UserId::new("alice")
                }
            );
            assert_eq!(s.unseen_count(&UserId::new("alice")), 0);
        })
        .await;
}

/// Sending through the session appends locally and the recipient can pull
/// the stored copy.
#[tokio::test]
async fn session_send_reaches_the_store() {
    let (url, _handle) = start_test_server().await;

    let (api, _pushes) = WsApi::connect(&url, UserId::new("alice")).await.unwrap();
    let (session, mut events) = ChatSession::new(api, UserId::new("alice"), 16);

    session.open_conversation(&UserId::new("bob")).await.unwrap();
    let _ = next_event(&mut events).await; // ConversationLoaded (empty)

    let sent = session
        .send(&UserId::new("bob"), MessageBody::text("via session"))
        .await
        .unwrap();
    match next_event(&mut events).await {
        ClientEvent::MessageAppended { message } => assert_eq!(message.id, sent.id),
        other => panic!("expected MessageAppended, got {other:?}"),
    }

    let bob = connect(&url, "bob").await;
    let messages = bob.fetch_conversation(&UserId::new("alice")).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent.id);
}

/// An invalid body fails the send without disturbing the session.
#[tokio::test]
async fn session_survives_rejected_send() {
    let (url, _handle) = start_test_server().await;

    let (api, _pushes) = WsApi::connect(&url, UserId::new("alice")).await.unwrap();
    let (session, mut events) = ChatSession::new(api, UserId::new("alice"), 16);

    session.open_conversation(&UserId::new("bob")).await.unwrap();
    let _ = next_event(&mut events).await;

    let empty = MessageBody {
        text: None,
        media_ref: None,
    };
    let result = session.send(&UserId::new("bob"), empty).await;
    assert!(matches!(result, Err(ApiError::Server(_))));

    session
        .with_state(|s| assert!(s.messages().is_empty(), "nothing appended on failure"))
        .await;

    // The session keeps working.
    session.refresh_peers().await.unwrap();
}

// ===========================================================================
// Restoring the last-open conversation
// ===========================================================================

/// A remembered peer is restored only if the live listing still has it.
#[tokio::test]
async fn remembered_peer_restores_against_live_listing() {
    let (url, _handle) = start_test_server().await;

    let alice = connect(&url, "alice").await;
    alice
        .send_message(&UserId::new("bob"), MessageBody::text("hello"))
        .await
        .unwrap();

    let bob = connect(&url, "bob").await;
    let (peers, _) = bob.list_peers().await.unwrap();

    let mut prefs = Prefs::default();
    prefs.remember(UserId::new("alice"));
    assert_eq!(prefs.restore_selection(&peers), Some(UserId::new("alice")));

    prefs.remember(UserId::new("mallory"));
    assert_eq!(prefs.restore_selection(&peers), None);
}
