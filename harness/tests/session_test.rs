mod common;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use common::{unused_ws_url, Behavior, MockServer};
use harness::error::{ProtocolErrorKind, TransportErrorKind};
use harness::{listen, ErrorKind, Operation, Principal, Session, SessionTarget, Termination, WsProtocol};
use secrecy::SecretString;
use serde_json::json;
use tokio::time::Instant;

fn principal(id: &str) -> Principal {
    Principal::new(id.to_string(), SecretString::new(format!("token-{id}")))
}

fn template() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Country".to_string(), "fr".to_string()),
        ("User-Agent".to_string(), "SOS.ApiRequestTask/1.0".to_string()),
    ])
}

fn target(server: &MockServer) -> SessionTarget {
    SessionTarget::new(server.url.clone(), template(), WsProtocol::GraphqlWs).with_introspection(false)
}

fn message_read() -> Operation {
    Operation::parse("subscription { messageRead { message { id } reader { apiId } } }").unwrap()
}

fn event(id: &str) -> serde_json::Value {
    json!({ "messageRead": { "message": { "id": id }, "reader": { "apiId": "user-2" } } })
}

#[tokio::test]
async fn test_init_payload_and_upgrade_carry_authorization() {
    let server = MockServer::start(Behavior::silent()).await;

    let mut session = Session::open(&target(&server), &principal("user-1"), "listener")
        .await
        .unwrap();
    session.close().await.unwrap();

    let init = &server.init_payloads()[0];
    assert_eq!(init["Authorization"], "Bearer token-user-1");
    assert_eq!(init["Country"], "fr");
    assert_eq!(init["User-Agent"], "SOS.ApiRequestTask/1.0");

    let upgrade = &server.upgrade_headers()[0];
    assert_eq!(upgrade.get("authorization").map(String::as_str), Some("Bearer token-user-1"));
    assert_eq!(upgrade.get("sec-websocket-protocol").map(String::as_str), Some("graphql-ws"));
}

#[tokio::test]
async fn test_close_twice_does_not_affect_other_sessions() {
    let server = MockServer::start(Behavior::silent()).await;
    let target = target(&server);

    let mut first = Session::open(&target, &principal("user-1"), "first").await.unwrap();
    let mut second = Session::open(&target, &principal("user-2"), "second").await.unwrap();

    first.close().await.unwrap();
    first.close().await.unwrap();
    assert!(first.is_closed());

    let outcome = second
        .execute(&Operation::parse("mutation { lastSeen { success } }").unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.event_name(), Some("lastSeen"));
    assert!(!second.is_closed());

    second.close().await.unwrap();
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_execute_on_closed_session_fails() {
    let server = MockServer::start(Behavior::silent()).await;
    let mut session = Session::open(&target(&server), &principal("user-1"), "closed").await.unwrap();
    session.close().await.unwrap();

    let err = session
        .execute(&Operation::parse("query { userMeta { unreadCount } }").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.error_kind, ErrorKind::Transport(TransportErrorKind::Closed));
}

#[tokio::test]
async fn test_listener_stops_at_target_count() {
    let server = MockServer::start(Behavior::silent()).await;
    let mut session = Session::open(&target(&server), &principal("user-1"), "listener").await.unwrap();
    let operation = message_read();

    let (outcome, ()) = tokio::join!(
        listen(&mut session, &operation, NonZeroUsize::new(2).unwrap()),
        async {
            server.wait_for_subscribers(1).await;
            for n in 0..5 {
                server.publish(event(&format!("m{n}")));
            }
        }
    );
    let outcome = outcome.unwrap();

    assert_eq!(outcome.termination, Termination::TargetReached);
    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.events[0].name, "messageRead");
    assert_eq!(outcome.events[0].body()["message"]["id"], "m0");
    assert_eq!(outcome.events[1].body()["message"]["id"], "m1");
    assert!(outcome.events[0].elapsed_ms <= outcome.events[1].elapsed_ms);
    assert_eq!(outcome.elapsed_ms, Some(outcome.events[1].elapsed_ms));

    server.wait_for_stops(1).await;
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_listener_returns_what_arrived_when_stream_completes() {
    let server = MockServer::start(Behavior {
        complete_after: Some(1),
        ..Behavior::silent()
    })
    .await;
    let mut session = Session::open(&target(&server), &principal("user-1"), "listener").await.unwrap();
    let operation = message_read();

    let (outcome, ()) = tokio::join!(
        listen(&mut session, &operation, NonZeroUsize::new(3).unwrap()),
        async {
            server.wait_for_subscribers(1).await;
            server.publish(event("m0"));
        }
    );
    let outcome = outcome.unwrap();

    assert_eq!(outcome.termination, Termination::StreamEnded);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.first().unwrap().body()["message"]["id"], "m0");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_transport_ws_protocol_round_trip() {
    let server = MockServer::start(Behavior::publishing(event("m9"))).await;
    let target = SessionTarget::new(server.url.clone(), template(), WsProtocol::GraphqlTransportWs)
        .with_introspection(false);

    let mut listener = Session::open(&target, &principal("user-1"), "listener").await.unwrap();
    let mut trigger = Session::open(&target, &principal("user-2"), "trigger").await.unwrap();
    let operation = message_read();
    let mark_as_read = Operation::parse("mutation { markAsRead { message { id } } }").unwrap();

    let (outcome, triggered) = tokio::join!(
        listen(&mut listener, &operation, NonZeroUsize::MIN),
        async {
            server.wait_for_subscribers(1).await;
            trigger.execute(&mark_as_read).await
        }
    );

    assert_eq!(triggered.unwrap().event_name(), Some("markAsRead"));
    assert_eq!(outcome.unwrap().events[0].body()["message"]["id"], "m9");
    assert_eq!(
        server.upgrade_headers()[0].get("sec-websocket-protocol").map(String::as_str),
        Some("graphql-transport-ws")
    );

    listener.close().await.unwrap();
    trigger.close().await.unwrap();
}

#[tokio::test]
async fn test_introspection_rejects_unknown_root_fields() {
    let server = MockServer::start(Behavior::silent()).await;
    let target = target(&server).with_introspection(true);
    let mut session = Session::open(&target, &principal("user-1"), "introspected").await.unwrap();

    let known = Operation::parse("mutation { lastSeen { success } }").unwrap();
    session.execute(&known).await.unwrap();

    let unknown = Operation::parse("mutation { deleteEverything { success } }").unwrap();
    let err = session.execute(&unknown).await.unwrap_err();
    assert_eq!(err.error_kind, ErrorKind::Validation);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_init_is_not_transient() {
    let server = MockServer::start(Behavior {
        reject_init: true,
        ..Behavior::silent()
    })
    .await;

    let err = Session::open(&target(&server), &principal("user-1"), "rejected")
        .await
        .err()
        .unwrap();
    assert_eq!(err.error_kind, ErrorKind::Protocol(ProtocolErrorKind::ConnectionRejected));
    assert!(err.to_string().contains("Unauthorized"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let target = SessionTarget::new(unused_ws_url().await, template(), WsProtocol::GraphqlWs);

    let err = Session::open(&target, &principal("user-1"), "nowhere").await.err().unwrap();
    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unanswered_introspection_fails_as_transport_error() {
    let server = MockServer::start(Behavior {
        ignore_operations: true,
        ..Behavior::silent()
    })
    .await;
    let target = target(&server)
        .with_introspection(true)
        .with_handshake_timeout(Duration::from_millis(200));

    let start = Instant::now();
    let err = Session::open(&target, &principal("user-1"), "introspected")
        .await
        .err()
        .unwrap();

    assert_eq!(err.error_kind, ErrorKind::Transport(TransportErrorKind::Connect));
    assert!(err.to_string().contains("no introspection result"), "unexpected error: {err}");
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(server.init_payloads().len(), 1);
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_rejected_upgrade_is_not_transient() {
    let server = MockServer::start(Behavior {
        reject_upgrade: Some(401),
        ..Behavior::silent()
    })
    .await;

    let err = Session::open(&target(&server), &principal("user-1"), "rejected")
        .await
        .err()
        .unwrap();
    assert_eq!(err.error_kind, ErrorKind::Protocol(ProtocolErrorKind::ConnectionRejected));
    assert!(!err.is_transient());
    assert!(server.init_payloads().is_empty());
}

#[tokio::test]
async fn test_non_websocket_endpoint_is_not_transient() {
    let target = SessionTarget::new("http://127.0.0.1/graphql-ws", template(), WsProtocol::GraphqlWs);

    let err = Session::open(&target, &principal("user-1"), "misconfigured").await.err().unwrap();
    assert_eq!(err.error_kind, ErrorKind::Protocol(ProtocolErrorKind::InvalidEndpoint));
}

#[tokio::test]
async fn test_listener_keeps_events_when_server_hangs_up_after_the_last_one() {
    let server = MockServer::start(Behavior {
        hang_up_after: Some(1),
        ..Behavior::silent()
    })
    .await;
    let mut session = Session::open(&target(&server), &principal("user-1"), "listener").await.unwrap();
    let operation = message_read();

    let (outcome, ()) = tokio::join!(
        listen(&mut session, &operation, NonZeroUsize::MIN),
        async {
            server.wait_for_subscribers(1).await;
            server.publish(event("m0"));
        }
    );
    let outcome = outcome.unwrap();

    assert_eq!(outcome.termination, Termination::TargetReached);
    assert_eq!(outcome.first().unwrap().body()["message"]["id"], "m0");
    let _ = session.close().await;
    server.wait_until_idle().await;
}
