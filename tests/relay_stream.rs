//! Integration tests for the streaming relay client
//!
//! These drive a real relay worker against a mock gateway and verify the
//! stream decode path, the retry policy and the stale-route recovery.

mod support;

use prattle::relay::{RelayConfig, RelayEvent, RelayHandle, RelayRunner};
use prattle::{Message, PrattleError, RetryPolicy};
use std::time::Duration;
use support::{hello_frames, GatewayBehavior, MockGateway};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn start_relay(base_url: &str, instance: &str) -> RelayHandle {
    let config = RelayConfig::new(base_url)
        .with_instance(instance)
        .with_connect_timeout(Duration::from_secs(2))
        .with_retry(
            RetryPolicy::new()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(10)),
        );
    RelayRunner::new(config).start_worker().unwrap()
}

/// Receive events until the turn's terminal event, returning everything seen
fn collect_turn(handle: &RelayHandle) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    loop {
        let event = handle
            .event_rx
            .recv_timeout(EVENT_TIMEOUT)
            .expect("relay event");
        let terminal = matches!(event, RelayEvent::Done { .. } | RelayEvent::Error { .. });
        events.push(event);
        if terminal {
            return events;
        }
    }
}

#[test]
fn test_stream_turn_delivers_deltas_then_done() {
    let gateway = MockGateway::spawn(GatewayBehavior::Stream {
        frames: hello_frames(),
        frame_delay: Duration::ZERO,
    });
    let relay = start_relay(&gateway.base_url, "bridge-1");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    let events = collect_turn(&relay);

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            RelayEvent::Delta { text, epoch } => {
                assert_eq!(*epoch, 1);
                Some(text.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["hi", " there"]);

    match events.last().unwrap() {
        RelayEvent::Done {
            epoch,
            response,
            interrupted,
        } => {
            assert_eq!(*epoch, 1);
            assert_eq!(response, "hi there");
            assert!(!interrupted);
        }
        other => panic!("expected Done, got {:?}", other),
    }

    relay.shutdown().unwrap();
}

#[test]
fn test_stale_route_recovers_with_one_retransmission() {
    let gateway = MockGateway::spawn(GatewayBehavior::StaleRoute {
        fresh_id: "fresh".to_string(),
        frames: hello_frames(),
    });
    let relay = start_relay(&gateway.base_url, "stale");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    let events = collect_turn(&relay);

    assert!(events
        .iter()
        .any(|e| matches!(e, RelayEvent::InstanceChanged { id } if id == "fresh")));
    assert!(matches!(
        events.last().unwrap(),
        RelayEvent::Done { response, .. } if response == "hi there"
    ));

    // One original request plus exactly one retransmission
    assert_eq!(gateway.chat_hits(), 2);
    assert_eq!(gateway.instance_hits(), 1);

    relay.shutdown().unwrap();
}

#[test]
fn test_recovered_instance_is_reused_on_next_turn() {
    let gateway = MockGateway::spawn(GatewayBehavior::StaleRoute {
        fresh_id: "fresh".to_string(),
        frames: hello_frames(),
    });
    let relay = start_relay(&gateway.base_url, "stale");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    collect_turn(&relay);

    // Second turn goes straight through with the adopted instance
    relay
        .stream_turn(vec![Message::user("again")], 2, None)
        .unwrap();
    let events = collect_turn(&relay);
    assert!(matches!(events.last().unwrap(), RelayEvent::Done { .. }));

    assert_eq!(gateway.chat_hits(), 3);
    assert_eq!(gateway.instance_hits(), 1);

    relay.shutdown().unwrap();
}

#[test]
fn test_second_routing_failure_is_not_recovered_again() {
    let gateway = MockGateway::spawn(GatewayBehavior::AlwaysStale {
        advertised: "also-stale".to_string(),
    });
    let relay = start_relay(&gateway.base_url, "stale");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    let events = collect_turn(&relay);

    match events.last().unwrap() {
        RelayEvent::Error { error, .. } => match error {
            PrattleError::ServerError { status, body } => {
                assert_eq!(*status, 404);
                assert!(body.contains("Instance not found"));
            }
            other => panic!("expected ServerError, got {:?}", other),
        },
        other => panic!("expected Error, got {:?}", other),
    }

    // Recovery depth is capped at one: original + single retransmission
    assert_eq!(gateway.chat_hits(), 2);
    assert_eq!(gateway.instance_hits(), 1);

    relay.shutdown().unwrap();
}

#[test]
fn test_server_error_surfaces_status_and_body() {
    let gateway = MockGateway::spawn(GatewayBehavior::Fail {
        status: 500,
        body: "boom".to_string(),
    });
    let relay = start_relay(&gateway.base_url, "bridge-1");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    let events = collect_turn(&relay);

    match events.last().unwrap() {
        RelayEvent::Error { error, .. } => match error {
            PrattleError::ServerError { status, body } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected ServerError, got {:?}", other),
        },
        other => panic!("expected Error, got {:?}", other),
    }

    // Server errors are not retried
    assert_eq!(gateway.chat_hits(), 1);

    relay.shutdown().unwrap();
}

#[test]
fn test_frameless_body_is_a_protocol_error() {
    let gateway = MockGateway::spawn(GatewayBehavior::Garbage(
        "<html>definitely not a stream</html>".to_string(),
    ));
    let relay = start_relay(&gateway.base_url, "bridge-1");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    let events = collect_turn(&relay);

    assert!(matches!(
        events.last().unwrap(),
        RelayEvent::Error {
            error: PrattleError::ProtocolError(_),
            ..
        }
    ));

    relay.shutdown().unwrap();
}

#[test]
fn test_connect_failure_after_bounded_retries() {
    // Nothing listens on this port
    let relay = start_relay("http://127.0.0.1:9", "bridge-1");

    relay
        .stream_turn(vec![Message::user("hello")], 1, None)
        .unwrap();
    let events = collect_turn(&relay);

    assert!(matches!(
        events.last().unwrap(),
        RelayEvent::Error {
            error: PrattleError::ConnectError(_),
            ..
        }
    ));

    relay.shutdown().unwrap();
}
