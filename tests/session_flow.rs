//! End-to-end session tests
//!
//! A real relay worker against the mock gateway, scripted speech engines,
//! and the controller loop in between. Exercises the state machine rules:
//! Processing on final transcript, Speaking on first delta, the mic
//! preference idle rule, and epoch discipline when a turn is stopped.

mod support;

use async_trait::async_trait;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use prattle::notify::{ChannelConfig, Connection, Connector, NotificationChannel};
use prattle::relay::{RelayConfig, RelayRunner};
use prattle::session::{SessionConfig, SessionController, SessionEvent, SessionHandle};
use prattle::speech::{SttEngine, SttEvent, TtsEngine, TtsEvent};
use prattle::{ConversationState, PrattleError, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{hello_frames, GatewayBehavior, MockGateway};

// === Scripted engines ===

/// STT engine driven from the outside through the event channel
struct ScriptedStt {
    listening: bool,
}

impl SttEngine for ScriptedStt {
    fn start(&mut self, _lang: &str) -> prattle::Result<()> {
        self.listening = true;
        Ok(())
    }
    fn stop(&mut self) {
        self.listening = false;
    }
    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn is_listening(&self) -> bool {
        self.listening
    }
}

/// TTS engine with instantaneous playback that records what it spoke
struct ScriptedTts {
    events: Sender<TtsEvent>,
    spoken: Arc<Mutex<Vec<String>>>,
}

impl TtsEngine for ScriptedTts {
    fn speak(&mut self, text: &str) {
        self.add_chunk(text);
    }
    fn add_chunk(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.spoken.lock().push(text.to_string());
        let _ = self.events.send(TtsEvent::Started);
        let _ = self.events.send(TtsEvent::Finished);
    }
    fn stop(&mut self) {}
    fn is_speaking(&self) -> bool {
        false
    }
}

struct Session {
    handle: SessionHandle,
    stt_tx: Sender<SttEvent>,
    spoken: Arc<Mutex<Vec<String>>>,
}

fn start_session(base_url: &str, notify: Option<NotificationChannel>) -> Session {
    let relay_config = RelayConfig::new(base_url)
        .with_instance("bridge-1")
        .with_connect_timeout(Duration::from_secs(2))
        .with_retry(
            RetryPolicy::new()
                .with_max_retries(1)
                .with_base_delay(Duration::from_millis(10)),
        );
    let relay = RelayRunner::new(relay_config).start_worker().unwrap();

    let (stt_tx, stt_rx) = bounded(100);
    let (tts_tx, tts_rx) = bounded(100);
    let spoken = Arc::new(Mutex::new(Vec::new()));

    let stt = Box::new(ScriptedStt { listening: false });
    let tts = Box::new(ScriptedTts {
        events: tts_tx,
        spoken: spoken.clone(),
    });

    let config = SessionConfig::new().with_language("en-US");
    let (controller, handle) =
        SessionController::new(config, stt, stt_rx, tts, tts_rx, relay, notify);
    controller.start();

    Session {
        handle,
        stt_tx,
        spoken,
    }
}

/// Poll for the next event matching `pred`, failing after `timeout`
fn wait_for(
    handle: &SessionHandle,
    timeout: Duration,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(event) = handle.try_recv_event() {
            if pred(&event) {
                return event;
            }
            continue;
        }
        assert!(Instant::now() < deadline, "timed out waiting for event");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Poll until the session reaches `state`
fn wait_for_state(handle: &SessionHandle, timeout: Duration, state: ConversationState) {
    let deadline = Instant::now() + timeout;
    while handle.state().conversation_state() != state {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for state {}, currently {}",
            state,
            handle.state().conversation_state()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_end_to_end_voice_turn() {
    let gateway = MockGateway::spawn(GatewayBehavior::Stream {
        frames: hello_frames(),
        frame_delay: Duration::from_millis(150),
    });
    let session = start_session(&gateway.base_url, None);

    session.handle.enable_mic().unwrap();
    wait_for_state(&session.handle, Duration::from_secs(1), ConversationState::Listening);

    // The user said "hello"
    session.stt_tx.send(SttEvent::Final("hello".into())).unwrap();

    wait_for(&session.handle, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::Transcript(t) if t == "hello")
    });
    // Frames are delayed, so the state is still Processing here
    assert_eq!(
        session.handle.state().conversation_state(),
        ConversationState::Processing
    );

    let first_delta = wait_for(&session.handle, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::Delta(_))
    });
    assert!(matches!(first_delta, SessionEvent::Delta(t) if t == "hi"));
    // First delta moved the session to Speaking
    assert_eq!(
        session.handle.state().conversation_state(),
        ConversationState::Speaking
    );

    let complete = wait_for(&session.handle, Duration::from_secs(3), |e| {
        matches!(e, SessionEvent::TurnComplete { .. })
    });
    match complete {
        SessionEvent::TurnComplete {
            response,
            interrupted,
        } => {
            assert_eq!(response, "hi there");
            assert!(!interrupted);
        }
        _ => unreachable!(),
    }

    // Mic preference is on: the session returns to Listening, never Idle
    wait_for_state(&session.handle, Duration::from_secs(1), ConversationState::Listening);
    assert!(!session.spoken.lock().is_empty());

    session.handle.shutdown().unwrap();
}

#[test]
fn test_typed_turn_lands_idle_when_mic_off() {
    let gateway = MockGateway::spawn(GatewayBehavior::Stream {
        frames: hello_frames(),
        frame_delay: Duration::ZERO,
    });
    let session = start_session(&gateway.base_url, None);

    session.handle.send_text("hello").unwrap();
    wait_for(&session.handle, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::TurnComplete { .. })
    });

    wait_for_state(&session.handle, Duration::from_secs(1), ConversationState::Idle);
    assert!(session.handle.state().interim_text().is_empty());

    session.handle.shutdown().unwrap();
}

#[test]
fn test_stop_from_speaking_with_mic_on_lands_listening() {
    // A long turn: plenty of deltas still pending when we stop
    let mut frames: Vec<String> = (0..20)
        .map(|i| format!("data: {{\"delta\":\"chunk {}. \"}}\n\n", i))
        .collect();
    frames.push("data: [DONE]\n\n".to_string());

    let gateway = MockGateway::spawn(GatewayBehavior::Stream {
        frames,
        frame_delay: Duration::from_millis(100),
    });
    let session = start_session(&gateway.base_url, None);

    session.handle.enable_mic().unwrap();
    session.stt_tx.send(SttEvent::Final("tell me everything".into())).unwrap();

    wait_for(&session.handle, Duration::from_secs(3), |e| {
        matches!(e, SessionEvent::Delta(_))
    });
    assert_eq!(
        session.handle.state().conversation_state(),
        ConversationState::Speaking
    );

    session.handle.stop().unwrap();
    wait_for_state(&session.handle, Duration::from_secs(1), ConversationState::Listening);

    // Drain whatever was queued before the stop took effect, then verify
    // the superseded turn stays silent.
    std::thread::sleep(Duration::from_millis(300));
    while session.handle.try_recv_event().is_some() {}

    std::thread::sleep(Duration::from_millis(400));
    let mut late_events = Vec::new();
    while let Some(event) = session.handle.try_recv_event() {
        late_events.push(event);
    }
    assert!(
        !late_events
            .iter()
            .any(|e| matches!(e, SessionEvent::Delta(_) | SessionEvent::TurnComplete { .. })),
        "superseded turn leaked events: {:?}",
        late_events
    );
    assert_eq!(
        session.handle.state().conversation_state(),
        ConversationState::Listening
    );

    session.handle.shutdown().unwrap();
}

#[test]
fn test_turn_error_falls_back_to_idle() {
    let gateway = MockGateway::spawn(GatewayBehavior::Fail {
        status: 500,
        body: "boom".to_string(),
    });
    let session = start_session(&gateway.base_url, None);

    session.handle.send_text("hello").unwrap();
    let error = wait_for(&session.handle, Duration::from_secs(3), |e| {
        matches!(e, SessionEvent::Error(_))
    });
    assert!(matches!(error, SessionEvent::Error(msg) if msg.contains("500")));

    // Never stuck in Processing/Speaking after a terminal error
    wait_for_state(&session.handle, Duration::from_secs(1), ConversationState::Idle);

    session.handle.shutdown().unwrap();
}

// === Notification flow ===

struct OneNotificationConnector;

struct OneNotificationConnection {
    frames: Vec<String>,
    // The channel re-polls reads on a short interval; the deadline must
    // survive a dropped read future, so it lives on the connection.
    ready_at: Option<Instant>,
}

#[async_trait]
impl Connection for OneNotificationConnection {
    async fn send_text(&mut self, _text: String) -> prattle::Result<()> {
        Ok(())
    }
    async fn recv_text(&mut self) -> Option<prattle::Result<String>> {
        let ready_at = *self
            .ready_at
            .get_or_insert_with(|| Instant::now() + Duration::from_millis(300));
        let now = Instant::now();
        if now < ready_at {
            tokio::time::sleep(ready_at - now).await;
        }
        if let Some(frame) = self.frames.pop() {
            return Some(Ok(frame));
        }
        std::future::pending::<()>().await;
        None
    }
}

#[async_trait]
impl Connector for OneNotificationConnector {
    async fn connect(&self, _url: &str) -> prattle::Result<Box<dyn Connection>> {
        Ok(Box::new(OneNotificationConnection {
            frames: vec![
                "{\"type\":\"notification\",\"title\":\"reminder\",\"body\":\"standup in 5\"}"
                    .to_string(),
            ],
            ready_at: None,
        }))
    }
}

#[test]
fn test_notification_reaches_session_and_subscribers() {
    let gateway = MockGateway::spawn(GatewayBehavior::Stream {
        frames: hello_frames(),
        frame_delay: Duration::ZERO,
    });
    let channel = NotificationChannel::start_with_connector(
        ChannelConfig::new("ws://mock/ws", "bridge-1"),
        OneNotificationConnector,
    );
    let session = start_session(&gateway.base_url, Some(channel));

    let (_id, notifications) = session.handle.subscribe_notifications();

    let event = wait_for(&session.handle, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::Notification(_))
    });
    match event {
        SessionEvent::Notification(n) => {
            assert_eq!(n.title, "reminder");
            assert_eq!(n.body, "standup in 5");
        }
        _ => unreachable!(),
    }

    let delivered = notifications
        .recv_timeout(Duration::from_secs(1))
        .expect("subscriber copy");
    assert_eq!(delivered.title, "reminder");

    session.handle.shutdown().unwrap();
    let shutdown = wait_for(&session.handle, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::Shutdown)
    });
    assert!(matches!(shutdown, SessionEvent::Shutdown));
}

#[test]
fn test_error_is_recoverable_classification() {
    // Session-facing errors should be the recoverable kind
    let err = PrattleError::ServerError {
        status: 500,
        body: "boom".into(),
    };
    assert!(err.is_recoverable());
}
