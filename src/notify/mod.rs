//! Push notification channel
//!
//! A long-lived WebSocket to the gateway. On open it registers with the
//! active instance id and heartbeats on a fixed interval; on any close it
//! reconnects after a capped exponential backoff. Destruction is terminal:
//! no timer survives it and no further connection attempt is made.
//!
//! The socket itself sits behind the [`Connector`] trait so the reconnect
//! lifecycle can be exercised without a network.

use crate::policy::{Backoff, RetryPolicy};
use crate::{PrattleError, Result};
use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// Configuration for the notification channel
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// WebSocket endpoint
    pub url: String,
    /// Instance id sent in the registration frame
    pub instance_id: String,
    /// Heartbeat interval (independent of the reconnect backoff)
    pub heartbeat_interval: Duration,
    /// Reconnect backoff policy
    pub retry: RetryPolicy,
}

impl ChannelConfig {
    /// Create a configuration for the given endpoint and instance
    pub fn new(url: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            instance_id: instance_id.into(),
            heartbeat_interval: Duration::from_secs(60),
            retry: RetryPolicy::reconnect(),
        }
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the reconnect backoff policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A proactive notification pushed by the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Short headline
    #[serde(default)]
    pub title: String,
    /// Notification text
    #[serde(default)]
    pub body: String,
    /// Optional action hint for the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Events emitted by the notification channel
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    /// The connection opened and the registration frame was sent
    Connected,
    /// The connection dropped; a reconnect is scheduled unless destroyed
    Disconnected,
    /// A notification frame arrived
    Notification(NotificationEvent),
    /// The channel was destroyed and the worker exited
    Shutdown,
}

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Attempting to connect (or waiting out a backoff delay)
    Connecting,
    /// Registered and heartbeating
    Open,
    /// Destroyed; terminal
    Closed,
}

/// One established duplex connection
#[async_trait]
pub trait Connection: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Receive the next text frame; `None` means the peer closed
    async fn recv_text(&mut self) -> Option<Result<String>>;
}

/// Opens connections for the channel; swapped out in tests
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

/// WebSocket connector backed by tokio-tungstenite
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| PrattleError::ConnectError(e.to_string()))?;
        Ok(Box::new(WsConnection { socket }))
    }
}

struct WsConnection {
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.socket
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| PrattleError::ConnectError(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(Ok(text)),
                Some(Ok(WsMessage::Close(_))) => return None,
                // Ping/pong and binary frames are transport noise here
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(PrattleError::ConnectError(e.to_string()))),
                None => return None,
            }
        }
    }
}

/// Handle to a running notification channel
///
/// The worker owns the reconnect loop; the handle only observes events and
/// can destroy the channel. `destroy()` is idempotent and safe to call from
/// any state.
pub struct NotificationChannel {
    event_rx: Receiver<ChannelEvent>,
    destroyed: Arc<AtomicBool>,
    state: Arc<RwLock<ChannelState>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl NotificationChannel {
    /// Start the channel over a real WebSocket
    pub fn start(config: ChannelConfig) -> Self {
        Self::start_with_connector(config, WsConnector)
    }

    /// Start the channel over a custom connector
    pub fn start_with_connector<C: Connector>(config: ChannelConfig, connector: C) -> Self {
        let (event_tx, event_rx) = bounded::<ChannelEvent>(100);
        let destroyed = Arc::new(AtomicBool::new(false));
        let state = Arc::new(RwLock::new(ChannelState::Connecting));

        let worker_destroyed = destroyed.clone();
        let worker_state = state.clone();

        let worker_handle = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime: {}", e);
                    let _ = event_tx.send(ChannelEvent::Shutdown);
                    return;
                }
            };

            runtime.block_on(async move {
                worker_loop(config, connector, worker_destroyed, worker_state, event_tx).await;
            });
        });

        Self {
            event_rx,
            destroyed,
            state,
            worker_handle: Some(worker_handle),
        }
    }

    /// Destroy the channel; idempotent, no reconnect will follow
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            info!("Notification channel destroyed");
        }
    }

    /// Whether `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Current connection state
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Get a receiver for channel events
    pub fn event_receiver(&self) -> Receiver<ChannelEvent> {
        self.event_rx.clone()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ChannelEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> Result<ChannelEvent> {
        self.event_rx
            .recv()
            .map_err(|e| PrattleError::ChannelError(format!("Failed to receive event: {}", e)))
    }

    /// Destroy the channel and wait for the worker to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.destroy();
        if let Some(handle) = self.worker_handle.take() {
            handle
                .join()
                .map_err(|_| PrattleError::ChannelError("Channel worker panicked".to_string()))?;
        }
        Ok(())
    }
}

/// Sleep that wakes early once `destroyed` flips
async fn sleep_unless_destroyed(delay: Duration, destroyed: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + delay;
    while tokio::time::Instant::now() < deadline {
        if destroyed.load(Ordering::SeqCst) {
            return;
        }
        let remaining = deadline - tokio::time::Instant::now();
        tokio::time::sleep(remaining.min(Duration::from_millis(50))).await;
    }
}

/// Reconnect loop: connect, register, pump frames, back off, repeat
async fn worker_loop(
    config: ChannelConfig,
    connector: impl Connector,
    destroyed: Arc<AtomicBool>,
    state: Arc<RwLock<ChannelState>>,
    event_tx: Sender<ChannelEvent>,
) {
    let mut backoff = Backoff::new(config.retry.clone());

    loop {
        if destroyed.load(Ordering::SeqCst) {
            break;
        }
        *state.write() = ChannelState::Connecting;
        debug!("Notification channel connecting to {}", config.url);

        match connector.connect(&config.url).await {
            Ok(mut conn) => {
                if destroyed.load(Ordering::SeqCst) {
                    break;
                }

                let registration =
                    serde_json::json!({ "instanceId": config.instance_id }).to_string();
                if conn.send_text(registration).await.is_ok() {
                    info!("Notification channel open");
                    *state.write() = ChannelState::Open;
                    backoff.reset();
                    let _ = event_tx.send(ChannelEvent::Connected);

                    pump_frames(&config, conn.as_mut(), &destroyed, &event_tx).await;
                }

                debug!("Notification channel closed");
                let _ = event_tx.send(ChannelEvent::Disconnected);
            }
            Err(e) => {
                debug!("Notification channel connect failed: {}", e);
            }
        }

        if destroyed.load(Ordering::SeqCst) {
            break;
        }
        let delay = backoff.next_delay();
        debug!("Notification channel reconnecting in {:?}", delay);
        sleep_unless_destroyed(delay, &destroyed).await;
    }

    *state.write() = ChannelState::Closed;
    let _ = event_tx.send(ChannelEvent::Shutdown);
    debug!("Notification channel worker exited");
}

/// Read frames and heartbeat until the connection drops or destroy
async fn pump_frames(
    config: &ChannelConfig,
    conn: &mut dyn Connection,
    destroyed: &AtomicBool,
    event_tx: &Sender<ChannelEvent>,
) {
    let mut next_ping = tokio::time::Instant::now() + config.heartbeat_interval;

    loop {
        if destroyed.load(Ordering::SeqCst) {
            return;
        }

        let now = tokio::time::Instant::now();
        if now >= next_ping {
            if conn
                .send_text("{\"type\":\"ping\"}".to_string())
                .await
                .is_err()
            {
                return;
            }
            next_ping = now + config.heartbeat_interval;
            continue;
        }

        // Bounded wait so heartbeats and the destroy flag stay responsive
        let wait = (next_ping - now).min(Duration::from_millis(100));
        match tokio::time::timeout(wait, conn.recv_text()).await {
            Ok(Some(Ok(text))) => dispatch_frame(&text, event_tx),
            Ok(Some(Err(e))) => {
                warn!("Notification channel read error: {}", e);
                return;
            }
            Ok(None) => return,
            Err(_) => continue,
        }
    }
}

/// Parse one frame; only `notification` frames are dispatched
fn dispatch_frame(text: &str, event_tx: &Sender<ChannelEvent>) {
    let frame: serde_json::Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Notification frame parse failed: {}", e);
            return;
        }
    };

    if frame.get("type").and_then(|v| v.as_str()) == Some("notification") {
        match serde_json::from_value::<NotificationEvent>(frame) {
            Ok(notification) => {
                debug!("Notification received: {}", notification.title);
                let _ = event_tx.send(ChannelEvent::Notification(notification));
            }
            Err(e) => warn!("Notification frame malformed: {}", e),
        }
    }
    // Pong acknowledgements and unknown frame types are ignored
}
