//! Streaming chat relay client
//!
//! Sends one chat turn to the gateway and forwards the decoded stream as
//! events. Connection failures retry with exponential backoff; a stale
//! instance route is recovered once through the instance directory before
//! the turn fails. Every turn ends in exactly one terminal event.

use crate::messages::ChatTurn;
use crate::policy::RetryPolicy;
use crate::relay::instances;
use crate::relay::sse::{event_stream, StreamEvent};
use crate::relay::transport::Transport;
use crate::{PrattleError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use futures::StreamExt;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Streaming chat endpoint path
const CHAT_PATH: &str = "/v1/chat/completions";

/// Body marker the gateway sends when the routed instance is gone
const STALE_ROUTE_MARKER: &str = "Instance not found";

/// Configuration for the relay worker
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Gateway base URL
    pub base_url: String,
    /// Bearer token, if the gateway requires one
    pub token: Option<String>,
    /// Cached routing instance; `None` lets the gateway pick
    pub instance_id: Option<String>,
    /// Model name sent with each turn
    pub model: String,
    /// Client tag sent as the `user` field
    pub client_tag: String,
    /// Connect-phase timeout; the open stream itself is never timed out
    pub connect_timeout: Duration,
    /// Connect retry policy
    pub retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:18789".to_string(),
            token: None,
            instance_id: None,
            model: "openclaw".to_string(),
            client_tag: "prattle".to_string(),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Create a configuration for the given gateway
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Build from persisted settings
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            base_url: settings.gateway_url.clone(),
            token: settings.token(),
            instance_id: settings.instance(),
            ..Default::default()
        }
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the initial routing instance
    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the connect-phase timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the connect retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Commands sent to the relay worker
#[derive(Clone, Debug)]
pub enum RelayCommand {
    /// Stream one chat turn
    StreamTurn {
        /// Messages for this request
        turn: ChatTurn,
        /// Turn epoch; echoed on every event so stale turns can be discarded
        epoch: u64,
        /// Server-side conversation record to append to
        conversation_id: Option<String>,
    },
    /// Interrupt the in-flight turn
    Stop,
    /// Shutdown the relay worker
    Shutdown,
}

/// Events emitted by the relay worker
#[derive(Clone, Debug)]
pub enum RelayEvent {
    /// The turn was accepted and the request is being issued
    Started {
        /// Epoch of the turn
        epoch: u64,
    },
    /// Incremental response text
    Delta {
        /// Epoch of the turn
        epoch: u64,
        /// Response fragment
        text: String,
    },
    /// The turn finished; exactly one of Done/Error fires per turn
    Done {
        /// Epoch of the turn
        epoch: u64,
        /// Full accumulated response
        response: String,
        /// Whether the turn was interrupted before completion
        interrupted: bool,
    },
    /// The turn failed; exactly one of Done/Error fires per turn
    Error {
        /// Epoch of the turn
        epoch: u64,
        /// What went wrong
        error: PrattleError,
    },
    /// Route recovery adopted a new instance
    InstanceChanged {
        /// The new routing instance
        id: String,
    },
    /// Worker shut down
    Shutdown,
}

/// Handle for interacting with a running relay worker
pub struct RelayHandle {
    /// Send commands to the worker
    pub command_tx: Sender<RelayCommand>,
    /// Receive events from the worker
    pub event_rx: Receiver<RelayEvent>,
    worker_handle: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Stream a chat turn
    pub fn stream_turn(
        &self,
        turn: ChatTurn,
        epoch: u64,
        conversation_id: Option<String>,
    ) -> Result<()> {
        self.command_tx
            .send(RelayCommand::StreamTurn {
                turn,
                epoch,
                conversation_id,
            })
            .map_err(|e| PrattleError::ChannelError(format!("Failed to send turn: {}", e)))
    }

    /// Interrupt the in-flight turn
    pub fn stop(&self) -> Result<()> {
        self.command_tx
            .send(RelayCommand::Stop)
            .map_err(|e| PrattleError::ChannelError(format!("Failed to send stop: {}", e)))
    }

    /// Shutdown the worker
    pub fn shutdown(self) -> Result<()> {
        let _ = self.command_tx.send(RelayCommand::Shutdown);
        if let Some(handle) = self.worker_handle {
            handle
                .join()
                .map_err(|_| PrattleError::ChannelError("Relay worker panicked".to_string()))?;
        }
        Ok(())
    }

    /// Try to receive an event without blocking
    pub fn try_recv_event(&self) -> Option<RelayEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event, blocking until available
    pub fn recv_event(&self) -> Result<RelayEvent> {
        self.event_rx
            .recv()
            .map_err(|e| PrattleError::ChannelError(format!("Failed to receive event: {}", e)))
    }
}

/// Relay runner that spawns a worker thread for gateway streaming
pub struct RelayRunner {
    config: RelayConfig,
}

impl RelayRunner {
    /// Create a new relay runner with the specified configuration
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Start the relay worker thread
    ///
    /// Returns a handle for sending commands and receiving events. The
    /// worker runs in a separate thread with its own tokio runtime.
    pub fn start_worker(self) -> Result<RelayHandle> {
        let (command_tx, command_rx) = bounded::<RelayCommand>(100);
        let (event_tx, event_rx) = bounded::<RelayEvent>(100);

        let config = self.config;

        let worker_handle = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime: {}", e);
                    let _ = event_tx.send(RelayEvent::Error {
                        epoch: 0,
                        error: PrattleError::ChannelError(format!(
                            "Failed to create runtime: {}",
                            e
                        )),
                    });
                    let _ = event_tx.send(RelayEvent::Shutdown);
                    return;
                }
            };

            runtime.block_on(async move {
                worker_loop(config, command_rx, event_tx).await;
            });
        });

        Ok(RelayHandle {
            command_tx,
            event_rx,
            worker_handle: Some(worker_handle),
        })
    }
}

/// What a finished turn tells the worker loop to do next
enum TurnOutcome {
    /// Terminal event emitted; wait for the next command
    Finished,
    /// A new turn arrived mid-stream; process it immediately
    Superseded(RelayCommand),
    /// Shutdown requested
    Shutdown,
}

/// Main worker loop that handles commands and streams turns
async fn worker_loop(
    config: RelayConfig,
    command_rx: Receiver<RelayCommand>,
    event_tx: Sender<RelayEvent>,
) {
    info!("Relay worker starting for {}", config.base_url);

    let transport = match Transport::new(&config.base_url, config.token.clone(), config.connect_timeout)
    {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to build transport: {}", e);
            let _ = event_tx.send(RelayEvent::Error { epoch: 0, error: e });
            let _ = event_tx.send(RelayEvent::Shutdown);
            return;
        }
    };

    // Routing instance; only the recovery path below ever rewrites this.
    let mut instance = config.instance_id.clone();
    let mut pending: Option<RelayCommand> = None;

    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => match command_rx.recv() {
                Ok(command) => command,
                Err(_) => {
                    info!("Command channel closed, shutting down");
                    break;
                }
            },
        };

        match command {
            RelayCommand::StreamTurn {
                turn,
                epoch,
                conversation_id,
            } => {
                debug!("Streaming turn (epoch {})", epoch);
                if event_tx.send(RelayEvent::Started { epoch }).is_err() {
                    break;
                }

                let result = run_turn(
                    &config,
                    &transport,
                    &mut instance,
                    &turn,
                    conversation_id.as_deref(),
                    epoch,
                    &command_rx,
                    &event_tx,
                )
                .await;

                match result {
                    Ok(TurnOutcome::Finished) => {}
                    Ok(TurnOutcome::Superseded(command)) => {
                        debug!("Turn superseded (epoch {})", epoch);
                        pending = Some(command);
                    }
                    Ok(TurnOutcome::Shutdown) => break,
                    Err(e) => {
                        warn!("Turn failed (epoch {}): {}", epoch, e);
                        if event_tx.send(RelayEvent::Error { epoch, error: e }).is_err() {
                            break;
                        }
                    }
                }
            }

            RelayCommand::Stop => {
                debug!("Stop with no turn in flight");
            }

            RelayCommand::Shutdown => {
                info!("Received shutdown command");
                break;
            }
        }
    }

    let _ = event_tx.send(RelayEvent::Shutdown);
    info!("Relay worker shutdown complete");
}

/// Stream one turn: connect, recover, decode, forward
#[allow(clippy::too_many_arguments)]
async fn run_turn(
    config: &RelayConfig,
    transport: &Transport,
    instance: &mut Option<String>,
    turn: &ChatTurn,
    conversation_id: Option<&str>,
    epoch: u64,
    command_rx: &Receiver<RelayCommand>,
    event_tx: &Sender<RelayEvent>,
) -> Result<TurnOutcome> {
    let response =
        send_with_recovery(config, transport, instance, turn, conversation_id, event_tx).await?;

    // Decode in a separate task so this loop can watch for interruption.
    let (frame_tx, mut frame_rx) = tokio::sync::mpsc::channel::<Result<StreamEvent>>(100);
    let stream_handle = tokio::spawn(async move {
        let mut events = Box::pin(event_stream(response));
        while let Some(item) = events.next().await {
            if frame_tx.send(item).await.is_err() {
                break;
            }
        }
    });

    let mut full_response = String::new();

    let outcome = loop {
        // Check for interruption (non-blocking)
        if let Ok(command) = command_rx.try_recv() {
            match command {
                RelayCommand::Stop => {
                    warn!("Turn interrupted by stop command (epoch {})", epoch);
                    let _ = event_tx.send(RelayEvent::Done {
                        epoch,
                        response: full_response.clone(),
                        interrupted: true,
                    });
                    break TurnOutcome::Finished;
                }
                RelayCommand::Shutdown => {
                    warn!("Turn interrupted by shutdown (epoch {})", epoch);
                    break TurnOutcome::Shutdown;
                }
                superseding @ RelayCommand::StreamTurn { .. } => {
                    let _ = event_tx.send(RelayEvent::Done {
                        epoch,
                        response: full_response.clone(),
                        interrupted: true,
                    });
                    break TurnOutcome::Superseded(superseding);
                }
            }
        }

        // Wait briefly for the next frame, then re-check for commands
        match tokio::time::timeout(Duration::from_millis(10), frame_rx.recv()).await {
            Ok(Some(Ok(StreamEvent::Delta(text)))) => {
                full_response.push_str(&text);
                if event_tx.send(RelayEvent::Delta { epoch, text }).is_err() {
                    break TurnOutcome::Shutdown;
                }
            }
            Ok(Some(Ok(StreamEvent::Done))) => {
                let _ = event_tx.send(RelayEvent::Done {
                    epoch,
                    response: full_response.clone(),
                    interrupted: false,
                });
                break TurnOutcome::Finished;
            }
            Ok(Some(Ok(StreamEvent::Error(message)))) => {
                let _ = event_tx.send(RelayEvent::Error {
                    epoch,
                    error: PrattleError::GatewayError(message),
                });
                break TurnOutcome::Finished;
            }
            Ok(Some(Err(e))) => {
                let _ = event_tx.send(RelayEvent::Error { epoch, error: e });
                break TurnOutcome::Finished;
            }
            Ok(None) => {
                // Decoder task ended; it always yields a terminal item first,
                // so reaching this without one means the channel was dropped.
                let _ = event_tx.send(RelayEvent::Done {
                    epoch,
                    response: full_response.clone(),
                    interrupted: false,
                });
                break TurnOutcome::Finished;
            }
            Err(_) => continue,
        }
    };

    stream_handle.abort();
    Ok(outcome)
}

/// Issue the POST, recovering a stale route at most once
async fn send_with_recovery(
    config: &RelayConfig,
    transport: &Transport,
    instance: &mut Option<String>,
    turn: &ChatTurn,
    conversation_id: Option<&str>,
    event_tx: &Sender<RelayEvent>,
) -> Result<reqwest::Response> {
    let mut recovered = false;

    loop {
        let response =
            post_with_retries(config, transport, instance.as_deref(), turn, conversation_id)
                .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();

        if code == 404 && body.contains(STALE_ROUTE_MARKER) && !recovered {
            // The cached instance restarted under a new id; ask the
            // directory and resubmit once.
            recovered = true;
            match instances::list(transport).await {
                Ok(list) if !list.is_empty() => {
                    let id = list[0].id.clone();
                    info!("Instance auto-recovered: {}", id);
                    *instance = Some(id.clone());
                    let _ = event_tx.send(RelayEvent::InstanceChanged { id });
                    continue;
                }
                Ok(_) => warn!("Instance directory is empty, cannot recover route"),
                Err(e) => warn!("Instance directory unavailable: {}", e),
            }
        }

        return Err(PrattleError::ServerError { status: code, body });
    }
}

/// POST the turn with bounded connect retries
async fn post_with_retries(
    config: &RelayConfig,
    transport: &Transport,
    instance: Option<&str>,
    turn: &ChatTurn,
    conversation_id: Option<&str>,
) -> Result<reqwest::Response> {
    let body = build_request_body(config, instance, turn, conversation_id);
    let mut attempt = 0u32;

    loop {
        match transport.post_stream(CHAT_PATH, &body).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt >= config.retry.max_retries {
                    return Err(e);
                }
                let delay = config.retry.delay_for(attempt);
                warn!(
                    "Connect failed (attempt {}): {}; retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn build_request_body(
    config: &RelayConfig,
    instance: Option<&str>,
    turn: &ChatTurn,
    conversation_id: Option<&str>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": config.model,
        "stream": true,
        "user": config.client_tag,
        "messages": turn,
    });
    if let Some(id) = instance {
        body["instanceId"] = serde_json::Value::String(id.to_string());
    }
    if let Some(id) = conversation_id {
        body["conversationId"] = serde_json::Value::String(id.to_string());
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.model, "openclaw");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.instance_id.is_none());
    }

    #[test]
    fn test_relay_config_builder() {
        let config = RelayConfig::new("http://gw:1")
            .with_token("secret")
            .with_instance("bridge-1")
            .with_model("test-model")
            .with_connect_timeout(Duration::from_secs(3));

        assert_eq!(config.base_url, "http://gw:1");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.instance_id.as_deref(), Some("bridge-1"));
        assert_eq!(config.model, "test-model");
    }

    #[test]
    fn test_request_body_shape() {
        let config = RelayConfig::default();
        let turn = vec![Message::user("hello")];
        let body = build_request_body(&config, Some("bridge-1"), &turn, None);

        assert_eq!(body["model"], "openclaw");
        assert_eq!(body["stream"], true);
        assert_eq!(body["instanceId"], "bridge-1");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("conversationId").is_none());
    }

    #[test]
    fn test_request_body_without_instance() {
        let config = RelayConfig::default();
        let turn = vec![Message::user("hello")];
        let body = build_request_body(&config, None, &turn, Some("c-9"));

        assert!(body.get("instanceId").is_none());
        assert_eq!(body["conversationId"], "c-9");
    }
}
