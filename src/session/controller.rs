//! Conversation controller
//!
//! The controller owns the session state machine and serializes everything
//! onto one event loop: external commands, STT transcripts, relay stream
//! events, TTS playback events and notification channel events. Each turn
//! carries an epoch; events from a superseded turn are discarded instead of
//! being applied to the wrong conversation state.

use crate::messages::ConversationContext;
use crate::notify::{ChannelEvent, NotificationChannel, NotificationEvent};
use crate::relay::{RelayCommand, RelayEvent, RelayHandle};
use crate::session::hub::{NotificationHub, SubscriptionId};
use crate::session::state::SharedSessionState;
use crate::speech::{SentenceSplitter, SttEngine, SttEvent, TtsEngine, TtsEvent};
use crate::{PrattleError, Result};
use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Words that interrupt the assistant instead of being relayed
const STOP_WORDS: &[&str] = &["stop", "halt", "cancel", "abort", "quit"];

/// Configuration for the conversation controller
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Recognition language passed to the STT engine
    pub language: String,
    /// System prompt for every turn
    pub system_prompt: String,
    /// Spoken words treated as a stop command
    pub stop_words: Vec<String>,
    /// Channel buffer size
    pub channel_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: "ko-KR".to_string(),
            system_prompt: "You are a helpful voice assistant. Respond concisely.".to_string(),
            stop_words: STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            channel_buffer_size: 100,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recognition language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the stop words
    pub fn with_stop_words(mut self, words: Vec<String>) -> Self {
        self.stop_words = words;
        self
    }
}

/// Commands that control the session
#[derive(Clone, Debug)]
pub enum SessionCommand {
    /// Turn the mic preference on and start listening
    EnableMic,
    /// Turn the mic preference off and stop listening
    DisableMic,
    /// Relay a typed turn, bypassing STT
    SendText(String),
    /// Stop the current turn and playback (barge-in equivalent)
    Stop,
    /// Clear conversation history
    ClearHistory,
    /// Attach to a server-side conversation record
    SetConversation(Option<String>),
    /// Shutdown the session
    Shutdown,
}

/// Events emitted by the session
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// State has changed; read it from `SharedSessionState`
    StateChanged,
    /// Interim transcript update
    Interim(String),
    /// Final transcript relayed as a turn
    Transcript(String),
    /// Streamed response text
    Delta(String),
    /// The turn finished
    TurnComplete {
        /// Full response text
        response: String,
        /// Whether it was interrupted
        interrupted: bool,
    },
    /// A turn or capability failed
    Error(String),
    /// Notification pushed by the gateway
    Notification(NotificationEvent),
    /// Notification channel connected
    ChannelConnected,
    /// Notification channel disconnected
    ChannelDisconnected,
    /// Route recovery adopted a new instance; persist it
    InstanceChanged(String),
    /// Session shut down
    Shutdown,
}

/// Handle for controlling a running session
pub struct SessionHandle {
    command_tx: Sender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
    state: SharedSessionState,
    hub: Arc<Mutex<NotificationHub>>,
}

impl SessionHandle {
    /// Send a command to the session
    pub fn send_command(&self, command: SessionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| PrattleError::ChannelError(format!("Failed to send command: {}", e)))
    }

    /// Turn the mic preference on
    pub fn enable_mic(&self) -> Result<()> {
        self.send_command(SessionCommand::EnableMic)
    }

    /// Turn the mic preference off
    pub fn disable_mic(&self) -> Result<()> {
        self.send_command(SessionCommand::DisableMic)
    }

    /// Relay a typed turn
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::SendText(text.into()))
    }

    /// Stop the current turn and playback
    pub fn stop(&self) -> Result<()> {
        self.send_command(SessionCommand::Stop)
    }

    /// Clear conversation history
    pub fn clear_history(&self) -> Result<()> {
        self.send_command(SessionCommand::ClearHistory)
    }

    /// Request shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.send_command(SessionCommand::Shutdown)
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> Result<SessionEvent> {
        self.event_rx
            .recv()
            .map_err(|e| PrattleError::ChannelError(format!("Failed to receive event: {}", e)))
    }

    /// Get the shared session state
    pub fn state(&self) -> &SharedSessionState {
        &self.state
    }

    /// Subscribe to gateway notifications
    pub fn subscribe_notifications(&self) -> (SubscriptionId, Receiver<NotificationEvent>) {
        self.hub.lock().subscribe()
    }

    /// Drop a notification subscription
    pub fn unsubscribe_notifications(&self, id: SubscriptionId) {
        self.hub.lock().unsubscribe(id);
    }
}

/// The conversation controller event loop
///
/// Construct with [`SessionController::new`], then call `start()` to run the
/// loop in its own thread.
pub struct SessionController {
    config: SessionConfig,
    state: SharedSessionState,

    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,

    stt: Box<dyn SttEngine>,
    stt_event_rx: Receiver<SttEvent>,
    tts: Box<dyn TtsEngine>,
    tts_event_rx: Receiver<TtsEvent>,

    relay: RelayHandle,
    notify: Option<NotificationChannel>,
    hub: Arc<Mutex<NotificationHub>>,

    context: ConversationContext,
    splitter: SentenceSplitter,
    conversation_id: Option<String>,

    // Turn tracking
    epoch: u64,
    turn_streaming: bool,
    tts_active: bool,
    speech_buffer: String,
}

impl SessionController {
    /// Wire up a session
    ///
    /// Engines were constructed with the matching event senders; the
    /// receivers come in here so the controller can serialize their events.
    pub fn new(
        config: SessionConfig,
        stt: Box<dyn SttEngine>,
        stt_event_rx: Receiver<SttEvent>,
        tts: Box<dyn TtsEngine>,
        tts_event_rx: Receiver<TtsEvent>,
        relay: RelayHandle,
        notify: Option<NotificationChannel>,
    ) -> (Self, SessionHandle) {
        let state = SharedSessionState::new();
        let hub = Arc::new(Mutex::new(NotificationHub::new()));

        let (command_tx, command_rx) = bounded(config.channel_buffer_size);
        let (event_tx, event_rx) = bounded(config.channel_buffer_size);

        let handle = SessionHandle {
            command_tx,
            event_rx,
            state: state.clone(),
            hub: hub.clone(),
        };

        let context = ConversationContext::new(&config.system_prompt);

        let controller = Self {
            config,
            state,
            command_rx,
            event_tx,
            stt,
            stt_event_rx,
            tts,
            tts_event_rx,
            relay,
            notify,
            hub,
            context,
            splitter: SentenceSplitter::new(),
            conversation_id: None,
            epoch: 0,
            turn_streaming: false,
            tts_active: false,
            speech_buffer: String::new(),
        };

        (controller, handle)
    }

    /// Run the controller loop in its own thread
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(mut self) {
        info!("Session controller starting");

        let command_rx = self.command_rx.clone();
        let stt_rx = self.stt_event_rx.clone();
        let tts_rx = self.tts_event_rx.clone();
        let relay_rx = self.relay.event_rx.clone();
        let notify_rx = self
            .notify
            .as_ref()
            .map(|channel| channel.event_receiver())
            .unwrap_or_else(never);

        loop {
            select! {
                recv(command_rx) -> command => {
                    match command {
                        Ok(command) => {
                            if self.handle_command(command) {
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Command channel disconnected");
                            break;
                        }
                    }
                }

                recv(stt_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_stt(event);
                    }
                }

                recv(relay_rx) -> event => {
                    match event {
                        Ok(RelayEvent::Shutdown) => {
                            error!("Relay worker exited unexpectedly");
                            let _ = self.event_tx.send(SessionEvent::Error(
                                "relay worker exited".to_string(),
                            ));
                            break;
                        }
                        Ok(event) => self.handle_relay(event),
                        Err(_) => {
                            warn!("Relay event channel disconnected");
                            break;
                        }
                    }
                }

                recv(tts_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_tts(event);
                    }
                }

                recv(notify_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_notify(event);
                    }
                }
            }
        }

        self.teardown();
    }

    /// Handle an external command; returns true on shutdown
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::EnableMic => {
                debug!("Mic enabled");
                self.state.write().mic_enabled = true;
                if let Err(e) = self.stt.start(&self.config.language) {
                    error!("STT start failed: {}", e);
                    self.state.write().set_error(e.to_string());
                    let _ = self.event_tx.send(SessionEvent::Error(e.to_string()));
                } else if self.state.conversation_state().is_idle() {
                    self.state.write().set_listening();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
            }

            SessionCommand::DisableMic => {
                debug!("Mic disabled");
                self.state.write().mic_enabled = false;
                self.stt.stop();
                if self.state.conversation_state().is_listening() {
                    self.state.write().set_idle();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
            }

            SessionCommand::SendText(text) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    self.begin_turn(text);
                }
            }

            SessionCommand::Stop => {
                debug!("Stop requested");
                self.interrupt_turn();
            }

            SessionCommand::ClearHistory => {
                debug!("Clearing conversation history");
                self.context.clear();
            }

            SessionCommand::SetConversation(id) => {
                self.conversation_id = id;
            }

            SessionCommand::Shutdown => {
                info!("Shutdown requested");
                return true;
            }
        }
        false
    }

    fn handle_stt(&mut self, event: SttEvent) {
        match event {
            SttEvent::Interim(text) => {
                // Speech over playback is a barge-in
                if self.state.conversation_state().is_speaking() {
                    debug!("Barge-in detected");
                    self.interrupt_turn();
                }
                {
                    let mut state = self.state.write();
                    if state.state.is_idle() {
                        state.set_listening();
                    }
                    state.set_interim(&text);
                }
                let _ = self.event_tx.send(SessionEvent::Interim(text));
                let _ = self.event_tx.send(SessionEvent::StateChanged);
            }

            SttEvent::Final(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return;
                }
                if is_stop_word(&text, &self.config.stop_words) {
                    info!("Stop word spoken: {}", text);
                    self.interrupt_turn();
                    return;
                }
                self.begin_turn(text);
            }

            SttEvent::Error(err) => {
                warn!("STT error: {}", err);
                self.state.write().set_error(format!("STT error: {}", err));
                let _ = self
                    .event_tx
                    .send(SessionEvent::Error(format!("STT error: {}", err)));
            }

            SttEvent::Ended => {
                debug!("STT ended");
                if self.state.mic_enabled() {
                    // Keep the mic session alive across engine restarts
                    if let Err(e) = self.stt.start(&self.config.language) {
                        error!("STT restart failed: {}", e);
                        let _ = self.event_tx.send(SessionEvent::Error(e.to_string()));
                    }
                } else if self.state.conversation_state().is_listening() {
                    self.state.write().set_idle();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
            }
        }
    }

    fn handle_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Started { epoch } => {
                debug!("Relay accepted turn (epoch {})", epoch);
            }

            RelayEvent::Delta { epoch, text } => {
                if epoch != self.epoch {
                    debug!("Discarding delta from superseded turn (epoch {})", epoch);
                    return;
                }
                if self.state.conversation_state().is_processing() {
                    self.state.write().set_speaking();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
                self.state.write().append_response(&text);
                self.speech_buffer.push_str(&text);
                self.flush_speech(false);
                let _ = self.event_tx.send(SessionEvent::Delta(text));
            }

            RelayEvent::Done {
                epoch,
                response,
                interrupted,
            } => {
                if epoch != self.epoch {
                    debug!("Discarding done from superseded turn (epoch {})", epoch);
                    return;
                }
                debug!("Turn complete (interrupted: {})", interrupted);
                self.turn_streaming = false;
                self.flush_speech(true);
                if !interrupted {
                    self.context.add_assistant_message(&response);
                }
                let _ = self.event_tx.send(SessionEvent::TurnComplete {
                    response,
                    interrupted,
                });
                if !self.tts_active {
                    self.state.write().set_idle();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
            }

            RelayEvent::Error { epoch, error } => {
                if epoch != self.epoch {
                    debug!("Discarding error from superseded turn (epoch {})", epoch);
                    return;
                }
                warn!("Turn failed: {}", error);
                self.turn_streaming = false;
                self.tts.stop();
                self.tts_active = false;
                self.speech_buffer.clear();
                {
                    let mut state = self.state.write();
                    state.set_error(error.to_string());
                    state.set_idle();
                }
                let _ = self.event_tx.send(SessionEvent::Error(error.to_string()));
                let _ = self.event_tx.send(SessionEvent::StateChanged);
            }

            RelayEvent::InstanceChanged { id } => {
                info!("Routing instance changed: {}", id);
                let _ = self.event_tx.send(SessionEvent::InstanceChanged(id));
            }

            // Handled in the select loop
            RelayEvent::Shutdown => {}
        }
    }

    fn handle_tts(&mut self, event: TtsEvent) {
        match event {
            TtsEvent::Started => {
                self.tts_active = true;
            }

            TtsEvent::Sentence(text) => {
                debug!("Speaking: {}", text);
            }

            TtsEvent::Finished => {
                self.tts_active = false;
                if !self.turn_streaming && self.state.conversation_state().is_speaking() {
                    self.state.write().set_idle();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
            }

            TtsEvent::Error(err) => {
                warn!("TTS error: {}", err);
                self.tts_active = false;
                if !self.turn_streaming && self.state.conversation_state().is_speaking() {
                    self.state.write().set_idle();
                    let _ = self.event_tx.send(SessionEvent::StateChanged);
                }
            }
        }
    }

    fn handle_notify(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                let _ = self.event_tx.send(SessionEvent::ChannelConnected);
            }
            ChannelEvent::Disconnected => {
                let _ = self.event_tx.send(SessionEvent::ChannelDisconnected);
            }
            ChannelEvent::Notification(notification) => {
                self.hub.lock().publish(&notification);
                let _ = self
                    .event_tx
                    .send(SessionEvent::Notification(notification));
            }
            ChannelEvent::Shutdown => {
                debug!("Notification channel worker exited");
            }
        }
    }

    /// Start a new turn, superseding any in-flight one
    fn begin_turn(&mut self, text: String) {
        if self.turn_streaming {
            debug!("New turn supersedes the in-flight one");
            self.tts.stop();
            self.tts_active = false;
        }
        self.epoch += 1;
        self.turn_streaming = true;
        self.speech_buffer.clear();
        self.context.add_user_message(&text);
        {
            let mut state = self.state.write();
            state.start_turn(&text);
            state.set_processing();
        }
        let _ = self.event_tx.send(SessionEvent::Transcript(text));
        let _ = self.event_tx.send(SessionEvent::StateChanged);

        if let Err(e) = self.relay.stream_turn(
            self.context.turn(),
            self.epoch,
            self.conversation_id.clone(),
        ) {
            error!("Failed to relay turn: {}", e);
            self.turn_streaming = false;
            {
                let mut state = self.state.write();
                state.set_error(e.to_string());
                state.set_idle();
            }
            let _ = self.event_tx.send(SessionEvent::Error(e.to_string()));
            let _ = self.event_tx.send(SessionEvent::StateChanged);
        }
    }

    /// Stop the current turn and playback, then apply the idle rule
    fn interrupt_turn(&mut self) {
        if self.turn_streaming {
            let _ = self.relay.stop();
            self.turn_streaming = false;
        }
        // Late events from the old turn must not land on the new state
        self.epoch += 1;
        self.tts.stop();
        self.tts_active = false;
        self.speech_buffer.clear();
        self.state.write().set_idle();
        let _ = self.event_tx.send(SessionEvent::StateChanged);
    }

    /// Feed complete sentences to TTS; `force` flushes the tail
    fn flush_speech(&mut self, force: bool) {
        if self.speech_buffer.is_empty() {
            return;
        }
        let split_at = self
            .speech_buffer
            .char_indices()
            .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '。' | '\n'))
            .map(|(i, c)| i + c.len_utf8())
            .last();

        let ready = match split_at {
            Some(end) => {
                let rest = self.speech_buffer.split_off(end);
                std::mem::replace(&mut self.speech_buffer, rest)
            }
            None if force => std::mem::take(&mut self.speech_buffer),
            None => return,
        };

        if !self.splitter.split(&ready).is_empty() {
            self.tts_active = true;
        }
        self.tts.add_chunk(&ready);
    }

    fn teardown(mut self) {
        info!("Session controller shutting down");
        self.stt.stop();
        self.tts.stop();
        let _ = self.relay.command_tx.send(RelayCommand::Shutdown);
        if let Some(channel) = self.notify.take() {
            let _ = channel.shutdown();
        }
        self.hub.lock().clear();
        let _ = self.event_tx.send(SessionEvent::Shutdown);
        info!("Session controller shutdown complete");
    }
}

/// Whether a final transcript is just a stop command
fn is_stop_word(text: &str, stop_words: &[String]) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase();
    stop_words.iter().any(|w| w == &normalized)
}
