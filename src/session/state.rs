//! Conversation session state
//!
//! One session is always in exactly one of four states. The state is owned
//! by the controller and mutated only through the transition methods here;
//! the UI and tests read it through `SharedSessionState`.
//!
//! The one non-obvious rule: while the mic preference is on, "go idle"
//! means "go back to listening" — the session never fully idles under an
//! open mic.

use parking_lot::RwLock;
use std::sync::Arc;

/// Conversation state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// No active session work
    #[default]
    Idle,
    /// Capturing user speech
    Listening,
    /// Waiting for the gateway to answer
    Processing,
    /// Playing the assistant response
    Speaking,
}

impl ConversationState {
    /// Check if idle
    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationState::Idle)
    }

    /// Check if capturing speech
    pub fn is_listening(&self) -> bool {
        matches!(self, ConversationState::Listening)
    }

    /// Check if waiting on the gateway
    pub fn is_processing(&self) -> bool {
        matches!(self, ConversationState::Processing)
    }

    /// Check if playing a response
    pub fn is_speaking(&self) -> bool {
        matches!(self, ConversationState::Speaking)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::Idle => write!(f, "Idle"),
            ConversationState::Listening => write!(f, "Listening"),
            ConversationState::Processing => write!(f, "Processing"),
            ConversationState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Mutable session state behind the controller
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// Current conversation state
    pub state: ConversationState,
    /// Interim transcript while the user is still talking
    pub interim_text: String,
    /// Mic preference: never fully idle while enabled
    pub mic_enabled: bool,
    /// Response text accumulated for the current turn
    pub current_response: String,
    /// Last final transcript sent to the gateway
    pub last_transcript: Option<String>,
    /// Current error (if any)
    pub error: Option<String>,
}

impl SessionState {
    /// Create a new default state
    pub fn new() -> Self {
        Self::default()
    }

    // === State transitions ===

    /// Enter Listening
    pub fn set_listening(&mut self) {
        self.state = ConversationState::Listening;
    }

    /// Enter Processing; the interim transcript has served its purpose
    pub fn set_processing(&mut self) {
        self.state = ConversationState::Processing;
        self.interim_text.clear();
    }

    /// Enter Speaking
    pub fn set_speaking(&mut self) {
        self.state = ConversationState::Speaking;
    }

    /// Leave the active states
    ///
    /// With the mic enabled this lands in Listening and keeps the interim
    /// transcript; otherwise it lands in Idle and clears it.
    pub fn set_idle(&mut self) {
        if self.mic_enabled {
            self.state = ConversationState::Listening;
        } else {
            self.state = ConversationState::Idle;
            self.interim_text.clear();
        }
    }

    // === Buffers ===

    /// Update the interim transcript
    pub fn set_interim(&mut self, text: &str) {
        self.interim_text = text.to_string();
    }

    /// Record the transcript being relayed and reset the response buffer
    pub fn start_turn(&mut self, transcript: &str) {
        self.last_transcript = Some(transcript.to_string());
        self.current_response.clear();
        self.error = None;
    }

    /// Append streamed response text
    pub fn append_response(&mut self, text: &str) {
        self.current_response.push_str(text);
    }

    /// Set an error
    pub fn set_error(&mut self, error: String) {
        self.error = Some(error);
    }
}

/// Thread-safe shared session state
#[derive(Clone, Default)]
pub struct SharedSessionState {
    inner: Arc<RwLock<SessionState>>,
}

impl SharedSessionState {
    /// Create a new shared state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionState::new())),
        }
    }

    /// Get a read lock on the state
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, SessionState> {
        self.inner.read()
    }

    /// Get a write lock on the state
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, SessionState> {
        self.inner.write()
    }

    /// Get a snapshot of the current state (no lock held after return)
    pub fn snapshot(&self) -> SessionState {
        self.inner.read().clone()
    }

    // === Convenience read methods ===

    /// Current conversation state
    pub fn conversation_state(&self) -> ConversationState {
        self.inner.read().state
    }

    /// Whether the mic preference is on
    pub fn mic_enabled(&self) -> bool {
        self.inner.read().mic_enabled
    }

    /// Current interim transcript
    pub fn interim_text(&self) -> String {
        self.inner.read().interim_text.clone()
    }

    /// Response accumulated for the current turn
    pub fn current_response(&self) -> String {
        self.inner.read().current_response.clone()
    }

    /// Last relayed transcript
    pub fn last_transcript(&self) -> Option<String> {
        self.inner.read().last_transcript.clone()
    }
}
