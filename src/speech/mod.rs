//! Speech capability interfaces
//!
//! STT and TTS engines are black-box capabilities behind small traits. The
//! session selects one implementation per capability at construction time
//! from a closed set of engine kinds; events flow back over channels so the
//! controller can serialize them with everything else.

pub mod console;
pub mod sentence;

use crate::Result;
use serde::{Deserialize, Serialize};

pub use console::{ConsoleStt, ConsoleTts};
pub use sentence::SentenceSplitter;

/// Closed set of speech engine implementations
///
/// Selection happens once when the session is constructed. `Native` and
/// `Cloud` engines are provided by the embedding application as trait
/// implementations; `Console` is the built-in development engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Line-oriented console engine (development and tests)
    #[default]
    Console,
    /// Platform speech services supplied by the embedder
    Native,
    /// Hosted speech service supplied by the embedder
    Cloud,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Console => write!(f, "console"),
            EngineKind::Native => write!(f, "native"),
            EngineKind::Cloud => write!(f, "cloud"),
        }
    }
}

/// Events emitted by a speech-to-text engine
#[derive(Clone, Debug)]
pub enum SttEvent {
    /// Partial transcript while the user is still talking
    Interim(String),
    /// Final transcript for one utterance
    Final(String),
    /// Recognition error
    Error(String),
    /// The engine stopped listening
    Ended,
}

/// Events emitted by a text-to-speech engine
#[derive(Clone, Debug)]
pub enum TtsEvent {
    /// Playback started
    Started,
    /// One sentence is being spoken
    Sentence(String),
    /// The playback queue drained
    Finished,
    /// Synthesis or playback error
    Error(String),
}

/// Speech-to-text capability
///
/// Implementations emit [`SttEvent`]s on the channel they were constructed
/// with. `start` may be called again after `stop`.
pub trait SttEngine: Send {
    /// Begin listening in the given language (BCP 47 tag)
    fn start(&mut self, lang: &str) -> Result<()>;

    /// Stop listening; no further events for the current utterance
    fn stop(&mut self);

    /// Temporarily discard input without tearing the engine down
    fn pause(&mut self);

    /// Resume after a pause
    fn resume(&mut self);

    /// Whether the engine is currently capturing
    fn is_listening(&self) -> bool;
}

/// Text-to-speech capability
///
/// Text is queued sentence by sentence; `add_chunk` accepts partial text as
/// it streams in from the relay.
pub trait TtsEngine: Send {
    /// Queue a complete text for playback
    fn speak(&mut self, text: &str);

    /// Queue a streamed chunk of text for playback
    fn add_chunk(&mut self, text: &str);

    /// Cancel playback and clear the queue
    fn stop(&mut self);

    /// Whether playback is active
    fn is_speaking(&self) -> bool;
}

/// Build the speech-to-text engine for `kind`
///
/// Only the console engine is built in; native and cloud engines are
/// embedder-provided trait implementations passed to the session directly.
pub fn create_stt(
    kind: EngineKind,
    events: crossbeam_channel::Sender<SttEvent>,
) -> Result<Box<dyn SttEngine>> {
    match kind {
        EngineKind::Console => Ok(Box::new(ConsoleStt::new(events))),
        other => Err(crate::PrattleError::ConfigError(format!(
            "{} STT engine is not built in; pass an implementation to the session",
            other
        ))),
    }
}

/// Build the text-to-speech engine for `kind`
pub fn create_tts(
    kind: EngineKind,
    events: crossbeam_channel::Sender<TtsEvent>,
) -> Result<Box<dyn TtsEngine>> {
    match kind {
        EngineKind::Console => Ok(Box::new(ConsoleTts::new(events))),
        other => Err(crate::PrattleError::ConfigError(format!(
            "{} TTS engine is not built in; pass an implementation to the session",
            other
        ))),
    }
}
