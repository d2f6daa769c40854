//! Prattle - Voice-driven chat client for a streaming LLM gateway
//!
//! This crate provides the conversational core of a voice chat client:
//! a four-state conversation controller, a resilient streaming relay to the
//! chat gateway, and an auto-reconnecting notification channel. Speech
//! engines are pluggable capabilities behind small traits.

pub mod config;
pub mod error;
pub mod messages;
pub mod notify;
pub mod policy;
pub mod relay;
pub mod session;
pub mod speech;

// Re-export error types
pub use error::{PrattleError, Result};

// Re-export core types
pub use config::Settings;
pub use messages::{ChatTurn, ConversationContext, Message, MessageRole};
pub use notify::{ChannelConfig, ChannelEvent, NotificationChannel, NotificationEvent};
pub use policy::{Backoff, RetryPolicy};
pub use relay::{RelayConfig, RelayEvent, RelayHandle, RelayRunner, StreamEvent};
pub use session::{
    ConversationState, SessionCommand, SessionConfig, SessionController, SessionEvent,
    SessionHandle, SharedSessionState,
};
pub use speech::{EngineKind, SttEngine, SttEvent, TtsEngine, TtsEvent};
