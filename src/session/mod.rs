//! Conversation session: state machine, controller and notification fan-out

pub mod controller;
pub mod hub;
pub mod state;

pub use controller::{
    SessionCommand, SessionConfig, SessionController, SessionEvent, SessionHandle,
};
pub use hub::{NotificationHub, SubscriptionId};
pub use state::{ConversationState, SessionState, SharedSessionState};
