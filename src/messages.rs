//! Conversation messages and history
//!
//! A chat turn is an ordered list of messages; once handed to the relay it is
//! treated as an immutable value object for that request.

use serde::{Deserialize, Serialize};

/// Role of a message in the conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant response
    Assistant,
}

/// A single message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// One chat turn as sent to the gateway
pub type ChatTurn = Vec<Message>;

/// Manages conversation context and history
#[derive(Clone, Debug)]
pub struct ConversationContext {
    /// System prompt (always included)
    system_prompt: String,
    /// Conversation history
    messages: Vec<Message>,
}

impl ConversationContext {
    /// Create a new conversation context with a system prompt
    pub fn new(system_prompt: &str) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            messages: Vec::new(),
        }
    }

    /// Add a user message to the conversation
    pub fn add_user_message(&mut self, content: &str) {
        self.messages.push(Message::user(content));
    }

    /// Add an assistant message to the conversation
    pub fn add_assistant_message(&mut self, content: &str) {
        self.messages.push(Message::assistant(content));
    }

    /// Clear conversation history (keeps system prompt)
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Build the full turn including the system prompt
    pub fn turn(&self) -> ChatTurn {
        let mut result = vec![Message::system(&self.system_prompt)];
        result.extend(self.messages.clone());
        result
    }

    /// Get the system prompt
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Update the system prompt
    pub fn set_system_prompt(&mut self, prompt: &str) {
        self.system_prompt = prompt.to_string();
    }

    /// Get number of messages in history (excluding system prompt)
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
