//! Conversation record API
//!
//! The gateway keeps conversation transcripts server-side; this module
//! relays the records. Read paths degrade to empty results when the gateway
//! is unreachable so the client can still start a fresh session; mutations
//! surface their errors.

use crate::messages::MessageRole;
use crate::relay::transport::{Transport, DIRECTORY_TIMEOUT};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Conversation metadata as stored by the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    /// Record identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Last update time, epoch milliseconds
    pub updated_at: i64,
    /// Number of stored messages
    pub message_count: u32,
}

/// One stored message
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedMessage {
    /// Who said it
    pub role: MessageRole,
    /// What was said
    pub content: String,
    /// When, epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// List conversations; empty on any failure
pub async fn list(transport: &Transport) -> Vec<ConversationMeta> {
    match transport.get_json("/api/conversations", DIRECTORY_TIMEOUT).await {
        Ok(metas) => metas,
        Err(e) => {
            warn!("Conversation list unavailable: {}", e);
            Vec::new()
        }
    }
}

/// Create a conversation with the given title
pub async fn create(transport: &Transport, title: &str) -> Result<ConversationMeta> {
    transport
        .post_json(
            "/api/conversations",
            &serde_json::json!({ "title": title }),
            DIRECTORY_TIMEOUT,
        )
        .await
}

/// Fetch the messages of a conversation; empty on any failure
pub async fn messages(transport: &Transport, conversation_id: &str) -> Vec<RecordedMessage> {
    let path = format!("/api/conversations/{}/messages", conversation_id);
    match transport.get_json(&path, DIRECTORY_TIMEOUT).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Conversation messages unavailable: {}", e);
            Vec::new()
        }
    }
}

/// Replace the stored messages of a conversation
pub async fn save_messages(
    transport: &Transport,
    conversation_id: &str,
    messages: &[RecordedMessage],
) -> Result<()> {
    let path = format!("/api/conversations/{}/messages", conversation_id);
    transport.put_json(&path, &messages, DIRECTORY_TIMEOUT).await
}

/// Delete a conversation
pub async fn delete(transport: &Transport, conversation_id: &str) -> Result<()> {
    let path = format!("/api/conversations/{}", conversation_id);
    transport.delete(&path, DIRECTORY_TIMEOUT).await
}

/// Rename a conversation
pub async fn rename(transport: &Transport, conversation_id: &str, title: &str) -> Result<()> {
    let path = format!("/api/conversations/{}", conversation_id);
    transport
        .patch_json(&path, &serde_json::json!({ "title": title }), DIRECTORY_TIMEOUT)
        .await
}
