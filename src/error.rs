//! Error types for the Prattle client
//!
//! One taxonomy covers the whole relay pipeline: connection failures are
//! transient and retried, server and protocol errors are terminal for the
//! turn, channel errors indicate internal wiring problems.

use thiserror::Error;

/// Prattle client errors
#[derive(Error, Debug, Clone)]
pub enum PrattleError {
    /// Could not reach the gateway (after retries, when issued by the relay)
    #[error("Connection failed: {0}")]
    ConnectError(String),

    /// Gateway answered with a non-success status
    #[error("Server error {status}: {body}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// Response body carried no frames this client recognizes
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error frame delivered inside an otherwise healthy stream
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// Speech-to-text capability error
    #[error("Speech-to-text error: {0}")]
    SttError(String),

    /// Text-to-speech capability error
    #[error("Text-to-speech error: {0}")]
    TtsError(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File system I/O error
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for PrattleError {
    fn from(e: std::io::Error) -> Self {
        PrattleError::IoError(e.to_string())
    }
}

impl PrattleError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors end the current turn but leave the session usable;
    /// non-recoverable errors require user intervention or a restart.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The next turn may reach the gateway again
            PrattleError::ConnectError(_) => true,
            PrattleError::ServerError { .. } => true,
            PrattleError::ProtocolError(_) => true,
            PrattleError::GatewayError(_) => true,
            // Speech engines are typically transient
            PrattleError::SttError(_) => true,
            PrattleError::TtsError(_) => true,
            // Channel errors indicate internal issues
            PrattleError::ChannelError(_) => false,
            // Config errors require user intervention
            PrattleError::ConfigError(_) => false,
            PrattleError::IoError(_) => false,
        }
    }

    /// Get a user-friendly description of the error
    ///
    /// Returns a message suitable for display or speech output.
    pub fn user_message(&self) -> String {
        match self {
            PrattleError::ConnectError(_) => {
                "Could not reach the server. Please check the connection.".to_string()
            }
            PrattleError::ServerError { status, .. } => {
                format!("The server returned an error ({}). Please try again.", status)
            }
            PrattleError::ProtocolError(_) => {
                "The server sent an unexpected response. Please try again.".to_string()
            }
            PrattleError::GatewayError(_) => {
                "The assistant reported an error. Please try again.".to_string()
            }
            PrattleError::SttError(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            PrattleError::TtsError(_) => {
                "Speech playback failed.".to_string()
            }
            PrattleError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            PrattleError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            PrattleError::IoError(_) => {
                "File system error occurred.".to_string()
            }
        }
    }
}

/// Result type alias for Prattle operations
pub type Result<T> = std::result::Result<T, PrattleError>;
