//! Client settings
//!
//! Persisted as TOML in the platform config directory. Loading tolerates a
//! missing or unreadable file and fills unknown keys with defaults, so
//! settings written by an older build keep working.

use crate::speech::EngineKind;
use crate::{PrattleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the chat gateway
    pub gateway_url: String,
    /// Bearer token sent on gateway calls (empty = no auth)
    pub gateway_token: String,
    /// Downstream bridge instance the gateway routes to (empty = let the
    /// relay discover one)
    pub instance_id: String,
    /// Speech-to-text engine selection
    pub stt_engine: EngineKind,
    /// Text-to-speech engine selection
    pub tts_engine: EngineKind,
    /// Recognition/synthesis language (BCP 47)
    pub language: String,
    /// Keep the session listening instead of going idle between turns
    pub mic_enabled: bool,
    /// Playback rate multiplier
    pub speech_rate: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:18789".to_string(),
            gateway_token: String::new(),
            instance_id: String::new(),
            stt_engine: EngineKind::Console,
            tts_engine: EngineKind::Console,
            language: "ko-KR".to_string(),
            mic_enabled: false,
            speech_rate: 1.0,
        }
    }
}

impl Settings {
    /// Streaming chat endpoint
    pub fn chat_endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.gateway_url)
    }

    /// Instance directory endpoint
    pub fn instances_endpoint(&self) -> String {
        format!("{}/instances", self.gateway_url)
    }

    /// Health probe endpoint
    pub fn models_endpoint(&self) -> String {
        format!("{}/v1/models", self.gateway_url)
    }

    /// Conversation records endpoint
    pub fn conversations_endpoint(&self) -> String {
        format!("{}/api/conversations", self.gateway_url)
    }

    /// Notification channel endpoint, derived from the gateway URL
    pub fn ws_endpoint(&self) -> String {
        let ws_base = if let Some(rest) = self.gateway_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.gateway_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.gateway_url.clone()
        };
        format!("{}/ws", ws_base)
    }

    /// Bearer token as an `Option`, empty meaning none
    pub fn token(&self) -> Option<String> {
        if self.gateway_token.is_empty() {
            None
        } else {
            Some(self.gateway_token.clone())
        }
    }

    /// Selected instance as an `Option`, empty meaning unset
    pub fn instance(&self) -> Option<String> {
        if self.instance_id.is_empty() {
            None
        } else {
            Some(self.instance_id.clone())
        }
    }

    /// Default settings file location
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| PrattleError::ConfigError("No config directory".to_string()))?;
        Ok(dir.join("prattle").join("settings.toml"))
    }

    /// Load settings from `path`, falling back to defaults
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Settings file unreadable, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Save settings to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| PrattleError::ConfigError(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
