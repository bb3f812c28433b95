//! Dialogue-service connection configuration.

use serde::{Deserialize, Serialize};

/// Realtime API WebSocket endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Supported realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    /// GPT-4o Realtime Preview model
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl RealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Self::Gpt4oRealtimePreview,
            "gpt-4o-mini-realtime-preview" => Self::Gpt4oMiniRealtimePreview,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Available voices for agent speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl RealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audio format tag used on both legs of the bridge.
///
/// The telephony provider delivers G.711 μ-law at 8 kHz; the dialogue service
/// is configured with the same format on input and output so the bridge never
/// transcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    /// G.711 u-law (8-bit, 8 kHz), matching the telephony media stream
    #[default]
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// PCM 16-bit signed little-endian at 24 kHz
    #[serde(rename = "pcm16")]
    Pcm16,
}

impl AudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
            Self::Pcm16 => "pcm16",
        }
    }

    /// Get the sample rate for this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::G711Ulaw => 8000,
            Self::Pcm16 => 24000,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection settings for one dialogue-service session.
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// API key for authentication
    pub api_key: String,
    /// Model to converse with
    pub model: RealtimeModel,
    /// Voice for agent speech
    pub voice: RealtimeVoice,
    /// Audio format on both legs
    pub audio_format: AudioFormat,
    /// WebSocket endpoint; `REALTIME_URL` unless overridden
    pub endpoint: String,
}

impl DialogueConfig {
    /// Build the WebSocket URL with the model query parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.endpoint, self.model.as_str())
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
            audio_format: AudioFormat::default(),
            endpoint: REALTIME_URL.to_string(),
        }
    }
}
