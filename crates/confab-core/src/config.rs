//! Session configuration.
//!
//! [`ClientConfig`] is captured once at session construction and immutable
//! afterwards. Anything derived from the environment (API keys, trace
//! toggles) is resolved before the config is built, never read again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::ClientError;

/// Default substring that marks a model as capable of live bidirectional
/// audio sessions.
pub const DEFAULT_LIVE_MODEL_TOKEN: &str = "live";

/// JSON response MIME identifier. Forced whenever a response schema is set.
pub const JSON_MIME_TYPE: &str = "application/json";

/// Generation parameters. Every field is optional; unset fields are omitted
/// from the setup frame entirely rather than sent as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,

    /// Hard cap on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,

    /// Response MIME type (e.g. `application/json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,

    /// Opaque response schema blob. When set, the MIME type is forced to
    /// [`JSON_MIME_TYPE`] by the send pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

impl GenerationConfig {
    /// True when no generation field is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.max_output_tokens.is_none()
            && self.response_mime_type.is_none()
            && self.response_schema.is_none()
    }
}

/// Declaration of a client-side tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name, unique per session.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema for the tool's arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// PCM format of model-emitted audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count (the live protocol emits mono).
    pub channels: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        // The live protocol streams 24 kHz mono 16-bit PCM.
        Self {
            sample_rate: 24_000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl AudioFormat {
    /// Bytes of PCM per second at this format.
    #[must_use]
    pub const fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// Estimated wall-clock duration of `len` bytes of PCM.
    #[must_use]
    pub fn duration_of(&self, len: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(len as f64 / bps as f64)
    }

    /// Bytes covering `duration` of PCM, rounded down to a whole sample.
    #[must_use]
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frame = u64::from(self.channels) * u64::from(self.bits_per_sample / 8);
        if frame == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let raw = (duration.as_secs_f64() * self.bytes_per_second() as f64) as u64;
        (raw - raw % frame) as usize
    }
}

/// Immutable session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Model identifier, with or without a `models/` prefix.
    pub model: String,

    /// Whether model audio output is requested.
    pub enable_audio: bool,

    /// Prebuilt voice identifier for audio output.
    pub voice: Option<String>,

    /// System prompt sent in the setup frame.
    pub system_prompt: Option<String>,

    /// Generation parameters.
    pub generation: GenerationConfig,

    /// Tool declarations sent in the setup frame.
    pub tools: Vec<ToolDefinition>,

    /// Enable the server-side web search tool.
    pub enable_web_search: bool,

    /// Enable the server-side code execution tool.
    pub enable_code_execution: bool,

    /// Prefer the WebSocket transport when the model supports it.
    pub enable_websocket: bool,

    /// Substring (case-insensitive) marking a model as live-capable.
    pub live_model_token: String,

    /// PCM format the model emits; drives consolidation thresholds and
    /// WAV header synthesis.
    pub audio_format: AudioFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            enable_audio: false,
            voice: None,
            system_prompt: None,
            generation: GenerationConfig::default(),
            tools: Vec::new(),
            enable_web_search: false,
            enable_code_execution: false,
            enable_websocket: false,
            live_model_token: DEFAULT_LIVE_MODEL_TOKEN.to_string(),
            audio_format: AudioFormat::default(),
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for the common text-only case.
    #[must_use]
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Validate invariants that must hold before a session is created.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.model.trim().is_empty() {
            return Err(ClientError::Config("model identifier is empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ClientError::Config(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }
        Ok(())
    }

    /// Model identifier with any `models/` prefix stripped.
    #[must_use]
    pub fn normalized_model(&self) -> &str {
        self.model.strip_prefix("models/").unwrap_or(&self.model)
    }

    /// Whether this model supports live bidirectional audio sessions.
    ///
    /// Case-insensitive substring match on [`Self::live_model_token`],
    /// ignoring any `models/` prefix.
    #[must_use]
    pub fn is_live_capable(&self) -> bool {
        self.normalized_model()
            .to_ascii_lowercase()
            .contains(&self.live_model_token.to_ascii_lowercase())
    }
}
