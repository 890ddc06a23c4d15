//! Transport-neutral frame model.
//!
//! Both transports (binary bidi and WebSocket JSON) encode from and decode
//! into these types, so the session runtime never sees a wire format. The
//! shapes mirror the bidirectional generate-content contract: a `setup`
//! handshake, `clientContent`/`toolResponse` outbound, and
//! `setupComplete`/`serverContent`/`toolCall`/`usageMetadata` inbound.

use serde::{Deserialize, Serialize};

use crate::config::{GenerationConfig, ToolDefinition};
use crate::output::{
    CodeExecutionResult, ExecutableCode, FunctionCall, FunctionResponse, GroundingMetadata,
    SafetyRating,
};

/// Requested response modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    /// Text output.
    Text,
    /// PCM audio output.
    Audio,
}

/// The first outbound frame of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupFrame {
    /// Model identifier (normalized, no `models/` prefix).
    pub model: String,
    /// System prompt, if any.
    pub system_instruction: Option<String>,
    /// Declared client-side tools.
    pub tools: Vec<ToolDefinition>,
    /// Generation parameters (populated fields only).
    pub generation: GenerationConfig,
    /// Requested response modalities.
    pub response_modalities: Vec<Modality>,
    /// Prebuilt voice name for audio output.
    pub voice: Option<String>,
    /// Enable the server-side web search tool.
    pub enable_web_search: bool,
    /// Enable the server-side code execution tool.
    pub enable_code_execution: bool,
}

/// One content part, outbound or inbound.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Plain text.
    Text(String),
    /// Inline binary data (decoded; transports own the base64/bytes step).
    InlineData {
        /// MIME type, e.g. `audio/pcm;rate=24000`.
        mime_type: String,
        /// Raw bytes.
        data: Vec<u8>,
    },
    /// A function call emitted inside a model turn.
    FunctionCall(FunctionCall),
    /// Code the model wants executed.
    ExecutableCode(ExecutableCode),
    /// Result of server-side code execution.
    CodeExecutionResult(CodeExecutionResult),
}

/// One conversational turn in a `clientContent` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Role label (`user` or `model`).
    pub role: String,
    /// Ordered content parts.
    pub parts: Vec<Part>,
}

/// Outbound user/content frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientContent {
    /// Turns to append to the conversation.
    pub turns: Vec<Turn>,
    /// Whether this completes the client's turn.
    pub turn_complete: bool,
}

/// Every frame the client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Session setup handshake.
    Setup(SetupFrame),
    /// Conversation content.
    Content(ClientContent),
    /// Batched function responses.
    ToolResponse(Vec<FunctionResponse>),
    /// Keepalive. Binary bidi sends a zero-content client message; the
    /// WebSocket transport sends a protocol-level ping.
    Ping,
}

/// Inbound model-turn content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    /// Model turn parts, in order.
    pub parts: Vec<Part>,
    /// Turn completion marker.
    pub turn_complete: bool,
    /// The model was interrupted mid-turn.
    pub interrupted: bool,
    /// Grounding metadata for the turn, if any.
    pub grounding: Option<GroundingMetadata>,
    /// Safety ratings for the turn.
    pub safety_ratings: Vec<SafetyRating>,
    /// Transcription of user speech, if the server produced one.
    pub input_transcription: Option<String>,
    /// Transcription of model speech, if the server produced one.
    pub output_transcription: Option<String>,
}

/// Raw usage counts as they appear on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: i32,
    /// Tokens in the response.
    pub response_tokens: i32,
    /// Total tokens.
    pub total_tokens: i32,
}

/// Every frame the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Setup handshake acknowledgement.
    SetupComplete,
    /// Model turn content.
    Content(ServerContent),
    /// Server-requested tool invocations.
    ToolCall(Vec<FunctionCall>),
    /// Token accounting.
    Usage(WireUsage),
    /// The server is about to drop the connection; reconnect.
    GoAway {
        /// Server-provided reason, if any.
        reason: String,
    },
}

impl ClientContent {
    /// A single-part user turn that completes the client's turn.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: vec![Part::Text(text.into())],
            }],
            turn_complete: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_builds_single_part_turn() {
        let content = ClientContent::user_text("hello");
        assert!(content.turn_complete);
        assert_eq!(content.turns.len(), 1);
        assert_eq!(content.turns[0].role, "user");
        assert_eq!(content.turns[0].parts, vec![Part::Text("hello".into())]);
    }

    #[test]
    fn modality_wire_labels_are_uppercase() {
        assert_eq!(serde_json::to_string(&Modality::Text).unwrap(), "\"TEXT\"");
        assert_eq!(
            serde_json::to_string(&Modality::Audio).unwrap(),
            "\"AUDIO\""
        );
    }
}
