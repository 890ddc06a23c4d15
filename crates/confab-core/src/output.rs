//! Normalized inbound events.
//!
//! The receive pipeline folds every server frame into one [`StreamOutput`].
//! A single frame may populate several fields at once (e.g. audio plus a
//! function call); consumers check each field independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A server request to invoke a named client-side function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Correlation id; echoed in the response frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// Opaque structured arguments.
    #[serde(default)]
    pub args: Value,
}

/// The client's answer to a [`FunctionCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Correlation id of the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// Structured result (or error payload).
    pub response: Value,
}

/// Code the model wants executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableCode {
    /// Source language label.
    pub language: String,
    /// The code itself.
    pub code: String,
}

/// Result of server-side code execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    /// Outcome label (e.g. `OUTCOME_OK`).
    pub outcome: String,
    /// Captured stdout/stderr.
    pub output: String,
}

/// One safety rating attached to generated content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyRating {
    /// Harm category label.
    pub category: String,
    /// Probability label.
    pub probability: String,
    /// Whether generation was blocked on this category.
    #[serde(default)]
    pub blocked: bool,
}

/// A single grounding source reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingSource {
    /// Source URI.
    pub uri: String,
    /// Source title.
    #[serde(default)]
    pub title: String,
}

/// Grounding metadata for a model turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    /// Web queries the server issued while grounding.
    #[serde(default)]
    pub search_queries: Vec<String>,
    /// Sources backing the response.
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
}

/// Token counts for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Tokens in the prompt.
    pub prompt_tokens: i32,
    /// Tokens in the model response.
    pub response_tokens: i32,
    /// Total tokens billed.
    pub total_tokens: i32,
    /// True when the counts are a client-side estimate rather than
    /// server-reported figures.
    #[serde(default)]
    pub estimated: bool,
}

impl UsageMetadata {
    /// Advisory estimate used when a turn completes without server counts:
    /// roughly four characters of text per token.
    #[must_use]
    pub fn estimate_from_text(text: &str) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let response_tokens = (text.len() / 4) as i32;
        Self {
            prompt_tokens: 0,
            response_tokens,
            total_tokens: response_tokens,
            estimated: true,
        }
    }
}

/// Everything a single inbound frame can contribute, normalized.
#[derive(Debug, Clone, Default)]
pub struct StreamOutput {
    /// Text delta for this frame (concatenation of all text parts).
    pub text: String,
    /// Raw PCM audio bytes (first audio part wins; later ones are logged
    /// and dropped).
    pub audio: Option<Vec<u8>>,
    /// MIME type the audio arrived with.
    pub audio_mime: Option<String>,
    /// Transcription of the user's speech, when the server produced one.
    /// Carried for the caller to attach to the user's message; never
    /// folded into `text`.
    pub input_transcription: Option<String>,
    /// Function call carried by this frame (first only).
    pub function_call: Option<FunctionCall>,
    /// Executable code carried by this frame.
    pub executable_code: Option<ExecutableCode>,
    /// Code-execution result carried by this frame.
    pub code_execution_result: Option<CodeExecutionResult>,
    /// Safety ratings attached to this frame.
    pub safety_ratings: Vec<SafetyRating>,
    /// Grounding metadata attached to this frame.
    pub grounding_metadata: Option<GroundingMetadata>,
    /// Token counts, when the frame carried usage metadata.
    pub usage: Option<UsageMetadata>,
    /// Setup handshake completion marker.
    pub setup_complete: bool,
    /// Turn completion marker.
    pub turn_complete: bool,
    /// The model was interrupted mid-turn.
    pub interrupted: bool,
}

impl StreamOutput {
    /// True when the frame contributed nothing we act on.
    ///
    /// `input_transcription` is deliberately not counted: user-speech
    /// transcription never opens a model turn on its own.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.audio.is_none()
            && self.function_call.is_none()
            && self.executable_code.is_none()
            && self.code_execution_result.is_none()
            && self.safety_ratings.is_empty()
            && self.grounding_metadata.is_none()
            && self.usage.is_none()
            && !self.setup_complete
            && !self.turn_complete
            && !self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_estimate_rounds_down() {
        let usage = UsageMetadata::estimate_from_text("hi there"); // 8 chars
        assert_eq!(usage.response_tokens, 2);
        assert!(usage.estimated);
    }

    #[test]
    fn default_output_is_empty() {
        assert!(StreamOutput::default().is_empty());
        let output = StreamOutput {
            turn_complete: true,
            ..StreamOutput::default()
        };
        assert!(!output.is_empty());
    }
}
