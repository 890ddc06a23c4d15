//! Conversation domain types: messages, tool calls, and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::output::{
    CodeExecutionResult, ExecutableCode, GroundingMetadata, SafetyRating, UsageMetadata,
};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The local user.
    User,
    /// The remote model.
    Model,
    /// The client itself (diagnostics, connection notices).
    System,
}

/// Lifecycle of a server-requested tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// Awaiting user approval.
    Pending,
    /// Approved, not yet dispatched.
    Approved,
    /// Rejected by the user.
    Rejected,
    /// Handler currently running.
    Executing,
    /// Handler finished and the response frame was sent.
    Completed,
    /// Handler failed (or the tool was unknown); an error response was sent.
    Failed,
}

/// A server-emitted request to invoke a named client-side function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id echoed back in the tool response.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Opaque structured arguments.
    pub arguments: Value,
    /// Current lifecycle state.
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// A fresh pending call. Generates an id when the server omitted one.
    #[must_use]
    pub fn new(id: Option<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
        }
    }
}

/// One entry in the session history.
///
/// `audio_data` is grown monotonically by the consolidator as flushes land;
/// it never shrinks or reorders. Readers outside the core receive copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity across UI updates.
    pub id: Uuid,
    /// Who produced this message.
    pub sender: Sender,
    /// Accumulated text content.
    pub content: String,
    /// Complete consolidated audio for this message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<Vec<u8>>,
    /// Tool call attached to this message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Tool response payload attached to this message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<Value>,
    /// Server-generated executable code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_code: Option<ExecutableCode>,
    /// Result of server-side code execution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_execution_result: Option<CodeExecutionResult>,
    /// Safety ratings reported for this message.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub safety_ratings: Vec<SafetyRating>,
    /// Grounding metadata reported for this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingMetadata>,
    /// Token counts for the turn that produced this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetadata>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn blank(sender: Sender) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            content: String::new(),
            audio_data: None,
            tool_call: None,
            tool_response: None,
            executable_code: None,
            code_execution_result: None,
            safety_ratings: Vec::new(),
            grounding: None,
            usage: None,
            timestamp: Utc::now(),
        }
    }

    /// A user message carrying `text`.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::blank(Sender::User)
        }
    }

    /// An empty model message, to be filled as the turn streams in.
    #[must_use]
    pub fn model() -> Self {
        Self::blank(Sender::Model)
    }

    /// A system notice.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::blank(Sender::System)
        }
    }

    /// Append consolidated audio. The caller guarantees `chunk` extends the
    /// stored buffer; the store enforces the monotone-growth invariant.
    pub fn extend_audio(&mut self, chunk: &[u8]) {
        match &mut self.audio_data {
            Some(buf) => buf.extend_from_slice(chunk),
            None => self.audio_data = Some(chunk.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_generates_id_when_missing() {
        let call = ToolCall::new(None, "getTime", Value::Null);
        assert!(!call.id.is_empty());
        assert_eq!(call.status, ToolCallStatus::Pending);
    }

    #[test]
    fn tool_call_keeps_server_id() {
        let call = ToolCall::new(Some("t1".into()), "getTime", Value::Null);
        assert_eq!(call.id, "t1");
    }

    #[test]
    fn extend_audio_grows_monotonically() {
        let mut msg = Message::model();
        msg.extend_audio(&[1, 2, 3]);
        msg.extend_audio(&[4, 5]);
        assert_eq!(msg.audio_data.as_deref(), Some(&[1, 2, 3, 4, 5][..]));
    }
}
