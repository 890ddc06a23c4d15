//! Events emitted by the session core onto the UI event bus.
//!
//! The core is the only producer family; the UI (an external collaborator)
//! is the sole consumer. Payloads are owned values — the UI never receives
//! references into live session state.

use std::time::Duration;

use crate::error::ErrorKind;
use crate::message::ToolCall;
use serde_json::Value;

/// One event on the session → UI mailbox.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The setup handshake completed; the session accepts input.
    SessionReady,

    /// The first frame of a model turn arrived.
    TurnStarted,

    /// A text delta for the current turn, in receive order.
    TextDelta(String),

    /// A consolidated audio chunk began playing.
    PlaybackStarted {
        /// Message the audio belongs to.
        message_index: usize,
        /// Chunk size in bytes.
        bytes: usize,
        /// Estimated duration.
        duration: Duration,
    },

    /// A consolidated audio chunk finished playing.
    PlaybackCompleted {
        /// Message the audio belongs to.
        message_index: usize,
    },

    /// Playback of one chunk failed; the session continues.
    PlaybackError(String),

    /// A tool call awaits user approval.
    ApprovalRequested(ToolCall),

    /// A tool handler finished and its response frame was sent.
    ToolCompleted {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Handler result payload.
        result: Value,
    },

    /// A tool handler failed; an error response frame was sent.
    ToolFailed {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Diagnostic.
        error: String,
    },

    /// The current model turn completed.
    TurnCompleted,

    /// The transport dropped mid-session.
    ConnectionLost(String),

    /// The retry engine is about to sleep before reconnect attempt `attempt`.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
        /// Backoff delay before the attempt.
        next_delay: Duration,
    },

    /// The session hit a terminal error.
    SessionError {
        /// Coarse error classification.
        kind: ErrorKind,
        /// Human-readable diagnostic.
        message: String,
        /// Whether a user-triggered reconnect may succeed.
        retryable: bool,
    },

    /// The session closed; no further events follow.
    SessionClosed,
}
