//! Core domain types and port definitions for the confab streaming client.
//!
//! This crate is I/O-free: it defines the conversation data model, the
//! transport-neutral wire frames, the error taxonomy, the session event
//! vocabulary, and the capability traits (`TransportSession`, `Player`)
//! that the runtime in `confab-session` is written against. Concrete wire
//! protocols live in `confab-transport`.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod output;
pub mod ports;
pub mod wire;

// Re-export commonly used types for convenience
pub use audio::{AudioChunk, with_wav_header};
pub use config::{
    AudioFormat, ClientConfig, DEFAULT_LIVE_MODEL_TOKEN, GenerationConfig, JSON_MIME_TYPE,
    ToolDefinition,
};
pub use error::{ClientError, ErrorKind};
pub use events::SessionEvent;
pub use message::{Message, Sender, ToolCall, ToolCallStatus};
pub use output::{
    CodeExecutionResult, ExecutableCode, FunctionCall, FunctionResponse, GroundingMetadata,
    GroundingSource, SafetyRating, StreamOutput, UsageMetadata,
};
pub use ports::{Player, TransportConnector, TransportSession};
pub use wire::{
    ClientContent, ClientFrame, Modality, Part, ServerContent, ServerFrame, SetupFrame, Turn,
    WireUsage,
};
