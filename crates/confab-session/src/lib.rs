//! Session runtime for the confab streaming client.
//!
//! The long-lived core that multiplexes a bidirectional conversation over
//! one transport: it owns the connection state machine, the send and
//! extract pipelines, the adaptive audio consolidator with its serialized
//! playback worker, the tool orchestrator with user approval, and the
//! supervisor that ties every task's lifetime to one cancellation token.
//!
//! Embedders construct a [`Session`], read [`confab_core::SessionEvent`]s
//! from the returned mailbox, and drive it through the handful of methods
//! in the public API (`start`, `send_user_text`, `approve_tool`,
//! `reject_tool`, `close`).

pub mod bus;
pub mod consolidator;
pub mod extract;
pub mod outbound;
pub mod playback;
pub mod send;
pub mod session;
pub mod state;
pub mod store;
pub mod tools;

pub use bus::{DEFAULT_EVENT_CAPACITY, EventBus};
pub use consolidator::{Consolidator, ConsolidatorCmd, ConsolidatorConfig};
pub use extract::extract_output;
pub use outbound::TransportSlot;
pub use playback::{DEFAULT_PLAYBACK_CAPACITY, PlaybackStatus, PlaybackWorker};
pub use send::{build_setup, build_tool_responses, build_user_text};
pub use session::{Session, SessionOptions};
pub use state::{SessionState, StateInput, StateMachine};
pub use store::MessageStore;
pub use tools::{ToolHandler, ToolOrchestrator};
