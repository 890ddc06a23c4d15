//! Session connection state machine.
//!
//! ```text
//!   Initializing → Ready → Waiting → Responding → Ready
//!        ▲                                │
//!        └──────────── Error ◄────────────┘ (non-retryable failure,
//!                        │                   from any state)
//!                        └── reconnect
//!   any → Quitting on close (terminal)
//! ```
//!
//! Exactly one transition may occur per input. Inputs arriving in states
//! where they are not legal are logged and dropped.

use serde::{Deserialize, Serialize};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transport opening / setup handshake in flight.
    Initializing,
    /// Connected and idle; accepts user input.
    Ready,
    /// Outbound user message sent, awaiting first response frame.
    Waiting,
    /// Receiving a model turn.
    Responding,
    /// Terminal-until-reconnect failure state.
    Error,
    /// Shutting down. Terminal.
    Quitting,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInput {
    /// The server acknowledged the setup frame.
    SetupComplete,
    /// A user message was sent.
    UserMessageSent,
    /// The first non-setup frame of a turn arrived.
    ResponseFrame,
    /// The turn-complete marker arrived.
    TurnComplete,
    /// A non-retryable failure occurred.
    Failure,
    /// A reconnect was initiated.
    Reconnect,
    /// The session is closing.
    Close,
}

/// The state machine itself. Owned by the session; mutated behind a mutex.
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// A machine in `Initializing`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Initializing,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Apply one input. Returns the new state when a transition occurred;
    /// `None` when the input was dropped.
    pub fn apply(&mut self, input: StateInput) -> Option<SessionState> {
        use SessionState as S;
        use StateInput as I;

        let next = match (self.state, input) {
            // Close wins from everywhere except once already quitting.
            (S::Quitting, _) => None,
            (_, I::Close) => Some(S::Quitting),

            (_, I::Failure) => Some(S::Error),
            (S::Error, I::Reconnect) => Some(S::Initializing),

            (S::Initializing, I::SetupComplete) => Some(S::Ready),
            (S::Ready, I::UserMessageSent) => Some(S::Waiting),
            (S::Waiting, I::ResponseFrame) => Some(S::Responding),
            (S::Responding, I::TurnComplete) | (S::Waiting, I::TurnComplete) => Some(S::Ready),

            // Benign repeats: more frames while already responding.
            (S::Responding, I::ResponseFrame) => None,

            _ => {
                tracing::warn!(state = ?self.state, ?input, "Dropping input illegal in this state");
                return None;
            }
        };

        if let Some(next) = next {
            tracing::debug!(from = ?self.state, to = ?next, "Session state transition");
            self.state = next;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_turn_cycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(StateInput::SetupComplete), Some(SessionState::Ready));
        assert_eq!(
            sm.apply(StateInput::UserMessageSent),
            Some(SessionState::Waiting)
        );
        assert_eq!(
            sm.apply(StateInput::ResponseFrame),
            Some(SessionState::Responding)
        );
        assert_eq!(sm.apply(StateInput::TurnComplete), Some(SessionState::Ready));
    }

    #[test]
    fn repeated_response_frames_do_not_transition() {
        let mut sm = StateMachine::new();
        sm.apply(StateInput::SetupComplete);
        sm.apply(StateInput::UserMessageSent);
        sm.apply(StateInput::ResponseFrame);
        assert_eq!(sm.apply(StateInput::ResponseFrame), None);
        assert_eq!(sm.state(), SessionState::Responding);
    }

    #[test]
    fn failure_from_any_state_then_reconnect() {
        let mut sm = StateMachine::new();
        sm.apply(StateInput::SetupComplete);
        assert_eq!(sm.apply(StateInput::Failure), Some(SessionState::Error));
        assert_eq!(
            sm.apply(StateInput::Reconnect),
            Some(SessionState::Initializing)
        );
    }

    #[test]
    fn illegal_inputs_are_dropped() {
        let mut sm = StateMachine::new();
        // Cannot send before setup completes.
        assert_eq!(sm.apply(StateInput::UserMessageSent), None);
        assert_eq!(sm.state(), SessionState::Initializing);
        // Reconnect only makes sense from Error.
        assert_eq!(sm.apply(StateInput::Reconnect), None);
    }

    #[test]
    fn quitting_is_terminal() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(StateInput::Close), Some(SessionState::Quitting));
        assert_eq!(sm.apply(StateInput::SetupComplete), None);
        assert_eq!(sm.apply(StateInput::Failure), None);
        assert_eq!(sm.state(), SessionState::Quitting);
    }

    #[test]
    fn turn_can_complete_without_content() {
        let mut sm = StateMachine::new();
        sm.apply(StateInput::SetupComplete);
        sm.apply(StateInput::UserMessageSent);
        assert_eq!(sm.apply(StateInput::TurnComplete), Some(SessionState::Ready));
    }
}
