//! # Error types used by the fleet runtime and by action callbacks.
//!
//! This module defines two error types:
//!
//! - [`Error`] — failures raised while building a definition or driving
//!   transitions.
//! - [`ActionError`] — failures returned by user action callbacks; these
//!   engage the state's declared error fallback rather than failing the
//!   transition.
//!
//! [`Error`] provides `as_label` for stable snake_case tags in logs.
//! Messages here render the raw integer tags; the runner re-renders
//! classified errors with the friendly names from
//! [`Options`](crate::Options) before publishing them.

use thiserror::Error;

use crate::types::{Id, Index, Signal};

/// Errors produced while compiling a definition or running a fleet.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Two state declarations carry the same index.
    #[error("duplicate state index: {0}")]
    DuplicateState(Index),

    /// A referenced state index is not defined.
    #[error("unknown state: {0}")]
    UnknownState(Index),

    /// The signal is not in the definition's known set.
    #[error("unknown signal: {signal}, state={state:?}")]
    UnknownSignal {
        signal: Signal,
        /// The state in which the signal was encountered, when there is one.
        state: Option<Index>,
    },

    /// The signal is known globally but not allowed from this state.
    #[error("unknown transition: signal={signal}, state={state}")]
    UnknownTransition { signal: Signal, state: Index },

    /// A transition was attempted from a terminal state.
    #[error("no transitions defined for state {0}")]
    NoTransitions(Index),

    /// No instance with this id exists in the registry.
    #[error("unknown instance: {0}")]
    UnknownFsm(Id),

    /// A definition was built from an empty state list.
    #[error("definition has no states")]
    NoStates,

    /// The fleet is not running: `run` was never called, or `done` has
    /// already torn the loop down.
    #[error("fleet is not running")]
    NotRunning,
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::DuplicateState(_) => "duplicate_state",
            Error::UnknownState(_) => "unknown_state",
            Error::UnknownSignal { .. } => "unknown_signal",
            Error::UnknownTransition { .. } => "unknown_transition",
            Error::NoTransitions(_) => "no_transitions",
            Error::UnknownFsm(_) => "unknown_fsm",
            Error::NoStates => "no_states",
            Error::NotRunning => "not_running",
        }
    }

    /// True for the lookup failures that the `ignore_undefined_*` options
    /// can suppress.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Error::UnknownState(_)
                | Error::UnknownSignal { .. }
                | Error::UnknownTransition { .. }
        )
    }
}

/// Failure returned by an [`Action`](crate::Action) callback.
///
/// An action error never aborts the transition: the runner redirects to the
/// state's declared error fallback when one exists, and otherwise reports
/// and proceeds to the originally computed next state.
#[derive(Error, Debug, Clone)]
#[error("action failed: {reason}")]
pub struct ActionError {
    reason: String,
}

impl ActionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(Error::UnknownState(Index(3)).as_label(), "unknown_state");
        assert_eq!(
            Error::UnknownTransition {
                signal: Signal(1),
                state: Index(0)
            }
            .as_label(),
            "unknown_transition"
        );
        assert_eq!(Error::NotRunning.as_label(), "not_running");
    }

    #[test]
    fn lookup_classification() {
        assert!(Error::UnknownState(Index(1)).is_lookup());
        assert!(Error::UnknownSignal {
            signal: Signal(1),
            state: None
        }
        .is_lookup());
        assert!(!Error::DuplicateState(Index(1)).is_lookup());
        assert!(!Error::NotRunning.is_lookup());
    }
}
