//! # Runtime configuration for a fleet.
//!
//! [`Options`] controls the runner's behavior: the friendly-name tables used
//! for diagnostics, the flap limits compiled into the definition at startup,
//! the transaction channel capacity, the undefined-lookup suppression flags,
//! and the logger.
//!
//! # Example
//! ```
//! use fsmvisor::{Index, Options, Signal};
//!
//! let mut opts = Options::default();
//! opts.state_names.insert(Index(0), "wait".into());
//! opts.signal_names.insert(Signal(0), "start".into());
//! opts.buffer_size = 512;
//! opts.ignore_undefined_transitions = false;
//!
//! assert_eq!(opts.buffer_size, 512);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::logger::Logger;
use crate::types::{Flap, Index, Signal};

/// Default capacity of the transaction channel.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 8;

/// Configuration passed to [`Machines::run`](crate::Machines::run).
#[derive(Clone, Default)]
pub struct Options {
    /// Friendly names of states keyed by index; diagnostics only.
    pub state_names: HashMap<Index, String>,
    /// Friendly names of signals; diagnostics only.
    pub signal_names: HashMap<Signal, String>,
    /// Flap (oscillation) limits compiled into the definition at startup.
    pub limits: Vec<Flap>,
    /// Capacity of the transaction channel. `0` falls back to
    /// [`DEFAULT_BUFFER_SIZE`].
    pub buffer_size: usize,
    /// Suppress `UnknownState` errors from the error channel.
    pub ignore_undefined_states: bool,
    /// Suppress `UnknownTransition` errors from the error channel.
    pub ignore_undefined_transitions: bool,
    /// Suppress `UnknownSignal` errors from the error channel.
    pub ignore_undefined_signals: bool,
    /// Log sink; `None` discards everything.
    pub logger: Option<Arc<dyn Logger>>,
}

impl Options {
    /// Returns the default configuration:
    /// - `buffer_size = 256`
    /// - all three `ignore_undefined_*` flags set
    /// - no name tables, no flap limits, no logger
    ///
    /// The suppression flags default to on because fleets routinely receive
    /// stale signals for states that no longer accept them; flip the flags
    /// off to surface every lookup failure on the error channel.
    pub fn defaults() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            ignore_undefined_states: true,
            ignore_undefined_transitions: true,
            ignore_undefined_signals: true,
            ..Default::default()
        }
    }

    pub(crate) fn effective_buffer(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }
}
