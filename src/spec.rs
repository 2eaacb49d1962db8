//! # Compiled machine definition: validation and lookups.
//!
//! [`Spec`] is the immutable product of [`define`](crate::define). Building
//! it runs the consistency checks over the declared states; afterwards the
//! runner only performs lookups. The one post-build mutation is startup
//! augmentation: [`Machines::run`](crate::Machines::run) installs the
//! friendly-name tables and compiles the flap limits before the definition
//! is shared with the loop.

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::types::{ActionRef, Expiry, Flap, Index, Signal, State, VisitLimit};

/// Compiled specification of all the rules for one machine shape.
#[derive(Clone, Default, Debug)]
pub(crate) struct Spec {
    states: HashMap<Index, State>,
    signals: HashSet<Signal>,
    flaps: HashMap<(Index, Index), Flap>,

    state_names: HashMap<Index, String>,
    signal_names: HashMap<Signal, String>,
}

impl Spec {
    /// Validates the declarations and returns a compiled spec, or the first
    /// violation found.
    pub(crate) fn build(declared: Vec<State>) -> Result<Self, Error> {
        if declared.is_empty() {
            return Err(Error::NoStates);
        }

        let mut states = HashMap::with_capacity(declared.len());
        for st in declared {
            if states.contains_key(&st.index) {
                return Err(Error::DuplicateState(st.index));
            }
            states.insert(st.index, st);
        }

        let signals = Self::compile(&states)?;

        Ok(Self {
            states,
            signals,
            ..Default::default()
        })
    }

    /// Referential integrity over the state table. Returns the set of
    /// globally known signals.
    fn compile(states: &HashMap<Index, State>) -> Result<HashSet<Signal>, Error> {
        let mut signals = HashSet::new();

        for st in states.values() {
            for (signal, next) in st.transitions.iter().chain(st.errors.iter()) {
                if !states.contains_key(next) {
                    return Err(Error::UnknownState(*next));
                }
                signals.insert(*signal);
            }
        }

        // Every signal keyed in Actions must also be a transition of the
        // same state.
        for st in states.values() {
            for signal in st.actions.keys() {
                if !st.transitions.contains_key(signal) {
                    return Err(Error::UnknownTransition {
                        signal: *signal,
                        state: st.index,
                    });
                }
            }
        }

        // What TTLs and visit caps raise must be receivable in the state
        // that raises it.
        for st in states.values() {
            if let Some(expiry) = st.ttl {
                if !st.transitions.contains_key(&expiry.raise) {
                    return Err(Error::UnknownSignal {
                        signal: expiry.raise,
                        state: Some(st.index),
                    });
                }
                signals.insert(expiry.raise);
            }
            if let Some(limit) = st.visit {
                if !st.transitions.contains_key(&limit.raise) {
                    return Err(Error::UnknownSignal {
                        signal: limit.raise,
                        state: Some(st.index),
                    });
                }
                signals.insert(limit.raise);
            }
        }

        Ok(signals)
    }

    /// Registers the flap limits. Both orderings of each pair index the same
    /// record; a flap naming an unknown state is fatal.
    pub(crate) fn compile_flapping(&mut self, limits: &[Flap]) -> Result<(), Error> {
        for flap in limits {
            for ix in flap.states {
                if !self.states.contains_key(&ix) {
                    return Err(Error::UnknownState(ix));
                }
            }
            let [a, b] = flap.states;
            self.flaps.insert((a, b), *flap);
            self.flaps.insert((b, a), *flap);
        }
        Ok(())
    }

    /// Installs the friendly-name tables from the runtime options.
    pub(crate) fn set_names(
        &mut self,
        state_names: HashMap<Index, String>,
        signal_names: HashMap<Signal, String>,
    ) {
        if !state_names.is_empty() {
            self.state_names = state_names;
        }
        if !signal_names.is_empty() {
            self.signal_names = signal_names;
        }
    }

    /// True iff the signal is globally known to this definition.
    pub(crate) fn knows(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }

    /// Resolves the transition for `signal` out of `current`, returning the
    /// next state index and the optional action hook.
    pub(crate) fn transition(
        &self,
        current: Index,
        signal: Signal,
    ) -> Result<(Index, Option<ActionRef>), Error> {
        let state = self
            .states
            .get(&current)
            .ok_or(Error::UnknownState(current))?;

        if state.transitions.is_empty() {
            return Err(Error::NoTransitions(current));
        }

        if !self.signals.contains(&signal) {
            return Err(Error::UnknownSignal {
                signal,
                state: None,
            });
        }

        let next = *state
            .transitions
            .get(&signal)
            .ok_or(Error::UnknownTransition {
                signal,
                state: current,
            })?;

        Ok((next, state.actions.get(&signal).cloned()))
    }

    /// The TTL rule for the state, if any.
    pub(crate) fn expiry(&self, state: Index) -> Result<Option<Expiry>, Error> {
        let st = self.states.get(&state).ok_or(Error::UnknownState(state))?;
        Ok(st.ttl)
    }

    /// The visit cap for the state, if any.
    pub(crate) fn visit(&self, state: Index) -> Result<Option<VisitLimit>, Error> {
        let st = self.states.get(&state).ok_or(Error::UnknownState(state))?;
        Ok(st.visit)
    }

    /// The alternate state to land in when the action for `signal` fails in
    /// `current`. `UnknownTransition` when no fallback is declared.
    pub(crate) fn error_target(&self, current: Index, signal: Signal) -> Result<Index, Error> {
        let state = self
            .states
            .get(&current)
            .ok_or(Error::UnknownState(current))?;

        if !self.signals.contains(&signal) {
            return Err(Error::UnknownSignal {
                signal,
                state: Some(current),
            });
        }

        state
            .errors
            .get(&signal)
            .copied()
            .ok_or(Error::UnknownTransition {
                signal,
                state: current,
            })
    }

    /// The oscillation detector registered for the pair, if any. The pair is
    /// order-insensitive.
    pub(crate) fn flap(&self, a: Index, b: Index) -> Option<Flap> {
        self.flaps.get(&(a, b)).copied()
    }

    /// Friendly name of the state; decimal rendering when none registered.
    pub(crate) fn state_name(&self, ix: Index) -> String {
        match self.state_names.get(&ix) {
            Some(name) => name.clone(),
            None => ix.to_string(),
        }
    }

    /// Friendly name of the signal; decimal rendering when none registered.
    pub(crate) fn signal_name(&self, signal: Signal) -> String {
        match self.signal_names.get(&signal) {
            Some(name) => name.clone(),
            None => signal.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn flap_count(&self) -> usize {
        // Both orderings share one record.
        self.flaps.len() / 2
    }
}
