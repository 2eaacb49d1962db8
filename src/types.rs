//! # Core vocabulary: ids, states, signals, and the declarative state builder.
//!
//! This module defines the small value types the whole crate speaks in:
//!
//! - [`Id`] identifies one FSM instance within a fleet.
//! - [`Index`] identifies a state; [`INVALID_STATE`] is the reserved sentinel.
//! - [`Signal`] identifies a stimulus that drives transitions.
//! - [`Expiry`], [`VisitLimit`], [`Flap`] declare the time-driven behaviors.
//! - [`State`] is the fluent declaration compiled by [`define`](crate::define).
//! - [`Action`] / [`ActionFn`] are the per-transition callback hook.
//!
//! All tags compare by their integer value only; human-readable names are
//! attached separately through [`Options`](crate::Options) and used for
//! diagnostics.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ActionError;

/// Unique id of an instance within one fleet. Assigned monotonically by the
/// runner; gap-free for the lifetime of the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub u64);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a state in a machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index(pub i64);

/// Reserved index meaning "no state". Returned by snapshot reads once the
/// runner is gone; never a valid state index in a definition.
pub const INVALID_STATE: Index = Index(-99999);

impl Index {
    /// True iff this is the reserved [`INVALID_STATE`] sentinel.
    pub fn is_invalid(&self) -> bool {
        *self == INVALID_STATE
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stimulus recognized by the machine definition. Two signals are the same
/// stimulus iff their integers are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signal(pub i64);

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of the runner's logical clock. TTL budgets are expressed in
/// ticks; nothing here corresponds to wall time unless the fleet runs
/// against [`Clock::wall`](crate::Clock::wall).
pub type Tick = i64;

/// Logical instant maintained by the runner. Also carries the instance
/// deadline sentinels: `0` = no deadline, `-1` = just removed from the queue.
pub(crate) type Time = i64;

/// TTL rule for a state: after `ttl` ticks in the state, `raise` is
/// auto-raised against the instance. `ttl == 0` means no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub ttl: Tick,
    pub raise: Signal,
}

/// Cap on how many times an instance may enter a state. When the visit
/// counter reaches `value`, `raise` is auto-raised. `value == 0` means no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitLimit {
    pub value: u32,
    pub raise: Signal,
}

/// Oscillation detector on an unordered pair of states.
///
/// Once the instance has completed `count` round trips between the two
/// states, `raise` is auto-raised and the in-flight transition is
/// superseded. The pair is order-insensitive; compilation registers both
/// orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flap {
    pub states: [Index; 2],
    pub count: u32,
    pub raise: Signal,
}

/// Opaque payload attached to an instance via
/// [`Fsm::signal_with`](crate::Fsm::signal_with).
pub type Data = Arc<dyn Any + Send + Sync>;

/// Shared handle to an action callback.
pub type ActionRef = Arc<dyn Action>;

/// View of a transition handed to an [`Action`].
///
/// The scope is a plain snapshot taken by the worker right before the action
/// runs: the instance id, the state the machine is leaving, the computed
/// next state, the signal that fired, and the currently attached data
/// (including data attached by this very delivery).
pub struct ActionContext {
    pub id: Id,
    pub from: Index,
    pub to: Index,
    pub signal: Signal,
    pub(crate) data: Option<Data>,
}

impl ActionContext {
    /// The data attached to the instance at the time the action runs.
    pub fn data(&self) -> Option<Data> {
        self.data.clone()
    }
}

/// Per-transition side-effect hook.
///
/// Actions execute synchronously on the runner's transaction worker, between
/// the transition lookup and the state update. A slow action stalls the
/// entire fleet; offload long work from inside the callback if that matters.
/// Returning an error redirects the transition to the state's declared
/// error fallback, when one exists.
///
/// # Example
/// ```
/// use fsmvisor::{Action, ActionContext, ActionError};
///
/// struct Provision;
///
/// impl Action for Provision {
///     fn call(&self, cx: &ActionContext) -> Result<(), ActionError> {
///         if cx.data().is_none() {
///             return Err(ActionError::new("no provisioning request attached"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Action: Send + Sync + 'static {
    /// Executes the hook. An `Err` engages the state's error fallback rule.
    fn call(&self, cx: &ActionContext) -> Result<(), ActionError>;
}

impl std::fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Action")
    }
}

/// Function-backed action implementation.
///
/// Wraps a closure `Fn(&ActionContext) -> Result<(), ActionError>`. Use
/// [`ActionFn::arc`] for a one-liner that returns an [`ActionRef`].
///
/// # Example
/// ```
/// use fsmvisor::{ActionFn, ActionRef};
///
/// let log: ActionRef = ActionFn::arc(|cx| {
///     println!("instance {} leaving {}", cx.id, cx.from);
///     Ok(())
/// });
/// ```
pub struct ActionFn<F>
where
    F: Fn(&ActionContext) -> Result<(), ActionError> + Send + Sync + 'static,
{
    func: F,
}

impl<F> ActionFn<F>
where
    F: Fn(&ActionContext) -> Result<(), ActionError> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }

    /// Creates the action and returns it as a shared handle.
    pub fn arc(func: F) -> ActionRef {
        Arc::new(Self::new(func))
    }
}

impl<F> Action for ActionFn<F>
where
    F: Fn(&ActionContext) -> Result<(), ActionError> + Send + Sync + 'static,
{
    fn call(&self, cx: &ActionContext) -> Result<(), ActionError> {
        (self.func)(cx)
    }
}

/// Declarative description of one state: its outgoing transitions, the
/// actions and error fallbacks keyed by signal, and the optional TTL and
/// visit cap.
///
/// Built fluently and handed to [`define`](crate::define):
///
/// ```
/// use fsmvisor::{define, Index, Signal, State};
///
/// const WAIT: Index = Index(0);
/// const RUNNING: Index = Index(1);
/// const START: Signal = Signal(0);
///
/// let machines = define(vec![
///     State::new(WAIT).on(START, RUNNING).ttl(5, START),
///     State::new(RUNNING),
/// ])
/// .unwrap();
/// # drop(machines);
/// ```
#[derive(Clone)]
pub struct State {
    pub(crate) index: Index,
    pub(crate) transitions: HashMap<Signal, Index>,
    pub(crate) actions: HashMap<Signal, ActionRef>,
    pub(crate) errors: HashMap<Signal, Index>,
    pub(crate) ttl: Option<Expiry>,
    pub(crate) visit: Option<VisitLimit>,
}

impl State {
    /// Starts a declaration for the state at `index`. A state with no
    /// [`on`](State::on) rules is terminal: attempting any transition from
    /// it fails with `NoTransitions`.
    pub fn new(index: Index) -> Self {
        Self {
            index,
            transitions: HashMap::new(),
            actions: HashMap::new(),
            errors: HashMap::new(),
            ttl: None,
            visit: None,
        }
    }

    /// Declares that `signal` moves the machine to `next`. Signals are
    /// unique per state; a repeated signal overwrites the earlier rule.
    pub fn on(mut self, signal: Signal, next: Index) -> Self {
        self.transitions.insert(signal, next);
        self
    }

    /// Attaches an action to run when `signal` fires from this state. The
    /// signal must also appear in a [`on`](State::on) rule; `define`
    /// rejects the declaration otherwise.
    pub fn action(mut self, signal: Signal, action: ActionRef) -> Self {
        self.actions.insert(signal, action);
        self
    }

    /// Declares the alternate state to land in when the action for `signal`
    /// fails.
    pub fn on_error(mut self, signal: Signal, alternate: Index) -> Self {
        self.errors.insert(signal, alternate);
        self
    }

    /// Gives the state a TTL of `ticks`, raising `raise` on expiry. A zero
    /// or negative `ticks` declares no TTL.
    pub fn ttl(mut self, ticks: Tick, raise: Signal) -> Self {
        self.ttl = if ticks > 0 {
            Some(Expiry { ttl: ticks, raise })
        } else {
            None
        };
        self
    }

    /// Caps entries into this state at `value`, raising `raise` when the
    /// counter reaches the cap. A zero `value` declares no cap.
    pub fn visit_limit(mut self, value: u32, raise: Signal) -> Self {
        self.visit = if value > 0 {
            Some(VisitLimit { value, raise })
        } else {
            None
        };
        self
    }

    pub fn index(&self) -> Index {
        self.index
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("index", &self.index)
            .field("transitions", &self.transitions)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("errors", &self.errors)
            .field("ttl", &self.ttl)
            .field("visit", &self.visit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_predicate() {
        assert!(INVALID_STATE.is_invalid());
        assert!(!Index(0).is_invalid());
        assert!(!Index(-1).is_invalid());
    }

    #[test]
    fn tags_render_decimal() {
        assert_eq!(Index(42).to_string(), "42");
        assert_eq!(Signal(-7).to_string(), "-7");
        assert_eq!(Id(9).to_string(), "9");
    }

    #[test]
    fn zero_ttl_and_visit_declare_nothing() {
        let s = State::new(Index(0))
            .on(Signal(1), Index(0))
            .ttl(0, Signal(1))
            .visit_limit(0, Signal(1));
        assert!(s.ttl.is_none());
        assert!(s.visit.is_none());
    }

    #[test]
    fn builder_collects_rules() {
        let noop = ActionFn::arc(|_| Ok(()));
        let s = State::new(Index(1))
            .on(Signal(0), Index(2))
            .action(Signal(0), noop)
            .on_error(Signal(0), Index(3))
            .ttl(5, Signal(0))
            .visit_limit(2, Signal(0));

        assert_eq!(s.transitions[&Signal(0)], Index(2));
        assert!(s.actions.contains_key(&Signal(0)));
        assert_eq!(s.errors[&Signal(0)], Index(3));
        assert_eq!(s.ttl.unwrap().ttl, 5);
        assert_eq!(s.visit.unwrap().value, 2);
    }
}
