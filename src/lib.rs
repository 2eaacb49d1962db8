//! # fsmvisor
//!
//! **Fsmvisor** is a runtime for operating a fleet of identical finite
//! state machine instances under one declarative specification, with
//! time-driven behaviors.
//!
//! Declare the machine shape once — states, signals, transitions,
//! per-transition actions, per-state TTLs and visit caps, cross-state flap
//! detectors — then allocate as many instances as you need. A single
//! serialized event loop drives every transition in response to external
//! signals, logical clock ticks, visit thresholds, and oscillation
//! thresholds, and recovers from action failures via declared fallback
//! states.
//!
//! ## Features
//!
//! | Area            | Description                                                        | Key types                                |
//! |-----------------|--------------------------------------------------------------------|------------------------------------------|
//! | **Definition**  | Declare states, transitions, hooks; compiled with full validation. | [`State`], [`define`]                    |
//! | **Fleet**       | Allocate and drive many instances of one shape.                    | [`Machines`], [`Fsm`]                    |
//! | **Time**        | Logical clock with TTL expirations per state.                      | [`Clock`], [`Expiry`]                    |
//! | **Guards**      | Visit caps and flap (oscillation) detectors that auto-raise.       | [`VisitLimit`], [`Flap`]                 |
//! | **Actions**     | Synchronous per-transition hooks with failure redirects.           | [`Action`], [`ActionFn`]                 |
//! | **Errors**      | Typed taxonomy plus a lossy classified-report channel.             | [`Error`], [`Report`]                    |
//! | **Diagnostics** | Friendly name tables and a pluggable log sink.                     | [`Options`], [`Logger`]                  |
//!
//! ## Quick start
//!
//! ```no_run
//! use fsmvisor::{define, Clock, Index, Options, Signal, State};
//!
//! const WAIT: Index = Index(0);
//! const RUNNING: Index = Index(1);
//! const START: Signal = Signal(0);
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), fsmvisor::Error> {
//!     // wait times out after 5 ticks and starts itself.
//!     let mut machines = define(vec![
//!         State::new(WAIT).on(START, RUNNING).ttl(5, START),
//!         State::new(RUNNING),
//!     ])?;
//!
//!     let clock = Clock::manual();
//!     machines.run(&clock, Options::defaults())?;
//!
//!     let fsm = machines.new_fsm(WAIT).await?;
//!     assert_eq!(fsm.state().await, WAIT);
//!
//!     clock.ticks(5).await;
//!     // ...the TTL raises START and the instance lands in RUNNING.
//!
//!     machines.done();
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! Cooperative single-writer: one transaction worker performs every
//! mutation, a dispatcher multiplexes inputs into its stream, and all
//! observation goes through serialized snapshots. [`Fsm::state`] reflects
//! every transaction accepted before the snapshot ran; actions execute
//! inline on the worker, so a slow action stalls the whole fleet.
//!
//! ---

mod bus;
mod clock;
mod error;
mod flap;
mod instance;
mod logger;
mod machines;
mod options;
mod queue;
mod runner;
mod spec;
mod types;

// ---- Public re-exports ----

pub use bus::Report;
pub use clock::Clock;
pub use error::{ActionError, Error};
pub use instance::Fsm;
pub use logger::{ConsoleLogger, Logger, NopLogger};
pub use machines::{define, Machines};
pub use options::{Options, DEFAULT_BUFFER_SIZE};
pub use types::{
    Action, ActionContext, ActionFn, ActionRef, Data, Expiry, Flap, Id, Index, Signal, State,
    Tick, VisitLimit, INVALID_STATE,
};
