//! # The fleet facade: define a shape, run it, allocate instances.
//!
//! [`define`] compiles a set of [`State`](crate::State) declarations into a
//! [`Machines`] value. [`Machines::run`] launches the event loop against a
//! [`Clock`]; [`Machines::new_fsm`] then allocates instances sharing the
//! compiled shape, and [`Machines::done`] winds everything down.
//!
//! ```no_run
//! use fsmvisor::{define, Clock, Index, Options, Signal, State};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fsmvisor::Error> {
//! const WAIT: Index = Index(0);
//! const RUNNING: Index = Index(1);
//! const START: Signal = Signal(0);
//!
//! let mut machines = define(vec![
//!     State::new(WAIT).on(START, RUNNING).ttl(5, START),
//!     State::new(RUNNING),
//! ])?;
//!
//! let clock = Clock::manual();
//! machines.run(&clock, Options::defaults())?;
//!
//! let fsm = machines.new_fsm(WAIT).await?;
//! clock.ticks(5).await;
//! // ... the TTL drives the instance into RUNNING
//! # let _ = fsm;
//! machines.done();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::{Bus, Report};
use crate::clock::Clock;
use crate::error::Error;
use crate::instance::Fsm;
use crate::options::Options;
use crate::runner::Runner;
use crate::spec::Spec;
use crate::types::{Index, Signal, State};

/// Capacity of the error report bus.
const ERROR_BUS_CAPACITY: usize = 1024;

/// Compiles the state declarations and returns the fleet facade, or the
/// first consistency violation found.
pub fn define(states: Vec<State>) -> Result<Machines, Error> {
    let spec = Spec::build(states)?;
    Ok(Machines {
        spec,
        shared: None,
        bus: Bus::new(ERROR_BUS_CAPACITY),
        runner: None,
        clock: None,
        started: false,
    })
}

/// A compiled machine shape plus the runtime that drives its instances.
pub struct Machines {
    /// The declaration-time compile; cloned and augmented at each `run`.
    spec: Spec,
    /// The augmented definition shared with the running loop.
    shared: Option<Arc<Spec>>,
    bus: Bus,
    runner: Option<Runner>,
    clock: Option<Clock>,
    started: bool,
}

impl Machines {
    /// Starts the event loop against `clock` with the given options.
    ///
    /// Installs the friendly-name tables, compiles the flap limits into the
    /// definition, spawns the runner, and starts the clock. Must be called
    /// before [`new_fsm`](Machines::new_fsm).
    ///
    /// # Panics
    /// Panics when called twice without an intervening
    /// [`done`](Machines::done), and when `clock` is already driving
    /// another fleet.
    pub fn run(&mut self, clock: &Clock, options: Options) -> Result<(), Error> {
        if self.runner.is_some() {
            panic!("programming error: run() called twice without done()");
        }

        let mut compiled = self.spec.clone();
        compiled.set_names(options.state_names.clone(), options.signal_names.clone());
        compiled.compile_flapping(&options.limits)?;

        let Some(clock_rx) = clock.take_receiver() else {
            panic!("programming error: clock is already driving a runner");
        };

        let shared = Arc::new(compiled);
        self.shared = Some(shared.clone());
        self.runner = Some(Runner::launch(shared, clock_rx, options, self.bus.clone()));
        self.clock = Some(clock.clone());
        self.started = true;

        clock.start();
        Ok(())
    }

    /// Allocates a new instance starting in `initial`.
    ///
    /// Fails with `NotRunning` before [`run`](Machines::run) or after
    /// [`done`](Machines::done), and with `UnknownState` when `initial` is
    /// not part of the definition.
    pub async fn new_fsm(&self, initial: Index) -> Result<Fsm, Error> {
        let runner = self.runner.as_ref().ok_or(Error::NotRunning)?;
        runner.alloc(initial).await
    }

    /// Stops the loop and releases its resources: the clock stops, the
    /// dispatcher drops out, and the worker finishes the transactions
    /// already queued before exiting. Idempotent after the first call.
    ///
    /// # Panics
    /// Panics when called before [`run`](Machines::run) was ever called.
    pub fn done(&mut self) {
        if !self.started {
            panic!("programming error: done() called before run()");
        }

        if let Some(runner) = self.runner.take() {
            runner.stop();
        }
        if let Some(clock) = self.clock.take() {
            clock.stop();
        }
    }

    /// Subscribes to classified runtime errors.
    ///
    /// The bus is lossy: reports published while no subscriber exists are
    /// dropped. Subscribe before [`run`](Machines::run) for lossless
    /// capture.
    pub fn errors(&self) -> broadcast::Receiver<Report> {
        self.bus.subscribe()
    }

    /// Friendly rendering of a state index; decimal when no name was
    /// registered.
    pub fn state_name(&self, ix: Index) -> String {
        match &self.shared {
            Some(spec) => spec.state_name(ix),
            None => self.spec.state_name(ix),
        }
    }

    /// Friendly rendering of a signal; decimal when no name was registered.
    pub fn signal_name(&self, signal: Signal) -> String {
        match &self.shared {
            Some(spec) => spec.signal_name(signal),
            None => self.spec.signal_name(signal),
        }
    }
}
