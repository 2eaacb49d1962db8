//! # The event loop: one dispatcher, one transaction worker.
//!
//! The runner multiplexes three asynchronous sources — external signal
//! events, clock ticks, and reader snapshots — onto a single ordered stream
//! of transactions consumed by exactly one worker task. The worker is the
//! sole mutation point for all runner state, which is what gives the crate
//! its ordering guarantees.
//!
//! # High-level architecture:
//!
//! ```text
//!  Fsm::signal ──► events ─┐
//!  Fsm::state ───► reads ──┤  dispatcher   ┌───────────────┐
//!  Clock ────────► ticks ──┼──(biased ─────►  transactions  │
//!  stop token ────────────┘    select)     └───────┬───────┘
//!                                                  ▼
//!  Machines::new_fsm ── alloc ──────────►  transaction worker
//!                                          │ registry, deadline heap,
//!   TTL / visit / flap raises ◄────────────┘ logical clock, error
//!        (re-enter the stream)               classification
//! ```
//!
//! - The dispatcher only wraps arrivals; it never touches state. Its select
//!   is biased events-before-reads, so a read submitted after a signal was
//!   accepted always observes that signal's transition.
//! - Internal raises (TTL expiry, visit caps, flap trips) re-enter the
//!   transaction stream directly, behind everything already queued, so
//!   machine-driven transitions stay ordered with user inputs in flight. A
//!   full buffer diverts the raise to a worker-local overflow flushed ahead
//!   of the next receive; the worker never blocks on its own channel.
//! - On stop the dispatcher drops out, and the worker finishes whatever is
//!   already queued before exiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Report};
use crate::error::Error;
use crate::instance::{DataSlot, Fsm, Instance};
use crate::logger::{Logger, NopLogger};
use crate::options::Options;
use crate::queue::DeadlineQueue;
use crate::spec::Spec;
use crate::types::{ActionContext, Data, Id, Index, Signal, Time};

/// Signal delivery targeting one instance.
pub(crate) struct SignalEvent {
    pub(crate) id: Id,
    pub(crate) signal: Signal,
    pub(crate) data: Option<Data>,
}

/// Serialized read against the worker's state.
pub(crate) type ReadFn = Box<dyn FnOnce(&RunnerCore) + Send>;

/// One unit of work executed by the transaction worker.
enum Txn {
    Tick,
    Event(SignalEvent),
    Read(ReadFn),
    Alloc {
        initial: Index,
        data: DataSlot,
        reply: oneshot::Sender<Result<Id, Error>>,
    },
}

/// Handle to a running loop, owned by the [`Machines`](crate::Machines)
/// facade.
pub(crate) struct Runner {
    spec: Arc<Spec>,
    events_tx: mpsc::Sender<SignalEvent>,
    reads_tx: mpsc::Sender<ReadFn>,
    txns_tx: mpsc::Sender<Txn>,
    stop: CancellationToken,
}

impl Runner {
    /// Spawns the dispatcher and the transaction worker against the given
    /// tick stream.
    pub(crate) fn launch(
        spec: Arc<Spec>,
        clock_rx: mpsc::Receiver<()>,
        options: Options,
        bus: Bus,
    ) -> Self {
        let buffer = options.effective_buffer();
        let (events_tx, events_rx) = mpsc::channel(1);
        let (reads_tx, reads_rx) = mpsc::channel(1);
        let (txns_tx, txns_rx) = mpsc::channel(buffer);
        let stop = CancellationToken::new();

        let log: Arc<dyn Logger> = options
            .logger
            .clone()
            .unwrap_or_else(|| Arc::new(NopLogger));

        let worker = Worker {
            core: RunnerCore {
                spec: spec.clone(),
                options,
                log,
                bus,
                now: 0,
                next_id: 0,
                instances: HashMap::new(),
                deadlines: DeadlineQueue::new(),
            },
            txns_tx: txns_tx.clone(),
            overflow: VecDeque::new(),
        };

        tokio::spawn(worker.run(txns_rx, stop.clone()));
        tokio::spawn(dispatch(
            clock_rx,
            events_rx,
            reads_rx,
            txns_tx.clone(),
            stop.clone(),
        ));

        Self {
            spec,
            events_tx,
            reads_tx,
            txns_tx,
            stop,
        }
    }

    /// Allocates an instance through the transaction stream, keeping the id
    /// sequence gap-free and the queue insertion race-free.
    pub(crate) async fn alloc(&self, initial: Index) -> Result<Fsm, Error> {
        let data: DataSlot = Default::default();
        let (reply, rx) = oneshot::channel();

        self.txns_tx
            .send(Txn::Alloc {
                initial,
                data: data.clone(),
                reply,
            })
            .await
            .map_err(|_| Error::NotRunning)?;

        let id = rx.await.map_err(|_| Error::NotRunning)??;

        Ok(Fsm::new(
            id,
            self.spec.clone(),
            data,
            self.events_tx.clone(),
            self.reads_tx.clone(),
        ))
    }

    /// Signals the loop to wind down. Idempotent.
    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }
}

/// Multiplexes the input sources into the transaction stream.
///
/// Exits when the tick channel closes (the clock was stopped), when the
/// stop token fires, or when the worker is gone.
async fn dispatch(
    mut clock_rx: mpsc::Receiver<()>,
    mut events_rx: mpsc::Receiver<SignalEvent>,
    mut reads_rx: mpsc::Receiver<ReadFn>,
    txns_tx: mpsc::Sender<Txn>,
    stop: CancellationToken,
) {
    loop {
        let txn = tokio::select! {
            biased;
            ev = events_rx.recv() => match ev {
                Some(ev) => Txn::Event(ev),
                None => break,
            },
            read = reads_rx.recv() => match read {
                Some(read) => Txn::Read(read),
                None => break,
            },
            tick = clock_rx.recv() => match tick {
                Some(()) => Txn::Tick,
                None => break,
            },
            _ = stop.cancelled() => break,
        };

        if txns_tx.send(txn).await.is_err() {
            break;
        }
    }
}

/// Mutable state owned by the transaction worker. Reader snapshots receive
/// a shared borrow of this, serialized with every other transaction.
pub(crate) struct RunnerCore {
    spec: Arc<Spec>,
    options: Options,
    log: Arc<dyn Logger>,
    bus: Bus,
    /// Logical clock; advanced only by tick transactions.
    now: Time,
    next_id: u64,
    instances: HashMap<Id, Instance>,
    deadlines: DeadlineQueue,
}

impl RunnerCore {
    pub(crate) fn instance(&self, id: Id) -> Option<&Instance> {
        self.instances.get(&id)
    }
}

struct Worker {
    core: RunnerCore,
    /// For internal raises back onto the transaction stream.
    txns_tx: mpsc::Sender<Txn>,
    /// Raises that found the channel full; flushed ahead of the next
    /// receive.
    overflow: VecDeque<Txn>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Txn>, stop: CancellationToken) {
        loop {
            self.flush_overflow();
            tokio::select! {
                biased;
                maybe = rx.recv() => match maybe {
                    Some(txn) => self.apply(txn),
                    None => break,
                },
                _ = stop.cancelled() => {
                    self.drain(&mut rx);
                    break;
                }
            }
        }
        self.core.log.info("shutting down");
    }

    /// Finishes everything already queued, including raises the drained
    /// transactions generate along the way.
    fn drain(&mut self, rx: &mut mpsc::Receiver<Txn>) {
        loop {
            match rx.try_recv() {
                Ok(txn) => self.apply(txn),
                Err(_) => match self.overflow.pop_front() {
                    Some(txn) => self.apply(txn),
                    None => break,
                },
            }
        }
    }

    fn flush_overflow(&mut self) {
        while let Some(txn) = self.overflow.pop_front() {
            if let Err(err) = self.txns_tx.try_send(txn) {
                match err {
                    TrySendError::Full(txn) | TrySendError::Closed(txn) => {
                        self.overflow.push_front(txn);
                    }
                }
                break;
            }
        }
    }

    fn apply(&mut self, txn: Txn) {
        match txn {
            Txn::Tick => {
                if let Err(err) = self.handle_tick() {
                    self.report(err, "clock tick".to_string());
                }
            }
            Txn::Event(ev) => {
                let context = format!("instance={} signal={}", ev.id, ev.signal);
                if let Err(err) = self.handle_event(ev) {
                    self.report(err, context);
                }
            }
            Txn::Read(read) => read(&self.core),
            Txn::Alloc {
                initial,
                data,
                reply,
            } => {
                let _ = reply.send(self.alloc(initial, data));
            }
        }
    }

    /// Creates the registry record, seeds the visit counter, and queues the
    /// initial deadline when the state carries a TTL.
    fn alloc(&mut self, initial: Index, data: DataSlot) -> Result<Id, Error> {
        let id = Id(self.core.next_id);
        self.core
            .instances
            .insert(id, Instance::new(id, initial, self.core.now, data));

        if let Err(err) = self.process_deadline(id, initial) {
            self.core.instances.remove(&id);
            return Err(err);
        }
        self.core.next_id += 1;

        let inst = &self.core.instances[&id];
        if inst.queue_pos.is_some() {
            self.core.log.debug(&format!(
                "allocated: id={id} initial={} deadline={} queue_pos={:?}",
                self.core.spec.state_name(initial),
                inst.deadline,
                inst.queue_pos
            ));
        }
        Ok(id)
    }

    /// Advances the logical clock and drains every queue entry whose
    /// deadline has passed, raising each state's TTL signal. Entries whose
    /// deadline was cleared between queueing and popping are skipped.
    fn handle_tick(&mut self) -> Result<(), Error> {
        self.core.now += 1;
        let now = self.core.now;
        self.core.log.debug(&format!(
            "clock tick: now={now} queued={}",
            self.core.deadlines.len()
        ));

        if self.core.deadlines.is_empty() {
            return Ok(());
        }

        while let Some(head) = self.core.deadlines.peek() {
            let head_deadline = self
                .core
                .instances
                .get(&head)
                .map(|inst| inst.deadline)
                .unwrap_or(0);
            if head_deadline > now {
                break;
            }

            let id = self
                .core
                .deadlines
                .dequeue(&mut self.core.instances)
                .expect("peeked entry dequeues");

            let (deadline, state) = {
                let inst = &self.core.instances[&id];
                (inst.deadline, inst.state)
            };

            // A deadline at or below zero means the entry went stale before
            // it surfaced; nothing to raise.
            if deadline > 0 {
                if let Some(expiry) = self.core.spec.expiry(state)? {
                    self.core.log.debug(&format!(
                        "deadline exceeded: id={id} now={now} raise={}",
                        self.core.spec.signal_name(expiry.raise)
                    ));
                    self.raise(id, expiry.raise);
                }
            }

            if let Some(inst) = self.core.instances.get_mut(&id) {
                inst.deadline = -1;
            }
        }
        Ok(())
    }

    /// The transition engine. Runs entirely on the worker; either commits
    /// the full transition (state, visits, deadline, possible raise) or
    /// returns the lookup error with no net change.
    fn handle_event(&mut self, ev: SignalEvent) -> Result<(), Error> {
        let now = self.core.now;
        let current = self
            .core
            .instances
            .get(&ev.id)
            .ok_or(Error::UnknownFsm(ev.id))?
            .state;

        let (mut next, action) = self.core.spec.transition(current, ev.signal)?;

        self.core.log.debug(&format!(
            "transition: now={now} instance={} state={} signal={} next={}",
            ev.id,
            self.core.spec.state_name(current),
            self.core.spec.signal_name(ev.signal),
            self.core.spec.state_name(next),
        ));

        // Flap detection first: a tripped detector supersedes the ordinary
        // transition entirely.
        if let Some(flap) = self.core.spec.flap(current, next) {
            if flap.count > 0 {
                let inst = self
                    .core
                    .instances
                    .get_mut(&ev.id)
                    .expect("looked up above");
                inst.flaps.record(current, next);
                let count = inst.flaps.count(current, next);

                if count >= flap.count {
                    inst.flaps.reset(current, next);
                    self.core.log.debug(&format!(
                        "flapping: instance={} count={count} raise={}",
                        ev.id,
                        self.core.spec.signal_name(flap.raise),
                    ));
                    self.raise(ev.id, flap.raise);
                    return Ok(());
                }
            }
        }

        // Attach data before invoking the action so the action sees it.
        if let Some(data) = ev.data {
            self.core
                .instances
                .get(&ev.id)
                .expect("looked up above")
                .attach(data);
        }

        if let Some(action) = action {
            let cx = ActionContext {
                id: ev.id,
                from: current,
                to: next,
                signal: ev.signal,
                data: self.core.instances[&ev.id].data(),
            };

            if let Err(action_err) = action.call(&cx) {
                match self.core.spec.error_target(current, ev.signal) {
                    Ok(alternate) => {
                        self.core.log.debug(&format!(
                            "action failed, redirecting: instance={} state={} signal={} alternate={}",
                            ev.id,
                            self.core.spec.state_name(current),
                            self.core.spec.signal_name(ev.signal),
                            self.core.spec.state_name(alternate),
                        ));
                        next = alternate;
                    }
                    Err(lookup_err) => {
                        self.report(
                            lookup_err,
                            format!("action failed in instance={}: {action_err}", ev.id),
                        );
                    }
                }

                let inst = self
                    .core
                    .instances
                    .get_mut(&ev.id)
                    .expect("looked up above");
                inst.last_error = Some(action_err.to_string());
            }
        }

        // The action has run; land in the new state.
        {
            let inst = self
                .core
                .instances
                .get_mut(&ev.id)
                .expect("looked up above");
            inst.state = next;
            *inst.visits.entry(next).or_insert(0) += 1;
            inst.start = now;
        }

        self.process_deadline(ev.id, next)?;
        self.process_visit_limit(ev.id, next)
    }

    /// Recomputes the instance's deadline from the state's TTL and
    /// reconciles the queue: update in place, remove, or enqueue.
    fn process_deadline(&mut self, id: Id, state: Index) -> Result<(), Error> {
        let ttl = self
            .core
            .spec
            .expiry(state)?
            .map(|expiry| expiry.ttl)
            .unwrap_or(0);
        let now = self.core.now;

        let inst = self
            .core
            .instances
            .get_mut(&id)
            .ok_or(Error::UnknownFsm(id))?;
        inst.set_deadline(now, ttl);
        let queued = inst.queue_pos.is_some();
        let deadline = inst.deadline;

        if queued {
            if deadline > 0 {
                self.core.log.debug(&format!(
                    "deadline updating: id={id} now={now} deadline={deadline}"
                ));
                self.core.deadlines.update(id, &mut self.core.instances);
            } else {
                self.core.log.debug(&format!(
                    "deadline removing: id={id} now={now}"
                ));
                self.core.deadlines.remove(id, &mut self.core.instances);
            }
        } else if deadline > 0 {
            self.core.log.debug(&format!(
                "deadline enqueuing: id={id} now={now} deadline={deadline}"
            ));
            self.core.deadlines.enqueue(id, &mut self.core.instances);
        }

        Ok(())
    }

    /// Raises the visit-cap signal when the counter for the post-transition
    /// state has just reached the cap.
    fn process_visit_limit(&mut self, id: Id, state: Index) -> Result<(), Error> {
        let Some(limit) = self.core.spec.visit(state)? else {
            return Ok(());
        };

        let visits = self
            .core
            .instances
            .get(&id)
            .ok_or(Error::UnknownFsm(id))?
            .visits
            .get(&state)
            .copied()
            .unwrap_or(0);

        if limit.value > 0 && visits == limit.value {
            self.core.log.debug(&format!(
                "visit limit hit: id={id} state={} raise={}",
                self.core.spec.state_name(state),
                self.core.spec.signal_name(limit.raise),
            ));
            self.raise(id, limit.raise);
        }
        Ok(())
    }

    /// Posts a machine-driven signal directly onto the transaction stream,
    /// behind everything already queued.
    fn raise(&mut self, id: Id, signal: Signal) {
        if !self.core.spec.knows(signal) {
            self.report(
                Error::UnknownSignal {
                    signal,
                    state: None,
                },
                format!("raise against instance={id}"),
            );
            return;
        }

        self.core.log.debug(&format!(
            "raise: instance={id} signal={}",
            self.core.spec.signal_name(signal)
        ));

        let txn = Txn::Event(SignalEvent {
            id,
            signal,
            data: None,
        });
        if let Err(err) = self.txns_tx.try_send(txn) {
            match err {
                TrySendError::Full(txn) | TrySendError::Closed(txn) => {
                    self.overflow.push_back(txn);
                }
            }
        }
    }

    /// Classifies an error: drops it when the matching `ignore_undefined_*`
    /// flag is set, otherwise annotates it with friendly names, logs it,
    /// and publishes it on the (lossy) error bus.
    fn report(&mut self, err: Error, context: String) {
        match &err {
            Error::UnknownState(_) if self.core.options.ignore_undefined_states => return,
            Error::UnknownTransition { .. }
                if self.core.options.ignore_undefined_transitions =>
            {
                return
            }
            Error::UnknownSignal { .. } if self.core.options.ignore_undefined_signals => return,
            _ => {}
        }

        let message = format!("{} [{context}]", self.render(&err));
        self.core.log.error(&message);
        self.core.bus.publish(Report {
            error: err,
            message,
            at: SystemTime::now(),
        });
    }

    /// Renders an error with the friendly names from the options applied.
    fn render(&self, err: &Error) -> String {
        let spec = &self.core.spec;
        match err {
            Error::UnknownState(ix) => {
                format!("unknown state: {}", spec.state_name(*ix))
            }
            Error::UnknownTransition { signal, state } => format!(
                "unknown transition: state({}) on signal({})",
                spec.state_name(*state),
                spec.signal_name(*signal),
            ),
            Error::UnknownSignal { signal, state } => match state {
                Some(ix) => format!(
                    "unknown signal: signal({}) in state({})",
                    spec.signal_name(*signal),
                    spec.state_name(*ix),
                ),
                None => format!("unknown signal: signal({})", spec.signal_name(*signal)),
            },
            other => other.to_string(),
        }
    }
}
