//! # Instance record and the public FSM handle.
//!
//! Two faces of one machine instance live here:
//!
//! - [`Instance`] is the record owned and exclusively mutated by the
//!   runner's transaction worker: current state, visit counters, flap log,
//!   deadline bookkeeping.
//! - [`Fsm`] is the shared handle the outside world holds. Reads of the
//!   current state go through the runner's snapshot channel so they are
//!   serialized with every other transaction; signal delivery goes through
//!   the event channel and returns as soon as the event is accepted.
//!
//! The attached-data slot is the one piece shared directly: the worker
//! writes it during a transition (before the action runs) and the handle
//! reads it without a snapshot, so [`Fsm::data`] can never observe a value
//! older than the latest attach that preceded it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::flap::FlapLog;
use crate::runner::{ReadFn, SignalEvent};
use crate::spec::Spec;
use crate::types::{Data, Id, Index, Signal, Tick, Time, INVALID_STATE};

/// Shared slot for the instance's attached data.
pub(crate) type DataSlot = Arc<RwLock<Option<Data>>>;

/// Runner-owned record of one machine instance.
pub(crate) struct Instance {
    pub(crate) id: Id,
    pub(crate) state: Index,
    pub(crate) visits: HashMap<Index, u32>,
    pub(crate) flaps: FlapLog,
    /// Logical time of the last transition into the current state.
    pub(crate) start: Time,
    /// Next expiration: `0` = none, `-1` = just removed from the queue.
    pub(crate) deadline: Time,
    /// Position in the deadline heap; `None` when not queued.
    pub(crate) queue_pos: Option<usize>,
    /// Most recent action failure, if any.
    pub(crate) last_error: Option<String>,
    data: DataSlot,
}

impl Instance {
    pub(crate) fn new(id: Id, initial: Index, now: Time, data: DataSlot) -> Self {
        Self {
            id,
            state: initial,
            visits: HashMap::from([(initial, 1)]),
            flaps: FlapLog::new(),
            start: now,
            deadline: 0,
            queue_pos: None,
            last_error: None,
            data,
        }
    }

    /// Sets the deadline from a TTL budget; a non-positive budget clears it.
    pub(crate) fn set_deadline(&mut self, now: Time, ttl: Tick) {
        self.deadline = if ttl > 0 { now + ttl } else { 0 };
    }

    /// Stores newly attached data in the shared slot.
    pub(crate) fn attach(&self, data: Data) {
        *self.data.write().expect("data slot poisoned") = Some(data);
    }

    /// The currently attached data, if any.
    pub(crate) fn data(&self) -> Option<Data> {
        self.data.read().expect("data slot poisoned").clone()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("start", &self.start)
            .field("deadline", &self.deadline)
            .field("queue_pos", &self.queue_pos)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Shared handle to one running FSM instance.
///
/// Cheap to clone; every clone addresses the same instance. All methods are
/// safe to call from any task or thread. The instance itself lives inside
/// the runner and persists until [`Machines::done`](crate::Machines::done).
#[derive(Clone)]
pub struct Fsm {
    id: Id,
    spec: Arc<Spec>,
    data: DataSlot,
    events: mpsc::Sender<SignalEvent>,
    reads: mpsc::Sender<ReadFn>,
}

impl Fsm {
    pub(crate) fn new(
        id: Id,
        spec: Arc<Spec>,
        data: DataSlot,
        events: mpsc::Sender<SignalEvent>,
        reads: mpsc::Sender<ReadFn>,
    ) -> Self {
        Self {
            id,
            spec,
            data,
            events,
            reads,
        }
    }

    /// The instance id. Constant after allocation.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Snapshot of the current state.
    ///
    /// Serialized with all other transactions: the result reflects every
    /// transaction the worker accepted before this read was dequeued.
    /// Returns [`INVALID_STATE`] once the runner is gone.
    pub async fn state(&self) -> Index {
        let id = self.id;
        let (tx, rx) = oneshot::channel();
        let read: ReadFn = Box::new(move |core| {
            let state = core
                .instance(id)
                .map(|inst| inst.state)
                .unwrap_or(INVALID_STATE);
            let _ = tx.send(state);
        });

        if self.reads.send(read).await.is_err() {
            return INVALID_STATE;
        }
        rx.await.unwrap_or(INVALID_STATE)
    }

    /// The most recent action failure recorded for this instance, with the
    /// same snapshot semantics as [`state`](Fsm::state).
    pub async fn last_error(&self) -> Option<String> {
        let id = self.id;
        let (tx, rx) = oneshot::channel();
        let read: ReadFn = Box::new(move |core| {
            let err = core.instance(id).and_then(|inst| inst.last_error.clone());
            let _ = tx.send(err);
        });

        if self.reads.send(read).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// The latest data attached to this instance.
    pub fn data(&self) -> Option<Data> {
        self.data.read().expect("data slot poisoned").clone()
    }

    /// Delivers `signal` to the instance for asynchronous handling.
    ///
    /// Returns once the event is accepted onto the event channel; the
    /// transition itself runs later on the worker. Fails synchronously with
    /// `UnknownSignal` iff the signal is not globally known to the
    /// definition, and with `NotRunning` once the runner has stopped.
    pub async fn signal(&self, signal: Signal) -> Result<(), Error> {
        self.send(signal, None).await
    }

    /// Like [`signal`](Fsm::signal), attaching `data` to the instance. The
    /// data is stored before any action for this transition runs.
    pub async fn signal_with(&self, signal: Signal, data: Data) -> Result<(), Error> {
        self.send(signal, Some(data)).await
    }

    /// True iff the current state can receive `signal`.
    pub async fn can_receive(&self, signal: Signal) -> bool {
        self.spec.transition(self.state().await, signal).is_ok()
    }

    async fn send(&self, signal: Signal, data: Option<Data>) -> Result<(), Error> {
        if !self.spec.knows(signal) {
            return Err(Error::UnknownSignal {
                signal,
                state: None,
            });
        }

        self.events
            .send(SignalEvent {
                id: self.id,
                signal,
                data,
            })
            .await
            .map_err(|_| Error::NotRunning)
    }
}

impl fmt::Debug for Fsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fsm").field("id", &self.id).finish()
    }
}
