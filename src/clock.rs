//! # Tick sources driving a fleet's logical time.
//!
//! A [`Clock`] delivers discrete ticks to exactly one runner over a channel.
//! Two constructors:
//!
//! - [`Clock::manual`] — no driver; tests advance time explicitly with
//!   [`tick`](Clock::tick) / [`ticks`](Clock::ticks).
//! - [`Clock::wall`] — a background driver adapts a `tokio` interval, one
//!   unit per period. Ticks are gated on [`start`](Clock::start) so none are
//!   delivered before the runner is ready.
//!
//! Both [`start`](Clock::start) and [`stop`](Clock::stop) are idempotent;
//! `stop` closes the tick channel (the runner's select observes
//! end-of-stream) and winds the wall driver down without leaking the task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cloneable handle to one tick source.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    /// Manual tick sender; taken on `stop` so the channel closes.
    tx: Mutex<Option<mpsc::Sender<()>>>,
    /// Receiver side; taken by the runner at startup.
    rx: Mutex<Option<mpsc::Receiver<()>>>,
    /// Start gate: a latch the wall driver waits on.
    gate: CancellationToken,
    stop: CancellationToken,
}

impl Clock {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(ClockInner {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                gate: CancellationToken::new(),
                stop: CancellationToken::new(),
            }),
        }
    }

    /// A clock with no driver, advanced explicitly. Intended for tests.
    pub fn manual() -> Self {
        Self::new()
    }

    /// A clock driven by wall time: one tick per `period`, first delivered
    /// one period after [`start`](Clock::start). Missed ticks are skipped,
    /// not bursted. Must be called within a tokio runtime.
    pub fn wall(period: Duration) -> Self {
        let clock = Self::new();

        let tx = clock
            .inner
            .tx
            .lock()
            .expect("clock lock poisoned")
            .clone()
            .expect("fresh clock has a sender");
        let gate = clock.inner.gate.clone();
        let stop = clock.inner.stop.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = gate.cancelled() => {}
            }

            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // completes immediately

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        clock
    }

    /// Opens the gate so ticks are delivered. Idempotent.
    pub fn start(&self) {
        self.inner.gate.cancel();
    }

    /// Stops the clock and closes the tick channel. Idempotent; the wall
    /// driver exits without leaking.
    pub fn stop(&self) {
        self.inner.stop.cancel();
        self.inner.tx.lock().expect("clock lock poisoned").take();
    }

    /// Delivers one tick. Blocks until the runner has room for it; a tick
    /// after [`stop`](Clock::stop) is silently discarded.
    pub async fn tick(&self) {
        let tx = self.inner.tx.lock().expect("clock lock poisoned").clone();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// Delivers `n` ticks back to back.
    pub async fn ticks(&self, n: usize) {
        for _ in 0..n {
            self.tick().await;
        }
    }

    /// Hands the single receiver to the runner. `None` once taken: a clock
    /// drives at most one runner.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.inner.rx.lock().expect("clock lock poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn manual_ticks_are_delivered() {
        let clock = Clock::manual();
        let mut rx = clock.take_receiver().unwrap();

        clock.tick().await;
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(()));

        clock.ticks(1).await;
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn receiver_can_only_be_taken_once() {
        let clock = Clock::manual();
        assert!(clock.take_receiver().is_some());
        assert!(clock.take_receiver().is_none());
    }

    #[tokio::test]
    async fn stop_closes_the_channel_idempotently() {
        let clock = Clock::manual();
        let mut rx = clock.take_receiver().unwrap();

        clock.stop();
        clock.stop();
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);

        // Ticks after stop are discarded, not errors.
        clock.tick().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let clock = Clock::manual();
        clock.start();
        clock.start();
    }

    #[tokio::test]
    async fn wall_clock_gates_on_start() {
        let clock = Clock::wall(Duration::from_millis(10));
        let mut rx = clock.take_receiver().unwrap();

        // Nothing before start.
        assert!(timeout(Duration::from_millis(60), rx.recv()).await.is_err());

        clock.start();
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(()));

        clock.stop();
        // Channel drains to end-of-stream once the driver lets go.
        loop {
            match timeout(WAIT, rx.recv()).await.unwrap() {
                Some(()) => continue,
                None => break,
            }
        }
    }

    #[tokio::test]
    async fn wall_clock_stopped_before_start_closes() {
        let clock = Clock::wall(Duration::from_millis(10));
        let mut rx = clock.take_receiver().unwrap();
        clock.stop();
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
    }
}
