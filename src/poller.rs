// src/poller.rs
//! Fixed-interval refresh loops.
//!
//! Each tick starts one run of the job, tagged with the next sequence
//! number. Runs may overlap when the node is slow; a finished run is only
//! applied if its number is above the last one applied and the loop has not
//! been stopped, so a slow old run can never overwrite a newer result.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A result together with the run that produced it.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub seq: u64,
    pub fetched_at: DateTime<Utc>,
    pub value: T,
}

struct SlotState {
    last_applied: u64,
    closed: bool,
}

/// Latest applied snapshot, shared between a loop and its readers.
pub struct SnapshotSlot<T> {
    state: Mutex<SlotState>,
    tx: watch::Sender<Option<Snapshot<T>>>,
}

impl<T> SnapshotSlot<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            state: Mutex::new(SlotState {
                last_applied: 0,
                closed: false,
            }),
            tx,
        }
    }

    /// Publish `value` unless a newer run already did or the slot is closed.
    pub fn apply(&self, seq: u64, value: T) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed || seq <= state.last_applied {
            return false;
        }
        state.last_applied = seq;
        self.tx.send_replace(Some(Snapshot {
            seq,
            fetched_at: Utc::now(),
            value,
        }));
        true
    }

    /// Refuse every later `apply`.
    pub fn close(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.closed = true;
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot<T>>> {
        self.tx.subscribe()
    }
}

impl<T: Clone> SnapshotSlot<T> {
    pub fn latest(&self) -> Option<Snapshot<T>> {
        self.tx.borrow().clone()
    }
}

impl<T> Default for SnapshotSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running loop. Dropping it also ends the loop.
pub struct PollHandle<T> {
    name: &'static str,
    slot: Arc<SnapshotSlot<T>>,
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl<T> PollHandle<T> {
    pub fn slot(&self) -> Arc<SnapshotSlot<T>> {
        Arc::clone(&self.slot)
    }

    /// Stop ticking, abandon in-flight runs and wait for the loop to exit.
    /// Nothing is applied after this returns.
    pub async fn stop(self) {
        self.slot.close();
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            warn!("poller {} ended abnormally: {:?}", self.name, e);
        }
        info!("poller {} stopped", self.name);
    }
}

/// Run `job` every `interval`, starting immediately. A run that returns
/// `None` or exceeds `timeout` leaves the previous snapshot in place.
pub fn spawn<T, F, Fut>(
    name: &'static str,
    interval: Duration,
    timeout: Duration,
    job: F,
) -> PollHandle<T>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let slot = Arc::new(SnapshotSlot::new());
    let (stop_tx, mut stop_rx) = broadcast::channel(1);

    let task = tokio::spawn({
        let slot = Arc::clone(&slot);
        async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight = JoinSet::new();
            let mut seq: u64 = 0;

            info!("poller {} started (every {:?})", name, interval);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        seq += 1;
                        let run = seq;
                        let slot = Arc::clone(&slot);
                        let fut = job();
                        in_flight.spawn(async move {
                            match time::timeout(timeout, fut).await {
                                Ok(Some(value)) => {
                                    if !slot.apply(run, value) {
                                        debug!("poller {}: discarded stale run {}", name, run);
                                    }
                                }
                                Ok(None) => debug!("poller {}: run {} produced nothing", name, run),
                                Err(_) => warn!("poller {}: run {} timed out", name, run),
                            }
                        });
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }

            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    });

    PollHandle {
        name,
        slot,
        stop_tx,
        task,
    }
}
