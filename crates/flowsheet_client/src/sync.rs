//! Debounced, per-flowsheet serialized pushes of the local graph to the
//! backend.
//!
//! Each flowsheet has a slot holding the newest unsent snapshot. Scheduling a
//! push only replaces that snapshot; a single worker per flowsheet waits for
//! the debounce interval, sends whatever is newest and repeats until nothing
//! is left. Rapid edits therefore collapse into a bounded number of requests
//! and the last committed state is always the last one sent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flowsheet_graph::{Flowsheet, GraphSnapshot};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::backend::FlowsheetBackend;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Pushed { flowsheet_id: String, pushes: u64 },
    Failed { flowsheet_id: String, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// A newer state is waiting to be sent.
    pub pending: bool,
    pub in_flight: bool,
    /// The last state failed to send and has not been superseded.
    pub unsent_failure: bool,
    pub pushes: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct SlotState {
    pending: Option<GraphSnapshot>,
    failed: Option<GraphSnapshot>,
    in_flight: bool,
    pushes: u64,
    last_error: Option<String>,
}

#[derive(Default)]
struct SyncSlot {
    state: Mutex<SlotState>,
    idle: Notify,
}

struct SyncInner {
    backend: Arc<dyn FlowsheetBackend>,
    debounce: Duration,
    slots: DashMap<String, Arc<SyncSlot>>,
    subscribers: Mutex<Vec<flume::Sender<SyncEvent>>>,
    runtime: Option<Handle>,
}

#[derive(Clone)]
pub struct SyncService {
    inner: Arc<SyncInner>,
}

impl SyncService {
    pub fn new(backend: Arc<dyn FlowsheetBackend>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                backend,
                debounce,
                slots: DashMap::new(),
                subscribers: Mutex::new(Vec::new()),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        let (sender, receiver) = flume::unbounded();
        self.inner.subscribers.lock().push(sender);
        receiver
    }

    fn slot(&self, flowsheet_id: &str) -> Arc<SyncSlot> {
        self.inner
            .slots
            .entry(flowsheet_id.to_string())
            .or_default()
            .clone()
    }

    /// Queue `snapshot` as the newest state of `flowsheet_id`. Never blocks
    /// and never fails; outcomes are reported through [`Self::status`],
    /// [`Self::subscribe`] and [`Self::flush`].
    pub fn schedule(&self, flowsheet_id: &str, snapshot: GraphSnapshot) {
        let slot = self.slot(flowsheet_id);
        let start_worker = {
            let mut state = slot.state.lock();
            state.pending = Some(snapshot);
            if state.in_flight {
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if start_worker {
            self.start_worker(flowsheet_id, slot);
        } else {
            debug!(flowsheet = %flowsheet_id, "push coalesced into pending state");
        }
    }

    fn start_worker(&self, flowsheet_id: &str, slot: Arc<SyncSlot>) {
        let runtime = Handle::try_current().ok().or_else(|| self.inner.runtime.clone());
        match runtime {
            Some(handle) => {
                let service = self.clone();
                let flowsheet_id = flowsheet_id.to_string();
                handle.spawn(async move { service.run_worker(flowsheet_id, slot).await });
            }
            None => {
                warn!(flowsheet = %flowsheet_id, "no async runtime; push deferred until flush");
                slot.state.lock().in_flight = false;
                slot.idle.notify_waiters();
            }
        }
    }

    async fn run_worker(&self, flowsheet_id: String, slot: Arc<SyncSlot>) {
        loop {
            tokio::time::sleep(self.inner.debounce).await;
            let snapshot = {
                let mut state = slot.state.lock();
                match state.pending.take() {
                    Some(snapshot) => snapshot,
                    None => {
                        state.in_flight = false;
                        break;
                    }
                }
            };
            let _ = self.push(&flowsheet_id, &slot, snapshot).await;
        }
        slot.idle.notify_waiters();
    }

    async fn push(&self, flowsheet_id: &str, slot: &SyncSlot, snapshot: GraphSnapshot) -> Result<()> {
        let update = snapshot.to_update();
        match self.inner.backend.update_flowsheet(flowsheet_id, &update).await {
            Ok(()) => {
                let pushes = {
                    let mut state = slot.state.lock();
                    state.pushes += 1;
                    state.last_error = None;
                    state.failed = None;
                    state.pushes
                };
                info!(
                    flowsheet = %flowsheet_id,
                    units = snapshot.node_count(),
                    connections = snapshot.edge_count(),
                    "pushed flowsheet"
                );
                self.emit(SyncEvent::Pushed {
                    flowsheet_id: flowsheet_id.to_string(),
                    pushes,
                });
                Ok(())
            }
            Err(err) => {
                warn!(flowsheet = %flowsheet_id, "push failed, local state kept: {}", err);
                {
                    let mut state = slot.state.lock();
                    state.last_error = Some(err.to_string());
                    if state.pending.is_none() {
                        state.failed = Some(snapshot);
                    }
                }
                self.emit(SyncEvent::Failed {
                    flowsheet_id: flowsheet_id.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn wait_idle(slot: &SyncSlot) {
        loop {
            let notified = slot.idle.notified();
            if !slot.state.lock().in_flight {
                return;
            }
            notified.await;
        }
    }

    /// Wait for the running worker, then send any pending or previously
    /// failed state right away. Returns the error of the last attempt.
    pub async fn flush(&self, flowsheet_id: &str) -> Result<()> {
        let slot = match self.inner.slots.get(flowsheet_id) {
            Some(slot) => slot.clone(),
            None => return Ok(()),
        };

        loop {
            Self::wait_idle(&slot).await;
            let snapshot = {
                let mut state = slot.state.lock();
                if state.in_flight {
                    continue;
                }
                match state.pending.take().or_else(|| state.failed.take()) {
                    Some(snapshot) => {
                        state.in_flight = true;
                        snapshot
                    }
                    None => return Ok(()),
                }
            };

            let result = self.push(flowsheet_id, &slot, snapshot).await;
            self.release(flowsheet_id, &slot);
            result?;
        }
    }

    // Hand the slot back after an inline push, restarting the worker if
    // something was scheduled meanwhile.
    fn release(&self, flowsheet_id: &str, slot: &Arc<SyncSlot>) {
        let restart = {
            let mut state = slot.state.lock();
            if state.pending.is_some() {
                true
            } else {
                state.in_flight = false;
                false
            }
        };
        if restart {
            self.start_worker(flowsheet_id, slot.clone());
        } else {
            slot.idle.notify_waiters();
        }
    }

    pub async fn pull(&self, flowsheet_id: &str) -> Result<Flowsheet> {
        self.inner
            .backend
            .get_flowsheet(flowsheet_id)
            .await
            .inspect_err(|err| warn!(flowsheet = %flowsheet_id, "pull failed: {}", err))
    }

    pub fn status(&self, flowsheet_id: &str) -> SyncStatus {
        match self.inner.slots.get(flowsheet_id) {
            Some(slot) => {
                let state = slot.state.lock();
                SyncStatus {
                    pending: state.pending.is_some(),
                    in_flight: state.in_flight,
                    unsent_failure: state.failed.is_some(),
                    pushes: state.pushes,
                    last_error: state.last_error.clone(),
                }
            }
            None => SyncStatus::default(),
        }
    }

    /// Drop queued state for a flowsheet that no longer exists.
    pub fn forget(&self, flowsheet_id: &str) {
        if let Some((_, slot)) = self.inner.slots.remove(flowsheet_id) {
            let mut state = slot.state.lock();
            state.pending = None;
            state.failed = None;
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.inner
            .subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
