use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::backend::FlowsheetBackend;
use crate::error::{ClientError, Result};
use crate::protocol::{SimulationResult, SimulationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

struct OrchestratorInner {
    flowsheet_id: Option<String>,
    running: HashSet<String>,
    state: RunState,
    latest: Option<SimulationResult>,
}

/// Triggers simulations of the persisted flowsheet and keeps the latest
/// result. One run per flowsheet at a time; a new run replaces the previous
/// result as soon as it starts.
#[derive(Clone)]
pub struct SimulationOrchestrator {
    backend: Arc<dyn FlowsheetBackend>,
    inner: Arc<Mutex<OrchestratorInner>>,
}

/// Clears the running flag even if the trigger future is dropped mid-flight.
struct RunGuard {
    inner: Arc<Mutex<OrchestratorInner>>,
    flowsheet_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.running.remove(&self.flowsheet_id);
        let bound = inner.flowsheet_id.as_deref() == Some(self.flowsheet_id.as_str());
        if bound && inner.state == RunState::Running {
            inner.state = RunState::Idle;
        }
    }
}

impl SimulationOrchestrator {
    pub fn new(backend: Arc<dyn FlowsheetBackend>) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(OrchestratorInner {
                flowsheet_id: None,
                running: HashSet::new(),
                state: RunState::Idle,
                latest: None,
            })),
        }
    }

    /// Bind to a flowsheet (or unbind with `None`). The visible result is
    /// cleared when the binding changes.
    pub fn bind(&self, flowsheet_id: Option<&str>) {
        let mut inner = self.inner.lock();
        if inner.flowsheet_id.as_deref() != flowsheet_id {
            inner.flowsheet_id = flowsheet_id.map(str::to_string);
            inner.latest = None;
            inner.state = RunState::Idle;
        }
    }

    pub fn bound(&self) -> Option<String> {
        self.inner.lock().flowsheet_id.clone()
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    pub fn latest(&self) -> Option<SimulationResult> {
        self.inner.lock().latest.clone()
    }

    pub fn is_running(&self, flowsheet_id: &str) -> bool {
        self.inner.lock().running.contains(flowsheet_id)
    }

    /// Acknowledge a finished run, moving back to `Idle`. The result stays
    /// visible.
    pub fn acknowledge(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, RunState::Completed | RunState::Failed) {
            inner.state = RunState::Idle;
        }
    }

    /// Run a simulation of the bound flowsheet.
    ///
    /// Fails with `NoFlowsheet` when nothing is bound and with
    /// `AlreadyRunning` while a run for the same flowsheet is in flight.
    /// A run that the engine reports as failed returns `SimulationFailure`
    /// and leaves a failed result without numbers.
    pub async fn trigger(&self) -> Result<SimulationResult> {
        let flowsheet_id = {
            let mut inner = self.inner.lock();
            let flowsheet_id = inner.flowsheet_id.clone().ok_or(ClientError::NoFlowsheet)?;
            if !inner.running.insert(flowsheet_id.clone()) {
                return Err(ClientError::AlreadyRunning(flowsheet_id));
            }
            inner.state = RunState::Running;
            inner.latest = Some(SimulationResult::running(""));
            flowsheet_id
        };
        let _guard = RunGuard {
            inner: self.inner.clone(),
            flowsheet_id: flowsheet_id.clone(),
        };

        info!(flowsheet = %flowsheet_id, "simulation started");
        let outcome = self.backend.simulate(&flowsheet_id).await;

        let result = match outcome {
            Ok(response) => SimulationResult::from_response(response),
            Err(err) => {
                error!(flowsheet = %flowsheet_id, "simulation request failed: {}", err);
                self.finish(&flowsheet_id, SimulationResult::failed("", err.to_string()));
                return Err(err);
            }
        };

        match result.status {
            SimulationStatus::Completed => {
                info!(
                    flowsheet = %flowsheet_id,
                    simulation = %result.id,
                    units = result.unit_results.len(),
                    streams = result.stream_results.len(),
                    "simulation completed"
                );
                self.finish(&flowsheet_id, result.clone());
                Ok(result)
            }
            _ => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Simulation did not complete".to_string());
                warn!(flowsheet = %flowsheet_id, "simulation failed: {}", message);
                let failed = SimulationResult {
                    timestamp: result.timestamp,
                    ..SimulationResult::failed(result.id, message.clone())
                };
                self.finish(&flowsheet_id, failed);
                Err(ClientError::SimulationFailure(message))
            }
        }
    }

    /// Record a run of the bound flowsheet that failed before reaching the
    /// engine. Ignored while a run is in flight.
    pub fn fail_unstarted(&self, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        let flowsheet_id = match inner.flowsheet_id.clone() {
            Some(flowsheet_id) => flowsheet_id,
            None => return,
        };
        if inner.running.contains(&flowsheet_id) {
            return;
        }
        let error = error.into();
        warn!(flowsheet = %flowsheet_id, "simulation not started: {}", error);
        inner.state = RunState::Failed;
        inner.latest = Some(SimulationResult::failed("", error));
    }

    fn finish(&self, flowsheet_id: &str, result: SimulationResult) {
        let mut inner = self.inner.lock();
        // a rebind while running makes this result stale
        if inner.flowsheet_id.as_deref() != Some(flowsheet_id) {
            return;
        }
        inner.state = if result.is_completed() {
            RunState::Completed
        } else {
            RunState::Failed
        };
        inner.latest = Some(result);
    }
}
