use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use flowsheet_graph::{Flowsheet, FlowsheetGraph, FlowsheetSummary, FlowsheetUpdate, UnitType};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use super::FlowsheetBackend;
use crate::error::{ClientError, Result};
use crate::protocol::{ChatRequest, ChatResponse, ExportFormat, ExportPayload, SimulateResponse};

const MAX_MESSAGE_LEN: usize = 5000;

/// In-process backend with the same contract as the REST service.
///
/// Simulation results are synthesized deterministically from the stored
/// units and streams. Chat replies come from a script queue. Tests can take
/// the backend offline, hold simulations until released and slow down
/// updates.
#[derive(Default)]
pub struct MemoryBackend {
    flowsheets: DashMap<String, Flowsheet>,
    chat_script: Mutex<VecDeque<Result<ChatResponse>>>,
    last_chat: Mutex<Option<ChatRequest>>,
    last_update: Mutex<Option<FlowsheetUpdate>>,
    update_calls: AtomicUsize,
    simulate_calls: AtomicUsize,
    update_delay: Mutex<Duration>,
    simulation_gate: Mutex<Option<Arc<Semaphore>>>,
    simulation_failure: Mutex<Option<String>>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a network error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_update_delay(&self, delay: Duration) {
        *self.update_delay.lock() = delay;
    }

    /// Make simulations wait until [`Self::release_simulation`] is called.
    pub fn hold_simulations(&self) {
        *self.simulation_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_simulation(&self) {
        if let Some(gate) = self.simulation_gate.lock().as_ref() {
            gate.add_permits(1);
        }
    }

    /// The next simulation reports a failed status with `message`.
    pub fn fail_next_simulation(&self, message: &str) {
        *self.simulation_failure.lock() = Some(message.to_string());
    }

    pub fn script_reply(&self, reply: ChatResponse) {
        self.chat_script.lock().push_back(Ok(reply));
    }

    pub fn script_error(&self, status: u16, message: &str) {
        self.chat_script.lock().push_back(Err(ClientError::Api {
            status,
            message: message.to_string(),
        }));
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn simulate_calls(&self) -> usize {
        self.simulate_calls.load(Ordering::SeqCst)
    }

    pub fn last_update(&self) -> Option<FlowsheetUpdate> {
        self.last_update.lock().clone()
    }

    pub fn last_chat(&self) -> Option<ChatRequest> {
        self.last_chat.lock().clone()
    }

    /// Stored copy, bypassing the offline switch.
    pub fn stored(&self, flowsheet_id: &str) -> Option<Flowsheet> {
        self.flowsheets.get(flowsheet_id).map(|entry| entry.clone())
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn not_found() -> ClientError {
        ClientError::Api {
            status: 404,
            message: "Flowsheet not found".to_string(),
        }
    }

    fn unprocessable(message: &str) -> ClientError {
        ClientError::Api {
            status: 422,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl FlowsheetBackend for MemoryBackend {
    async fn create_flowsheet(&self, name: &str, description: &str) -> Result<String> {
        self.check_online()?;
        let name = name.trim();
        if name.is_empty() || name.len() > 100 {
            return Err(Self::unprocessable("Flowsheet name must be 1-100 characters"));
        }
        if description.len() > 500 {
            return Err(Self::unprocessable("Description must be at most 500 characters"));
        }

        let id = Uuid::new_v4().to_string();
        self.flowsheets
            .insert(id.clone(), Flowsheet::new(id.clone(), name, description));
        debug!(flowsheet = %id, "created flowsheet");
        Ok(id)
    }

    async fn get_flowsheet(&self, flowsheet_id: &str) -> Result<Flowsheet> {
        self.check_online()?;
        self.stored(flowsheet_id).ok_or_else(Self::not_found)
    }

    async fn update_flowsheet(&self, flowsheet_id: &str, update: &FlowsheetUpdate) -> Result<()> {
        self.check_online()?;
        let delay = *self.update_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        // offline may have been switched on while the request was in flight
        self.check_online()?;

        let mut entry = self
            .flowsheets
            .get_mut(flowsheet_id)
            .ok_or_else(Self::not_found)?;
        entry.apply_update(update);
        drop(entry);

        self.update_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_update.lock() = Some(update.clone());
        Ok(())
    }

    async fn delete_flowsheet(&self, flowsheet_id: &str) -> Result<()> {
        self.check_online()?;
        self.flowsheets
            .remove(flowsheet_id)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    async fn list_flowsheets(&self) -> Result<Vec<FlowsheetSummary>> {
        self.check_online()?;
        let mut summaries: Vec<FlowsheetSummary> = self
            .flowsheets
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn simulate(&self, flowsheet_id: &str) -> Result<SimulateResponse> {
        self.check_online()?;
        if Uuid::parse_str(flowsheet_id).is_err() {
            return Err(Self::unprocessable("Invalid flowsheet ID format"));
        }
        let flowsheet = self.stored(flowsheet_id).ok_or_else(Self::not_found)?;
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.simulation_gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let simulation_id = Uuid::new_v4().to_string();
        let failure = self.simulation_failure.lock().take();
        let results = match failure {
            Some(message) => failed_results(&simulation_id, &message),
            None if flowsheet.units.is_empty() => {
                failed_results(&simulation_id, "Flowsheet has no units to simulate")
            }
            None => synthesize_results(&simulation_id, &flowsheet),
        };

        if let Some(mut entry) = self.flowsheets.get_mut(flowsheet_id) {
            entry.simulation_results = Some(results.clone());
        }

        Ok(SimulateResponse {
            simulation_id: Some(simulation_id),
            status: results.get("status").and_then(Value::as_str).map(str::to_string),
            results,
        })
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.check_online()?;
        let message = request.message.trim();
        if message.is_empty() {
            return Err(Self::unprocessable("Message cannot be empty"));
        }
        if request.message.chars().count() > MAX_MESSAGE_LEN {
            return Err(Self::unprocessable("Message is too long"));
        }

        *self.last_chat.lock() = Some(request.clone());
        match self.chat_script.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(ChatResponse::text(format!(
                "I understand you want to work with the process flowsheet: {}",
                message
            ))),
        }
    }

    async fn export(&self, flowsheet_id: &str, format: ExportFormat) -> Result<ExportPayload> {
        self.check_online()?;
        let flowsheet = self.stored(flowsheet_id).ok_or_else(Self::not_found)?;
        match format {
            ExportFormat::Json => Ok(ExportPayload::Json(serde_json::to_value(&flowsheet)?)),
            ExportFormat::Csv => {
                let csv = FlowsheetGraph::from_flowsheet(&flowsheet)
                    .to_csv()
                    .map_err(ClientError::from)?;
                Ok(ExportPayload::Csv(csv))
            }
        }
    }
}

fn failed_results(simulation_id: &str, message: &str) -> Value {
    json!({
        "simulation_id": simulation_id,
        "status": "failed",
        "timestamp": Utc::now().to_rfc3339(),
        "error": message,
    })
}

/// Stable per-id spread so repeated runs give the same numbers.
fn spread(id: &str) -> u64 {
    id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

fn param(unit: &flowsheet_graph::Node, key: &str, default: f64) -> f64 {
    unit.parameters
        .get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or(default)
}

fn synthesize_results(simulation_id: &str, flowsheet: &Flowsheet) -> Value {
    let mut units = Map::new();
    for unit in &flowsheet.units {
        let h = spread(&unit.id);
        let result = match unit.unit_type {
            UnitType::Reactor => json!({
                "conversion": param(unit, "conversion", 0.85),
                "temperature": param(unit, "temperature", 350.0),
                "pressure": param(unit, "pressure", 1.0),
                "heat_duty": 1250.5,
            }),
            UnitType::DistillationColumn => json!({
                "stages": param(unit, "stages", 20.0),
                "reflux_ratio": param(unit, "reflux_ratio", 2.5),
                "reboiler_duty": 2100.8,
                "condenser_duty": -1850.3,
                "distillate_purity": 0.95,
            }),
            UnitType::Heater => json!({
                "outlet_temperature": param(unit, "outlet_temperature", 200.0),
                "heat_duty": 850.2,
                "pressure_drop": 0.1,
            }),
            UnitType::Cooler => json!({
                "outlet_temperature": param(unit, "outlet_temperature", 50.0),
                "heat_duty": -650.8,
                "pressure_drop": 0.1,
            }),
            _ => json!({
                "temperature": 25.0 + (h % 200) as f64,
                "pressure": 1.0 + (h % 10) as f64 * 0.1,
                "efficiency": 0.85 + (h % 15) as f64 * 0.01,
            }),
        };
        units.insert(unit.id.clone(), result);
    }

    let mut streams = Map::new();
    for stream in &flowsheet.streams {
        let h = spread(&stream.id);
        let composition = if stream.composition.is_empty() {
            json!({"component_1": 0.6, "component_2": 0.4})
        } else {
            json!(stream.composition)
        };
        streams.insert(
            stream.id.clone(),
            json!({
                "temperature": stream.temperature.unwrap_or(25.0 + (h % 150) as f64),
                "pressure": stream.pressure.unwrap_or(1.0 + (h % 5) as f64 * 0.5),
                "molar_flow": stream.molar_flow.unwrap_or(100.0 + (h % 500) as f64),
                "composition": composition,
                "enthalpy": -12500.5 + (h % 5000) as f64,
            }),
        );
    }

    json!({
        "simulation_id": simulation_id,
        "status": "completed",
        "timestamp": Utc::now().to_rfc3339(),
        "units": units,
        "streams": streams,
        "convergence": {
            "iterations": 15,
            "objective": 1.2e-8,
            "constraint_violation": 2.3e-10,
        },
    })
}
