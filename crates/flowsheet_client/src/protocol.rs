//! Request and response bodies exchanged with the flowsheet backend.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use flowsheet_graph::{FlowsheetSummary, Parameters, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFlowsheetRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFlowsheetResponse {
    pub flowsheet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowsheetList {
    pub flowsheets: Vec<FlowsheetSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub flowsheet_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulateResponse {
    #[serde(default)]
    pub simulation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub results: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    Running,
    Completed,
    Failed,
}

impl SimulationStatus {
    /// Engine status strings vary; anything that is not clearly running or
    /// finished counts as a failure.
    pub fn from_engine(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" | "pending" => SimulationStatus::Running,
            "completed" | "success" | "converged" | "optimal" => SimulationStatus::Completed,
            _ => SimulationStatus::Failed,
        }
    }
}

/// Outcome of one simulation run. Failed results never carry numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub id: String,
    pub status: SimulationStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub unit_results: BTreeMap<String, Value>,
    #[serde(default)]
    pub stream_results: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimulationResult {
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SimulationStatus::Running,
            timestamp: Utc::now(),
            unit_results: BTreeMap::new(),
            stream_results: BTreeMap::new(),
            convergence: None,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: SimulationStatus::Failed,
            error: Some(error.into()),
            ..Self::running(id)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SimulationStatus::Completed
    }

    /// Build a result from the `/simulate` response body.
    pub fn from_response(response: SimulateResponse) -> Self {
        let results = response.results;
        let id = response
            .simulation_id
            .or_else(|| results.get("simulation_id").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_default();
        let status = response
            .status
            .as_deref()
            .or_else(|| results.get("status").and_then(Value::as_str))
            .map(SimulationStatus::from_engine)
            .unwrap_or(SimulationStatus::Completed);
        let timestamp = results
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        if status == SimulationStatus::Failed {
            let error = results
                .get("error")
                .or_else(|| results.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Simulation did not converge")
                .to_owned();
            return Self {
                timestamp,
                ..Self::failed(id, error)
            };
        }

        Self {
            id,
            status,
            timestamp,
            unit_results: object_entries(results.get("units")),
            stream_results: object_entries(results.get("streams")),
            convergence: results.get("convergence").cloned(),
            error: None,
        }
    }
}

fn object_entries(value: Option<&Value>) -> BTreeMap<String, Value> {
    value
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flowsheet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Unit as described by the assistant. Everything but id and type may be
/// left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub inlet_ports: Option<Vec<String>>,
    #[serde(default)]
    pub outlet_ports: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub from_unit: String,
    #[serde(default)]
    pub from_port: Option<String>,
    pub to_unit: String,
    #[serde(default)]
    pub to_port: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
}

/// The `flowsheet_update` block of a chat reply. A present list describes
/// the desired final state of that collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowsheetPatch {
    #[serde(default)]
    pub units: Option<Vec<UnitSpec>>,
    #[serde(default)]
    pub streams: Option<Vec<StreamSpec>>,
    #[serde(default)]
    pub connections: Option<Vec<ConnectionSpec>>,
}

impl FlowsheetPatch {
    pub fn is_empty(&self) -> bool {
        self.units.is_none() && self.streams.is_none() && self.connections.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, alias = "response")]
    pub message: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub flowsheet_update: Option<FlowsheetPatch>,
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ChatResponse {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            action: Some("text_response".to_string()),
            flowsheet_update: None,
            actions: Vec::new(),
            reasoning: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ClientError::Validation(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportPayload {
    Json(Value),
    Csv(String),
}

impl ExportPayload {
    /// Export body as text, pretty-printed for JSON.
    pub fn to_text(&self) -> String {
        match self {
            ExportPayload::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            ExportPayload::Csv(data) => data.clone(),
        }
    }
}

/// Structured error body of a non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub detail: Value,
}

impl ApiErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_response_accepts_response_alias() {
        let reply: ChatResponse = serde_json::from_value(json!({
            "response": "Added a pump",
            "actions": [{"type": "create_unit", "unit_type": "Pump"}]
        }))
        .unwrap();
        assert_eq!(reply.message, "Added a pump");
        assert_eq!(reply.actions.len(), 1);
        assert!(reply.flowsheet_update.is_none());
    }

    #[test]
    fn test_partial_stream_specs() {
        let patch: FlowsheetPatch = serde_json::from_value(json!({
            "streams": [{"id": "S2", "name": "Reactor Outlet", "temperature": 250, "pressure": 50}]
        }))
        .unwrap();
        let streams = patch.streams.unwrap();
        assert_eq!(streams[0].name.as_deref(), Some("Reactor Outlet"));
        assert_eq!(streams[0].properties.get("temperature"), Some(&json!(250)));
        assert!(patch.units.is_none());
    }

    #[test]
    fn test_simulation_result_from_completed_response() {
        let response: SimulateResponse = serde_json::from_value(json!({
            "simulation_id": "sim-1",
            "status": "completed",
            "results": {
                "timestamp": "2025-03-01T10:15:30.123456",
                "units": {"reactor_1": {"heat_duty": 1250.5}},
                "streams": {"stream_1": {"temperature": 80.0}},
                "convergence": {"iterations": 15}
            }
        }))
        .unwrap();

        let result = SimulationResult::from_response(response);
        assert!(result.is_completed());
        assert_eq!(result.id, "sim-1");
        assert_eq!(result.unit_results["reactor_1"]["heat_duty"], 1250.5);
        assert_eq!(result.stream_results.len(), 1);
        assert_eq!(result.timestamp.format("%Y-%m-%d").to_string(), "2025-03-01");
    }

    #[test]
    fn test_failed_response_carries_no_numbers() {
        let response: SimulateResponse = serde_json::from_value(json!({
            "simulation_id": "sim-2",
            "status": "failed",
            "results": {
                "error": "Solver did not converge",
                "units": {"reactor_1": {"heat_duty": 1.0}}
            }
        }))
        .unwrap();

        let result = SimulationResult::from_response(response);
        assert_eq!(result.status, SimulationStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Solver did not converge"));
        assert!(result.unit_results.is_empty());
        assert!(result.stream_results.is_empty());
    }
}
