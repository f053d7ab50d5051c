use std::sync::Arc;

use async_trait::async_trait;
use flowsheet_graph::{Flowsheet, FlowsheetSummary, FlowsheetUpdate};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{ChatRequest, ChatResponse, ExportFormat, ExportPayload, SimulateResponse};

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Client-side contract of the flowsheet persistence, simulation and
/// assistant services.
#[async_trait]
pub trait FlowsheetBackend: Send + Sync {
    /// Returns the new flowsheet id.
    async fn create_flowsheet(&self, name: &str, description: &str) -> Result<String>;
    async fn get_flowsheet(&self, flowsheet_id: &str) -> Result<Flowsheet>;
    /// Supplied top-level lists replace the stored ones wholesale.
    async fn update_flowsheet(&self, flowsheet_id: &str, update: &FlowsheetUpdate) -> Result<()>;
    async fn delete_flowsheet(&self, flowsheet_id: &str) -> Result<()>;
    async fn list_flowsheets(&self) -> Result<Vec<FlowsheetSummary>>;
    /// Runs against the persisted copy of the flowsheet.
    async fn simulate(&self, flowsheet_id: &str) -> Result<SimulateResponse>;
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
    async fn export(&self, flowsheet_id: &str, format: ExportFormat) -> Result<ExportPayload>;
}

pub struct BackendFactory;

impl BackendFactory {
    pub fn create(config: &ClientConfig) -> Result<Arc<dyn FlowsheetBackend>> {
        match config.backend.kind.as_str() {
            "http" => Ok(Arc::new(HttpBackend::new(&config.backend)?)),
            "memory" => Ok(Arc::new(MemoryBackend::new())),
            other => Err(ClientError::Validation(format!(
                "Unsupported backend kind: {}",
                other
            ))),
        }
    }
}

/// Decode the CSV export body (`{"format": "csv", "data": ...}`), tolerating
/// a bare string.
pub(crate) fn csv_payload(body: Value) -> Result<ExportPayload> {
    match body {
        Value::String(data) => Ok(ExportPayload::Csv(data)),
        Value::Object(mut fields) => match fields.remove("data") {
            Some(Value::String(data)) => Ok(ExportPayload::Csv(data)),
            _ => Err(ClientError::Validation(
                "CSV export response has no data field".to_string(),
            )),
        },
        other => Err(ClientError::Validation(format!(
            "Unexpected CSV export response: {}",
            other
        ))),
    }
}
