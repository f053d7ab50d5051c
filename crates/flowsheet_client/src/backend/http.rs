use std::time::Duration;

use async_trait::async_trait;
use flowsheet_graph::{Flowsheet, FlowsheetSummary, FlowsheetUpdate};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{csv_payload, FlowsheetBackend};
use crate::config::BackendConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{
    ApiErrorBody, ChatRequest, ChatResponse, CreateFlowsheetRequest, CreateFlowsheetResponse,
    ExportFormat, ExportPayload, FlowsheetList, SimulateRequest, SimulateResponse,
};

/// Backend reached over the REST API.
pub struct HttpBackend {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send the request and decode a 2xx body. Transport failures become
    /// `Network`, non-2xx responses become `Api` with the server's detail.
    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        let status = response.status();
        let url = response.url().to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|detail| detail.message())
                .unwrap_or_else(|_| {
                    if body.is_empty() {
                        status.canonical_reason().unwrap_or("request failed").to_string()
                    } else {
                        body
                    }
                });
            warn!(%url, status = status.as_u16(), "backend error: {}", message);
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(%url, status = status.as_u16(), "backend response");
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl FlowsheetBackend for HttpBackend {
    async fn create_flowsheet(&self, name: &str, description: &str) -> Result<String> {
        let body = CreateFlowsheetRequest {
            name: name.to_string(),
            description: description.to_string(),
        };
        let response: CreateFlowsheetResponse = self
            .execute(self.http_client.post(self.url("/flowsheet")).json(&body))
            .await?;
        Ok(response.flowsheet_id)
    }

    async fn get_flowsheet(&self, flowsheet_id: &str) -> Result<Flowsheet> {
        let url = self.url(&format!("/flowsheet/{}", flowsheet_id));
        self.execute(self.http_client.get(url)).await
    }

    async fn update_flowsheet(&self, flowsheet_id: &str, update: &FlowsheetUpdate) -> Result<()> {
        let url = self.url(&format!("/flowsheet/{}", flowsheet_id));
        let _: Value = self.execute(self.http_client.put(url).json(update)).await?;
        Ok(())
    }

    async fn delete_flowsheet(&self, flowsheet_id: &str) -> Result<()> {
        let url = self.url(&format!("/flowsheet/{}", flowsheet_id));
        let _: Value = self.execute(self.http_client.delete(url)).await?;
        Ok(())
    }

    async fn list_flowsheets(&self) -> Result<Vec<FlowsheetSummary>> {
        let list: FlowsheetList = self
            .execute(self.http_client.get(self.url("/flowsheets")))
            .await?;
        Ok(list.flowsheets)
    }

    async fn simulate(&self, flowsheet_id: &str) -> Result<SimulateResponse> {
        let body = SimulateRequest {
            flowsheet_id: flowsheet_id.to_string(),
        };
        self.execute(self.http_client.post(self.url("/simulate")).json(&body))
            .await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.execute(self.http_client.post(self.url("/llm/chat")).json(request))
            .await
    }

    async fn export(&self, flowsheet_id: &str, format: ExportFormat) -> Result<ExportPayload> {
        let url = self.url(&format!("/export/{}", flowsheet_id));
        let body: Value = self
            .execute(
                self.http_client
                    .post(url)
                    .query(&[("format", format.as_str())]),
            )
            .await?;

        match format {
            ExportFormat::Json => Ok(ExportPayload::Json(body)),
            ExportFormat::Csv => csv_payload(body),
        }
    }
}
