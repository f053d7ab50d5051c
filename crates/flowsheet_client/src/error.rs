use flowsheet_graph::GraphError;

/// Errors surfaced by the client side of the flowsheet editor.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("Flowsheet not found: {0}")]
    FlowsheetNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Simulation failed: {0}")]
    SimulationFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No flowsheet is bound")]
    NoFlowsheet,

    #[error("A simulation is already running for flowsheet {0}")]
    AlreadyRunning(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// True for graph lookups that failed and for missing flowsheets.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::Graph(err) => err.is_not_found(),
            ClientError::FlowsheetNotFound(_) => true,
            ClientError::Api { status, .. } => *status == 404,
            _ => false,
        }
    }

    pub fn is_invalid_connection(&self) -> bool {
        matches!(self, ClientError::Graph(err) if err.is_invalid_connection())
    }

    /// No response was received at all.
    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ClientError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Validation(format!("Malformed response body: {}", err))
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
