use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
    #[error("Node already exists: {0}")]
    DuplicateNode(String),
    #[error("No node is open in the parameter editor")]
    NothingSelected,
    #[error("Export failed: {0}")]
    Export(String),
}

impl GraphError {
    pub fn node_not_found(id: impl Into<String>) -> Self {
        GraphError::NotFound {
            kind: EntityKind::Node,
            id: id.into(),
        }
    }

    pub fn edge_not_found(id: impl Into<String>) -> Self {
        GraphError::NotFound {
            kind: EntityKind::Edge,
            id: id.into(),
        }
    }

    pub fn stream_not_found(id: impl Into<String>) -> Self {
        GraphError::NotFound {
            kind: EntityKind::Stream,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }

    pub fn is_invalid_connection(&self) -> bool {
        matches!(self, GraphError::InvalidConnection(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Edge,
    Stream,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Node => write!(f, "Node"),
            EntityKind::Edge => write!(f, "Connection"),
            EntityKind::Stream => write!(f, "Stream"),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
