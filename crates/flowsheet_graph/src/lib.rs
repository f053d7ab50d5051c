pub mod editor;
pub mod error;
pub mod export;
pub mod graph;
pub mod history;
pub mod mutation;
pub mod registry;
pub mod selection;
pub mod types;

pub use editor::{ParameterEditor, StagedEdit};
pub use error::{EntityKind, GraphError, Result};
pub use graph::FlowsheetGraph;
pub use history::HistoryManager;
pub use mutation::{GraphMutation, MutationFailure, MutationOp, MutationReport};
pub use registry::{PortCardinality, UnitTypeInfo, UnitTypeRegistry};
pub use selection::SelectionController;
pub use types::*;
