//! Client side of the flowsheet editor: the session every edit goes through,
//! debounced sync to the backend, simulation runs and the assistant bridge.

pub mod assistant;
pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod simulation;
pub mod sync;

pub use assistant::{AssistantBridge, AssistantReply, MutationPlan};
pub use backend::{BackendFactory, FlowsheetBackend, HttpBackend, MemoryBackend};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use protocol::{ChatResponse, ExportFormat, ExportPayload, SimulationResult, SimulationStatus};
pub use session::{ChatOutcome, FlowsheetSession};
pub use simulation::{RunState, SimulationOrchestrator};
pub use sync::{SyncEvent, SyncService, SyncStatus};
