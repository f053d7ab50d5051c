use std::sync::Arc;
use std::time::Duration;

use flowsheet_graph::{
    Edge, Flowsheet, FlowsheetGraph, FlowsheetSummary, GraphError, GraphEvents, GraphSnapshot,
    HistoryManager, MutationReport, Node, ParamValue, ParameterEditor, Parameters, Position,
    SelectionController, UnitType,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantBridge, AssistantReply};
use crate::backend::{BackendFactory, FlowsheetBackend};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{ExportFormat, ExportPayload, SimulationResult};
use crate::simulation::{RunState, SimulationOrchestrator};
use crate::sync::{SyncEvent, SyncService, SyncStatus};

/// Result of one chat round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub reply: AssistantReply,
    pub report: MutationReport,
    pub notes: Vec<String>,
    /// Reply text followed by the outcome of any graph changes.
    pub text: String,
}

/// One editing session over at most one bound flowsheet.
///
/// Every change to the graph, whether it comes from the user or from the
/// assistant, goes through this type. Commit points snapshot the graph into
/// the history and schedule a push of the new state.
pub struct FlowsheetSession {
    flowsheet_id: Option<String>,
    graph: FlowsheetGraph,
    history: HistoryManager,
    selection: SelectionController,
    editor: ParameterEditor,
    sync: SyncService,
    simulation: SimulationOrchestrator,
    assistant: AssistantBridge,
    backend: Arc<dyn FlowsheetBackend>,
}

impl FlowsheetSession {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        let backend = BackendFactory::create(&config)?;
        Ok(Self::with_backend(backend, &config))
    }

    pub fn with_backend(backend: Arc<dyn FlowsheetBackend>, config: &ClientConfig) -> Self {
        let graph = FlowsheetGraph::new();
        let mut history = match config.history.max_snapshots {
            Some(max) => HistoryManager::with_max_history(max),
            None => HistoryManager::new(),
        };
        history.reset(graph.snapshot());

        Self {
            flowsheet_id: None,
            graph,
            history,
            selection: SelectionController::new(),
            editor: ParameterEditor::new(),
            sync: SyncService::new(
                backend.clone(),
                Duration::from_millis(config.sync.debounce_ms),
            ),
            simulation: SimulationOrchestrator::new(backend.clone()),
            assistant: AssistantBridge::new(backend.clone(), config.assistant.max_message_len),
            backend,
        }
    }

    pub fn flowsheet_id(&self) -> Option<&str> {
        self.flowsheet_id.as_deref()
    }

    pub fn graph(&self) -> &FlowsheetGraph {
        &self.graph
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn editor(&self) -> &ParameterEditor {
        &self.editor
    }

    pub fn selected(&self) -> Option<&str> {
        self.selection.selected()
    }

    pub fn simulation(&self) -> &SimulationOrchestrator {
        &self.simulation
    }

    pub fn simulation_state(&self) -> RunState {
        self.simulation.state()
    }

    pub fn latest_result(&self) -> Option<SimulationResult> {
        self.simulation.latest()
    }

    pub fn subscribe_graph(&mut self) -> flume::Receiver<GraphEvents> {
        self.graph.subscribe()
    }

    pub fn subscribe_sync(&self) -> flume::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    pub fn sync_status(&self) -> SyncStatus {
        match &self.flowsheet_id {
            Some(id) => self.sync.status(id),
            None => SyncStatus::default(),
        }
    }

    // Lifecycle

    pub async fn list(&self) -> Result<Vec<FlowsheetSummary>> {
        self.backend.list_flowsheets().await
    }

    /// Create a flowsheet on the backend and bind the session to it with an
    /// empty graph.
    pub async fn create(&mut self, name: &str, description: &str) -> Result<String> {
        let flowsheet_id = self.backend.create_flowsheet(name, description).await?;
        self.leave_current().await;
        self.graph.clear();
        self.bind(Some(flowsheet_id.clone()));
        info!(flowsheet = %flowsheet_id, "created flowsheet");
        Ok(flowsheet_id)
    }

    /// Pull a flowsheet and make it the live graph. History starts over.
    pub async fn open(&mut self, flowsheet_id: &str) -> Result<Flowsheet> {
        let flowsheet = self.sync.pull(flowsheet_id).await?;
        self.leave_current().await;
        self.graph.load(&flowsheet);
        for problem in self.graph.take_errors() {
            warn!(flowsheet = %flowsheet_id, "dropped on load: {}", problem);
        }
        self.bind(Some(flowsheet_id.to_string()));
        info!(
            flowsheet = %flowsheet_id,
            units = self.graph.node_count(),
            connections = self.graph.edge_count(),
            "opened flowsheet"
        );
        Ok(flowsheet)
    }

    /// Delete a flowsheet. A session bound to it is unbound and cleared.
    pub async fn delete_flowsheet(&mut self, flowsheet_id: &str) -> Result<()> {
        self.backend.delete_flowsheet(flowsheet_id).await?;
        self.sync.forget(flowsheet_id);
        if self.flowsheet_id.as_deref() == Some(flowsheet_id) {
            self.graph.clear();
            self.bind(None);
            info!(flowsheet = %flowsheet_id, "bound flowsheet deleted, session cleared");
        }
        Ok(())
    }

    // Best effort final push before switching flowsheets.
    async fn leave_current(&mut self) {
        if let Some(previous) = self.flowsheet_id.clone() {
            if let Err(err) = self.sync.flush(&previous).await {
                warn!(flowsheet = %previous, "unsent changes left behind: {}", err);
            }
        }
    }

    fn bind(&mut self, flowsheet_id: Option<String>) {
        self.history.reset(self.graph.snapshot());
        self.selection.clear();
        self.editor.close();
        self.simulation.bind(flowsheet_id.as_deref());
        self.flowsheet_id = flowsheet_id;
    }

    // Commit points

    fn commit(&mut self, reason: &str) {
        let snapshot = self.graph.snapshot();
        self.history.commit(snapshot.clone());
        debug!(reason, cursor = self.history.cursor(), "committed");
        self.schedule_push(snapshot);
        self.refresh_view();
    }

    fn schedule_push(&self, snapshot: GraphSnapshot) {
        if let Some(flowsheet_id) = &self.flowsheet_id {
            self.sync.schedule(flowsheet_id, snapshot);
        }
    }

    // Drop selection and editor state for units that no longer exist and
    // refresh a clean editor buffer from the graph.
    fn refresh_view(&mut self) {
        if let Some(selected) = self.selection.selected().map(str::to_string) {
            if self.graph.get_node(&selected).is_none() {
                self.selection.clear();
            }
        }
        if let Some(node_id) = self.editor.node_id().map(str::to_string) {
            match self.graph.get_node(&node_id) {
                Some(node) => self.editor.sync_from(node),
                None => {
                    if self.editor.close() {
                        debug!(node = %node_id, "unit removed, unsaved edits dropped");
                    }
                }
            }
        }
    }

    pub fn add_node(&mut self, unit_type: UnitType, position: Position) -> Node {
        let node = self.graph.add_node(unit_type, position);
        self.commit("add node");
        node
    }

    pub fn apply_default_parameters(&mut self, node_id: &str) -> Result<()> {
        self.graph.apply_default_parameters(node_id)?;
        self.commit("default parameters");
        Ok(())
    }

    pub fn remove_node(&mut self, node_id: &str) -> Result<Node> {
        let node = self.graph.remove_node(node_id)?;
        self.commit("remove node");
        Ok(node)
    }

    pub fn add_edge(
        &mut self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Result<Edge> {
        let edge = self.graph.add_edge(source, source_port, target, target_port)?;
        self.commit("add connection");
        Ok(edge)
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> Result<Edge> {
        let edge = self.graph.remove_edge(edge_id)?;
        self.commit("remove connection");
        Ok(edge)
    }

    pub fn update_node_parameters(&mut self, node_id: &str, parameters: Parameters) -> Result<()> {
        self.graph.update_node_parameters(node_id, parameters)?;
        self.commit("update parameters");
        Ok(())
    }

    pub fn rename_node(&mut self, node_id: &str, name: &str) -> Result<()> {
        self.graph.rename_node(node_id, name)?;
        self.commit("rename node");
        Ok(())
    }

    /// Drag a unit. Not a commit point; call [`Self::finish_move`] when the
    /// drag ends.
    pub fn move_node(&mut self, node_id: &str, position: Position) -> Result<()> {
        self.graph.move_node(node_id, position)?;
        Ok(())
    }

    /// Persist the current positions without adding a history entry.
    pub fn finish_move(&self) {
        self.schedule_push(self.graph.snapshot());
    }

    pub fn undo(&mut self) -> bool {
        let snapshot = match self.history.undo() {
            Some(snapshot) => snapshot.clone(),
            None => return false,
        };
        self.graph.restore(&snapshot);
        self.schedule_push(snapshot);
        self.refresh_view();
        true
    }

    pub fn redo(&mut self) -> bool {
        let snapshot = match self.history.redo() {
            Some(snapshot) => snapshot.clone(),
            None => return false,
        };
        self.graph.restore(&snapshot);
        self.schedule_push(snapshot);
        self.refresh_view();
        true
    }

    // Selection and parameter editing

    /// Select a unit and open its parameters for editing. Moving the
    /// selection to another unit discards unsaved edits.
    pub fn select(&mut self, node_id: &str) -> Result<()> {
        let node = self
            .graph
            .get_node(node_id)
            .ok_or_else(|| GraphError::node_not_found(node_id))?;
        self.selection.select(node_id);
        if self.editor.node_id() != Some(node_id) {
            if let Some(previous) = self.editor.node_id().map(str::to_string) {
                if self.editor.close() {
                    debug!(node = %previous, "selection changed, unsaved edits discarded");
                }
            }
            self.editor.open(node);
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        if self.editor.close() {
            debug!("selection cleared, unsaved edits discarded");
        }
    }

    pub fn edit_parameter(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        Ok(self.editor.edit(key, value)?)
    }

    pub fn remove_parameter(&mut self, key: &str) -> Result<Option<ParamValue>> {
        Ok(self.editor.remove_parameter(key)?)
    }

    pub fn edit_name(&mut self, name: &str) -> Result<()> {
        Ok(self.editor.set_name(name)?)
    }

    /// Write the staged name and parameters back as one commit. Returns
    /// `false` when there was nothing to save.
    pub fn save_edits(&mut self) -> Result<bool> {
        let staged = match self.editor.save() {
            Some(staged) => staged,
            None if self.editor.is_open() => return Ok(false),
            None => return Err(GraphError::NothingSelected.into()),
        };
        let node = self
            .graph
            .get_node(&staged.node_id)
            .ok_or_else(|| GraphError::node_not_found(&staged.node_id))?;

        let rename = node.name != staged.name;
        if rename {
            self.graph.rename_node(&staged.node_id, &staged.name)?;
        }
        self.graph
            .update_node_parameters(&staged.node_id, staged.parameters)?;
        self.commit("save parameters");
        Ok(true)
    }

    /// Throw away staged edits and re-read the committed unit.
    pub fn reset_edits(&mut self) -> Result<()> {
        let node_id = self
            .editor
            .node_id()
            .ok_or(GraphError::NothingSelected)?
            .to_string();
        let node = self
            .graph
            .get_node(&node_id)
            .ok_or_else(|| GraphError::node_not_found(&node_id))?;
        self.editor.reset(node);
        Ok(())
    }

    // Backend round trips

    pub async fn flush(&self) -> Result<()> {
        match &self.flowsheet_id {
            Some(flowsheet_id) => self.sync.flush(flowsheet_id).await,
            None => Ok(()),
        }
    }

    /// Simulate the bound flowsheet. Unsent edits are pushed first because
    /// the engine works on the persisted copy. Stream results of a completed
    /// run are written into the local streams.
    pub async fn run_simulation(&mut self) -> Result<SimulationResult> {
        if let Some(flowsheet_id) = &self.flowsheet_id {
            if let Err(err) = self.sync.flush(flowsheet_id).await {
                if !self.simulation.is_running(flowsheet_id) {
                    self.graph.clear_stream_results();
                    self.simulation
                        .fail_unstarted(format!("Unsent changes could not be saved: {}", err));
                }
                return Err(err);
            }
            if !self.simulation.is_running(flowsheet_id) {
                self.graph.clear_stream_results();
            }
        }

        let result = self.simulation.trigger().await?;
        for (stream_id, values) in &result.stream_results {
            if let Err(err) = self.graph.set_stream_results(stream_id, values) {
                debug!("stream result not shown: {}", err);
            }
        }
        Ok(result)
    }

    /// Send a chat message and apply whatever graph changes come back as a
    /// single commit. Operations that fail are reported in the outcome text;
    /// the rest still apply.
    pub async fn send_message(&mut self, message: &str, context: Option<Value>) -> Result<ChatOutcome> {
        let context = match context {
            Some(context) => context,
            None => serde_json::to_value(self.graph.update_payload())?,
        };
        let reply = self
            .assistant
            .send(message, self.flowsheet_id.as_deref(), Some(context))
            .await?;

        let plan = AssistantBridge::plan_mutation(&reply, &self.graph);
        let report = if plan.mutation.is_empty() {
            MutationReport::default()
        } else {
            self.graph.apply_mutation(&plan.mutation)
        };
        if report.changed() {
            self.commit("assistant update");
        }
        if !report.is_clean() {
            warn!(failed = report.failures.len(), "assistant update partially applied");
        }

        let mut text = reply.reply_text.clone();
        if !plan.mutation.is_empty() {
            text.push_str("\n\n");
            text.push_str(&report.summary());
        }
        for note in &plan.notes {
            text.push('\n');
            text.push_str(note);
        }

        Ok(ChatOutcome {
            reply,
            report,
            notes: plan.notes,
            text,
        })
    }

    /// Export through the backend after pushing unsent edits.
    pub async fn export(&self, format: ExportFormat) -> Result<ExportPayload> {
        let flowsheet_id = self.flowsheet_id.as_deref().ok_or(ClientError::NoFlowsheet)?;
        self.sync.flush(flowsheet_id).await?;
        self.backend.export(flowsheet_id, format).await
    }

    /// CSV rendering of the live graph, no backend involved.
    pub fn export_local_csv(&self) -> Result<String> {
        Ok(self.graph.to_csv()?)
    }
}
