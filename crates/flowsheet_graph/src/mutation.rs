//! Batches of graph operations issued by a non-interactive source, such as
//! the assistant. A batch is applied op by op; a failing op is reported and
//! the rest of the batch still runs.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::graph::FlowsheetGraph;
use crate::registry::UnitTypeRegistry;
use crate::types::{Node, Parameters, Position, UnitType};

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    /// `key` is how later ops in the same batch refer to the new unit. It is
    /// also used as the unit id when that id is still free.
    AddNode {
        key: String,
        unit_type: UnitType,
        name: Option<String>,
        position: Option<Position>,
        /// `None` takes the registry defaults. A supplied map is used as
        /// given, without merging defaults under it.
        parameters: Option<Parameters>,
        /// Explicit `(inlets, outlets)`; registry ports otherwise.
        ports: Option<(Vec<String>, Vec<String>)>,
    },
    RemoveNode {
        node: String,
    },
    /// A missing port picks the first free port on that side.
    AddEdge {
        source: String,
        source_port: Option<String>,
        target: String,
        target_port: Option<String>,
        stream_name: Option<String>,
    },
    RemoveEdge {
        edge_id: String,
    },
    UpdateParameters {
        node: String,
        parameters: Parameters,
    },
    RenameNode {
        node: String,
        name: String,
    },
    MoveNode {
        node: String,
        position: Position,
    },
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOp::AddNode { key, unit_type, .. } => write!(f, "add {} {}", unit_type, key),
            MutationOp::RemoveNode { node } => write!(f, "remove {}", node),
            MutationOp::AddEdge {
                source,
                source_port,
                target,
                target_port,
                ..
            } => write!(
                f,
                "connect {}.{} -> {}.{}",
                source,
                source_port.as_deref().unwrap_or("*"),
                target,
                target_port.as_deref().unwrap_or("*")
            ),
            MutationOp::RemoveEdge { edge_id } => write!(f, "disconnect {}", edge_id),
            MutationOp::UpdateParameters { node, .. } => write!(f, "update parameters of {}", node),
            MutationOp::RenameNode { node, name } => write!(f, "rename {} to {}", node, name),
            MutationOp::MoveNode { node, .. } => write!(f, "move {}", node),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphMutation {
    pub ops: Vec<MutationOp>,
}

impl GraphMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: MutationOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationFailure {
    pub op: String,
    pub error: GraphError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationReport {
    pub applied: Vec<String>,
    pub failures: Vec<MutationFailure>,
    /// AddNode key -> id actually assigned.
    pub created: BTreeMap<String, String>,
}

impl MutationReport {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human readable outcome, one line per failure.
    pub fn summary(&self) -> String {
        let mut text = format!("Applied {} change(s)", self.applied.len());
        if self.failures.is_empty() {
            text.push('.');
            return text;
        }
        text.push_str(&format!(", {} failed:", self.failures.len()));
        for failure in &self.failures {
            text.push_str(&format!("\n- {}: {}", failure.op, failure.error));
        }
        text
    }
}

impl FlowsheetGraph {
    /// Apply every op of `mutation` in order through the regular graph
    /// operations.
    pub fn apply_mutation(&mut self, mutation: &GraphMutation) -> MutationReport {
        let mut report = MutationReport::default();

        for op in &mutation.ops {
            match self.apply_op(op, &mut report.created) {
                Ok(()) => report.applied.push(op.to_string()),
                Err(error) => {
                    warn!("mutation op '{}' failed: {}", op, error);
                    report.failures.push(MutationFailure {
                        op: op.to_string(),
                        error,
                    });
                }
            }
        }

        debug!(
            applied = report.applied.len(),
            failed = report.failures.len(),
            "applied graph mutation"
        );
        report
    }

    fn resolve<'a>(&self, reference: &'a str, created: &'a BTreeMap<String, String>) -> Result<&'a str> {
        let id = created.get(reference).map(String::as_str).unwrap_or(reference);
        if self.nodes.contains_key(id) {
            Ok(id)
        } else {
            Err(GraphError::node_not_found(reference))
        }
    }

    fn apply_op(&mut self, op: &MutationOp, created: &mut BTreeMap<String, String>) -> Result<()> {
        match op {
            MutationOp::AddNode {
                key,
                unit_type,
                name,
                position,
                parameters,
                ports,
            } => {
                let id = if key.is_empty() || self.nodes.contains_key(key) {
                    String::new()
                } else {
                    key.clone()
                };
                let position = position.unwrap_or_else(|| {
                    Position::new(100.0 + 200.0 * self.nodes.len() as f64, 100.0)
                });
                let (inlet_ports, outlet_ports) = ports
                    .clone()
                    .unwrap_or_else(|| UnitTypeRegistry::ports(unit_type));
                let node = self.insert_node(Node {
                    id,
                    unit_type: unit_type.clone(),
                    name: name.clone().unwrap_or_default(),
                    position,
                    parameters: parameters
                        .clone()
                        .unwrap_or_else(|| UnitTypeRegistry::default_parameters(unit_type)),
                    inlet_ports,
                    outlet_ports,
                })?;
                if !key.is_empty() {
                    created.insert(key.clone(), node.id);
                }
                Ok(())
            }
            MutationOp::RemoveNode { node } => {
                let id = self.resolve(node, created)?.to_owned();
                self.remove_node(&id).map(|_| ())
            }
            MutationOp::AddEdge {
                source,
                source_port,
                target,
                target_port,
                stream_name,
            } => {
                let source = self.resolve(source, created)?.to_owned();
                let target = self.resolve(target, created)?.to_owned();
                let source_port = match source_port {
                    Some(port) => port.clone(),
                    None => self.free_outlet(&source).ok_or_else(|| {
                        GraphError::InvalidConnection(format!("{} has no free outlet", source))
                    })?,
                };
                let target_port = match target_port {
                    Some(port) => port.clone(),
                    None => self.free_inlet(&target).ok_or_else(|| {
                        GraphError::InvalidConnection(format!("{} has no free inlet", target))
                    })?,
                };
                self.add_edge_with_stream(
                    &source,
                    &source_port,
                    &target,
                    &target_port,
                    stream_name.as_deref(),
                )
                .map(|_| ())
            }
            MutationOp::RemoveEdge { edge_id } => self.remove_edge(edge_id).map(|_| ()),
            MutationOp::UpdateParameters { node, parameters } => {
                let id = self.resolve(node, created)?.to_owned();
                self.update_node_parameters(&id, parameters.clone())
            }
            MutationOp::RenameNode { node, name } => {
                let id = self.resolve(node, created)?.to_owned();
                self.rename_node(&id, name)
            }
            MutationOp::MoveNode { node, position } => {
                let id = self.resolve(node, created)?.to_owned();
                self.move_node(&id, *position)
            }
        }
    }
}
