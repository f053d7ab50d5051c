use std::collections::HashSet;
use std::sync::Arc;

use flowsheet_graph::{Edge, FlowsheetGraph, GraphMutation, MutationOp, Parameters, Position, UnitType};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::FlowsheetBackend;
use crate::error::{ClientError, Result};
use crate::protocol::{ChatRequest, ConnectionSpec, FlowsheetPatch, UnitSpec};

/// What the assistant answered, split into text and graph changes.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub reply_text: String,
    pub action: Option<String>,
    pub patch: Option<FlowsheetPatch>,
    pub actions: Vec<Value>,
}

impl AssistantReply {
    pub fn has_mutation(&self) -> bool {
        self.patch.as_ref().map(|p| !p.is_empty()).unwrap_or(false) || !self.actions.is_empty()
    }
}

/// Graph operations derived from a reply, plus notes about parts of the
/// reply that could not be turned into operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationPlan {
    pub mutation: GraphMutation,
    pub notes: Vec<String>,
}

pub struct AssistantBridge {
    backend: Arc<dyn FlowsheetBackend>,
    max_message_len: usize,
}

impl AssistantBridge {
    pub fn new(backend: Arc<dyn FlowsheetBackend>, max_message_len: usize) -> Self {
        Self {
            backend,
            max_message_len,
        }
    }

    /// Trimmed message, or `Validation` when it is empty or too long.
    pub fn validate_message(&self, message: &str) -> Result<String> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(ClientError::Validation("Message cannot be empty".to_string()));
        }
        let length = trimmed.chars().count();
        if length > self.max_message_len {
            return Err(ClientError::Validation(format!(
                "Message is {} characters long, the limit is {}",
                length, self.max_message_len
            )));
        }
        Ok(trimmed.to_string())
    }

    pub async fn send(
        &self,
        message: &str,
        flowsheet_id: Option<&str>,
        context: Option<Value>,
    ) -> Result<AssistantReply> {
        let message = self.validate_message(message)?;
        let request = ChatRequest {
            message,
            flowsheet_id: flowsheet_id.map(str::to_string),
            context,
        };

        let response = self
            .backend
            .chat(&request)
            .await
            .inspect_err(|err| warn!("assistant request failed: {}", err))?;
        debug!(action = ?response.action, "assistant replied");

        Ok(AssistantReply {
            reply_text: response.message,
            action: response.action,
            patch: response.flowsheet_update,
            actions: response.actions,
        })
    }

    /// Diff the reply against the live graph.
    ///
    /// A present `units` list is the desired set of units: missing ones are
    /// removed, new ones added, existing ones renamed, re-parameterized or
    /// moved. A present `connections` list is treated the same way, matching
    /// edges by their endpoints. The `actions` list can add units on top.
    pub fn plan_mutation(reply: &AssistantReply, graph: &FlowsheetGraph) -> MutationPlan {
        let mut plan = MutationPlan::default();
        let mut removed: HashSet<String> = HashSet::new();
        let mut remove_edges = Vec::new();
        let mut remove_nodes = Vec::new();
        let mut add_nodes = Vec::new();
        let mut updates = Vec::new();
        let mut add_edges = Vec::new();
        let mut action_nodes = Vec::new();

        if let Some(patch) = &reply.patch {
            if let Some(units) = &patch.units {
                let wanted: HashSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
                for node in graph.nodes() {
                    if !wanted.contains(node.id.as_str()) {
                        removed.insert(node.id.clone());
                        remove_nodes.push(MutationOp::RemoveNode {
                            node: node.id.clone(),
                        });
                    }
                }

                for spec in units {
                    let unit_type = UnitType::from(spec.unit_type.as_str());
                    match graph.get_node(&spec.id) {
                        Some(node) if node.unit_type == unit_type => {
                            if let Some(name) = &spec.name {
                                if name != &node.name {
                                    updates.push(MutationOp::RenameNode {
                                        node: node.id.clone(),
                                        name: name.clone(),
                                    });
                                }
                            }
                            if let Some(parameters) = &spec.parameters {
                                if parameters != &node.parameters {
                                    updates.push(MutationOp::UpdateParameters {
                                        node: node.id.clone(),
                                        parameters: parameters.clone(),
                                    });
                                }
                            }
                            if let Some(position) = spec.position {
                                if position != node.position {
                                    updates.push(MutationOp::MoveNode {
                                        node: node.id.clone(),
                                        position,
                                    });
                                }
                            }
                        }
                        Some(node) => {
                            // type changed: replace the unit
                            removed.insert(node.id.clone());
                            remove_nodes.push(MutationOp::RemoveNode {
                                node: node.id.clone(),
                            });
                            add_nodes.push(add_unit_op(spec, unit_type));
                        }
                        None => add_nodes.push(add_unit_op(spec, unit_type)),
                    }
                }
            }

            if let Some(connections) = &patch.connections {
                let mut kept: HashSet<&str> = HashSet::new();
                for spec in connections {
                    let existing = graph
                        .edges()
                        .filter(|e| !removed.contains(&e.source_node) && !removed.contains(&e.target_node))
                        .find(|e| !kept.contains(e.id.as_str()) && connection_matches(spec, e));
                    match existing {
                        Some(edge) => {
                            kept.insert(edge.id.as_str());
                        }
                        None => add_edges.push(MutationOp::AddEdge {
                            source: spec.from_unit.clone(),
                            source_port: spec.from_port.clone(),
                            target: spec.to_unit.clone(),
                            target_port: spec.to_port.clone(),
                            stream_name: stream_name(patch, spec),
                        }),
                    }
                }

                for edge in graph.edges() {
                    let cascaded = removed.contains(&edge.source_node) || removed.contains(&edge.target_node);
                    if !cascaded && !kept.contains(edge.id.as_str()) {
                        remove_edges.push(MutationOp::RemoveEdge {
                            edge_id: edge.id.clone(),
                        });
                    }
                }
            }

            // streams only name new connections; anything else is not applied
            if let Some(streams) = &patch.streams {
                let named: HashSet<&str> = patch
                    .connections
                    .iter()
                    .flatten()
                    .filter_map(|c| c.stream_id.as_deref())
                    .collect();
                let ignored: Vec<&str> = streams
                    .iter()
                    .map(|s| s.id.as_str())
                    .filter(|id| !named.contains(id))
                    .collect();
                if !ignored.is_empty() {
                    plan.notes.push(format!(
                        "Stream updates not applied: {}",
                        ignored.join(", ")
                    ));
                }
            }
        }

        for action in &reply.actions {
            match action_op(action) {
                Ok(op) => action_nodes.push(op),
                Err(note) => plan.notes.push(note),
            }
        }

        plan.mutation.ops = remove_edges
            .into_iter()
            .chain(remove_nodes)
            .chain(add_nodes)
            .chain(updates)
            .chain(add_edges)
            .chain(action_nodes)
            .collect();
        plan
    }
}

fn add_unit_op(spec: &UnitSpec, unit_type: UnitType) -> MutationOp {
    let ports = match (&spec.inlet_ports, &spec.outlet_ports) {
        (Some(inlets), Some(outlets)) if !inlets.is_empty() || !outlets.is_empty() => {
            Some((inlets.clone(), outlets.clone()))
        }
        _ => None,
    };
    MutationOp::AddNode {
        key: spec.id.clone(),
        unit_type,
        name: spec.name.clone(),
        position: spec.position,
        parameters: spec.parameters.clone(),
        ports,
    }
}

fn connection_matches(spec: &ConnectionSpec, edge: &Edge) -> bool {
    edge.source_node == spec.from_unit
        && edge.target_node == spec.to_unit
        && spec.from_port.as_ref().map_or(true, |p| p == &edge.source_port)
        && spec.to_port.as_ref().map_or(true, |p| p == &edge.target_port)
}

fn stream_name(patch: &FlowsheetPatch, spec: &ConnectionSpec) -> Option<String> {
    let stream_id = spec.stream_id.as_ref()?;
    let named = patch
        .streams
        .as_ref()
        .and_then(|streams| streams.iter().find(|s| &s.id == stream_id))
        .and_then(|s| s.name.clone());
    Some(named.unwrap_or_else(|| stream_id.clone()))
}

/// Translate one entry of the `actions` list. Only `create_unit` changes the
/// graph; anything else comes back as a note.
fn action_op(action: &Value) -> std::result::Result<MutationOp, String> {
    let action_type = action
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if action_type != "create_unit" {
        return Err(format!("Unsupported assistant action: {}", action_type));
    }

    let unit_type = action
        .get("unit_type")
        .and_then(Value::as_str)
        .ok_or_else(|| "create_unit action without unit_type".to_string())?;
    let parameters = match action.get("parameters") {
        Some(value) => Some(
            serde_json::from_value::<Parameters>(value.clone())
                .map_err(|e| format!("create_unit {} has invalid parameters: {}", unit_type, e))?,
        ),
        None => None,
    };
    let position = action
        .get("position")
        .and_then(|p| serde_json::from_value::<Position>(p.clone()).ok())
        .unwrap_or(Position::new(300.0, 200.0));

    Ok(MutationOp::AddNode {
        key: String::new(),
        unit_type: UnitType::from(unit_type),
        name: Some(format!("{} (AI)", unit_type)),
        position: Some(position),
        parameters,
        ports: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(body: Value) -> AssistantReply {
        let response: crate::protocol::ChatResponse = serde_json::from_value(body).unwrap();
        AssistantReply {
            reply_text: response.message,
            action: response.action,
            patch: response.flowsheet_update,
            actions: response.actions,
        }
    }

    #[test]
    fn test_plan_orders_removals_before_additions() {
        let mut graph = FlowsheetGraph::new();
        let reactor = graph.add_node(UnitType::Reactor, Position::default());
        let heater = graph.add_node(UnitType::Heater, Position::default());
        let pump = graph.add_node(UnitType::Pump, Position::default());
        graph.add_edge(&reactor.id, "out1", &heater.id, "in1").unwrap();
        graph.add_edge(&heater.id, "out1", &pump.id, "in1").unwrap();

        let reply = reply(json!({
            "message": "Replaced the pump with a cooler",
            "action": "update_flowsheet",
            "flowsheet_update": {
                "units": [
                    {"id": reactor.id, "type": "Reactor"},
                    {"id": heater.id, "type": "Heater", "name": "E-101"},
                    {"id": "cooler_9", "type": "Cooler"}
                ],
                "connections": [
                    {"from_unit": reactor.id, "to_unit": heater.id},
                    {"from_unit": heater.id, "to_unit": "cooler_9", "stream_id": "S3"}
                ],
                "streams": [{"id": "S3", "name": "Hot product"}]
            }
        }));

        let plan = AssistantBridge::plan_mutation(&reply, &graph);
        assert!(plan.notes.is_empty());
        assert_eq!(
            plan.mutation.ops,
            vec![
                MutationOp::RemoveNode { node: pump.id.clone() },
                MutationOp::AddNode {
                    key: "cooler_9".into(),
                    unit_type: UnitType::Cooler,
                    name: None,
                    position: None,
                    parameters: None,
                    ports: None,
                },
                MutationOp::RenameNode {
                    node: heater.id.clone(),
                    name: "E-101".into(),
                },
                MutationOp::AddEdge {
                    source: heater.id.clone(),
                    source_port: None,
                    target: "cooler_9".into(),
                    target_port: None,
                    stream_name: Some("Hot product".into()),
                },
            ]
        );

        let report = graph.apply_mutation(&plan.mutation);
        assert!(report.is_clean(), "{}", report.summary());
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.find_edge_between(&heater.id, "cooler_9").is_some());
    }

    #[test]
    fn test_units_only_patch_keeps_connections() {
        let mut graph = FlowsheetGraph::new();
        let reactor = graph.add_node(UnitType::Reactor, Position::default());
        let heater = graph.add_node(UnitType::Heater, Position::default());
        graph.add_edge(&reactor.id, "out1", &heater.id, "in1").unwrap();

        let reply = reply(json!({
            "message": "Raised the reactor temperature",
            "flowsheet_update": {
                "units": [
                    {"id": reactor.id, "type": "Reactor", "parameters": {"temperature": 400}},
                    {"id": heater.id, "type": "Heater"}
                ]
            }
        }));

        let plan = AssistantBridge::plan_mutation(&reply, &graph);
        assert_eq!(plan.mutation.len(), 1);
        assert!(matches!(plan.mutation.ops[0], MutationOp::UpdateParameters { .. }));
    }

    #[test]
    fn test_actions_become_add_nodes_or_notes() {
        let graph = FlowsheetGraph::new();
        let reply = reply(json!({
            "response": "Done",
            "actions": [
                {"type": "create_unit", "unit_type": "Pump", "parameters": {"efficiency": 0.9}},
                {"type": "optimize_parameters"}
            ]
        }));

        let plan = AssistantBridge::plan_mutation(&reply, &graph);
        assert_eq!(plan.mutation.len(), 1);
        match &plan.mutation.ops[0] {
            MutationOp::AddNode {
                unit_type,
                name,
                position,
                ..
            } => {
                assert_eq!(unit_type, &UnitType::Pump);
                assert_eq!(name.as_deref(), Some("Pump (AI)"));
                assert_eq!(position, &Some(Position::new(300.0, 200.0)));
            }
            other => panic!("unexpected op {:?}", other),
        }
        assert_eq!(plan.notes, vec!["Unsupported assistant action: optimize_parameters"]);
    }

    #[test]
    fn test_stream_only_update_is_reported() {
        let mut graph = FlowsheetGraph::new();
        let reactor = graph.add_node(UnitType::Reactor, Position::default());
        let heater = graph.add_node(UnitType::Heater, Position::default());
        let edge = graph.add_edge(&reactor.id, "out1", &heater.id, "in1").unwrap();

        let reply = reply(json!({
            "message": "Renamed the reactor outlet",
            "action": "update_flowsheet",
            "flowsheet_update": {
                "streams": [{"id": edge.stream_id, "name": "Reactor effluent", "temperature": 410}]
            }
        }));
        assert!(reply.has_mutation());

        let plan = AssistantBridge::plan_mutation(&reply, &graph);
        assert!(plan.mutation.is_empty());
        assert_eq!(
            plan.notes,
            vec![format!("Stream updates not applied: {}", edge.stream_id)]
        );
    }
}
