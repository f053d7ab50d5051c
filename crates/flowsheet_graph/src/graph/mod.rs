
use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::registry::UnitTypeRegistry;
use crate::types::*;

/// In-memory flowsheet: unit operations connected by edges, each edge owning
/// exactly one stream.
///
/// Every change goes through the methods below. Each one either applies fully
/// or returns an error and leaves the graph untouched, so the referential
/// invariants hold after any sequence of calls:
/// - an edge's endpoints name existing nodes and ports declared on them
///   (outlet on the source side, inlet on the target side)
/// - a port carries at most one edge on its side
/// - an edge never connects a node to itself
/// - every edge has its stream and every stream belongs to an edge
#[derive(Debug, Default)]
pub struct FlowsheetGraph {
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) edges: BTreeMap<String, Edge>,
    pub(crate) streams: BTreeMap<String, Stream>,
    // (node_id, port) -> edge id
    inlet_index: HashMap<(String, String), String>,
    outlet_index: HashMap<(String, String), String>,
    node_counters: HashMap<String, u64>,
    next_edge: u64,
    next_stream: u64,
    subscribers: Vec<flume::Sender<GraphEvents>>,
    graph_errors: Vec<GraphError>,
}

impl FlowsheetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a persisted flowsheet. See [`FlowsheetGraph::load`].
    pub fn from_flowsheet(flowsheet: &Flowsheet) -> Self {
        let mut graph = Self::new();
        graph.load(flowsheet);
        graph
    }

    /// Register a listener for change events. Dropped receivers are pruned on
    /// the next emission.
    pub fn subscribe(&mut self) -> flume::Receiver<GraphEvents> {
        let (sender, receiver) = flume::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn emit_event(&mut self, event: GraphEvents) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn get_stream(&self, id: &str) -> Option<&Stream> {
        self.streams.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Problems found while loading persisted data.
    pub fn errors(&self) -> &[GraphError] {
        &self.graph_errors
    }

    pub fn take_errors(&mut self) -> Vec<GraphError> {
        std::mem::take(&mut self.graph_errors)
    }

    /// Edges touching `node_id` on either side.
    pub fn incident_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.touches(node_id)).collect()
    }

    pub fn edge_into(&self, node_id: &str, port: &str) -> Option<&Edge> {
        self.inlet_index
            .get(&(node_id.to_owned(), port.to_owned()))
            .and_then(|edge_id| self.edges.get(edge_id))
    }

    pub fn edge_out_of(&self, node_id: &str, port: &str) -> Option<&Edge> {
        self.outlet_index
            .get(&(node_id.to_owned(), port.to_owned()))
            .and_then(|edge_id| self.edges.get(edge_id))
    }

    /// Edge joining the two nodes in the given direction, if any.
    pub fn find_edge_between(&self, source: &str, target: &str) -> Option<&Edge> {
        self.edges
            .values()
            .find(|e| e.source_node == source && e.target_node == target)
    }

    /// First inlet port of `node_id` without an incoming edge.
    pub fn free_inlet(&self, node_id: &str) -> Option<String> {
        let node = self.nodes.get(node_id)?;
        node.inlet_ports
            .iter()
            .find(|port| self.edge_into(node_id, port).is_none())
            .cloned()
    }

    /// First outlet port of `node_id` without an outgoing edge.
    pub fn free_outlet(&self, node_id: &str) -> Option<String> {
        let node = self.nodes.get(node_id)?;
        node.outlet_ports
            .iter()
            .find(|port| self.edge_out_of(node_id, port).is_none())
            .cloned()
    }

    fn next_node_id(&mut self, unit_type: &UnitType) -> String {
        let prefix = unit_type.as_str().to_lowercase();
        let counter = self.node_counters.entry(prefix.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", prefix, counter);
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn next_edge_id(&mut self) -> String {
        loop {
            self.next_edge += 1;
            let candidate = format!("conn_{}", self.next_edge);
            if !self.edges.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn next_stream_id(&mut self) -> String {
        loop {
            self.next_stream += 1;
            let candidate = format!("stream_{}", self.next_stream);
            if !self.streams.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Add a unit with a fresh id, registry ports and no parameters.
    pub fn add_node(&mut self, unit_type: UnitType, position: Position) -> Node {
        let id = self.next_node_id(&unit_type);
        let (inlet_ports, outlet_ports) = UnitTypeRegistry::ports(&unit_type);
        let node = Node {
            name: id.clone(),
            id,
            unit_type,
            position,
            parameters: Parameters::new(),
            inlet_ports,
            outlet_ports,
        };

        self.nodes.insert(node.id.clone(), node.clone());
        debug!(node = %node.id, unit_type = %node.unit_type, "added node");
        self.emit_event(GraphEvents::AddNode(node.clone()));
        node
    }

    /// Insert a fully described node, keeping its id. Missing port lists are
    /// filled from the registry.
    pub fn insert_node(&mut self, mut node: Node) -> Result<Node> {
        if node.id.is_empty() {
            node.id = self.next_node_id(&node.unit_type);
        }
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        fill_missing_ports(&mut node);
        if node.name.is_empty() {
            node.name = node.id.clone();
        }

        self.nodes.insert(node.id.clone(), node.clone());
        debug!(node = %node.id, unit_type = %node.unit_type, "inserted node");
        self.emit_event(GraphEvents::AddNode(node.clone()));
        Ok(node)
    }

    /// Fill in registry defaults for every parameter the node does not set.
    pub fn apply_default_parameters(&mut self, node_id: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::node_not_found(node_id))?;

        let before = node.parameters.clone();
        for (key, value) in UnitTypeRegistry::default_parameters(&node.unit_type) {
            node.parameters.entry(key).or_insert(value);
        }
        let after = node.parameters.clone();

        self.emit_event(GraphEvents::ChangeNode {
            id: node_id.to_owned(),
            before,
            after,
        });
        Ok(())
    }

    /// Remove a node together with every edge touching it and those edges'
    /// streams.
    pub fn remove_node(&mut self, node_id: &str) -> Result<Node> {
        if !self.nodes.contains_key(node_id) {
            return Err(GraphError::node_not_found(node_id));
        }

        let incident: Vec<String> = self
            .edges
            .values()
            .filter(|e| e.touches(node_id))
            .map(|e| e.id.clone())
            .collect();
        for edge_id in incident {
            self.detach_edge(&edge_id);
        }

        let node = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| GraphError::node_not_found(node_id))?;
        debug!(node = %node_id, "removed node");
        self.emit_event(GraphEvents::RemoveNode(node.clone()));
        Ok(node)
    }

    /// Connect `source.source_port` (an outlet) to `target.target_port` (an
    /// inlet), allocating a new stream for the edge.
    pub fn add_edge(
        &mut self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Result<Edge> {
        self.add_edge_with_stream(source, source_port, target, target_port, None)
    }

    pub fn add_edge_with_stream(
        &mut self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
        stream_name: Option<&str>,
    ) -> Result<Edge> {
        self.check_connection(source, source_port, target, target_port)?;

        let stream_id = self.next_stream_id();
        let stream_name = stream_name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("S{}", self.next_stream));
        let edge = Edge {
            id: self.next_edge_id(),
            source_node: source.to_owned(),
            source_port: source_port.to_owned(),
            target_node: target.to_owned(),
            target_port: target_port.to_owned(),
            stream_id: stream_id.clone(),
        };

        self.streams
            .insert(stream_id.clone(), Stream::new(stream_id, stream_name));
        self.attach_edge(edge.clone());
        debug!(edge = %edge.id, "{}.{} -> {}.{}", source, source_port, target, target_port);
        self.emit_event(GraphEvents::AddConnection(edge.clone()));
        Ok(edge)
    }

    fn check_connection(
        &self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Result<()> {
        if source == target {
            return Err(GraphError::InvalidConnection(format!(
                "cannot connect {} to itself",
                source
            )));
        }
        let source_node = self.nodes.get(source).ok_or_else(|| {
            GraphError::InvalidConnection(format!("source unit {} does not exist", source))
        })?;
        let target_node = self.nodes.get(target).ok_or_else(|| {
            GraphError::InvalidConnection(format!("target unit {} does not exist", target))
        })?;
        if !source_node.has_outlet(source_port) {
            return Err(GraphError::InvalidConnection(format!(
                "{} has no outlet port {}",
                source, source_port
            )));
        }
        if !target_node.has_inlet(target_port) {
            return Err(GraphError::InvalidConnection(format!(
                "{} has no inlet port {}",
                target, target_port
            )));
        }
        if let Some(existing) = self.edge_into(target, target_port) {
            return Err(GraphError::InvalidConnection(format!(
                "{}.{} is already fed by {}",
                target, target_port, existing.id
            )));
        }
        if let Some(existing) = self.edge_out_of(source, source_port) {
            return Err(GraphError::InvalidConnection(format!(
                "{}.{} already feeds {}",
                source, source_port, existing.id
            )));
        }
        Ok(())
    }

    fn attach_edge(&mut self, edge: Edge) {
        self.outlet_index.insert(
            (edge.source_node.clone(), edge.source_port.clone()),
            edge.id.clone(),
        );
        self.inlet_index.insert(
            (edge.target_node.clone(), edge.target_port.clone()),
            edge.id.clone(),
        );
        self.edges.insert(edge.id.clone(), edge);
    }

    fn detach_edge(&mut self, edge_id: &str) -> Option<Edge> {
        let edge = self.edges.remove(edge_id)?;
        self.outlet_index
            .remove(&(edge.source_node.clone(), edge.source_port.clone()));
        self.inlet_index
            .remove(&(edge.target_node.clone(), edge.target_port.clone()));
        self.streams.remove(&edge.stream_id);
        self.emit_event(GraphEvents::RemoveConnection(edge.clone()));
        Some(edge)
    }

    /// Remove an edge and its stream.
    pub fn remove_edge(&mut self, edge_id: &str) -> Result<Edge> {
        let edge = self
            .detach_edge(edge_id)
            .ok_or_else(|| GraphError::edge_not_found(edge_id))?;
        debug!(edge = %edge_id, "removed edge");
        Ok(edge)
    }

    /// Replace the node's parameter set.
    pub fn update_node_parameters(&mut self, node_id: &str, parameters: Parameters) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::node_not_found(node_id))?;
        let before = std::mem::replace(&mut node.parameters, parameters);
        let after = node.parameters.clone();

        self.emit_event(GraphEvents::ChangeNode {
            id: node_id.to_owned(),
            before,
            after,
        });
        Ok(())
    }

    pub fn rename_node(&mut self, node_id: &str, name: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::node_not_found(node_id))?;
        let old = std::mem::replace(&mut node.name, name.to_owned());

        self.emit_event(GraphEvents::RenameNode {
            id: node_id.to_owned(),
            old,
            new: name.to_owned(),
        });
        Ok(())
    }

    pub fn move_node(&mut self, node_id: &str, position: Position) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::node_not_found(node_id))?;
        node.position = position;

        self.emit_event(GraphEvents::MoveNode {
            id: node_id.to_owned(),
            position,
        });
        Ok(())
    }

    /// Write simulation output into a stream's computed properties. Known
    /// keys fill the typed fields, anything else lands in `properties`.
    pub fn set_stream_results(&mut self, stream_id: &str, results: &Value) -> Result<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| GraphError::stream_not_found(stream_id))?;

        stream.clear_results();
        if let Some(fields) = results.as_object() {
            for (key, value) in fields {
                match key.as_str() {
                    "temperature" => stream.temperature = value.as_f64(),
                    "pressure" => stream.pressure = value.as_f64(),
                    "molar_flow" | "flow_rate" => stream.molar_flow = value.as_f64(),
                    "mass_flow" => stream.mass_flow = value.as_f64(),
                    "composition" => {
                        if let Some(components) = value.as_object() {
                            stream.composition = components
                                .iter()
                                .filter_map(|(c, x)| x.as_f64().map(|x| (c.clone(), x)))
                                .collect();
                        }
                    }
                    _ => {
                        stream.properties.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let stream = stream.clone();
        self.emit_event(GraphEvents::ChangeStream(stream));
        Ok(())
    }

    /// Drop computed properties from every stream.
    pub fn clear_stream_results(&mut self) {
        let mut changed = Vec::new();
        for stream in self.streams.values_mut() {
            if stream.has_results() || !stream.properties.is_empty() {
                stream.clear_results();
                changed.push(stream.clone());
            }
        }
        for stream in changed {
            self.emit_event(GraphEvents::ChangeStream(stream));
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            streams: self.streams.clone(),
        }
    }

    /// Replace the live node, edge and stream sets with the snapshot's.
    pub fn restore(&mut self, snapshot: &GraphSnapshot) {
        self.nodes = snapshot.nodes.clone();
        self.edges = snapshot.edges.clone();
        self.streams = snapshot.streams.clone();
        self.rebuild_port_indices();
        self.emit_event(GraphEvents::Reset);
    }

    fn rebuild_port_indices(&mut self) {
        self.inlet_index.clear();
        self.outlet_index.clear();
        for edge in self.edges.values() {
            self.outlet_index.insert(
                (edge.source_node.clone(), edge.source_port.clone()),
                edge.id.clone(),
            );
            self.inlet_index.insert(
                (edge.target_node.clone(), edge.target_port.clone()),
                edge.id.clone(),
            );
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.streams.clear();
        self.inlet_index.clear();
        self.outlet_index.clear();
        self.graph_errors.clear();
        self.emit_event(GraphEvents::Reset);
    }

    /// Replace the graph with a persisted flowsheet.
    ///
    /// Units without declared ports get the registry ports. Connections that
    /// would break an invariant are skipped and recorded in [`Self::errors`]
    /// rather than failing the whole load. Streams not owned by a surviving
    /// connection are dropped.
    pub fn load(&mut self, flowsheet: &Flowsheet) {
        self.nodes.clear();
        self.edges.clear();
        self.streams.clear();
        self.inlet_index.clear();
        self.outlet_index.clear();
        self.graph_errors.clear();

        for unit in &flowsheet.units {
            let mut node = unit.clone();
            if self.nodes.contains_key(&node.id) {
                warn!(node = %node.id, "skipping duplicate unit");
                self.graph_errors.push(GraphError::DuplicateNode(node.id));
                continue;
            }
            fill_missing_ports(&mut node);
            self.nodes.insert(node.id.clone(), node);
        }

        let persisted_streams: HashMap<&str, &Stream> = flowsheet
            .streams
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();

        for connection in &flowsheet.connections {
            if self.edges.contains_key(&connection.id) {
                self.graph_errors.push(GraphError::InvalidConnection(format!(
                    "duplicate connection id {}",
                    connection.id
                )));
                continue;
            }
            if let Err(err) = self.check_connection(
                &connection.source_node,
                &connection.source_port,
                &connection.target_node,
                &connection.target_port,
            ) {
                warn!(connection = %connection.id, "skipping connection: {}", err);
                self.graph_errors.push(err);
                continue;
            }

            let mut edge = connection.clone();
            if edge.stream_id.is_empty() || self.streams.contains_key(&edge.stream_id) {
                edge.stream_id = self.next_stream_id();
            }
            let stream = match persisted_streams.get(connection.stream_id.as_str()) {
                Some(stream) => Stream {
                    id: edge.stream_id.clone(),
                    ..(*stream).clone()
                },
                None => Stream::new(edge.stream_id.clone(), edge.stream_id.clone()),
            };
            self.streams.insert(edge.stream_id.clone(), stream);
            self.attach_edge(edge);
        }

        debug!(
            flowsheet = %flowsheet.id,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            skipped = self.graph_errors.len(),
            "loaded flowsheet"
        );
        self.emit_event(GraphEvents::Reset);
    }

    /// Copy the graph into a flowsheet record, keeping its identity fields.
    pub fn export_into(&self, flowsheet: &mut Flowsheet) {
        flowsheet.units = self.nodes.values().cloned().collect();
        flowsheet.streams = self.streams.values().cloned().collect();
        flowsheet.connections = self.edges.values().cloned().collect();
    }

    pub fn update_payload(&self) -> FlowsheetUpdate {
        self.snapshot().to_update()
    }

    /// Re-check every referential invariant and report each violation.
    pub fn validate(&self) -> Vec<GraphError> {
        let mut problems = Vec::new();
        let mut inlets: HashMap<(&str, &str), &str> = HashMap::new();
        let mut outlets: HashMap<(&str, &str), &str> = HashMap::new();

        for edge in self.edges.values() {
            if edge.source_node == edge.target_node {
                problems.push(GraphError::InvalidConnection(format!(
                    "{} connects {} to itself",
                    edge.id, edge.source_node
                )));
            }
            match self.nodes.get(&edge.source_node) {
                Some(node) if !node.has_outlet(&edge.source_port) => {
                    problems.push(GraphError::InvalidConnection(format!(
                        "{} uses unknown outlet {}.{}",
                        edge.id, edge.source_node, edge.source_port
                    )))
                }
                None => problems.push(GraphError::node_not_found(&edge.source_node)),
                _ => {}
            }
            match self.nodes.get(&edge.target_node) {
                Some(node) if !node.has_inlet(&edge.target_port) => {
                    problems.push(GraphError::InvalidConnection(format!(
                        "{} uses unknown inlet {}.{}",
                        edge.id, edge.target_node, edge.target_port
                    )))
                }
                None => problems.push(GraphError::node_not_found(&edge.target_node)),
                _ => {}
            }
            let outlet = (edge.source_node.as_str(), edge.source_port.as_str());
            if let Some(other) = outlets.insert(outlet, &edge.id) {
                problems.push(GraphError::InvalidConnection(format!(
                    "{} and {} share outlet {}.{}",
                    other, edge.id, edge.source_node, edge.source_port
                )));
            }
            let inlet = (edge.target_node.as_str(), edge.target_port.as_str());
            if let Some(other) = inlets.insert(inlet, &edge.id) {
                problems.push(GraphError::InvalidConnection(format!(
                    "{} and {} share inlet {}.{}",
                    other, edge.id, edge.target_node, edge.target_port
                )));
            }
            if !self.streams.contains_key(&edge.stream_id) {
                problems.push(GraphError::stream_not_found(&edge.stream_id));
            }
        }

        for stream_id in self.streams.keys() {
            if !self.edges.values().any(|e| &e.stream_id == stream_id) {
                problems.push(GraphError::InvalidConnection(format!(
                    "stream {} is not carried by any connection",
                    stream_id
                )));
            }
        }

        problems
    }
}

fn fill_missing_ports(node: &mut Node) {
    if node.inlet_ports.is_empty() && node.outlet_ports.is_empty() {
        let (inlets, outlets) = UnitTypeRegistry::ports(&node.unit_type);
        node.inlet_ports = inlets;
        node.outlet_ports = outlets;
    }
}
