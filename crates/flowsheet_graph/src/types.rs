use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Unit operation kinds understood by the editor.
///
/// Tags that are not recognised are kept verbatim in [`UnitType::Other`] so a
/// flowsheet written by a newer backend still loads and round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UnitType {
    Reactor,
    Heater,
    Cooler,
    Pump,
    Compressor,
    Valve,
    DistillationColumn,
    Mixer,
    Splitter,
    Flash,
    HeatExchanger,
    Other(String),
}

impl UnitType {
    pub const KNOWN: [UnitType; 11] = [
        UnitType::Reactor,
        UnitType::Heater,
        UnitType::Cooler,
        UnitType::Pump,
        UnitType::Compressor,
        UnitType::Valve,
        UnitType::DistillationColumn,
        UnitType::Mixer,
        UnitType::Splitter,
        UnitType::Flash,
        UnitType::HeatExchanger,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            UnitType::Reactor => "Reactor",
            UnitType::Heater => "Heater",
            UnitType::Cooler => "Cooler",
            UnitType::Pump => "Pump",
            UnitType::Compressor => "Compressor",
            UnitType::Valve => "Valve",
            UnitType::DistillationColumn => "DistillationColumn",
            UnitType::Mixer => "Mixer",
            UnitType::Splitter => "Splitter",
            UnitType::Flash => "Flash",
            UnitType::HeatExchanger => "HeatExchanger",
            UnitType::Other(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, UnitType::Other(_))
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for UnitType {
    fn from(tag: &str) -> Self {
        match tag {
            "Reactor" => UnitType::Reactor,
            "Heater" => UnitType::Heater,
            "Cooler" => UnitType::Cooler,
            "Pump" => UnitType::Pump,
            "Compressor" => UnitType::Compressor,
            "Valve" => UnitType::Valve,
            "DistillationColumn" => UnitType::DistillationColumn,
            "Mixer" => UnitType::Mixer,
            "Splitter" => UnitType::Splitter,
            "Flash" => UnitType::Flash,
            "HeatExchanger" => UnitType::HeatExchanger,
            other => UnitType::Other(other.to_owned()),
        }
    }
}

impl From<String> for UnitType {
    fn from(tag: String) -> Self {
        UnitType::from(tag.as_str())
    }
}

impl From<UnitType> for String {
    fn from(unit_type: UnitType) -> Self {
        unit_type.as_str().to_owned()
    }
}

impl FromStr for UnitType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UnitType::from(s))
    }
}

/// Canvas coordinate. Visual only, never read by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A single unit parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Flag(b) => write!(f, "{}", b),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Flag(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

pub type Parameters = BTreeMap<String, ParamValue>;

/// A unit operation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub inlet_ports: Vec<String>,
    #[serde(default)]
    pub outlet_ports: Vec<String>,
}

impl Node {
    pub fn has_inlet(&self, port: &str) -> bool {
        self.inlet_ports.iter().any(|p| p == port)
    }

    pub fn has_outlet(&self, port: &str) -> bool {
        self.outlet_ports.iter().any(|p| p == port)
    }
}

/// A directed connection between an outlet port and an inlet port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    #[serde(rename = "from_unit")]
    pub source_node: String,
    #[serde(rename = "from_port")]
    pub source_port: String,
    #[serde(rename = "to_unit")]
    pub target_node: String,
    #[serde(rename = "to_port")]
    pub target_port: String,
    pub stream_id: String,
}

impl Edge {
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node == node_id || self.target_node == node_id
    }
}

/// Material or energy stream carried by an edge. Computed fields stay unset
/// until a simulation fills them in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub molar_flow: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass_flow: Option<f64>,
    #[serde(default)]
    pub composition: BTreeMap<String, f64>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Stream {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn has_results(&self) -> bool {
        self.temperature.is_some()
            || self.pressure.is_some()
            || self.molar_flow.is_some()
            || self.mass_flow.is_some()
            || !self.composition.is_empty()
    }

    /// Drop every computed property, keeping identity and name.
    pub fn clear_results(&mut self) {
        self.temperature = None;
        self.pressure = None;
        self.molar_flow = None;
        self.mass_flow = None;
        self.composition.clear();
        self.properties.clear();
    }
}

/// Immutable capture of the structural graph at one commit point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<String, Node>,
    pub edges: BTreeMap<String, Edge>,
    pub streams: BTreeMap<String, Stream>,
}

impl GraphSnapshot {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Replace-style payload for the backend's partial update endpoint.
    pub fn to_update(&self) -> FlowsheetUpdate {
        FlowsheetUpdate {
            units: Some(self.nodes.values().cloned().collect()),
            streams: Some(self.streams.values().cloned().collect()),
            connections: Some(self.edges.values().cloned().collect()),
        }
    }
}

/// Persisted flowsheet record as exchanged with the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flowsheet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub units: Vec<Node>,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub connections: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_results: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flowsheet {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            units: Vec::new(),
            streams: Vec::new(),
            connections: Vec::new(),
            simulation_results: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> FlowsheetSummary {
        FlowsheetSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Apply a partial update: each supplied top-level list replaces the
    /// stored one wholesale.
    pub fn apply_update(&mut self, update: &FlowsheetUpdate) {
        if let Some(units) = &update.units {
            self.units = units.clone();
        }
        if let Some(streams) = &update.streams {
            self.streams = streams.clone();
        }
        if let Some(connections) = &update.connections {
            self.connections = connections.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Listing entry without graph detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowsheetSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `PUT /flowsheet/{id}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowsheetUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<Stream>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<Edge>>,
}

/// Change notifications published by [`crate::FlowsheetGraph`].
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvents {
    AddNode(Node),
    RemoveNode(Node),
    RenameNode {
        id: String,
        old: String,
        new: String,
    },
    ChangeNode {
        id: String,
        before: Parameters,
        after: Parameters,
    },
    MoveNode {
        id: String,
        position: Position,
    },
    AddConnection(Edge),
    RemoveConnection(Edge),
    ChangeStream(Stream),
    /// The whole graph was replaced (load, undo, redo).
    Reset,
}
