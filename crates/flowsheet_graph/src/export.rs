use serde_json::json;

use crate::error::{GraphError, Result};
use crate::graph::FlowsheetGraph;

impl FlowsheetGraph {
    /// Render the graph as CSV with columns `Type, ID, Name, Parameters`.
    ///
    /// Unit rows carry their parameters as JSON. Stream rows follow and carry
    /// temperature, pressure, flow and composition.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["Type", "ID", "Name", "Parameters"])
            .map_err(export_error)?;

        for node in self.nodes() {
            let parameters = serde_json::to_string(&node.parameters).map_err(export_error)?;
            writer
                .write_record(["Unit", node.id.as_str(), node.name.as_str(), parameters.as_str()])
                .map_err(export_error)?;
        }

        for stream in self.streams() {
            let properties = json!({
                "temperature": stream.temperature,
                "pressure": stream.pressure,
                "flow": stream.molar_flow,
                "composition": stream.composition,
            });
            let properties = properties.to_string();
            writer
                .write_record([
                    "Stream",
                    stream.id.as_str(),
                    stream.name.as_str(),
                    properties.as_str(),
                ])
                .map_err(export_error)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| GraphError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(export_error)
    }
}

fn export_error(err: impl std::fmt::Display) -> GraphError {
    GraphError::Export(err.to_string())
}

#[cfg(test)]
mod tests {
    use crate::types::{Position, UnitType};
    use crate::FlowsheetGraph;

    #[test]
    fn test_csv_layout() {
        let mut graph = FlowsheetGraph::new();
        let reactor = graph.add_node(UnitType::Reactor, Position::default());
        let heater = graph.add_node(UnitType::Heater, Position::default());
        graph.apply_default_parameters(&reactor.id).unwrap();
        let edge = graph.add_edge(&reactor.id, "out1", &heater.id, "in1").unwrap();

        let csv = graph.to_csv().unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["Type", "ID", "Name", "Parameters"]);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "Unit");
        assert_eq!(&rows[0][1], "heater_1");
        assert_eq!(&rows[1][1], "reactor_1");
        let params: serde_json::Value = serde_json::from_str(&rows[1][3]).unwrap();
        assert_eq!(params["temperature"], 350.0);

        assert_eq!(&rows[2][0], "Stream");
        assert_eq!(&rows[2][1], edge.stream_id.as_str());
        let props: serde_json::Value = serde_json::from_str(&rows[2][3]).unwrap();
        assert!(props["temperature"].is_null());
        assert!(props["composition"].as_object().unwrap().is_empty());
    }
}
