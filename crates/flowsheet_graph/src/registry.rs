//! Static knowledge about unit operation kinds: how many ports each has,
//! which parameters it starts with and how it is described to users.

use crate::types::{Parameters, UnitType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCardinality {
    pub inlets: usize,
    pub outlets: usize,
}

/// Catalog entry as listed by the unit type picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTypeInfo {
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub description: String,
}

pub struct UnitTypeRegistry;

impl UnitTypeRegistry {
    pub fn port_cardinality(unit_type: &UnitType) -> PortCardinality {
        let (inlets, outlets) = match unit_type {
            UnitType::Mixer => (2, 1),
            UnitType::Splitter | UnitType::Flash | UnitType::DistillationColumn => (1, 2),
            UnitType::HeatExchanger => (2, 2),
            // unknown kinds stay connectable
            _ => (1, 1),
        };
        PortCardinality { inlets, outlets }
    }

    /// Ordered inlet and outlet port ids (`in1..inN`, `out1..outN`).
    pub fn ports(unit_type: &UnitType) -> (Vec<String>, Vec<String>) {
        let cardinality = Self::port_cardinality(unit_type);
        let inlets = (1..=cardinality.inlets).map(|i| format!("in{}", i)).collect();
        let outlets = (1..=cardinality.outlets).map(|i| format!("out{}", i)).collect();
        (inlets, outlets)
    }

    pub fn default_parameters(unit_type: &UnitType) -> Parameters {
        let pairs: &[(&str, f64)] = match unit_type {
            UnitType::Reactor => &[("temperature", 350.0), ("pressure", 1.0), ("conversion", 0.85)],
            UnitType::Heater => &[("outlet_temperature", 200.0), ("pressure_drop", 0.1)],
            UnitType::Cooler => &[("outlet_temperature", 50.0), ("pressure_drop", 0.1)],
            UnitType::Pump => &[("outlet_pressure", 5.0), ("efficiency", 0.75)],
            UnitType::Compressor => &[("outlet_pressure", 10.0), ("efficiency", 0.8)],
            UnitType::Valve => &[("outlet_pressure", 1.0)],
            UnitType::DistillationColumn => {
                &[("stages", 20.0), ("reflux_ratio", 2.5), ("feed_stage", 10.0)]
            }
            UnitType::Mixer => &[("pressure", 1.0)],
            UnitType::Splitter => &[("split_fraction", 0.5)],
            UnitType::Flash => &[("temperature", 80.0), ("pressure", 1.0)],
            UnitType::HeatExchanger => &[("area", 50.0), ("overall_u", 500.0)],
            UnitType::Other(_) => &[],
        };

        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).into()))
            .collect()
    }

    pub fn description(unit_type: &UnitType) -> &'static str {
        match unit_type {
            UnitType::Reactor => "Chemical reactor for conversions",
            UnitType::Heater => "Heat exchanger for heating streams",
            UnitType::Cooler => "Heat exchanger for cooling streams",
            UnitType::Pump => "Pump for liquid pressure increase",
            UnitType::Compressor => "Compressor for gas pressure increase",
            UnitType::Valve => "Pressure reduction valve",
            UnitType::DistillationColumn => "Separation by distillation",
            UnitType::Mixer => "Stream mixing unit",
            UnitType::Splitter => "Stream splitting unit",
            UnitType::Flash => "Flash separation vessel",
            UnitType::HeatExchanger => "Heat transfer between streams",
            UnitType::Other(_) => "Unrecognised unit type",
        }
    }

    pub fn catalog() -> Vec<UnitTypeInfo> {
        UnitType::KNOWN
            .iter()
            .map(|unit_type| UnitTypeInfo {
                unit_type: unit_type.clone(),
                description: Self::description(unit_type).to_owned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamValue;

    #[test]
    fn test_port_layout() {
        let (inlets, outlets) = UnitTypeRegistry::ports(&UnitType::Mixer);
        assert_eq!(inlets, vec!["in1", "in2"]);
        assert_eq!(outlets, vec!["out1"]);

        let (inlets, outlets) = UnitTypeRegistry::ports(&UnitType::DistillationColumn);
        assert_eq!(inlets, vec!["in1"]);
        assert_eq!(outlets, vec!["out1", "out2"]);

        let cardinality = UnitTypeRegistry::port_cardinality(&UnitType::HeatExchanger);
        assert_eq!(cardinality, PortCardinality { inlets: 2, outlets: 2 });
    }

    #[test]
    fn test_unknown_type_is_connectable_without_defaults() {
        let unknown = UnitType::from("Crystallizer");
        assert_eq!(
            UnitTypeRegistry::port_cardinality(&unknown),
            PortCardinality { inlets: 1, outlets: 1 }
        );
        assert!(UnitTypeRegistry::default_parameters(&unknown).is_empty());
    }

    #[test]
    fn test_reactor_defaults() {
        let defaults = UnitTypeRegistry::default_parameters(&UnitType::Reactor);
        assert_eq!(defaults.get("temperature"), Some(&ParamValue::Number(350.0)));
        assert_eq!(defaults.get("conversion"), Some(&ParamValue::Number(0.85)));
        assert_eq!(defaults.len(), 3);
    }

    #[test]
    fn test_catalog_lists_every_known_type() {
        let catalog = UnitTypeRegistry::catalog();
        assert_eq!(catalog.len(), UnitType::KNOWN.len());
        assert!(catalog
            .iter()
            .any(|info| info.unit_type == UnitType::Flash && info.description == "Flash separation vessel"));
    }
}
