//! Serde authoring surface: YAML documents describing a tree, its case
//! attributes and decision rules.

pub mod convert;
pub mod dto;
pub mod yaml;

pub use convert::Scenario;
pub use yaml::{load_scenario_yaml, parse_spec_yaml};
