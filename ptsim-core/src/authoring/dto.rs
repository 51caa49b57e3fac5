use crate::config::SimulationConfig;
use crate::types::{AttributeKind, AttributeValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Top-level DTO ──

/// A complete simulation document: tree, case data, rules and config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSpecDto {
    pub tree: NodeDto,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleDto>,
    /// Rules removed from the model, used only for noise cases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub noise_rules: Vec<RuleDto>,
    /// Keys of choices whose outcome becomes a `choice_<key>` case attribute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub record_choices: Vec<String>,
    #[serde(default)]
    pub config: SimulationConfig,
}

// ── Tree ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindDto {
    Leaf,
    Tau,
    Sequence,
    Choice,
    Parallel,
    Or,
    Loop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDto {
    pub kind: NodeKindDto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Branch probability under a choice, or redo/exit weight under a loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Loops take exactly three: do, redo, exit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDto>,
}

// ── Case data ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDto {
    pub name: String,
    pub kind: AttributeKind,
    /// Pins the attribute instead of drawing it per case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
}

// ── Rules ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectationDto {
    Bool(bool),
    /// `[lo, hi)`
    Interval([f64; 2]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDto {
    /// Key of the governed choice.
    pub choice: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, ExpectationDto>,
    /// Keys of nodes that must have been taken.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taken: Vec<String>,
    /// Key of the branch to route to.
    pub then: String,
}
