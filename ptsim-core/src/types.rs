use crate::events::RuntimeEvent;
use crate::tree::{NodeId, Operator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ─── Scalar aliases ───────────────────────────────────────────

/// Index into a case's token arena.
pub type TokenIndex = usize;

/// Index of a schedulable unit inside one case network.
pub type UnitId = usize;

/// Simulated seconds since the simulator's clock origin.
pub type SimTime = u64;

// ─── Addresses ────────────────────────────────────────────────

/// Symbolic name of a token, keyed by the network point that produces it.
///
/// Two steps that mention the same address share one token. Consumers never
/// appear in an address, so resolution needs no allocation-order bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Address {
    /// Set by the runtime when a case starts.
    Root,
    /// Completion of a leaf, or the join of a choice/parallel/or node.
    Sequential(NodeId),
    /// Output `arm` of a split. For loops, arm 0 is redo and arm 1 is exit.
    BranchSplit { node: NodeId, arm: usize },
    /// Re-entry point of a loop: merges the initial entry with every redo.
    BranchJoin(NodeId),
}

// ─── Gateways ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    /// Parallel: split fires every arm, join waits for all.
    And,
    /// Choice: split fires one arm, join waits for any.
    Xor,
    /// Inclusive: split fires a nonempty subset, join waits for that many.
    Or,
    /// Loop redo/exit split, and the loop's entry join.
    Loop,
}

impl Gateway {
    pub fn for_operator(op: Operator) -> Option<Gateway> {
        match op {
            Operator::Choice => Some(Gateway::Xor),
            Operator::Parallel => Some(Gateway::And),
            Operator::Or => Some(Gateway::Or),
            Operator::Loop => Some(Gateway::Loop),
            Operator::Sequence => None,
        }
    }
}

// ─── Compiler artifacts ───────────────────────────────────────

/// One network point emitted by the compiler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StepDescriptor {
    Activity {
        node: NodeId,
        label: String,
        start_addr: Address,
        end_addr: Address,
    },
    Split {
        node: NodeId,
        gateway: Gateway,
        start_addr: Address,
        /// Tree children reached through each output, in arm order.
        children: Vec<NodeId>,
        outputs: Vec<Address>,
    },
    Join {
        node: NodeId,
        gateway: Gateway,
        incoming: Vec<Address>,
        output: Address,
    },
}

impl StepDescriptor {
    pub fn node(&self) -> NodeId {
        match self {
            StepDescriptor::Activity { node, .. }
            | StepDescriptor::Split { node, .. }
            | StepDescriptor::Join { node, .. } => *node,
        }
    }
}

/// Output of [`crate::compiler::compile`]. Shared read-only by every case of one tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSequence {
    pub steps: Vec<StepDescriptor>,
    /// Number of distinct addresses, i.e. tokens per case.
    pub arc_count: usize,
    /// Input address of every tree node, indexed by `NodeId`.
    pub node_inputs: Vec<Address>,
    /// Address left set when the case completes.
    pub terminal: Address,
    /// SHA-256 of the serialized steps.
    pub fingerprint: [u8; 32],
}

// ─── Case attributes ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Bool,
    Numeric,
}

impl AttributeKind {
    pub fn name(self) -> &'static str {
        match self {
            AttributeKind::Bool => "bool",
            AttributeKind::Numeric => "numeric",
        }
    }

    /// Whether `value` is a value this kind of attribute can hold.
    pub fn admits(self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (AttributeKind::Bool, AttributeValue::Bool(_))
                | (AttributeKind::Numeric, AttributeValue::Real(_))
        )
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Real(f64),
    /// Outcome of a recorded choice: the label of the first activity taken.
    Label(String),
}

/// Declaration of a data attribute drawn once at case start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseAttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    /// Pinned value instead of a random draw.
    #[serde(default)]
    pub fixed: Option<AttributeValue>,
}

impl CaseAttributeSpec {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fixed: None,
        }
    }

    pub fn fixed(mut self, value: AttributeValue) -> Self {
        self.fixed = Some(value);
        self
    }
}

// ─── Cases and logs ───────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub activity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// One simulated process instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_index: usize,
    pub trace: Vec<TraceEvent>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub rules_fired: usize,
    /// Simulated under the removed (noise) rule set.
    #[serde(default)]
    pub noisy: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<RuntimeEvent>,
}

impl Case {
    pub fn new(case_index: usize) -> Self {
        Self {
            case_index,
            trace: Vec::new(),
            attributes: BTreeMap::new(),
            rules_fired: 0,
            noisy: false,
            events: Vec::new(),
        }
    }

    /// Activity labels in trace order.
    pub fn activities(&self) -> Vec<&str> {
        self.trace.iter().map(|e| e.activity.as_str()).collect()
    }
}

/// A case that was dropped without emitting a partial trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbortedCase {
    pub case_index: usize,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub cases: Vec<Case>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aborted: Vec<AbortedCase>,
}

impl Log {
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn traces(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        self.cases.iter().map(Case::activities)
    }
}
