//! Error taxonomy.
//!
//! Structural problems are detected before any case runs and abort the whole
//! tree. Per-case failures carry the case index. Token protocol violations are
//! not represented here: they indicate a miswired network and panic instead.

use crate::tree::{NodeId, Operator};
use crate::types::{AttributeKind, SimTime};

/// A malformed tree or rule set. Always fatal, always raised before simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("loop {node} must have exactly 3 children (do, redo, exit), found {found}")]
    LoopArity { node: NodeId, found: usize },

    #[error("{operator} node {node} needs at least {min} children, found {found}")]
    TooFewChildren {
        node: NodeId,
        operator: Operator,
        min: usize,
        found: usize,
    },

    #[error("leaf {node} has an empty label")]
    EmptyLabel { node: NodeId },

    #[error("node {node} has invalid branch weight {weight}")]
    InvalidWeight { node: NodeId, weight: f64 },

    #[error("branches of {node} are only partially weighted")]
    PartialWeights { node: NodeId },

    #[error("duplicate node key '{0}'")]
    DuplicateKey(String),

    #[error("node {node} is attached to more than one parent")]
    NodeReused { node: NodeId },

    #[error("node {node} is not reachable from the root")]
    Unreachable { node: NodeId },

    #[error("root {node} is already attached to a parent")]
    RootHasParent { node: NodeId },

    #[error("unknown node {node}")]
    UnknownNode { node: NodeId },

    #[error("unknown node key '{0}'")]
    UnknownKey(String),

    #[error("decision rules attached to {node}, which is not a choice")]
    RuleOnNonChoice { node: NodeId },

    #[error("rule consequent {consequent} is not a branch of choice {choice}")]
    ConsequentNotBranch { choice: NodeId, consequent: NodeId },

    #[error("rule on {choice} has an empty interval [{lo}, {hi}) for '{name}'")]
    EmptyInterval {
        choice: NodeId,
        name: String,
        lo: f64,
        hi: f64,
    },

    #[error("rule on {choice} tests undeclared case attribute '{name}'")]
    UndeclaredAttribute { choice: NodeId, name: String },

    #[error("rule on {choice} expects {expected} for {kind} attribute '{name}'")]
    ExpectationKindMismatch {
        choice: NodeId,
        name: String,
        kind: AttributeKind,
        expected: &'static str,
    },

    #[error("{kind} attribute '{name}' has a fixed value of another kind")]
    FixedValueKindMismatch { name: String, kind: AttributeKind },

    #[error("{kind} node is missing field '{field}'")]
    MissingField { kind: String, field: String },

    #[error("{kind} node must not have children")]
    UnexpectedChildren { kind: String },
}

/// Failure of a simulation run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("case {case_index} exceeded {steps} scheduler steps")]
    StepLimitExceeded { case_index: usize, steps: usize },

    #[error("noise case {case_index} fired no rule after {attempts} attempts")]
    NoiseRetriesExhausted { case_index: usize, attempts: usize },

    #[error("noise simulation requested without any removed rules")]
    EmptyNoiseRules,

    #[error("case {case_index} ran the simulated clock past its range at {at}s")]
    ClockOverflow { case_index: usize, at: SimTime },
}
