//! Synthetic event-log generation from process trees.
//!
//! A [`ProcessTree`] is compiled once into an [`ExecutionSequence`] of
//! activity, split and join steps over symbolic token addresses. Every
//! simulated case wires that sequence into a fresh token network and runs it
//! to quiescence on a single-threaded discrete-event scheduler, producing one
//! trace plus its case attributes.
//!
//! ```
//! use ptsim_core::{simulate, SimulationConfig, TreeBuilder};
//!
//! let mut b = TreeBuilder::new();
//! let a = b.leaf("a");
//! let c = b.leaf("b");
//! let root = b.sequence([a, c]);
//! let tree = b.build(root).unwrap();
//!
//! let log = simulate(&tree, None, &[], 3, SimulationConfig::seeded(7)).unwrap();
//! assert!(log.traces().all(|t| t == ["a", "b"]));
//! ```

pub mod authoring;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod error;
pub mod events;
pub mod routing;
pub mod runtime;
pub mod simulator;
pub mod token;
pub mod tree;
pub mod types;

pub use compiler::compile;
pub use config::{DurationRange, SimulationConfig};
pub use error::{SimulationError, StructuralError};
pub use routing::{DecisionRule, Expectation, RuleSet};
pub use simulator::LogSimulator;
pub use tree::{NodeId, Operator, ProcessTree, TreeBuilder};
pub use types::{
    AttributeKind, AttributeValue, Case, CaseAttributeSpec, ExecutionSequence, Log, TraceEvent,
};

/// Simulate `n_cases` cases of `tree`.
///
/// Structural problems in the rules or config fail before any case runs.
/// Cases that fail individually are listed in [`Log::aborted`].
pub fn simulate(
    tree: &ProcessTree,
    rules: Option<&RuleSet>,
    attributes: &[CaseAttributeSpec],
    n_cases: usize,
    config: SimulationConfig,
) -> Result<Log, SimulationError> {
    let rules = rules.cloned().unwrap_or_default();
    let mut simulator = LogSimulator::with_rules(tree, rules, attributes.to_vec(), config)?;
    Ok(simulator.simulate(n_cases))
}
