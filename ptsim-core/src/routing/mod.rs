//! Routing strategies for splits.
//!
//! Each split node gets one [`SplitPolicy`], resolved once per tree. The
//! runtime asks the table which arms to fire; rule-governed choices evaluate
//! their rules against a condition built lazily from the running case.

pub mod rng;
pub mod rules;

pub use rng::SimRng;
pub use rules::{build_condition, Condition, ConditionKey, DecisionRule, Expectation, RuleSet};

use crate::tree::{NodeId, Operator, ProcessTree};
use std::collections::BTreeMap;

/// Map `x ∈ [0, 1)` to a branch through cumulative cutoffs in branch order.
/// The first cutoff exceeding `x` wins; residual mass goes to the last branch.
pub fn pick_weighted(weights: &[f64], x: f64) -> usize {
    let mut cutoff = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cutoff += w;
        if x < cutoff {
            return i;
        }
    }
    weights.len().saturating_sub(1)
}

/// A decision rule resolved to the arm of its choice.
#[derive(Clone, Debug, PartialEq)]
struct ArmRule {
    rule: DecisionRule,
    arm: usize,
}

#[derive(Clone, Debug, PartialEq)]
enum SplitPolicy {
    /// Every arm, in random order.
    Parallel,
    /// Uniform count in `1..=k`, then a uniform subset of that size.
    Inclusive,
    Exclusive {
        weights: Vec<f64>,
        rules: Vec<ArmRule>,
    },
    /// Redo (arm 0) versus exit (arm 1).
    LoopBack { weights: Option<[f64; 2]> },
}

/// Outcome of one rule evaluation at a choice.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleFiring {
    pub candidates: Vec<usize>,
    pub chosen: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingDecision {
    /// Arms to fire, in firing order.
    pub arms: Vec<usize>,
    pub fired: Option<RuleFiring>,
}

impl RoutingDecision {
    fn single(arm: usize) -> Self {
        Self {
            arms: vec![arm],
            fired: None,
        }
    }
}

/// Per-tree routing: one policy per split node, plus the leaves whose
/// completion records a choice outcome.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    policies: BTreeMap<NodeId, SplitPolicy>,
    /// Leaf → attribute name it writes on completion.
    choice_records: BTreeMap<NodeId, String>,
}

impl RoutingTable {
    /// Expects a validated tree and rule set.
    pub fn new(tree: &ProcessTree, rules: &RuleSet) -> Self {
        let mut policies = BTreeMap::new();
        for id in tree.ids() {
            let children = tree.children(id);
            let policy = match tree.operator(id) {
                Some(Operator::Parallel) => SplitPolicy::Parallel,
                Some(Operator::Or) => SplitPolicy::Inclusive,
                Some(Operator::Choice) => SplitPolicy::Exclusive {
                    weights: branch_weights(tree, children),
                    rules: rules
                        .rules_for(id)
                        .iter()
                        .filter_map(|rule| {
                            let arm = children.iter().position(|&c| c == rule.consequent)?;
                            Some(ArmRule {
                                rule: rule.clone(),
                                arm,
                            })
                        })
                        .collect(),
                },
                Some(Operator::Loop) => {
                    let redo = tree.node(children[1]).weight;
                    let exit = tree.node(children[2]).weight;
                    SplitPolicy::LoopBack {
                        weights: redo.zip(exit).map(|(r, e)| [r, e]),
                    }
                }
                Some(Operator::Sequence) | None => continue,
            };
            policies.insert(id, policy);
        }

        let mut choice_records = BTreeMap::new();
        for choice in rules.recorded_choices() {
            let attribute = format!("choice_{}", tree.display_name(choice));
            for &branch in tree.children(choice) {
                for leaf in tree.first_leaves(branch) {
                    choice_records.insert(leaf, attribute.clone());
                }
            }
        }

        Self {
            policies,
            choice_records,
        }
    }

    /// Attribute written when `leaf` completes, if its choice is recorded.
    pub fn choice_record(&self, leaf: NodeId) -> Option<&str> {
        self.choice_records.get(&leaf).map(String::as_str)
    }

    /// Choose the arms a split at `node` fires. `condition` is only built when
    /// the node has rules attached.
    pub fn route(
        &self,
        node: NodeId,
        arm_count: usize,
        rng: &mut SimRng,
        condition: impl FnOnce() -> Condition,
    ) -> RoutingDecision {
        match self.policies.get(&node) {
            Some(SplitPolicy::Parallel) | None => {
                let mut arms: Vec<usize> = (0..arm_count).collect();
                rng.shuffle(&mut arms);
                RoutingDecision { arms, fired: None }
            }
            Some(SplitPolicy::Inclusive) => {
                let count = rng.index(arm_count) + 1;
                let mut arms = rng.subset(arm_count, count);
                rng.shuffle(&mut arms);
                RoutingDecision { arms, fired: None }
            }
            Some(SplitPolicy::Exclusive { weights, rules }) => {
                if !rules.is_empty() {
                    let condition = condition();
                    let mut candidates: Vec<usize> = Vec::new();
                    for r in rules {
                        if r.rule.matches(&condition) && !candidates.contains(&r.arm) {
                            candidates.push(r.arm);
                        }
                    }
                    if !candidates.is_empty() {
                        let chosen = pick_candidate(weights, &candidates, rng);
                        return RoutingDecision {
                            arms: vec![chosen],
                            fired: Some(RuleFiring { candidates, chosen }),
                        };
                    }
                }
                RoutingDecision::single(pick_weighted(weights, rng.sample_f64()))
            }
            Some(SplitPolicy::LoopBack { weights }) => RoutingDecision::single(match weights {
                Some(w) => pick_weighted(w, rng.sample_f64()),
                None => rng.index(2),
            }),
        }
    }
}

/// Explicit branch weights, or uniform when none are given.
fn branch_weights(tree: &ProcessTree, children: &[NodeId]) -> Vec<f64> {
    let explicit: Option<Vec<f64>> = children.iter().map(|&c| tree.node(c).weight).collect();
    explicit.unwrap_or_else(|| vec![1.0 / children.len() as f64; children.len()])
}

/// Weighted pick among rule candidates, with weights renormalized over them.
fn pick_candidate(weights: &[f64], candidates: &[usize], rng: &mut SimRng) -> usize {
    if let [only] = candidates {
        return *only;
    }
    let total: f64 = candidates.iter().map(|&arm| weights[arm]).sum();
    let normalized: Vec<f64> = if total > 0.0 {
        candidates.iter().map(|&arm| weights[arm] / total).collect()
    } else {
        vec![1.0 / candidates.len() as f64; candidates.len()]
    };
    candidates[pick_weighted(&normalized, rng.sample_f64())]
}
