//! Decision rules over case data and routing history.
//!
//! A rule's antecedent is a conjunction of expectations. Each expectation is
//! keyed either by a case attribute or by a tree node that counts as "taken"
//! in the running case. Evaluation never fails: a key absent from the
//! condition simply makes the rule not match.

use crate::error::StructuralError;
use crate::tree::{NodeId, Operator, ProcessTree};
use crate::types::{AttributeKind, AttributeValue, CaseAttributeSpec};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionKey {
    /// The node's input token was set this run and not routed past since.
    Node(NodeId),
    Attribute(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expectation {
    Bool(bool),
    /// Half-open `[lo, hi)`.
    Interval { lo: f64, hi: f64 },
}

impl Expectation {
    fn describe(&self) -> &'static str {
        match self {
            Expectation::Bool(_) => "a bool",
            Expectation::Interval { .. } => "an interval",
        }
    }

    pub fn matches(&self, value: &AttributeValue) -> bool {
        match (self, value) {
            (Expectation::Bool(expected), AttributeValue::Bool(actual)) => expected == actual,
            (Expectation::Interval { lo, hi }, AttributeValue::Real(x)) => *lo <= *x && *x < *hi,
            _ => false,
        }
    }
}

/// Snapshot of case state a rule is evaluated against.
pub type Condition = BTreeMap<ConditionKey, AttributeValue>;

/// Build the condition from case attributes plus the nodes taken so far.
pub fn build_condition(
    attributes: &BTreeMap<String, AttributeValue>,
    taken: impl IntoIterator<Item = NodeId>,
) -> Condition {
    let mut condition: Condition = attributes
        .iter()
        .map(|(name, value)| (ConditionKey::Attribute(name.clone()), value.clone()))
        .collect();
    for node in taken {
        condition.insert(ConditionKey::Node(node), AttributeValue::Bool(true));
    }
    condition
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionRule {
    pub antecedent: BTreeMap<ConditionKey, Expectation>,
    /// Branch of the choice this rule routes to.
    pub consequent: NodeId,
}

impl DecisionRule {
    pub fn new(consequent: NodeId) -> Self {
        Self {
            antecedent: BTreeMap::new(),
            consequent,
        }
    }

    pub fn when_attribute(mut self, name: impl Into<String>, expectation: Expectation) -> Self {
        self.antecedent
            .insert(ConditionKey::Attribute(name.into()), expectation);
        self
    }

    pub fn when_taken(mut self, node: NodeId) -> Self {
        self.antecedent
            .insert(ConditionKey::Node(node), Expectation::Bool(true));
        self
    }

    pub fn matches(&self, condition: &Condition) -> bool {
        self.antecedent.iter().all(|(key, expected)| {
            condition
                .get(key)
                .is_some_and(|value| expected.matches(value))
        })
    }
}

/// Decision rules grouped by the choice they govern, plus the choices whose
/// outcome is recorded as a case attribute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleSet {
    rules: BTreeMap<NodeId, Vec<DecisionRule>>,
    recorded: BTreeSet<NodeId>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, choice: NodeId, rule: DecisionRule) -> &mut Self {
        self.rules.entry(choice).or_default().push(rule);
        self
    }

    pub fn record_choice(&mut self, choice: NodeId) -> &mut Self {
        self.recorded.insert(choice);
        self
    }

    pub fn rules_for(&self, choice: NodeId) -> &[DecisionRule] {
        self.rules.get(&choice).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn recorded_choices(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.recorded.iter().copied()
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the declared case attributes, then every rule against the tree
    /// and those attributes.
    pub fn validate(
        &self,
        tree: &ProcessTree,
        attributes: &[CaseAttributeSpec],
    ) -> Result<(), StructuralError> {
        for attribute in attributes {
            if let Some(value) = &attribute.fixed {
                if !attribute.kind.admits(value) {
                    return Err(StructuralError::FixedValueKindMismatch {
                        name: attribute.name.clone(),
                        kind: attribute.kind,
                    });
                }
            }
        }
        let declared: BTreeMap<&str, AttributeKind> = attributes
            .iter()
            .map(|a| (a.name.as_str(), a.kind))
            .collect();

        for &choice in self.recorded.iter().chain(self.rules.keys()) {
            if !tree.contains(choice) {
                return Err(StructuralError::UnknownNode { node: choice });
            }
            if tree.operator(choice) != Some(Operator::Choice) {
                return Err(StructuralError::RuleOnNonChoice { node: choice });
            }
        }

        for (&choice, rules) in &self.rules {
            for rule in rules {
                if !tree.children(choice).contains(&rule.consequent) {
                    return Err(StructuralError::ConsequentNotBranch {
                        choice,
                        consequent: rule.consequent,
                    });
                }
                for (key, expectation) in &rule.antecedent {
                    match key {
                        ConditionKey::Node(node) if !tree.contains(*node) => {
                            return Err(StructuralError::UnknownNode { node: *node });
                        }
                        ConditionKey::Node(_) => {}
                        ConditionKey::Attribute(name) => {
                            let Some(&kind) = declared.get(name.as_str()) else {
                                return Err(StructuralError::UndeclaredAttribute {
                                    choice,
                                    name: name.clone(),
                                });
                            };
                            let expected = match expectation {
                                Expectation::Bool(_) => AttributeKind::Bool,
                                Expectation::Interval { .. } => AttributeKind::Numeric,
                            };
                            if kind != expected {
                                return Err(StructuralError::ExpectationKindMismatch {
                                    choice,
                                    name: name.clone(),
                                    kind,
                                    expected: expectation.describe(),
                                });
                            }
                            if let Expectation::Interval { lo, hi } = expectation {
                                if lo.partial_cmp(hi) != Some(Ordering::Less) {
                                    return Err(StructuralError::EmptyInterval {
                                        choice,
                                        name: name.clone(),
                                        lo: *lo,
                                        hi: *hi,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
