//! DTO → model conversion. Resolves node keys and reports structural errors.

use super::dto::{ExpectationDto, NodeDto, NodeKindDto, RuleDto, SimulationSpecDto};
use crate::config::SimulationConfig;
use crate::error::StructuralError;
use crate::routing::{DecisionRule, Expectation, RuleSet};
use crate::tree::{NodeId, Operator, ProcessTree, TreeBuilder};
use crate::types::CaseAttributeSpec;

/// Everything needed to run a simulation, validated.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub tree: ProcessTree,
    pub attributes: Vec<CaseAttributeSpec>,
    pub rules: RuleSet,
    pub noise_rules: RuleSet,
    pub config: SimulationConfig,
}

impl SimulationSpecDto {
    pub fn into_scenario(self) -> Result<Scenario, StructuralError> {
        let mut builder = TreeBuilder::new();
        let root = build_node(&mut builder, &self.tree)?;
        let tree = builder.build(root)?;

        let attributes: Vec<CaseAttributeSpec> = self
            .attributes
            .into_iter()
            .map(|a| CaseAttributeSpec {
                name: a.name,
                kind: a.kind,
                fixed: a.value,
            })
            .collect();

        let mut rules = resolve_rules(&tree, &self.rules)?;
        for key in &self.record_choices {
            rules.record_choice(resolve_key(&tree, key)?);
        }
        rules.validate(&tree, &attributes)?;

        let noise_rules = resolve_rules(&tree, &self.noise_rules)?;
        noise_rules.validate(&tree, &attributes)?;

        Ok(Scenario {
            tree,
            attributes,
            rules,
            noise_rules,
            config: self.config,
        })
    }
}

fn build_node(builder: &mut TreeBuilder, dto: &NodeDto) -> Result<NodeId, StructuralError> {
    let id = match dto.kind {
        NodeKindDto::Leaf | NodeKindDto::Tau => {
            if !dto.children.is_empty() {
                return Err(StructuralError::UnexpectedChildren {
                    kind: kind_name(dto.kind).into(),
                });
            }
            if dto.kind == NodeKindDto::Tau {
                builder.tau()
            } else {
                let label = dto.label.as_ref().ok_or_else(|| StructuralError::MissingField {
                    kind: "leaf".into(),
                    field: "label".into(),
                })?;
                builder.leaf(label.clone())
            }
        }
        kind => {
            let children = dto
                .children
                .iter()
                .map(|child| build_node(builder, child))
                .collect::<Result<Vec<_>, _>>()?;
            builder.operator(operator(kind), children)
        }
    };
    if let Some(weight) = dto.weight {
        builder.set_weight(id, weight);
    }
    if let Some(key) = &dto.key {
        builder.set_key(id, key.clone());
    }
    Ok(id)
}

fn operator(kind: NodeKindDto) -> Operator {
    match kind {
        NodeKindDto::Choice => Operator::Choice,
        NodeKindDto::Parallel => Operator::Parallel,
        NodeKindDto::Or => Operator::Or,
        NodeKindDto::Loop => Operator::Loop,
        NodeKindDto::Sequence | NodeKindDto::Leaf | NodeKindDto::Tau => Operator::Sequence,
    }
}

fn kind_name(kind: NodeKindDto) -> &'static str {
    match kind {
        NodeKindDto::Leaf => "leaf",
        NodeKindDto::Tau => "tau",
        NodeKindDto::Sequence => "sequence",
        NodeKindDto::Choice => "choice",
        NodeKindDto::Parallel => "parallel",
        NodeKindDto::Or => "or",
        NodeKindDto::Loop => "loop",
    }
}

fn resolve_key(tree: &ProcessTree, key: &str) -> Result<NodeId, StructuralError> {
    tree.find_key(key)
        .ok_or_else(|| StructuralError::UnknownKey(key.to_string()))
}

fn resolve_rules(tree: &ProcessTree, dtos: &[RuleDto]) -> Result<RuleSet, StructuralError> {
    let mut rules = RuleSet::new();
    for dto in dtos {
        let choice = resolve_key(tree, &dto.choice)?;
        let mut rule = DecisionRule::new(resolve_key(tree, &dto.then)?);
        for (name, expectation) in &dto.attributes {
            let expectation = match *expectation {
                ExpectationDto::Bool(b) => Expectation::Bool(b),
                ExpectationDto::Interval([lo, hi]) => Expectation::Interval { lo, hi },
            };
            rule = rule.when_attribute(name.clone(), expectation);
        }
        for key in &dto.taken {
            rule = rule.when_taken(resolve_key(tree, key)?);
        }
        rules.add(choice, rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::dto::AttributeDto;
    use crate::types::{AttributeKind, AttributeValue};
    use std::collections::BTreeMap;

    fn leaf(label: &str, key: Option<&str>) -> NodeDto {
        NodeDto {
            kind: NodeKindDto::Leaf,
            label: Some(label.into()),
            key: key.map(str::to_string),
            weight: None,
            children: Vec::new(),
        }
    }

    fn node(kind: NodeKindDto, key: Option<&str>, children: Vec<NodeDto>) -> NodeDto {
        NodeDto {
            kind,
            label: None,
            key: key.map(str::to_string),
            weight: None,
            children,
        }
    }

    fn spec(tree: NodeDto, rules: Vec<RuleDto>) -> SimulationSpecDto {
        SimulationSpecDto {
            tree,
            attributes: vec![AttributeDto {
                name: "amount".into(),
                kind: AttributeKind::Numeric,
                value: Some(AttributeValue::Real(0.7)),
            }],
            rules,
            noise_rules: Vec::new(),
            record_choices: Vec::new(),
            config: SimulationConfig::default(),
        }
    }

    #[test]
    fn test_rules_resolve_keys() {
        let tree = node(
            NodeKindDto::Choice,
            Some("c1"),
            vec![leaf("a", Some("A")), leaf("b", Some("B"))],
        );
        let rule = RuleDto {
            choice: "c1".into(),
            attributes: BTreeMap::from([("amount".to_string(), ExpectationDto::Interval([0.5, 1.0]))]),
            taken: Vec::new(),
            then: "B".into(),
        };
        let scenario = spec(tree, vec![rule]).into_scenario().unwrap();
        let c1 = scenario.tree.find_key("c1").unwrap();
        let b = scenario.tree.find_key("B").unwrap();
        let rules = scenario.rules.rules_for(c1);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].consequent, b);
        assert_eq!(scenario.attributes[0].fixed, Some(AttributeValue::Real(0.7)));
    }

    #[test]
    fn test_unknown_key_is_reported() {
        let tree = node(NodeKindDto::Choice, Some("c1"), vec![leaf("a", None), leaf("b", None)]);
        let rule = RuleDto {
            choice: "c1".into(),
            attributes: BTreeMap::new(),
            taken: vec!["ghost".into()],
            then: "c1".into(),
        };
        assert_eq!(
            spec(tree, vec![rule]).into_scenario().unwrap_err(),
            StructuralError::UnknownKey("ghost".into())
        );
    }

    #[test]
    fn test_leaf_without_label_and_leaf_with_children() {
        let mut bad = leaf("a", None);
        bad.label = None;
        let tree = node(NodeKindDto::Sequence, None, vec![bad]);
        assert!(matches!(
            spec(tree, Vec::new()).into_scenario(),
            Err(StructuralError::MissingField { .. })
        ));

        let mut bad = leaf("a", None);
        bad.children.push(leaf("b", None));
        assert!(matches!(
            spec(bad, Vec::new()).into_scenario(),
            Err(StructuralError::UnexpectedChildren { .. })
        ));
    }
}
