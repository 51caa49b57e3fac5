use ptsim_core::builder::CaseBuilder;
use ptsim_core::events::RuntimeEvent;
use ptsim_core::routing::{RoutingTable, SimRng};
use ptsim_core::runtime::Runtime;
use ptsim_core::tree::SILENT_LABEL;
use ptsim_core::*;
use std::collections::BTreeSet;

fn config(seed: u64) -> SimulationConfig {
    SimulationConfig::seeded(seed)
}

/// sequence(loop(a, parallel(b, c), tau), or(d, choice(e, sequence(f, tau))), g)
fn mixed_tree() -> ProcessTree {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let bb = b.leaf("b");
    let c = b.leaf("c");
    let par = b.parallel([bb, c]);
    let t1 = b.tau();
    let lp = b.loop_node(a, par, t1);
    let d = b.leaf("d");
    let e = b.leaf("e");
    let f = b.leaf("f");
    let t2 = b.tau();
    let fs = b.sequence([f, t2]);
    let ch = b.choice([(e, 0.4), (fs, 0.6)]);
    let or = b.or([d, ch]);
    let g = b.leaf("g");
    let root = b.sequence([lp, or, g]);
    b.build(root).unwrap()
}

#[test]
fn sequence_scenario_is_always_a_then_b() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let c = b.leaf("b");
    let root = b.sequence([a, c]);
    let tree = b.build(root).unwrap();

    let log = simulate(&tree, None, &[], 100, config(1)).unwrap();
    assert_eq!(log.len(), 100);
    assert!(log.traces().all(|t| t == ["a", "b"]));
}

#[test]
fn choice_scenario_produces_both_branches_evenly() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let c = b.leaf("b");
    let root = b.choice([(a, 0.5), (c, 0.5)]);
    let tree = b.build(root).unwrap();

    let log = simulate(&tree, None, &[], 1000, config(2)).unwrap();
    let count_a = log.traces().filter(|t| *t == ["a"]).count();
    let count_b = log.traces().filter(|t| *t == ["b"]).count();
    assert_eq!(count_a + count_b, 1000);
    assert!((400..=600).contains(&count_a), "a chosen {count_a} times");
}

#[test]
fn loop_scenario_ends_after_do_child() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let bb = b.leaf("b");
    let c = b.leaf("c");
    let redo = b.sequence([bb, c]);
    let exit = b.tau();
    b.set_weight(redo, 0.5);
    b.set_weight(exit, 0.5);
    let root = b.loop_node(a, redo, exit);
    let tree = b.build(root).unwrap();

    let log = simulate(&tree, None, &[], 500, config(3)).unwrap();
    let mut max_len = 0;
    for trace in log.traces() {
        assert_eq!(trace.len() % 3, 1, "{trace:?}");
        for (i, act) in trace.iter().enumerate() {
            let expected = ["a", "b", "c"][i % 3];
            assert_eq!(*act, expected, "{trace:?}");
        }
        max_len = max_len.max(trace.len());
    }
    assert!(max_len >= 4, "redo never taken");
}

#[test]
fn traces_are_nonempty_and_never_silent() {
    let tree = mixed_tree();
    let log = simulate(&tree, None, &[], 300, config(4)).unwrap();
    for trace in log.traces() {
        assert!(!trace.is_empty());
        assert!(!trace.contains(&SILENT_LABEL));
    }
}

#[test]
fn parallel_runs_every_child_once_before_join() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let x = b.leaf("x");
    let y = b.leaf("y");
    let xy = b.sequence([x, y]);
    let d = b.leaf("d");
    let par = b.parallel([a, xy, d]);
    let z = b.leaf("z");
    let root = b.sequence([par, z]);
    let tree = b.build(root).unwrap();

    let log = simulate(&tree, None, &[], 200, config(5)).unwrap();
    let mut orders = BTreeSet::new();
    for trace in log.traces() {
        assert_eq!(trace.len(), 5);
        assert_eq!(trace[4], "z");
        let body: BTreeSet<&str> = trace[..4].iter().copied().collect();
        assert_eq!(body, BTreeSet::from(["a", "d", "x", "y"]));
        let xi = trace.iter().position(|&l| l == "x").unwrap();
        let yi = trace.iter().position(|&l| l == "y").unwrap();
        assert!(xi < yi);
        orders.insert(trace[..4].join(","));
    }
    assert!(orders.len() > 1, "parallel branches never interleaved");
}

#[test]
fn choice_is_exclusive() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let bb = b.leaf("b");
    let left = b.sequence([a, bb]);
    let c = b.leaf("c");
    let d = b.leaf("d");
    let right = b.parallel([c, d]);
    let root = b.choice_uniform([left, right]);
    let tree = b.build(root).unwrap();

    let log = simulate(&tree, None, &[], 300, config(6)).unwrap();
    for trace in log.traces() {
        let left_hits = trace.iter().filter(|l| ["a", "b"].contains(*l)).count();
        let right_hits = trace.iter().filter(|l| ["c", "d"].contains(*l)).count();
        assert!(
            (left_hits == 2 && right_hits == 0) || (left_hits == 0 && right_hits == 2),
            "{trace:?}"
        );
    }
}

#[test]
fn or_split_covers_exactly_the_chosen_arms() {
    let mut b = TreeBuilder::new();
    let leaves: Vec<NodeId> = ["a", "b", "c"].iter().map(|l| b.leaf(*l)).collect();
    let or = b.or(leaves);
    let tree = b.build(or).unwrap();
    let mut cfg = config(7);
    cfg.record_events = true;

    let log = simulate(&tree, None, &[], 300, cfg).unwrap();
    let mut sizes = BTreeSet::new();
    for case in &log.cases {
        let fired = case
            .events
            .iter()
            .find_map(|e| match e {
                RuntimeEvent::SplitFired { node, arms, .. } if *node == or => Some(arms.len()),
                _ => None,
            })
            .unwrap();
        let distinct: BTreeSet<&str> = case.activities().into_iter().collect();
        assert_eq!(distinct.len(), fired);
        assert_eq!(case.trace.len(), fired);
        assert!((1..=3).contains(&fired));
        sizes.insert(fired);
    }
    assert_eq!(sizes, BTreeSet::from([1, 2, 3]));
}

#[test]
fn every_case_terminates() {
    let tree = mixed_tree();
    let log = simulate(&tree, None, &[], 500, config(8)).unwrap();
    assert_eq!(log.len(), 500);
    assert!(log.aborted.is_empty());
    for trace in log.traces() {
        assert_eq!(trace.last(), Some(&"g"));
    }
}

#[test]
fn fixed_seed_replays_identically() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let c = b.leaf("c");
    let ch = b.choice([(a, 0.5), (c, 0.5)]);
    let d = b.leaf("d");
    let root = b.sequence([ch, d]);
    let tree = b.build(root).unwrap();
    let attrs = vec![CaseAttributeSpec::new("score", AttributeKind::Numeric)];
    let mut rules = RuleSet::new();
    rules.add(
        ch,
        DecisionRule::new(c).when_attribute("score", Expectation::Interval { lo: 0.0, hi: 0.3 }),
    );

    let first = simulate(&tree, Some(&rules), &attrs, 200, config(9)).unwrap();
    let second = simulate(&tree, Some(&rules), &attrs, 200, config(9)).unwrap();
    assert_eq!(first, second);
    let third = simulate(&tree, Some(&rules), &attrs, 200, config(10)).unwrap();
    assert_ne!(first, third);
}

#[test]
fn branch_frequencies_follow_weights() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let c = b.leaf("c");
    let root = b.choice([(a, 0.3), (c, 0.7)]);
    let tree = b.build(root).unwrap();

    let n = 10_000;
    let log = simulate(&tree, None, &[], n, config(11)).unwrap();
    let freq_a = log.traces().filter(|t| *t == ["a"]).count() as f64 / n as f64;
    assert!((freq_a - 0.3).abs() < 0.02, "observed {freq_a}");
}

#[test]
fn rules_route_on_case_attributes() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("fast_track");
    let c = b.leaf("full_review");
    let root = b.choice([(a, 0.5), (c, 0.5)]);
    let tree = b.build(root).unwrap();
    let attrs = vec![CaseAttributeSpec::new("vip", AttributeKind::Bool)];
    let mut rules = RuleSet::new();
    rules.add(root, DecisionRule::new(a).when_attribute("vip", Expectation::Bool(true)));
    rules.add(root, DecisionRule::new(c).when_attribute("vip", Expectation::Bool(false)));

    let log = simulate(&tree, Some(&rules), &attrs, 300, config(12)).unwrap();
    for case in &log.cases {
        assert_eq!(case.rules_fired, 1);
        let expected = match case.attributes["vip"] {
            AttributeValue::Bool(true) => "fast_track",
            _ => "full_review",
        };
        assert_eq!(case.activities(), vec![expected]);
    }
}

#[test]
fn rules_route_on_earlier_choices() {
    // sequence(choice(a, b), choice(c, d)) with a → c and b → d
    let mut bld = TreeBuilder::new();
    let a = bld.leaf("a");
    let b = bld.leaf("b");
    let first = bld.choice([(a, 0.5), (b, 0.5)]);
    let c = bld.leaf("c");
    let d = bld.leaf("d");
    let second = bld.choice([(c, 0.5), (d, 0.5)]);
    let root = bld.sequence([first, second]);
    let tree = bld.build(root).unwrap();
    let mut rules = RuleSet::new();
    rules.add(second, DecisionRule::new(c).when_taken(a));
    rules.add(second, DecisionRule::new(d).when_taken(b));

    let log = simulate(&tree, Some(&rules), &[], 300, config(13)).unwrap();
    let mut seen = BTreeSet::new();
    for case in &log.cases {
        let trace = case.activities();
        match trace[0] {
            "a" => assert_eq!(trace, vec!["a", "c"]),
            _ => assert_eq!(trace, vec!["b", "d"]),
        }
        assert_eq!(case.rules_fired, 1);
        seen.insert(trace[0]);
    }
    assert_eq!(seen.len(), 2);
}

#[test]
fn recorded_choices_become_case_attributes() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("approve");
    let x = b.leaf("escalate");
    let y = b.leaf("reject");
    let rej = b.sequence([x, y]);
    let ch = b.choice([(a, 0.5), (rej, 0.5)]);
    b.set_key(ch, "decision");
    let tree = b.build(ch).unwrap();
    let mut rules = RuleSet::new();
    rules.record_choice(ch);

    let log = simulate(&tree, Some(&rules), &[], 100, config(14)).unwrap();
    for case in &log.cases {
        let first = case.activities()[0].to_string();
        assert_eq!(
            case.attributes["choice_decision"],
            AttributeValue::Label(first)
        );
    }
}

#[test]
fn timestamps_respect_causal_order() {
    let mut b = TreeBuilder::new();
    let a = b.leaf("a");
    let c = b.leaf("b");
    let d = b.leaf("c");
    let root = b.sequence([a, c, d]);
    let tree = b.build(root).unwrap();
    let mut cfg = config(15);
    cfg.record_timestamps = true;

    let log = simulate(&tree, None, &[], 20, cfg).unwrap();
    let mut previous_end = None;
    for case in &log.cases {
        for event in &case.trace {
            let (start, end) = (event.start.unwrap(), event.end.unwrap());
            assert!(start < end);
            if let Some(prev) = previous_end {
                assert!(prev <= start);
            }
            previous_end = Some(end);
        }
    }
}

#[test]
fn resource_pool_never_overlaps_holders() {
    let mut b = TreeBuilder::new();
    let leaves: Vec<NodeId> = ["a", "b", "c"].iter().map(|l| b.leaf(*l)).collect();
    let root = b.parallel(leaves);
    let tree = b.build(root).unwrap();
    let mut cfg = config(16);
    cfg.record_timestamps = true;
    cfg.resources.insert("clerk".into(), 1);
    for label in ["a", "b", "c"] {
        cfg.activity_resources.insert(label.into(), "clerk".into());
    }

    let log = simulate(&tree, None, &[], 50, cfg).unwrap();
    for case in &log.cases {
        let mut spans: Vec<_> = case
            .trace
            .iter()
            .map(|e| (e.start.unwrap(), e.end.unwrap()))
            .collect();
        spans.sort();
        assert!(spans.windows(2).all(|w| w[0].1 <= w[1].0), "{spans:?}");
    }
}

#[test]
fn token_pairs_balance_except_terminal() {
    let tree = mixed_tree();
    let seq = compile(&tree);
    let routing = RoutingTable::new(&tree, &RuleSet::new());
    let cfg = config(17);
    let mut rng = SimRng::new(17);
    for i in 0..200 {
        let network = CaseBuilder::new(&seq, &cfg.activity_resources).build();
        let terminal = network.terminal;
        let mut case = Case::new(i);
        let outcome = Runtime::new(network, &routing, &cfg, &mut rng, &mut case)
            .run(0)
            .unwrap();
        assert_eq!(outcome.tokens.set_tokens(), vec![terminal]);
        for (idx, token) in outcome.tokens.iter().enumerate() {
            if idx == terminal {
                assert_eq!((token.set_count, token.reset_count), (1, 0));
            } else {
                assert_eq!(token.set_count, token.reset_count, "token {idx}");
            }
        }
    }
}
