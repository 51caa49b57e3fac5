//! Cooperative run loop for one case.
//!
//! Single-threaded. Setting a token enqueues its consumer on the ready queue;
//! the loop drains the queue, then advances the simulated clock to the next
//! activity completion. A case is finished when both are empty. At that
//! point the terminal token must be the only one left set.

use crate::builder::{CaseNetwork, UnitKind, UnitState};
use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::events::{EventJournal, RuntimeEvent};
use crate::routing::{build_condition, Condition, RoutingTable, SimRng};
use crate::token::TokenArena;
use crate::tree::{NodeId, SILENT_LABEL};
use crate::types::{AttributeValue, Case, Gateway, SimTime, TokenIndex, TraceEvent, UnitId};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

// ─── Timers ───────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    at: SimTime,
    seq: u64,
    unit: UnitId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ─── Resources ────────────────────────────────────────────────

#[derive(Debug)]
struct ResourcePool {
    capacity: u32,
    in_use: u32,
    waiters: VecDeque<UnitId>,
}

/// Result of running one case to quiescence.
#[derive(Debug)]
pub struct RunOutcome {
    pub finished_at: SimTime,
    pub steps: usize,
    /// Final token state, for invariant checks.
    pub tokens: TokenArena,
}

pub struct Runtime<'a> {
    network: CaseNetwork,
    routing: &'a RoutingTable,
    config: &'a SimulationConfig,
    rng: &'a mut SimRng,
    case: &'a mut Case,
    /// Set when timestamps are recorded.
    origin: Option<DateTime<Utc>>,
    journal: EventJournal,
    ready: VecDeque<UnitId>,
    timers: BinaryHeap<TimerEntry>,
    timer_seq: u64,
    pools: BTreeMap<String, ResourcePool>,
    /// Arms fired by each or split, read by the matching join.
    or_expected: BTreeMap<NodeId, usize>,
    now: SimTime,
    steps: usize,
}

impl<'a> Runtime<'a> {
    pub fn new(
        network: CaseNetwork,
        routing: &'a RoutingTable,
        config: &'a SimulationConfig,
        rng: &'a mut SimRng,
        case: &'a mut Case,
    ) -> Self {
        let pools = config
            .resources
            .iter()
            .map(|(name, &capacity)| {
                (
                    name.clone(),
                    ResourcePool {
                        capacity,
                        in_use: 0,
                        waiters: VecDeque::new(),
                    },
                )
            })
            .collect();
        Self {
            network,
            routing,
            config,
            rng,
            case,
            origin: None,
            journal: EventJournal::new(config.record_events),
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            timer_seq: 0,
            pools,
            or_expected: BTreeMap::new(),
            now: 0,
            steps: 0,
        }
    }

    /// Attach start/end timestamps, counted from `origin`, to trace events.
    pub fn with_timestamps(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Run the case from simulated time `start` until no unit can progress.
    pub fn run(mut self, start: SimTime) -> Result<RunOutcome, SimulationError> {
        self.now = start;
        self.journal.push(RuntimeEvent::CaseStarted {
            case_index: self.case.case_index,
            at: start,
        });
        self.signal(self.network.start);

        loop {
            while let Some(unit) = self.ready.pop_front() {
                self.tick()?;
                self.poll(unit)?;
            }
            let Some(timer) = self.timers.pop() else {
                break;
            };
            self.tick()?;
            self.now = timer.at;
            self.complete_activity(timer.unit)?;
        }

        let terminal = self.network.terminal;
        let still_set = self.network.tokens.set_tokens();
        assert!(
            still_set == [terminal],
            "case {} quiesced with tokens {still_set:?} set, expected only terminal token {terminal}",
            self.case.case_index
        );

        self.journal.push(RuntimeEvent::CaseCompleted {
            case_index: self.case.case_index,
            at: self.now,
            steps: self.steps,
        });
        self.case.events = self.journal.into_events();
        Ok(RunOutcome {
            finished_at: self.now,
            steps: self.steps,
            tokens: self.network.tokens,
        })
    }

    fn tick(&mut self) -> Result<(), SimulationError> {
        self.steps += 1;
        if self.steps > self.config.max_steps_per_case {
            return Err(SimulationError::StepLimitExceeded {
                case_index: self.case.case_index,
                steps: self.config.max_steps_per_case,
            });
        }
        Ok(())
    }

    fn signal(&mut self, token: TokenIndex) {
        self.network.tokens.set(token);
        if let Some(consumer) = self.network.consumers[token] {
            self.ready.push_back(consumer);
        }
    }

    fn poll(&mut self, id: UnitId) -> Result<(), SimulationError> {
        let unit = &self.network.units[id];
        if unit.state != UnitState::Waiting {
            return Ok(());
        }
        match unit.kind.clone() {
            UnitKind::Activity {
                node,
                label,
                input,
                pool,
                ..
            } => {
                if self.network.tokens.is_set(input) {
                    self.begin_activity(id, node, label, pool)?;
                }
            }
            UnitKind::Split {
                node,
                gateway,
                input,
                outputs,
            } => {
                if self.network.tokens.is_set(input) {
                    self.fire_split(node, gateway, input, &outputs);
                }
            }
            UnitKind::Join {
                node,
                gateway,
                inputs,
                output,
            } => self.try_join(node, gateway, &inputs, output),
        }
        Ok(())
    }

    // ─── Activities ───────────────────────────────────────────

    fn begin_activity(
        &mut self,
        id: UnitId,
        node: NodeId,
        label: String,
        pool: Option<String>,
    ) -> Result<(), SimulationError> {
        if let Some(name) = pool {
            if let Some(pool) = self.pools.get_mut(&name) {
                if pool.in_use >= pool.capacity {
                    pool.waiters.push_back(id);
                    self.network.units[id].state = UnitState::Queued;
                    self.journal.push(RuntimeEvent::ResourceQueued {
                        node,
                        pool: name,
                        at: self.now,
                    });
                    return Ok(());
                }
                pool.in_use += 1;
            }
        }
        self.start_timer(id, node, label)
    }

    fn start_timer(&mut self, id: UnitId, node: NodeId, label: String) -> Result<(), SimulationError> {
        let duration = self.rng.duration_secs(self.config.duration);
        let until = self
            .now
            .checked_add(duration)
            .ok_or_else(|| self.clock_overflow(self.now))?;
        self.network.units[id].state = UnitState::InProgress {
            started: self.now,
            until,
        };
        self.timer_seq += 1;
        self.timers.push(TimerEntry {
            at: until,
            seq: self.timer_seq,
            unit: id,
        });
        self.journal.push(RuntimeEvent::ActivityStarted {
            node,
            label,
            at: self.now,
        });
        Ok(())
    }

    fn complete_activity(&mut self, id: UnitId) -> Result<(), SimulationError> {
        let unit = &self.network.units[id];
        let UnitState::InProgress { started, .. } = unit.state else {
            panic!("unit {id} completed while {:?}", unit.state);
        };
        let UnitKind::Activity {
            node,
            label,
            input,
            output,
            pool,
        } = unit.kind.clone()
        else {
            panic!("timer fired for non-activity unit {id}");
        };

        if label != SILENT_LABEL {
            self.case.trace.push(TraceEvent {
                activity: label.clone(),
                start: self.timestamp(started)?,
                end: self.timestamp(self.now)?,
            });
        }
        if let Some(attribute) = self.routing.choice_record(node) {
            self.case
                .attributes
                .insert(attribute.to_string(), AttributeValue::Label(label.clone()));
        }
        self.journal.push(RuntimeEvent::ActivityCompleted {
            node,
            label,
            at: self.now,
        });

        self.network.units[id].state = UnitState::Waiting;
        self.signal(output);
        self.network.tokens.reset(input);
        if let Some(name) = pool {
            self.release(&name)?;
        }
        Ok(())
    }

    fn release(&mut self, name: &str) -> Result<(), SimulationError> {
        let Some(pool) = self.pools.get_mut(name) else {
            return Ok(());
        };
        pool.in_use = pool.in_use.saturating_sub(1);
        let Some(next) = pool.waiters.pop_front() else {
            return Ok(());
        };
        pool.in_use += 1;
        if let UnitKind::Activity { node, label, .. } = self.network.units[next].kind.clone() {
            self.start_timer(next, node, label)?;
        }
        Ok(())
    }

    /// Wall-clock time of simulated second `at`, when timestamps are recorded.
    fn timestamp(&self, at: SimTime) -> Result<Option<DateTime<Utc>>, SimulationError> {
        let Some(origin) = self.origin else {
            return Ok(None);
        };
        i64::try_from(at)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|offset| origin.checked_add_signed(offset))
            .map(Some)
            .ok_or_else(|| self.clock_overflow(at))
    }

    fn clock_overflow(&self, at: SimTime) -> SimulationError {
        SimulationError::ClockOverflow {
            case_index: self.case.case_index,
            at,
        }
    }

    // ─── Gateways ─────────────────────────────────────────────

    fn fire_split(&mut self, node: NodeId, gateway: Gateway, input: TokenIndex, outputs: &[TokenIndex]) {
        let tokens = &self.network.tokens;
        let node_tokens = &self.network.node_tokens;
        let attributes = &self.case.attributes;
        let decision = self
            .routing
            .route(node, outputs.len(), self.rng, || {
                taken_condition(attributes, tokens, node_tokens)
            });

        if gateway == Gateway::Xor {
            if let Some(&arm) = decision.arms.first() {
                self.network.tokens.mark_chosen(outputs, outputs[arm]);
            }
        }
        if let Some(fired) = decision.fired {
            self.case.rules_fired += 1;
            self.journal.push(RuntimeEvent::RuleFired {
                node,
                candidates: fired.candidates,
                chosen: fired.chosen,
            });
        }
        if gateway == Gateway::Or {
            self.or_expected.insert(node, decision.arms.len());
        }

        for &arm in &decision.arms {
            self.signal(outputs[arm]);
        }
        self.network.tokens.reset(input);
        self.journal.push(RuntimeEvent::SplitFired {
            node,
            gateway,
            arms: decision.arms,
            at: self.now,
        });
    }

    fn try_join(&mut self, node: NodeId, gateway: Gateway, inputs: &[TokenIndex], output: TokenIndex) {
        let arrived: Vec<TokenIndex> = inputs
            .iter()
            .copied()
            .filter(|&t| self.network.tokens.is_set(t))
            .collect();
        let required = match gateway {
            Gateway::And => inputs.len(),
            Gateway::Xor | Gateway::Loop => 1,
            Gateway::Or => self.or_expected.get(&node).copied().unwrap_or(inputs.len()),
        };
        if arrived.is_empty() || arrived.len() < required {
            return;
        }
        for &t in &arrived {
            self.network.tokens.reset(t);
        }
        self.signal(output);
        self.journal.push(RuntimeEvent::JoinReleased {
            node,
            gateway,
            at: self.now,
        });
    }
}

/// Case attributes plus every node whose input token was set this run and is
/// still marked as chosen.
fn taken_condition(
    attributes: &BTreeMap<String, AttributeValue>,
    tokens: &TokenArena,
    node_tokens: &[TokenIndex],
) -> Condition {
    let taken = node_tokens
        .iter()
        .enumerate()
        .filter(|(_, &t)| tokens.was_ever_set(t) && tokens.last_chosen(t))
        .map(|(i, _)| NodeId(i as u32));
    build_condition(attributes, taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CaseBuilder;
    use crate::compiler::compile;
    use crate::config::DurationRange;
    use crate::routing::RuleSet;
    use crate::tree::{ProcessTree, TreeBuilder};

    fn run_case(tree: &ProcessTree, config: &SimulationConfig, seed: u64) -> (Case, RunOutcome) {
        let seq = compile(tree);
        let routing = RoutingTable::new(tree, &RuleSet::new());
        let network = CaseBuilder::new(&seq, &config.activity_resources).build();
        let mut rng = SimRng::new(seed);
        let mut case = Case::new(0);
        let outcome = Runtime::new(network, &routing, config, &mut rng, &mut case)
            .run(0)
            .unwrap();
        (case, outcome)
    }

    #[test]
    fn test_timer_entries_pop_earliest_first() {
        let mut heap = BinaryHeap::new();
        heap.push(TimerEntry { at: 9, seq: 1, unit: 0 });
        heap.push(TimerEntry { at: 3, seq: 3, unit: 1 });
        heap.push(TimerEntry { at: 3, seq: 2, unit: 2 });
        let order: Vec<UnitId> = std::iter::from_fn(|| heap.pop().map(|t| t.unit)).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_sequence_runs_in_order_and_clock_advances() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a");
        let c = b.leaf("b");
        let root = b.sequence([a, c]);
        let tree = b.build(root).unwrap();
        let mut config = SimulationConfig::seeded(1);
        config.duration = DurationRange { min_secs: 10, max_secs: 10 };

        let (case, outcome) = run_case(&tree, &config, 1);
        assert_eq!(case.activities(), vec!["a", "b"]);
        assert_eq!(outcome.finished_at, 20);
        assert!(case.trace.iter().all(|e| e.start.is_none()));
    }

    #[test]
    fn test_parallel_with_silent_branch_and_token_pairs() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a");
        let t = b.tau();
        let c = b.leaf("c");
        let par = b.parallel([a, t, c]);
        let z = b.leaf("z");
        let root = b.sequence([par, z]);
        let tree = b.build(root).unwrap();
        let config = SimulationConfig::seeded(2);

        let (case, outcome) = run_case(&tree, &config, 2);
        let acts = case.activities();
        assert_eq!(acts.len(), 3);
        assert_eq!(acts.last(), Some(&"z"));
        assert!(!acts.contains(&SILENT_LABEL));

        let terminal = outcome.tokens.set_tokens();
        assert_eq!(terminal.len(), 1);
        for (idx, token) in outcome.tokens.iter().enumerate() {
            if idx == terminal[0] {
                assert_eq!((token.set_count, token.reset_count), (1, 0));
            } else {
                assert_eq!(token.set_count, token.reset_count, "token {idx}");
            }
        }
    }

    #[test]
    fn test_resource_pool_serializes_parallel_work() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a");
        let c = b.leaf("c");
        let root = b.parallel([a, c]);
        let tree = b.build(root).unwrap();
        let mut config = SimulationConfig::seeded(3);
        config.duration = DurationRange { min_secs: 5, max_secs: 5 };
        config.record_events = true;
        config.resources.insert("desk".into(), 1);
        config.activity_resources.insert("a".into(), "desk".into());
        config.activity_resources.insert("c".into(), "desk".into());

        let (case, outcome) = run_case(&tree, &config, 3);
        assert_eq!(outcome.finished_at, 10);
        assert!(case
            .events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::ResourceQueued { pool, .. } if pool == "desk")));
    }

    #[test]
    fn test_step_limit_aborts_case() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a");
        let c = b.leaf("b");
        let root = b.sequence([a, c]);
        let tree = b.build(root).unwrap();
        let mut config = SimulationConfig::seeded(4);
        config.max_steps_per_case = 2;

        let seq = compile(&tree);
        let routing = RoutingTable::new(&tree, &RuleSet::new());
        let network = CaseBuilder::new(&seq, &config.activity_resources).build();
        let mut rng = SimRng::new(4);
        let mut case = Case::new(7);
        let err = Runtime::new(network, &routing, &config, &mut rng, &mut case)
            .run(0)
            .unwrap_err();
        assert_eq!(
            err,
            SimulationError::StepLimitExceeded {
                case_index: 7,
                steps: 2
            }
        );
    }

    #[test]
    fn test_clock_overflow_is_a_case_error() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a");
        let tree = b.build(a).unwrap();
        let mut config = SimulationConfig::seeded(6);
        config.duration = DurationRange { min_secs: 10, max_secs: 10 };

        let seq = compile(&tree);
        let routing = RoutingTable::new(&tree, &RuleSet::new());
        let network = CaseBuilder::new(&seq, &config.activity_resources).build();
        let mut rng = SimRng::new(6);
        let mut case = Case::new(3);
        let err = Runtime::new(network, &routing, &config, &mut rng, &mut case)
            .run(SimTime::MAX - 5)
            .unwrap_err();
        assert_eq!(
            err,
            SimulationError::ClockOverflow {
                case_index: 3,
                at: SimTime::MAX - 5
            }
        );
    }

    #[test]
    fn test_timestamps_follow_simulated_clock() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a");
        let tree = b.build(a).unwrap();
        let mut config = SimulationConfig::seeded(5);
        config.duration = DurationRange { min_secs: 60, max_secs: 60 };

        let seq = compile(&tree);
        let routing = RoutingTable::new(&tree, &RuleSet::new());
        let network = CaseBuilder::new(&seq, &config.activity_resources).build();
        let mut rng = SimRng::new(5);
        let mut case = Case::new(0);
        let origin = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Runtime::new(network, &routing, &config, &mut rng, &mut case)
            .with_timestamps(origin)
            .run(100)
            .unwrap();

        let event = &case.trace[0];
        assert_eq!(event.start, Some(origin + Duration::seconds(100)));
        assert_eq!(event.end, Some(origin + Duration::seconds(160)));
    }
}
