//! Log simulator: one compiled tree, many cases.
//!
//! The execution sequence and routing table are built once. Each case gets a
//! fresh network, fresh attribute draws and its own run. The simulated clock
//! and the RNG stream carry over from case to case.

use crate::builder::CaseBuilder;
use crate::compiler::compile;
use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::routing::{RoutingTable, RuleSet, SimRng};
use crate::runtime::Runtime;
use crate::tree::ProcessTree;
use crate::types::{
    AbortedCase, AttributeKind, AttributeValue, Case, CaseAttributeSpec, ExecutionSequence, Log,
    SimTime,
};
use chrono::{DateTime, Utc};

pub struct LogSimulator<'t> {
    tree: &'t ProcessTree,
    sequence: ExecutionSequence,
    rules: RuleSet,
    routing: RoutingTable,
    attributes: Vec<CaseAttributeSpec>,
    config: SimulationConfig,
    rng: SimRng,
    clock: SimTime,
    origin: DateTime<Utc>,
    next_case: usize,
}

impl<'t> LogSimulator<'t> {
    /// Purely stochastic routing, no case attributes.
    pub fn new(tree: &'t ProcessTree, config: SimulationConfig) -> Result<Self, SimulationError> {
        Self::with_rules(tree, RuleSet::new(), Vec::new(), config)
    }

    pub fn with_rules(
        tree: &'t ProcessTree,
        rules: RuleSet,
        attributes: Vec<CaseAttributeSpec>,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        rules.validate(tree, &attributes)?;

        let sequence = compile(tree);
        let routing = RoutingTable::new(tree, &rules);
        let origin = config.start_date.unwrap_or_else(Utc::now);
        Ok(Self {
            tree,
            sequence,
            rules,
            routing,
            attributes,
            rng: SimRng::from_seed(config.seed),
            config,
            clock: 0,
            origin,
            next_case: 0,
        })
    }

    pub fn sequence(&self) -> &ExecutionSequence {
        &self.sequence
    }

    /// Simulated seconds elapsed since the clock origin.
    pub fn clock(&self) -> SimTime {
        self.clock
    }

    /// Simulate `n_cases` cases. Cases that fail are recorded as aborted and
    /// contribute nothing to the trace list.
    pub fn simulate(&mut self, n_cases: usize) -> Log {
        let mut log = Log::default();
        for _ in 0..n_cases {
            match self.simulate_case() {
                Ok(case) => log.cases.push(case),
                Err(err) => abort(&mut log, self.next_case - 1, &err),
            }
        }
        tracing::info!(
            cases = log.cases.len(),
            aborted = log.aborted.len(),
            clock = self.clock,
            "simulated log"
        );
        log
    }

    pub fn simulate_case(&mut self) -> Result<Case, SimulationError> {
        self.run_case(None)
    }

    /// Simulate `n_cases` cases under the `removed` rules, re-running each
    /// until at least one of them fires.
    pub fn simulate_noise(&mut self, n_cases: usize, removed: &RuleSet) -> Result<Log, SimulationError> {
        if removed.is_empty() {
            return Err(SimulationError::EmptyNoiseRules);
        }
        removed.validate(self.tree, &self.attributes)?;
        let mut noise_rules = removed.clone();
        for choice in self.rules.recorded_choices() {
            noise_rules.record_choice(choice);
        }
        let noise_routing = RoutingTable::new(self.tree, &noise_rules);

        let mut log = Log::default();
        for _ in 0..n_cases {
            let case_index = self.next_case;
            let clock = self.clock;
            let mut attempts = 0;
            loop {
                if attempts == self.config.max_noise_attempts {
                    tracing::warn!(case_index, attempts, "no noise rule fired");
                    return Err(SimulationError::NoiseRetriesExhausted {
                        case_index,
                        attempts,
                    });
                }
                attempts += 1;
                self.next_case = case_index;
                match self.run_case(Some(&noise_routing)) {
                    Ok(case) if case.rules_fired > 0 => {
                        log.cases.push(case);
                        break;
                    }
                    Ok(_) => self.clock = clock,
                    Err(err) => {
                        abort(&mut log, case_index, &err);
                        break;
                    }
                }
            }
        }
        tracing::info!(
            cases = log.cases.len(),
            aborted = log.aborted.len(),
            "simulated noise cases"
        );
        Ok(log)
    }

    fn run_case(&mut self, noise: Option<&RoutingTable>) -> Result<Case, SimulationError> {
        let routing = noise.unwrap_or(&self.routing);
        let mut case = Case::new(self.next_case);
        self.next_case += 1;
        case.noisy = noise.is_some();
        for spec in &self.attributes {
            let value = match (&spec.fixed, spec.kind) {
                (Some(value), _) => value.clone(),
                (None, AttributeKind::Bool) => AttributeValue::Bool(self.rng.sample_bool()),
                (None, AttributeKind::Numeric) => AttributeValue::Real(self.rng.sample_f64()),
            };
            case.attributes.insert(spec.name.clone(), value);
        }

        let network = CaseBuilder::new(&self.sequence, &self.config.activity_resources).build();
        let mut runtime = Runtime::new(network, routing, &self.config, &mut self.rng, &mut case);
        if self.config.record_timestamps {
            runtime = runtime.with_timestamps(self.origin);
        }
        let outcome = runtime.run(self.clock)?;
        self.clock = outcome.finished_at;

        tracing::debug!(
            case_index = case.case_index,
            trace_len = case.trace.len(),
            rules_fired = case.rules_fired,
            finished_at = outcome.finished_at,
            "case simulated"
        );
        Ok(case)
    }
}

fn abort(log: &mut Log, case_index: usize, err: &SimulationError) {
    tracing::warn!(case_index, error = %err, "case aborted");
    log.aborted.push(AbortedCase {
        case_index,
        reason: err.to_string(),
    });
}
