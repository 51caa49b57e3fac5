//! Case builder: execution sequence → wired token network for one case.
//!
//! Every distinct [`Address`] is interned to one token index, [`Address::Root`]
//! first. Each step becomes a schedulable [`Unit`] registered as the sole
//! consumer of its input tokens. Wiring faults (more addresses than the
//! compiled arc count, a token with two consumers) panic.

use crate::tree::NodeId;
use crate::token::TokenArena;
use crate::types::{Address, ExecutionSequence, Gateway, SimTime, StepDescriptor, TokenIndex, UnitId};
use std::collections::BTreeMap;

// ─── Units ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum UnitKind {
    Activity {
        node: NodeId,
        label: String,
        input: TokenIndex,
        output: TokenIndex,
        /// Resource pool held while in progress.
        pool: Option<String>,
    },
    Split {
        node: NodeId,
        gateway: Gateway,
        input: TokenIndex,
        outputs: Vec<TokenIndex>,
    },
    Join {
        node: NodeId,
        gateway: Gateway,
        inputs: Vec<TokenIndex>,
        output: TokenIndex,
    },
}

impl UnitKind {
    pub fn inputs(&self) -> Vec<TokenIndex> {
        match self {
            UnitKind::Activity { input, .. } | UnitKind::Split { input, .. } => vec![*input],
            UnitKind::Join { inputs, .. } => inputs.clone(),
        }
    }

    pub fn outputs(&self) -> Vec<TokenIndex> {
        match self {
            UnitKind::Activity { output, .. } | UnitKind::Join { output, .. } => vec![*output],
            UnitKind::Split { outputs, .. } => outputs.clone(),
        }
    }
}

/// Where a unit is in its activation cycle. Only activities leave `Waiting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    Waiting,
    /// Input consumed, blocked on a resource pool.
    Queued,
    InProgress { started: SimTime, until: SimTime },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    pub kind: UnitKind,
    pub state: UnitState,
}

// ─── Network ──────────────────────────────────────────────────

/// A fully wired case, ready for the runtime.
#[derive(Clone, Debug)]
pub struct CaseNetwork {
    pub tokens: TokenArena,
    pub units: Vec<Unit>,
    /// Consumer of each token. `None` only for the terminal token.
    pub consumers: Vec<Option<UnitId>>,
    /// Input token of every tree node, indexed by `NodeId`.
    pub node_tokens: Vec<TokenIndex>,
    pub start: TokenIndex,
    pub terminal: TokenIndex,
}

struct AddressBook {
    slots: BTreeMap<Address, TokenIndex>,
    capacity: usize,
}

impl AddressBook {
    fn new(capacity: usize) -> Self {
        let mut book = Self {
            slots: BTreeMap::new(),
            capacity,
        };
        book.resolve(Address::Root);
        book
    }

    fn resolve(&mut self, address: Address) -> TokenIndex {
        let next = self.slots.len();
        let idx = *self.slots.entry(address).or_insert(next);
        assert!(
            idx < self.capacity,
            "address {address:?} needs token {idx}, but the network has only {} arcs",
            self.capacity
        );
        idx
    }
}

pub struct CaseBuilder<'a> {
    seq: &'a ExecutionSequence,
    activity_resources: &'a BTreeMap<String, String>,
}

impl<'a> CaseBuilder<'a> {
    pub fn new(seq: &'a ExecutionSequence, activity_resources: &'a BTreeMap<String, String>) -> Self {
        Self {
            seq,
            activity_resources,
        }
    }

    pub fn build(&self) -> CaseNetwork {
        let mut book = AddressBook::new(self.seq.arc_count);
        let mut units = Vec::with_capacity(self.seq.steps.len());

        for step in &self.seq.steps {
            let kind = match step {
                StepDescriptor::Activity {
                    node,
                    label,
                    start_addr,
                    end_addr,
                } => UnitKind::Activity {
                    node: *node,
                    label: label.clone(),
                    input: book.resolve(*start_addr),
                    output: book.resolve(*end_addr),
                    pool: self.activity_resources.get(label).cloned(),
                },
                StepDescriptor::Split {
                    node,
                    gateway,
                    start_addr,
                    outputs,
                    ..
                } => UnitKind::Split {
                    node: *node,
                    gateway: *gateway,
                    input: book.resolve(*start_addr),
                    outputs: outputs.iter().map(|a| book.resolve(*a)).collect(),
                },
                StepDescriptor::Join {
                    node,
                    gateway,
                    incoming,
                    output,
                } => UnitKind::Join {
                    node: *node,
                    gateway: *gateway,
                    inputs: incoming.iter().map(|a| book.resolve(*a)).collect(),
                    output: book.resolve(*output),
                },
            };
            units.push(Unit {
                kind,
                state: UnitState::Waiting,
            });
        }

        let mut consumers = vec![None; self.seq.arc_count];
        for (id, unit) in units.iter().enumerate() {
            for input in unit.kind.inputs() {
                if let Some(other) = consumers[input] {
                    panic!("token {input} wired to units {other} and {id}");
                }
                consumers[input] = Some(id);
            }
        }

        let node_tokens = self
            .seq
            .node_inputs
            .iter()
            .map(|a| book.resolve(*a))
            .collect();
        let terminal = book.resolve(self.seq.terminal);

        CaseNetwork {
            tokens: TokenArena::new(self.seq.arc_count),
            units,
            consumers,
            node_tokens,
            start: 0,
            terminal,
        }
    }
}
