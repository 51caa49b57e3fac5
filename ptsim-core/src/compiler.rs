//! Network compiler: process tree → flat execution sequence.
//!
//! One preorder pass. Every leaf becomes an activity step. Choice, parallel
//! and or nodes emit their split when visited and their join once every leaf
//! endpoint below them has been discharged. Loops invert this: the entry join
//! is emitted on visit and the redo/exit split once the `do` child's
//! endpoints are reached. Sequences emit nothing; they only thread addresses
//! from one child to the next.
//!
//! Tokens are named by [`Address`]es that identify their producer, so the
//! emitted order only fixes unit registration order, never the wiring.

use crate::tree::{NodeId, Operator, ProcessTree};
use crate::types::{Address, ExecutionSequence, Gateway, StepDescriptor};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

pub fn compute_hash(data: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.finalize().into()
}

/// Address of the token that activates `id`.
pub fn start_address(tree: &ProcessTree, id: NodeId) -> Address {
    let Some(parent) = tree.parent(id) else {
        return Address::Root;
    };
    // Position is always present for a node with a parent.
    let idx = tree.position(id).unwrap_or(0);
    match tree.operator(parent) {
        Some(Operator::Sequence) if idx == 0 => start_address(tree, parent),
        Some(Operator::Sequence) => completion_address(tree, tree.children(parent)[idx - 1]),
        Some(Operator::Loop) => match idx {
            0 => Address::BranchJoin(parent),
            arm => Address::BranchSplit {
                node: parent,
                arm: arm - 1,
            },
        },
        Some(_) => Address::BranchSplit {
            node: parent,
            arm: idx,
        },
        None => unreachable!("leaf {parent} has children"),
    }
}

/// Address of the token set when the subtree rooted at `id` has finished.
pub fn completion_address(tree: &ProcessTree, id: NodeId) -> Address {
    match tree.operator(id) {
        Some(Operator::Sequence) => {
            completion_address(tree, *tree.children(id).last().unwrap_or(&id))
        }
        Some(Operator::Loop) => completion_address(tree, tree.children(id)[2]),
        _ => Address::Sequential(id),
    }
}

// ─── Side table ───────────────────────────────────────────────

/// Per-node compile state, indexed by `NodeId`. The tree itself is never touched.
#[derive(Clone, Debug, Default)]
struct NodeMeta {
    /// Leaf endpoints of this subtree.
    endpoints: usize,
    /// Endpoints still to be discharged before the join (branching nodes) or
    /// the redo/exit split (loops, counting the `do` child only) is emitted.
    to_reach: usize,
}

fn endpoint_counts(tree: &ProcessTree) -> Vec<NodeMeta> {
    let mut meta = vec![NodeMeta::default(); tree.len()];
    // Reverse preorder visits children before parents.
    for id in tree.preorder().into_iter().rev() {
        let children = tree.children(id);
        let endpoints = match tree.operator(id) {
            None => 1,
            Some(Operator::Sequence) => children.last().map_or(0, |c| meta[c.index()].endpoints),
            Some(Operator::Loop) => meta[children[2].index()].endpoints,
            Some(_) => children.iter().map(|c| meta[c.index()].endpoints).sum(),
        };
        let to_reach = match tree.operator(id) {
            Some(Operator::Loop) => meta[children[0].index()].endpoints,
            Some(op) if op.is_branching() => endpoints,
            _ => 0,
        };
        meta[id.index()] = NodeMeta { endpoints, to_reach };
    }
    meta
}

// ─── Compilation ──────────────────────────────────────────────

struct Compiler<'t> {
    tree: &'t ProcessTree,
    meta: Vec<NodeMeta>,
    steps: Vec<StepDescriptor>,
}

impl<'t> Compiler<'t> {
    fn visit(&mut self, id: NodeId) {
        let tree = self.tree;
        match tree.operator(id) {
            None => {
                self.steps.push(StepDescriptor::Activity {
                    node: id,
                    label: tree.label(id).unwrap_or_default().to_string(),
                    start_addr: start_address(tree, id),
                    end_addr: Address::Sequential(id),
                });
                self.discharge(id);
            }
            Some(Operator::Sequence) => {}
            Some(Operator::Loop) => {
                let redo = tree.children(id)[1];
                self.steps.push(StepDescriptor::Join {
                    node: id,
                    gateway: Gateway::Loop,
                    incoming: vec![start_address(tree, id), completion_address(tree, redo)],
                    output: Address::BranchJoin(id),
                });
            }
            Some(op) => {
                let children = tree.children(id).to_vec();
                let outputs = (0..children.len())
                    .map(|arm| Address::BranchSplit { node: id, arm })
                    .collect();
                self.steps.push(StepDescriptor::Split {
                    node: id,
                    gateway: Gateway::for_operator(op).unwrap_or(Gateway::Xor),
                    start_addr: start_address(tree, id),
                    children,
                    outputs,
                });
            }
        }
    }

    /// Walk up from a visited leaf while it is still an endpoint of the
    /// ancestor, emitting joins and loop splits whose counters hit zero.
    fn discharge(&mut self, leaf: NodeId) {
        let tree = self.tree;
        let mut current = leaf;
        for ancestor in tree.ancestors(leaf) {
            let children = tree.children(ancestor);
            let idx = tree.position(current).unwrap_or(0);
            match tree.operator(ancestor) {
                Some(Operator::Sequence) => {
                    if idx + 1 != children.len() {
                        return;
                    }
                }
                Some(Operator::Loop) => match idx {
                    0 => {
                        if self.reach(ancestor) {
                            self.emit_loop_split(ancestor);
                        }
                        return;
                    }
                    2 => {}
                    _ => return,
                },
                Some(op) => {
                    if self.reach(ancestor) {
                        self.emit_join(ancestor, op);
                    }
                }
                None => return,
            }
            current = ancestor;
        }
    }

    fn reach(&mut self, id: NodeId) -> bool {
        let meta = &mut self.meta[id.index()];
        meta.to_reach = meta.to_reach.saturating_sub(1);
        meta.to_reach == 0
    }

    fn emit_join(&mut self, id: NodeId, op: Operator) {
        let tree = self.tree;
        self.steps.push(StepDescriptor::Join {
            node: id,
            gateway: Gateway::for_operator(op).unwrap_or(Gateway::Xor),
            incoming: tree
                .children(id)
                .iter()
                .map(|&c| completion_address(tree, c))
                .collect(),
            output: Address::Sequential(id),
        });
    }

    fn emit_loop_split(&mut self, id: NodeId) {
        let tree = self.tree;
        let children = tree.children(id);
        self.steps.push(StepDescriptor::Split {
            node: id,
            gateway: Gateway::Loop,
            start_addr: completion_address(tree, children[0]),
            children: vec![children[1], children[2]],
            outputs: vec![
                Address::BranchSplit { node: id, arm: 0 },
                Address::BranchSplit { node: id, arm: 1 },
            ],
        });
    }
}

/// Number of tokens a case network of `tree` needs: one start token, one per
/// leaf, one per split arm and loop re-entry, one per branching join.
pub fn arc_budget(tree: &ProcessTree) -> usize {
    1 + tree
        .ids()
        .map(|id| match tree.operator(id) {
            None => 1,
            Some(Operator::Sequence) => 0,
            Some(Operator::Loop) => tree.children(id).len(),
            Some(_) => tree.children(id).len() + 1,
        })
        .sum::<usize>()
}

pub fn compile(tree: &ProcessTree) -> ExecutionSequence {
    let mut compiler = Compiler {
        tree,
        meta: endpoint_counts(tree),
        steps: Vec::with_capacity(tree.len() * 2),
    };
    for id in tree.preorder() {
        compiler.visit(id);
    }
    let steps = compiler.steps;

    let mut addresses = BTreeSet::from([Address::Root]);
    for step in &steps {
        match step {
            StepDescriptor::Activity {
                start_addr,
                end_addr,
                ..
            } => {
                addresses.insert(*start_addr);
                addresses.insert(*end_addr);
            }
            StepDescriptor::Split {
                start_addr,
                outputs,
                ..
            } => {
                addresses.insert(*start_addr);
                addresses.extend(outputs.iter().copied());
            }
            StepDescriptor::Join {
                incoming, output, ..
            } => {
                addresses.extend(incoming.iter().copied());
                addresses.insert(*output);
            }
        }
    }
    let arc_count = addresses.len();
    debug_assert_eq!(arc_count, arc_budget(tree));

    let canonical = serde_json::to_string(&steps).expect("step descriptors serialize to JSON");
    let fingerprint = compute_hash(&canonical);
    let terminal = completion_address(tree, tree.root());
    let node_inputs = tree.ids().map(|id| start_address(tree, id)).collect();

    tracing::info!(
        nodes = tree.len(),
        steps = steps.len(),
        arc_count,
        fingerprint = %hex_prefix(&fingerprint),
        "compiled process tree"
    );

    ExecutionSequence {
        steps,
        arc_count,
        node_inputs,
        terminal,
        fingerprint,
    }
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..6].iter().map(|b| format!("{b:02x}")).collect()
}
