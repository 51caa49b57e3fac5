//! Process tree arena.
//!
//! Nodes live in one flat vector addressed by [`NodeId`]. Parent and child
//! links are indices, so ancestor walks are array lookups rather than object
//! graph traversals. A [`ProcessTree`] can only be obtained through
//! [`TreeBuilder::build`], which validates it, and is immutable afterwards:
//! every per-node artefact computed later (endpoints, addresses, token
//! bindings) lives in side tables owned by the caller.

use crate::error::StructuralError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Label of silent activities. They take part in routing but never reach a trace.
pub const SILENT_LABEL: &str = "tau";

/// Index of a node inside its [`ProcessTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// ─── Node kinds ───────────────────────────────────────────────

/// Control-flow operator of an inner node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Children run strictly in order.
    Sequence,
    /// Exactly one child runs.
    Choice,
    /// All children run, unordered.
    Parallel,
    /// A nonempty subset of children runs.
    Or,
    /// `do`, then repeatedly `redo` + `do` until `exit` is chosen.
    Loop,
}

impl Operator {
    pub fn name(self) -> &'static str {
        match self {
            Operator::Sequence => "sequence",
            Operator::Choice => "choice",
            Operator::Parallel => "parallel",
            Operator::Or => "or",
            Operator::Loop => "loop",
        }
    }

    /// Operators compiled into a split/join pair with one arc per child.
    pub fn is_branching(self) -> bool {
        matches!(self, Operator::Choice | Operator::Parallel | Operator::Or)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf { label: String },
    Operator(Operator),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Selection probability relative to siblings. Read for Choice branches
    /// and for the redo/exit children of a Loop.
    pub weight: Option<f64>,
    /// Globally unique external identifier, usable as a decision-rule key.
    pub key: Option<String>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            weight: None,
            key: None,
        }
    }
}

// ─── Tree ─────────────────────────────────────────────────────

/// A validated, immutable process tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl ProcessTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Panics on an id from another tree; ids are only minted by the builder.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn operator(&self, id: NodeId) -> Option<Operator> {
        match self.node(id).kind {
            NodeKind::Operator(op) => Some(op),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Leaf { label } => Some(label),
            NodeKind::Operator(_) => None,
        }
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Leaf { .. })
    }

    pub fn is_silent(&self, id: NodeId) -> bool {
        self.label(id) == Some(SILENT_LABEL)
    }

    pub fn key(&self, id: NodeId) -> Option<&str> {
        self.node(id).key.as_deref()
    }

    /// External key when present, otherwise the arena id.
    pub fn display_name(&self, id: NodeId) -> String {
        self.key(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    pub fn find_key(&self, key: &str) -> Option<NodeId> {
        self.ids().find(|&id| self.key(id) == Some(key))
    }

    /// Position of `id` among its parent's children.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// All nodes in preorder (node before its children, children left to right).
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        order
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.is_leaf(id))
            .collect()
    }

    /// Leaves that can run first inside `id`: the first child of sequences and
    /// loops, every child of choice/parallel/or.
    pub fn first_leaves(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_first_leaves(id, &mut out);
        out
    }

    fn collect_first_leaves(&self, id: NodeId, out: &mut Vec<NodeId>) {
        match self.operator(id) {
            None => out.push(id),
            Some(Operator::Sequence | Operator::Loop) => {
                self.collect_first_leaves(self.children(id)[0], out)
            }
            Some(_) => {
                for &child in self.children(id) {
                    self.collect_first_leaves(child, out);
                }
            }
        }
    }
}

pub struct Ancestors<'t> {
    tree: &'t ProcessTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

// ─── Builder ──────────────────────────────────────────────────

/// Bottom-up constructor: create children first, then the operator over them.
///
/// ```
/// use ptsim_core::tree::TreeBuilder;
///
/// let mut b = TreeBuilder::new();
/// let a = b.leaf("a");
/// let c = b.leaf("c");
/// let root = b.sequence([a, c]);
/// let tree = b.build(root).unwrap();
/// assert_eq!(tree.leaves().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
    reused: Vec<NodeId>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn leaf(&mut self, label: impl Into<String>) -> NodeId {
        self.push(Node::new(NodeKind::Leaf {
            label: label.into(),
        }))
    }

    pub fn tau(&mut self) -> NodeId {
        self.leaf(SILENT_LABEL)
    }

    pub fn operator(
        &mut self,
        op: Operator,
        children: impl IntoIterator<Item = NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut linked = Vec::new();
        for child in children {
            match self.nodes.get_mut(child.index()) {
                Some(node) if node.parent.is_none() => node.parent = Some(id),
                // Unknown ids surface as unreachable/reused nodes at build time.
                _ => self.reused.push(child),
            }
            linked.push(child);
        }
        let mut node = Node::new(NodeKind::Operator(op));
        node.children = linked;
        self.push(node)
    }

    pub fn sequence(&mut self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.operator(Operator::Sequence, children)
    }

    pub fn parallel(&mut self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.operator(Operator::Parallel, children)
    }

    pub fn or(&mut self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.operator(Operator::Or, children)
    }

    /// Choice with explicit branch probabilities.
    pub fn choice(&mut self, branches: impl IntoIterator<Item = (NodeId, f64)>) -> NodeId {
        let branches: Vec<(NodeId, f64)> = branches.into_iter().collect();
        for &(child, weight) in &branches {
            self.set_weight(child, weight);
        }
        self.operator(Operator::Choice, branches.into_iter().map(|(c, _)| c))
    }

    /// Choice whose branches are equally likely.
    pub fn choice_uniform(&mut self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.operator(Operator::Choice, children)
    }

    pub fn loop_node(&mut self, body: NodeId, redo: NodeId, exit: NodeId) -> NodeId {
        self.operator(Operator::Loop, [body, redo, exit])
    }

    pub fn set_weight(&mut self, id: NodeId, weight: f64) -> NodeId {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            node.weight = Some(weight);
        }
        id
    }

    pub fn set_key(&mut self, id: NodeId, key: impl Into<String>) -> NodeId {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            node.key = Some(key.into());
        }
        id
    }

    /// Freeze the arena under `root` and validate it.
    pub fn build(self, root: NodeId) -> Result<ProcessTree, StructuralError> {
        if let Some(&node) = self.reused.first() {
            return Err(if node.index() < self.nodes.len() {
                StructuralError::NodeReused { node }
            } else {
                StructuralError::UnknownNode { node }
            });
        }
        let root_node = self
            .nodes
            .get(root.index())
            .ok_or(StructuralError::UnknownNode { node: root })?;
        if root_node.parent.is_some() {
            return Err(StructuralError::RootHasParent { node: root });
        }

        let tree = ProcessTree {
            nodes: self.nodes,
            root,
        };
        let reachable: HashSet<NodeId> = tree.preorder().into_iter().collect();
        if let Some(node) = tree.ids().find(|id| !reachable.contains(id)) {
            return Err(StructuralError::Unreachable { node });
        }
        validate(&tree)?;
        Ok(tree)
    }
}

// ─── Validation ───────────────────────────────────────────────

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

fn validate(tree: &ProcessTree) -> Result<(), StructuralError> {
    let mut keys = HashSet::new();
    for id in tree.ids() {
        let node = tree.node(id);
        if let Some(key) = &node.key {
            if !keys.insert(key.as_str()) {
                return Err(StructuralError::DuplicateKey(key.clone()));
            }
        }
        if let Some(weight) = node.weight {
            if !weight.is_finite() || weight < 0.0 {
                return Err(StructuralError::InvalidWeight { node: id, weight });
            }
        }

        match &node.kind {
            NodeKind::Leaf { label } => {
                if label.trim().is_empty() {
                    return Err(StructuralError::EmptyLabel { node: id });
                }
            }
            NodeKind::Operator(op) => validate_operator(tree, id, *op)?,
        }
    }
    Ok(())
}

fn validate_operator(tree: &ProcessTree, id: NodeId, op: Operator) -> Result<(), StructuralError> {
    let children = tree.children(id);
    match op {
        Operator::Loop if children.len() != 3 => {
            return Err(StructuralError::LoopArity {
                node: id,
                found: children.len(),
            })
        }
        Operator::Sequence if children.is_empty() => {
            return Err(StructuralError::TooFewChildren {
                node: id,
                operator: op,
                min: 1,
                found: 0,
            })
        }
        _ if op.is_branching() && children.len() < 2 => {
            return Err(StructuralError::TooFewChildren {
                node: id,
                operator: op,
                min: 2,
                found: children.len(),
            })
        }
        _ => {}
    }

    let weighted: &[NodeId] = match op {
        Operator::Choice => children,
        Operator::Loop => &children[1..],
        _ => return Ok(()),
    };
    let weights: Vec<Option<f64>> = weighted.iter().map(|&c| tree.node(c).weight).collect();
    let set = weights.iter().filter(|w| w.is_some()).count();
    if set != 0 && set != weights.len() {
        return Err(StructuralError::PartialWeights { node: id });
    }
    if set > 0 {
        let sum: f64 = weights.iter().flatten().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            tracing::warn!(node = %id, sum, "branch weights do not sum to 1.0");
        }
    }
    Ok(())
}
