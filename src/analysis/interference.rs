//! Interference graph over slot definitions.
//!
//! Two definitions interfere when one is live at the point where the other is defined;
//! interfering definitions must not share a local. The allocator coalesces phi operands
//! into their phi by merging nodes, so a node stands for a set of definitions that will
//! share one slot.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    analysis::{
        liveness::{effective_uses, Liveness},
        ForestClassifier,
    },
    ir::{InstId, MethodBody},
};

/// Handle of an interference node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Returns the node index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Interference information consumed by the register allocator.
pub trait InterferenceProvider {
    /// Every definition that needs storage, paired with its current node, in the order the
    /// allocator should color them
    fn entries(&self) -> Vec<(InstId, NodeId)>;

    /// Current node of `def`, if it needs storage
    fn node(&self, def: InstId) -> Option<NodeId>;

    /// Nodes interfering with `node`
    fn adjacent(&self, node: NodeId) -> Vec<NodeId>;

    /// Merges the nodes of `a` and `b` so they share storage.
    ///
    /// Returns false and leaves the graph untouched when the nodes interfere or either
    /// definition has no node.
    fn attempt_merge(&mut self, a: InstId, b: InstId) -> bool;

    /// Returns true if `a` and `b` must not share storage
    fn interferes(&self, a: InstId, b: InstId) -> bool {
        match (self.node(a), self.node(b)) {
            (Some(na), Some(nb)) => na != nb && self.adjacent(na).contains(&nb),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    defs: Vec<InstId>,
    adjacent: HashSet<NodeId>,
    live: bool,
}

/// Interference graph built from [`Liveness`].
#[derive(Debug, Clone, Default)]
pub struct InterferenceGraph {
    nodes: Vec<Node>,
    node_of: HashMap<InstId, NodeId>,
    order: Vec<InstId>,
}

impl InterferenceGraph {
    /// Builds the graph for `body`.
    ///
    /// Besides the usual "defined while live" edges, every phi of a successor interferes
    /// with the values live across the end of each predecessor and with the operands read
    /// by the predecessor's terminator: the copy resolving the phi is emitted there, before
    /// the terminator evaluates its operands.
    #[must_use]
    pub fn build(body: &MethodBody, forest: &dyn ForestClassifier) -> Self {
        let liveness = Liveness::compute(body, forest);
        let mut graph = InterferenceGraph::default();

        for block in body.block_ids() {
            for &id in body.insts(block) {
                if liveness.is_slot(id) {
                    graph.add_node(id);
                }
            }
        }

        for block in body.block_ids() {
            let term_uses = body
                .terminator(block)
                .map(|t| effective_uses(body, forest, t))
                .unwrap_or_default();

            // Copy point at the end of the block
            if let Some(through) = liveness.live_through(block) {
                for succ in body.successors(block) {
                    for phi in body.phis(succ) {
                        if !liveness.is_slot(phi) {
                            continue;
                        }
                        for other in through.iter() {
                            graph.add_edge(phi, InstId(other));
                        }
                        for &other in &term_uses {
                            graph.add_edge(phi, other);
                        }
                    }
                }
            }

            let Some(mut live) = liveness.live_out(block).cloned() else {
                continue;
            };

            let mut entry_defs = Vec::new();
            for &id in body.insts(block).iter().rev() {
                let kind = body.inst(id).kind();
                if kind.is_phi() || kind.is_guard() {
                    if liveness.is_slot(id) {
                        entry_defs.push(id);
                    }
                    continue;
                }
                if !forest.is_rooted_tree(id) {
                    continue;
                }
                if liveness.is_slot(id) {
                    live.remove(id.index());
                    for other in live.iter() {
                        graph.add_edge(id, InstId(other));
                    }
                }
                for used in effective_uses(body, forest, id) {
                    if liveness.is_slot(used) {
                        live.insert(used.index());
                    }
                }
            }

            for &def in &entry_defs {
                live.remove(def.index());
            }
            for (i, &def) in entry_defs.iter().enumerate() {
                for other in live.iter() {
                    graph.add_edge(def, InstId(other));
                }
                for &sibling in &entry_defs[i + 1..] {
                    graph.add_edge(def, sibling);
                }
            }
        }

        log::trace!(
            "interference graph for {}: {} nodes, {} edges",
            body.name(),
            graph.nodes.len(),
            graph.edge_count()
        );
        graph
    }

    /// Adds a node for `def` if it has none yet
    pub fn add_node(&mut self, def: InstId) -> NodeId {
        if let Some(&node) = self.node_of.get(&def) {
            return node;
        }
        let node = NodeId(self.nodes.len());
        self.nodes.push(Node {
            defs: vec![def],
            adjacent: HashSet::new(),
            live: true,
        });
        self.node_of.insert(def, node);
        self.order.push(def);
        node
    }

    /// Records that `a` and `b` interfere; ignored for definitions without nodes
    pub fn add_edge(&mut self, a: InstId, b: InstId) {
        let (Some(&na), Some(&nb)) = (self.node_of.get(&a), self.node_of.get(&b)) else {
            return;
        };
        if na == nb {
            return;
        }
        self.nodes[na.0].adjacent.insert(nb);
        self.nodes[nb.0].adjacent.insert(na);
    }

    /// Definitions that currently share `node`
    #[must_use]
    pub fn definitions(&self, node: NodeId) -> &[InstId] {
        self.nodes.get(node.0).map_or(&[], |n| n.defs.as_slice())
    }

    /// Number of live nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.live).count()
    }

    /// Number of undirected edges between live nodes
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.live)
            .map(|n| n.adjacent.len())
            .sum::<usize>()
            / 2
    }
}

impl InterferenceProvider for InterferenceGraph {
    fn entries(&self) -> Vec<(InstId, NodeId)> {
        self.order
            .iter()
            .filter_map(|def| self.node_of.get(def).map(|&n| (*def, n)))
            .collect()
    }

    fn node(&self, def: InstId) -> Option<NodeId> {
        self.node_of.get(&def).copied()
    }

    fn adjacent(&self, node: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .nodes
            .get(node.0)
            .map(|n| n.adjacent.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    fn attempt_merge(&mut self, a: InstId, b: InstId) -> bool {
        let (Some(&keep), Some(&gone)) = (self.node_of.get(&a), self.node_of.get(&b)) else {
            return false;
        };
        if keep == gone {
            return true;
        }
        if self.nodes[keep.0].adjacent.contains(&gone) {
            return false;
        }

        let absorbed = std::mem::take(&mut self.nodes[gone.0]);
        for &neighbor in &absorbed.adjacent {
            let n = &mut self.nodes[neighbor.0];
            n.adjacent.remove(&gone);
            n.adjacent.insert(keep);
        }
        for &def in &absorbed.defs {
            self.node_of.insert(def, keep);
        }

        let target = &mut self.nodes[keep.0];
        target.adjacent.extend(absorbed.adjacent);
        target.defs.extend(absorbed.defs);
        true
    }
}
