//! Out-of-SSA translation and storage assignment.
//!
//! The [`RegisterAllocator`] removes phi nodes in two steps:
//!
//! 1. **Coalescing.** Every phi argument is either merged with its phi in the interference
//!    graph, so both end up in the same local and the argument needs no copy, or turned
//!    into a pending copy at the end of the predecessor. Critical edges are split first so
//!    the copy only runs on the edge it belongs to.
//! 2. **Coloring.** Interference nodes are colored greedily in provider order, each taking
//!    the smallest color unused by its already colored neighbors. A register is the pair
//!    (kind, color), so definitions of different kinds never share a local.
//!
//! Greedy coloring is optimal on chordal graphs when nodes are visited in a perfect
//! elimination order. Interference graphs of strict SSA programs are chordal, but the order
//! given by the provider is only assumed to be a good one; nothing here verifies it.

use std::{collections::HashMap, fmt};

use crate::{
    analysis::{InterferenceProvider, NodeId},
    config::CodegenConfig,
    ir::{BlockId, InstId, InstKind, MethodBody, SsaType, Value},
    Result,
};

/// Handle of an allocated register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(usize);

impl RegisterId {
    /// Returns the register index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A storage slot: all definitions of one kind that received the same color.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Register {
    /// Type of the local backing the register
    pub kind: SsaType,
    /// Color assigned by the allocator
    pub color: usize,
}

/// A block inserted on a critical edge to hold phi copies.
#[derive(Debug, Clone, Copy)]
struct SplitEdge {
    block: BlockId,
    pred: BlockId,
    succ: BlockId,
}

/// Out-of-SSA translator: coalesces phis, schedules copies and assigns registers.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    registers: Vec<Register>,
    by_key: HashMap<Register, RegisterId>,
    assignment: HashMap<InstId, RegisterId>,
    pending: HashMap<BlockId, Vec<(InstId, Value)>>,
    next_dummy_color: usize,
    merged: usize,
    split: usize,
    deduplicated: usize,
}

impl RegisterAllocator {
    /// Coalesces the phis of `body` and colors `provider`.
    ///
    /// `body` is modified: critical edges carrying copies are split, and duplicated split
    /// blocks may be merged.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if a phi names a block that is not one
    /// of its block's predecessors or an edge cannot be split.
    pub fn new(
        body: &mut MethodBody,
        provider: &mut dyn InterferenceProvider,
        config: &CodegenConfig,
    ) -> Result<Self> {
        let mut allocator = RegisterAllocator::default();
        let node_kinds = allocator.coalesce_phis(body, provider, config)?;
        allocator.color(body, provider, &node_kinds);

        log::debug!(
            "{}: {} registers, {} phi args coalesced, {} edges split, {} split blocks merged",
            body.name(),
            allocator.registers.len(),
            allocator.merged,
            allocator.split,
            allocator.deduplicated
        );
        Ok(allocator)
    }

    fn can_share(body: &MethodBody, value: InstId, phi: InstId) -> bool {
        let value_type = body.inst(value).result_type();
        let phi_type = body.inst(phi).result_type();
        value_type == phi_type
            || (value_type.is_assignable_to(phi_type) && body.use_index().use_count(value) == 1)
    }

    /// Merges phi arguments into their phis or schedules copies for them.
    ///
    /// Returns the kind every merged node has to be stored as.
    fn coalesce_phis(
        &mut self,
        body: &mut MethodBody,
        provider: &mut dyn InterferenceProvider,
        config: &CodegenConfig,
    ) -> Result<HashMap<NodeId, SsaType>> {
        let mut node_kinds = HashMap::new();
        let mut splits = Vec::new();
        let blocks: Vec<BlockId> = body.block_ids().collect();

        for block in blocks {
            for phi in body.phis(block) {
                if provider.node(phi).is_none() {
                    // Unused phi
                    continue;
                }
                let phi_type = body.inst(phi).result_type().clone();

                for index in 0..body.inst(phi).phi_args().len() {
                    let Some((pred, value)) = body.inst(phi).phi_args().get(index).copied() else {
                        continue;
                    };

                    if let Value::Inst(def) = value {
                        if Self::can_share(body, def, phi) && provider.attempt_merge(phi, def) {
                            if let Some(node) = provider.node(phi) {
                                node_kinds.insert(node, phi_type.clone());
                            }
                            log::trace!("{}: coalesced {} into {}", body.name(), def, phi);
                            self.merged += 1;
                            continue;
                        }
                    }

                    let preds = body.predecessors(block);
                    if !preds.contains(&pred) {
                        return Err(invariant_error!(
                            "phi {} in {} names {}, which is not a predecessor",
                            phi,
                            block,
                            pred
                        ));
                    }

                    let copy_block = if body.successors(pred).len() > 1 && preds.len() > 1 {
                        let middle = body.split_critical_edge(pred, block)?;
                        log::trace!("{}: split {} -> {} with {}", body.name(), pred, block, middle);
                        splits.push(SplitEdge {
                            block: middle,
                            pred,
                            succ: block,
                        });
                        self.split += 1;
                        middle
                    } else {
                        pred
                    };
                    self.pending.entry(copy_block).or_default().push((phi, value));
                }
            }
        }

        if config.merge_duplicate_edges {
            self.merge_duplicate_edges(body, &splits, config.duplicate_edge_threshold.max(2))?;
        }
        Ok(node_kinds)
    }

    /// Incoming values of every phi of `succ` along `pred`
    fn edge_inputs(body: &MethodBody, succ: BlockId, pred: BlockId) -> Vec<Option<Value>> {
        body.phis(succ)
            .into_iter()
            .map(|phi| {
                body.inst(phi)
                    .phi_args()
                    .into_iter()
                    .find(|(p, _)| *p == pred)
                    .map(|(_, v)| v)
            })
            .collect()
    }

    /// Collapses groups of at least `threshold` split blocks that feed the same block with
    /// the same values into one.
    fn merge_duplicate_edges(
        &mut self,
        body: &mut MethodBody,
        splits: &[SplitEdge],
        threshold: usize,
    ) -> Result<()> {
        let mut groups: Vec<(BlockId, Vec<Option<Value>>, Vec<SplitEdge>)> = Vec::new();
        for split in splits {
            let plain_jump = body.insts(split.block).len() == 1
                && body
                    .terminator(split.block)
                    .is_some_and(|t| matches!(body.inst(t).kind(), InstKind::Jump(s) if *s == split.succ));
            if !body.is_live(split.block) || !plain_jump {
                continue;
            }

            let inputs = Self::edge_inputs(body, split.succ, split.block);
            match groups
                .iter_mut()
                .find(|(succ, key, _)| *succ == split.succ && *key == inputs)
            {
                Some((_, _, members)) => members.push(*split),
                None => groups.push((split.succ, inputs, vec![*split])),
            }
        }

        for (succ, _, members) in groups {
            let [keeper, duplicates @ ..] = members.as_slice() else {
                continue;
            };
            if members.len() < threshold {
                continue;
            }
            for dup in duplicates {
                body.retarget(dup.pred, dup.block, keeper.block)?;
                body.remove_phi_arg(succ, dup.block);
                body.remove_block(dup.block);
                self.pending.remove(&dup.block);
                self.deduplicated += 1;
            }
            log::trace!(
                "{}: merged {} split blocks into {}",
                body.name(),
                duplicates.len(),
                keeper.block
            );
        }
        Ok(())
    }

    fn color(
        &mut self,
        body: &MethodBody,
        provider: &dyn InterferenceProvider,
        node_kinds: &HashMap<NodeId, SsaType>,
    ) {
        let mut colors: HashMap<NodeId, usize> = HashMap::new();
        let mut max_color = 0;

        for (def, node) in provider.entries() {
            let color = match colors.get(&node) {
                Some(&color) => color,
                None => {
                    let mut used: Vec<usize> = provider
                        .adjacent(node)
                        .iter()
                        .filter_map(|n| colors.get(n).copied())
                        .collect();
                    used.sort_unstable();
                    used.dedup();

                    let mut color = 0;
                    for c in used {
                        if c != color {
                            break;
                        }
                        color += 1;
                    }
                    colors.insert(node, color);
                    log::trace!("{}: {} colored {}", body.name(), def, color);
                    color
                }
            };
            max_color = max_color.max(color + 1);

            let kind = node_kinds
                .get(&node)
                .cloned()
                .unwrap_or_else(|| body.inst(def).result_type().clone());
            let register = self.intern(Register { kind, color });
            self.assignment.insert(def, register);
        }
        self.next_dummy_color = max_color;
    }

    fn intern(&mut self, register: Register) -> RegisterId {
        if let Some(&id) = self.by_key.get(&register) {
            return id;
        }
        let id = RegisterId(self.registers.len());
        self.registers.push(register.clone());
        self.by_key.insert(register, id);
        id
    }

    /// Register holding `def`.
    ///
    /// Definitions without an interference node get a fresh register of their own on
    /// first request; later requests return the same register.
    pub fn register(&mut self, body: &MethodBody, def: InstId) -> RegisterId {
        if let Some(&id) = self.assignment.get(&def) {
            return id;
        }
        let register = Register {
            kind: body.inst(def).result_type().clone(),
            color: self.next_dummy_color,
        };
        self.next_dummy_color += 1;
        let id = self.intern(register);
        self.assignment.insert(def, id);
        id
    }

    /// Register assigned to `def` without allocating, if any
    #[must_use]
    pub fn assigned(&self, def: InstId) -> Option<RegisterId> {
        self.assignment.get(&def).copied()
    }

    /// Details of a register
    #[must_use]
    pub fn info(&self, register: RegisterId) -> Option<&Register> {
        self.registers.get(register.0)
    }

    /// All registers allocated so far
    #[must_use]
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Copies `(phi, value)` to run at the end of `block`, as one parallel set
    #[must_use]
    pub fn pending_copies(&self, block: BlockId) -> &[(InstId, Value)] {
        self.pending.get(&block).map_or(&[], Vec::as_slice)
    }

    /// Total number of pending copies
    #[must_use]
    pub fn copy_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Number of phi arguments that were coalesced instead of copied
    #[must_use]
    pub fn merged_count(&self) -> usize {
        self.merged
    }

    /// Number of critical edges split
    #[must_use]
    pub fn split_count(&self) -> usize {
        self.split
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{ExpressionForest, InterferenceGraph},
        ir::{BinaryOp, CompareOp, ConstValue},
    };

    fn allocate(body: &mut MethodBody) -> (RegisterAllocator, InterferenceGraph) {
        let forest = ExpressionForest::build(body);
        let mut graph = InterferenceGraph::build(body, &forest);
        let allocator =
            RegisterAllocator::new(body, &mut graph, &CodegenConfig::default()).unwrap();
        (allocator, graph)
    }

    #[test]
    fn test_loop_variable_is_coalesced() {
        let mut body = MethodBody::new("Count", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let header = body.create_block();
        let loop_body = body.create_block();
        let exit = body.create_block();

        body.builder(entry).jump(header);
        let i = body.builder(header).phi(SsaType::I32, &[(entry, Value::i4(0))]);
        let mut b = body.builder(header);
        let cond = b.compare(CompareOp::Lt, i.into(), Value::Arg(0));
        b.branch(cond.into(), loop_body, exit);
        let mut b = body.builder(loop_body);
        let next = b.binary(BinaryOp::Add, i.into(), Value::i4(1), SsaType::I32);
        b.jump(header);
        body.add_phi_arg(i, loop_body, next.into()).unwrap();
        body.builder(exit).ret(Some(i.into()));

        let (mut allocator, _) = allocate(&mut body);
        assert_eq!(allocator.merged_count(), 1);
        assert_eq!(allocator.register(&body, i), allocator.register(&body, next));
        // the constant initializer becomes a copy at the end of entry
        assert_eq!(allocator.pending_copies(entry), &[(i, Value::i4(0))]);
        assert!(allocator.pending_copies(loop_body).is_empty());
        assert_eq!(allocator.split_count(), 0);
    }

    #[test]
    fn test_interfering_values_get_copies_on_split_edges() {
        // entry: br c, left, join      (critical: entry has 2 succs, join has 2 preds)
        // left: jump join
        // join: p = phi [entry: x], [left: y]; use x and y afterwards
        let print = crate::ir::MethodRef::new_static(crate::ir::Token(0x0A00_0001), 2, SsaType::Void);
        let mut body = MethodBody::new("F", vec![SsaType::I32, SsaType::Bool], SsaType::I32);
        let entry = body.entry();
        let left = body.create_block();
        let join = body.create_block();

        let mut b = body.builder(entry);
        let x = b.binary(BinaryOp::Mul, Value::Arg(0), Value::i4(2), SsaType::I32);
        let y = b.binary(BinaryOp::Add, Value::Arg(0), Value::i4(1), SsaType::I32);
        b.branch(Value::Arg(1), left, join);
        body.builder(left).jump(join);
        let p = body
            .builder(join)
            .phi(SsaType::I32, &[(entry, x.into()), (left, y.into())]);
        let mut b = body.builder(join);
        b.call(print, &[x.into(), y.into()]);
        b.ret(Some(p.into()));

        let (mut allocator, graph) = allocate(&mut body);
        assert_eq!(allocator.merged_count(), 0);
        assert_eq!(allocator.split_count(), 1);
        assert_eq!(allocator.copy_count(), 2);
        assert!(allocator.pending_copies(entry).is_empty());
        assert_eq!(allocator.pending_copies(left), &[(p, Value::Inst(y))]);

        let rp = allocator.register(&body, p);
        assert_ne!(rp, allocator.register(&body, x));
        assert_ne!(rp, allocator.register(&body, y));
        assert!(graph.interferes(p, x));
    }

    #[test]
    fn test_same_color_never_interferes() {
        let mut body = MethodBody::new("F", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let mut b = body.builder(entry);
        let a = b.binary(BinaryOp::Mul, Value::Arg(0), Value::Arg(0), SsaType::I32);
        let c = b.binary(BinaryOp::Add, a.into(), Value::i4(1), SsaType::I32);
        let d = b.binary(BinaryOp::Sub, c.into(), c.into(), SsaType::I32);
        let e = b.binary(BinaryOp::Mul, d.into(), d.into(), SsaType::I32);
        let f = b.binary(BinaryOp::Add, e.into(), a.into(), SsaType::I32);
        b.ret(Some(f.into()));

        let (mut allocator, graph) = allocate(&mut body);
        let defs = [a, c, d];
        for &x in &defs {
            for &y in &defs {
                if x != y && allocator.register(&body, x) == allocator.register(&body, y) {
                    assert!(!graph.interferes(x, y));
                }
            }
        }
        // a is live across c and d, c dies where d is defined
        assert_ne!(allocator.register(&body, a), allocator.register(&body, c));
        assert_eq!(allocator.register(&body, c), allocator.register(&body, d));
    }

    #[test]
    fn test_dummy_registers_are_unique_and_stable() {
        let mut body = MethodBody::new("F", vec![SsaType::I32], SsaType::Void);
        let entry = body.entry();
        let mut b = body.builder(entry);
        let x = b.binary(BinaryOp::Add, Value::Arg(0), Value::i4(1), SsaType::I32);
        let y = b.binary(BinaryOp::Add, Value::Arg(0), Value::i4(2), SsaType::I32);
        b.ret(None);

        let (mut allocator, _) = allocate(&mut body);
        let rx = allocator.register(&body, x);
        let ry = allocator.register(&body, y);
        assert_ne!(rx, ry);
        assert_eq!(allocator.register(&body, x), rx);
        assert_eq!(allocator.info(rx).unwrap().kind, SsaType::I32);
    }

    #[test]
    fn test_identical_split_blocks_are_merged() {
        // Three conditional predecessors pass the same constant to join
        let mut body = MethodBody::new("F", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let p1 = body.create_block();
        let p2 = body.create_block();
        let p3 = body.create_block();
        let join = body.create_block();

        let mut b = body.builder(entry);
        let c0 = b.compare(CompareOp::Eq, Value::Arg(0), Value::i4(0));
        b.branch(c0.into(), p1, join);
        let mut b = body.builder(p1);
        let c1 = b.compare(CompareOp::Eq, Value::Arg(0), Value::i4(1));
        b.branch(c1.into(), p2, join);
        let mut b = body.builder(p2);
        let c2 = b.compare(CompareOp::Eq, Value::Arg(0), Value::i4(2));
        b.branch(c2.into(), p3, join);
        let mut b = body.builder(p3);
        let c3 = b.compare(CompareOp::Eq, Value::Arg(0), Value::i4(3));
        b.branch(c3.into(), join, join);

        let minus_one = Value::Const(ConstValue::I4(-1));
        let phi = body.builder(join).phi(
            SsaType::I32,
            &[(entry, minus_one), (p1, minus_one), (p2, minus_one), (p3, Value::i4(7))],
        );
        body.builder(join).ret(Some(phi.into()));

        let (allocator, _) = allocate(&mut body);
        assert_eq!(allocator.split_count(), 3);

        // One split block survives and carries the shared copy
        let preds = body.predecessors(join);
        assert_eq!(preds.len(), 2);
        assert!(preds.contains(&p3));
        let keeper = preds.into_iter().find(|&b| b != p3).unwrap();
        assert_eq!(allocator.pending_copies(keeper), &[(phi, minus_one)]);
        assert_eq!(body.inst(phi).phi_args().len(), 2);
        assert_eq!(allocator.copy_count(), 2);
    }
}
