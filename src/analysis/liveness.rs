//! Block-level liveness of slot-allocated definitions.
//!
//! Only definitions that end up in a local ("slot definitions") are tracked. Values that
//! are inlined as expression leaves never occupy a slot; their own operands are treated as
//! used where the leaf's root is emitted.
//!
//! Phi operands are live out of the corresponding predecessor (the copy that resolves the
//! phi executes at the end of that predecessor), and phi/guard results are defined at the
//! entry of their block. Handler and filter entries count as successors of every block
//! of the try body they protect, so values read in a handler stay live across it.

use std::collections::HashMap;

use crate::{
    analysis::ForestClassifier,
    ir::{BlockId, InstId, MethodBody, Value},
    utils::BitSet,
};

/// Returns true if `def` needs a local slot.
///
/// Phis and guards always need one when used, other instructions only when they are the
/// root of an expression tree.
#[must_use]
pub fn requires_slot(body: &MethodBody, forest: &dyn ForestClassifier, def: InstId) -> bool {
    let inst = body.inst(def);
    if !inst.has_result() || !body.use_index().is_used(def) {
        return false;
    }
    inst.kind().is_phi() || inst.kind().is_guard() || forest.is_rooted_tree(def)
}

/// Slot definitions read when the rooted instruction `inst` is emitted, looking through
/// inlined leaves.
#[must_use]
pub fn effective_uses(body: &MethodBody, forest: &dyn ForestClassifier, inst: InstId) -> Vec<InstId> {
    let mut out = Vec::new();
    let mut stack: Vec<InstId> = vec![inst];
    while let Some(current) = stack.pop() {
        for operand in body.inst(current).operands() {
            let Value::Inst(def) = operand else {
                continue;
            };
            if forest.is_leaf(*def) {
                stack.push(*def);
            } else if !out.contains(def) {
                out.push(*def);
            }
        }
    }
    out
}

/// Live-in / live-out sets of slot definitions per block.
#[derive(Debug, Clone)]
pub struct Liveness {
    capacity: usize,
    slots: BitSet,
    live_in: HashMap<BlockId, BitSet>,
    live_out: HashMap<BlockId, BitSet>,
    live_through: HashMap<BlockId, BitSet>,
}

impl Liveness {
    /// Solves the backward dataflow problem over all live blocks of `body`.
    #[must_use]
    pub fn compute(body: &MethodBody, forest: &dyn ForestClassifier) -> Self {
        let capacity = body.inst_capacity();
        let blocks: Vec<BlockId> = body.block_ids().collect();

        let mut slots = BitSet::new(capacity);
        for &block in &blocks {
            for &id in body.insts(block) {
                if requires_slot(body, forest, id) {
                    slots.insert(id.index());
                }
            }
        }

        let mut use_sets: HashMap<BlockId, BitSet> = HashMap::new();
        let mut def_sets: HashMap<BlockId, BitSet> = HashMap::new();
        let mut phi_uses: HashMap<BlockId, BitSet> = HashMap::new();
        for &block in &blocks {
            use_sets.insert(block, BitSet::new(capacity));
            def_sets.insert(block, BitSet::new(capacity));
            phi_uses.insert(block, BitSet::new(capacity));
        }

        for &block in &blocks {
            let mut uses = BitSet::new(capacity);
            let mut defs = BitSet::new(capacity);

            for &id in body.insts(block) {
                let inst = body.inst(id);
                if inst.kind().is_phi() {
                    for (pred, value) in inst.phi_args() {
                        if let (Value::Inst(v), Some(set)) = (value, phi_uses.get_mut(&pred)) {
                            if slots.contains(v.index()) {
                                set.insert(v.index());
                            }
                        }
                    }
                } else if !inst.kind().is_guard() && forest.is_rooted_tree(id) {
                    for used in effective_uses(body, forest, id) {
                        if slots.contains(used.index()) && !defs.contains(used.index()) {
                            uses.insert(used.index());
                        }
                    }
                }
                if slots.contains(id.index()) {
                    defs.insert(id.index());
                }
            }

            use_sets.insert(block, uses);
            def_sets.insert(block, defs);
        }

        // A handler can be entered from any block of its try body
        let exceptional = body.exceptional_successor_map();
        let successors: HashMap<BlockId, Vec<BlockId>> = blocks
            .iter()
            .map(|&b| {
                let mut succs = body.successors(b);
                if let Some(entries) = exceptional.get(&b) {
                    succs.extend(entries.iter().copied());
                }
                (b, succs)
            })
            .collect();

        let mut live_in: HashMap<BlockId, BitSet> =
            blocks.iter().map(|&b| (b, BitSet::new(capacity))).collect();
        let mut live_out = live_in.clone();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in blocks.iter().rev() {
                let mut out = phi_uses[&block].clone();
                for succ in &successors[&block] {
                    if let Some(set) = live_in.get(succ) {
                        out.union_with(set);
                    }
                }

                let mut inp = out.clone();
                inp.difference_with(&def_sets[&block]);
                inp.union_with(&use_sets[&block]);

                if live_in[&block] != inp {
                    live_in.insert(block, inp);
                    changed = true;
                }
                if live_out[&block] != out {
                    live_out.insert(block, out);
                    changed = true;
                }
            }
        }

        let live_through = blocks
            .iter()
            .map(|&block| {
                let mut set = BitSet::new(capacity);
                for succ in &successors[&block] {
                    if let Some(s) = live_in.get(succ) {
                        set.union_with(s);
                    }
                }
                (block, set)
            })
            .collect();

        Liveness {
            capacity,
            slots,
            live_in,
            live_out,
            live_through,
        }
    }

    /// Number of instruction indices covered by the sets
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if `def` is a slot definition
    #[must_use]
    pub fn is_slot(&self, def: InstId) -> bool {
        self.slots.contains(def.index())
    }

    /// Slot definitions live at entry of `block`
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> Option<&BitSet> {
        self.live_in.get(&block)
    }

    /// Slot definitions live at exit of `block`, including phi operands flowing out of it
    #[must_use]
    pub fn live_out(&self, block: BlockId) -> Option<&BitSet> {
        self.live_out.get(&block)
    }

    /// Slot definitions live into some successor of `block`, excluding values that only
    /// flow out as phi operands
    #[must_use]
    pub fn live_through(&self, block: BlockId) -> Option<&BitSet> {
        self.live_through.get(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ExpressionForest,
        ir::{BinaryOp, CompareOp, GuardKind, MethodRef, SsaType, Token, TypeRef},
    };

    #[test]
    fn test_loop_carried_value_is_live_around_loop() {
        // entry: i0 = 0; goto header
        // header: i = phi [entry: 0], [body: next]; c = i < arg0; br c, body, exit
        // body: next = i + 1; goto header
        // exit: ret i
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

        let forest = ExpressionForest::build(&body);
        let liveness = Liveness::compute(&body, &forest);

        assert!(liveness.is_slot(i));
        assert!(liveness.is_slot(next));
        assert!(!liveness.is_slot(cond));

        // i is defined by the header phi, so it is live into body and exit, not header
        assert!(!liveness.live_in(header).unwrap().contains(i.index()));
        assert!(liveness.live_in(loop_body).unwrap().contains(i.index()));
        assert!(liveness.live_in(exit).unwrap().contains(i.index()));

        // next flows to the header phi from body
        assert!(liveness.live_out(loop_body).unwrap().contains(next.index()));
        assert!(!liveness.live_through(loop_body).unwrap().contains(next.index()));
    }

    #[test]
    fn test_effective_uses_look_through_leaves() {
        let mut body = MethodBody::new("F", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let mut b = body.builder(entry);
        let sq = b.binary(BinaryOp::Mul, Value::Arg(0), Value::Arg(0), SsaType::I32);
        let inc = b.binary(BinaryOp::Add, sq.into(), Value::i4(1), SsaType::I32);
        let sum = b.binary(BinaryOp::Add, inc.into(), sq.into(), SsaType::I32);
        let ret = b.ret(Some(sum.into()));

        let forest = ExpressionForest::build(&body);
        assert!(forest.is_leaf(inc));
        assert_eq!(effective_uses(&body, &forest, ret), vec![sq]);
    }

    #[test]
    fn test_value_read_by_handler_is_live_across_try_body() {
        // entry: x = arg0 * 2; jump t1
        // t1: guard catch(handler); f(); jump t2
        // t2: y = g(); h(y); h(y); leave exit
        // handler: h(x); leave exit    exit: ret
        let f = MethodRef::new_static(Token(0x0A00_0001), 0, SsaType::Void);
        let g = MethodRef::new_static(Token(0x0A00_0002), 0, SsaType::I32);
        let h = MethodRef::new_static(Token(0x0A00_0003), 1, SsaType::Void);

        let mut body = MethodBody::new("F", vec![SsaType::I32], SsaType::Void);
        let entry = body.entry();
        let t1 = body.create_block();
        let t2 = body.create_block();
        let handler = body.create_block();
        let exit = body.create_block();

        let mut b = body.builder(entry);
        let x = b.binary(BinaryOp::Mul, Value::Arg(0), Value::i4(2), SsaType::I32);
        b.jump(t1);
        let mut b = body.builder(t1);
        b.guard(GuardKind::Catch(TypeRef::new(Token(0x0100_0005))), handler, None);
        b.call(f, &[]);
        b.jump(t2);
        let mut b = body.builder(t2);
        let y = b.call(g, &[]);
        b.call(h.clone(), &[y.into()]);
        b.call(h.clone(), &[y.into()]);
        b.leave(exit);
        let mut b = body.builder(handler);
        b.call(h, &[x.into()]);
        b.leave(exit);
        body.builder(exit).ret(None);

        let forest = ExpressionForest::build(&body);
        let liveness = Liveness::compute(&body, &forest);

        assert!(liveness.is_slot(x));
        assert!(liveness.is_slot(y));
        assert!(liveness.live_in(t2).unwrap().contains(x.index()));
        assert!(liveness.live_out(t2).unwrap().contains(x.index()));
        assert!(liveness.live_through(t2).unwrap().contains(x.index()));
        assert!(!liveness.live_in(exit).unwrap().contains(x.index()));
    }
}
