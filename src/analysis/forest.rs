//! Expression forest: which values are evaluated inline and which live in a local.
//!
//! On a stack machine a value consumed exactly once, right where it is produced, never
//! needs a local: the producer can be emitted as part of the consumer's operand
//! evaluation. Such instructions are *leaves*; every other instruction is the root of an
//! expression tree and is emitted in place, with its result stored to a slot.

use std::collections::HashMap;

use crate::{
    ir::{InstId, MethodBody},
    utils::BitSet,
};

/// Decides whether an instruction is emitted inline by its consumer.
pub trait ForestClassifier {
    /// Returns true if `inst` is emitted at its own position (its result, if used, goes
    /// through a slot)
    fn is_rooted_tree(&self, inst: InstId) -> bool;

    /// Returns true if `inst` is emitted inline by its single consumer
    fn is_leaf(&self, inst: InstId) -> bool;
}

/// Forest classifier built from use counts and side-effect ordering.
///
/// An instruction is a leaf when:
/// - it produces a value that is used exactly once,
/// - the user is in the same block and is neither a phi nor a guard,
/// - moving its evaluation down to the root of its tree crosses no instruction it could
///   observably be reordered with (a side effect against a memory read or another side
///   effect).
#[derive(Debug, Clone)]
pub struct ExpressionForest {
    leaves: BitSet,
}

impl ExpressionForest {
    /// Classifies every instruction of `body`.
    #[must_use]
    pub fn build(body: &MethodBody) -> Self {
        let uses = body.use_index();
        let mut leaves = BitSet::new(body.inst_capacity());

        for block in body.block_ids() {
            let insts = body.insts(block);
            let position: HashMap<InstId, usize> =
                insts.iter().enumerate().map(|(i, &id)| (id, i)).collect();

            // Index of the instruction at which each instruction is actually evaluated.
            let mut eval_at: Vec<usize> = (0..insts.len()).collect();

            for i in (0..insts.len()).rev() {
                let id = insts[i];
                let inst = body.inst(id);
                if !inst.has_result()
                    || inst.kind().is_phi()
                    || inst.kind().is_guard()
                    || inst.kind().is_terminator()
                {
                    continue;
                }

                let [single] = uses.uses(id) else {
                    continue;
                };
                let user = body.inst(single.user);
                if user.block() != block || user.kind().is_phi() || user.kind().is_guard() {
                    continue;
                }
                let Some(&user_pos) = position.get(&single.user) else {
                    continue;
                };
                if user_pos <= i {
                    continue;
                }

                let root = if leaves.contains(single.user.index()) {
                    eval_at[user_pos]
                } else {
                    user_pos
                };
                if Self::can_move(body, insts, i, root) {
                    leaves.insert(id.index());
                    eval_at[i] = root;
                }
            }
        }

        ExpressionForest { leaves }
    }

    /// Returns true if the instruction at `from` may be evaluated at `to` instead.
    fn can_move(body: &MethodBody, insts: &[InstId], from: usize, to: usize) -> bool {
        let moved = body.inst(insts[from]).kind();
        let writes = moved.has_side_effects();
        let reads = moved.reads_memory();
        if !writes && !reads {
            return true;
        }

        insts[from + 1..to].iter().all(|&other| {
            let other = body.inst(other).kind();
            let conflict = (writes && (other.has_side_effects() || other.reads_memory()))
                || (reads && other.has_side_effects());
            !conflict
        })
    }

    /// Number of leaf instructions
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.count()
    }
}

impl ForestClassifier for ExpressionForest {
    fn is_rooted_tree(&self, inst: InstId) -> bool {
        !self.leaves.contains(inst.index())
    }

    fn is_leaf(&self, inst: InstId) -> bool {
        self.leaves.contains(inst.index())
    }
}
