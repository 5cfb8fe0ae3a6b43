//! Arena-owned method body.
//!
//! [`MethodBody`] owns every block and instruction of a method. Blocks and instructions
//! refer to each other through [`BlockId`] / [`InstId`] handles only; operand lists are
//! owned by the using instruction and the reverse (def → uses) direction is a derived
//! [`UseIndex`] that is rebuilt lazily after mutations.

use std::{
    cell::OnceCell,
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    ir::{BlockId, ConstValue, InstId, InstKind, SsaType, Value, VariableId},
    Result,
};

/// A single instruction of the arena.
#[derive(Debug, Clone)]
pub struct Instruction {
    kind: InstKind,
    operands: Vec<Value>,
    result_type: SsaType,
    block: BlockId,
}

impl Instruction {
    /// The operation
    #[must_use]
    pub fn kind(&self) -> &InstKind {
        &self.kind
    }

    /// Ordered operands
    #[must_use]
    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    /// Type of the result, [`SsaType::Void`] when the instruction produces none
    #[must_use]
    pub fn result_type(&self) -> &SsaType {
        &self.result_type
    }

    /// Block the instruction belongs to
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Returns true if the instruction defines an SSA value
    #[must_use]
    pub fn has_result(&self) -> bool {
        self.result_type != SsaType::Void
    }

    /// Incoming `(predecessor, value)` pairs of a phi; empty for other kinds
    #[must_use]
    pub fn phi_args(&self) -> Vec<(BlockId, Value)> {
        match &self.kind {
            InstKind::Phi { preds } => preds
                .iter()
                .copied()
                .zip(self.operands.iter().copied())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A use edge: operand `index` of instruction `user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    /// The consuming instruction
    pub user: InstId,
    /// Position in the user's operand list
    pub index: usize,
}

/// Reverse index from definitions to their uses.
#[derive(Debug, Clone, Default)]
pub struct UseIndex {
    uses: Vec<Vec<Use>>,
}

impl UseIndex {
    /// Scans every live block of `body`.
    #[must_use]
    pub fn build(body: &MethodBody) -> Self {
        let mut uses = vec![Vec::new(); body.insts.len()];
        for block in body.block_ids() {
            for &user in body.insts(block) {
                for (index, operand) in body.inst(user).operands.iter().enumerate() {
                    if let Value::Inst(def) = operand {
                        if let Some(list) = uses.get_mut(def.0) {
                            list.push(Use { user, index });
                        }
                    }
                }
            }
        }
        UseIndex { uses }
    }

    /// All uses of `def`
    #[must_use]
    pub fn uses(&self, def: InstId) -> &[Use] {
        self.uses.get(def.0).map_or(&[], Vec::as_slice)
    }

    /// Number of uses of `def`
    #[must_use]
    pub fn use_count(&self, def: InstId) -> usize {
        self.uses(def).len()
    }

    /// Returns true if `def` has at least one use
    #[must_use]
    pub fn is_used(&self, def: InstId) -> bool {
        !self.uses(def).is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct BlockData {
    insts: Vec<InstId>,
    removed: bool,
}

/// A method body in SSA form.
///
/// # Example
///
/// ```rust
/// use cilgen::ir::{MethodBody, SsaType, Value, BinaryOp};
///
/// let mut body = MethodBody::new("Add", vec![SsaType::I32, SsaType::I32], SsaType::I32);
/// let entry = body.entry();
/// let mut b = body.builder(entry);
/// let sum = b.binary(BinaryOp::Add, Value::Arg(0), Value::Arg(1), SsaType::I32);
/// b.ret(Some(sum.into()));
/// assert_eq!(body.insts(entry).len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct MethodBody {
    name: String,
    params: Vec<SsaType>,
    return_type: SsaType,
    blocks: Vec<BlockData>,
    insts: Vec<Instruction>,
    variables: Vec<SsaType>,
    entry: BlockId,
    use_index: OnceCell<UseIndex>,
}

impl MethodBody {
    /// Creates a body with an empty entry block.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<SsaType>, return_type: SsaType) -> Self {
        MethodBody {
            name: name.into(),
            params,
            return_type,
            blocks: vec![BlockData::default()],
            insts: Vec::new(),
            variables: Vec::new(),
            entry: BlockId(0),
            use_index: OnceCell::new(),
        }
    }

    /// Identity of the method, used in diagnostics
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument types, including `this` for instance methods
    #[must_use]
    pub fn params(&self) -> &[SsaType] {
        &self.params
    }

    /// Declared return type
    #[must_use]
    pub fn return_type(&self) -> &SsaType {
        &self.return_type
    }

    /// Entry block
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Size of the block arena, including removed blocks
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Size of the instruction arena
    #[must_use]
    pub fn inst_capacity(&self) -> usize {
        self.insts.len()
    }

    /// Live blocks in creation order
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.removed)
            .map(|(i, _)| BlockId(i))
    }

    /// Returns true if `block` exists and was not removed
    #[must_use]
    pub fn is_live(&self, block: BlockId) -> bool {
        self.blocks.get(block.0).is_some_and(|b| !b.removed)
    }

    /// Instructions of `block` in order
    #[must_use]
    pub fn insts(&self, block: BlockId) -> &[InstId] {
        self.blocks.get(block.0).map_or(&[], |b| b.insts.as_slice())
    }

    /// Looks up an instruction.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this body.
    #[must_use]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0]
    }

    /// Address-exposed variables and their types
    #[must_use]
    pub fn variables(&self) -> &[SsaType] {
        &self.variables
    }

    /// Declares a new address-exposed variable
    pub fn add_variable(&mut self, ty: SsaType) -> VariableId {
        self.variables.push(ty);
        VariableId(self.variables.len() - 1)
    }

    /// Creates a new, empty block
    pub fn create_block(&mut self) -> BlockId {
        self.blocks.push(BlockData::default());
        BlockId(self.blocks.len() - 1)
    }

    /// Returns a builder appending to `block`
    pub fn builder(&mut self, block: BlockId) -> crate::ir::Builder<'_> {
        crate::ir::Builder::new(self, block)
    }

    /// Appends an instruction to `block`.
    ///
    /// Guards are kept in front of phis, phis in front of everything else; all other
    /// instructions go to the end.
    pub fn append(
        &mut self,
        block: BlockId,
        kind: InstKind,
        operands: Vec<Value>,
        result_type: SsaType,
    ) -> InstId {
        let id = InstId(self.insts.len());
        let position = if kind.is_guard() {
            Some(self.guards(block).len())
        } else if kind.is_phi() {
            Some(self.header_len(block))
        } else {
            None
        };
        self.insts.push(Instruction {
            kind,
            operands,
            result_type,
            block,
        });
        if let Some(data) = self.blocks.get_mut(block.0) {
            match position {
                Some(pos) => data.insts.insert(pos, id),
                None => data.insts.push(id),
            }
        }
        self.invalidate_uses();
        id
    }

    /// Adds an incoming value to a phi.
    pub fn add_phi_arg(&mut self, phi: InstId, pred: BlockId, value: Value) -> Result<()> {
        let inst = self
            .insts
            .get_mut(phi.0)
            .ok_or_else(|| invariant_error!("unknown instruction {}", phi))?;
        match &mut inst.kind {
            InstKind::Phi { preds } => {
                preds.push(pred);
                inst.operands.push(value);
            }
            other => return Err(invariant_error!("{} is a {}, not a phi", phi, other.name())),
        }
        self.invalidate_uses();
        Ok(())
    }

    /// Number of guard and phi instructions at the start of `block`
    fn header_len(&self, block: BlockId) -> usize {
        self.insts(block)
            .iter()
            .take_while(|&&i| {
                let kind = &self.insts[i.0].kind;
                kind.is_guard() || kind.is_phi()
            })
            .count()
    }

    /// Guards at the start of `block`, in clause order
    #[must_use]
    pub fn guards(&self, block: BlockId) -> Vec<InstId> {
        self.insts(block)
            .iter()
            .copied()
            .take_while(|&i| self.insts[i.0].kind.is_guard())
            .collect()
    }

    /// Phi nodes of `block`
    #[must_use]
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.insts(block)
            .iter()
            .copied()
            .filter(|&i| self.insts[i.0].kind.is_phi())
            .collect()
    }

    /// The terminator of `block`, if it has one
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.insts(block)
            .last()
            .copied()
            .filter(|&i| self.insts[i.0].kind.is_terminator())
    }

    /// Normal control-flow successors of `block`
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.insts[t.0].kind.successors())
            .unwrap_or_default()
    }

    /// Handler and filter entries of the guards at the start of `block`
    fn guard_entries(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        for guard in self.guards(block) {
            if let InstKind::Guard {
                handler, filter, ..
            } = &self.insts[guard.0].kind
            {
                if let Some(f) = filter {
                    out.push(*f);
                }
                out.push(*handler);
            }
        }
        out
    }

    /// Blocks covered by the protected region opened at `block`, starting with `block`.
    ///
    /// Follows normal control flow and stops at the `leave`/`endfinally` edges exiting the
    /// region. Regions opened further in are covered together with their handlers, and
    /// their own exits continue inside.
    #[must_use]
    pub fn protected_blocks(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(block, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);

            let mut nesting = depth;
            if current != block {
                let entries = self.guard_entries(current);
                if !entries.is_empty() {
                    nesting += 1;
                    stack.extend(entries.into_iter().map(|e| (e, nesting)));
                }
            }

            let Some(term) = self.terminator(current) else {
                continue;
            };
            let kind = &self.insts[term.0].kind;
            let next = if kind.exits_region() {
                match nesting.checked_sub(1) {
                    Some(outer) => outer,
                    None => continue,
                }
            } else {
                nesting
            };
            stack.extend(kind.successors().into_iter().map(|s| (s, next)));
        }
        out
    }

    /// Handler and filter entries an exception raised in each block can reach.
    ///
    /// Every block of a try body, nested regions included, gets the entries of all guards
    /// covering it.
    #[must_use]
    pub fn exceptional_successor_map(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut map: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in self.block_ids() {
            let entries = self.guard_entries(block);
            if entries.is_empty() {
                continue;
            }
            for covered in self.protected_blocks(block) {
                let succs = map.entry(covered).or_default();
                for entry in &entries {
                    if !succs.contains(entry) {
                        succs.push(*entry);
                    }
                }
            }
        }
        map
    }

    /// Predecessors of every live block, in block order
    #[must_use]
    pub fn predecessor_map(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut map: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in self.block_ids() {
            map.entry(block).or_default();
            for succ in self.successors(block) {
                let preds = map.entry(succ).or_default();
                if !preds.contains(&block) {
                    preds.push(block);
                }
            }
        }
        map
    }

    /// Predecessors of `block`
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.block_ids()
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    /// Static type of an operand
    #[must_use]
    pub fn value_type(&self, value: &Value) -> SsaType {
        match value {
            Value::Const(ConstValue::I4(_)) => SsaType::I32,
            Value::Const(ConstValue::I8(_)) => SsaType::I64,
            Value::Const(ConstValue::R4(_)) => SsaType::F32,
            Value::Const(ConstValue::R8(_)) => SsaType::F64,
            Value::Const(ConstValue::Null) => SsaType::Object,
            Value::Const(ConstValue::String(_)) => SsaType::String,
            Value::Arg(index) => self
                .params
                .get(usize::from(*index))
                .cloned()
                .unwrap_or_default(),
            Value::Inst(id) => self
                .insts
                .get(id.0)
                .map(|i| i.result_type.clone())
                .unwrap_or_default(),
        }
    }

    /// The def → uses index, rebuilt on first access after a mutation
    pub fn use_index(&self) -> &UseIndex {
        self.use_index.get_or_init(|| UseIndex::build(self))
    }

    fn invalidate_uses(&mut self) {
        self.use_index = OnceCell::new();
    }

    /// Inserts a block on the edge `pred → succ`.
    ///
    /// The new block jumps to `succ`, every reference to `succ` in the terminator of
    /// `pred` is redirected to it, and the phis of `succ` now name the new block as
    /// predecessor.
    pub fn split_critical_edge(&mut self, pred: BlockId, succ: BlockId) -> Result<BlockId> {
        let term = self
            .terminator(pred)
            .ok_or_else(|| invariant_error!("block {} has no terminator", pred))?;
        let kind = &self.insts[term.0].kind;
        if !kind.successors().contains(&succ) {
            return Err(invariant_error!("{} is not a successor of {}", succ, pred));
        }
        if matches!(kind, InstKind::Leave(_)) {
            return Err(invariant_error!(
                "cannot split region exit edge {} -> {}",
                pred,
                succ
            ));
        }

        let middle = self.create_block();
        self.append(middle, InstKind::Jump(succ), Vec::new(), SsaType::Void);
        self.insts[term.0].kind.retarget(succ, middle);
        self.redirect_phis(succ, pred, middle);
        Ok(middle)
    }

    /// Renames predecessor `old` to `new` in every phi of `block`
    pub fn redirect_phis(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        for phi in self.phis(block) {
            if let InstKind::Phi { preds } = &mut self.insts[phi.0].kind {
                for p in preds.iter_mut().filter(|p| **p == old) {
                    *p = new;
                }
            }
        }
    }

    /// Drops the incoming value for `pred` from every phi of `block`
    pub fn remove_phi_arg(&mut self, block: BlockId, pred: BlockId) {
        for phi in self.phis(block) {
            let inst = &mut self.insts[phi.0];
            if let InstKind::Phi { preds } = &mut inst.kind {
                while let Some(pos) = preds.iter().position(|p| *p == pred) {
                    preds.remove(pos);
                    inst.operands.remove(pos);
                }
            }
        }
        self.invalidate_uses();
    }

    /// Redirects the terminator of `block` from `old` to `new`
    pub fn retarget(&mut self, block: BlockId, old: BlockId, new: BlockId) -> Result<()> {
        let term = self
            .terminator(block)
            .ok_or_else(|| invariant_error!("block {} has no terminator", block))?;
        if self.insts[term.0].kind.retarget(old, new) {
            Ok(())
        } else {
            Err(invariant_error!("{} does not branch to {}", block, old))
        }
    }

    /// Removes a block from the method. Its instructions become unreachable.
    pub fn remove_block(&mut self, block: BlockId) {
        if let Some(data) = self.blocks.get_mut(block.0) {
            data.removed = true;
            data.insts.clear();
        }
        self.invalidate_uses();
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {}:", self.name)?;
        for block in self.block_ids() {
            writeln!(f, "  {block}:")?;
            for &id in self.insts(block) {
                let inst = self.inst(id);
                write!(f, "    ")?;
                if inst.has_result() {
                    write!(f, "{id}: {} = ", inst.result_type)?;
                }
                write!(f, "{}", inst.kind.name())?;
                if let InstKind::Phi { preds } = &inst.kind {
                    for (pred, value) in preds.iter().zip(&inst.operands) {
                        write!(f, " [{pred}: {value}]")?;
                    }
                } else {
                    for value in &inst.operands {
                        write!(f, " {value}")?;
                    }
                    for target in inst.kind.successors() {
                        write!(f, " -> {target}")?;
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
