//! Emission of a laid-out, register-allocated method body.
//!
//! The [`CodeGenerator`] walks the blocks in layout order and drives the [`Assembler`]:
//!
//! - every block starts with an empty evaluation stack, except catch and filter entries
//!   which receive the exception object and store it into the guard's register,
//! - rooted instructions are lowered in place and their result stored to a register (or
//!   popped when nothing reads it; unused trees without side effects are skipped), leaves
//!   are lowered inline by their consumer,
//! - the pending phi copies of the block are sequentialized right before the terminator,
//! - terminators are lowered with fallthrough elision, compare-and-branch fusion, zero
//!   tests and sense inversion.

use std::collections::HashMap;

use crate::{
    analysis::ForestClassifier,
    assembly::{
        Assembler, EmittedBody, ExceptionHandlerFlags, Label, Opcode, RegionLabels, SlotKey,
        VarSlot,
    },
    codegen::{
        lowering::compare_branch_opcode, BlockLayout, LayoutRegion, ParallelCopy,
        RegisterAllocator, RegisterId,
    },
    config::CodegenConfig,
    ir::{BlockId, CompareOp, GuardKind, InstId, InstKind, MethodBody, SsaType, Value, VariableId},
    Result,
};

/// Location taking part in a phi copy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CopySlot {
    Register(RegisterId),
    Scratch,
}

fn register_slot(
    asm: &mut Assembler,
    allocator: &RegisterAllocator,
    register: RegisterId,
) -> Result<u16> {
    let info = allocator
        .info(register)
        .ok_or_else(|| invariant_error!("unknown register {}", register))?;
    asm.local(SlotKey::Register(register.index()), &info.kind)
}

/// Emits one method body.
pub struct CodeGenerator<'a> {
    pub(super) body: &'a MethodBody,
    pub(super) forest: &'a dyn ForestClassifier,
    pub(super) allocator: &'a mut RegisterAllocator,
    pub(super) layout: &'a BlockLayout,
    pub(super) asm: Assembler,
    labels: HashMap<BlockId, Label>,
}

impl<'a> CodeGenerator<'a> {
    /// Creates a generator for `body`; `allocator` and `layout` must have been computed
    /// for the same body.
    pub fn new(
        body: &'a MethodBody,
        forest: &'a dyn ForestClassifier,
        allocator: &'a mut RegisterAllocator,
        layout: &'a BlockLayout,
    ) -> Self {
        CodeGenerator {
            body,
            forest,
            allocator,
            layout,
            asm: Assembler::new(!matches!(body.return_type(), SsaType::Void)),
            labels: HashMap::new(),
        }
    }

    /// Emits every block and seals the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if the body, the allocation and the
    /// layout disagree, and [`crate::Error::Unsupported`] for instructions without a
    /// lowering.
    pub fn generate(mut self, config: &CodegenConfig) -> Result<EmittedBody> {
        let layout = self.layout;
        for &block in layout.order() {
            let label = self.asm.define_label();
            self.labels.insert(block, label);
        }

        for &block in layout.order() {
            self.emit_block(block)?;
        }

        for region in layout.regions() {
            let labels = self.region_labels(region)?;
            self.asm.add_region(labels);
        }

        self.asm.seal(config)
    }

    fn label(&self, block: BlockId) -> Result<Label> {
        self.labels
            .get(&block)
            .copied()
            .ok_or_else(|| invariant_error!("branch to {} which is not laid out", block))
    }

    /// Label of the block at `position`, `None` past the last block
    fn label_at(&self, position: usize) -> Result<Option<Label>> {
        match self.layout.order().get(position) {
            Some(&block) => self.label(block).map(Some),
            None if position == self.layout.order().len() => Ok(None),
            None => Err(invariant_error!("region bound {} outside the layout", position)),
        }
    }

    fn required_label(&self, position: usize) -> Result<Label> {
        self.label_at(position)?
            .ok_or_else(|| invariant_error!("region starts at the end of the layout"))
    }

    fn region_labels(&self, region: &LayoutRegion) -> Result<RegionLabels> {
        let (flags, catch_type) = match region.kind {
            GuardKind::Catch(ty) => (ExceptionHandlerFlags::EXCEPTION, Some(ty)),
            GuardKind::Filter => (ExceptionHandlerFlags::FILTER, None),
            GuardKind::Finally => (ExceptionHandlerFlags::FINALLY, None),
            GuardKind::Fault => (ExceptionHandlerFlags::FAULT, None),
        };
        let filter = match &region.filter_range {
            Some(range) => Some((
                self.required_label(range.start)?,
                self.label_at(range.end)?,
            )),
            None => None,
        };
        Ok(RegionLabels {
            flags,
            catch_type,
            try_start: self.required_label(region.try_range.start)?,
            try_end: self.label_at(region.try_range.end)?,
            handler_start: self.required_label(region.handler_range.start)?,
            handler_end: self.label_at(region.handler_range.end)?,
            filter,
        })
    }

    /// Local slot backing the register of `def`.
    pub(super) fn slot(&mut self, def: InstId) -> Result<u16> {
        let register = self.allocator.register(self.body, def);
        register_slot(&mut self.asm, self.allocator, register)
    }

    /// Local slot of an address-exposed variable.
    pub(super) fn variable_slot(&mut self, var: VariableId) -> Result<u16> {
        let ty = self
            .body
            .variables()
            .get(var.index())
            .ok_or_else(|| invariant_error!("unknown variable {:?}", var))?;
        self.asm.local(SlotKey::Variable(var), ty)
    }

    /// Pushes `value`, lowering it inline when it is a leaf.
    pub(super) fn emit_value(&mut self, value: &Value) -> Result<()> {
        match *value {
            Value::Const(constant) => self.asm.emit_const(&constant),
            Value::Arg(index) => self.asm.emit_load(VarSlot::Arg(index)),
            Value::Inst(def) if self.forest.is_leaf(def) => self.lower(def),
            Value::Inst(def) => {
                let slot = self.slot(def)?;
                self.asm.emit_load(VarSlot::Local(slot))
            }
        }
    }

    fn emit_block(&mut self, block: BlockId) -> Result<()> {
        let body = self.body;
        let label = self.label(block)?;
        self.asm.mark_label(label)?;
        self.asm.set_stack_depth(0);

        if let Some(guard) = self.layout.handler_guard(block) {
            self.enter_handler(guard)?;
        }

        let mut terminator = None;
        for &id in body.insts(block) {
            let kind = body.inst(id).kind();
            if kind.is_phi() || kind.is_guard() {
                continue;
            }
            if kind.is_terminator() {
                terminator = Some(id);
                break;
            }
            if self.forest.is_rooted_tree(id) {
                self.emit_rooted(id)?;
            }
        }

        self.emit_copies(block)?;

        let terminator =
            terminator.ok_or_else(|| invariant_error!("block {} has no terminator", block))?;
        self.emit_terminator(block, terminator)
    }

    /// Stores the exception object a catch or filter entry receives.
    fn enter_handler(&mut self, guard: InstId) -> Result<()> {
        let InstKind::Guard { kind, .. } = self.body.inst(guard).kind() else {
            return Err(invariant_error!("{} is not a guard", guard));
        };
        if !kind.pushes_exception() {
            return Ok(());
        }

        self.asm.set_stack_depth(1);
        if self.body.use_index().is_used(guard) {
            let slot = self.slot(guard)?;
            self.asm.emit_store(VarSlot::Local(slot))
        } else {
            self.asm.emit(Opcode::Pop, None)
        }
    }

    /// Returns true if `id` and its inline operands have no effect besides their results
    fn is_pure_tree(&self, id: InstId) -> bool {
        let inst = self.body.inst(id);
        !inst.kind().has_side_effects()
            && inst.operands().iter().all(|operand| match operand.as_inst() {
                Some(def) if self.forest.is_leaf(def) => self.is_pure_tree(def),
                _ => true,
            })
    }

    fn emit_rooted(&mut self, id: InstId) -> Result<()> {
        let inst = self.body.inst(id);
        if inst.has_result() && !self.body.use_index().is_used(id) && self.is_pure_tree(id) {
            return Ok(());
        }

        let before = self.asm.stack_depth();
        self.lower(id)?;
        let pushed = self.asm.stack_depth().saturating_sub(before);
        if pushed == 0 {
            return Ok(());
        }

        if self.body.inst(id).has_result() && self.body.use_index().is_used(id) {
            let slot = self.slot(id)?;
            self.asm.emit_store(VarSlot::Local(slot))
        } else {
            for _ in 0..pushed {
                self.asm.emit(Opcode::Pop, None)?;
            }
            Ok(())
        }
    }

    /// Emits the phi copies scheduled at the end of `block`.
    ///
    /// Register to register copies form the parallel set. Constants and arguments are
    /// materialized afterwards, since nothing in the set reads their destinations then.
    fn emit_copies(&mut self, block: BlockId) -> Result<()> {
        let copies = self.allocator.pending_copies(block).to_vec();
        if copies.is_empty() {
            return Ok(());
        }

        let mut parallel = ParallelCopy::new();
        let mut materialized = Vec::new();
        for (phi, value) in copies {
            let dest = self.allocator.register(self.body, phi);
            match value {
                Value::Inst(def) => {
                    let src = self.allocator.register(self.body, def);
                    parallel.add(CopySlot::Register(dest), CopySlot::Register(src));
                }
                other => materialized.push((dest, other)),
            }
        }

        let asm = &mut self.asm;
        let allocator = &*self.allocator;
        let mut scratch: Option<u16> = None;
        let temps = parallel.sequentialize(
            || Ok(CopySlot::Scratch),
            |dest, src| {
                let source = match src {
                    CopySlot::Register(register) => register_slot(asm, allocator, *register)?,
                    CopySlot::Scratch => scratch
                        .ok_or_else(|| invariant_error!("scratch slot read before written"))?,
                };
                asm.emit_load(VarSlot::Local(source))?;

                let target = match (dest, src) {
                    (CopySlot::Register(register), _) => {
                        register_slot(asm, allocator, *register)?
                    }
                    (CopySlot::Scratch, CopySlot::Register(register)) => {
                        let kind = allocator
                            .info(*register)
                            .map(|info| info.kind.clone())
                            .ok_or_else(|| invariant_error!("unknown register {}", register))?;
                        let slot = asm.scratch_local(&kind)?;
                        scratch = Some(slot);
                        slot
                    }
                    (CopySlot::Scratch, CopySlot::Scratch) => {
                        return Err(invariant_error!("scratch slot copied onto itself"))
                    }
                };
                asm.emit_store(VarSlot::Local(target))
            },
        )?;
        if temps > 0 {
            log::trace!("{}: copy cycle broken in {}", self.body.name(), block);
        }

        for (dest, value) in materialized {
            self.emit_value(&value)?;
            let slot = register_slot(&mut self.asm, self.allocator, dest)?;
            self.asm.emit_store(VarSlot::Local(slot))?;
        }
        Ok(())
    }

    fn emit_jump(&mut self, target: BlockId, next: Option<BlockId>) -> Result<()> {
        if next == Some(target) {
            return Ok(());
        }
        let label = self.label(target)?;
        self.asm.emit_branch(Opcode::Br, label)
    }

    fn emit_terminator(&mut self, block: BlockId, terminator: InstId) -> Result<()> {
        let body = self.body;
        let inst = body.inst(terminator);
        let next = self.layout.next_block(block);

        match inst.kind() {
            InstKind::Jump(target) => self.emit_jump(*target, next),
            InstKind::Leave(target) => {
                let label = self.label(*target)?;
                self.asm.emit_branch(Opcode::Leave, label)
            }
            InstKind::Branch {
                then_block,
                else_block,
            } => {
                let [condition] = inst.operands() else {
                    return Err(invariant_error!("branch {} needs one operand", terminator));
                };
                self.emit_conditional(condition, *then_block, *else_block, next)
            }
            InstKind::Switch { targets, default } => {
                let [index] = inst.operands() else {
                    return Err(invariant_error!("switch {} needs one operand", terminator));
                };
                self.emit_value(index)?;
                let labels = targets
                    .iter()
                    .map(|t| self.label(*t))
                    .collect::<Result<Vec<_>>>()?;
                self.asm.emit_switch(labels)?;
                self.emit_jump(*default, next)
            }
            InstKind::Return => {
                for operand in inst.operands() {
                    self.emit_value(operand)?;
                }
                self.asm.emit(Opcode::Ret, None)
            }
            InstKind::Throw => {
                for operand in inst.operands() {
                    self.emit_value(operand)?;
                }
                self.asm.emit(Opcode::Throw, None)
            }
            InstKind::Rethrow => self.asm.emit(Opcode::Rethrow, None),
            InstKind::EndFinally => self.asm.emit(Opcode::Endfinally, None),
            InstKind::EndFilter => {
                for operand in inst.operands() {
                    self.emit_value(operand)?;
                }
                self.asm.emit(Opcode::Endfilter, None)
            }
            other => Err(invariant_error!(
                "{} ({}) ends block {}",
                terminator,
                other.name(),
                block
            )),
        }
    }

    /// The comparison feeding a branch, if it can be fused into the branch opcode
    fn fusable_compare(&self, condition: &Value) -> Option<(CompareOp, Value, Value)> {
        let def = condition.as_inst()?;
        if !self.forest.is_leaf(def) {
            return None;
        }
        let inst = self.body.inst(def);
        match (inst.kind(), inst.operands()) {
            (InstKind::Compare(op), [left, right]) => Some((*op, *left, *right)),
            _ => None,
        }
    }

    fn emit_conditional(
        &mut self,
        condition: &Value,
        then_block: BlockId,
        else_block: BlockId,
        next: Option<BlockId>,
    ) -> Result<()> {
        if then_block == else_block {
            self.emit_value(condition)?;
            self.asm.emit(Opcode::Pop, None)?;
            return self.emit_jump(then_block, next);
        }

        // Branch to the arm that does not follow, on the condition selecting it
        let invert = next == Some(then_block);
        let (target, fallthrough) = if invert {
            (else_block, then_block)
        } else {
            (then_block, else_block)
        };
        let label = self.label(target)?;

        match self.fusable_compare(condition) {
            Some((op, left, right)) => {
                let is_float = self.body.value_type(&left).is_float();
                let op = if invert { op.negate(is_float) } else { op };
                let zero_test = matches!(op, CompareOp::Eq | CompareOp::Ne)
                    && (left.is_zero_or_null() || right.is_zero_or_null());
                if zero_test {
                    let tested = if right.is_zero_or_null() { left } else { right };
                    self.emit_value(&tested)?;
                    let opcode = if op == CompareOp::Eq {
                        Opcode::Brfalse
                    } else {
                        Opcode::Brtrue
                    };
                    self.asm.emit_branch(opcode, label)?;
                } else {
                    self.emit_value(&left)?;
                    self.emit_value(&right)?;
                    self.asm.emit_branch(compare_branch_opcode(op), label)?;
                }
            }
            None => {
                self.emit_value(condition)?;
                let opcode = if invert {
                    Opcode::Brfalse
                } else {
                    Opcode::Brtrue
                };
                self.asm.emit_branch(opcode, label)?;
            }
        }

        self.emit_jump(fallthrough, next)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        codegen::compile_method,
        ir::{BinaryOp, MethodRef, Token, TypeRef},
        test::{init_logging, replay_stack, run},
    };

    use super::*;

    fn compile(body: &mut MethodBody) -> EmittedBody {
        init_logging();
        compile_method(body, &CodegenConfig::default()).unwrap()
    }

    fn opcodes(emitted: &EmittedBody) -> Vec<Opcode> {
        emitted.instructions.iter().map(|i| i.opcode).collect()
    }

    fn max_body() -> MethodBody {
        let mut body = MethodBody::new("Max", vec![SsaType::I32, SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let then_block = body.create_block();
        let else_block = body.create_block();
        let join = body.create_block();

        let mut b = body.builder(entry);
        let cond = b.compare(CompareOp::Gt, Value::Arg(0), Value::Arg(1));
        b.branch(cond.into(), then_block, else_block);
        body.builder(then_block).jump(join);
        body.builder(else_block).jump(join);
        let mut b = body.builder(join);
        let max = b.phi(
            SsaType::I32,
            &[(then_block, Value::Arg(0)), (else_block, Value::Arg(1))],
        );
        b.ret(Some(max.into()));
        body
    }

    #[test]
    fn test_max_fuses_inverted_compare() {
        let mut body = max_body();
        let emitted = compile(&mut body);

        use Opcode::*;
        assert_eq!(
            opcodes(&emitted),
            vec![Ldarg0, Ldarg1, BleS, Ldarg0, Stloc0, Ldloc0, Ret, Ldarg1, Stloc0, BrS]
        );
        assert_eq!(emitted.locals, vec![SsaType::I32]);
        assert_eq!(run(&emitted, &[3, 5]), Some(5));
        assert_eq!(run(&emitted, &[7, 2]), Some(7));
        assert!(replay_stack(&emitted, true, &HashMap::new()) <= emitted.max_stack);
    }

    #[test]
    fn test_zero_compare_becomes_brtrue() {
        let mut body = MethodBody::new("IsZero", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let yes = body.create_block();
        let no = body.create_block();
        let mut b = body.builder(entry);
        let cond = b.compare(CompareOp::Eq, Value::Arg(0), Value::i4(0));
        b.branch(cond.into(), yes, no);
        body.builder(yes).ret(Some(Value::i4(1)));
        body.builder(no).ret(Some(Value::i4(2)));

        let emitted = compile(&mut body);
        use Opcode::*;
        assert_eq!(
            opcodes(&emitted),
            vec![Ldarg0, BrtrueS, LdcI4_1, Ret, LdcI4_2, Ret]
        );
        assert_eq!(run(&emitted, &[0]), Some(1));
        assert_eq!(run(&emitted, &[5]), Some(2));
    }

    #[test]
    fn test_loop_sum() {
        // for (i = 0, acc = 0; i < n; i++) acc += i; return acc;
        let mut body = MethodBody::new("Sum", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let header = body.create_block();
        let latch = body.create_block();
        let exit = body.create_block();

        body.builder(entry).jump(header);
        let mut b = body.builder(header);
        let i = b.phi(SsaType::I32, &[(entry, Value::i4(0))]);
        let acc = b.phi(SsaType::I32, &[(entry, Value::i4(0))]);
        let cond = b.compare(CompareOp::Lt, i.into(), Value::Arg(0));
        b.branch(cond.into(), latch, exit);
        let mut b = body.builder(latch);
        let next_i = b.binary(BinaryOp::Add, i.into(), Value::i4(1), SsaType::I32);
        let next_acc = b.binary(BinaryOp::Add, acc.into(), i.into(), SsaType::I32);
        b.jump(header);
        body.add_phi_arg(i, latch, next_i.into()).unwrap();
        body.add_phi_arg(acc, latch, next_acc.into()).unwrap();
        body.builder(exit).ret(Some(acc.into()));

        let emitted = compile(&mut body);
        assert_eq!(run(&emitted, &[0]), Some(0));
        assert_eq!(run(&emitted, &[5]), Some(10));
        assert!(replay_stack(&emitted, true, &HashMap::new()) <= emitted.max_stack);
    }

    #[test]
    fn test_swapping_phis_break_the_cycle() {
        // while (n > 0) { (a, b) = (b, a); n--; } return a - b;
        let mut body = MethodBody::new(
            "Swap",
            vec![SsaType::I32, SsaType::I32, SsaType::I32],
            SsaType::I32,
        );
        let entry = body.entry();
        let header = body.create_block();
        let latch = body.create_block();
        let exit = body.create_block();

        body.builder(entry).jump(header);
        let mut b = body.builder(header);
        let a = b.phi(SsaType::I32, &[(entry, Value::Arg(0))]);
        let bv = b.phi(SsaType::I32, &[(entry, Value::Arg(1))]);
        let n = b.phi(SsaType::I32, &[(entry, Value::Arg(2))]);
        let cond = b.compare(CompareOp::Gt, n.into(), Value::i4(0));
        b.branch(cond.into(), latch, exit);
        let mut b = body.builder(latch);
        let next_n = b.binary(BinaryOp::Sub, n.into(), Value::i4(1), SsaType::I32);
        b.jump(header);
        body.add_phi_arg(a, latch, bv.into()).unwrap();
        body.add_phi_arg(bv, latch, a.into()).unwrap();
        body.add_phi_arg(n, latch, next_n.into()).unwrap();
        let mut b = body.builder(exit);
        let diff = b.binary(BinaryOp::Sub, a.into(), bv.into(), SsaType::I32);
        b.ret(Some(diff.into()));

        let emitted = compile(&mut body);
        assert_eq!(run(&emitted, &[1, 2, 0]), Some(-1));
        assert_eq!(run(&emitted, &[1, 2, 1]), Some(1));
        assert_eq!(run(&emitted, &[1, 2, 2]), Some(-1));
        assert_eq!(run(&emitted, &[1, 2, 3]), Some(1));
    }

    #[test]
    fn test_switch_default_falls_through() {
        let mut body = MethodBody::new("Pick", vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        let zero = body.create_block();
        let one = body.create_block();
        let other = body.create_block();
        body.builder(entry).switch(Value::Arg(0), vec![zero, one], other);
        body.builder(zero).ret(Some(Value::i4(10)));
        body.builder(one).ret(Some(Value::i4(20)));
        body.builder(other).ret(Some(Value::i4(30)));

        let emitted = compile(&mut body);
        assert_eq!(emitted.instructions[1].opcode, Opcode::Switch);
        assert!(!opcodes(&emitted).contains(&Opcode::BrS));
        assert_eq!(run(&emitted, &[0]), Some(10));
        assert_eq!(run(&emitted, &[1]), Some(20));
        assert_eq!(run(&emitted, &[7]), Some(30));
        assert_eq!(run(&emitted, &[-1]), Some(30));
    }

    #[test]
    fn test_unused_call_result_is_popped() {
        let next = MethodRef::new_static(Token(0x0A00_0001), 0, SsaType::I32);
        let mut body = MethodBody::new("Tick", Vec::new(), SsaType::Void);
        let entry = body.entry();
        let mut b = body.builder(entry);
        b.call(next, &[]);
        b.ret(None);

        let emitted = compile(&mut body);
        assert_eq!(opcodes(&emitted), vec![Opcode::Call, Opcode::Pop, Opcode::Ret]);
        let calls = HashMap::from([(Token(0x0A00_0001), (0, 1))]);
        assert_eq!(replay_stack(&emitted, false, &calls), 1);
        assert_eq!(emitted.max_stack, 1);
    }

    #[test]
    fn test_unused_pure_tree_is_skipped() {
        let mut body = MethodBody::new("Idle", vec![SsaType::I32], SsaType::Void);
        let entry = body.entry();
        let mut b = body.builder(entry);
        let doubled = b.binary(BinaryOp::Add, Value::Arg(0), Value::Arg(0), SsaType::I32);
        b.binary(BinaryOp::Mul, doubled.into(), Value::i4(3), SsaType::I32);
        b.ret(None);

        let emitted = compile(&mut body);
        assert_eq!(opcodes(&emitted), vec![Opcode::Ret]);
        assert!(emitted.locals.is_empty());
    }

    fn try_catch(rethrow_caught: bool) -> MethodBody {
        // entry: guard catch(handler); call f(); leave exit
        // handler: leave exit | throw caught    exit: ret
        let f = MethodRef::new_static(Token(0x0A00_0002), 0, SsaType::Void);
        let mut body = MethodBody::new("Guarded", Vec::new(), SsaType::Void);
        let entry = body.entry();
        let handler = body.create_block();
        let exit = body.create_block();

        let mut b = body.builder(entry);
        let caught = b.guard(
            GuardKind::Catch(TypeRef::new(Token(0x0100_0005))),
            handler,
            None,
        );
        b.call(f, &[]);
        b.leave(exit);
        if rethrow_caught {
            body.builder(handler).throw(caught.into());
        } else {
            body.builder(handler).leave(exit);
        }
        body.builder(exit).ret(None);
        body
    }

    #[test]
    fn test_unused_exception_is_popped() {
        let mut body = try_catch(false);
        let emitted = compile(&mut body);

        use Opcode::*;
        assert_eq!(opcodes(&emitted), vec![Call, LeaveS, Pop, LeaveS, Ret]);
        let region = &emitted.regions[0];
        assert_eq!(region.flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!(region.catch_type, Some(TypeRef::new(Token(0x0100_0005))));
        assert_eq!((region.try_start, region.try_end), (0, 7));
        assert_eq!((region.handler_start, region.handler_end), (7, 10));

        let calls = HashMap::from([(Token(0x0A00_0002), (0, 0))]);
        assert_eq!(replay_stack(&emitted, false, &calls), 1);
    }

    #[test]
    fn test_caught_exception_is_stored() {
        let mut body = try_catch(true);
        let emitted = compile(&mut body);

        use Opcode::*;
        assert_eq!(
            opcodes(&emitted),
            vec![Call, LeaveS, Stloc0, Ldloc0, Throw, Ret]
        );
        assert_eq!(emitted.locals.len(), 1);
        let calls = HashMap::from([(Token(0x0A00_0002), (0, 0))]);
        assert!(replay_stack(&emitted, false, &calls) <= emitted.max_stack);
    }

    #[test]
    fn test_handler_input_keeps_its_local_across_try_body() {
        // entry: x = arg0 * 2; jump t1
        // t1: guard catch(handler); f(); jump t2
        // t2: y = g(); h(y); h(y); leave exit
        // handler: h(x); leave exit    exit: ret
        let f = MethodRef::new_static(Token(0x0A00_0001), 0, SsaType::Void);
        let g = MethodRef::new_static(Token(0x0A00_0002), 0, SsaType::I32);
        let h = MethodRef::new_static(Token(0x0A00_0003), 1, SsaType::Void);

        let mut body = MethodBody::new("Guarded", vec![SsaType::I32], SsaType::Void);
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

        let emitted = compile(&mut body);
        let stores: Vec<Opcode> = opcodes(&emitted)
            .into_iter()
            .filter(|op| matches!(op, Opcode::Stloc0 | Opcode::Stloc1))
            .collect();
        assert_eq!(stores, vec![Opcode::Stloc0, Opcode::Stloc1]);
        assert_eq!(emitted.locals.len(), 2);

        let calls = HashMap::from([
            (Token(0x0A00_0001), (0, 0)),
            (Token(0x0A00_0002), (0, 1)),
            (Token(0x0A00_0003), (1, 0)),
        ]);
        assert!(replay_stack(&emitted, false, &calls) <= emitted.max_stack);
    }
}
