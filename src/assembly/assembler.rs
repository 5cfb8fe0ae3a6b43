//! Bytecode assembler.
//!
//! The [`Assembler`] accumulates instruction records for one method body while tracking
//! the evaluation stack depth, allocates local slots on demand and resolves symbolic
//! labels when the body is sealed.
//!
//! # Sealing
//!
//! Branches are always recorded in their long form. [`Assembler::seal`] then
//!
//! 1. lays the body out assuming every branch is long,
//! 2. walks the branches front to back and downgrades each one whose displacement fits a
//!    signed byte, propagating the size delta to everything after it,
//! 3. replaces labels with the final offsets and resolves the exception regions.
//!
//! Step 2 estimates forward targets with the offsets known at the time the branch is
//! visited. Since later branches can only shrink, a forward displacement never grows
//! afterwards and a downgraded branch stays valid. In
//! [`crate::BranchShortening::Fixpoint`] mode step 2 repeats until nothing shrinks,
//! catching branches that only fit after later ones shrank.
//!
//! # Example
//!
//! ```rust
//! use cilgen::{assembly::{Assembler, Opcode, VarSlot}, CodegenConfig};
//!
//! let mut asm = Assembler::new(true);
//! let positive = asm.define_label();
//! asm.emit_load(VarSlot::Arg(0))?;
//! asm.emit_branch(Opcode::Brtrue, positive)?;
//! asm.emit_ldc_i4(0)?;
//! asm.emit(Opcode::Ret, None)?;
//! asm.mark_label(positive)?;
//! asm.emit_ldc_i4(1)?;
//! asm.emit(Opcode::Ret, None)?;
//!
//! let body = asm.seal(&CodegenConfig::default())?;
//! assert_eq!(body.instructions[1].opcode, Opcode::BrtrueS);
//! assert_eq!(body.max_stack, 1);
//! # Ok::<(), cilgen::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        EmittedBody, ExceptionHandlerFlags, ExceptionRegion, FlowType, ILInstruction, Immediate,
        Label, Opcode, Operand, StackEffect,
    },
    config::CodegenConfig,
    ir::{ConstValue, FieldRef, MethodRef, SsaType, TypeRef, VariableId},
    Result,
};

/// An argument or local slot by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarSlot {
    /// Method argument
    Arg(u16),
    /// Local variable
    Local(u16),
}

/// What a field instruction does with the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// `ldfld` / `ldsfld`
    Load,
    /// `stfld` / `stsfld`
    Store,
    /// `ldflda` / `ldsflda`
    Address,
}

/// Identity of a local slot requested from the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKey {
    /// A register assigned by the allocator
    Register(usize),
    /// An address-exposed IR variable
    Variable(VariableId),
    /// Scratch slot used while sequentializing copies
    Scratch(SsaType),
}

/// Exception clause expressed with labels, resolved to offsets when sealing.
///
/// An end of `None` means "end of the method body".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLabels {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Caught type for typed clauses
    pub catch_type: Option<TypeRef>,
    /// Start of the protected block
    pub try_start: Label,
    /// End of the protected block
    pub try_end: Option<Label>,
    /// Start of the handler
    pub handler_start: Label,
    /// End of the handler
    pub handler_end: Option<Label>,
    /// Filter block range, for filter clauses
    pub filter: Option<(Label, Option<Label>)>,
}

/// Accumulates the instructions of one method body.
#[derive(Debug)]
pub struct Assembler {
    instructions: Vec<ILInstruction>,
    labels: Vec<Option<usize>>,
    has_labels: bool,
    depth: u32,
    max_depth: u32,
    returns_value: bool,
    locals: Vec<SsaType>,
    local_map: HashMap<SlotKey, u16>,
    regions: Vec<RegionLabels>,
}

impl Assembler {
    /// Creates an assembler for a body whose `ret` pops a value iff `returns_value`
    #[must_use]
    pub fn new(returns_value: bool) -> Self {
        Assembler {
            instructions: Vec::new(),
            labels: Vec::new(),
            has_labels: false,
            depth: 0,
            max_depth: 0,
            returns_value,
            locals: Vec::new(),
            local_map: HashMap::new(),
            regions: Vec::new(),
        }
    }

    /// Current evaluation stack depth
    #[must_use]
    pub fn stack_depth(&self) -> u32 {
        self.depth
    }

    /// Instructions emitted so far
    #[must_use]
    pub fn instructions(&self) -> &[ILInstruction] {
        &self.instructions
    }

    /// Local slot types allocated so far
    #[must_use]
    pub fn locals(&self) -> &[SsaType] {
        &self.locals
    }

    /// Overrides the stack depth, e.g. at a handler entry where the runtime pushes the
    /// exception object
    pub fn set_stack_depth(&mut self, depth: u32) {
        self.depth = depth;
        self.max_depth = self.max_depth.max(depth);
    }

    /// Creates a new unbound label
    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the position of the next emitted instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if the label is unknown or already
    /// bound.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let position = self.instructions.len();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => {
                *slot = Some(position);
                Ok(())
            }
            Some(Some(_)) => Err(invariant_error!("label {} bound twice", label)),
            None => Err(invariant_error!("label {} was never defined", label)),
        }
    }

    /// Local index for `key`, allocating a slot of type `ty` on first use.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] once the 65536 local indices of a
    /// method are exhausted.
    pub fn local(&mut self, key: SlotKey, ty: &SsaType) -> Result<u16> {
        if let Some(&index) = self.local_map.get(&key) {
            return Ok(index);
        }
        let index = u16::try_from(self.locals.len())
            .map_err(|_| invariant_error!("more than {} locals", u32::from(u16::MAX) + 1))?;
        self.locals.push(ty.clone());
        self.local_map.insert(key, index);
        Ok(index)
    }

    /// Scratch local of type `ty`, shared by all copy sequences of the body
    ///
    /// # Errors
    /// See [`Assembler::local`].
    pub fn scratch_local(&mut self, ty: &SsaType) -> Result<u16> {
        self.local(SlotKey::Scratch(ty.clone()), ty)
    }

    /// Registers an exception clause
    pub fn add_region(&mut self, region: RegionLabels) {
        self.regions.push(region);
    }

    fn pop(&mut self, count: u32, opcode: Opcode) -> Result<()> {
        if self.depth < count {
            return Err(invariant_error!(
                "stack underflow at {} (depth {}, pops {})",
                opcode,
                self.depth,
                count
            ));
        }
        self.depth -= count;
        Ok(())
    }

    fn push(&mut self, count: u32) {
        self.depth += count;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn append(&mut self, opcode: Opcode, operand: Operand, pops: u32, pushes: u32) -> Result<()> {
        self.pop(pops, opcode)?;
        self.push(pushes);
        if opcode.is_unconditional_exit() {
            self.depth = 0;
        }
        self.instructions.push(ILInstruction {
            opcode,
            offset: 0,
            operand,
        });
        Ok(())
    }

    /// Emits an opcode with a fixed stack effect.
    ///
    /// `ret` is accepted here and pops one value when the body returns a value.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] on stack underflow, for opcodes with a
    /// signature-dependent stack effect, or for label operands on non-branch opcodes.
    pub fn emit(&mut self, opcode: Opcode, operand: Option<Operand>) -> Result<()> {
        let operand = operand.unwrap_or(Operand::None);
        match &operand {
            Operand::Label(_) | Operand::Target(_) if !opcode.is_branch() => {
                return Err(invariant_error!("{} does not take a branch target", opcode));
            }
            Operand::Labels(_) | Operand::Switch(_) if opcode != Opcode::Switch => {
                return Err(invariant_error!("{} does not take a jump table", opcode));
            }
            _ => {}
        }
        if matches!(operand, Operand::Label(_) | Operand::Labels(_)) {
            self.has_labels = true;
        }

        let info = opcode.info();
        let pops = match (opcode, info.pops) {
            (Opcode::Ret, _) => u32::from(self.returns_value),
            (_, StackEffect::Fixed(n)) => u32::from(n),
            (_, StackEffect::Variable) => {
                return Err(invariant_error!(
                    "{} has a variable stack effect and needs emit_call",
                    opcode
                ))
            }
        };
        let StackEffect::Fixed(pushes) = info.pushes else {
            return Err(invariant_error!(
                "{} has a variable stack effect and needs emit_call",
                opcode
            ));
        };
        self.append(opcode, operand, pops, u32::from(pushes))
    }

    /// Emits a branch to `label`, always in long form (sealing shortens it).
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if `opcode` is not a single-target
    /// branch or the stack underflows.
    pub fn emit_branch(&mut self, opcode: Opcode, label: Label) -> Result<()> {
        if !opcode.is_branch() {
            return Err(invariant_error!("{} is not a branch", opcode));
        }
        let long = opcode.long_form().unwrap_or(opcode);
        self.emit(long, Some(Operand::Label(label)))
    }

    /// Emits a `switch` over `labels`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if the stack underflows.
    pub fn emit_switch(&mut self, labels: Vec<Label>) -> Result<()> {
        self.emit(Opcode::Switch, Some(Operand::Labels(labels)))
    }

    /// Emits `call`, `callvirt` or `newobj` for `method`.
    ///
    /// Calls pop every argument (plus the receiver of instance methods) and push a value
    /// iff the method returns one; `newobj` pops the constructor arguments and pushes the
    /// new object.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] for any other opcode or on stack
    /// underflow.
    pub fn emit_call(&mut self, opcode: Opcode, method: &MethodRef) -> Result<()> {
        let (pops, pushes) = match opcode {
            Opcode::Call | Opcode::Callvirt => (
                method.arg_count() as u32,
                u32::from(method.returns_value()),
            ),
            Opcode::Newobj => (u32::from(method.param_count), 1),
            _ => return Err(invariant_error!("{} is not a call", opcode)),
        };
        self.append(opcode, Operand::Token(method.token), pops, pushes)
    }

    /// Emits the field instruction for `access`, picking the static or instance form.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] on stack underflow.
    pub fn emit_field(&mut self, access: FieldAccess, field: &FieldRef) -> Result<()> {
        let opcode = match (access, field.is_static) {
            (FieldAccess::Load, false) => Opcode::Ldfld,
            (FieldAccess::Load, true) => Opcode::Ldsfld,
            (FieldAccess::Store, false) => Opcode::Stfld,
            (FieldAccess::Store, true) => Opcode::Stsfld,
            (FieldAccess::Address, false) => Opcode::Ldflda,
            (FieldAccess::Address, true) => Opcode::Ldsflda,
        };
        self.emit(opcode, Some(Operand::Token(field.token)))
    }

    /// Loads an argument or local using the most compact encoding.
    ///
    /// # Errors
    /// Never fails in practice; returns a `Result` for uniformity with [`Assembler::emit`].
    pub fn emit_load(&mut self, slot: VarSlot) -> Result<()> {
        match slot {
            VarSlot::Arg(index) => match index {
                0 => self.emit(Opcode::Ldarg0, None),
                1 => self.emit(Opcode::Ldarg1, None),
                2 => self.emit(Opcode::Ldarg2, None),
                3 => self.emit(Opcode::Ldarg3, None),
                _ => self.emit_indexed(Opcode::LdargS, Opcode::Ldarg, index),
            },
            VarSlot::Local(index) => match index {
                0 => self.emit(Opcode::Ldloc0, None),
                1 => self.emit(Opcode::Ldloc1, None),
                2 => self.emit(Opcode::Ldloc2, None),
                3 => self.emit(Opcode::Ldloc3, None),
                _ => self.emit_indexed(Opcode::LdlocS, Opcode::Ldloc, index),
            },
        }
    }

    /// Stores into an argument or local using the most compact encoding.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] on stack underflow.
    pub fn emit_store(&mut self, slot: VarSlot) -> Result<()> {
        match slot {
            VarSlot::Arg(index) => self.emit_indexed(Opcode::StargS, Opcode::Starg, index),
            VarSlot::Local(index) => match index {
                0 => self.emit(Opcode::Stloc0, None),
                1 => self.emit(Opcode::Stloc1, None),
                2 => self.emit(Opcode::Stloc2, None),
                3 => self.emit(Opcode::Stloc3, None),
                _ => self.emit_indexed(Opcode::StlocS, Opcode::Stloc, index),
            },
        }
    }

    /// Loads the address of an argument or local.
    ///
    /// # Errors
    /// Never fails in practice; returns a `Result` for uniformity with [`Assembler::emit`].
    pub fn emit_addr_of(&mut self, slot: VarSlot) -> Result<()> {
        match slot {
            VarSlot::Arg(index) => self.emit_indexed(Opcode::LdargaS, Opcode::Ldarga, index),
            VarSlot::Local(index) => self.emit_indexed(Opcode::LdlocaS, Opcode::Ldloca, index),
        }
    }

    fn emit_indexed(&mut self, short: Opcode, long: Opcode, index: u16) -> Result<()> {
        match u8::try_from(index) {
            Ok(byte) => self.emit(short, Some(Operand::Immediate(Immediate::UInt8(byte)))),
            Err(_) => self.emit(long, Some(Operand::Immediate(Immediate::UInt16(index)))),
        }
    }

    /// Pushes an `int32` constant using the most compact encoding.
    ///
    /// # Errors
    /// Never fails in practice; returns a `Result` for uniformity with [`Assembler::emit`].
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<()> {
        let opcode = match value {
            -1 => Opcode::LdcI4M1,
            0 => Opcode::LdcI4_0,
            1 => Opcode::LdcI4_1,
            2 => Opcode::LdcI4_2,
            3 => Opcode::LdcI4_3,
            4 => Opcode::LdcI4_4,
            5 => Opcode::LdcI4_5,
            6 => Opcode::LdcI4_6,
            7 => Opcode::LdcI4_7,
            8 => Opcode::LdcI4_8,
            _ => {
                return match i8::try_from(value) {
                    Ok(byte) => {
                        self.emit(Opcode::LdcI4S, Some(Operand::Immediate(Immediate::Int8(byte))))
                    }
                    Err(_) => {
                        self.emit(Opcode::LdcI4, Some(Operand::Immediate(Immediate::Int32(value))))
                    }
                }
            }
        };
        self.emit(opcode, None)
    }

    /// Pushes a constant.
    ///
    /// # Errors
    /// Never fails in practice; returns a `Result` for uniformity with [`Assembler::emit`].
    pub fn emit_const(&mut self, value: &ConstValue) -> Result<()> {
        match *value {
            ConstValue::I4(v) => self.emit_ldc_i4(v),
            ConstValue::I8(v) => self.emit(Opcode::LdcI8, Some(Operand::Immediate(Immediate::Int64(v)))),
            ConstValue::R4(v) => {
                self.emit(Opcode::LdcR4, Some(Operand::Immediate(Immediate::Float32(v))))
            }
            ConstValue::R8(v) => {
                self.emit(Opcode::LdcR8, Some(Operand::Immediate(Immediate::Float64(v))))
            }
            ConstValue::Null => self.emit(Opcode::Ldnull, None),
            ConstValue::String(token) => self.emit(Opcode::Ldstr, Some(Operand::Token(token))),
        }
    }

    fn label_position(&self, label: Label) -> Result<usize> {
        match self.labels.get(label.0) {
            Some(Some(position)) => Ok(*position),
            Some(None) => Err(invariant_error!("label {} was never bound", label)),
            None => Err(invariant_error!("label {} was never defined", label)),
        }
    }

    /// Offsets of every instruction plus the end of the body
    fn layout(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0u32;
        for instr in &self.instructions {
            offsets.push(offset);
            offset += instr.size();
        }
        offsets.push(offset);
        offsets
    }

    /// One greedy shortening pass; returns the number of branches downgraded
    fn shorten_pass(&mut self) -> Result<usize> {
        let offsets = self.layout();
        let mut new_offsets = Vec::with_capacity(offsets.len());
        let mut delta = 0u32;
        let mut shortened = 0;

        for i in 0..self.instructions.len() {
            let new_offset = offsets[i] - delta;
            new_offsets.push(new_offset);

            let instr = &self.instructions[i];
            let (Operand::Label(label), Some(short)) = (&instr.operand, instr.opcode.short_form())
            else {
                continue;
            };
            let target = self.label_position(*label)?;
            let long_size = instr.size();
            let short_size = short.opcode_size() + 1;
            let saved = long_size - short_size;

            let target_offset = if target <= i {
                new_offsets[target]
            } else {
                offsets[target] - delta - saved
            };
            let displacement = i64::from(target_offset) - i64::from(new_offset + short_size);
            if i8::try_from(displacement).is_ok() {
                self.instructions[i].opcode = short;
                delta += saved;
                shortened += 1;
            }
        }
        Ok(shortened)
    }

    /// Resolves labels, shortens branches and produces the final body.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] for unbound labels, short branches that
    /// cannot reach their target, or malformed exception regions.
    pub fn seal(mut self, config: &CodegenConfig) -> Result<EmittedBody> {
        if self.has_labels {
            for pass in 0..config.shortening_passes() {
                let shortened = self.shorten_pass()?;
                log::trace!("branch shortening pass {}: {} shortened", pass, shortened);
                if shortened == 0 {
                    break;
                }
            }
        }

        let offsets = self.layout();
        let code_size = offsets[self.instructions.len()];
        let resolve = |asm: &Assembler, label: Label| -> Result<u32> {
            Ok(offsets[asm.label_position(label)?])
        };

        let mut resolved = Vec::with_capacity(self.instructions.len());
        for (i, instr) in self.instructions.iter().enumerate() {
            let operand = match &instr.operand {
                Operand::Label(label) => Operand::Target(resolve(&self, *label)?),
                Operand::Labels(labels) => Operand::Switch(
                    labels
                        .iter()
                        .map(|l| resolve(&self, *l))
                        .collect::<Result<Vec<_>>>()?,
                ),
                other => other.clone(),
            };

            if let (Operand::Target(target), FlowType::ConditionalBranch
            | FlowType::UnconditionalBranch
            | FlowType::Leave) = (&operand, instr.opcode.info().flow)
            {
                if instr.opcode.long_form().is_some() {
                    let displacement = i64::from(*target) - i64::from(offsets[i + 1]);
                    if i8::try_from(displacement).is_err() {
                        return Err(invariant_error!(
                            "{} at IL_{:04x} cannot reach IL_{:04x}",
                            instr.opcode,
                            offsets[i],
                            target
                        ));
                    }
                }
            }

            resolved.push(ILInstruction {
                opcode: instr.opcode,
                offset: offsets[i],
                operand,
            });
        }

        let resolve_end = |asm: &Assembler, label: Option<Label>| -> Result<u32> {
            label.map_or(Ok(code_size), |l| resolve(asm, l))
        };
        let mut regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let handler_start = resolve(&self, region.handler_start)?;
            let filter_start = match region.filter {
                Some((start, end)) => {
                    let filter_end = resolve_end(&self, end)?;
                    if filter_end != handler_start {
                        return Err(invariant_error!(
                            "filter ends at IL_{:04x} but its handler starts at IL_{:04x}",
                            filter_end,
                            handler_start
                        ));
                    }
                    Some(resolve(&self, start)?)
                }
                None => None,
            };
            let emitted = ExceptionRegion {
                flags: region.flags,
                catch_type: region.catch_type,
                try_start: resolve(&self, region.try_start)?,
                try_end: resolve_end(&self, region.try_end)?,
                handler_start,
                handler_end: resolve_end(&self, region.handler_end)?,
                filter_start,
            };
            if !emitted.is_well_formed() {
                return Err(invariant_error!("malformed exception region {:?}", emitted));
            }
            regions.push(emitted);
        }
        // Nested clauses have to precede the clauses enclosing them
        regions.sort_by_key(|r| {
            let start = r.filter_start.unwrap_or(r.try_start).min(r.try_start);
            r.handler_end.max(r.try_end) - start
        });

        Ok(EmittedBody {
            instructions: resolved,
            max_stack: self.max_depth,
            init_locals: config.init_locals && !self.locals.is_empty(),
            locals: self.locals,
            regions,
            code_size,
        })
    }
}
