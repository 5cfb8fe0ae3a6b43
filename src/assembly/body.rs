//! The sealed output of the assembler.

use bitflags::bitflags;

use crate::{
    assembly::{ILInstruction, Immediate, Operand, OperandType},
    ir::{SsaType, TypeRef},
    Result,
};

bitflags! {
    /// Exception clause kind, encoded as in the method body's exception section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed catch clause.
        ///
        /// [`ExceptionRegion::catch_type`] names the exception type handled.
        const EXCEPTION = 0x0000;

        /// A filter clause; the filter block runs first and decides whether the
        /// handler runs.
        const FILTER = 0x0001;

        /// A finally clause, run on every exit from the try block.
        const FINALLY = 0x0002;

        /// A fault clause, run only when the try block exits with an exception.
        const FAULT = 0x0004;
    }
}

/// An exception clause with resolved byte offsets.
///
/// All ranges are half-open. For well-formed output the ranges satisfy
/// `try_start < try_end <= handler_start < handler_end`, and a filter ends exactly where
/// its handler starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Type caught by an [`ExceptionHandlerFlags::EXCEPTION`] clause
    pub catch_type: Option<TypeRef>,
    /// First byte of the protected block
    pub try_start: u32,
    /// End of the protected block
    pub try_end: u32,
    /// First byte of the handler
    pub handler_start: u32,
    /// End of the handler
    pub handler_end: u32,
    /// First byte of the filter block, for [`ExceptionHandlerFlags::FILTER`] clauses
    pub filter_start: Option<u32>,
}

impl ExceptionRegion {
    /// Length of the protected block in bytes
    #[must_use]
    pub fn try_length(&self) -> u32 {
        self.try_end - self.try_start
    }

    /// Length of the handler in bytes
    #[must_use]
    pub fn handler_length(&self) -> u32 {
        self.handler_end - self.handler_start
    }

    /// Returns true if the clause satisfies the ordering rules of a method body's
    /// exception section
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let ordered = self.try_start < self.try_end
            && self.try_end <= self.handler_start
            && self.handler_start < self.handler_end;
        let filter_ok = match self.filter_start {
            Some(start) => {
                self.flags.contains(ExceptionHandlerFlags::FILTER) && start < self.handler_start
            }
            None => !self.flags.contains(ExceptionHandlerFlags::FILTER),
        };
        ordered && filter_ok
    }
}

/// A fully assembled method body.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedBody {
    /// Instruction records with final offsets and resolved operands
    pub instructions: Vec<ILInstruction>,
    /// Declared maximum evaluation stack depth
    pub max_stack: u32,
    /// Local variable types, indexed by local slot
    pub locals: Vec<SsaType>,
    /// Whether locals are zero-initialized on entry
    pub init_locals: bool,
    /// Exception clauses, innermost first
    pub regions: Vec<ExceptionRegion>,
    /// Size of the code in bytes
    pub code_size: u32,
}

impl EmittedBody {
    /// Encodes the instruction stream.
    ///
    /// Branch operands are written as displacements relative to the end of the branch
    /// instruction; jump tables as a count followed by displacements relative to the end
    /// of the whole `switch`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if a record still carries a symbolic
    /// label, an operand that does not match its opcode, or a displacement that does not
    /// fit the branch form.
    pub fn code_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.code_size as usize);
        for instr in &self.instructions {
            if out.len() != instr.offset as usize {
                return Err(invariant_error!(
                    "instruction at IL_{:04x} encoded at byte {}",
                    instr.offset,
                    out.len()
                ));
            }

            let code = instr.opcode.info().code;
            if code > 0xFF {
                out.extend_from_slice(&code.to_be_bytes());
            } else {
                out.push(code as u8);
            }

            let end = i64::from(instr.end());
            match (&instr.operand, instr.opcode.info().operand) {
                (Operand::None, OperandType::None) => {}
                (Operand::Immediate(imm), _) => encode_immediate(&mut out, *imm),
                (Operand::Token(token), OperandType::Token) => {
                    out.extend_from_slice(&token.value().to_le_bytes());
                }
                (Operand::Target(target), OperandType::Int8) => {
                    let delta = i64::from(*target) - end;
                    let short = i8::try_from(delta).map_err(|_| {
                        invariant_error!(
                            "{} at IL_{:04x} cannot reach IL_{:04x}",
                            instr.opcode,
                            instr.offset,
                            target
                        )
                    })?;
                    out.extend_from_slice(&short.to_le_bytes());
                }
                (Operand::Target(target), OperandType::Int32) => {
                    let delta = i32::try_from(i64::from(*target) - end).map_err(|_| {
                        invariant_error!("branch displacement overflow at IL_{:04x}", instr.offset)
                    })?;
                    out.extend_from_slice(&delta.to_le_bytes());
                }
                (Operand::Switch(targets), OperandType::Switch) => {
                    out.extend_from_slice(&(targets.len() as u32).to_le_bytes());
                    for target in targets {
                        let delta = i32::try_from(i64::from(*target) - end).map_err(|_| {
                            invariant_error!(
                                "switch displacement overflow at IL_{:04x}",
                                instr.offset
                            )
                        })?;
                        out.extend_from_slice(&delta.to_le_bytes());
                    }
                }
                (operand, _) => {
                    return Err(invariant_error!(
                        "cannot encode {} with operand {:?}",
                        instr.opcode,
                        operand
                    ))
                }
            }
        }

        if out.len() != self.code_size as usize {
            return Err(invariant_error!(
                "encoded {} bytes, expected {}",
                out.len(),
                self.code_size
            ));
        }
        Ok(out)
    }
}

fn encode_immediate(out: &mut Vec<u8>, imm: Immediate) {
    match imm {
        Immediate::Int8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Immediate::UInt8(v) => out.push(v),
        Immediate::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Immediate::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Immediate::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Immediate::Float32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Immediate::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
}
