//! Bytecode instruction records produced by the assembler.
//!
//! Records start out with symbolic [`Operand::Label`] / [`Operand::Labels`] operands while a
//! body is being emitted; sealing replaces them with absolute [`Operand::Target`] /
//! [`Operand::Switch`] offsets. The encoder in [`crate::assembly::EmittedBody::code_bytes`]
//! converts those back to relative displacements.

use std::fmt;

use crate::{assembly::Opcode, ir::Token};

/// Inline operand encoding of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate or short branch displacement
    Int8,
    /// Unsigned 8-bit index
    UInt8,
    /// Unsigned 16-bit index
    UInt16,
    /// Signed 32-bit immediate or long branch displacement
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Metadata token
    Token,
    /// Jump table: `u32` count followed by that many `i32` displacements
    Switch,
}

impl OperandType {
    /// Encoded size in bytes; jump tables depend on their length and report only the
    /// count field
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::UInt8 => 1,
            OperandType::UInt16 => 2,
            OperandType::Int32 | OperandType::Float32 | OperandType::Token | OperandType::Switch => 4,
            OperandType::Int64 | OperandType::Float64 => 8,
        }
    }
}

/// How an opcode affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Calls and falls through
    Call,
    /// Returns from the method
    Return,
    /// Multi-way branch
    Switch,
    /// Raises an exception
    Throw,
    /// Ends a finally, fault or filter block
    EndFinally,
    /// Exits a protected region
    Leave,
}

/// Immediate operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed byte
    Int8(i8),
    /// Unsigned byte
    UInt8(u8),
    /// Unsigned short
    UInt16(u16),
    /// Signed int
    Int32(i32),
    /// Signed long
    Int64(i64),
    /// Single precision float
    Float32(f32),
    /// Double precision float
    Float64(f64),
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(v) => write!(f, "{v}"),
            Immediate::UInt8(v) => write!(f, "{v}"),
            Immediate::UInt16(v) => write!(f, "{v}"),
            Immediate::Int32(v) => write!(f, "{v}"),
            Immediate::Int64(v) => write!(f, "{v}"),
            Immediate::Float32(v) => write!(f, "{v}"),
            Immediate::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// A symbolic branch target, bound to a position by [`crate::assembly::Assembler::mark_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) usize);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Operand of an instruction record.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Inline immediate, including local/argument indices
    Immediate(Immediate),
    /// Metadata token
    Token(Token),
    /// Unresolved branch target
    Label(Label),
    /// Unresolved jump table
    Labels(Vec<Label>),
    /// Resolved branch target, as an absolute offset into the body
    Target(u32),
    /// Resolved jump table, as absolute offsets into the body
    Switch(Vec<u32>),
}

/// One emitted bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ILInstruction {
    /// The opcode
    pub opcode: Opcode,
    /// Byte offset from the start of the body; only meaningful after sealing
    pub offset: u32,
    /// The operand
    pub operand: Operand,
}

impl ILInstruction {
    /// Encoded size of this instruction in bytes
    #[must_use]
    pub fn size(&self) -> u32 {
        let operand = match &self.operand {
            Operand::Labels(labels) => 4 + 4 * labels.len() as u32,
            Operand::Switch(targets) => 4 + 4 * targets.len() as u32,
            _ => self.opcode.info().operand.size(),
        };
        self.opcode.opcode_size() + operand
    }

    /// Offset of the next instruction
    #[must_use]
    pub fn end(&self) -> u32 {
        self.offset + self.size()
    }
}

impl fmt::Display for ILInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(imm) => write!(f, " {imm}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::Label(label) => write!(f, " {label}"),
            Operand::Target(target) => write!(f, " IL_{target:04x}"),
            Operand::Labels(labels) => {
                let names: Vec<String> = labels.iter().map(ToString::to_string).collect();
                write!(f, " ({})", names.join(", "))
            }
            Operand::Switch(targets) => {
                let names: Vec<String> = targets.iter().map(|t| format!("IL_{t:04x}")).collect();
                write!(f, " ({})", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let ldc = ILInstruction {
            opcode: Opcode::LdcI4S,
            offset: 0,
            operand: Operand::Immediate(Immediate::Int8(42)),
        };
        assert_eq!(ldc.size(), 2);

        let ceq = ILInstruction {
            opcode: Opcode::Ceq,
            offset: 2,
            operand: Operand::None,
        };
        assert_eq!(ceq.size(), 2);
        assert_eq!(ceq.end(), 4);

        let switch = ILInstruction {
            opcode: Opcode::Switch,
            offset: 0,
            operand: Operand::Switch(vec![10, 20, 30]),
        };
        assert_eq!(switch.size(), 1 + 4 + 12);
    }

    #[test]
    fn test_display() {
        let br = ILInstruction {
            opcode: Opcode::BrS,
            offset: 0x10,
            operand: Operand::Target(0x20),
        };
        assert_eq!(br.to_string(), "IL_0010: br.s IL_0020");
    }
}
