//! CIL bytecode assembly.
//!
//! This module turns a sequence of emission calls into a sealed [`EmittedBody`]:
//!
//! - [`Opcode`] is the table of opcodes the backend can produce, with encodings, operand
//!   types and stack effects,
//! - [`Assembler`] records instructions, tracks the evaluation stack, allocates locals and
//!   resolves labels with branch shortening,
//! - [`EmittedBody`] is the result, which can be encoded with [`EmittedBody::code_bytes`]
//!   and read back with [`decode_stream`].

mod assembler;
mod body;
mod decoder;
mod instruction;
mod opcodes;

pub use assembler::{Assembler, FieldAccess, RegionLabels, SlotKey, VarSlot};
pub use body::{EmittedBody, ExceptionHandlerFlags, ExceptionRegion};
pub use decoder::decode_stream;
pub use instruction::{FlowType, ILInstruction, Immediate, Label, Operand, OperandType};
pub use opcodes::{Opcode, OpcodeInfo, StackEffect};
