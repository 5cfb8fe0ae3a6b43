//! Decoding of encoded method bodies back into instruction records.
//!
//! The decoder understands exactly the opcodes the assembler can produce. It is used to
//! check the encoder's output: branch displacements are turned back into absolute
//! [`Operand::Target`] / [`Operand::Switch`] offsets, so a decoded stream compares equal
//! to the records of the sealed [`crate::assembly::EmittedBody`] it was encoded from.
//!
//! # Example
//!
//! ```rust
//! use cilgen::assembly::{decode_stream, Opcode, Operand};
//!
//! // ldarg.0; brtrue.s +1; ret; ret
//! let records = decode_stream(&[0x02, 0x2D, 0x01, 0x2A, 0x2A])?;
//! assert_eq!(records[1].opcode, Opcode::BrtrueS);
//! assert_eq!(records[1].operand, Operand::Target(4));
//! # Ok::<(), cilgen::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use strum::IntoEnumIterator;

use crate::{
    assembly::{FlowType, ILInstruction, Immediate, Opcode, Operand, OperandType},
    ir::Token,
    Result,
};

fn opcode_table() -> &'static HashMap<u16, Opcode> {
    static TABLE: OnceLock<HashMap<u16, Opcode>> = OnceLock::new();
    TABLE.get_or_init(|| Opcode::iter().map(|op| (op.info().code, op)).collect())
}

struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, position: 0 }
    }

    fn has_more(&self) -> bool {
        self.position < self.data.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.position + N;
        let bytes = self.data.get(self.position..end).ok_or_else(|| {
            invariant_error!("truncated operand at byte {} of {}", self.position, self.data.len())
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.position = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }
}

fn branch_target(end: usize, displacement: i64) -> Result<u32> {
    u32::try_from(end as i64 + displacement)
        .map_err(|_| invariant_error!("branch at byte {} leaves the body", end))
}

/// Decodes a single instruction at the reader's position.
fn decode_instruction(reader: &mut Reader<'_>) -> Result<ILInstruction> {
    let offset = reader.position;
    let first = reader.read_u8()?;
    let code = if first == 0xFE {
        0xFE00 | u16::from(reader.read_u8()?)
    } else {
        u16::from(first)
    };
    let opcode = *opcode_table()
        .get(&code)
        .ok_or_else(|| invariant_error!("unknown opcode {:04X} at byte {}", code, offset))?;

    let info = opcode.info();
    let is_branch = matches!(
        info.flow,
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
    );
    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => {
            let value = i8::from_le_bytes(reader.take()?);
            if is_branch {
                Operand::Target(branch_target(reader.position, i64::from(value))?)
            } else {
                Operand::Immediate(Immediate::Int8(value))
            }
        }
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(reader.read_u8()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(u16::from_le_bytes(reader.take()?))),
        OperandType::Int32 => {
            let value = reader.read_i32()?;
            if is_branch {
                Operand::Target(branch_target(reader.position, i64::from(value))?)
            } else {
                Operand::Immediate(Immediate::Int32(value))
            }
        }
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(i64::from_le_bytes(reader.take()?))),
        OperandType::Float32 => {
            Operand::Immediate(Immediate::Float32(f32::from_le_bytes(reader.take()?)))
        }
        OperandType::Float64 => {
            Operand::Immediate(Immediate::Float64(f64::from_le_bytes(reader.take()?)))
        }
        OperandType::Token => Operand::Token(Token::new(reader.read_u32()?)),
        OperandType::Switch => {
            let count = reader.read_u32()? as usize;
            let mut displacements = Vec::with_capacity(count.min(reader.data.len() / 4));
            for _ in 0..count {
                displacements.push(reader.read_i32()?);
            }
            let end = reader.position;
            Operand::Switch(
                displacements
                    .into_iter()
                    .map(|d| branch_target(end, i64::from(d)))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };

    Ok(ILInstruction {
        opcode,
        offset: offset as u32,
        operand,
    })
}

/// Decodes a complete instruction stream.
///
/// # Errors
/// Returns [`crate::Error::InvariantViolation`] for unknown opcodes, truncated operands and
/// branches leading outside the addressable range.
pub fn decode_stream(code: &[u8]) -> Result<Vec<ILInstruction>> {
    let mut reader = Reader::new(code);
    let mut out = Vec::new();
    while reader.has_more() {
        out.push(decode_instruction(&mut reader)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_two_byte_and_token() {
        // ceq; call 0x0A000001; ret
        let code = [0xFE, 0x01, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        let records = decode_stream(&code).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].opcode, Opcode::Ceq);
        assert_eq!(records[1].offset, 2);
        assert_eq!(records[1].operand, Operand::Token(Token(0x0A00_0001)));
        assert_eq!(records[2].offset, 7);
    }

    #[test]
    fn test_decode_switch_targets() {
        // switch (2 cases: +0, -13); ret
        let mut code = vec![0x45];
        code.extend_from_slice(&2u32.to_le_bytes());
        code.extend_from_slice(&0i32.to_le_bytes());
        code.extend_from_slice(&(-13i32).to_le_bytes());
        code.push(0x2A);

        let records = decode_stream(&code).unwrap();
        assert_eq!(records[0].operand, Operand::Switch(vec![13, 0]));
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_stream(&[0xFE, 0xFF]).unwrap_err().is_bug());
        assert!(decode_stream(&[0x20, 0x01]).is_err());
        assert!(decode_stream(&[0x2B, 0x80]).is_err());
    }
}
