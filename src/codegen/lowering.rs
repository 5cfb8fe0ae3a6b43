//! Per-instruction lowering table.
//!
//! Every value-producing or effectful [`InstKind`] maps to a short opcode sequence that
//! consumes its operands from the evaluation stack in operand order. The typed families
//! (`conv.*`, `ldelem.*`, `stelem.*`, `ldind.*`, `stind.*`) pick the most specific opcode
//! for the type, and fall back to the token forms (`ldelem T`, `ldobj T`, ...) for value
//! types.

use crate::{
    assembly::{FieldAccess, Opcode, Operand, VarSlot},
    codegen::CodeGenerator,
    ir::{BinaryOp, CompareOp, InstId, InstKind, SsaType, Token, UnaryOp},
    Result,
};

/// Opcode for a two-operand arithmetic or bitwise operation
#[must_use]
pub fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::DivUn => Opcode::DivUn,
        BinaryOp::Rem => Opcode::Rem,
        BinaryOp::RemUn => Opcode::RemUn,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
        BinaryOp::Xor => Opcode::Xor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::ShrUn => Opcode::ShrUn,
        BinaryOp::AddOvf => Opcode::AddOvf,
        BinaryOp::AddOvfUn => Opcode::AddOvfUn,
        BinaryOp::SubOvf => Opcode::SubOvf,
        BinaryOp::SubOvfUn => Opcode::SubOvfUn,
        BinaryOp::MulOvf => Opcode::MulOvf,
        BinaryOp::MulOvfUn => Opcode::MulOvfUn,
    }
}

/// Long-form compare-and-branch opcode taken when `op` holds
#[must_use]
pub fn compare_branch_opcode(op: CompareOp) -> Opcode {
    match op {
        CompareOp::Eq => Opcode::Beq,
        CompareOp::Ne => Opcode::BneUn,
        CompareOp::Lt => Opcode::Blt,
        CompareOp::Le => Opcode::Ble,
        CompareOp::Gt => Opcode::Bgt,
        CompareOp::Ge => Opcode::Bge,
        CompareOp::LtUn => Opcode::BltUn,
        CompareOp::LeUn => Opcode::BleUn,
        CompareOp::GtUn => Opcode::BgtUn,
        CompareOp::GeUn => Opcode::BgeUn,
    }
}

/// Opcodes computing `op` as a 0/1 value.
///
/// Only `ceq`, `cgt` and `clt` (plus their `.un` forms) exist; the other predicates
/// compute their negation and compare it against zero.
#[must_use]
pub fn compare_value_opcodes(op: CompareOp, is_float: bool) -> Vec<Opcode> {
    let direct = |op: CompareOp| match op {
        CompareOp::Eq => Some(Opcode::Ceq),
        CompareOp::Lt => Some(Opcode::Clt),
        CompareOp::Gt => Some(Opcode::Cgt),
        CompareOp::LtUn => Some(Opcode::CltUn),
        CompareOp::GtUn => Some(Opcode::CgtUn),
        _ => None,
    };
    match direct(op) {
        Some(opcode) => vec![opcode],
        None => {
            // negate() of Ne/Le/Ge/LeUn/GeUn always lands on a direct predicate
            let negated = direct(op.negate(is_float)).unwrap_or(Opcode::Ceq);
            vec![negated, Opcode::LdcI4_0, Opcode::Ceq]
        }
    }
}

/// Opcodes converting the stack top to `target`.
///
/// # Errors
/// Returns [`crate::Error::Unsupported`] for non-numeric targets.
pub fn conv_opcodes(target: &SsaType, checked: bool, source_unsigned: bool) -> Result<Vec<Opcode>> {
    let opcode = match (target, checked, source_unsigned) {
        (SsaType::F32, _, true) => return Ok(vec![Opcode::ConvRUn, Opcode::ConvR4]),
        (SsaType::F64, _, true) => return Ok(vec![Opcode::ConvRUn, Opcode::ConvR8]),
        (SsaType::F32, _, false) => Opcode::ConvR4,
        (SsaType::F64, _, false) => Opcode::ConvR8,

        (SsaType::I8, false, _) => Opcode::ConvI1,
        (SsaType::I16, false, _) => Opcode::ConvI2,
        (SsaType::I32, false, _) => Opcode::ConvI4,
        (SsaType::I64, false, _) => Opcode::ConvI8,
        (SsaType::U8 | SsaType::Bool, false, _) => Opcode::ConvU1,
        (SsaType::U16 | SsaType::Char, false, _) => Opcode::ConvU2,
        (SsaType::U32, false, _) => Opcode::ConvU4,
        (SsaType::U64, false, _) => Opcode::ConvU8,
        (SsaType::NativeInt, false, _) => Opcode::ConvI,
        (SsaType::NativeUInt, false, _) => Opcode::ConvU,

        (SsaType::I8, true, false) => Opcode::ConvOvfI1,
        (SsaType::I16, true, false) => Opcode::ConvOvfI2,
        (SsaType::I32, true, false) => Opcode::ConvOvfI4,
        (SsaType::I64, true, false) => Opcode::ConvOvfI8,
        (SsaType::U8 | SsaType::Bool, true, false) => Opcode::ConvOvfU1,
        (SsaType::U16 | SsaType::Char, true, false) => Opcode::ConvOvfU2,
        (SsaType::U32, true, false) => Opcode::ConvOvfU4,
        (SsaType::U64, true, false) => Opcode::ConvOvfU8,
        (SsaType::NativeInt, true, false) => Opcode::ConvOvfI,
        (SsaType::NativeUInt, true, false) => Opcode::ConvOvfU,

        (SsaType::I8, true, true) => Opcode::ConvOvfI1Un,
        (SsaType::I16, true, true) => Opcode::ConvOvfI2Un,
        (SsaType::I32, true, true) => Opcode::ConvOvfI4Un,
        (SsaType::I64, true, true) => Opcode::ConvOvfI8Un,
        (SsaType::U8 | SsaType::Bool, true, true) => Opcode::ConvOvfU1Un,
        (SsaType::U16 | SsaType::Char, true, true) => Opcode::ConvOvfU2Un,
        (SsaType::U32, true, true) => Opcode::ConvOvfU4Un,
        (SsaType::U64, true, true) => Opcode::ConvOvfU8Un,
        (SsaType::NativeInt, true, true) => Opcode::ConvOvfIUn,
        (SsaType::NativeUInt, true, true) => Opcode::ConvOvfUUn,

        (other, _, _) => return Err(unsupported_error!("conversion to {}", other)),
    };
    Ok(vec![opcode])
}

fn value_type_token(ty: &SsaType, what: &str) -> Result<Token> {
    match ty {
        SsaType::ValueType(t) | SsaType::Class(t) => Ok(t.token()),
        other => Err(unsupported_error!("{} of {} needs a type token", what, other)),
    }
}

/// `ldelem.*` for `elem`, or `ldelem T` for value types
///
/// # Errors
/// Returns [`crate::Error::Unsupported`] for element types with neither form.
pub fn ldelem_opcode(elem: &SsaType) -> Result<(Opcode, Option<Token>)> {
    let opcode = match elem {
        SsaType::I8 => Opcode::LdelemI1,
        SsaType::U8 | SsaType::Bool => Opcode::LdelemU1,
        SsaType::I16 => Opcode::LdelemI2,
        SsaType::U16 | SsaType::Char => Opcode::LdelemU2,
        SsaType::I32 => Opcode::LdelemI4,
        SsaType::U32 => Opcode::LdelemU4,
        SsaType::I64 | SsaType::U64 => Opcode::LdelemI8,
        SsaType::NativeInt | SsaType::NativeUInt => Opcode::LdelemI,
        SsaType::F32 => Opcode::LdelemR4,
        SsaType::F64 => Opcode::LdelemR8,
        ty if ty.is_reference() => Opcode::LdelemRef,
        other => return Ok((Opcode::Ldelem, Some(value_type_token(other, "ldelem")?))),
    };
    Ok((opcode, None))
}

/// `stelem.*` for `elem`, or `stelem T` for value types
///
/// # Errors
/// Returns [`crate::Error::Unsupported`] for element types with neither form.
pub fn stelem_opcode(elem: &SsaType) -> Result<(Opcode, Option<Token>)> {
    let opcode = match elem {
        SsaType::I8 | SsaType::U8 | SsaType::Bool => Opcode::StelemI1,
        SsaType::I16 | SsaType::U16 | SsaType::Char => Opcode::StelemI2,
        SsaType::I32 | SsaType::U32 => Opcode::StelemI4,
        SsaType::I64 | SsaType::U64 => Opcode::StelemI8,
        SsaType::NativeInt | SsaType::NativeUInt => Opcode::StelemI,
        SsaType::F32 => Opcode::StelemR4,
        SsaType::F64 => Opcode::StelemR8,
        ty if ty.is_reference() => Opcode::StelemRef,
        other => return Ok((Opcode::Stelem, Some(value_type_token(other, "stelem")?))),
    };
    Ok((opcode, None))
}

/// `ldind.*` for `ty`, or `ldobj T` for value types
///
/// # Errors
/// Returns [`crate::Error::Unsupported`] for types with neither form.
pub fn ldind_opcode(ty: &SsaType) -> Result<(Opcode, Option<Token>)> {
    let opcode = match ty {
        SsaType::I8 => Opcode::LdindI1,
        SsaType::U8 | SsaType::Bool => Opcode::LdindU1,
        SsaType::I16 => Opcode::LdindI2,
        SsaType::U16 | SsaType::Char => Opcode::LdindU2,
        SsaType::I32 => Opcode::LdindI4,
        SsaType::U32 => Opcode::LdindU4,
        SsaType::I64 | SsaType::U64 => Opcode::LdindI8,
        SsaType::NativeInt | SsaType::NativeUInt | SsaType::Pointer(_) => Opcode::LdindI,
        SsaType::F32 => Opcode::LdindR4,
        SsaType::F64 => Opcode::LdindR8,
        ty if ty.is_reference() => Opcode::LdindRef,
        other => return Ok((Opcode::Ldobj, Some(value_type_token(other, "ldind")?))),
    };
    Ok((opcode, None))
}

/// `stind.*` for `ty`, or `stobj T` for value types
///
/// # Errors
/// Returns [`crate::Error::Unsupported`] for types with neither form.
pub fn stind_opcode(ty: &SsaType) -> Result<(Opcode, Option<Token>)> {
    let opcode = match ty {
        SsaType::I8 | SsaType::U8 | SsaType::Bool => Opcode::StindI1,
        SsaType::I16 | SsaType::U16 | SsaType::Char => Opcode::StindI2,
        SsaType::I32 | SsaType::U32 => Opcode::StindI4,
        SsaType::I64 | SsaType::U64 => Opcode::StindI8,
        SsaType::NativeInt | SsaType::NativeUInt | SsaType::Pointer(_) => Opcode::StindI,
        SsaType::F32 => Opcode::StindR4,
        SsaType::F64 => Opcode::StindR8,
        ty if ty.is_reference() => Opcode::StindRef,
        other => return Ok((Opcode::Stobj, Some(value_type_token(other, "stind")?))),
    };
    Ok((opcode, None))
}

impl CodeGenerator<'_> {
    fn emit_typed(&mut self, (opcode, token): (Opcode, Option<Token>)) -> Result<()> {
        self.asm.emit(opcode, token.map(Operand::Token))
    }

    /// Lowers a non-terminator instruction: pushes its operands, then emits its opcodes.
    pub(super) fn lower(&mut self, id: InstId) -> Result<()> {
        let body = self.body;
        let inst = body.inst(id);
        if inst.kind().is_phi() || inst.kind().is_guard() || inst.kind().is_terminator() {
            return Err(invariant_error!(
                "{} ({}) cannot be lowered as an expression",
                id,
                inst.kind().name()
            ));
        }

        for operand in inst.operands() {
            self.emit_value(operand)?;
        }

        match inst.kind() {
            InstKind::Binary(op) => self.asm.emit(binary_opcode(*op), None),
            InstKind::Unary(UnaryOp::Neg) => self.asm.emit(Opcode::Neg, None),
            InstKind::Unary(UnaryOp::Not) => self.asm.emit(Opcode::Not, None),
            InstKind::Compare(op) => {
                let is_float = inst
                    .operands()
                    .first()
                    .is_some_and(|left| body.value_type(left).is_float());
                for opcode in compare_value_opcodes(*op, is_float) {
                    self.asm.emit(opcode, None)?;
                }
                Ok(())
            }
            InstKind::Convert {
                to,
                checked,
                source_unsigned,
            } => {
                for opcode in conv_opcodes(to, *checked, *source_unsigned)? {
                    self.asm.emit(opcode, None)?;
                }
                Ok(())
            }
            InstKind::Call { method, is_virtual } => {
                let opcode = if *is_virtual {
                    Opcode::Callvirt
                } else {
                    Opcode::Call
                };
                self.asm.emit_call(opcode, method)
            }
            InstKind::NewObj { ctor } => self.asm.emit_call(Opcode::Newobj, ctor),
            InstKind::LoadField(field) => self.asm.emit_field(FieldAccess::Load, field),
            InstKind::StoreField(field) => self.asm.emit_field(FieldAccess::Store, field),
            InstKind::FieldAddr(field) => self.asm.emit_field(FieldAccess::Address, field),
            InstKind::NewArray(elem) => {
                self.asm.emit(Opcode::Newarr, Some(Operand::Token(elem.token())))
            }
            InstKind::ArrayLength => {
                self.asm.emit(Opcode::Ldlen, None)?;
                self.asm.emit(Opcode::ConvI4, None)
            }
            InstKind::LoadElement(elem) => self.emit_typed(ldelem_opcode(elem)?),
            InstKind::StoreElement(elem) => self.emit_typed(stelem_opcode(elem)?),
            InstKind::ElementAddr(elem) => {
                let token = value_type_token(elem, "ldelema")?;
                self.asm.emit(Opcode::Ldelema, Some(Operand::Token(token)))
            }
            InstKind::Box(ty) => self.asm.emit(Opcode::Box, Some(Operand::Token(ty.token()))),
            InstKind::UnboxAny(ty) => {
                self.asm.emit(Opcode::UnboxAny, Some(Operand::Token(ty.token())))
            }
            InstKind::CastClass(ty) => {
                self.asm.emit(Opcode::Castclass, Some(Operand::Token(ty.token())))
            }
            InstKind::IsInst(ty) => {
                self.asm.emit(Opcode::Isinst, Some(Operand::Token(ty.token())))
            }
            InstKind::LoadVar(var) => {
                let slot = self.variable_slot(*var)?;
                self.asm.emit_load(VarSlot::Local(slot))
            }
            InstKind::StoreVar(var) => {
                let slot = self.variable_slot(*var)?;
                self.asm.emit_store(VarSlot::Local(slot))
            }
            InstKind::VarAddr(var) => {
                let slot = self.variable_slot(*var)?;
                self.asm.emit_addr_of(VarSlot::Local(slot))
            }
            InstKind::ArgAddr(index) => {
                self.asm.emit_addr_of(VarSlot::Arg(*index))
            }
            InstKind::LoadIndirect(ty) => self.emit_typed(ldind_opcode(ty)?),
            InstKind::StoreIndirect(ty) => self.emit_typed(stind_opcode(ty)?),
            other => Err(unsupported_error!("no lowering for {}", other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TypeRef;

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_value_opcodes(CompareOp::Lt, false), vec![Opcode::Clt]);
        assert_eq!(
            compare_value_opcodes(CompareOp::Ne, false),
            vec![Opcode::Ceq, Opcode::LdcI4_0, Opcode::Ceq]
        );
        // a <= b is !(a > b) for integers, !(a >un b) for floats
        assert_eq!(
            compare_value_opcodes(CompareOp::Le, false),
            vec![Opcode::Cgt, Opcode::LdcI4_0, Opcode::Ceq]
        );
        assert_eq!(
            compare_value_opcodes(CompareOp::Le, true),
            vec![Opcode::CgtUn, Opcode::LdcI4_0, Opcode::Ceq]
        );
        assert_eq!(
            compare_value_opcodes(CompareOp::GeUn, false),
            vec![Opcode::CltUn, Opcode::LdcI4_0, Opcode::Ceq]
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(conv_opcodes(&SsaType::I32, false, false).unwrap(), vec![Opcode::ConvI4]);
        assert_eq!(
            conv_opcodes(&SsaType::U8, true, true).unwrap(),
            vec![Opcode::ConvOvfU1Un]
        );
        assert_eq!(
            conv_opcodes(&SsaType::F64, false, true).unwrap(),
            vec![Opcode::ConvRUn, Opcode::ConvR8]
        );
        assert!(conv_opcodes(&SsaType::String, false, false).is_err());
    }

    #[test]
    fn test_element_access_fallbacks() {
        assert_eq!(ldelem_opcode(&SsaType::U32).unwrap(), (Opcode::LdelemU4, None));
        assert_eq!(ldelem_opcode(&SsaType::String).unwrap(), (Opcode::LdelemRef, None));

        let point = TypeRef(Token(0x0200_0005));
        assert_eq!(
            stelem_opcode(&SsaType::ValueType(point)).unwrap(),
            (Opcode::Stelem, Some(point.token()))
        );
        assert_eq!(
            ldind_opcode(&SsaType::ValueType(point)).unwrap(),
            (Opcode::Ldobj, Some(point.token()))
        );
        assert_eq!(stind_opcode(&SsaType::Char).unwrap(), (Opcode::StindI2, None));

        let pointer = SsaType::ByRef(Box::new(SsaType::I32));
        assert!(ldelem_opcode(&pointer).unwrap_err().to_string().contains("type token"));
    }

    #[test]
    fn test_branch_opcodes_are_long_forms() {
        for op in [CompareOp::Eq, CompareOp::Ne, CompareOp::LtUn, CompareOp::Ge] {
            let opcode = compare_branch_opcode(op);
            assert!(opcode.short_form().is_some(), "{opcode}");
        }
    }
}
