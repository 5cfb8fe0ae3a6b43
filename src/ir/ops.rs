//! Instruction kinds.
//!
//! [`InstKind`] is a closed sum type: every operation the backend can lower is one
//! variant, and the lowering table in [`crate::codegen`] matches on it exhaustively. The
//! operands themselves live in the instruction's operand list; each variant documents the
//! operand layout it expects.

use std::fmt;

use strum::{EnumIter, IntoStaticStr};

use crate::ir::{BlockId, FieldRef, MethodRef, SsaType, TypeRef, VariableId};

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `div`
    Div,
    /// `div.un`
    DivUn,
    /// `rem`
    Rem,
    /// `rem.un`
    RemUn,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `shl`
    Shl,
    /// `shr`
    Shr,
    /// `shr.un`
    ShrUn,
    /// `add.ovf`
    AddOvf,
    /// `add.ovf.un`
    AddOvfUn,
    /// `sub.ovf`
    SubOvf,
    /// `sub.ovf.un`
    SubOvfUn,
    /// `mul.ovf`
    MulOvf,
    /// `mul.ovf.un`
    MulOvfUn,
}

/// One-operand arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Two's complement negation
    Neg,
    /// Bitwise complement
    Not,
}

/// Comparison predicates.
///
/// The `Un` variants compare unsigned for integers and unordered for floats, which is the
/// meaning the `.un` suffix has on CIL comparison and branch opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=` (true when unordered)
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<` unsigned / unordered
    LtUn,
    /// `<=` unsigned / unordered
    LeUn,
    /// `>` unsigned / unordered
    GtUn,
    /// `>=` unsigned / unordered
    GeUn,
}

impl CompareOp {
    /// Returns the predicate that is true exactly when `self` is false.
    ///
    /// For floats the ordered and unordered variants trade places, since `!(a < b)` holds
    /// for NaN operands.
    #[must_use]
    pub fn negate(self, is_float: bool) -> CompareOp {
        use CompareOp::*;
        match (self, is_float) {
            (Eq, _) => Ne,
            (Ne, _) => Eq,
            (Lt, false) => Ge,
            (Le, false) => Gt,
            (Gt, false) => Le,
            (Ge, false) => Lt,
            (LtUn, false) => GeUn,
            (LeUn, false) => GtUn,
            (GtUn, false) => LeUn,
            (GeUn, false) => LtUn,
            (Lt, true) => GeUn,
            (Le, true) => GtUn,
            (Gt, true) => LeUn,
            (Ge, true) => LtUn,
            (LtUn, true) => Ge,
            (LeUn, true) => Gt,
            (GtUn, true) => Le,
            (GeUn, true) => Lt,
        }
    }

    /// Returns the predicate with its operands swapped (`a < b` becomes `b > a`).
    #[must_use]
    pub fn swap(self) -> CompareOp {
        use CompareOp::*;
        match self {
            Eq => Eq,
            Ne => Ne,
            Lt => Gt,
            Le => Ge,
            Gt => Lt,
            Ge => Le,
            LtUn => GtUn,
            LeUn => GeUn,
            GtUn => LtUn,
            GeUn => LeUn,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::LtUn => "lt.un",
            CompareOp::LeUn => "le.un",
            CompareOp::GtUn => "gt.un",
            CompareOp::GeUn => "ge.un",
        };
        f.write_str(s)
    }
}

/// Kind of protected region a guard opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// Typed catch clause
    Catch(TypeRef),
    /// Filtered catch clause; the guard names the filter entry block
    Filter,
    /// `finally` clause
    Finally,
    /// `fault` clause
    Fault,
}

impl GuardKind {
    /// Returns true if the handler (and filter) entry receives the exception object on the
    /// evaluation stack
    #[must_use]
    pub fn pushes_exception(&self) -> bool {
        matches!(self, GuardKind::Catch(_) | GuardKind::Filter)
    }
}

/// The operation an instruction performs.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    // ========== Arithmetic ==========
    /// `[left, right]`
    Binary(BinaryOp),
    /// `[operand]`
    Unary(UnaryOp),
    /// `[left, right]`, result is `bool`
    Compare(CompareOp),
    /// `[operand]`, result type is `to`
    Convert {
        /// Target type
        to: SsaType,
        /// Overflow checked conversion
        checked: bool,
        /// Treat the source as unsigned
        source_unsigned: bool,
    },

    // ========== Calls and objects ==========
    /// `[this?, args...]`
    Call {
        /// Callee
        method: MethodRef,
        /// Dispatch through the vtable (`callvirt`)
        is_virtual: bool,
    },
    /// `[args...]`, result is the new object
    NewObj {
        /// Constructor
        ctor: MethodRef,
    },
    /// `[object]`, or `[]` for static fields
    LoadField(FieldRef),
    /// `[object, value]`, or `[value]` for static fields
    StoreField(FieldRef),
    /// `[object]`, or `[]` for static fields
    FieldAddr(FieldRef),
    /// `[length]`
    NewArray(TypeRef),
    /// `[array]`, result is `int32`
    ArrayLength,
    /// `[array, index]`
    LoadElement(SsaType),
    /// `[array, index, value]`
    StoreElement(SsaType),
    /// `[array, index]`
    ElementAddr(SsaType),
    /// `[value]`
    Box(TypeRef),
    /// `[object]`
    UnboxAny(TypeRef),
    /// `[object]`
    CastClass(TypeRef),
    /// `[object]`
    IsInst(TypeRef),

    // ========== Variables and memory ==========
    /// `[]`
    LoadVar(VariableId),
    /// `[value]`
    StoreVar(VariableId),
    /// `[]`
    VarAddr(VariableId),
    /// `[]`, address of an argument
    ArgAddr(u16),
    /// `[address]`
    LoadIndirect(SsaType),
    /// `[address, value]`
    StoreIndirect(SsaType),

    // ========== SSA headers ==========
    /// Operands are parallel to `preds`
    Phi {
        /// Incoming predecessor of each operand
        preds: Vec<BlockId>,
    },
    /// `[]`, opens a protected region starting at the owning block. For catch and filter
    /// clauses the result is the caught exception object.
    Guard {
        /// Clause kind
        kind: GuardKind,
        /// Handler entry block
        handler: BlockId,
        /// Filter entry block, present for [`GuardKind::Filter`]
        filter: Option<BlockId>,
    },

    // ========== Terminators ==========
    /// `[]`
    Jump(BlockId),
    /// `[condition]`
    Branch {
        /// Taken when the condition is non-zero
        then_block: BlockId,
        /// Taken when the condition is zero
        else_block: BlockId,
    },
    /// `[index]`
    Switch {
        /// Case targets indexed by value
        targets: Vec<BlockId>,
        /// Target for out-of-range values
        default: BlockId,
    },
    /// `[]` or `[value]`
    Return,
    /// `[exception]`
    Throw,
    /// `[]`, only inside catch handlers
    Rethrow,
    /// `[]`, exits protected regions towards the target
    Leave(BlockId),
    /// `[]`, ends a finally or fault handler
    EndFinally,
    /// `[result]`, ends a filter
    EndFilter,
}

impl InstKind {
    /// Returns true for block terminators
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Jump(_)
                | InstKind::Branch { .. }
                | InstKind::Switch { .. }
                | InstKind::Return
                | InstKind::Throw
                | InstKind::Rethrow
                | InstKind::Leave(_)
                | InstKind::EndFinally
                | InstKind::EndFilter
        )
    }

    /// Returns true for phi nodes
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Returns true for region guards
    #[must_use]
    pub fn is_guard(&self) -> bool {
        matches!(self, InstKind::Guard { .. })
    }

    /// Returns true for terminators whose successors lie outside the current region
    #[must_use]
    pub fn exits_region(&self) -> bool {
        matches!(self, InstKind::Leave(_) | InstKind::EndFinally)
    }

    /// Control-flow successors of a terminator, in operand order and without duplicates
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out: Vec<BlockId> = Vec::new();
        let mut push = |b: BlockId| {
            if !out.contains(&b) {
                out.push(b);
            }
        };
        match self {
            InstKind::Jump(target) | InstKind::Leave(target) => push(*target),
            InstKind::Branch {
                then_block,
                else_block,
            } => {
                push(*then_block);
                push(*else_block);
            }
            InstKind::Switch { targets, default } => {
                for t in targets {
                    push(*t);
                }
                push(*default);
            }
            _ => {}
        }
        out
    }

    /// Replaces every occurrence of `old` as a branch target with `new`.
    ///
    /// Returns true if anything changed.
    pub fn retarget(&mut self, old: BlockId, new: BlockId) -> bool {
        let mut changed = false;
        let mut swap = |b: &mut BlockId| {
            if *b == old {
                *b = new;
                changed = true;
            }
        };
        match self {
            InstKind::Jump(target) | InstKind::Leave(target) => swap(target),
            InstKind::Branch {
                then_block,
                else_block,
            } => {
                swap(then_block);
                swap(else_block);
            }
            InstKind::Switch { targets, default } => {
                for t in targets.iter_mut() {
                    swap(t);
                }
                swap(default);
            }
            _ => {}
        }
        changed
    }

    /// Returns true if executing the instruction is observable beyond its result
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            InstKind::Call { .. }
                | InstKind::NewObj { .. }
                | InstKind::NewArray(_)
                | InstKind::StoreField(_)
                | InstKind::StoreElement(_)
                | InstKind::StoreVar(_)
                | InstKind::StoreIndirect(_)
        ) || self.is_terminator()
    }

    /// Returns true if the result depends on mutable memory
    #[must_use]
    pub fn reads_memory(&self) -> bool {
        matches!(
            self,
            InstKind::LoadField(_)
                | InstKind::LoadElement(_)
                | InstKind::LoadVar(_)
                | InstKind::LoadIndirect(_)
        )
    }

    /// Short mnemonic used when printing the IR
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InstKind::Binary(op) => op.into(),
            InstKind::Unary(UnaryOp::Neg) => "neg",
            InstKind::Unary(UnaryOp::Not) => "not",
            InstKind::Compare(_) => "cmp",
            InstKind::Convert { .. } => "conv",
            InstKind::Call { is_virtual: true, .. } => "callvirt",
            InstKind::Call { .. } => "call",
            InstKind::NewObj { .. } => "newobj",
            InstKind::LoadField(_) => "ldfld",
            InstKind::StoreField(_) => "stfld",
            InstKind::FieldAddr(_) => "ldflda",
            InstKind::NewArray(_) => "newarr",
            InstKind::ArrayLength => "ldlen",
            InstKind::LoadElement(_) => "ldelem",
            InstKind::StoreElement(_) => "stelem",
            InstKind::ElementAddr(_) => "ldelema",
            InstKind::Box(_) => "box",
            InstKind::UnboxAny(_) => "unbox.any",
            InstKind::CastClass(_) => "castclass",
            InstKind::IsInst(_) => "isinst",
            InstKind::LoadVar(_) => "ldvar",
            InstKind::StoreVar(_) => "stvar",
            InstKind::VarAddr(_) => "varaddr",
            InstKind::ArgAddr(_) => "argaddr",
            InstKind::LoadIndirect(_) => "ldind",
            InstKind::StoreIndirect(_) => "stind",
            InstKind::Phi { .. } => "phi",
            InstKind::Guard { .. } => "guard",
            InstKind::Jump(_) => "goto",
            InstKind::Branch { .. } => "br",
            InstKind::Switch { .. } => "switch",
            InstKind::Return => "ret",
            InstKind::Throw => "throw",
            InstKind::Rethrow => "rethrow",
            InstKind::Leave(_) => "leave",
            InstKind::EndFinally => "endfinally",
            InstKind::EndFilter => "endfilter",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_negate_is_involution() {
        for op in CompareOp::iter() {
            assert_eq!(op.negate(false).negate(false), op);
            assert_eq!(op.negate(true).negate(true), op);
            assert_eq!(op.swap().swap(), op);
        }
    }

    #[test]
    fn test_float_negation_switches_ordering() {
        assert_eq!(CompareOp::Lt.negate(false), CompareOp::Ge);
        assert_eq!(CompareOp::Lt.negate(true), CompareOp::GeUn);
        assert_eq!(CompareOp::GtUn.negate(true), CompareOp::Le);
    }

    #[test]
    fn test_successors_deduplicated() {
        let b0 = BlockId::new(0);
        let b1 = BlockId::new(1);
        let kind = InstKind::Switch {
            targets: vec![b0, b1, b0],
            default: b1,
        };
        assert_eq!(kind.successors(), vec![b0, b1]);
    }

    #[test]
    fn test_retarget() {
        let b0 = BlockId::new(0);
        let b1 = BlockId::new(1);
        let b2 = BlockId::new(2);
        let mut kind = InstKind::Branch {
            then_block: b0,
            else_block: b1,
        };
        assert!(kind.retarget(b1, b2));
        assert_eq!(kind.successors(), vec![b0, b2]);
        assert!(!kind.retarget(b1, b2));
    }

    #[test]
    fn test_binary_names() {
        assert_eq!(InstKind::Binary(BinaryOp::ShrUn).name(), "shr_un");
        assert!(InstKind::Return.is_terminator());
        assert!(InstKind::Leave(BlockId::new(3)).exits_region());
    }
}
