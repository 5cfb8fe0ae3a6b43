//! Handles into the method arena and the values instructions consume.

use std::fmt;

use crate::ir::Token;

/// Handle of a basic block inside a [`crate::ir::MethodBody`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a handle from a raw arena index
    #[must_use]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the arena index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Handle of an instruction inside a [`crate::ir::MethodBody`].
///
/// An instruction with a result doubles as the SSA definition of that result.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) usize);

impl InstId {
    /// Creates a handle from a raw arena index
    #[must_use]
    pub const fn new(index: usize) -> Self {
        InstId(index)
    }

    /// Returns the arena index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Handle of an address-exposed variable.
///
/// Variables are not in SSA form: they are read and written through explicit
/// load/store instructions and always get a dedicated local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) usize);

impl VariableId {
    /// Returns the arena index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// 32-bit integer (also used for bool, char and small integers)
    I4(i32),
    /// 64-bit integer
    I8(i64),
    /// 32-bit float
    R4(f32),
    /// 64-bit float
    R8(f64),
    /// The null reference
    Null,
    /// String literal, by user-string token
    String(Token),
}

impl ConstValue {
    /// Returns true for an integer zero or the null reference
    #[must_use]
    pub fn is_zero_or_null(&self) -> bool {
        matches!(self, ConstValue::I4(0) | ConstValue::I8(0) | ConstValue::Null)
    }
}

/// An operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Constant, materialized at every use
    Const(ConstValue),
    /// Method argument (including `this` at index 0 for instance methods)
    Arg(u16),
    /// Result of an instruction
    Inst(InstId),
}

impl Value {
    /// Returns the defining instruction, if this value is an instruction result
    #[must_use]
    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true for an integer zero or the null reference
    #[must_use]
    pub fn is_zero_or_null(&self) -> bool {
        matches!(self, Value::Const(c) if c.is_zero_or_null())
    }

    /// Shorthand for an `int32` constant
    #[must_use]
    pub fn i4(value: i32) -> Self {
        Value::Const(ConstValue::I4(value))
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(ConstValue::I4(v)) => write!(f, "{v}"),
            Value::Const(ConstValue::I8(v)) => write!(f, "{v}L"),
            Value::Const(ConstValue::R4(v)) => write!(f, "{v}f"),
            Value::Const(ConstValue::R8(v)) => write!(f, "{v}d"),
            Value::Const(ConstValue::Null) => write!(f, "null"),
            Value::Const(ConstValue::String(t)) => write!(f, "str({t})"),
            Value::Arg(i) => write!(f, "arg{i}"),
            Value::Inst(id) => write!(f, "{id}"),
        }
    }
}
