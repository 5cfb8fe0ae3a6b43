//! Type information carried by SSA values and entity references.
//!
//! The code generator needs types for three things only: choosing typed opcodes
//! (`ldelem.i4`, `conv.r8`, ...), deciding which definitions may share a local slot, and
//! declaring the local signature of the emitted body. Entity references ([`TypeRef`],
//! [`MethodRef`], [`FieldRef`]) carry the token that ends up in the instruction operand
//! plus the bits of signature information the assembler needs for stack accounting.

use std::fmt;

use crate::ir::Token;

/// Reference to a type (`TypeDef`, `TypeRef` or `TypeSpec`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(pub Token);

impl TypeRef {
    /// Creates a new type reference
    #[must_use]
    pub fn new(token: Token) -> Self {
        TypeRef(token)
    }

    /// Returns the metadata token
    #[must_use]
    pub fn token(&self) -> Token {
        self.0
    }
}

/// Reference to a callable method with the signature details needed for stack accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Method token (`MethodDef`, `MemberRef` or `MethodSpec`)
    pub token: Token,
    /// Whether the method takes an implicit `this`
    pub has_this: bool,
    /// Number of explicit parameters, not counting `this`
    pub param_count: u16,
    /// Return type, [`SsaType::Void`] for methods without a result
    pub return_type: SsaType,
}

impl MethodRef {
    /// Creates a static method reference
    #[must_use]
    pub fn new_static(token: Token, param_count: u16, return_type: SsaType) -> Self {
        MethodRef {
            token,
            has_this: false,
            param_count,
            return_type,
        }
    }

    /// Creates an instance method reference
    #[must_use]
    pub fn new_instance(token: Token, param_count: u16, return_type: SsaType) -> Self {
        MethodRef {
            token,
            has_this: true,
            param_count,
            return_type,
        }
    }

    /// Number of stack values a `call` to this method consumes
    #[must_use]
    pub fn arg_count(&self) -> usize {
        usize::from(self.param_count) + usize::from(self.has_this)
    }

    /// Returns true if a call leaves a value on the stack
    #[must_use]
    pub fn returns_value(&self) -> bool {
        !matches!(self.return_type, SsaType::Void)
    }
}

/// Reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Field token (`Field` or `MemberRef`)
    pub token: Token,
    /// Whether the field is static
    pub is_static: bool,
    /// Declared field type
    pub field_type: SsaType,
}

impl FieldRef {
    /// Creates an instance field reference
    #[must_use]
    pub fn new_instance(token: Token, field_type: SsaType) -> Self {
        FieldRef {
            token,
            is_static: false,
            field_type,
        }
    }

    /// Creates a static field reference
    #[must_use]
    pub fn new_static(token: Token, field_type: SsaType) -> Self {
        FieldRef {
            token,
            is_static: true,
            field_type,
        }
    }
}

/// Static type of an SSA value.
///
/// The set mirrors the element types of ECMA-335 signatures that can appear as the type
/// of a local or of an evaluation stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SsaType {
    // ========== Primitives ==========
    /// No value (instruction without result, method returning void)
    #[default]
    Void,
    /// `System.Boolean`
    Bool,
    /// `System.SByte`
    I8,
    /// `System.Byte`
    U8,
    /// `System.Int16`
    I16,
    /// `System.UInt16`
    U16,
    /// `System.Int32`
    I32,
    /// `System.UInt32`
    U32,
    /// `System.Int64`
    I64,
    /// `System.UInt64`
    U64,
    /// `System.IntPtr`
    NativeInt,
    /// `System.UIntPtr`
    NativeUInt,
    /// `System.Single`
    F32,
    /// `System.Double`
    F64,
    /// `System.Char`
    Char,

    // ========== Reference Types ==========
    /// `System.Object`
    Object,
    /// `System.String`
    String,
    /// Any other class type
    Class(TypeRef),
    /// Any other value type
    ValueType(TypeRef),
    /// Single-dimensional, zero-based array
    Array(Box<SsaType>),

    // ========== Pointers ==========
    /// Unmanaged pointer
    Pointer(Box<SsaType>),
    /// Managed reference
    ByRef(Box<SsaType>),
}

impl SsaType {
    /// Returns true for `float32`/`float64`
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, SsaType::F32 | SsaType::F64)
    }

    /// Returns true for object references (classes, strings, arrays)
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            SsaType::Object | SsaType::String | SsaType::Class(_) | SsaType::Array(_)
        )
    }

    /// Returns true for unsigned integer types (including `bool` and `char`)
    #[must_use]
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            SsaType::Bool
                | SsaType::Char
                | SsaType::U8
                | SsaType::U16
                | SsaType::U32
                | SsaType::U64
                | SsaType::NativeUInt
        )
    }

    /// Returns true for types that occupy an `int64` stack slot
    #[must_use]
    pub fn is_int64(&self) -> bool {
        matches!(self, SsaType::I64 | SsaType::U64)
    }

    /// Returns the element type for arrays
    #[must_use]
    pub fn element_type(&self) -> Option<&SsaType> {
        match self {
            SsaType::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Returns the pointee type for pointers and managed references
    #[must_use]
    pub fn pointee_type(&self) -> Option<&SsaType> {
        match self {
            SsaType::Pointer(inner) | SsaType::ByRef(inner) => Some(inner),
            _ => None,
        }
    }

    /// Returns true if a value of this type may be stored in a location of type `target`
    /// without conversion.
    ///
    /// This is the conservative subset of verifier assignability the allocator relies on:
    /// identity, any reference type to `object`, arrays covariantly and small integers of
    /// the same width and signedness-insensitive representation.
    #[must_use]
    pub fn is_assignable_to(&self, target: &SsaType) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (src, SsaType::Object) => src.is_reference(),
            (SsaType::Array(src), SsaType::Array(dst)) => {
                src.is_reference() && src.is_assignable_to(dst)
            }
            (SsaType::Bool, SsaType::I8 | SsaType::U8)
            | (SsaType::I8, SsaType::U8)
            | (SsaType::U8, SsaType::I8)
            | (SsaType::Char, SsaType::I16 | SsaType::U16)
            | (SsaType::I16, SsaType::U16)
            | (SsaType::U16, SsaType::I16)
            | (SsaType::I32, SsaType::U32)
            | (SsaType::U32, SsaType::I32)
            | (SsaType::I64, SsaType::U64)
            | (SsaType::U64, SsaType::I64)
            | (SsaType::NativeInt, SsaType::NativeUInt)
            | (SsaType::NativeUInt, SsaType::NativeInt) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SsaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsaType::Void => write!(f, "void"),
            SsaType::Bool => write!(f, "bool"),
            SsaType::I8 => write!(f, "int8"),
            SsaType::U8 => write!(f, "uint8"),
            SsaType::I16 => write!(f, "int16"),
            SsaType::U16 => write!(f, "uint16"),
            SsaType::I32 => write!(f, "int32"),
            SsaType::U32 => write!(f, "uint32"),
            SsaType::I64 => write!(f, "int64"),
            SsaType::U64 => write!(f, "uint64"),
            SsaType::NativeInt => write!(f, "native int"),
            SsaType::NativeUInt => write!(f, "native uint"),
            SsaType::F32 => write!(f, "float32"),
            SsaType::F64 => write!(f, "float64"),
            SsaType::Char => write!(f, "char"),
            SsaType::Object => write!(f, "object"),
            SsaType::String => write!(f, "string"),
            SsaType::Class(t) => write!(f, "class {}", t.0),
            SsaType::ValueType(t) => write!(f, "valuetype {}", t.0),
            SsaType::Array(elem) => write!(f, "{elem}[]"),
            SsaType::Pointer(inner) => write!(f, "{inner}*"),
            SsaType::ByRef(inner) => write!(f, "{inner}&"),
        }
    }
}
