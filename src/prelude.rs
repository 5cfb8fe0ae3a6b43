//! # cilgen Prelude
//!
//! Re-exports the types needed to build a method in SSA form and compile it.
//!
//! ```rust
//! use cilgen::prelude::*;
//!
//! let mut body = MethodBody::new("Nothing", Vec::new(), SsaType::Void);
//! let entry = body.entry();
//! body.builder(entry).ret(None);
//! let output = compile_module(vec![body], &CodegenConfig::default());
//! assert!(output.is_complete());
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilgen operations
pub use crate::Error;

/// The result type used throughout cilgen
pub use crate::Result;

/// Code generation settings
pub use crate::{BranchShortening, CodegenConfig};

// ================================================================================================
// IR
// ================================================================================================

pub use crate::ir::{
    BinaryOp, BlockId, CompareOp, ConstValue, FieldRef, GuardKind, InstId, InstKind, MethodBody,
    MethodRef, SsaType, Token, TypeRef, UnaryOp, Value, VariableId,
};

// ================================================================================================
// Compilation
// ================================================================================================

pub use crate::assembly::{EmittedBody, ExceptionHandlerFlags, ExceptionRegion, Opcode};
pub use crate::codegen::{compile_method, compile_module, CompiledMethod, ModuleOutput};
