//! SSA intermediate representation consumed by the code generator.
//!
//! The model is intentionally small: a [`MethodBody`] arena of blocks and instructions,
//! a closed [`InstKind`] sum type and the handful of graph mutations out-of-SSA
//! translation needs (`split_critical_edge`, `redirect_phis`, `remove_phi_arg`,
//! `retarget`, `remove_block`).
//!
//! # Block shape
//!
//! Every block is laid out as
//!
//! ```text
//! guard*  phi*  instruction*  terminator
//! ```
//!
//! Guards open protected regions whose try-body starts at the block. Phis select a value
//! by predecessor. The terminator is the only instruction with successors.
//!
//! # Example
//!
//! ```rust
//! use cilgen::ir::{CompareOp, MethodBody, SsaType, Value};
//!
//! // int Max(int a, int b) => a > b ? a : b;
//! let mut body = MethodBody::new("Max", vec![SsaType::I32, SsaType::I32], SsaType::I32);
//! let entry = body.entry();
//! let then_block = body.create_block();
//! let else_block = body.create_block();
//! let join = body.create_block();
//!
//! let mut b = body.builder(entry);
//! let cond = b.compare(CompareOp::Gt, Value::Arg(0), Value::Arg(1));
//! b.branch(cond.into(), then_block, else_block);
//! body.builder(then_block).jump(join);
//! body.builder(else_block).jump(join);
//!
//! let mut b = body.builder(join);
//! let max = b.phi(SsaType::I32, &[(then_block, Value::Arg(0)), (else_block, Value::Arg(1))]);
//! b.ret(Some(max.into()));
//!
//! assert_eq!(body.predecessors(join), vec![then_block, else_block]);
//! ```

mod builder;
mod method;
mod ops;
mod token;
mod types;
mod value;

pub use builder::Builder;
pub use method::{Instruction, MethodBody, Use, UseIndex};
pub use ops::{BinaryOp, CompareOp, GuardKind, InstKind, UnaryOp};
pub use token::Token;
pub use types::{FieldRef, MethodRef, SsaType, TypeRef};
pub use value::{BlockId, ConstValue, InstId, Value, VariableId};
