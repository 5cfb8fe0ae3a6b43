//! SSA to CIL code generation.
//!
//! # Architecture
//!
//! The backend is a straight pipeline of per-method stages:
//!
//! - [`RegisterAllocator`] translates out of SSA: phi arguments are coalesced with their
//!   phi when they do not interfere, otherwise a copy is scheduled at the end of the
//!   predecessor (splitting critical edges). The interference graph is then colored
//!   greedily into typed registers.
//! - [`BlockLayout`] orders the blocks for emission, keeping every protected region's try,
//!   filter and handler blocks contiguous and favoring fallthrough.
//! - [`CodeGenerator`] walks the layout, sequentializes the pending copies of each block
//!   with [`ParallelCopy`] and lowers instructions and terminators onto the
//!   [`crate::assembly::Assembler`].
//! - [`compile_method`] and [`compile_module`] tie the stages together.
//!
//! # Example
//!
//! ```rust
//! use cilgen::{
//!     codegen::compile_method,
//!     ir::{CompareOp, MethodBody, SsaType, Value},
//!     CodegenConfig,
//! };
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
//! let mut b = body.builder(join);
//! let max = b.phi(SsaType::I32, &[(then_block, Value::Arg(0)), (else_block, Value::Arg(1))]);
//! b.ret(Some(max.into()));
//!
//! let emitted = compile_method(&mut body, &CodegenConfig::default())?;
//! assert_eq!(emitted.locals, vec![SsaType::I32]);
//! assert!(emitted.regions.is_empty());
//! # Ok::<(), cilgen::Error>(())
//! ```

mod generator;
mod layout;
mod lowering;
mod parallel_copy;
mod pipeline;
mod regalloc;

pub use generator::CodeGenerator;
pub use layout::{BlockLayout, LayoutRegion};
pub use lowering::{
    binary_opcode, compare_branch_opcode, compare_value_opcodes, conv_opcodes, ldelem_opcode,
    ldind_opcode, stelem_opcode, stind_opcode,
};
pub use parallel_copy::ParallelCopy;
pub use pipeline::{compile_method, compile_module, CompiledMethod, ModuleOutput};
pub use regalloc::{Register, RegisterAllocator, RegisterId};
