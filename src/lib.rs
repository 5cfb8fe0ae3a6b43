// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # cilgen
//!
//! Code generation backend lowering methods in SSA form to ECMA-335 CIL method bodies.
//!
//! Given a [`ir::MethodBody`] (basic blocks, phi nodes, region guards and a closed set of
//! instruction kinds), `cilgen` produces an [`assembly::EmittedBody`]: instruction records
//! with resolved branch offsets, the local signature, the maximum evaluation stack depth
//! and the exception clause table, ready for a module writer to serialize.
//!
//! ## Features
//!
//! - **Out-of-SSA translation** - phi coalescing over an interference graph, critical edge
//!   splitting and parallel copy sequentialization with at most one temporary
//! - **Register coloring** - greedy coloring into typed local slots
//! - **Region-aware block layout** - contiguous try/filter/handler ranges, fallthrough
//!   preferred
//! - **Compact encoding** - short opcode forms and fixpoint branch shortening
//! - **Parallel module compilation** - methods are independent and run on rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use cilgen::prelude::*;
//!
//! // static int Twice(int x) => x + x;
//! let mut body = MethodBody::new("Twice", vec![SsaType::I32], SsaType::I32);
//! let entry = body.entry();
//! let mut b = body.builder(entry);
//! let sum = b.binary(BinaryOp::Add, Value::Arg(0), Value::Arg(0), SsaType::I32);
//! b.ret(Some(sum.into()));
//!
//! let emitted = compile_method(&mut body, &CodegenConfig::default())?;
//! // ldarg.0; ldarg.0; add; ret
//! assert_eq!(emitted.code_bytes()?, vec![0x02, 0x02, 0x58, 0x2A]);
//! assert_eq!(emitted.max_stack, 2);
//! # Ok::<(), cilgen::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! The backend does not validate its input. Every failure is either an
//! [`Error::InvariantViolation`] (the IR broke a structural contract, which is a bug in an
//! upstream pass) or an [`Error::Unsupported`] construct without a lowering.
//! [`compile_module`] reports per-method failures as [`Error::Method`] and keeps going.
//!
//! ## Logging
//!
//! `cilgen` logs through the [`log`] facade: per-method statistics at `debug`, allocator
//! decisions at `trace` and skipped methods at `warn`.

#[macro_use]
pub(crate) mod error;

mod config;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types
pub mod prelude;

/// SSA intermediate representation consumed by the backend
pub mod ir;

/// Analyses the backend consumes: expression forest, liveness and interference
pub mod analysis;

/// CIL opcode table, assembler and body encoding
///
/// # Examples
///
/// ```rust
/// use cilgen::{assembly::{Assembler, Opcode}, CodegenConfig};
///
/// let mut asm = Assembler::new(false);
/// asm.emit(Opcode::Ret, None)?;
/// let body = asm.seal(&CodegenConfig::default())?;
/// assert_eq!(body.code_bytes()?, vec![0x2A]);
/// # Ok::<(), cilgen::Error>(())
/// ```
pub mod assembly;

/// Block layout, register allocation, emission and the compilation pipeline
pub mod codegen;

/// Shared utilities
pub mod utils;

/// `cilgen` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilgen` Error type
pub use error::Error;

pub use codegen::{compile_method, compile_module, ModuleOutput};
pub use config::{BranchShortening, CodegenConfig};
