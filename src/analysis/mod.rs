//! Analyses the code generator consumes through narrow interfaces.
//!
//! The backend only ever talks to [`ForestClassifier`] and [`InterferenceProvider`]. The
//! implementations here ([`ExpressionForest`], [`InterferenceGraph`]) are the reference
//! ones used by [`crate::codegen::compile_method`]; any other implementation honoring the
//! trait contracts can be substituted.

mod forest;
mod interference;
pub mod liveness;

pub use forest::{ExpressionForest, ForestClassifier};
pub use interference::{InterferenceGraph, InterferenceProvider, NodeId};
pub use liveness::Liveness;
