//! Configuration for the code generator.
//!
//! All knobs have defaults that produce verifiable, reasonably compact bytecode. The
//! configuration is read-only during compilation and shared between worker threads when a
//! module is compiled in parallel.

/// How the assembler shrinks long-form branches to their short form while sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchShortening {
    /// One greedy forward pass over all branches.
    ///
    /// Forward targets are estimated conservatively, so a branch that would only fit after
    /// a later branch shrinks stays long.
    SinglePass,
    /// Repeat the greedy pass until no more branches shrink (bounded by
    /// [`CodegenConfig::max_shortening_passes`]).
    #[default]
    Fixpoint,
}

/// Configuration for a code generation run.
///
/// # Example
///
/// ```rust
/// use cilgen::{BranchShortening, CodegenConfig};
///
/// let config = CodegenConfig {
///     branch_shortening: BranchShortening::SinglePass,
///     parallel: false,
///     ..CodegenConfig::default()
/// };
/// assert!(config.init_locals);
/// ```
#[derive(Debug, Clone)]
pub struct CodegenConfig {
    /// Branch shortening strategy used when sealing a method body (default: `Fixpoint`).
    pub branch_shortening: BranchShortening,

    /// Upper bound on shortening passes in `Fixpoint` mode (default: 100).
    pub max_shortening_passes: usize,

    /// Whether the emitted body requests zero-initialized locals (default: true).
    ///
    /// Only takes effect when the body declares at least one local.
    pub init_locals: bool,

    /// Merge split edge blocks carrying identical copy sets into one block (default: true).
    pub merge_duplicate_edges: bool,

    /// Minimum number of identical split edge blocks before they are merged (default: 3).
    pub duplicate_edge_threshold: usize,

    /// Compile the methods of a module on the rayon thread pool (default: true).
    pub parallel: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            branch_shortening: BranchShortening::default(),
            max_shortening_passes: 100,
            init_locals: true,
            merge_duplicate_edges: true,
            duplicate_edge_threshold: 3,
            parallel: true,
        }
    }
}

impl CodegenConfig {
    /// Number of shortening passes the assembler is allowed to run.
    #[must_use]
    pub fn shortening_passes(&self) -> usize {
        match self.branch_shortening {
            BranchShortening::SinglePass => 1,
            BranchShortening::Fixpoint => self.max_shortening_passes.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CodegenConfig::default();
        assert_eq!(config.branch_shortening, BranchShortening::Fixpoint);
        assert_eq!(config.duplicate_edge_threshold, 3);
        assert_eq!(config.shortening_passes(), 100);
    }

    #[test]
    fn test_single_pass_limits_passes() {
        let config = CodegenConfig {
            branch_shortening: BranchShortening::SinglePass,
            ..CodegenConfig::default()
        };
        assert_eq!(config.shortening_passes(), 1);
    }
}
