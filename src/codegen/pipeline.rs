//! Per-method and per-module compilation drivers.
//!
//! A method runs through
//!
//! ```text
//! forest -> interference -> coalescing/coloring -> layout -> emission -> sealing
//! ```
//!
//! with every stage owning fresh state, so methods of a module can be compiled on separate
//! worker threads without any synchronization. A failing method does not abort the module:
//! it is logged, reported in [`ModuleOutput::failed`] and skipped.

use rayon::prelude::*;

use crate::{
    analysis::{ExpressionForest, InterferenceGraph},
    assembly::EmittedBody,
    codegen::{BlockLayout, CodeGenerator, RegisterAllocator},
    config::CodegenConfig,
    ir::MethodBody,
    Error, Result,
};

/// A successfully compiled method.
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    /// Name of the method
    pub name: String,
    /// The sealed body
    pub body: EmittedBody,
}

/// Outcome of compiling a module.
#[derive(Debug, Default)]
pub struct ModuleOutput {
    /// Methods that compiled, in input order
    pub compiled: Vec<CompiledMethod>,
    /// Failures, each an [`Error::Method`] naming the method
    pub failed: Vec<Error>,
}

impl ModuleOutput {
    /// Returns true if every method compiled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Compiles a single method.
///
/// `body` is modified along the way (critical edges are split to hold phi copies).
///
/// # Errors
/// Returns [`Error::InvariantViolation`] if the IR breaks a structural contract and
/// [`Error::Unsupported`] if it contains a construct without a lowering.
///
/// # Example
///
/// ```rust
/// use cilgen::{compile_method, ir::{MethodBody, SsaType, Value}, CodegenConfig};
///
/// let mut body = MethodBody::new("Identity", vec![SsaType::I32], SsaType::I32);
/// let entry = body.entry();
/// body.builder(entry).ret(Some(Value::Arg(0)));
///
/// let emitted = compile_method(&mut body, &CodegenConfig::default())?;
/// assert_eq!(emitted.code_bytes()?, vec![0x02, 0x2A]); // ldarg.0; ret
/// # Ok::<(), cilgen::Error>(())
/// ```
pub fn compile_method(body: &mut MethodBody, config: &CodegenConfig) -> Result<EmittedBody> {
    let forest = ExpressionForest::build(body);
    let mut graph = InterferenceGraph::build(body, &forest);
    let mut allocator = RegisterAllocator::new(body, &mut graph, config)?;
    let layout = BlockLayout::compute(body)?;

    let emitted = CodeGenerator::new(body, &forest, &mut allocator, &layout).generate(config)?;

    log::debug!(
        "{}: {} blocks, {} locals, {} copies, {} bytes, max stack {}",
        body.name(),
        layout.order().len(),
        emitted.locals.len(),
        allocator.copy_count(),
        emitted.code_size,
        emitted.max_stack
    );
    Ok(emitted)
}

fn compile_one(mut body: MethodBody, config: &CodegenConfig) -> Result<CompiledMethod> {
    match compile_method(&mut body, config) {
        Ok(emitted) => Ok(CompiledMethod {
            name: body.name().to_string(),
            body: emitted,
        }),
        Err(error) => {
            log::warn!("skipping {}: {}", body.name(), error);
            Err(Error::Method {
                name: body.name().to_string(),
                source: Box::new(error),
            })
        }
    }
}

/// Compiles every method of a module, on the rayon pool if [`CodegenConfig::parallel`]
/// is set.
///
/// Failing methods are logged and collected in [`ModuleOutput::failed`]; the remaining
/// methods are still compiled.
#[must_use]
pub fn compile_module(methods: Vec<MethodBody>, config: &CodegenConfig) -> ModuleOutput {
    let results: Vec<Result<CompiledMethod>> = if config.parallel {
        methods
            .into_par_iter()
            .map(|body| compile_one(body, config))
            .collect()
    } else {
        methods
            .into_iter()
            .map(|body| compile_one(body, config))
            .collect()
    };

    let mut output = ModuleOutput::default();
    for result in results {
        match result {
            Ok(method) => output.compiled.push(method),
            Err(error) => output.failed.push(error),
        }
    }

    log::debug!(
        "module: {} methods compiled, {} failed",
        output.compiled.len(),
        output.failed.len()
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{SsaType, Value};

    fn identity(name: &str) -> MethodBody {
        let mut body = MethodBody::new(name, vec![SsaType::I32], SsaType::I32);
        let entry = body.entry();
        body.builder(entry).ret(Some(Value::Arg(0)));
        body
    }

    fn unsupported(name: &str) -> MethodBody {
        // There is no conversion to string
        let mut body = MethodBody::new(name, vec![SsaType::I32], SsaType::String);
        let entry = body.entry();
        let mut b = body.builder(entry);
        let converted = b.convert(Value::Arg(0), SsaType::String, false);
        b.ret(Some(converted.into()));
        body
    }

    #[test]
    fn test_module_skips_failing_methods() {
        for parallel in [false, true] {
            let config = CodegenConfig {
                parallel,
                ..CodegenConfig::default()
            };
            let methods = vec![identity("A"), unsupported("B"), identity("C")];
            let output = compile_module(methods, &config);

            let names: Vec<&str> = output.compiled.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["A", "C"]);
            assert_eq!(output.failed.len(), 1);
            assert!(!output.is_complete());
            match &output.failed[0] {
                Error::Method { name, source } => {
                    assert_eq!(name, "B");
                    assert!(!source.is_bug());
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn test_compile_identity() {
        let mut body = identity("Id");
        let emitted = compile_method(&mut body, &CodegenConfig::default()).unwrap();
        assert_eq!(emitted.code_size, 2);
        assert_eq!(emitted.max_stack, 1);
        assert!(emitted.locals.is_empty());
        assert!(!emitted.init_locals);
    }
}
