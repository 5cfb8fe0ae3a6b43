use thiserror::Error;

/// Builds an [`Error::InvariantViolation`] carrying the source location of the check that
/// failed.
macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Builds an [`Error::Unsupported`] from a format string.
macro_rules! unsupported_error {
    ($($arg:tt)*) => {
        crate::Error::Unsupported(format!($($arg)*))
    };
}

/// The generic Error type, which covers every failure the code generator can report.
///
/// The backend never validates user input: the IR it receives was produced and checked by
/// upstream passes. Errors therefore fall into two groups which callers are expected to
/// treat differently:
///
/// - [`Error::InvariantViolation`] - the IR (or an internal data structure) broke a contract
///   the backend relies on. This is a bug somewhere in the pipeline.
/// - [`Error::Unsupported`] - the IR contains a construct the backend has no lowering for.
///   This is a missing feature rather than a bug.
///
/// [`Error::Method`] wraps either of them with the identity of the method being compiled,
/// which is how the module pipeline reports per-method failures.
///
/// # Examples
///
/// ```rust
/// use cilgen::Error;
///
/// fn describe(err: &Error) -> &'static str {
///     match err {
///         Error::InvariantViolation { .. } => "bug",
///         Error::Unsupported(_) => "missing feature",
///         Error::Method { source, .. } => describe(source),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An internal or IR invariant does not hold.
    ///
    /// Raised for unbound labels, phis referring to non-predecessors, inconsistent region
    /// nesting, stack underflow and similar conditions that upstream guarantees exclude.
    #[error("Invariant violated - {file}:{line}: {message}")]
    InvariantViolation {
        /// The message to be printed for the violated invariant
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The IR contains a construct that has no lowering.
    #[error("Unsupported construct - {0}")]
    Unsupported(String),

    /// Compilation of a specific method failed.
    #[error("Method '{name}' failed: {source}")]
    Method {
        /// Identity of the method that failed
        name: String,
        /// The underlying failure
        source: Box<Error>,
    },
}

impl Error {
    /// Returns `true` if this error (or the error it wraps) indicates a bug rather than a
    /// missing feature.
    #[must_use]
    pub fn is_bug(&self) -> bool {
        match self {
            Error::InvariantViolation { .. } => true,
            Error::Unsupported(_) => false,
            Error::Method { source, .. } => source.is_bug(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_macro_captures_location() {
        let err = invariant_error!("label {} never bound", 3);
        match &err {
            Error::InvariantViolation {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "label 3 never bound");
                assert!(file.ends_with("error.rs"));
                assert!(*line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_bug());
    }

    #[test]
    fn test_method_wrapping_keeps_category() {
        let err = Error::Method {
            name: "Foo::Bar".into(),
            source: Box::new(unsupported_error!("no lowering for {}", "localloc")),
        };
        assert!(!err.is_bug());
        assert_eq!(
            err.to_string(),
            "Method 'Foo::Bar' failed: Unsupported construct - no lowering for localloc"
        );
    }
}
