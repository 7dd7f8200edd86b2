//! Unified error types for the remold workspace
//!
//! This module provides the common error type [`CoreError`] shared by the
//! container, tree, and transformation layers. Domain-specific error types
//! convert to `CoreError` at API boundaries for uniform handling.
//!
//! # Example
//!
//! ```ignore
//! use remold_core::{CoreError, CoreResult};
//!
//! fn intern(pool: &mut Pool, v: f64) -> CoreResult<PoolIdx> {
//!     let idx = pool.get(v)?;
//!     Ok(idx)
//! }
//! ```

use thiserror::Error;

/// Unified error type for all remold operations.
///
/// Leaf primitives return early with the first failure; higher-level editors
/// stop the edit and leave the container consistent. There is no
/// exception-style unwinding: an error is a value carrying enough context to
/// format a useful message at the reporting boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An equation or variable index exceeds the container dimensions
    #[error("index {idx} is out of range (limit {limit})")]
    IndexOutOfRange { idx: usize, limit: usize },

    /// An argument is semantically wrong (e.g. conic variable to a non-conic setter)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A numeric value outside its admissible range (non-finite where forbidden)
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Bytecode containing an unknown or unsupported op
    #[error("invalid opcode: {0}")]
    InvalidOpCode(String),

    /// An otherwise-valid structure carries a field inconsistent with its type
    #[error("unexpected data: {0}")]
    UnExpectedData(String),

    /// Internal invariant violated (container matrix out of sync, dangling cells, ...)
    #[error("inconsistency: {0}")]
    Inconsistency(String),

    /// A lookup found more than one match
    #[error("duplicate value: {0}")]
    DuplicateValue(String),

    /// A lookup by name yielded nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// A reservation was insufficient
    #[error("size too small: {0}")]
    SizeTooSmall(String),

    /// Allocation failed
    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),

    /// Compression discovered a vacuous-yet-violated constraint
    #[error("model is infeasible: {0}")]
    ModelInfeasible(String),

    /// An operation was called on a container whose backend does not support it
    #[error("wrong model for function: {0}")]
    WrongModelForFunction(String),

    /// Catch-all for reportable conditions not otherwise classified
    #[error("{0}")]
    RuntimeError(String),

    /// Deliberately unsupported path
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

/// Convenience type alias for Results using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::RuntimeError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::RuntimeError(s)
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::RuntimeError(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Inconsistency("cell points at missing variable".into());
        assert!(err.to_string().contains("inconsistency"));
        assert!(err.to_string().contains("missing variable"));
    }

    #[test]
    fn test_out_of_range_display() {
        let err = CoreError::IndexOutOfRange { idx: 12, limit: 10 };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> CoreResult<()> {
            Err(CoreError::NotFound("opt".into()))
        }

        fn outer() -> CoreResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
