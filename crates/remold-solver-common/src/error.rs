//! Error type for the solver boundary.

use thiserror::Error;

/// Errors raised while handing a problem to a solver plugin or while
/// interpreting its answer.
#[derive(Error, Debug)]
pub enum SolverError {
    /// The batch was produced by an incompatible protocol version
    #[error("protocol version mismatch: batch has {got}, expected {expected}")]
    ProtocolMismatch { got: i32, expected: i32 },

    /// The batch is structurally broken (length mismatches, bad indices)
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    /// The plugin reported a failure
    #[error("solver failed: {0}")]
    SolveFailed(String),

    /// The plugin returned a solution that does not match the problem
    #[error("malformed solution: {0}")]
    MalformedSolution(String),

    /// Generic wrapper for plugin-internal errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias for Results using SolverError.
pub type SolverResult<T> = Result<T, SolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SolverError::ProtocolMismatch { got: 2, expected: 1 };
        assert!(err.to_string().contains("protocol"));
    }
}
