//! Solution representation returned by solver plugins.

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};
use crate::problem::ProblemBatch;

/// Outcome of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unbounded,
    IterationLimit,
    SolverError,
}

impl SolveStatus {
    /// True when the reported levels/multipliers are usable.
    pub fn has_solution(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

/// Solution batch for one solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionBatch {
    pub status: SolveStatus,
    pub objective_value: Option<f64>,

    pub var_level: Vec<f64>,
    pub var_multiplier: Vec<f64>,
    /// Basis tag: 0=unset, 1=lower, 2=upper, 3=basic, 4=superbasic, 5=fixed.
    pub var_basis: Vec<u8>,

    pub row_level: Vec<f64>,
    pub row_multiplier: Vec<f64>,
    pub row_basis: Vec<u8>,
}

impl SolutionBatch {
    /// Check the solution shape against the problem it answers.
    pub fn validate_against(&self, problem: &ProblemBatch) -> SolverResult<()> {
        let n = problem.n_vars();
        let m = problem.n_rows();

        if self.var_level.len() != n
            || self.var_multiplier.len() != n
            || self.var_basis.len() != n
        {
            return Err(SolverError::MalformedSolution(format!(
                "variable arrays do not match problem size {n}"
            )));
        }
        if self.row_level.len() != m
            || self.row_multiplier.len() != m
            || self.row_basis.len() != m
        {
            return Err(SolverError::MalformedSolution(format!(
                "row arrays do not match problem size {m}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_usability() {
        assert!(SolveStatus::Optimal.has_solution());
        assert!(SolveStatus::Feasible.has_solution());
        assert!(!SolveStatus::Infeasible.has_solution());
    }
}
