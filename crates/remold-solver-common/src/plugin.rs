//! Solver plugin contract.
//!
//! The presolve pipeline hands a [`ProblemBatch`] to a [`SolverPlugin`] and
//! blocks until it answers. Plugins are synchronous: any parallelism lives
//! inside the plugin, never in the calling container.

use tracing::debug;

use crate::error::{SolverError, SolverResult};
use crate::problem::ProblemBatch;
use crate::solution::{SolutionBatch, SolveStatus};

/// A numerical backend able to solve one problem batch.
pub trait SolverPlugin {
    /// Short identifier used in logs ("ipopt", "path", "echo", ...).
    fn name(&self) -> &str;

    /// Solve one batch. Implementations must validate the batch before
    /// trusting its arrays.
    fn solve(&mut self, problem: &ProblemBatch) -> SolverResult<SolutionBatch>;
}

/// Test double: reports the starting point back as the solution.
///
/// Useful for exercising the export/report-back plumbing without a real
/// solver. Variables with an unset level come back as their lower bound
/// (or 0 for free variables).
#[derive(Debug, Default)]
pub struct EchoLevelsSolver;

impl SolverPlugin for EchoLevelsSolver {
    fn name(&self) -> &str {
        "echo"
    }

    fn solve(&mut self, problem: &ProblemBatch) -> SolverResult<SolutionBatch> {
        problem.validate()?;
        debug!(
            name = %problem.name,
            n = problem.n_vars(),
            m = problem.n_rows(),
            "echo solver invoked"
        );

        let var_level: Vec<f64> = problem
            .var_level
            .iter()
            .zip(&problem.var_lb)
            .map(|(&lvl, &lb)| {
                if lvl.is_finite() {
                    lvl
                } else if lb.is_finite() {
                    lb
                } else {
                    0.0
                }
            })
            .collect();

        Ok(SolutionBatch {
            status: SolveStatus::Feasible,
            objective_value: None,
            var_multiplier: vec![0.0; problem.n_vars()],
            var_basis: vec![0; problem.n_vars()],
            row_level: vec![0.0; problem.n_rows()],
            row_multiplier: vec![0.0; problem.n_rows()],
            row_basis: vec![0; problem.n_rows()],
            var_level,
        })
    }
}

/// A plugin that always fails; used to test pipeline state restoration.
#[derive(Debug, Default)]
pub struct AlwaysFailSolver;

impl SolverPlugin for AlwaysFailSolver {
    fn name(&self) -> &str {
        "always-fail"
    }

    fn solve(&mut self, _problem: &ProblemBatch) -> SolverResult<SolutionBatch> {
        Err(SolverError::SolveFailed("always-fail plugin".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{ProblemSense, RowRelation, PROTOCOL_VERSION};

    #[test]
    fn test_echo_solver() {
        let problem = ProblemBatch {
            protocol_version: PROTOCOL_VERSION,
            name: "echo-test".into(),
            sense: ProblemSense::Feasibility,
            objective_row: None,
            var_lb: vec![1.0, f64::NEG_INFINITY],
            var_ub: vec![2.0, f64::INFINITY],
            var_level: vec![1.5, f64::NAN],
            var_multiplier: vec![f64::NAN; 2],
            var_type: vec![0, 0],
            row_relation: vec![RowRelation::Free],
            row_cst: vec![0.0],
            row_multiplier: vec![f64::NAN],
            lin_row: vec![0],
            lin_col: vec![0],
            lin_val: vec![1.0],
            nl_rows: vec![],
            pool: vec![f64::NAN],
        };

        let sol = EchoLevelsSolver.solve(&problem).unwrap();
        sol.validate_against(&problem).unwrap();
        assert_eq!(sol.var_level, vec![1.5, 0.0]);
        assert!(sol.status.has_solution());
    }
}
