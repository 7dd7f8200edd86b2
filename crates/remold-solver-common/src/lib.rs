//! # remold-solver-common: Solver Plugin Contract
//!
//! Plain-data problem/solution batches and the synchronous plugin trait
//! that the staged presolve pipeline drives. Keeping these types in their
//! own crate lets solver backends depend on the contract without pulling in
//! the container machinery.

pub mod error;
pub mod plugin;
pub mod problem;
pub mod solution;

pub use error::{SolverError, SolverResult};
pub use plugin::{AlwaysFailSolver, EchoLevelsSolver, SolverPlugin};
pub use problem::{NlRow, ProblemBatch, ProblemSense, RowRelation, PROTOCOL_VERSION};
pub use solution::{SolutionBatch, SolveStatus};
