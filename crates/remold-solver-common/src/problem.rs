//! Problem representation handed to solver plugins.
//!
//! A [`ProblemBatch`] is the flattened image of one exported container:
//! variables as parallel arrays, equations with their cones and constants,
//! the linear part as triplets, and the nonlinear part as per-equation
//! opcode streams referencing the shipped pool image. It is plain data so a
//! plugin can live in another crate, another process, or another language.

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: i32 = 1;

/// Type of optimization problem a batch describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemSense {
    /// Minimize the objective equation
    Min,
    /// Maximize the objective equation
    Max,
    /// Pure feasibility / complementarity system, no objective
    Feasibility,
}

impl std::fmt::Display for ProblemSense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProblemSense::Min => write!(f, "min"),
            ProblemSense::Max => write!(f, "max"),
            ProblemSense::Feasibility => write!(f, "feasibility"),
        }
    }
}

/// Relation of one equation row, derived from its object and cone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRelation {
    /// `body + cst = 0`
    Eq,
    /// `body + cst <= 0`
    Le,
    /// `body + cst >= 0`
    Ge,
    /// Unconstrained mapping (function image)
    Free,
}

/// One nonlinear row: the GAMS-style opcode stream of its expression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlRow {
    /// Row index within the batch (0-based)
    pub row: u32,
    /// Opcodes, as the raw integer alphabet
    pub instrs: Vec<i32>,
    /// Arguments, 1-based variable/pool indices
    pub args: Vec<i32>,
}

/// Problem batch for one solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemBatch {
    /// Protocol version for compatibility checking.
    pub protocol_version: i32,

    /// Human-readable problem name (source model plus stage suffix).
    pub name: String,

    pub sense: ProblemSense,

    /// Objective row (0-based), if any.
    pub objective_row: Option<u32>,

    // === Variables ===
    /// Lower bounds.
    pub var_lb: Vec<f64>,
    /// Upper bounds.
    pub var_ub: Vec<f64>,
    /// Starting point (NaN where unset).
    pub var_level: Vec<f64>,
    /// Starting multipliers (NaN where unset).
    pub var_multiplier: Vec<f64>,
    /// Variable type tag: 0=continuous, 1=binary, 2=integer, 3=semicont,
    /// 4=semiint, 5=sos1, 6=sos2.
    pub var_type: Vec<u8>,

    // === Equations ===
    /// Row relations.
    pub row_relation: Vec<RowRelation>,
    /// Scalar constants (0 where the cone carries no scalar).
    pub row_cst: Vec<f64>,
    /// Starting row multipliers (NaN where unset).
    pub row_multiplier: Vec<f64>,

    // === Linear part, as triplets ===
    pub lin_row: Vec<u32>,
    pub lin_col: Vec<u32>,
    pub lin_val: Vec<f64>,

    // === Nonlinear part ===
    /// One entry per row with a nonlinear expression.
    pub nl_rows: Vec<NlRow>,
    /// Pool image referenced by the opcode arguments (index 0 reserved).
    pub pool: Vec<f64>,
}

impl ProblemBatch {
    pub fn n_vars(&self) -> usize {
        self.var_lb.len()
    }

    pub fn n_rows(&self) -> usize {
        self.row_relation.len()
    }

    /// Structural sanity check, run before handing the batch to a plugin.
    pub fn validate(&self) -> SolverResult<()> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(SolverError::ProtocolMismatch {
                got: self.protocol_version,
                expected: PROTOCOL_VERSION,
            });
        }

        let n = self.n_vars();
        let m = self.n_rows();

        if self.var_ub.len() != n
            || self.var_level.len() != n
            || self.var_multiplier.len() != n
            || self.var_type.len() != n
        {
            return Err(SolverError::MalformedBatch(
                "variable arrays have inconsistent lengths".into(),
            ));
        }

        if self.row_cst.len() != m || self.row_multiplier.len() != m {
            return Err(SolverError::MalformedBatch(
                "row arrays have inconsistent lengths".into(),
            ));
        }

        if self.lin_row.len() != self.lin_col.len() || self.lin_row.len() != self.lin_val.len() {
            return Err(SolverError::MalformedBatch(
                "linear triplet arrays have inconsistent lengths".into(),
            ));
        }

        if let Some(bad) = self.lin_row.iter().find(|&&r| r as usize >= m) {
            return Err(SolverError::MalformedBatch(format!(
                "linear triplet references row {bad} out of {m}"
            )));
        }
        if let Some(bad) = self.lin_col.iter().find(|&&c| c as usize >= n) {
            return Err(SolverError::MalformedBatch(format!(
                "linear triplet references column {bad} out of {n}"
            )));
        }
        if let Some(bad) = self.nl_rows.iter().find(|nl| nl.row as usize >= m) {
            return Err(SolverError::MalformedBatch(format!(
                "nonlinear row {} out of {m}",
                bad.row
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_batch() -> ProblemBatch {
        ProblemBatch {
            protocol_version: PROTOCOL_VERSION,
            name: "t".into(),
            sense: ProblemSense::Feasibility,
            objective_row: None,
            var_lb: vec![0.0, 0.0],
            var_ub: vec![1.0, 1.0],
            var_level: vec![f64::NAN; 2],
            var_multiplier: vec![f64::NAN; 2],
            var_type: vec![0, 0],
            row_relation: vec![RowRelation::Eq],
            row_cst: vec![0.0],
            row_multiplier: vec![f64::NAN],
            lin_row: vec![0, 0],
            lin_col: vec![0, 1],
            lin_val: vec![1.0, -1.0],
            nl_rows: vec![],
            pool: vec![f64::NAN, 1.0],
        }
    }

    #[test]
    fn test_validate_ok() {
        tiny_batch().validate().unwrap();
    }

    #[test]
    fn test_validate_catches_bad_column() {
        let mut b = tiny_batch();
        b.lin_col[1] = 9;
        assert!(matches!(b.validate(), Err(SolverError::MalformedBatch(_))));
    }

    #[test]
    fn test_validate_catches_version() {
        let mut b = tiny_batch();
        b.protocol_version = 99;
        assert!(matches!(b.validate(), Err(SolverError::ProtocolMismatch { .. })));
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = tiny_batch();
        let s = serde_json::to_string(&b).unwrap();
        let b2: ProblemBatch = serde_json::from_str(&s).unwrap();
        assert_eq!(b2.n_vars(), 2);
        assert_eq!(b2.row_relation[0], RowRelation::Eq);
    }
}
