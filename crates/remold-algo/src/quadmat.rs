//! Matrix forms accepted by the quadratic editing entry point.
//!
//! `equ_add_quadratic` encodes `coeff/2 * x' M x`. Only shapes that map
//! cleanly onto tree edits are supported: scaled identities (one square
//! node per variable), block diagonals of scaled identities, and general
//! triplets. Compressed row/column storage is deliberately unsupported.

use remold_core::{CoreError, CoreResult, Idx};
use sprs::{CsMat, TriMat};

/// Quadratic-form matrix, by structure.
pub enum QuadMat<'a> {
    /// `k * I`
    ScaledIdentity(f64),
    /// Block diagonal of scaled identities: `(block size, scale)` pairs.
    BlockDiag(Vec<(usize, f64)>),
    /// General symmetric part in triplet (COO) form.
    Coo(&'a TriMat<f64>),
    /// CSR/CSC input; rejected with `NotImplemented`.
    Cs(&'a CsMat<f64>),
}

impl QuadMat<'_> {
    /// Number of rows the form spans; `None` when the form adapts to the
    /// variable set (scaled identity).
    pub fn dim(&self) -> Option<usize> {
        match self {
            QuadMat::ScaledIdentity(_) => None,
            QuadMat::BlockDiag(blocks) => Some(blocks.iter().map(|(n, _)| n).sum()),
            QuadMat::Coo(m) => Some(m.rows()),
            QuadMat::Cs(m) => Some(m.rows()),
        }
    }

    /// Triplet image `(rows, cols, vals)` of a COO form, as index vectors.
    pub fn coo_triplets(m: &TriMat<f64>) -> CoreResult<(Vec<Idx>, Vec<Idx>, Vec<f64>)> {
        if m.rows() != m.cols() {
            return Err(CoreError::UnExpectedData(format!(
                "quadratic matrix is not square: {}x{}",
                m.rows(),
                m.cols()
            )));
        }
        let mut rows = Vec::with_capacity(m.nnz());
        let mut cols = Vec::with_capacity(m.nnz());
        let mut vals = Vec::with_capacity(m.nnz());
        for (v, (i, j)) in m.triplet_iter() {
            rows.push(Idx::new(i));
            cols.push(Idx::new(j));
            vals.push(*v);
        }
        Ok((rows, cols, vals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims() {
        assert_eq!(QuadMat::ScaledIdentity(2.0).dim(), None);
        assert_eq!(QuadMat::BlockDiag(vec![(2, 1.0), (3, 4.0)]).dim(), Some(5));
    }

    #[test]
    fn test_coo_triplets() {
        let mut m = TriMat::new((3, 3));
        m.add_triplet(0, 0, 2.0);
        m.add_triplet(1, 2, -1.0);
        let (rows, cols, vals) = QuadMat::coo_triplets(&m).unwrap();
        assert_eq!(rows, vec![Idx::new(0), Idx::new(1)]);
        assert_eq!(cols, vec![Idx::new(0), Idx::new(2)]);
        assert_eq!(vals, vec![2.0, -1.0]);

        let bad = TriMat::<f64>::new((2, 3));
        assert!(QuadMat::coo_triplets(&bad).is_err());
    }
}
