//! Sparse storage for the linear part of an equation.
//!
//! A [`Lequ`] is a pair of parallel arrays `(vis, coeffs)`. Order is not
//! semantically meaningful, which makes deletion an O(1) swap-with-last.
//!
//! Invariants: every stored index is valid and every coefficient finite.

use crate::error::{CoreError, CoreResult};
use crate::idx::Idx;
use crate::sets::Avar;

/// Linear part of one equation: ordered pairs (variable index, coefficient).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lequ {
    vis: Vec<Idx>,
    coeffs: Vec<f64>,
}

impl Lequ {
    pub fn new() -> Lequ {
        Lequ::default()
    }

    pub fn with_capacity(maxlen: usize) -> Lequ {
        Lequ { vis: Vec::with_capacity(maxlen), coeffs: Vec::with_capacity(maxlen) }
    }

    pub fn from_data(vis: &[Idx], coeffs: &[f64]) -> CoreResult<Lequ> {
        debug_assert_eq!(vis.len(), coeffs.len());
        let mut le = Lequ::with_capacity(vis.len());
        for (&vi, &c) in vis.iter().zip(coeffs) {
            le.add(vi, c)?;
        }
        Ok(le)
    }

    pub fn len(&self) -> usize {
        self.vis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vis.is_empty()
    }

    pub fn vis(&self) -> &[Idx] {
        &self.vis
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn reserve(&mut self, additional: usize) {
        self.vis.reserve(additional);
        self.coeffs.reserve(additional);
    }

    fn chk_entry(vi: Idx, value: f64) -> CoreResult<()> {
        if !vi.is_valid() {
            return Err(CoreError::InvalidArgument(format!(
                "cannot store sentinel index {vi} in a linear part"
            )));
        }
        if !value.is_finite() {
            return Err(CoreError::InvalidValue(format!(
                "non-finite coefficient {value} for variable {vi}"
            )));
        }
        Ok(())
    }

    /// Append without deduplication.
    pub fn add(&mut self, vi: Idx, value: f64) -> CoreResult<()> {
        Self::chk_entry(vi, value)?;
        self.vis.push(vi);
        self.coeffs.push(value);
        Ok(())
    }

    /// Append, rejecting a variable already present.
    pub fn add_unique(&mut self, vi: Idx, value: f64) -> CoreResult<()> {
        Self::chk_entry(vi, value)?;
        if self.vis.contains(&vi) {
            return Err(CoreError::DuplicateValue(format!(
                "variable {vi} is already in the linear part"
            )));
        }
        self.vis.push(vi);
        self.coeffs.push(value);
        Ok(())
    }

    /// Append every (variable, value) pair of an abstract variable.
    pub fn adds(&mut self, v: &Avar, values: &[f64]) -> CoreResult<()> {
        debug_assert_eq!(v.len(), values.len());
        self.reserve(v.len());
        for (i, vi) in v.iter().enumerate() {
            self.add(vi, values[i])?;
        }
        Ok(())
    }

    /// Find a variable; returns (coefficient, position).
    pub fn find(&self, vi: Idx) -> Option<(f64, usize)> {
        self.vis.iter().position(|&v| v == vi).map(|pos| (self.coeffs[pos], pos))
    }

    pub fn contains(&self, vi: Idx) -> bool {
        self.vis.contains(&vi)
    }

    /// Overwrite the coefficient at a position.
    pub fn set_coeff(&mut self, pos: usize, value: f64) -> CoreResult<()> {
        if !value.is_finite() {
            return Err(CoreError::InvalidValue(format!(
                "non-finite coefficient {value}"
            )));
        }
        self.coeffs[pos] = value;
        Ok(())
    }

    /// O(1) delete by swap-with-last.
    pub fn delete(&mut self, pos: usize) {
        self.vis.swap_remove(pos);
        self.coeffs.swap_remove(pos);
    }

    /// Scale every coefficient.
    pub fn scal(&mut self, coeff: f64) -> CoreResult<()> {
        if !coeff.is_finite() {
            return Err(CoreError::InvalidValue(format!("non-finite scale {coeff}")));
        }
        for c in &mut self.coeffs {
            *c *= coeff;
        }
        Ok(())
    }

    /// Negate every coefficient.
    pub fn flip_signs(&mut self) {
        for c in &mut self.coeffs {
            *c = -*c;
        }
    }

    /// Copy of this linear part omitting one variable.
    pub fn copy_except(&self, vi_skip: Idx) -> Lequ {
        let mut out = Lequ::with_capacity(self.len());
        for (i, &vi) in self.vis.iter().enumerate() {
            if vi != vi_skip {
                out.vis.push(vi);
                out.coeffs.push(self.coeffs[i]);
            }
        }
        out
    }

    /// Duplicate with every variable index translated through `rosetta`.
    pub fn dup_rosetta(&self, rosetta: &[Idx]) -> CoreResult<Lequ> {
        let mut out = Lequ::with_capacity(self.len());
        for (i, &vi) in self.vis.iter().enumerate() {
            let vi_new = rosetta[vi.idx()];
            if !vi_new.is_valid() {
                return Err(CoreError::Inconsistency(format!(
                    "variable {vi} maps to {vi_new} in the translation table"
                )));
            }
            out.vis.push(vi_new);
            out.coeffs.push(self.coeffs[i]);
        }
        Ok(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Idx, f64)> + '_ {
        self.vis.iter().copied().zip(self.coeffs.iter().copied())
    }
}
