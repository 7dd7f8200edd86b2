//! Interning pool for numeric constants.
//!
//! Bytecode arguments reference constants by index rather than by value.
//! The pool maps a finite double to a stable 1-based index (`0` reliably
//! means "no constant"), so equal values share an entry and the tree payload
//! stays a plain `u32`.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::error::{CoreError, CoreResult};

/// 1-based index into a [`Pool`]. `POOL_IDX_NONE` (0) means "no constant".
pub type PoolIdx = u32;

/// The reserved "no constant" pool index.
pub const POOL_IDX_NONE: PoolIdx = 0;

/// Constants every GAMS-style pool starts with. Index 1 is 1.0 so the
/// common `MulI(1)` patterns resolve without interning.
static SEED_CONSTANTS: Lazy<Vec<f64>> =
    Lazy::new(|| vec![1.0, 10.0, 0.1, 0.25, 0.5, 2.0, 4.0, 0.0]);

/// Interning table mapping a real constant to a stable index.
///
/// Grows by reallocation under exclusive mutation; sharing between
/// containers is by deep copy (`Clone`).
#[derive(Debug, Clone)]
pub struct Pool {
    data: Vec<f64>,
    /// Bit-pattern lookup so equal values yield the same index.
    lookup: HashMap<u64, PoolIdx>,
}

impl Pool {
    /// An empty pool with only the reserved slot 0.
    pub fn new() -> Pool {
        Pool { data: vec![f64::NAN], lookup: HashMap::new() }
    }

    /// A pool seeded with the classic GAMS constants.
    pub fn new_gams() -> Pool {
        let mut pool = Pool::new();
        for &c in SEED_CONSTANTS.iter() {
            // interning finite seeds cannot fail
            let _ = pool.get(c);
        }
        pool
    }

    /// Number of live entries, including the reserved slot 0.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }

    /// Intern `val` and return its index. Equal values yield the same index.
    pub fn get(&mut self, val: f64) -> CoreResult<PoolIdx> {
        if !val.is_finite() {
            return Err(CoreError::InvalidValue(format!(
                "cannot intern non-finite constant {val}"
            )));
        }

        let key = val.to_bits();
        if let Some(&idx) = self.lookup.get(&key) {
            return Ok(idx);
        }

        let idx = self.data.len() as PoolIdx;
        self.data.push(val);
        self.lookup.insert(key, idx);
        Ok(idx)
    }

    /// Constant-time lookup.
    pub fn read(&self, idx: PoolIdx) -> CoreResult<f64> {
        if idx == POOL_IDX_NONE || (idx as usize) >= self.data.len() {
            return Err(CoreError::IndexOutOfRange {
                idx: idx as usize,
                limit: self.data.len(),
            });
        }
        Ok(self.data[idx as usize])
    }

    /// Append `n` raw slots and return the index of the first one.
    ///
    /// The slots are not interned: they hold per-variable values frozen by
    /// the presolve pipeline and are rewritten in place via [`Pool::set_slot`].
    pub fn reserve_slots(&mut self, n: usize) -> PoolIdx {
        let offset = self.data.len() as PoolIdx;
        self.data.resize(self.data.len() + n, 0.0);
        offset
    }

    /// Overwrite a raw slot previously handed out by [`Pool::reserve_slots`].
    pub fn set_slot(&mut self, idx: PoolIdx, val: f64) {
        debug_assert!(idx != POOL_IDX_NONE && (idx as usize) < self.data.len());
        self.data[idx as usize] = val;
    }

    /// Raw image of the pool, for export to a solver batch.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl Default for Pool {
    fn default() -> Pool {
        Pool::new_gams()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_stable() {
        let mut pool = Pool::new();
        let a = pool.get(3.25).unwrap();
        let b = pool.get(3.25).unwrap();
        let c = pool.get(-3.25).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, POOL_IDX_NONE);
        assert_eq!(pool.read(a).unwrap(), 3.25);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut pool = Pool::new();
        assert!(pool.get(f64::NAN).is_err());
        assert!(pool.get(f64::INFINITY).is_err());
    }

    #[test]
    fn test_gams_seed() {
        let mut pool = Pool::new_gams();
        // 1.0 is the first seeded constant
        assert_eq!(pool.get(1.0).unwrap(), 1);
        assert_eq!(pool.read(1).unwrap(), 1.0);
    }

    #[test]
    fn test_raw_slots() {
        let mut pool = Pool::new_gams();
        let off = pool.reserve_slots(3);
        pool.set_slot(off + 1, 42.0);
        assert_eq!(pool.read(off + 1).unwrap(), 42.0);
        assert_eq!(pool.read(off).unwrap(), 0.0);
    }

    #[test]
    fn test_index_zero_reserved() {
        let pool = Pool::new();
        assert!(pool.read(POOL_IDX_NONE).is_err());
    }
}
