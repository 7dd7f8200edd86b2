//! Index type for variables and equations.
//!
//! A single unsigned index type names both variables and equations, each in
//! its own space. A handful of sentinel values above [`Idx::MAX_VALID`]
//! encode lookup and transformation outcomes without a separate flag word.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Index of a variable or an equation in a container.
///
/// Values strictly below [`Idx::MAX_VALID`] are real indices; the named
/// constants above it are sentinels. [`Idx::is_valid`] and [`Idx::inbounds`]
/// are the only gates into the indexed structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Idx(u32);

impl Idx {
    /// Upper bound (exclusive) of valid indices.
    pub const MAX_VALID: u32 = u32::MAX - 7;

    /// Not applicable / not set.
    pub const NA: Idx = Idx(u32::MAX - 6);
    /// A lookup yielded nothing.
    pub const NOT_FOUND: Idx = Idx(u32::MAX - 5);
    /// Structurally invalid.
    pub const INVALID: Idx = Idx(u32::MAX - 4);
    /// The entry was deleted by a transformation.
    pub const DELETED: Idx = Idx(u32::MAX - 3);
    /// A lookup found more than one match.
    pub const DUPLICATE: Idx = Idx(u32::MAX - 2);
    /// The index exceeds the dimension it was checked against.
    pub const OUT_OF_RANGE: Idx = Idx(u32::MAX - 1);
    /// An error occurred while computing the index.
    pub const ERROR: Idx = Idx(u32::MAX);

    pub fn new(i: usize) -> Idx {
        debug_assert!((i as u64) < Self::MAX_VALID as u64);
        Idx(i as u32)
    }

    /// True iff this is a real index, not a sentinel.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 < Self::MAX_VALID
    }

    /// Bounds-checked conversion to a usize position.
    #[inline]
    pub fn inbounds(self, n: usize) -> CoreResult<usize> {
        let i = self.0 as usize;
        if self.is_valid() && i < n {
            Ok(i)
        } else {
            Err(CoreError::IndexOutOfRange { idx: i, limit: n })
        }
    }

    /// Raw position. Only meaningful when [`Idx::is_valid`] holds.
    #[inline]
    pub fn idx(self) -> usize {
        debug_assert!(self.is_valid());
        self.0 as usize
    }

    /// Short diagnostic name for a sentinel, or "valid".
    pub fn sentinel_name(self) -> &'static str {
        match self {
            Idx::NA => "NA",
            Idx::NOT_FOUND => "NotFound",
            Idx::INVALID => "Invalid",
            Idx::DELETED => "Deleted",
            Idx::DUPLICATE => "Duplicate",
            Idx::OUT_OF_RANGE => "OutOfRange",
            Idx::ERROR => "Error",
            _ => "valid",
        }
    }
}

impl std::fmt::Display for Idx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<{}>", self.sentinel_name())
        }
    }
}

impl From<u32> for Idx {
    fn from(i: u32) -> Idx {
        Idx(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_distinct() {
        let s = [
            Idx::NA,
            Idx::NOT_FOUND,
            Idx::INVALID,
            Idx::DELETED,
            Idx::DUPLICATE,
            Idx::OUT_OF_RANGE,
            Idx::ERROR,
        ];
        for (i, a) in s.iter().enumerate() {
            assert!(!a.is_valid());
            for b in &s[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_inbounds() {
        assert_eq!(Idx::new(3).inbounds(5).unwrap(), 3);
        assert!(Idx::new(5).inbounds(5).is_err());
        assert!(Idx::DELETED.inbounds(usize::MAX).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Idx::new(7).to_string(), "7");
        assert_eq!(Idx::DELETED.to_string(), "<Deleted>");
    }
}
