//! Abstract variable and equation sets.
//!
//! An [`IdxSet`] is a value-level handle denoting a set of variable or
//! equation indices. Four representations are supported, trading memory for
//! lookup cost:
//!
//! - `Compact`: the contiguous range `[start, start + size)`, O(1) find
//! - `List`: an unordered owned array, O(n) find
//! - `SortedList`: a strictly increasing array, O(log n) find
//! - `Block`: a heterogeneous concatenation of sub-sets
//!
//! [`Avar`] and [`Aequ`] are the variable- and equation-space aliases.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::idx::Idx;

/// A set of variable or equation indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdxSet {
    /// The range `[start, start + size)`.
    Compact { start: Idx, size: u32 },
    /// Unordered list of indices.
    List(Vec<Idx>),
    /// Strictly increasing list of indices.
    SortedList(Vec<Idx>),
    /// Concatenation of sub-sets.
    Block(Vec<IdxSet>),
}

/// Abstract variable: a set of variable indices.
pub type Avar = IdxSet;
/// Abstract equation: a set of equation indices.
pub type Aequ = IdxSet;

impl IdxSet {
    pub fn empty() -> IdxSet {
        IdxSet::Compact { start: Idx::new(0), size: 0 }
    }

    pub fn compact(start: usize, size: usize) -> IdxSet {
        IdxSet::Compact { start: Idx::new(start), size: size as u32 }
    }

    pub fn list(indices: Vec<Idx>) -> IdxSet {
        IdxSet::List(indices)
    }

    /// Copying constructor for callers holding a borrowed slice.
    pub fn list_from(indices: &[Idx]) -> IdxSet {
        IdxSet::List(indices.to_vec())
    }

    /// Build a sorted list. The input must be strictly increasing.
    pub fn sorted_list(indices: Vec<Idx>) -> CoreResult<IdxSet> {
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::InvalidArgument(
                "sorted list indices must be strictly increasing".into(),
            ));
        }
        Ok(IdxSet::SortedList(indices))
    }

    pub fn block(capacity: usize) -> IdxSet {
        IdxSet::Block(Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        match self {
            IdxSet::Compact { size, .. } => *size as usize,
            IdxSet::List(l) | IdxSet::SortedList(l) => l.len(),
            IdxSet::Block(blocks) => blocks.iter().map(IdxSet::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The index at position `i`, or `IndexOutOfRange`.
    pub fn get(&self, i: usize) -> CoreResult<Idx> {
        if i >= self.len() {
            return Err(CoreError::IndexOutOfRange { idx: i, limit: self.len() });
        }
        Ok(self.fget(i))
    }

    /// The index at position `i`, unchecked beyond a debug assertion.
    pub fn fget(&self, i: usize) -> Idx {
        debug_assert!(i < self.len());
        match self {
            IdxSet::Compact { start, .. } => Idx::new(start.idx() + i),
            IdxSet::List(l) | IdxSet::SortedList(l) => l[i],
            IdxSet::Block(blocks) => {
                let mut i = i;
                for b in blocks {
                    let n = b.len();
                    if i < n {
                        return b.fget(i);
                    }
                    i -= n;
                }
                Idx::ERROR
            }
        }
    }

    /// Position of `idx` in the set, if present.
    pub fn find(&self, idx: Idx) -> Option<usize> {
        if !idx.is_valid() {
            return None;
        }
        match self {
            IdxSet::Compact { start, size } => {
                let (s, n) = (start.idx(), *size as usize);
                let i = idx.idx();
                (i >= s && i < s + n).then(|| i - s)
            }
            IdxSet::List(l) => l.iter().position(|&v| v == idx),
            IdxSet::SortedList(l) => l.binary_search(&idx).ok(),
            IdxSet::Block(blocks) => {
                let mut offset = 0;
                for b in blocks {
                    if let Some(pos) = b.find(idx) {
                        return Some(offset + pos);
                    }
                    offset += b.len();
                }
                None
            }
        }
    }

    pub fn contains(&self, idx: Idx) -> bool {
        self.find(idx).is_some()
    }

    /// Append a sub-set to a block, taking ownership of the argument.
    /// Only block sets can be extended.
    pub fn extend(&mut self, other: IdxSet) -> CoreResult<()> {
        match self {
            IdxSet::Block(blocks) => {
                if !other.is_empty() {
                    blocks.push(other);
                }
                Ok(())
            }
            _ => Err(CoreError::InvalidArgument(
                "only block sets can be extended".into(),
            )),
        }
    }

    pub fn iter(&self) -> IdxSetIter<'_> {
        IdxSetIter { set: self, pos: 0 }
    }
}

/// Iterator over the indices of an [`IdxSet`], in set order.
pub struct IdxSetIter<'a> {
    set: &'a IdxSet,
    pos: usize,
}

impl Iterator for IdxSetIter<'_> {
    type Item = Idx;

    fn next(&mut self) -> Option<Idx> {
        if self.pos >= self.set.len() {
            return None;
        }
        let i = self.set.fget(self.pos);
        self.pos += 1;
        Some(i)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.set.len() - self.pos;
        (rem, Some(rem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[usize]) -> Vec<Idx> {
        v.iter().map(|&i| Idx::new(i)).collect()
    }

    #[test]
    fn test_compact() {
        let s = IdxSet::compact(3, 4);
        assert_eq!(s.len(), 4);
        assert_eq!(s.get(0).unwrap(), Idx::new(3));
        assert_eq!(s.get(3).unwrap(), Idx::new(6));
        assert!(s.get(4).is_err());
        assert_eq!(s.find(Idx::new(5)), Some(2));
        assert!(!s.contains(Idx::new(7)));
        assert!(!s.contains(Idx::DELETED));
    }

    #[test]
    fn test_sorted_list_find() {
        let s = IdxSet::sorted_list(ids(&[1, 4, 9, 12])).unwrap();
        assert_eq!(s.find(Idx::new(9)), Some(2));
        assert_eq!(s.find(Idx::new(2)), None);
        assert!(IdxSet::sorted_list(ids(&[4, 1])).is_err());
    }

    #[test]
    fn test_block_concatenation() {
        let mut b = IdxSet::block(2);
        b.extend(IdxSet::compact(0, 2)).unwrap();
        b.extend(IdxSet::list(ids(&[10, 8]))).unwrap();
        assert_eq!(b.len(), 4);
        assert_eq!(b.fget(1), Idx::new(1));
        assert_eq!(b.fget(3), Idx::new(8));
        assert_eq!(b.find(Idx::new(10)), Some(2));
        let collected: Vec<Idx> = b.iter().collect();
        assert_eq!(collected, ids(&[0, 1, 10, 8]));
    }

    #[test]
    fn test_extend_non_block() {
        let mut s = IdxSet::compact(0, 2);
        assert!(s.extend(IdxSet::compact(2, 2)).is_err());
    }

    #[test]
    fn test_serde_json_roundtrip() {
        let mut b = IdxSet::block(2);
        b.extend(IdxSet::compact(0, 2)).unwrap();
        b.extend(IdxSet::sorted_list(ids(&[5, 9])).unwrap()).unwrap();

        let json = serde_json::to_string(&b).unwrap();
        let back: IdxSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
        assert_eq!(back.find(Idx::new(9)), Some(3));
    }
}
