//! Basis status for variables and equations.

use serde::{Deserialize, Serialize};

/// Basis status reported by or handed to a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BasisStatus {
    #[default]
    Unset,
    Lower,
    Upper,
    Basic,
    SuperBasic,
    Fixed,
}

impl BasisStatus {
    /// Basis after an equation flip: an active lower bound becomes an active
    /// upper bound and vice versa, the rest is unchanged.
    pub fn flipped(self) -> BasisStatus {
        match self {
            BasisStatus::Lower => BasisStatus::Upper,
            BasisStatus::Upper => BasisStatus::Lower,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip() {
        assert_eq!(BasisStatus::Lower.flipped(), BasisStatus::Upper);
        assert_eq!(BasisStatus::Basic.flipped(), BasisStatus::Basic);
        assert_eq!(BasisStatus::Upper.flipped().flipped(), BasisStatus::Upper);
    }
}
