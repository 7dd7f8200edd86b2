//! Cones for constraint bodies.
//!
//! A constraint is an inclusion `body ∈ K`. The cone determines both the
//! geometry and whether a scalar constant term makes sense: only `R`, `R+`,
//! `R-` and `{0}` admit one, the structured cones carry their own data.

use serde::{Deserialize, Serialize};

/// The geometric set a constraint's body must lie in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cone {
    /// The real line (free relation)
    R,
    /// Nonnegative half-line, `body + cst >= 0`
    RPlus,
    /// Nonpositive half-line, `body + cst <= 0`
    RMinus,
    /// The origin, `body + cst = 0`
    Zero,
    /// Second-order cone
    Soc,
    /// Rotated second-order cone
    Rsoc,
    /// Exponential cone
    Exp,
    /// Dual exponential cone
    Dexp,
    /// Power cone
    Power,
    /// Dual power cone
    Dpower,
    /// Generic polyhedral cone
    Polyhedral,
    /// No cone attached (mappings, boolean relations)
    None,
}

impl Cone {
    /// True for the one-dimensional polyhedral cones, the only ones an
    /// equation flip is defined for.
    pub fn is_1d_polyhedral(self) -> bool {
        matches!(self, Cone::RPlus | Cone::RMinus | Cone::Zero)
    }

    /// True when the cone admits a scalar constant term.
    pub fn admits_scalar_cst(self) -> bool {
        matches!(self, Cone::R | Cone::RPlus | Cone::RMinus | Cone::Zero)
    }

    /// The cone after a sign flip. Only meaningful for 1-D polyhedral cones.
    pub fn flipped(self) -> Cone {
        match self {
            Cone::RPlus => Cone::RMinus,
            Cone::RMinus => Cone::RPlus,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Cone::R => "R",
            Cone::RPlus => "R+",
            Cone::RMinus => "R-",
            Cone::Zero => "{0}",
            Cone::Soc => "SOC",
            Cone::Rsoc => "RSOC",
            Cone::Exp => "EXP",
            Cone::Dexp => "DEXP",
            Cone::Power => "POWER",
            Cone::Dpower => "DPOWER",
            Cone::Polyhedral => "polyhedral",
            Cone::None => "none",
        }
    }
}

impl std::fmt::Display for Cone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_involution() {
        assert_eq!(Cone::RPlus.flipped(), Cone::RMinus);
        assert_eq!(Cone::RMinus.flipped().flipped(), Cone::RMinus);
        assert_eq!(Cone::Zero.flipped(), Cone::Zero);
    }

    #[test]
    fn test_scalar_cst_gate() {
        assert!(Cone::Zero.admits_scalar_cst());
        assert!(!Cone::Soc.admits_scalar_cst());
        assert!(!Cone::None.admits_scalar_cst());
    }
}
