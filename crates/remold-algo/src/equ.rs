//! Equation records.
//!
//! An [`Equ`] bundles everything one equation owns: its object kind and
//! cone, the scalar constant (gated by the cone), the sparse linear part,
//! and the optional expression tree for the nonlinear part.

use remold_core::equ::{chk_scalar_cst, EquObject};
use remold_core::{BasisStatus, Cone, CoreResult, Idx, Lequ};

use crate::nltree::{bootstrap, NlTree};

/// One equation of a container.
#[derive(Debug, Clone)]
pub struct Equ {
    pub idx: Idx,
    pub basis: BasisStatus,
    pub object: EquObject,
    pub cone: Cone,
    /// Hint that the nonlinear part is in fact quadratic.
    pub is_quad: bool,
    /// Scalar constant term; only meaningful when the (object, cone) pair
    /// admits one.
    cst: f64,
    /// Parameters of a structured (non-polyhedral) cone.
    pub cone_data: Option<Vec<f64>>,
    /// Current level, when known.
    pub value: Option<f64>,
    /// Current multiplier, when known.
    pub multiplier: Option<f64>,
    /// Linear part.
    pub lequ: Lequ,
    /// Nonlinear part; absent for purely linear equations.
    pub tree: Option<NlTree>,
}

impl Equ {
    pub fn new(idx: Idx, object: EquObject, cone: Cone) -> Equ {
        Equ {
            idx,
            basis: BasisStatus::Unset,
            object,
            cone,
            is_quad: false,
            cst: 0.0,
            cone_data: None,
            value: None,
            multiplier: None,
            lequ: Lequ::new(),
            tree: None,
        }
    }

    /// Placeholder record for a not-yet-defined equation slot.
    pub fn unset(idx: Idx) -> Equ {
        Equ::new(idx, EquObject::Unset, Cone::None)
    }

    pub fn get_cst(&self) -> CoreResult<f64> {
        chk_scalar_cst("get_cst", self.object, self.cone)?;
        Ok(self.cst)
    }

    pub fn set_cst(&mut self, val: f64) -> CoreResult<()> {
        chk_scalar_cst("set_cst", self.object, self.cone)?;
        self.cst = val;
        Ok(())
    }

    pub fn add_cst(&mut self, val: f64) -> CoreResult<()> {
        chk_scalar_cst("add_cst", self.object, self.cone)?;
        self.cst += val;
        Ok(())
    }

    /// Raw constant, bypassing the cone gate. For copies and diagnostics.
    pub fn raw_cst(&self) -> f64 {
        self.cst
    }

    pub fn has_lin(&self) -> bool {
        !self.lequ.is_empty()
    }

    pub fn has_nl(&self) -> bool {
        self.tree.as_ref().is_some_and(|t| !t.is_trivial())
    }

    /// Create the expression tree on demand and return it.
    pub fn bootstrap_tree(&mut self, est_nodes: usize) -> &mut NlTree {
        bootstrap(&mut self.tree, self.idx, est_nodes)
    }

    /// A rough node-count estimate for edits that append to this equation.
    pub fn nl_estimate(&self) -> usize {
        let tree_nodes = self.tree.as_ref().map_or(0, NlTree::num_nodes);
        (tree_nodes + self.lequ.len() + 2).max(4)
    }

    /// Copy everything except the algebraic content (used when duplicating
    /// an equation into a fresh slot).
    pub fn copy_metadata(&self, idx: Idx) -> Equ {
        Equ {
            idx,
            basis: self.basis,
            object: self.object,
            cone: self.cone,
            is_quad: self.is_quad,
            cst: self.cst,
            cone_data: self.cone_data.clone(),
            value: self.value,
            multiplier: self.multiplier,
            lequ: Lequ::new(),
            tree: None,
        }
    }

    /// Deep copy into a new index, omitting one variable from the linear
    /// part and reserving `lin_extra` slots for upcoming edits.
    pub fn copy_to(&self, idx: Idx, lin_extra: usize, vi_skip: Idx) -> Equ {
        let mut out = self.copy_metadata(idx);
        out.lequ = self.lequ.copy_except(vi_skip);
        out.lequ.reserve(lin_extra);
        out.tree = self.tree.as_ref().map(|t| {
            let mut tree = t.dup();
            tree.ei = idx;
            tree
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cst_gating() {
        let mut e = Equ::new(Idx::new(0), EquObject::ConeInclusion, Cone::RPlus);
        e.set_cst(2.0).unwrap();
        e.add_cst(1.0).unwrap();
        assert_eq!(e.get_cst().unwrap(), 3.0);

        let mut bad = Equ::new(Idx::new(1), EquObject::ConeInclusion, Cone::Soc);
        assert!(bad.set_cst(1.0).is_err());
        assert!(bad.get_cst().is_err());
    }

    #[test]
    fn test_copy_to_skips_variable() {
        let mut e = Equ::new(Idx::new(0), EquObject::Mapping, Cone::None);
        e.lequ.add(Idx::new(0), 1.0).unwrap();
        e.lequ.add(Idx::new(1), 2.0).unwrap();
        e.set_cst(5.0).unwrap();

        let copy = e.copy_to(Idx::new(3), 0, Idx::new(0));
        assert_eq!(copy.idx, Idx::new(3));
        assert_eq!(copy.lequ.len(), 1);
        assert!(copy.lequ.contains(Idx::new(1)));
        assert_eq!(copy.get_cst().unwrap(), 5.0);
    }

    #[test]
    fn test_bootstrap_tree_sets_owner() {
        let mut e = Equ::new(Idx::new(7), EquObject::Mapping, Cone::None);
        assert!(!e.has_nl());
        let tree = e.bootstrap_tree(8);
        assert_eq!(tree.ei, Idx::new(7));
    }
}
