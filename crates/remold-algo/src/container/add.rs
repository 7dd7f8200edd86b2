//! Variable and equation creation.
//!
//! All creation paths hand out fresh indices at the `total_n`/`total_m`
//! high-water marks. A variable is *active* only once it appears in an
//! equation; an equation is active once its row exists in the container
//! matrix (a constant placeholder counts).

use tracing::trace;

use remold_core::equ::EquObject;
use remold_core::{Avar, Cone, CoreError, CoreResult, Idx, IdxSet, Var};

use crate::equ::Equ;

use super::{Container, EquMeta, EquRosetta, VarMeta};

impl Container {
    fn push_var_record(&mut self, var: Var, name: Option<&str>) -> Idx {
        let vi = var.idx;
        debug_assert_eq!(vi.idx(), self.total_n);

        self.reserve_vars(1);
        self.vars.push(var);
        self.var_names.push(match name {
            Some(base) => base.to_string(),
            None => format!("x{}", vi.idx()),
        });
        if let Some(meta) = &mut self.varmeta {
            meta.push(VarMeta::new());
        }
        self.total_n += 1;
        vi
    }

    /// Add one free variable.
    pub fn add_var(&mut self) -> Idx {
        let vi = Idx::new(self.total_n);
        self.push_var_record(Var::new(vi), None)
    }

    /// Add one named free variable.
    pub fn add_var_named(&mut self, name: &str) -> Idx {
        let vi = Idx::new(self.total_n);
        self.push_var_record(Var::new(vi), Some(name))
    }

    fn add_vars_with<F>(&mut self, size: usize, base: Option<&str>, mk: F) -> Avar
    where
        F: Fn(Idx, usize) -> Var,
    {
        let start = self.total_n;
        self.reserve_vars(size);
        for i in 0..size {
            let vi = Idx::new(self.total_n);
            let name = base.map(|b| format!("{b}({i})"));
            self.push_var_record(mk(vi, i), name.as_deref());
        }
        IdxSet::compact(start, size)
    }

    /// Add `size` free variables as a compact set.
    pub fn add_vars(&mut self, size: usize) -> Avar {
        self.add_vars_with(size, None, |vi, _| Var::new(vi))
    }

    pub fn add_vars_named(&mut self, size: usize, base: &str) -> Avar {
        self.add_vars_with(size, Some(base), |vi, _| Var::new(vi))
    }

    /// Add `size` variables bounded in `[0, +inf)`.
    pub fn add_posvars(&mut self, size: usize) -> Avar {
        self.add_vars_with(size, None, |vi, _| Var::positive(vi))
    }

    /// Add `size` variables bounded in `(-inf, 0]`.
    pub fn add_negvars(&mut self, size: usize) -> Avar {
        self.add_vars_with(size, None, |vi, _| Var::negative(vi))
    }

    /// Add `size` variables sharing the box `[lb, ub]`.
    pub fn add_varsinbox(&mut self, size: usize, lb: f64, ub: f64) -> Avar {
        self.add_vars_with(size, None, |vi, _| Var::in_box(vi, lb, ub))
    }

    /// Add variables with per-entry boxes.
    pub fn add_varsinboxes(&mut self, lb: &[f64], ub: &[f64]) -> CoreResult<Avar> {
        if lb.len() != ub.len() {
            return Err(CoreError::InvalidArgument(format!(
                "bound arrays have lengths {} and {}",
                lb.len(),
                ub.len()
            )));
        }
        Ok(self.add_vars_with(lb.len(), None, |vi, i| Var::in_box(vi, lb[i], ub[i])))
    }

    // ------------------------------------------------------------------
    // Equations
    // ------------------------------------------------------------------

    /// Add an empty equation slot of the given object and cone; the row is
    /// registered once content arrives.
    pub fn add_equ_empty(
        &mut self,
        name: Option<&str>,
        object: EquObject,
        cone: Cone,
    ) -> CoreResult<Idx> {
        self.reserve_equs(1);

        let ei = Idx::new(self.total_m);
        self.equs.push(Equ::new(ei, object, cone));
        self.equ_names.push(match name {
            Some(n) => n.to_string(),
            None => format!("e{}", ei.idx()),
        });
        self.equ_rosetta.push(EquRosetta::default());
        self.equ_stage.push(self.current_stage);
        if let Some(meta) = &mut self.equmeta {
            meta.push(EquMeta::new());
        }
        self.total_m += 1;
        self.m += 1;
        Ok(ei)
    }

    /// Add an untyped equation.
    pub fn add_equation(&mut self) -> CoreResult<Idx> {
        self.add_equ_empty(None, EquObject::Unset, Cone::None)
    }

    pub fn add_equations(&mut self, size: usize) -> CoreResult<IdxSet> {
        let start = self.total_m;
        for _ in 0..size {
            self.add_equation()?;
        }
        Ok(IdxSet::compact(start, size))
    }

    /// Add a constraint: a cone inclusion in the given cone.
    pub fn add_con(&mut self, cone: Cone) -> CoreResult<Idx> {
        if cone == Cone::None {
            return Err(CoreError::InvalidArgument(
                "a constraint needs a cone; use add_func for a mapping".into(),
            ));
        }
        self.add_equ_empty(None, EquObject::ConeInclusion, cone)
    }

    pub fn add_con_named(&mut self, cone: Cone, name: &str) -> CoreResult<Idx> {
        if cone == Cone::None {
            return Err(CoreError::InvalidArgument(
                "a constraint needs a cone; use add_func for a mapping".into(),
            ));
        }
        self.add_equ_empty(Some(name), EquObject::ConeInclusion, cone)
    }

    pub fn add_cons(&mut self, size: usize, cone: Cone) -> CoreResult<IdxSet> {
        let start = self.total_m;
        for _ in 0..size {
            self.add_con(cone)?;
        }
        Ok(IdxSet::compact(start, size))
    }

    /// Add a mapping (a function image).
    pub fn add_func(&mut self) -> CoreResult<Idx> {
        self.add_equ_empty(None, EquObject::Mapping, Cone::None)
    }

    pub fn add_func_named(&mut self, name: &str) -> CoreResult<Idx> {
        self.add_equ_empty(Some(name), EquObject::Mapping, Cone::None)
    }

    pub fn add_funcs(&mut self, size: usize) -> CoreResult<IdxSet> {
        let start = self.total_m;
        for _ in 0..size {
            self.add_func()?;
        }
        Ok(IdxSet::compact(start, size))
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Remove an equation from the active model. Deleting twice is
    /// refused.
    pub fn delete_equ(&mut self, ei: Idx) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if !self.cmat.equ_is_active(ei) {
            return Err(CoreError::InvalidArgument(format!(
                "equation '{}' is not active, cannot delete it",
                self.equ_name(ei)
            )));
        }

        trace!(equ = %self.equ_name(ei), "DEL equ");
        self.cmat.rm_equ(ei, &mut self.vars, &mut self.n)?;
        self.m -= 1;

        if let Some(meta) = &mut self.equmeta {
            meta[ei.idx()].is_deleted = true;
        }
        Ok(())
    }

    /// Remove a variable from every equation it appears in, then from the
    /// active model. Deleting twice is refused; nonlinear occurrences are
    /// not yet supported.
    pub fn delete_var(&mut self, vi: Idx) -> CoreResult<()> {
        self.chk_vi(vi)?;
        if self.vars[vi.idx()].is_deleted {
            return Err(CoreError::InvalidArgument(format!(
                "variable '{}' is already deleted",
                self.var_name(vi)
            )));
        }

        let touched: Vec<(Idx, bool)> = self
            .cmat
            .col(vi)
            .map(|id| {
                let cell = self.cmat.cell(id);
                (cell.ei, cell.kind.is_nl() || cell.kind.is_placeholder())
            })
            .collect();

        if touched.iter().any(|&(_, nl)| nl) {
            return Err(CoreError::NotImplemented(
                "removing a variable with nonlinear occurrences",
            ));
        }

        for (ei, _) in touched {
            self.equ_rm_var(ei, vi)?;
        }

        // a variable that never appeared anywhere just goes inactive
        self.vars[vi.idx()].is_deleted = true;
        if let Some(meta) = &mut self.varmeta {
            meta[vi.idx()].is_deleted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_vars_families() {
        let mut ctr = Container::new("t");
        let v = ctr.add_posvars(2);
        assert_eq!(v.len(), 2);
        assert_eq!(ctr.vars[0].bnd.lb, 0.0);

        let w = ctr.add_varsinboxes(&[-1.0, -2.0], &[1.0, 2.0]).unwrap();
        assert_eq!(w.fget(0), Idx::new(2));
        assert_eq!(ctr.vars[3].bnd.ub, 2.0);

        assert_eq!(ctr.total_n, 4);
        // none are active yet: no equation mentions them
        assert_eq!(ctr.n, 0);

        assert!(ctr.add_varsinboxes(&[0.0], &[]).is_err());
    }

    #[test]
    fn test_named_vars() {
        let mut ctr = Container::new("t");
        let vi = ctr.add_var_named("profit");
        assert_eq!(ctr.var_name(vi), "profit");
        let v = ctr.add_vars_named(2, "y");
        assert_eq!(ctr.var_name(v.fget(1)), "y(1)");
        assert_eq!(ctr.var_by_name("profit").unwrap(), vi);
    }

    #[test]
    fn test_add_con_requires_cone() {
        let mut ctr = Container::new("t");
        assert!(ctr.add_con(Cone::None).is_err());
        let ei = ctr.add_con(Cone::RPlus).unwrap();
        assert_eq!(ctr.equs[ei.idx()].object, EquObject::ConeInclusion);
    }

    #[test]
    fn test_delete_equ_twice_refused() {
        let mut ctr = Container::new("t");
        let v = ctr.add_vars(1);
        let ei = ctr.add_func().unwrap();
        ctr.equ_addlin(ei, &v, &[1.0]).unwrap();

        ctr.delete_equ(ei).unwrap();
        assert!(ctr.delete_equ(ei).is_err());
    }

    #[test]
    fn test_delete_var() {
        let mut ctr = Container::new("t");
        let v = ctr.add_vars(2);
        let ei = ctr.add_func().unwrap();
        ctr.equ_addlin(ei, &v, &[1.0, 2.0]).unwrap();

        let v0 = v.fget(0);
        ctr.delete_var(v0).unwrap();
        assert!(ctr.vars[0].is_deleted);
        assert!(!ctr.equs[ei.idx()].lequ.contains(v0));
        assert!(ctr.delete_var(v0).is_err());
    }
}
