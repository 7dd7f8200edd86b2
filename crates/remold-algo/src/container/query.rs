//! Read-only queries and the SOS / option surface.

use remold_core::equ::EquObject;
use remold_core::{Avar, Cone, CoreError, CoreResult, Idx, VarType};

use super::{Container, SosGroup};

impl Container {
    fn count_active_cones(&self, cone: Cone) -> usize {
        (0..self.total_m)
            .filter(|&i| {
                let ei = Idx::new(i);
                self.cmat.equ_is_active(ei)
                    && self.equs[i].object == EquObject::ConeInclusion
                    && self.equs[i].cone == cone
            })
            .count()
    }

    /// Number of active `<=` constraints.
    pub fn get_nb_lequ_le(&self) -> usize {
        self.count_active_cones(Cone::RMinus)
    }

    /// Number of active `>=` constraints.
    pub fn get_nb_lequ_ge(&self) -> usize {
        self.count_active_cones(Cone::RPlus)
    }

    /// Number of active `=` constraints.
    pub fn get_nb_lequ_eq(&self) -> usize {
        self.count_active_cones(Cone::Zero)
    }

    fn count_vars<F: Fn(&remold_core::Var) -> bool>(&self, pred: F) -> usize {
        self.vars.iter().take(self.total_n).filter(|v| !v.is_deleted && pred(v)).count()
    }

    pub fn get_nb_var_bin(&self) -> usize {
        self.count_vars(|v| v.vtype == VarType::Binary)
    }

    pub fn get_nb_var_int(&self) -> usize {
        self.count_vars(|v| v.vtype == VarType::Integer)
    }

    /// Variables with a finite lower bound only.
    pub fn get_nb_var_lb(&self) -> usize {
        self.count_vars(|v| v.bnd.lb.is_finite() && !v.bnd.ub.is_finite())
    }

    /// Variables with a finite upper bound only.
    pub fn get_nb_var_ub(&self) -> usize {
        self.count_vars(|v| !v.bnd.lb.is_finite() && v.bnd.ub.is_finite())
    }

    /// Variables bounded on both sides (and not fixed).
    pub fn get_nb_var_interval(&self) -> usize {
        self.count_vars(remold_core::Var::is_interval)
    }

    /// Fixed variables: `|ub - lb| < 100 * epsilon`.
    pub fn get_nb_var_fx(&self) -> usize {
        self.count_vars(remold_core::Var::is_fixed)
    }

    pub fn get_nb_var_sos1(&self) -> usize {
        self.count_vars(|v| v.vtype == VarType::Sos1)
    }

    pub fn get_nb_var_sos2(&self) -> usize {
        self.count_vars(|v| v.vtype == VarType::Sos2)
    }

    pub fn is_var_valid(&self, vi: Idx) -> bool {
        vi.is_valid() && vi.idx() < self.total_n && !self.vars[vi.idx()].is_deleted
    }

    pub fn is_equ_valid(&self, ei: Idx) -> bool {
        ei.is_valid() && ei.idx() < self.total_m
    }

    /// The linear part of an equation: `(indices, coefficients)`.
    pub fn equ_getlin(&self, ei: Idx) -> CoreResult<(&[Idx], &[f64])> {
        self.chk_ei(ei)?;
        let lequ = &self.equs[ei.idx()].lequ;
        Ok((lequ.vis(), lequ.coeffs()))
    }

    // ------------------------------------------------------------------
    // SOS groups
    // ------------------------------------------------------------------

    fn set_var_sos(
        &mut self,
        v: &Avar,
        weights: Option<&[f64]>,
        vtype: VarType,
    ) -> CoreResult<usize> {
        if let Some(w) = weights {
            if w.len() != v.len() {
                return Err(CoreError::InvalidArgument(format!(
                    "{} weights for {} members",
                    w.len(),
                    v.len()
                )));
            }
        }

        for vi in v.iter() {
            self.chk_vi(vi)?;
            if self.vars[vi.idx()].is_conic {
                return Err(CoreError::InvalidArgument(format!(
                    "variable '{}' is conic",
                    self.var_name(vi)
                )));
            }
            self.vars[vi.idx()].vtype = vtype;
        }

        // absent weights mean uniform 1, 2, 3, ...
        let weights = match weights {
            Some(w) => w.to_vec(),
            None => (1..=v.len()).map(|i| i as f64).collect(),
        };

        let group = SosGroup { vars: v.clone(), weights };
        let groups = if vtype == VarType::Sos1 { &mut self.sos1 } else { &mut self.sos2 };
        groups.push(group);
        Ok(groups.len() - 1)
    }

    /// Declare an SOS1 group; `weights == None` uses the default ramp.
    pub fn set_var_sos1(&mut self, v: &Avar, weights: Option<&[f64]>) -> CoreResult<usize> {
        self.set_var_sos(v, weights, VarType::Sos1)
    }

    /// Declare an SOS2 group.
    pub fn set_var_sos2(&mut self, v: &Avar, weights: Option<&[f64]>) -> CoreResult<usize> {
        self.set_var_sos(v, weights, VarType::Sos2)
    }

    /// Groups an SOS1 variable belongs to.
    pub fn get_var_sos1(&self, vi: Idx) -> Vec<usize> {
        self.sos1
            .iter()
            .enumerate()
            .filter(|(_, g)| g.vars.contains(vi))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get_var_sos2(&self, vi: Idx) -> Vec<usize> {
        self.sos2
            .iter()
            .enumerate()
            .filter(|(_, g)| g.vars.contains(vi))
            .map(|(i, _)| i)
            .collect()
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    pub fn set_option_b(&mut self, name: &str, value: bool) -> CoreResult<()> {
        self.options.set_bool(name, value)
    }

    pub fn set_option_i(&mut self, name: &str, value: i64) -> CoreResult<()> {
        self.options.set_int(name, value)
    }

    pub fn set_option_d(&mut self, name: &str, value: f64) -> CoreResult<()> {
        self.options.set_double(name, value)
    }

    pub fn set_option_s(&mut self, name: &str, value: &str) -> CoreResult<()> {
        self.options.set_str(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remold_core::IdxSet;

    #[test]
    fn test_constraint_counts() {
        let mut ctr = Container::new("t");
        let v = ctr.add_vars(1);
        for cone in [Cone::RMinus, Cone::RMinus, Cone::RPlus, Cone::Zero] {
            let ei = ctr.add_con(cone).unwrap();
            ctr.equ_addlin(ei, &v, &[1.0]).unwrap();
        }
        // a mapping does not count
        let ei = ctr.add_func().unwrap();
        ctr.equ_addlin(ei, &v, &[1.0]).unwrap();

        assert_eq!(ctr.get_nb_lequ_le(), 2);
        assert_eq!(ctr.get_nb_lequ_ge(), 1);
        assert_eq!(ctr.get_nb_lequ_eq(), 1);
    }

    #[test]
    fn test_var_counts() {
        let mut ctr = Container::new("t");
        ctr.add_posvars(2); // lb only
        ctr.add_varsinbox(1, -1.0, 1.0); // interval
        ctr.add_varsinbox(1, 2.0, 2.0); // fixed
        let vi = ctr.add_var();
        ctr.vars[vi.idx()].vtype = VarType::Binary;

        assert_eq!(ctr.get_nb_var_lb(), 2);
        assert_eq!(ctr.get_nb_var_interval(), 1);
        assert_eq!(ctr.get_nb_var_fx(), 1);
        assert_eq!(ctr.get_nb_var_bin(), 1);
        assert_eq!(ctr.get_nb_var_ub(), 0);
    }

    #[test]
    fn test_validity() {
        let mut ctr = Container::new("t");
        let vi = ctr.add_var();
        assert!(ctr.is_var_valid(vi));
        assert!(!ctr.is_var_valid(Idx::new(5)));
        assert!(!ctr.is_var_valid(Idx::DELETED));
        assert!(!ctr.is_equ_valid(Idx::new(0)));
    }

    #[test]
    fn test_sos_groups() {
        let mut ctr = Container::new("t");
        let v = ctr.add_vars(3);
        let g = ctr.set_var_sos1(&v, None).unwrap();
        assert_eq!(ctr.get_nb_var_sos1(), 3);
        assert_eq!(ctr.sos1[g].weights, vec![1.0, 2.0, 3.0]);
        assert_eq!(ctr.get_var_sos1(v.fget(1)), vec![g]);

        let w = ctr.add_vars(2);
        assert!(ctr.set_var_sos2(&w, Some(&[1.0])).is_err());
        ctr.set_var_sos2(&w, Some(&[1.0, 4.0])).unwrap();
        assert_eq!(ctr.get_nb_var_sos2(), 2);

        let _ = IdxSet::empty();
    }

    #[test]
    fn test_getlin_roundtrip() {
        // a freshly added linear part reads back verbatim
        let mut ctr = Container::new("t");
        let v = ctr.add_posvars(3);
        let ei = ctr.add_func().unwrap();
        ctr.equ_addlin(ei, &v, &[1.5, -2.0, 0.25]).unwrap();

        let (vis, coeffs) = ctr.equ_getlin(ei).unwrap();
        assert_eq!(vis, &[Idx::new(0), Idx::new(1), Idx::new(2)]);
        assert_eq!(coeffs, &[1.5, -2.0, 0.25]);
        assert_eq!(ctr.get_nb_lequ_eq(), 0);
        assert_eq!(ctr.get_nb_lequ_le(), 0);
        assert_eq!(ctr.get_nb_lequ_ge(), 0);
    }
}
