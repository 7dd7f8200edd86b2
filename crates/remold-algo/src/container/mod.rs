//! The algebraic container.
//!
//! A [`Container`] is a self-contained in-memory model: variables,
//! equations, the constant pool, the incidence matrix, and the staged
//! transformation state (rosetta records, per-stage auxiliary subsets,
//! deferred-evaluation pairs, inherited index sets).
//!
//! Index spaces never shrink: `total_n`/`total_m` are high-water marks that
//! include deleted entries, `n`/`m` count what is currently active.

pub mod add;
pub mod edit;
pub mod query;

use hashbrown::HashSet;
use tracing::trace;

use remold_core::{
    Aequ, Avar, CoreError, CoreResult, Idx, IdxSet, Options, Pool, Var,
};

use crate::cmat::{CellKind, CMat};
use crate::equ::Equ;
use crate::fops::{Fops, FilterSubset};
use crate::workspace::Workspace;

/// Where an equation went under transformation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RosettaTarget {
    /// The equation still lives at its own index.
    #[default]
    Same,
    /// Replaced by a single equation.
    Replaced(Idx),
    /// Expanded into several equations.
    Expanded(Vec<Idx>),
}

/// Per-equation transformation record.
#[derive(Debug, Clone, Default)]
pub struct EquRosetta {
    pub target: RosettaTarget,
    /// The replacement has all signs flipped relative to the original.
    pub flipped: bool,
}

/// Resolved view of an equation after following its rosetta chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquInfo {
    pub ei: Idx,
    pub expanded: bool,
    pub flipped: bool,
    /// The equation belongs to an earlier stage: edits must duplicate.
    pub copy_if_modif: bool,
}

/// A variable to recompute from an equation during post-solve reporting.
#[derive(Debug, Clone, Copy)]
pub struct EquVarPair {
    pub equ: Idx,
    pub var: Idx,
    /// Evaluation-order cost, filled by the dependency sort.
    pub cost: u32,
}

/// Per-stage list of deferred evaluations.
#[derive(Debug, Clone, Default)]
pub struct EquVarEvals {
    pub pairs: Vec<EquVarPair>,
    marked: HashSet<Idx>,
}

impl EquVarEvals {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Index sets tying a compressed container back to its source: the same
/// entities in the current index space and in the source's.
#[derive(Debug, Clone)]
pub struct Inherited {
    pub cur: IdxSet,
    pub src: IdxSet,
}

impl Inherited {
    /// Source index of a current index, if inherited.
    pub fn upstream(&self, i: Idx) -> Idx {
        match self.cur.find(i) {
            Some(pos) => self.src.fget(pos),
            None => Idx::NOT_FOUND,
        }
    }
}

/// SOS group: member variables with their weights.
#[derive(Debug, Clone)]
pub struct SosGroup {
    pub vars: Avar,
    pub weights: Vec<f64>,
}

/// Role of an equation in the surrounding program structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EquRole {
    #[default]
    Undefined,
    Objective,
    Constraint,
    ViFunction,
}

/// Optional per-equation metadata, present when the program hierarchy is in
/// use.
#[derive(Debug, Clone)]
pub struct EquMeta {
    pub role: EquRole,
    /// Paired (dual) variable, for complementarity relations.
    pub dual: Idx,
    pub mp_id: u32,
    pub is_deleted: bool,
    pub is_flipped: bool,
}

impl EquMeta {
    pub fn new() -> EquMeta {
        EquMeta {
            role: EquRole::Undefined,
            dual: Idx::NA,
            mp_id: 0,
            is_deleted: false,
            is_flipped: false,
        }
    }
}

impl Default for EquMeta {
    fn default() -> EquMeta {
        EquMeta::new()
    }
}

/// Optional per-variable metadata.
#[derive(Debug, Clone)]
pub struct VarMeta {
    /// Paired (dual) equation.
    pub dual: Idx,
    pub mp_id: u32,
    pub is_deleted: bool,
    pub perp_to_vi_function: bool,
}

impl VarMeta {
    pub fn new() -> VarMeta {
        VarMeta { dual: Idx::NA, mp_id: 0, is_deleted: false, perp_to_vi_function: false }
    }
}

impl Default for VarMeta {
    fn default() -> VarMeta {
        VarMeta::new()
    }
}

/// A self-contained in-memory model.
#[derive(Debug)]
pub struct Container {
    pub name: String,

    /// Active counts (post-filter).
    pub n: usize,
    pub m: usize,

    /// High-water marks, including deleted entries.
    pub total_n: usize,
    pub total_m: usize,

    /// Reservation watermarks.
    pub max_n: usize,
    pub max_m: usize,

    pub vars: Vec<Var>,
    pub equs: Vec<Equ>,
    pub pool: Pool,
    pub cmat: CMat,

    pub var_names: Vec<String>,
    pub equ_names: Vec<String>,

    pub equ_rosetta: Vec<EquRosetta>,
    /// Stage at which each equation last became writable.
    pub equ_stage: Vec<u8>,
    /// Monotonically non-decreasing transformation epoch.
    pub current_stage: u8,

    /// Auxiliary presolve subsets attached per stage.
    pub stage_subsets: Vec<Vec<FilterSubset>>,
    /// Deferred evaluations per stage.
    pub equvar_evals: Vec<EquVarEvals>,

    pub equ_inherited: Option<Inherited>,
    pub var_inherited: Option<Inherited>,

    /// Translation scratch while this container is being compressed.
    pub rosetta_vars: Option<Vec<Idx>>,
    pub rosetta_equs: Option<Vec<Idx>>,

    pub fops: Option<Fops>,

    /// Variables frozen at their current value by the active subset.
    pub fixed_vars: Avar,
    /// Equations marked for sign-flipping by the next transform pass.
    pub flipped_equs: Vec<Idx>,

    pub equmeta: Option<Vec<EquMeta>>,
    pub varmeta: Option<Vec<VarMeta>>,

    pub sos1: Vec<SosGroup>,
    pub sos2: Vec<SosGroup>,

    pub objequ: Idx,
    pub options: Options,
    pub workspace: Workspace,
}

impl Container {
    pub fn new(name: &str) -> Container {
        Container {
            name: name.to_string(),
            n: 0,
            m: 0,
            total_n: 0,
            total_m: 0,
            max_n: 0,
            max_m: 0,
            vars: Vec::new(),
            equs: Vec::new(),
            pool: Pool::new_gams(),
            cmat: CMat::new(),
            var_names: Vec::new(),
            equ_names: Vec::new(),
            equ_rosetta: Vec::new(),
            equ_stage: Vec::new(),
            current_stage: 0,
            stage_subsets: vec![Vec::new()],
            equvar_evals: vec![EquVarEvals::default()],
            equ_inherited: None,
            var_inherited: None,
            rosetta_vars: None,
            rosetta_equs: None,
            fops: None,
            fixed_vars: IdxSet::empty(),
            flipped_equs: Vec::new(),
            equmeta: None,
            varmeta: None,
            sos1: Vec::new(),
            sos2: Vec::new(),
            objequ: Idx::NA,
            options: Options::new(),
            workspace: Workspace::new(),
        }
    }

    // ------------------------------------------------------------------
    // Dimensions and reservations
    // ------------------------------------------------------------------

    pub fn nvars(&self) -> usize {
        self.n
    }

    pub fn nequs(&self) -> usize {
        self.m
    }

    pub fn nvars_total(&self) -> usize {
        self.total_n
    }

    pub fn nequs_total(&self) -> usize {
        self.total_m
    }

    pub fn chk_ei(&self, ei: Idx) -> CoreResult<usize> {
        ei.inbounds(self.total_m)
    }

    pub fn chk_vi(&self, vi: Idx) -> CoreResult<usize> {
        vi.inbounds(self.total_n)
    }

    /// Grow the variable reservation to hold `extra` more variables.
    pub fn reserve_vars(&mut self, extra: usize) {
        if self.max_n < self.total_n + extra {
            self.max_n = (self.total_n + extra).max(2 * self.max_n);
            self.cmat.resize(self.max_n, self.max_m);
        }
    }

    /// Grow the equation reservation to hold `extra` more equations.
    pub fn reserve_equs(&mut self, extra: usize) {
        if self.max_m < self.total_m + extra {
            self.max_m = (self.total_m + extra).max(2 * self.max_m);
            self.cmat.resize(self.max_n, self.max_m);
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    pub fn var_name(&self, vi: Idx) -> &str {
        self.var_names.get(vi.idx()).map_or("<unknown>", String::as_str)
    }

    pub fn equ_name(&self, ei: Idx) -> &str {
        self.equ_names.get(ei.idx()).map_or("<unknown>", String::as_str)
    }

    /// Equation index by name. More than one match is an error.
    pub fn equ_by_name(&self, name: &str) -> CoreResult<Idx> {
        let mut found = None;
        for (i, n) in self.equ_names.iter().enumerate() {
            if n == name {
                if found.is_some() {
                    return Err(CoreError::DuplicateValue(format!(
                        "several equations are named '{name}'"
                    )));
                }
                found = Some(Idx::new(i));
            }
        }
        found.ok_or_else(|| CoreError::NotFound(format!("no equation named '{name}'")))
    }

    pub fn var_by_name(&self, name: &str) -> CoreResult<Idx> {
        let mut found = None;
        for (i, n) in self.var_names.iter().enumerate() {
            if n == name {
                if found.is_some() {
                    return Err(CoreError::DuplicateValue(format!(
                        "several variables are named '{name}'"
                    )));
                }
                found = Some(Idx::new(i));
            }
        }
        found.ok_or_else(|| CoreError::NotFound(format!("no variable named '{name}'")))
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    /// Enter the next transformation stage.
    pub fn inc_stage(&mut self) {
        self.current_stage += 1;
        self.stage_subsets.push(Vec::new());
        self.equvar_evals.push(EquVarEvals::default());
    }

    /// Attach an auxiliary presolve subset to the current stage.
    pub fn add_stage_subset(&mut self, fs: FilterSubset) {
        self.stage_subsets[self.current_stage as usize].push(fs);
    }

    /// Editing an equation from an earlier stage must go through
    /// duplicate-then-edit.
    pub fn equ_is_readonly(&self, ei: Idx) -> bool {
        self.equ_stage[ei.idx()] < self.current_stage
    }

    /// Mark a variable for deferred evaluation via an equation.
    ///
    /// A variable may only ever be paired with one equation; re-adding the
    /// same pair is a no-op.
    pub fn add_eval_equvar(&mut self, ei: Idx, vi: Idx) -> CoreResult<()> {
        self.chk_ei(ei)?;
        self.chk_vi(vi)?;

        let evals = &mut self.equvar_evals[self.current_stage as usize];
        if evals.marked.contains(&vi) {
            for pair in &evals.pairs {
                if pair.var == vi {
                    if pair.equ == ei {
                        return Ok(());
                    }
                    return Err(CoreError::RuntimeError(format!(
                        "variable {vi} is already marked for evaluation via equation {}, \
                         cannot also use equation {ei}",
                        pair.equ
                    )));
                }
            }
        }

        evals.marked.insert(vi);
        evals.pairs.push(EquVarPair { equ: ei, var: vi, cost: 0 });
        trace!(var = %vi, equ = %ei, "variable marked for deferred evaluation");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rosetta chain
    // ------------------------------------------------------------------

    /// Resolve an equation index through possible transformations.
    ///
    /// The chain is followed until it reaches a fixed point or an expanded
    /// record; the flipped flag accumulates along the way.
    pub fn get_equation(&self, ei: Idx) -> CoreResult<EquInfo> {
        let mut ei = ei;
        self.chk_ei(ei)?;

        let mut flipped = false;
        loop {
            let rosetta = &self.equ_rosetta[ei.idx()];
            match &rosetta.target {
                RosettaTarget::Same => {
                    return Ok(EquInfo {
                        ei,
                        expanded: false,
                        flipped,
                        copy_if_modif: self.equ_is_readonly(ei),
                    })
                }
                RosettaTarget::Replaced(next) => {
                    flipped ^= rosetta.flipped;
                    ei = *next;
                    self.chk_ei(ei)?;
                }
                RosettaTarget::Expanded(list) => {
                    let first = *list.first().ok_or_else(|| {
                        CoreError::Inconsistency(format!(
                            "equation {ei} expanded into an empty list"
                        ))
                    })?;
                    self.chk_ei(first)?;
                    return Ok(EquInfo {
                        ei: first,
                        expanded: true,
                        flipped,
                        copy_if_modif: self.equ_is_readonly(first),
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Incidence queries
    // ------------------------------------------------------------------

    /// Jacobian information of a (equation, variable) incidence, if present:
    /// `(coefficient, is_nonlinear)`.
    pub fn equ_contains_var(&self, ei: Idx, vi: Idx) -> Option<(Option<f64>, bool)> {
        self.cmat
            .row(ei)
            .map(|id| self.cmat.cell(id))
            .find(|cell| cell.vi == vi)
            .map(|cell| (cell.value, cell.kind.is_nl()))
    }

    /// Incidence walk over an equation, including rows parked by deletion.
    pub fn walk_all_equ(&self, ei: Idx) -> impl Iterator<Item = (Idx, Option<f64>, bool)> + '_ {
        let iter = if self.cmat.equ_is_active(ei) {
            self.cmat.row(ei)
        } else {
            self.cmat.deleted_row(ei)
        };
        iter.map(|id| self.cmat.cell(id))
            .filter(|cell| !cell.kind.is_placeholder())
            .map(|cell| (cell.vi, cell.value, cell.kind.is_nl()))
    }

    // ------------------------------------------------------------------
    // Consistency
    // ------------------------------------------------------------------

    /// Exhaustive container-matrix verification.
    ///
    /// For every active equation, the linear variables of its `Lequ` and
    /// the nonlinear variables of its tree are tagged, then the row is
    /// walked and every cell checked against its tag; both sides must
    /// account for each other exactly.
    pub fn chk_expensive(&self) -> CoreResult<()> {
        trace!(container = %self.name, "checking container consistency");

        const T_NONE: u8 = 0;
        const T_LIN: u8 = 1;
        const T_NL: u8 = 3;
        const T_CHECKED: u8 = 16;

        let guard = self.workspace.borrow()?;
        let tags: &mut [u8] = guard.alloc_slice(self.total_n);

        for eidx in 0..self.total_m {
            let ei = Idx::new(eidx);
            let equ = &self.equs[eidx];

            let Some(head) = self.cmat.equ_head(ei) else {
                if let Some(meta) = &self.equmeta {
                    if !meta[eidx].is_deleted && self.cmat.deleted_equ_head(ei).is_some() {
                        return Err(CoreError::Inconsistency(format!(
                            "equation '{}' is absent from the container matrix but not \
                             marked deleted",
                            self.equ_name(ei)
                        )));
                    }
                }
                continue;
            };

            let head_cell = self.cmat.cell(head);
            if head_cell.kind.is_placeholder() {
                if head_cell.kind == CellKind::CstEqu {
                    if head_cell.vi.is_valid()
                        || head_cell.ei != ei
                        || self.cmat.row(ei).count() != 1
                    {
                        return Err(CoreError::Inconsistency(format!(
                            "placeholder for equation '{}' is malformed",
                            self.equ_name(ei)
                        )));
                    }
                    if equ.has_lin() || equ.has_nl() || !equ.raw_cst().is_finite() {
                        return Err(CoreError::Inconsistency(format!(
                            "constant-equation placeholder for '{}' does not match its \
                             algebraic content",
                            self.equ_name(ei)
                        )));
                    }
                }
                continue;
            }

            tags.fill(T_NONE);

            // tag the linear variables
            let mut n_lin = 0usize;
            for (vi, _) in equ.lequ.iter() {
                let vpos = self.chk_vi(vi)?;
                if tags[vpos] != T_NONE {
                    return Err(CoreError::Inconsistency(format!(
                        "variable '{}' appears twice in the linear part of '{}'",
                        self.var_name(vi),
                        self.equ_name(ei)
                    )));
                }
                tags[vpos] = T_LIN;
                n_lin += 1;
            }

            // tag the nonlinear variables
            let mut n_nl = 0usize;
            if let Some(tree) = &equ.tree {
                for vi in tree.collect_vars() {
                    let vpos = self.chk_vi(vi)?;
                    if tags[vpos] != T_NONE {
                        return Err(CoreError::Inconsistency(format!(
                            "variable '{}' is both linear and nonlinear in '{}'",
                            self.var_name(vi),
                            self.equ_name(ei)
                        )));
                    }
                    tags[vpos] = T_NL;
                    n_nl += 1;
                }
            }

            // walk the row and match each cell against its tag
            for id in self.cmat.row(ei) {
                let cell = self.cmat.cell(id);
                if cell.ei != ei {
                    return Err(CoreError::Inconsistency(format!(
                        "cell in row {ei} claims equation {}",
                        cell.ei
                    )));
                }
                let vpos = self.chk_vi(cell.vi)?;
                if !self.cmat.var_is_active(cell.vi) {
                    return Err(CoreError::Inconsistency(format!(
                        "variable '{}' of equation '{}' has no column",
                        self.var_name(cell.vi),
                        self.equ_name(ei)
                    )));
                }
                if tags[vpos] & T_CHECKED != 0 {
                    return Err(CoreError::Inconsistency(format!(
                        "variable '{}' appears twice in the row of '{}'",
                        self.var_name(cell.vi),
                        self.equ_name(ei)
                    )));
                }

                match tags[vpos] {
                    T_LIN => {
                        if cell.kind != CellKind::Lin {
                            return Err(CoreError::Inconsistency(format!(
                                "variable '{}' is linear in '{}' but tagged {:?} in the \
                                 container matrix",
                                self.var_name(cell.vi),
                                self.equ_name(ei),
                                cell.kind
                            )));
                        }
                        let (coeff, _) = equ.lequ.find(cell.vi).expect("tagged linear");
                        let cell_val = cell.value.ok_or_else(|| {
                            CoreError::Inconsistency(format!(
                                "linear cell for '{}' has no coefficient",
                                self.var_name(cell.vi)
                            ))
                        })?;
                        if (cell_val - coeff).abs() > f64::EPSILON {
                            return Err(CoreError::Inconsistency(format!(
                                "variable '{}' has coefficient {cell_val} in the matrix \
                                 but {coeff} in equation '{}'",
                                self.var_name(cell.vi),
                                self.equ_name(ei)
                            )));
                        }
                        n_lin -= 1;
                    }
                    T_NL => {
                        if !cell.kind.is_nl() {
                            return Err(CoreError::Inconsistency(format!(
                                "variable '{}' is in the tree of '{}' but not marked \
                                 nonlinear in the container matrix",
                                self.var_name(cell.vi),
                                self.equ_name(ei)
                            )));
                        }
                        n_nl -= 1;
                    }
                    T_NONE => {
                        return Err(CoreError::Inconsistency(format!(
                            "variable '{}' is in the container matrix but not in the \
                             algebraic content of '{}'",
                            self.var_name(cell.vi),
                            self.equ_name(ei)
                        )));
                    }
                    _ => {
                        if cell.kind == CellKind::Quad {
                            return Err(CoreError::NotImplemented(
                                "quadratic container matrix cells",
                            ));
                        }
                        return Err(CoreError::Inconsistency(format!(
                            "unexpected tag for variable '{}'",
                            self.var_name(cell.vi)
                        )));
                    }
                }
                tags[vpos] |= T_CHECKED;
            }

            if n_lin > 0 || n_nl > 0 {
                return Err(CoreError::Inconsistency(format!(
                    "equation '{}': {n_lin} linear and {n_nl} nonlinear variables are \
                     absent from the container matrix",
                    self.equ_name(ei)
                )));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Model-level accessors
    // ------------------------------------------------------------------

    pub fn set_objequ(&mut self, ei: Idx) -> CoreResult<()> {
        self.chk_ei(ei)?;
        self.objequ = ei;
        Ok(())
    }

    pub fn objequ(&self) -> Idx {
        self.objequ
    }

    pub fn get_nltree(&self, ei: Idx) -> CoreResult<Option<&crate::nltree::NlTree>> {
        self.chk_ei(ei)?;
        Ok(self.equs[ei.idx()].tree.as_ref())
    }

    /// Mark equations to be sign-flipped by the next transform pass.
    pub fn mark_equs_as_flipped(&mut self, e: &Aequ) -> CoreResult<()> {
        for ei in e.iter() {
            self.chk_ei(ei)?;
            self.flipped_equs.push(ei);
        }
        Ok(())
    }

    pub fn needs_transformation(&self) -> bool {
        !self.flipped_equs.is_empty()
    }

    /// Fix every variable whose bounds have collapsed: level snaps to the
    /// bound and the basis records the fixing.
    pub fn fix_collapsed_vars(&mut self) {
        for v in self.vars.iter_mut().take(self.total_n) {
            if !v.is_deleted && v.is_fixed() {
                v.value = Some(v.bnd.lb);
                v.basis = remold_core::BasisStatus::Fixed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remold_core::equ::EquObject;
    use remold_core::Cone;

    #[test]
    fn test_rosetta_chain() {
        let mut ctr = Container::new("t");
        ctr.reserve_equs(4);
        for _ in 0..4 {
            ctr.add_equ_empty(None, EquObject::Mapping, Cone::None).unwrap();
        }

        // 0 -> 1 (flipped) -> 3
        ctr.equ_rosetta[0] =
            EquRosetta { target: RosettaTarget::Replaced(Idx::new(1)), flipped: true };
        ctr.equ_rosetta[1] =
            EquRosetta { target: RosettaTarget::Replaced(Idx::new(3)), flipped: false };

        let info = ctr.get_equation(Idx::new(0)).unwrap();
        assert_eq!(info.ei, Idx::new(3));
        assert!(info.flipped);
        assert!(!info.expanded);

        let info = ctr.get_equation(Idx::new(2)).unwrap();
        assert_eq!(info.ei, Idx::new(2));
        assert!(!info.flipped);
    }

    #[test]
    fn test_expanded_rosetta() {
        let mut ctr = Container::new("t");
        ctr.reserve_equs(3);
        for _ in 0..3 {
            ctr.add_equ_empty(None, EquObject::Mapping, Cone::None).unwrap();
        }
        ctr.equ_rosetta[0] = EquRosetta {
            target: RosettaTarget::Expanded(vec![Idx::new(1), Idx::new(2)]),
            flipped: false,
        };
        let info = ctr.get_equation(Idx::new(0)).unwrap();
        assert!(info.expanded);
        assert_eq!(info.ei, Idx::new(1));
    }

    #[test]
    fn test_stage_readonly() {
        let mut ctr = Container::new("t");
        ctr.reserve_equs(1);
        let ei = ctr.add_equ_empty(None, EquObject::Mapping, Cone::None).unwrap();
        assert!(!ctr.equ_is_readonly(ei));
        ctr.inc_stage();
        assert!(ctr.equ_is_readonly(ei));
    }

    #[test]
    fn test_add_eval_equvar_duplicate() {
        let mut ctr = Container::new("t");
        ctr.reserve_equs(2);
        ctr.reserve_vars(1);
        let e0 = ctr.add_equ_empty(None, EquObject::Mapping, Cone::None).unwrap();
        let e1 = ctr.add_equ_empty(None, EquObject::Mapping, Cone::None).unwrap();
        let v = ctr.add_var();

        ctr.add_eval_equvar(e0, v).unwrap();
        // same pair: fine
        ctr.add_eval_equvar(e0, v).unwrap();
        // different equation for the same variable: refused
        assert!(ctr.add_eval_equvar(e1, v).is_err());
    }
}
