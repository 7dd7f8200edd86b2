//! Filter ops: the projection layer.
//!
//! A [`Fops`] decides which equations and variables belong to the current
//! view of a container, sizes the filtered model, and rewrites opcode
//! streams when a filtered view is exported. Five variants exist; they
//! share one interface and differ in where the membership information
//! comes from.
//!
//! Predicates take the source container as an argument instead of holding a
//! back-pointer to it, so a fops can live inside the container it filters.

use remold_core::{Aequ, Avar, CoreError, CoreResult, Idx, IdxSet, Pool, PoolIdx, Var};

use crate::container::Container;
use crate::instr::{GamsOp, OpArgKind, OpcodeStream};

/// Explicitly suppressed entries of an [`FilterActive`] view.
#[derive(Debug, Clone, Default)]
pub struct FilterDeactivated {
    vars: Vec<Idx>,
    equs: Vec<Idx>,
}

impl FilterDeactivated {
    fn add(list: &mut Vec<Idx>, i: Idx) {
        if let Err(pos) = list.binary_search(&i) {
            list.insert(pos, i);
        }
    }

    fn contains_var(&self, vi: Idx) -> bool {
        self.vars.binary_search(&vi).is_ok()
    }

    fn contains_equ(&self, ei: Idx) -> bool {
        self.equs.binary_search(&ei).is_ok()
    }
}

/// Keep whatever is active in the container, minus explicit deactivations.
#[derive(Debug, Clone, Default)]
pub struct FilterActive {
    pub deactivated: FilterDeactivated,
    vars_permutation: Option<Vec<Idx>>,
}

/// Pool side-table of a subset filter: which pool slots carry the frozen
/// values of filtered-out variables, and the extra slots holding negated
/// values for fused-negation rewrites.
#[derive(Debug, Clone, Default)]
pub struct NlPoolVars {
    /// First pool slot of the frozen variable values; slot `offset + vi`
    /// holds the value of variable `vi`. Zero means "not activated".
    pub offset_vars_pool: PoolIdx,
    /// Per-variable slots holding `-value`, allocated on demand.
    neg_slots: Vec<(Idx, PoolIdx)>,
}

impl NlPoolVars {
    /// Pool entry holding `-value(vi)` in the export's pool, interned on
    /// first use. The cache only lives for one export: values are frozen
    /// at transform time, and a later export re-freezes them.
    fn negvar_slot(&mut self, vi: Idx, vars: &[Var], pool: &mut Pool) -> CoreResult<PoolIdx> {
        if let Some(&(_, slot)) = self.neg_slots.iter().find(|(v, _)| *v == vi) {
            return Ok(slot);
        }
        let slot = pool.get(-vars[vi.idx()].value.unwrap_or(0.0))?;
        self.neg_slots.push((vi, slot));
        Ok(slot)
    }
}

/// Keep only an explicit subset of variables and equations (that are also
/// active in the source), freezing everything else at its current value.
#[derive(Debug, Clone)]
pub struct FilterSubset {
    pub vars: Avar,
    pub equs: Aequ,
    pub nlpoolvars: NlPoolVars,
    vars_permutation: Option<Vec<Idx>>,
}

impl FilterSubset {
    /// Assemble a subset from blocks of variables and equations.
    pub fn new(vars: Vec<Avar>, equs: Vec<Aequ>) -> CoreResult<FilterSubset> {
        let mut v = IdxSet::block(vars.len());
        for block in vars {
            v.extend(block)?;
        }
        let mut e = IdxSet::block(equs.len());
        for block in equs {
            e.extend(block)?;
        }
        Ok(FilterSubset {
            vars: v,
            equs: e,
            nlpoolvars: NlPoolVars::default(),
            vars_permutation: None,
        })
    }

    fn keep_var(&self, ctr: &Container, vi: Idx) -> bool {
        self.vars.contains(vi)
            && !ctr.fixed_vars.contains(vi)
            && ctr.cmat.var_is_active(vi)
    }

    fn keep_equ(&self, ctr: &Container, ei: Idx) -> bool {
        ctr.cmat.equ_is_active(ei) && self.equs.contains(ei)
    }

    fn sizes(&self, ctr: &Container) -> (usize, usize) {
        let n = self.vars.iter().filter(|&vi| self.keep_var(ctr, vi)).count();
        let m = self.equs.iter().filter(|&ei| self.keep_equ(ctr, ei)).count();
        (n, m)
    }
}

/// Membership table of one math program: the equations and variables it
/// owns, with sorted index lists.
#[derive(Debug, Clone)]
pub struct MpMembership {
    pub mp_id: u32,
    pub equs: Vec<Idx>,
    pub vars: Vec<Idx>,
}

impl MpMembership {
    pub fn new(mp_id: u32, mut equs: Vec<Idx>, mut vars: Vec<Idx>) -> MpMembership {
        equs.sort();
        vars.sort();
        MpMembership { mp_id, equs, vars }
    }
}

/// Subset derived from a sub-hierarchy of the program dag, composing with
/// an optional parent view.
#[derive(Debug, Clone)]
pub struct FilterSubDag {
    pub subdag_root: u32,
    pub fs: FilterSubset,
    pub parent: Option<Box<Fops>>,
}

/// Keep the equations of one math program; variables follow container
/// activity.
#[derive(Debug, Clone)]
pub struct FilterSingleMp {
    pub mp: MpMembership,
    pub parent: Option<Box<Fops>>,
}

/// Keep the equations of a set of math programs.
#[derive(Debug, Clone)]
pub struct FilterNash {
    pub mps: Vec<MpMembership>,
    pub parent: Option<Box<Fops>>,
}

/// Polymorphic predicate bundle selecting the current view of a container.
#[derive(Debug, Clone, Default)]
pub enum Fops {
    /// Passes everything.
    #[default]
    Empty,
    Active(FilterActive),
    Subset(FilterSubset),
    EmpDagSubDag(FilterSubDag),
    EmpDagSingleMp(FilterSingleMp),
    EmpDagNash(FilterNash),
}

impl Fops {
    pub fn type_name(&self) -> &'static str {
        match self {
            Fops::Empty => "empty",
            Fops::Active(_) => "active",
            Fops::Subset(_) => "subset",
            Fops::EmpDagSubDag(_) => "empdag subdag",
            Fops::EmpDagSingleMp(_) => "single MP",
            Fops::EmpDagNash(_) => "empdag Nash",
        }
    }

    pub fn keep_var(&self, ctr: &Container, vi: Idx) -> bool {
        match self {
            Fops::Empty => true,
            Fops::Active(f) => {
                ctr.cmat.var_is_active(vi) && !f.deactivated.contains_var(vi)
            }
            Fops::Subset(f) => f.keep_var(ctr, vi),
            Fops::EmpDagSubDag(f) => {
                f.fs.keep_var(ctr, vi)
                    && f.parent.as_ref().is_none_or(|p| p.keep_var(ctr, vi))
            }
            Fops::EmpDagSingleMp(f) => {
                ctr.cmat.var_is_active(vi)
                    && f.parent.as_ref().is_none_or(|p| p.keep_var(ctr, vi))
            }
            Fops::EmpDagNash(f) => {
                ctr.cmat.var_is_active(vi)
                    && f.parent.as_ref().is_none_or(|p| p.keep_var(ctr, vi))
            }
        }
    }

    pub fn keep_equ(&self, ctr: &Container, ei: Idx) -> bool {
        match self {
            Fops::Empty => true,
            Fops::Active(f) => {
                ctr.cmat.equ_is_active(ei) && !f.deactivated.contains_equ(ei)
            }
            Fops::Subset(f) => f.keep_equ(ctr, ei),
            Fops::EmpDagSubDag(f) => {
                f.fs.keep_equ(ctr, ei)
                    && f.parent.as_ref().is_none_or(|p| p.keep_equ(ctr, ei))
            }
            Fops::EmpDagSingleMp(f) => {
                f.mp.equs.binary_search(&ei).is_ok()
                    && f.parent.as_ref().is_none_or(|p| p.keep_equ(ctr, ei))
            }
            Fops::EmpDagNash(f) => {
                f.mps.iter().any(|mp| mp.equs.binary_search(&ei).is_ok())
                    && f.parent.as_ref().is_none_or(|p| p.keep_equ(ctr, ei))
            }
        }
    }

    /// `(active variables, active equations)` of the filtered view.
    pub fn sizes(&self, ctr: &Container) -> (usize, usize) {
        match self {
            Fops::Empty => (ctr.n, ctr.m),
            Fops::Active(f) => (
                ctr.n - f.deactivated.vars.len(),
                ctr.m - f.deactivated.equs.len(),
            ),
            Fops::Subset(f) => f.sizes(ctr),
            Fops::EmpDagSubDag(f) => f.fs.sizes(ctr),
            Fops::EmpDagSingleMp(f) => (ctr.n, f.mp.equs.len()),
            Fops::EmpDagNash(f) => (ctr.n, f.mps.iter().map(|mp| mp.equs.len()).sum()),
        }
    }

    /// The user permutation for a kept variable, when one is set.
    pub fn vars_permutation(&self, vi: Idx) -> Option<Idx> {
        let table = match self {
            Fops::Active(f) => f.vars_permutation.as_ref(),
            Fops::Subset(f) => f.vars_permutation.as_ref(),
            _ => None,
        }?;
        table.get(vi.idx()).copied()
    }

    pub fn has_vars_permutation(&self) -> bool {
        matches!(
            self,
            Fops::Active(FilterActive { vars_permutation: Some(_), .. })
                | Fops::Subset(FilterSubset { vars_permutation: Some(_), .. })
        )
    }

    /// Install a user permutation overriding the default compaction order.
    pub fn set_vars_permutation(&mut self, vperm: Vec<Idx>) -> CoreResult<()> {
        let slot = match self {
            Fops::Active(f) => &mut f.vars_permutation,
            Fops::Subset(f) => &mut f.vars_permutation,
            other => {
                return Err(CoreError::RuntimeError(format!(
                    "fops of type {} does not take a permutation",
                    other.type_name()
                )))
            }
        };
        if slot.is_some() {
            return Err(CoreError::RuntimeError(
                "permutation data is already set".into(),
            ));
        }
        *slot = Some(vperm);
        Ok(())
    }

    /// Suppress one equation from an `Active` view.
    pub fn deactivate_equ(&mut self, ei: Idx) -> CoreResult<()> {
        match self {
            Fops::Active(f) => {
                FilterDeactivated::add(&mut f.deactivated.equs, ei);
                Ok(())
            }
            other => Err(CoreError::RuntimeError(format!(
                "cannot deactivate entries of a {} fops",
                other.type_name()
            ))),
        }
    }

    /// Suppress one variable from an `Active` view.
    pub fn deactivate_var(&mut self, vi: Idx) -> CoreResult<()> {
        match self {
            Fops::Active(f) => {
                FilterDeactivated::add(&mut f.deactivated.vars, vi);
                Ok(())
            }
            other => Err(CoreError::RuntimeError(format!(
                "cannot deactivate entries of a {} fops",
                other.type_name()
            ))),
        }
    }

    /// Rewrite an opcode stream in place for the filtered index space.
    ///
    /// Every variable operand is translated through `rosetta_vars`. Under a
    /// subset view, a filtered-out variable's operand is swapped to the
    /// pool-constant form of the opcode, reading the variable's frozen
    /// value; a fused negation reads a dedicated negated slot instead. The
    /// terminating `Store` is updated to the new equation index.
    pub fn transform_gams_opcode(
        &mut self,
        rosetta_vars: &[Idx],
        ei_new: Idx,
        stream: &mut OpcodeStream,
        vars: &[Var],
        pool: &mut Pool,
    ) -> CoreResult<()> {
        let len = stream.len();
        if len == 0 {
            return Ok(());
        }

        let pool_table = match self {
            Fops::Subset(f) => Some(&mut f.nlpoolvars),
            Fops::EmpDagSubDag(f) => Some(&mut f.fs.nlpoolvars),
            _ => None,
        };

        match pool_table {
            None => {
                // plain renumbering: every variable must survive the filter
                for i in 0..len {
                    if stream.instrs[i].oparg_kind() == OpArgKind::Var {
                        let vi = Idx::new((stream.args[i] - 1) as usize);
                        let vi_new = rosetta_vars[vi.idx()];
                        if !vi_new.is_valid() {
                            return Err(CoreError::Inconsistency(format!(
                                "variable {vi} was filtered out but appears in the \
                                 bytecode of equation {ei_new}"
                            )));
                        }
                        stream.args[i] = vi_new.idx() as i32 + 1;
                    }
                }
            }
            Some(table) => {
                let offset = table.offset_vars_pool;
                if offset == 0 {
                    return Err(CoreError::RuntimeError(
                        "subset filter used before its pool slots were reserved".into(),
                    ));
                }
                for i in 0..len {
                    if stream.instrs[i].oparg_kind() != OpArgKind::Var {
                        continue;
                    }
                    let vi = Idx::new((stream.args[i] - 1) as usize);
                    let vi_new = rosetta_vars[vi.idx()];

                    if vi_new.is_valid() {
                        stream.args[i] = vi_new.idx() as i32 + 1;
                    } else {
                        match stream.instrs[i].var_to_cst()? {
                            Some(op) => {
                                stream.instrs[i] = op;
                                stream.args[i] = (offset + vi.idx() as u32) as i32;
                            }
                            None => {
                                // fused negation: push the negated value
                                stream.instrs[i] = GamsOp::PushI;
                                stream.args[i] =
                                    table.negvar_slot(vi, vars, pool)? as i32;
                            }
                        }
                    }
                }
            }
        }

        // update the terminator to the new equation index
        if stream.instrs[len - 1] != GamsOp::Store {
            return Err(CoreError::Inconsistency(
                "opcode stream does not end with a Store".into(),
            ));
        }
        stream.args[len - 1] = ei_new.idx() as i32 + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remold_core::IdxSet;

    fn small_container() -> Container {
        let mut ctr = Container::new("t");
        let v = ctr.add_vars(4);
        let ei = ctr.add_func().unwrap();
        ctr.equ_addlin(ei, &v, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        ctr
    }

    #[test]
    fn test_empty_passes_everything() {
        let ctr = small_container();
        let fops = Fops::Empty;
        assert!(fops.keep_var(&ctr, Idx::new(0)));
        assert!(fops.keep_equ(&ctr, Idx::new(0)));
        assert_eq!(fops.sizes(&ctr), (4, 1));
    }

    #[test]
    fn test_active_with_deactivation() {
        let ctr = small_container();
        let mut fops = Fops::Active(FilterActive::default());
        assert!(fops.keep_var(&ctr, Idx::new(2)));

        fops.deactivate_var(Idx::new(2)).unwrap();
        assert!(!fops.keep_var(&ctr, Idx::new(2)));
        assert_eq!(fops.sizes(&ctr), (3, 1));
    }

    #[test]
    fn test_subset_membership() {
        let mut ctr = small_container();
        let fs = FilterSubset::new(
            vec![IdxSet::list(vec![Idx::new(0), Idx::new(3)])],
            vec![IdxSet::compact(0, 1)],
        )
        .unwrap();
        let fops = Fops::Subset(fs);

        assert!(fops.keep_var(&ctr, Idx::new(0)));
        assert!(!fops.keep_var(&ctr, Idx::new(1)));
        assert_eq!(fops.sizes(&ctr), (2, 1));

        // frozen variables leave the view
        ctr.fixed_vars = IdxSet::list(vec![Idx::new(0)]);
        assert!(!fops.keep_var(&ctr, Idx::new(0)));
    }

    #[test]
    fn test_single_mp_composition() {
        let ctr = small_container();
        let mp = MpMembership::new(1, vec![Idx::new(0)], vec![]);
        let fops = Fops::EmpDagSingleMp(FilterSingleMp { mp, parent: None });
        assert!(fops.keep_equ(&ctr, Idx::new(0)));
        assert_eq!(fops.sizes(&ctr).1, 1);
    }

    #[test]
    fn test_opcode_rewrite_plain() {
        let ctr = small_container();
        let mut fops = Fops::Active(FilterActive::default());

        let mut stream = OpcodeStream::default();
        stream.push(GamsOp::Header, 4);
        stream.push(GamsOp::PushV, 3); // variable 2
        stream.push(GamsOp::AddV, 1); // variable 0
        stream.push(GamsOp::Store, 1);

        let rosetta = vec![Idx::new(0), Idx::DELETED, Idx::new(1), Idx::new(2)];
        fops.transform_gams_opcode(
            &rosetta,
            Idx::new(5),
            &mut stream,
            &ctr.vars,
            &mut Pool::new_gams(),
        )
        .unwrap();

        assert_eq!(stream.args, vec![4, 2, 1, 6]);
    }

    #[test]
    fn test_opcode_rewrite_frozen_variable() {
        let mut ctr = small_container();
        ctr.vars[1].value = Some(2.5);

        let mut fs = FilterSubset::new(
            vec![IdxSet::list(vec![Idx::new(0), Idx::new(2), Idx::new(3)])],
            vec![IdxSet::compact(0, 1)],
        )
        .unwrap();

        let mut pool = ctr.pool.clone();
        let offset = pool.reserve_slots(4);
        for i in 0..4 {
            pool.set_slot(offset + i, ctr.vars[i as usize].value.unwrap_or(0.0));
        }
        fs.nlpoolvars.offset_vars_pool = offset;
        let mut fops = Fops::Subset(fs);

        let mut stream = OpcodeStream::default();
        stream.push(GamsOp::Header, 5);
        stream.push(GamsOp::PushV, 1); // variable 0, kept
        stream.push(GamsOp::MulV, 2); // variable 1, frozen
        stream.push(GamsOp::UMinV, 2); // -variable 1: negated slot
        stream.push(GamsOp::Store, 1);

        let rosetta = vec![Idx::new(0), Idx::DELETED, Idx::new(1), Idx::new(2)];
        fops.transform_gams_opcode(&rosetta, Idx::new(0), &mut stream, &ctr.vars, &mut pool)
            .unwrap();

        assert_eq!(stream.instrs[1], GamsOp::PushV);
        assert_eq!(stream.args[1], 1);
        // MulV became MulI reading the frozen slot
        assert_eq!(stream.instrs[2], GamsOp::MulI);
        assert_eq!(stream.args[2], (offset + 1) as i32);
        assert_eq!(pool.read(offset + 1).unwrap(), 2.5);
        // UMinV became PushI reading a negated slot
        assert_eq!(stream.instrs[3], GamsOp::PushI);
        let neg_slot = stream.args[3] as u32;
        assert_eq!(pool.read(neg_slot).unwrap(), -2.5);
    }
}
