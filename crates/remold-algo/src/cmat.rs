//! Container matrix: the sparse equation/variable incidence.
//!
//! One cell exists per (equation, variable) incidence, plus placeholder
//! cells for special relationships (constant equations, unattached
//! objective variables, isolated perpendicular variables). Cells live in a
//! per-container arena and are linked two ways:
//!
//! - per equation, a singly-linked row list through `next_var`;
//! - per variable, a doubly-linked column list through `next_equ` /
//!   `prev_equ`, with `last_equ` keeping the tail for O(1) appends.
//!
//! List edits rewire links but never reclaim cells; a removed equation's
//! row head is parked in `deleted_equs` so the deferred-evaluation
//! subsystem can still read its old coefficients.

use remold_core::{CoreError, CoreResult, Idx, Var};
use tracing::trace;

/// Stable index of a cell in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellId(u32);

impl CellId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Algebraic role of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// The variable appears linearly; `value` is its coefficient.
    Lin,
    /// The variable appears quadratically (reserved; not yet produced).
    Quad,
    /// The variable appears in the expression tree.
    Nl,
    /// Placeholder keeping a constant equation active.
    CstEqu,
    /// Placeholder for an objective variable not yet in any equation.
    ObjVar,
    /// Placeholder for a variable perpendicular to an equation.
    VarPerp,
}

impl CellKind {
    pub fn is_placeholder(self) -> bool {
        matches!(self, CellKind::CstEqu | CellKind::ObjVar | CellKind::VarPerp)
    }

    pub fn is_nl(self) -> bool {
        self == CellKind::Nl
    }
}

/// One cell of the container matrix.
#[derive(Debug, Clone)]
pub struct CMatElt {
    pub ei: Idx,
    pub vi: Idx,
    /// Jacobian coefficient; `None` for purely-nonlinear incidences and
    /// placeholders.
    pub value: Option<f64>,
    pub kind: CellKind,
    next_var: Option<CellId>,
    next_equ: Option<CellId>,
    prev_equ: Option<CellId>,
}

/// Sparse incidence structure of one container.
#[derive(Debug, Default)]
pub struct CMat {
    cells: Vec<CMatElt>,
    /// Row heads, indexed by equation.
    equs: Vec<Option<CellId>>,
    /// Column heads, indexed by variable.
    vars: Vec<Option<CellId>>,
    /// Column tails.
    last_equ: Vec<Option<CellId>>,
    /// Row heads of removed equations, for read-only post-mortem walks.
    deleted_equs: Vec<Option<CellId>>,
}

impl CMat {
    pub fn new() -> CMat {
        CMat::default()
    }

    pub fn resize(&mut self, max_n: usize, max_m: usize) {
        self.equs.resize(max_m, None);
        self.deleted_equs.resize(max_m, None);
        self.vars.resize(max_n, None);
        self.last_equ.resize(max_n, None);
    }

    pub fn cell(&self, id: CellId) -> &CMatElt {
        &self.cells[id.index()]
    }

    fn cell_mut(&mut self, id: CellId) -> &mut CMatElt {
        &mut self.cells[id.index()]
    }

    pub fn equ_head(&self, ei: Idx) -> Option<CellId> {
        self.equs[ei.idx()]
    }

    pub fn var_head(&self, vi: Idx) -> Option<CellId> {
        self.vars[vi.idx()]
    }

    pub fn deleted_equ_head(&self, ei: Idx) -> Option<CellId> {
        self.deleted_equs[ei.idx()]
    }

    /// An equation is active when it has a row head (placeholder included).
    pub fn equ_is_active(&self, ei: Idx) -> bool {
        self.equs[ei.idx()].is_some()
    }

    /// A variable is active when it has a column head (placeholder included).
    pub fn var_is_active(&self, vi: Idx) -> bool {
        self.vars[vi.idx()].is_some()
    }

    /// Row iterator: the cells of one equation in insertion order.
    pub fn row(&self, ei: Idx) -> RowIter<'_> {
        RowIter { cmat: self, cur: self.equs[ei.idx()] }
    }

    /// Row iterator over a deleted equation's parked cells.
    pub fn deleted_row(&self, ei: Idx) -> RowIter<'_> {
        RowIter { cmat: self, cur: self.deleted_equs[ei.idx()] }
    }

    /// Column iterator: the cells of one variable in insertion order.
    pub fn col(&self, vi: Idx) -> ColIter<'_> {
        ColIter { cmat: self, cur: self.vars[vi.idx()] }
    }

    /// The non-placeholder row head of an equation, or `None` when the row
    /// holds a constant-equation placeholder.
    fn regular_row_head(&self, ei: Idx) -> CoreResult<Option<CellId>> {
        match self.equs[ei.idx()] {
            None => Ok(None),
            Some(head) => {
                let cell = self.cell(head);
                if cell.kind.is_placeholder() {
                    if cell.kind != CellKind::CstEqu {
                        return Err(CoreError::Inconsistency(format!(
                            "equation {ei} has an unexpected {:?} placeholder",
                            cell.kind
                        )));
                    }
                    Ok(None)
                } else {
                    Ok(Some(head))
                }
            }
        }
    }

    fn row_tail(&self, head: CellId) -> CellId {
        let mut cur = head;
        while let Some(next) = self.cell(cur).next_var {
            cur = next;
        }
        cur
    }

    fn debug_chk_var_not_in_equ(&self, tail: Option<CellId>, ei: Idx) -> bool {
        let mut cur = tail;
        while let Some(id) = cur {
            if self.cell(id).ei == ei {
                return false;
            }
            cur = self.cell(id).prev_equ;
        }
        true
    }

    // ------------------------------------------------------------------
    // Cell creation
    // ------------------------------------------------------------------

    /// Allocate a cell and link it into its variable's column.
    ///
    /// The caller links the cell into the equation's row. On the variable's
    /// first appearance the active count grows and its deleted flag clears;
    /// a placeholder column head is replaced outright.
    pub fn elt_new(
        &mut self,
        ei: Idx,
        vi: Idx,
        is_nl: bool,
        val: Option<f64>,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<CellId> {
        debug_assert!(ei.is_valid() && vi.is_valid());

        let id = CellId(self.cells.len() as u32);
        self.cells.push(CMatElt {
            ei,
            vi,
            value: val,
            kind: if is_nl { CellKind::Nl } else { CellKind::Lin },
            next_var: None,
            next_equ: None,
            prev_equ: None,
        });

        let vpos = vi.idx();
        if self.vars[vpos].is_none() {
            // first appearance of the variable
            self.vars[vpos] = Some(id);
            *n_active += 1;

            trace!(var = %vi, equ = %ei, previously_deleted = vars[vpos].is_deleted,
                   "ADD var via equ");
            vars[vpos].is_deleted = false;
        } else if self.last_equ[vpos].is_none() {
            // the previous head was a placeholder; replace it in place
            debug_assert!(self.cell(self.vars[vpos].expect("head")).kind.is_placeholder());
            self.vars[vpos] = Some(id);
        } else {
            let tail = self.last_equ[vpos].expect("non-empty column");
            if !self.debug_chk_var_not_in_equ(Some(tail), ei) {
                return Err(CoreError::Inconsistency(format!(
                    "variable {vi} already appears in equation {ei}"
                )));
            }
            self.cell_mut(id).prev_equ = Some(tail);
            self.cell_mut(tail).next_equ = Some(id);
        }

        self.last_equ[vpos] = Some(id);
        Ok(id)
    }

    /// Placeholder cell keeping a constant equation active so compression
    /// does not throw it away.
    pub fn cst_equ(&mut self, ei: Idx) -> CoreResult<()> {
        if self.equs[ei.idx()].is_some() {
            return Err(CoreError::RuntimeError(format!(
                "equation {ei} is non-empty, cannot mark it constant"
            )));
        }

        let id = CellId(self.cells.len() as u32);
        self.cells.push(CMatElt {
            ei,
            vi: Idx::NA,
            value: None,
            kind: CellKind::CstEqu,
            next_var: None,
            next_equ: None,
            prev_equ: None,
        });
        self.equs[ei.idx()] = Some(id);
        Ok(())
    }

    /// Placeholder recording that a variable, no longer present in the
    /// model, is perpendicular to an equation.
    pub fn isolated_var_perp_equ(&mut self, vi: Idx, ei: Idx) -> CoreResult<()> {
        debug_assert!(vi.is_valid() && ei.is_valid());

        let id = CellId(self.cells.len() as u32);
        self.cells.push(CMatElt {
            ei,
            vi,
            value: None,
            kind: CellKind::VarPerp,
            next_var: None,
            next_equ: None,
            prev_equ: None,
        });
        self.vars[vi.idx()] = Some(id);
        self.last_equ[vi.idx()] = Some(id);
        Ok(())
    }

    /// Placeholder for an objective variable that appears in no equation.
    pub fn objvar(&mut self, vi: Idx) -> CoreResult<()> {
        if self.vars[vi.idx()].is_some() {
            return Err(CoreError::RuntimeError(format!(
                "variable {vi} is already present in the model"
            )));
        }

        let id = CellId(self.cells.len() as u32);
        self.cells.push(CMatElt {
            ei: Idx::NA,
            vi,
            value: None,
            kind: CellKind::ObjVar,
            next_var: None,
            next_equ: None,
            prev_equ: None,
        });
        self.vars[vi.idx()] = Some(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Row construction and update
    // ------------------------------------------------------------------

    /// Fill an empty equation's row from scratch.
    pub fn fill_equ(
        &mut self,
        ei: Idx,
        entries: &[(Idx, Option<f64>, bool)],
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<()> {
        if self.equs[ei.idx()].is_some() {
            return Err(CoreError::RuntimeError(format!(
                "cannot fill non-empty equation {ei}"
            )));
        }

        let mut prev: Option<CellId> = None;
        for &(vi, val, is_nl) in entries {
            let id = self.elt_new(ei, vi, is_nl, val, vars, n_active)?;
            match prev {
                Some(p) => self.cell_mut(p).next_var = Some(id),
                None => self.equs[ei.idx()] = Some(id),
            }
            prev = Some(id);
        }
        Ok(())
    }

    /// Append a known-new linear variable at the row tail. No duplicate
    /// scan: the caller guarantees novelty.
    pub fn equ_add_newlvar(
        &mut self,
        ei: Idx,
        vi: Idx,
        val: f64,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<()> {
        let head = self.regular_row_head(ei)?;
        debug_assert!(self.debug_chk_var_not_in_equ(self.last_equ[vi.idx()], ei));

        let id = self.elt_new(ei, vi, false, Some(val), vars, n_active)?;
        match head {
            Some(h) => {
                let tail = self.row_tail(h);
                self.cell_mut(tail).next_var = Some(id);
            }
            None => self.equs[ei.idx()] = Some(id),
        }
        Ok(())
    }

    /// Add a linear variable without knowing whether it is already in the
    /// row. Accumulates into an existing cell; reports whether the cell
    /// already existed and whether the variable is nonlinear, so the caller
    /// picks the right storage for the algebraic side.
    pub fn equ_add_lvar(
        &mut self,
        ei: Idx,
        vi: Idx,
        val: f64,
        is_nl: &mut bool,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<bool> {
        let head = self.regular_row_head(ei)?;

        let mut last = None;
        let mut cur = head;
        while let Some(id) = cur {
            let cell = self.cell_mut(id);
            if cell.vi == vi {
                cell.value = cell.value.map(|v| v + val);
                *is_nl = cell.kind.is_nl();
                return Ok(true);
            }
            last = Some(id);
            cur = self.cell(id).next_var;
        }

        let id = self.elt_new(ei, vi, *is_nl, Some(val), vars, n_active)?;
        match last {
            Some(tail) => self.cell_mut(tail).next_var = Some(id),
            None => self.equs[ei.idx()] = Some(id),
        }
        Ok(false)
    }

    /// Add a nonlinear variable. Returns `true` when the variable was
    /// present linearly (or quadratically) and has been promoted: the
    /// caller must then move it from the linear part into the tree.
    pub fn equ_add_nlvar(
        &mut self,
        ei: Idx,
        vi: Idx,
        jac_val: Option<f64>,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<bool> {
        let head = self.regular_row_head(ei)?;

        let mut last = None;
        let mut cur = head;
        while let Some(id) = cur {
            let cell = self.cell_mut(id);
            if cell.vi == vi {
                cell.value = match (cell.value, jac_val) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                };
                let promoted = !cell.kind.is_nl();
                cell.kind = CellKind::Nl;
                return Ok(promoted);
            }
            last = Some(id);
            cur = self.cell(id).next_var;
        }

        let id = self.elt_new(ei, vi, true, jac_val, vars, n_active)?;
        match last {
            Some(tail) => self.cell_mut(tail).next_var = Some(id),
            None => self.equs[ei.idx()] = Some(id),
        }
        Ok(false)
    }

    /// Remove a variable from an equation's row.
    ///
    /// When the row empties, a constant-equation placeholder takes over if
    /// `can_cst_placeholder`; otherwise the container is inconsistent.
    /// When the column empties, the variable leaves the active model.
    pub fn equ_rm_var(
        &mut self,
        ei: Idx,
        vi: Idx,
        can_cst_placeholder: bool,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<()> {
        let head = self.equs[ei.idx()].ok_or_else(|| {
            CoreError::Inconsistency(format!("equation {ei} is empty, cannot remove {vi}"))
        })?;

        trace!(var = %vi, equ = %ei, "DEL var from equ");

        let mut prev: Option<CellId> = None;
        let mut cur = Some(head);
        while let Some(id) = cur {
            if self.cell(id).vi != vi {
                prev = Some(id);
                cur = self.cell(id).next_var;
                continue;
            }

            // unlink from the row
            let next_var = self.cell(id).next_var;
            match prev {
                Some(p) => self.cell_mut(p).next_var = next_var,
                None => {
                    if next_var.is_some() {
                        self.equs[ei.idx()] = next_var;
                    } else if can_cst_placeholder {
                        self.equs[ei.idx()] = None;
                        self.cst_equ(ei)?;
                    } else {
                        return Err(CoreError::Inconsistency(format!(
                            "equation {ei} no longer contains any variable"
                        )));
                    }
                }
            }

            // unlink from the column; the back-pointer of the next cell
            // must move before the forward pointer of the previous one
            let (next_equ, prev_equ) = {
                let cell = self.cell(id);
                (cell.next_equ, cell.prev_equ)
            };
            match next_equ {
                Some(n) => self.cell_mut(n).prev_equ = prev_equ,
                None => {
                    debug_assert_eq!(self.last_equ[vi.idx()], Some(id));
                    self.last_equ[vi.idx()] = prev_equ;
                }
            }
            match prev_equ {
                Some(p) => self.cell_mut(p).next_equ = next_equ,
                None => {
                    self.vars[vi.idx()] = next_equ;
                    if next_equ.is_none() {
                        debug_assert!(self.last_equ[vi.idx()].is_none());
                        *n_active -= 1;
                        vars[vi.idx()].is_deleted = true;
                        trace!(var = %vi, "var deleted");
                    }
                }
            }

            return Ok(());
        }

        Err(CoreError::Inconsistency(format!(
            "variable {vi} does not appear in equation {ei}"
        )))
    }

    /// Remove an equation: unlink every cell from its column and park the
    /// row head for later read-only use.
    pub fn rm_equ(&mut self, ei: Idx, vars: &mut [Var], n_active: &mut usize) -> CoreResult<()> {
        let head = self.equs[ei.idx()].ok_or_else(|| {
            CoreError::Inconsistency(format!("equation {ei} is already inactive"))
        })?;

        self.equs[ei.idx()] = None;
        self.deleted_equs[ei.idx()] = Some(head);

        let mut cur = Some(head);
        while let Some(id) = cur {
            let (vi, next_var, next_equ, prev_equ, kind) = {
                let cell = self.cell(id);
                (cell.vi, cell.next_var, cell.next_equ, cell.prev_equ, cell.kind)
            };

            if kind == CellKind::CstEqu {
                // placeholder rows have no column links
                break;
            }

            match next_equ {
                Some(n) => self.cell_mut(n).prev_equ = prev_equ,
                None => {
                    debug_assert_eq!(self.last_equ[vi.idx()], Some(id));
                    self.last_equ[vi.idx()] = prev_equ;
                }
            }
            match prev_equ {
                Some(p) => self.cell_mut(p).next_equ = next_equ,
                None => {
                    self.vars[vi.idx()] = next_equ;
                    if next_equ.is_none() {
                        *n_active -= 1;
                        vars[vi.idx()].is_deleted = true;
                        trace!(var = %vi, "var deleted with its last equation");
                    }
                }
            }

            cur = next_var;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Row copies
    // ------------------------------------------------------------------

    fn copy_row(
        &mut self,
        ei_src: Idx,
        ei_dst: Idx,
        vars: &mut [Var],
        n_active: &mut usize,
        vi_skip: Idx,
        negate: bool,
    ) -> CoreResult<()> {
        if self.equs[ei_dst.idx()].is_some() {
            return Err(CoreError::RuntimeError(format!(
                "cannot copy into non-empty equation {ei_dst}"
            )));
        }

        let entries: Vec<(Idx, Option<f64>, bool)> = self
            .row(ei_src)
            .map(|id| {
                let cell = self.cell(id);
                let val = if negate { cell.value.map(|v| -v) } else { cell.value };
                (cell.vi, val, cell.kind.is_nl())
            })
            .collect();

        let mut prev: Option<CellId> = None;
        for (vi, val, is_nl) in entries {
            if vi == vi_skip {
                continue;
            }
            let id = self.elt_new(ei_dst, vi, is_nl, val, vars, n_active)?;
            match prev {
                Some(p) => self.cell_mut(p).next_var = Some(id),
                None => self.equs[ei_dst.idx()] = Some(id),
            }
            prev = Some(id);
        }

        // copying every variable away can leave the row empty
        if self.equs[ei_dst.idx()].is_none() {
            self.cst_equ(ei_dst)?;
        }

        Ok(())
    }

    /// Duplicate a row into an empty destination equation.
    pub fn copy_equ(
        &mut self,
        ei_src: Idx,
        ei_dst: Idx,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<()> {
        self.copy_row(ei_src, ei_dst, vars, n_active, Idx::INVALID, false)
    }

    /// Duplicate a row with all coefficients negated.
    pub fn copy_equ_flipped(
        &mut self,
        ei_src: Idx,
        ei_dst: Idx,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<()> {
        self.copy_row(ei_src, ei_dst, vars, n_active, Idx::INVALID, true)
    }

    /// Duplicate a row omitting one variable.
    pub fn copy_equ_except(
        &mut self,
        ei_src: Idx,
        ei_dst: Idx,
        vi_skip: Idx,
        vars: &mut [Var],
        n_active: &mut usize,
    ) -> CoreResult<()> {
        self.copy_row(ei_src, ei_dst, vars, n_active, vi_skip, false)
    }

    /// Scale every coefficient of a row.
    pub fn scal(&mut self, ei: Idx, coeff: f64) -> CoreResult<()> {
        let ids: Vec<CellId> = self.row(ei).collect();
        if ids.is_empty() {
            return Err(CoreError::Inconsistency(format!(
                "cannot scale inactive equation {ei}"
            )));
        }
        for id in ids {
            let cell = self.cell_mut(id);
            cell.value = cell.value.map(|v| v * coeff);
        }
        Ok(())
    }

    /// Whether a variable's column reaches a given equation.
    pub fn var_in_equ(&self, vi: Idx, ei: Idx) -> bool {
        self.col(vi).any(|id| self.cell(id).ei == ei)
    }
}

/// Bulk-append equations from another container's matrix.
///
/// The rows named by `e` are copied starting at `ei_dst_start`, with every
/// variable index translated through the source's current rosetta. Rows the
/// source no longer has (already removed) are skipped but still consume a
/// destination index, matching the contiguous numbering the rosetta
/// promises.
pub fn append_equs(
    dst: &mut CMat,
    src: &CMat,
    e: &remold_core::Aequ,
    rosetta_vars: &[Idx],
    ei_dst_start: Idx,
    dst_vars: &mut [Var],
    dst_n: &mut usize,
) -> CoreResult<usize> {
    let mut ei_dst = ei_dst_start.idx();
    let mut appended = 0usize;

    for ei_src in e.iter() {
        let dst_idx = Idx::new(ei_dst);
        ei_dst += 1;

        if src.equ_head(ei_src).is_none() {
            continue;
        }
        if dst.equs[dst_idx.idx()].is_some() {
            return Err(CoreError::RuntimeError(format!(
                "cannot copy into non-empty equation {dst_idx}"
            )));
        }

        let entries: Vec<(Idx, Option<f64>, bool)> = src
            .row(ei_src)
            .map(|id| src.cell(id))
            .filter(|cell| !cell.kind.is_placeholder())
            .map(|cell| {
                let vi_new = rosetta_vars[cell.vi.idx()];
                if !vi_new.is_valid() {
                    return Err(CoreError::Inconsistency(format!(
                        "variable {} of equation {ei_src} has no translation",
                        cell.vi
                    )));
                }
                Ok((vi_new, cell.value, cell.kind.is_nl()))
            })
            .collect::<CoreResult<_>>()?;

        dst.fill_equ(dst_idx, &entries, dst_vars, dst_n)?;
        appended += 1;
    }

    Ok(appended)
}

/// Iterator over a row list.
pub struct RowIter<'a> {
    cmat: &'a CMat,
    cur: Option<CellId>,
}

impl Iterator for RowIter<'_> {
    type Item = CellId;

    fn next(&mut self) -> Option<CellId> {
        let id = self.cur?;
        self.cur = self.cmat.cell(id).next_var;
        Some(id)
    }
}

/// Iterator over a column list.
pub struct ColIter<'a> {
    cmat: &'a CMat,
    cur: Option<CellId>,
}

impl Iterator for ColIter<'_> {
    type Item = CellId;

    fn next(&mut self) -> Option<CellId> {
        let id = self.cur?;
        self.cur = self.cmat.cell(id).next_equ;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(n: usize, m: usize) -> (CMat, Vec<Var>, usize) {
        let mut cmat = CMat::new();
        cmat.resize(n, m);
        let vars: Vec<Var> = (0..n).map(|i| Var::new(Idx::new(i))).collect();
        (cmat, vars, 0)
    }

    #[test]
    fn test_fill_and_walk_row() {
        let (mut cmat, mut vars, mut n) = setup(4, 2);
        let entries = [
            (Idx::new(0), Some(1.5), false),
            (Idx::new(2), Some(-2.0), false),
            (Idx::new(3), None, true),
        ];
        cmat.fill_equ(Idx::new(0), &entries, &mut vars, &mut n).unwrap();

        assert_eq!(n, 3);
        let row: Vec<(Idx, CellKind)> = cmat
            .row(Idx::new(0))
            .map(|id| (cmat.cell(id).vi, cmat.cell(id).kind))
            .collect();
        assert_eq!(row.len(), 3);
        assert_eq!(row[0], (Idx::new(0), CellKind::Lin));
        assert_eq!(row[2], (Idx::new(3), CellKind::Nl));

        assert!(cmat.fill_equ(Idx::new(0), &entries, &mut vars, &mut n).is_err());
    }

    #[test]
    fn test_add_lvar_accumulates() {
        let (mut cmat, mut vars, mut n) = setup(2, 1);
        let ei = Idx::new(0);
        let vi = Idx::new(1);

        let mut is_nl = false;
        cmat.equ_add_lvar(ei, vi, 2.0, &mut is_nl, &mut vars, &mut n).unwrap();
        cmat.equ_add_lvar(ei, vi, 3.0, &mut is_nl, &mut vars, &mut n).unwrap();
        assert!(!is_nl);
        assert_eq!(n, 1);

        let head = cmat.equ_head(ei).unwrap();
        assert_eq!(cmat.cell(head).value, Some(5.0));
    }

    #[test]
    fn test_nlvar_promotion() {
        let (mut cmat, mut vars, mut n) = setup(2, 1);
        let ei = Idx::new(0);
        let vi = Idx::new(0);

        let mut is_nl = false;
        cmat.equ_add_lvar(ei, vi, 2.0, &mut is_nl, &mut vars, &mut n).unwrap();
        let promoted = cmat.equ_add_nlvar(ei, vi, None, &mut vars, &mut n).unwrap();
        assert!(promoted);

        let head = cmat.equ_head(ei).unwrap();
        assert_eq!(cmat.cell(head).kind, CellKind::Nl);
        assert_eq!(cmat.cell(head).value, None);

        // already nonlinear: no second promotion
        let promoted = cmat.equ_add_nlvar(ei, vi, None, &mut vars, &mut n).unwrap();
        assert!(!promoted);
    }

    #[test]
    fn test_rm_var_and_column_links() {
        let (mut cmat, mut vars, mut n) = setup(2, 3);
        let vi = Idx::new(0);
        for e in 0..3 {
            cmat.fill_equ(
                Idx::new(e),
                &[(vi, Some(e as f64), false), (Idx::new(1), Some(1.0), false)],
                &mut vars,
                &mut n,
            )
            .unwrap();
        }
        assert_eq!(n, 2);

        // the column sees all three equations in order
        let col: Vec<Idx> = cmat.col(vi).map(|id| cmat.cell(id).ei).collect();
        assert_eq!(col, vec![Idx::new(0), Idx::new(1), Idx::new(2)]);

        // remove from the middle equation
        cmat.equ_rm_var(Idx::new(1), vi, false, &mut vars, &mut n).unwrap();
        let col: Vec<Idx> = cmat.col(vi).map(|id| cmat.cell(id).ei).collect();
        assert_eq!(col, vec![Idx::new(0), Idx::new(2)]);

        // the tail stays reachable
        let tail = cmat.last_equ[vi.idx()].unwrap();
        assert_eq!(cmat.cell(tail).ei, Idx::new(2));

        cmat.equ_rm_var(Idx::new(0), vi, false, &mut vars, &mut n).unwrap();
        cmat.equ_rm_var(Idx::new(2), vi, false, &mut vars, &mut n).unwrap();
        assert!(vars[0].is_deleted);
        assert!(!cmat.var_is_active(vi));
        assert_eq!(n, 1);
    }

    #[test]
    fn test_rm_equ_parks_row() {
        let (mut cmat, mut vars, mut n) = setup(2, 2);
        cmat.fill_equ(
            Idx::new(0),
            &[(Idx::new(0), Some(1.0), false), (Idx::new(1), Some(2.0), false)],
            &mut vars,
            &mut n,
        )
        .unwrap();
        cmat.fill_equ(Idx::new(1), &[(Idx::new(0), Some(3.0), false)], &mut vars, &mut n)
            .unwrap();

        cmat.rm_equ(Idx::new(0), &mut vars, &mut n).unwrap();
        assert!(!cmat.equ_is_active(Idx::new(0)));
        assert!(vars[1].is_deleted);
        assert!(!vars[0].is_deleted); // still in equation 1
        assert_eq!(n, 1);

        // the parked row still reads the old coefficients
        let parked: Vec<Option<f64>> =
            cmat.deleted_row(Idx::new(0)).map(|id| cmat.cell(id).value).collect();
        assert_eq!(parked, vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_copy_flipped() {
        let (mut cmat, mut vars, mut n) = setup(2, 2);
        cmat.fill_equ(
            Idx::new(0),
            &[(Idx::new(0), Some(2.0), false), (Idx::new(1), Some(-3.0), false)],
            &mut vars,
            &mut n,
        )
        .unwrap();
        cmat.copy_equ_flipped(Idx::new(0), Idx::new(1), &mut vars, &mut n).unwrap();

        let row: Vec<Option<f64>> =
            cmat.row(Idx::new(1)).map(|id| cmat.cell(id).value).collect();
        assert_eq!(row, vec![Some(-2.0), Some(3.0)]);
    }

    #[test]
    fn test_copy_except_may_leave_placeholder() {
        let (mut cmat, mut vars, mut n) = setup(1, 2);
        cmat.fill_equ(Idx::new(0), &[(Idx::new(0), Some(1.0), false)], &mut vars, &mut n)
            .unwrap();
        cmat.copy_equ_except(Idx::new(0), Idx::new(1), Idx::new(0), &mut vars, &mut n)
            .unwrap();

        let head = cmat.equ_head(Idx::new(1)).unwrap();
        assert_eq!(cmat.cell(head).kind, CellKind::CstEqu);
    }

    #[test]
    fn test_append_equs_translates() {
        let (mut src, mut svars, mut sn) = setup(3, 2);
        src.fill_equ(
            Idx::new(0),
            &[(Idx::new(0), Some(1.0), false), (Idx::new(2), None, true)],
            &mut svars,
            &mut sn,
        )
        .unwrap();
        src.fill_equ(Idx::new(1), &[(Idx::new(1), Some(4.0), false)], &mut svars, &mut sn)
            .unwrap();
        // equation 1 was removed: it is skipped but keeps its slot
        src.rm_equ(Idx::new(1), &mut svars, &mut sn).unwrap();

        let (mut dst, mut dvars, mut dn) = setup(2, 3);
        // variable 1 was compressed away, 2 renumbered to 1
        let rosetta = vec![Idx::new(0), Idx::DELETED, Idx::new(1)];
        let e = remold_core::IdxSet::compact(0, 2);
        let appended = append_equs(
            &mut dst,
            &src,
            &e,
            &rosetta,
            Idx::new(0),
            &mut dvars,
            &mut dn,
        )
        .unwrap();

        assert_eq!(appended, 1);
        let row: Vec<(Idx, CellKind)> = dst
            .row(Idx::new(0))
            .map(|id| (dst.cell(id).vi, dst.cell(id).kind))
            .collect();
        assert_eq!(row, vec![(Idx::new(0), CellKind::Lin), (Idx::new(1), CellKind::Nl)]);
        assert!(!dst.equ_is_active(Idx::new(1)));
    }

    #[test]
    fn test_placeholder_replaced_on_reappearance() {
        let (mut cmat, mut vars, mut n) = setup(1, 1);
        cmat.objvar(Idx::new(0)).unwrap();
        assert!(cmat.var_is_active(Idx::new(0)));

        // first real appearance replaces the placeholder without relinking
        cmat.fill_equ(Idx::new(0), &[(Idx::new(0), Some(1.0), false)], &mut vars, &mut n)
            .unwrap();
        let head = cmat.var_head(Idx::new(0)).unwrap();
        assert_eq!(cmat.cell(head).kind, CellKind::Lin);
    }
}
