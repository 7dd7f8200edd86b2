//! Equation editing.
//!
//! Every mutator keeps the three representations of an equation coherent:
//! the linear part (`Lequ`), the expression tree, and the container matrix.
//! Operations are either *safe* (they scan for existing incidences and
//! dispatch accordingly) or *unsafe* (they append, and the caller
//! guarantees the variables are new to the equation).
//!
//! Staged-editing discipline: an equation whose stage predates the current
//! one is read-only; [`Container::ensure_editable`] duplicates it first and
//! the rosetta keeps downstream references valid.

use tracing::trace;

use remold_core::equ::EquObject;
use remold_core::{Avar, CoreError, CoreResult, Idx};

use crate::equ::Equ;
use crate::nltree::NlAddr;
use crate::quadmat::QuadMat;

use super::{Container, EquRosetta, RosettaTarget};

/// Disjoint mutable/shared access to two equations of the same container.
fn two_equs(equs: &mut [Equ], dst: usize, src: usize) -> (&mut Equ, &Equ) {
    debug_assert_ne!(dst, src);
    if dst < src {
        let (a, b) = equs.split_at_mut(src);
        (&mut a[dst], &b[0])
    } else {
        let (a, b) = equs.split_at_mut(dst);
        (&mut b[0], &a[src])
    }
}

impl Container {
    /// Stage discipline: redirect an edit to a fresh duplicate when the
    /// target equation belongs to an earlier stage.
    pub fn ensure_editable(&mut self, ei: Idx) -> CoreResult<Idx> {
        if self.equ_is_readonly(ei) {
            self.dup_equ(ei, 0, Idx::INVALID)
        } else {
            Ok(ei)
        }
    }

    fn tree_vlist_len(&self, ei: Idx) -> usize {
        self.equs[ei.idx()].tree.as_ref().map_or(0, |t| t.vlist().len())
    }

    /// Register in the container matrix every variable the last tree edit
    /// introduced (`vlist` entries at positions `from..`). Variables that
    /// were linear get promoted and their linear term moves into the tree.
    fn register_tree_vars(&mut self, ei: Idx, from: usize) -> CoreResult<()> {
        let new_vars: Vec<Idx> = match &self.equs[ei.idx()].tree {
            Some(tree) => tree.vlist()[from..].to_vec(),
            None => return Ok(()),
        };

        for vi in new_vars {
            self.chk_vi(vi)?;
            let promoted =
                self.cmat.equ_add_nlvar(ei, vi, None, &mut self.vars, &mut self.n)?;
            if promoted {
                self.switch_var_nl(ei, vi)?;
            }
        }
        Ok(())
    }

    /// Move a variable from the linear part into the expression tree,
    /// keeping its coefficient as a new summand.
    pub(crate) fn switch_var_nl(&mut self, ei: Idx, vi: Idx) -> CoreResult<()> {
        let Some((val, pos)) = self.equs[ei.idx()].lequ.find(vi) else {
            return Err(CoreError::Inconsistency(format!(
                "variable '{}' is marked linear in '{}' but cannot be found",
                self.var_name(vi),
                self.equ_name(ei)
            )));
        };
        self.equs[ei.idx()].lequ.delete(pos);
        self.tree_add_var_root(ei, vi, val)
    }

    /// Append `val * vi` as a new summand at the tree's root Add node.
    fn tree_add_var_root(&mut self, ei: Idx, vi: Idx, val: f64) -> CoreResult<()> {
        let pool = &mut self.pool;
        let equ = &mut self.equs[ei.idx()];
        let est = equ.nl_estimate();
        let tree = equ.bootstrap_tree(est);

        let mut coeff = val;
        let add = tree.find_or_add_root_add_node(pool, &mut coeff)?;
        let slot = tree.child_free_slot(add);
        tree.add_var(NlAddr::Child(add, slot), pool, vi, coeff)
    }

    // ------------------------------------------------------------------
    // Linear editing
    // ------------------------------------------------------------------

    /// Add a variable to an equation, safe version: scans the row and
    /// accumulates or dispatches to the tree when the variable is already
    /// nonlinear there.
    pub fn equ_addlvar(&mut self, ei: Idx, vi: Idx, val: f64) -> CoreResult<()> {
        self.chk_ei(ei)?;
        self.chk_vi(vi)?;
        let ei = self.ensure_editable(ei)?;

        let mut is_nl = false;
        let existed =
            self.cmat.equ_add_lvar(ei, vi, val, &mut is_nl, &mut self.vars, &mut self.n)?;

        if is_nl {
            self.tree_add_var_root(ei, vi, val)
        } else if existed {
            let lequ = &mut self.equs[ei.idx()].lequ;
            let (old, pos) = lequ.find(vi).ok_or_else(|| {
                CoreError::Inconsistency(format!(
                    "variable {vi} is in the container matrix of {ei} but not in its \
                     linear part"
                ))
            })?;
            lequ.set_coeff(pos, old + val)
        } else {
            self.equs[ei.idx()].lequ.add_unique(vi, val)
        }
    }

    /// Add a known-new variable, unsafe version: plain appends, no scan.
    pub fn equ_addnewlvar(&mut self, ei: Idx, vi: Idx, val: f64) -> CoreResult<()> {
        self.chk_ei(ei)?;
        self.chk_vi(vi)?;
        let ei = self.ensure_editable(ei)?;

        self.equs[ei.idx()].lequ.add(vi, val)?;
        self.cmat.equ_add_newlvar(ei, vi, val, &mut self.vars, &mut self.n)
    }

    /// Set/extend the linear part by a batch of new variables, unsafe.
    pub fn equ_addlin(&mut self, ei: Idx, v: &Avar, vals: &[f64]) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if v.len() != vals.len() {
            return Err(CoreError::InvalidArgument(format!(
                "variable set has {} entries, values {}",
                v.len(),
                vals.len()
            )));
        }
        let ei = self.ensure_editable(ei)?;

        self.equs[ei.idx()].lequ.adds(v, vals)?;
        for (i, vi) in v.iter().enumerate() {
            self.chk_vi(vi)?;
            self.cmat.equ_add_newlvar(ei, vi, vals[i], &mut self.vars, &mut self.n)?;
        }
        Ok(())
    }

    /// Unsafe batch add with all values pre-scaled by `coeff`.
    pub fn equ_addlincoeff(
        &mut self,
        ei: Idx,
        v: &Avar,
        vals: &[f64],
        coeff: f64,
    ) -> CoreResult<()> {
        if (coeff - 1.0).abs() < f64::EPSILON {
            return self.equ_addlin(ei, v, vals);
        }
        let scaled: Vec<f64> = vals.iter().map(|&x| coeff * x).collect();
        self.equ_addlin(ei, v, &scaled)
    }

    /// Safe batch add: every entry goes through the duplicate scan.
    pub fn equ_addlinchk(&mut self, ei: Idx, v: &Avar, vals: &[f64]) -> CoreResult<()> {
        if v.len() != vals.len() {
            return Err(CoreError::InvalidArgument(format!(
                "variable set has {} entries, values {}",
                v.len(),
                vals.len()
            )));
        }
        for (i, vi) in v.iter().enumerate() {
            self.equ_addlvar(ei, vi, vals[i])?;
        }
        Ok(())
    }

    pub fn equ_setcst(&mut self, ei: Idx, val: f64) -> CoreResult<()> {
        self.chk_ei(ei)?;
        self.equs[ei.idx()].set_cst(val)
    }

    pub fn equ_getcst(&self, ei: Idx) -> CoreResult<f64> {
        self.chk_ei(ei)?;
        self.equs[ei.idx()].get_cst()
    }

    /// Remove a (linear) variable from an equation.
    pub fn equ_rm_var(&mut self, ei: Idx, vi: Idx) -> CoreResult<()> {
        self.chk_ei(ei)?;
        self.chk_vi(vi)?;

        let equ = &self.equs[ei.idx()];
        let Some((_, pos)) = equ.lequ.find(vi) else {
            return Err(CoreError::NotImplemented(
                "only linear variables can be removed from an equation",
            ));
        };
        let can_placeholder = equ.object == EquObject::Mapping && equ.raw_cst().is_finite();

        self.equs[ei.idx()].lequ.delete(pos);
        self.cmat
            .equ_rm_var(ei, vi, can_placeholder, &mut self.vars, &mut self.n)
    }

    /// Keep a variable-less equation active through a constant placeholder.
    pub fn set_equ_as_cst(&mut self, ei: Idx) -> CoreResult<()> {
        self.chk_ei(ei)?;
        let cst = self.equs[ei.idx()].raw_cst();
        if cst.is_finite() {
            self.cmat.cst_equ(ei)
        } else {
            Err(CoreError::Inconsistency(format!(
                "equation '{}' has no variable and no finite constant ({cst})",
                self.equ_name(ei)
            )))
        }
    }

    /// Ensure an equation is registered as active, and that a VI-function's
    /// dual variable stays active alongside it.
    pub fn fix_equ(&mut self, ei: Idx) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if !self.cmat.equ_is_active(ei) {
            self.set_equ_as_cst(ei)?;
        }

        if let Some(meta) = &self.equmeta {
            let emeta = &meta[ei.idx()];
            if emeta.role == super::EquRole::ViFunction {
                let vi = emeta.dual;
                self.chk_vi(vi)?;
                if !self.cmat.var_is_active(vi) {
                    self.cmat.isolated_var_perp_equ(vi, ei)?;
                    self.n += 1;
                    if let Some(vmeta) = &mut self.varmeta {
                        vmeta[vi.idx()].perp_to_vi_function = true;
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Quadratic and bilinear editing
    // ------------------------------------------------------------------

    /// Add `coeff/2 * x' M x` over the variables of `v`, safe version.
    pub fn equ_add_quadratic(
        &mut self,
        ei: Idx,
        mat: &QuadMat<'_>,
        v: &Avar,
        coeff: f64,
    ) -> CoreResult<()> {
        self.chk_ei(ei)?;
        let ei = self.ensure_editable(ei)?;

        if let Some(dim) = mat.dim() {
            if matches!(mat, QuadMat::BlockDiag(_)) && dim != v.len() {
                return Err(CoreError::UnExpectedData(format!(
                    "block-diagonal form spans {dim} rows but the variable set has {}",
                    v.len()
                )));
            }
        }

        match mat {
            QuadMat::Cs(_) => {
                return Err(CoreError::NotImplemented(
                    "CSR/CSC quadratic matrices; use the triplet form",
                ))
            }
            QuadMat::ScaledIdentity(k) => {
                self.add_quad_diag(ei, &[(v.len(), *k)], v, coeff)?;
            }
            QuadMat::BlockDiag(blocks) => {
                self.add_quad_diag(ei, blocks, v, coeff)?;
            }
            QuadMat::Coo(m) => {
                let (rows, cols, vals) = QuadMat::coo_triplets(m)?;
                self.equ_addquadabsolute(ei, &rows, &cols, &vals, coeff)?;
            }
        }
        Ok(())
    }

    /// Diagonal family: one square node per variable, block scales applied.
    fn add_quad_diag(
        &mut self,
        ei: Idx,
        blocks: &[(usize, f64)],
        v: &Avar,
        coeff: f64,
    ) -> CoreResult<()> {
        let vlist_from = self.tree_vlist_len(ei);
        {
            let pool = &mut self.pool;
            let equ = &mut self.equs[ei.idx()];
            let est = equ.nl_estimate() + 2 * v.len();
            let tree = equ.bootstrap_tree(est);

            let mut lcoeff = coeff;
            let add = tree.find_or_add_root_add_node(pool, &mut lcoeff)?;
            let half = 0.5 * lcoeff;

            let mut offset = 0usize;
            for &(bsize, k) in blocks {
                if k.abs() < f64::EPSILON {
                    offset += bsize;
                    continue;
                }
                for j in 0..bsize {
                    let vi = v.get(offset + j)?;
                    let slot = tree.child_free_slot(add);
                    let addr = tree.mul_cst(NlAddr::Child(add, slot), pool, k * half)?;
                    tree.add_sqr(addr, vi)?;
                    let child = tree.at(NlAddr::Child(add, slot)).expect("term created");
                    tree.node_mut(child).print_now = true;
                }
                offset += bsize;
            }

            tree.check_add(add)?;
        }
        self.register_tree_vars(ei, vlist_from)
    }

    /// COO quadratic with absolute variable indices.
    pub fn equ_addquadabsolute(
        &mut self,
        ei: Idx,
        rows: &[Idx],
        cols: &[Idx],
        vals: &[f64],
        coeff: f64,
    ) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if rows.is_empty() {
            return Err(CoreError::RuntimeError(
                "quadratic term with zero entries".into(),
            ));
        }
        if rows.len() != cols.len() || rows.len() != vals.len() {
            return Err(CoreError::InvalidArgument(
                "COO arrays have inconsistent lengths".into(),
            ));
        }
        for (&i, &j) in rows.iter().zip(cols) {
            self.chk_vi(i)?;
            self.chk_vi(j)?;
        }
        let ei = self.ensure_editable(ei)?;

        let vlist_from = self.tree_vlist_len(ei);
        {
            let pool = &mut self.pool;
            let equ = &mut self.equs[ei.idx()];
            let est = equ.nl_estimate() + 4 * rows.len();
            let tree = equ.bootstrap_tree(est);

            let mut lcoeff = coeff;
            let add = tree.find_or_add_root_add_node(pool, &mut lcoeff)?;
            let half = 0.5 * lcoeff;
            tree.add_quad_coo_abs(add, pool, rows, cols, vals, half)?;
            tree.check_add(add)?;
        }
        self.register_tree_vars(ei, vlist_from)
    }

    /// COO quadratic with indices relative to row/column variable sets.
    pub fn equ_addquadrelative(
        &mut self,
        ei: Idx,
        v_row: &Avar,
        v_col: &Avar,
        rows: &[u32],
        cols: &[u32],
        vals: &[f64],
        coeff: f64,
    ) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if rows.is_empty() {
            return Err(CoreError::RuntimeError(
                "quadratic term with zero entries".into(),
            ));
        }
        if rows.len() != cols.len() || rows.len() != vals.len() {
            return Err(CoreError::InvalidArgument(
                "COO arrays have inconsistent lengths".into(),
            ));
        }
        let ei = self.ensure_editable(ei)?;

        let vlist_from = self.tree_vlist_len(ei);
        {
            let pool = &mut self.pool;
            let equ = &mut self.equs[ei.idx()];
            let est = equ.nl_estimate() + 4 * rows.len();
            let tree = equ.bootstrap_tree(est);

            let mut lcoeff = coeff;
            let add = tree.find_or_add_root_add_node(pool, &mut lcoeff)?;
            let half = 0.5 * lcoeff;
            tree.add_quad_coo_rel(add, pool, v_row, v_col, rows, cols, vals, half)?;
            tree.check_add(add)?;
        }
        self.register_tree_vars(ei, vlist_from)
    }

    /// Add `coeff * sum_i v1_i * v2_i`, safe version. Re-adding the same
    /// positions accumulates.
    pub fn equ_addbilin(
        &mut self,
        ei: Idx,
        v1: &Avar,
        v2: &Avar,
        coeff: f64,
    ) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if v1.len() != v2.len() {
            return Err(CoreError::InvalidArgument(format!(
                "bilinear variable sets have sizes {} and {}",
                v1.len(),
                v2.len()
            )));
        }
        let ei = self.ensure_editable(ei)?;

        let vlist_from = self.tree_vlist_len(ei);
        {
            let pool = &mut self.pool;
            let equ = &mut self.equs[ei.idx()];
            let est = equ.nl_estimate() + 4 * v1.len();
            let tree = equ.bootstrap_tree(est);

            let mut lcoeff = coeff;
            let add = tree.find_or_add_root_add_node(pool, &mut lcoeff)?;
            for i in 0..v1.len() {
                let slot = tree.child_free_slot(add);
                tree.add_bilin(NlAddr::Child(add, slot), pool, lcoeff, v1.fget(i), v2.fget(i))?;
            }
            tree.check_add(add)?;
        }
        self.register_tree_vars(ei, vlist_from)
    }

    // ------------------------------------------------------------------
    // Equation-level composition
    // ------------------------------------------------------------------

    /// Add a mapping image to an equation, unsafe version.
    ///
    /// The source equation is `z = f(x)` with `z = vi_map`; the destination
    /// receives `s * f(x)` where `s` is `coeff` when finite, otherwise
    /// `-1 / coeff(vi_map)`. The caller guarantees the linear parts do not
    /// collide.
    pub fn equ_add_map(
        &mut self,
        ei_dst: Idx,
        ei_src: Idx,
        vi_map: Idx,
        coeff: f64,
    ) -> CoreResult<()> {
        self.chk_ei(ei_dst)?;
        self.chk_ei(ei_src)?;
        if ei_dst == ei_src {
            return Err(CoreError::InvalidArgument(
                "source and destination equations must differ".into(),
            ));
        }

        let s = if coeff.is_finite() {
            coeff
        } else {
            let (c_z, _) = self.equs[ei_src.idx()].lequ.find(vi_map).ok_or_else(|| {
                CoreError::RuntimeError(format!(
                    "could not find variable '{}' in equation '{}'",
                    self.var_name(vi_map),
                    self.equ_name(ei_src)
                ))
            })?;
            if c_z.abs() < f64::EPSILON {
                return Err(CoreError::InvalidValue(format!(
                    "coefficient of '{}' in '{}' is too small: {c_z}",
                    self.var_name(vi_map),
                    self.equ_name(ei_src)
                )));
            }
            -1.0 / c_z
        };

        // constant part
        let src_cst = self.equs[ei_src.idx()].get_cst()?;
        self.equs[ei_dst.idx()].add_cst(s * src_cst)?;

        // linear part, minus the mapped variable
        let src_lin: Vec<(Idx, f64)> = self.equs[ei_src.idx()].lequ.iter().collect();
        for (vi, a) in src_lin {
            if vi == vi_map {
                continue;
            }
            self.equs[ei_dst.idx()].lequ.add(vi, s * a)?;
            self.cmat
                .equ_add_newlvar(ei_dst, vi, s * a, &mut self.vars, &mut self.n)?;
        }

        // nonlinear part
        self.equ_add_nl_part(ei_dst, ei_src, s, None)
    }

    /// Deep-copy the nonlinear part of `ei_src`, scaled, into `ei_dst`.
    fn equ_add_nl_part(
        &mut self,
        ei_dst: Idx,
        ei_src: Idx,
        coeff: f64,
        rosetta: Option<&[Idx]>,
    ) -> CoreResult<()> {
        if !self.equs[ei_src.idx()].has_nl() {
            return Ok(());
        }

        let vlist_from;
        {
            let pool = &mut self.pool;
            let (dst, src) = two_equs(&mut self.equs, ei_dst.idx(), ei_src.idx());
            let src_tree = src.tree.as_ref().expect("has_nl checked");
            let src_root = src_tree.root().expect("has_nl checked");

            let est = dst.nl_estimate() + src_tree.num_nodes();
            let tree = dst.bootstrap_tree(est);
            vlist_from = tree.vlist().len();

            let mut lcoeff = coeff;
            let add = tree.find_or_add_root_add_node(pool, &mut lcoeff)?;
            let slot = tree.child_free_slot(add);
            let target = tree.mul_cst(NlAddr::Child(add, slot), pool, lcoeff)?;
            let copied = match rosetta {
                None => tree.copy_in(src_tree, src_root, None, pool)?,
                Some(table) => tree.copy_in_rosetta(src_tree, src_root, table, None, pool)?,
            };
            tree.put(target, copied);
            tree.check_add(add)?;
        }
        self.register_tree_vars(ei_dst, vlist_from)
    }

    /// Generic safe composition: `dst += coeff * rosetta(src)`.
    pub fn equ_add_equ(
        &mut self,
        ei_dst: Idx,
        ei_src: Idx,
        coeff: f64,
        rosetta: Option<&[Idx]>,
    ) -> CoreResult<()> {
        self.chk_ei(ei_dst)?;
        self.chk_ei(ei_src)?;
        if ei_dst == ei_src {
            return Err(CoreError::InvalidArgument(
                "source and destination equations must differ".into(),
            ));
        }

        let src_cst = self.equs[ei_src.idx()].get_cst()?;
        self.equs[ei_dst.idx()].add_cst(coeff * src_cst)?;

        let src_lin: Vec<(Idx, f64)> = self.equs[ei_src.idx()].lequ.iter().collect();
        for (svi, sval) in src_lin {
            let vi = match rosetta {
                Some(table) => {
                    let vi = table[svi.idx()];
                    if !vi.is_valid() {
                        return Err(CoreError::Inconsistency(format!(
                            "variable {svi} maps to {vi} in the translation table"
                        )));
                    }
                    vi
                }
                None => svi,
            };
            let val = coeff * sval;

            let mut is_nl = false;
            let existed =
                self.cmat
                    .equ_add_lvar(ei_dst, vi, val, &mut is_nl, &mut self.vars, &mut self.n)?;
            if is_nl {
                return Err(CoreError::NotImplemented(
                    "merging a linear source term into a nonlinear destination occurrence",
                ));
            }
            let lequ = &mut self.equs[ei_dst.idx()].lequ;
            if existed {
                let (old, pos) = lequ.find(vi).expect("cell existed");
                lequ.set_coeff(pos, old + val)?;
            } else {
                lequ.add_unique(vi, val)?;
            }
        }

        self.equ_add_nl_part(ei_dst, ei_src, coeff, rosetta)
    }

    /// `dst += coeff * vi * src`, safe version.
    ///
    /// A non-constant source multiplied by a variable must live in the
    /// nonlinear part; only the constant contributes a linear `coeff*cst*vi`
    /// term.
    pub fn equ_add_mulv_equ(
        &mut self,
        ei_dst: Idx,
        ei_src: Idx,
        vi: Idx,
        coeff: f64,
    ) -> CoreResult<()> {
        self.chk_ei(ei_dst)?;
        self.chk_ei(ei_src)?;
        self.chk_vi(vi)?;
        if ei_dst == ei_src {
            return Err(CoreError::InvalidArgument(
                "source and destination equations must differ".into(),
            ));
        }

        let src_cst = self.equs[ei_src.idx()].get_cst()?;
        let src_has_lin = self.equs[ei_src.idx()].has_lin();
        let src_has_nl = self.equs[ei_src.idx()].has_nl();

        if !src_has_lin && !src_has_nl {
            if src_cst.abs() > f64::EPSILON {
                self.equ_addlvar(ei_dst, vi, coeff * src_cst)?;
            }
            return Ok(());
        }

        let vlist_from;
        {
            let pool = &mut self.pool;
            let (dst, src) = two_equs(&mut self.equs, ei_dst.idx(), ei_src.idx());

            let est = dst.nl_estimate()
                + src.lequ.len()
                + src.tree.as_ref().map_or(0, |t| t.num_nodes());
            let tree = dst.bootstrap_tree(est);
            vlist_from = tree.vlist().len();

            let mut lcoeff = coeff;
            let add = tree.find_or_add_root_add_node(pool, &mut lcoeff)?;

            if src_has_lin {
                let slot = tree.child_free_slot(add);
                let open = tree
                    .add_bilin(NlAddr::Child(add, slot), pool, lcoeff, vi, Idx::NA)?
                    .expect("open operand slot");
                tree.add_lin_term(open, pool, &src.lequ, Idx::INVALID, 1.0)?;
                if let Some(inner) = tree.at(open) {
                    tree.check_add(inner)?;
                }
            }

            if src_has_nl {
                let src_tree = src.tree.as_ref().expect("has_nl");
                let src_root = src_tree.root().expect("has_nl");
                let slot = tree.child_free_slot(add);
                let open = tree
                    .add_bilin(NlAddr::Child(add, slot), pool, lcoeff, vi, Idx::NA)?
                    .expect("open operand slot");
                let copied = tree.copy_in(src_tree, src_root, None, pool)?;
                tree.put(open, copied);
            }
        }
        self.register_tree_vars(ei_dst, vlist_from)?;

        if src_cst.abs() > f64::EPSILON {
            self.equ_addlvar(ei_dst, vi, coeff * src_cst)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Whole-equation transformations
    // ------------------------------------------------------------------

    /// Scale an equation: linear part, tree, constant, and container
    /// matrix together.
    pub fn equ_scal(&mut self, ei: Idx, coeff: f64) -> CoreResult<()> {
        self.chk_ei(ei)?;
        if !coeff.is_finite() {
            return Err(CoreError::InvalidValue(format!("non-finite scale {coeff}")));
        }
        let ei = self.ensure_editable(ei)?;

        {
            let pool = &mut self.pool;
            let equ = &mut self.equs[ei.idx()];
            equ.lequ.scal(coeff)?;
            if remold_core::equ::admits_scalar_cst(equ.object, equ.cone) {
                let cst = equ.raw_cst();
                equ.set_cst(cst * coeff)?;
            }
            if let Some(tree) = &mut equ.tree {
                tree.scal(pool, coeff)?;
            }
        }
        self.cmat.scal(ei, coeff)
    }

    /// Flip an equation: a fresh index receives the sign-flipped copy, the
    /// original is removed, and the rosetta records the move.
    ///
    /// Only meaningful for 1-D polyhedral cones; the cone swaps `R+ ↔ R-`,
    /// an active bound swaps sides, and level/multiplier are negated.
    pub fn equ_flip(&mut self, ei: Idx) -> CoreResult<Idx> {
        self.chk_ei(ei)?;

        let e = &self.equs[ei.idx()];
        if !e.cone.is_1d_polyhedral() {
            return Err(CoreError::UnExpectedData(format!(
                "equation '{}' is not a simple (in)equality but an inclusion in {}",
                self.equ_name(ei),
                e.cone
            )));
        }
        if self.objequ == ei {
            return Err(CoreError::NotImplemented(
                "flipping the objective equation",
            ));
        }

        let name = format!("{}_flipped", self.equ_name(ei));
        let (object, cone) = (e.object, e.cone);
        let ei_new = self.add_equ_empty(Some(&name), object, cone)?;

        let mut copy = self.equs[ei.idx()].copy_to(ei_new, 0, Idx::INVALID);
        copy.multiplier = copy.multiplier.map(|m| -m);
        copy.value = copy.value.map(|v| -v);
        let cst = copy.get_cst()?;
        copy.set_cst(-cst)?;
        copy.cone = cone.flipped();
        copy.basis = copy.basis.flipped();
        copy.lequ.flip_signs();
        if let Some(tree) = &mut copy.tree {
            tree.scal_umin();
        }
        self.equs[ei_new.idx()] = copy;

        self.cmat
            .copy_equ_flipped(ei, ei_new, &mut self.vars, &mut self.n)?;

        if let Some(meta) = &mut self.equmeta {
            let mut m = meta[ei.idx()].clone();
            m.is_flipped = true;
            meta[ei_new.idx()] = m;
        }

        trace!(from = %self.equ_name(ei), to = %self.equ_name(ei_new), "FLIPPED equ");

        self.delete_equ(ei)?;
        self.equ_rosetta[ei.idx()] =
            EquRosetta { target: RosettaTarget::Replaced(ei_new), flipped: true };

        Ok(ei_new)
    }

    /// Duplicate an equation into a fresh slot (named `<old>_s<stage>`),
    /// remove the original, and record the replacement. Used when an edit
    /// must land in a later stage than the source's.
    pub fn dup_equ(&mut self, ei: Idx, lin_extra: usize, vi_skip: Idx) -> CoreResult<Idx> {
        self.chk_ei(ei)?;
        if !self.cmat.equ_is_active(ei) {
            return Err(CoreError::InvalidArgument(format!(
                "equation '{}' is not active, cannot duplicate it",
                self.equ_name(ei)
            )));
        }

        let name = format!("{}_s{}", self.equ_name(ei), self.current_stage);
        let (object, cone) = {
            let e = &self.equs[ei.idx()];
            (e.object, e.cone)
        };
        let ei_new = self.add_equ_empty(Some(&name), object, cone)?;

        self.equs[ei_new.idx()] = self.equs[ei.idx()].copy_to(ei_new, lin_extra, vi_skip);
        self.cmat
            .copy_equ_except(ei, ei_new, vi_skip, &mut self.vars, &mut self.n)?;

        trace!(from = %self.equ_name(ei), to = %self.equ_name(ei_new), "DUP equ");

        self.delete_equ(ei)?;
        self.equ_rosetta[ei.idx()] =
            EquRosetta { target: RosettaTarget::Replaced(ei_new), flipped: false };

        if self.objequ == ei {
            self.objequ = ei_new;
        }

        Ok(ei_new)
    }

    /// Apply the pending container transformations: flip every marked
    /// equation.
    pub fn transform_flipped(&mut self) -> CoreResult<()> {
        let marked = std::mem::take(&mut self.flipped_equs);
        for ei in marked {
            let info = self.get_equation(ei)?;
            self.equ_flip(info.ei)?;
        }
        Ok(())
    }
}
