//! In-place editing primitives for expression trees.
//!
//! Every primitive inserts at an [`NlAddr`] and keeps the vlist current.
//! Primitives that build multi-part expressions return the address where
//! the next piece belongs, mirroring how an editor threads an insertion
//! cursor through the tree.
//!
//! The container matrix is *not* updated here: callers snapshot the vlist
//! length around an edit and register the new variables afterwards.

use remold_core::{CoreError, CoreResult, Idx, Lequ, Pool};

use super::node::{NlFunc, NlNode, NlOp, NodeId, OpArg};
use super::{NlAddr, NlTree};

impl NlTree {
    /// Insert a constant leaf at `addr`. If the address already holds an
    /// `Add` node, the constant becomes one of its operands.
    pub fn add_cst(&mut self, addr: NlAddr, pool: &mut Pool, cst: f64) -> CoreResult<()> {
        let pool_idx = if cst == 0.0 { 0 } else { pool.get(cst)? };
        match self.at(addr) {
            None => {
                let leaf = self.alloc_cst(pool_idx);
                self.put(addr, leaf);
                Ok(())
            }
            Some(id) if self.node(id).op == NlOp::Add => {
                let slot = self.child_free_slot(id);
                let leaf = self.alloc_cst(pool_idx);
                self.put(NlAddr::Child(id, slot), leaf);
                Ok(())
            }
            Some(id) => Err(CoreError::UnExpectedData(format!(
                "cannot add a constant under a {:?} node",
                self.node(id).op
            ))),
        }
    }

    /// Insert `coeff * vi` at `addr`, fusing the coefficient into the node
    /// itself: `1 * v` is a plain leaf, `-1 * v` a fused negation, anything
    /// else a `Mul` carrying the constant as its implicit operand.
    pub fn add_var(
        &mut self,
        addr: NlAddr,
        pool: &mut Pool,
        vi: Idx,
        coeff: f64,
    ) -> CoreResult<()> {
        if !coeff.is_finite() {
            return Err(CoreError::InvalidValue(format!(
                "non-finite coefficient {coeff} for variable {vi}"
            )));
        }

        let addr = match self.at(addr) {
            None => addr,
            Some(id) if self.node(id).op == NlOp::Add => {
                let slot = self.child_free_slot(id);
                NlAddr::Child(id, slot)
            }
            Some(id) => {
                return Err(CoreError::UnExpectedData(format!(
                    "cannot add a variable under a {:?} node",
                    self.node(id).op
                )))
            }
        };

        if coeff == 1.0 {
            let leaf = self.alloc_var(vi);
            self.put(addr, leaf);
        } else if coeff == -1.0 {
            let um = self.alloc(NlOp::Umin, 0);
            self.node_mut(um).oparg = OpArg::Var(vi);
            self.vlist_add(vi);
            self.put(addr, um);
        } else {
            let k = pool.get(coeff)?;
            let mul = self.alloc(NlOp::Mul, 1);
            self.node_mut(mul).oparg = OpArg::Cst(k);
            let leaf = self.alloc_var(vi);
            self.node_mut(mul).children[0] = Some(leaf);
            self.put(addr, mul);
        }
        Ok(())
    }

    /// Multiply the sub-expression at `addr` by `coeff`.
    ///
    /// With an empty slot this prepares a `Mul` node and returns the
    /// address of its operand; with `coeff == 1` nothing is created and the
    /// address is returned unchanged; an existing `Mul` has the factor
    /// folded into its implicit constant.
    pub fn mul_cst(&mut self, addr: NlAddr, pool: &mut Pool, coeff: f64) -> CoreResult<NlAddr> {
        if !coeff.is_finite() {
            return Err(CoreError::InvalidValue(format!("non-finite factor {coeff}")));
        }
        if (coeff - 1.0).abs() < f64::EPSILON {
            return Ok(addr);
        }

        match self.at(addr) {
            None => {
                let k = pool.get(coeff)?;
                let mul = self.alloc(NlOp::Mul, 1);
                self.node_mut(mul).oparg = OpArg::Cst(k);
                self.put(addr, mul);
                Ok(NlAddr::Child(mul, 0))
            }
            Some(id) if self.node(id).op == NlOp::Mul => {
                let new_oparg = match self.node(id).oparg {
                    OpArg::Cst(k) => OpArg::Cst(pool.get(pool.read(k)? * coeff)?),
                    OpArg::Fma(k) => OpArg::Fma(pool.get(pool.read(k)? * coeff)?),
                    OpArg::Unset => OpArg::Cst(pool.get(coeff)?),
                    OpArg::Var(_) => {
                        // fused variable occupies the slot: wrap instead
                        return self.wrap_in_mul(addr, id, pool, coeff);
                    }
                };
                self.node_mut(id).oparg = new_oparg;
                Ok(addr)
            }
            Some(id) => self.wrap_in_mul(addr, id, pool, coeff),
        }
    }

    fn wrap_in_mul(
        &mut self,
        addr: NlAddr,
        id: NodeId,
        pool: &mut Pool,
        coeff: f64,
    ) -> CoreResult<NlAddr> {
        let k = pool.get(coeff)?;
        let mul = self.alloc(NlOp::Mul, 1);
        self.node_mut(mul).oparg = OpArg::Cst(k);
        self.node_mut(mul).children[0] = Some(id);
        self.put(addr, mul);
        Ok(addr)
    }

    /// Wrap the content of `addr` in a unary minus; with an empty slot,
    /// create the minus and return the address of its operand.
    pub fn umin(&mut self, addr: NlAddr) -> NlAddr {
        match self.at(addr) {
            None => {
                let um = self.alloc(NlOp::Umin, 1);
                self.put(addr, um);
                NlAddr::Child(um, 0)
            }
            Some(id) => {
                let um = self.alloc(NlOp::Umin, 1);
                self.node_mut(um).children[0] = Some(id);
                self.put(addr, um);
                addr
            }
        }
    }

    /// Splice `coeff * v1 * v2` at `addr`. When `v2` is not a valid index
    /// only `coeff * v1 * (...)` is built and the address of the open slot
    /// is returned for the caller to fill.
    pub fn add_bilin(
        &mut self,
        addr: NlAddr,
        pool: &mut Pool,
        coeff: f64,
        v1: Idx,
        v2: Idx,
    ) -> CoreResult<Option<NlAddr>> {
        let mul = self.alloc(NlOp::Mul, 2);
        if (coeff - 1.0).abs() >= f64::EPSILON {
            let k = pool.get(coeff)?;
            self.node_mut(mul).oparg = OpArg::Cst(k);
        }

        let leaf1 = self.alloc_var(v1);
        self.node_mut(mul).children[0] = Some(leaf1);

        let open = if v2.is_valid() {
            let leaf2 = self.alloc_var(v2);
            self.node_mut(mul).children[1] = Some(leaf2);
            None
        } else {
            Some(NlAddr::Child(mul, 1))
        };

        self.put(addr, mul);
        Ok(open)
    }

    /// Splice a one-argument function call `f(vi)` at `addr`.
    pub fn add_call1(&mut self, addr: NlAddr, vi: Idx, func: NlFunc) -> CoreResult<()> {
        let call = self.alloc(NlOp::Call1, 1);
        self.node_mut(call).value = func as u32;
        let leaf = self.alloc_var(vi);
        self.node_mut(call).children[0] = Some(leaf);
        self.put(addr, call);
        Ok(())
    }

    /// Splice `vi * vi` as a square call.
    pub fn add_sqr(&mut self, addr: NlAddr, vi: Idx) -> CoreResult<()> {
        self.add_call1(addr, vi, NlFunc::Sqr)
    }

    fn chk_add_node(&self, node: NodeId) -> CoreResult<()> {
        if self.node(node).op != NlOp::Add {
            return Err(remold_core::CoreError::UnExpectedData(format!(
                "expected an Add node for the quadratic terms, found {:?}",
                self.node(node).op
            )));
        }
        Ok(())
    }

    /// Append `coeff * sum_k x[k] * v_{i[k]} * v_{j[k]}` under an `Add`
    /// node. Diagonal entries (`i == j`) are promoted to square calls.
    pub fn add_quad_coo_abs(
        &mut self,
        node: NodeId,
        pool: &mut Pool,
        rows: &[Idx],
        cols: &[Idx],
        vals: &[f64],
        coeff: f64,
    ) -> CoreResult<()> {
        debug_assert_eq!(rows.len(), cols.len());
        debug_assert_eq!(rows.len(), vals.len());
        self.chk_add_node(node)?;

        for k in 0..rows.len() {
            let cur = self.child_free_slot(node);
            let slot = NlAddr::Child(node, cur);
            let (v1, v2) = (rows[k], cols[k]);
            let val = vals[k] * coeff;

            if v1 == v2 {
                let inner = self.mul_cst(slot, pool, val)?;
                self.add_sqr(inner, v1)?;
                let child = self.at(slot).expect("quad term just created");
                self.node_mut(child).print_now = true;
            } else {
                self.add_bilin(slot, pool, val, v1, v2)?;
            }
        }

        Ok(())
    }

    /// COO quadratic with indices relative to row and column variable sets.
    #[allow(clippy::too_many_arguments)]
    pub fn add_quad_coo_rel(
        &mut self,
        node: NodeId,
        pool: &mut Pool,
        v_row: &remold_core::Avar,
        v_col: &remold_core::Avar,
        rows: &[u32],
        cols: &[u32],
        vals: &[f64],
        coeff: f64,
    ) -> CoreResult<()> {
        debug_assert_eq!(rows.len(), cols.len());
        debug_assert_eq!(rows.len(), vals.len());
        self.chk_add_node(node)?;

        for k in 0..rows.len() {
            let v1 = v_row.get(rows[k] as usize)?;
            let v2 = v_col.get(cols[k] as usize)?;
            let cur = self.child_free_slot(node);
            let slot = NlAddr::Child(node, cur);
            let val = vals[k] * coeff;

            if v1 == v2 {
                let inner = self.mul_cst(slot, pool, val)?;
                self.add_sqr(inner, v1)?;
                let child = self.at(slot).expect("quad term just created");
                self.node_mut(child).print_now = true;
            } else {
                self.add_bilin(slot, pool, val, v1, v2)?;
            }
        }

        Ok(())
    }

    /// Insert `coeff * sum_i a_i x_i` (the linear part of another equation,
    /// minus one variable) as an `Add` node at `addr`; returns the address
    /// of the slot following the last inserted term.
    pub fn add_lin_term(
        &mut self,
        addr: NlAddr,
        pool: &mut Pool,
        lequ: &Lequ,
        vi_skip: Idx,
        coeff: f64,
    ) -> CoreResult<NlAddr> {
        let n_terms = lequ.len() - usize::from(lequ.contains(vi_skip));
        let (node, mut cur) = self.ensure_add_node(addr, n_terms + 1)?;

        for (vi, a) in lequ.iter() {
            if vi == vi_skip {
                continue;
            }
            self.add_var(NlAddr::Child(node, cur), pool, vi, coeff * a)?;
            cur += 1;
        }

        Ok(NlAddr::Child(node, cur))
    }

    /// Deep-copy a foreign sub-expression scaled by `coeff` into `addr`.
    ///
    /// `src_pool` must be given when the source tree belongs to another
    /// container so constant payloads get re-interned.
    pub fn add_nlexpr(
        &mut self,
        addr: NlAddr,
        src: &NlTree,
        src_node: NodeId,
        src_pool: Option<&Pool>,
        pool: &mut Pool,
        coeff: f64,
    ) -> CoreResult<()> {
        let target = self.mul_cst(addr, pool, coeff)?;
        if self.at(target).is_some() {
            return Err(CoreError::UnExpectedData(
                "insertion point for a copied expression is occupied".into(),
            ));
        }
        let copied = self.copy_in(src, src_node, src_pool, pool)?;
        self.put(target, copied);
        Ok(())
    }

    /// Multiply the whole tree by `coeff`: fold into an existing top
    /// multiplier or wrap the root.
    pub fn scal(&mut self, pool: &mut Pool, coeff: f64) -> CoreResult<()> {
        if self.root().is_none() || (coeff - 1.0).abs() < f64::EPSILON {
            return Ok(());
        }
        self.mul_cst(NlAddr::Root, pool, coeff)?;
        Ok(())
    }

    /// Negate the whole tree: unwrap a root unary minus, or wrap the root
    /// in one.
    pub fn scal_umin(&mut self) {
        match self.root() {
            None => {}
            Some(root) => {
                let node = self.node(root);
                if node.op == NlOp::Umin && matches!(node.oparg, OpArg::Unset) {
                    let child = node.children[0];
                    self.set_root(child);
                } else {
                    self.umin(NlAddr::Root);
                }
            }
        }
    }

    /// Replace every occurrence of a variable by a pool constant.
    ///
    /// Fused occurrences switch their operand kind; a fused negation gets
    /// an explicit constant child.
    pub fn replace_var_by_cst(&mut self, vi: Idx, pool_idx: remold_core::PoolIdx) -> CoreResult<()> {
        let Some(root) = self.root() else { return Ok(()) };
        let target = vi.idx() as u32;

        let mut stack = vec![root];
        let mut fused_umins = Vec::new();
        while let Some(id) = stack.pop() {
            let node = self.node_mut(id);
            match (node.op, node.oparg) {
                (NlOp::Var, _) if node.value == target => {
                    *node = NlNode::cst(pool_idx);
                }
                (NlOp::Umin, OpArg::Var(v)) if v == vi => {
                    fused_umins.push(id);
                }
                (_, OpArg::Var(v)) if v == vi => {
                    node.oparg = OpArg::Cst(pool_idx);
                }
                _ => {}
            }
            stack.extend(self.node(id).live_children());
        }

        for id in fused_umins {
            let leaf = self.alloc_cst(pool_idx);
            let node = self.node_mut(id);
            node.oparg = OpArg::Unset;
            node.children = vec![Some(leaf)];
        }

        self.refresh_vlist();
        Ok(())
    }

    /// Replace every occurrence of a variable by a deep copy of another
    /// tree's root expression.
    pub fn replace_var_by_tree(
        &mut self,
        vi: Idx,
        subtree: &NlTree,
        src_pool: Option<&Pool>,
        pool: &mut Pool,
    ) -> CoreResult<()> {
        let Some(sub_root) = subtree.root() else {
            return Err(CoreError::UnExpectedData(
                "substitution tree has no root".into(),
            ));
        };
        let Some(root) = self.root() else { return Ok(()) };
        let target = vi.idx() as u32;

        // collect occurrences first so the walk is not disturbed by copies
        let mut plain = Vec::new();
        let mut fused = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.op == NlOp::Var && node.value == target {
                plain.push(id);
            } else if node.oparg == OpArg::Var(vi) {
                fused.push(id);
            }
            stack.extend(node.live_children());
        }

        for id in plain {
            let copied = self.copy_in(subtree, sub_root, src_pool, pool)?;
            self.nodes_swap_content(id, copied);
        }
        for id in fused {
            let copied = self.copy_in(subtree, sub_root, src_pool, pool)?;
            let node = self.node_mut(id);
            node.oparg = OpArg::Unset;
            match node.op {
                NlOp::Umin => node.children = vec![Some(copied)],
                _ => {
                    if let Some(slot) = node.children.iter_mut().find(|c| c.is_none()) {
                        *slot = Some(copied);
                    } else {
                        node.children.push(Some(copied));
                    }
                }
            }
        }

        self.refresh_vlist();
        Ok(())
    }

    fn nodes_swap_content(&mut self, dst: NodeId, src: NodeId) {
        let src_node = self.node(src).clone();
        *self.node_mut(dst) = src_node;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nltree::eval::eval_tree;

    fn eval(tree: &NlTree, pool: &Pool, x: &[f64]) -> f64 {
        eval_tree(tree, pool, x).unwrap()
    }

    #[test]
    fn test_add_var_fusing() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 3).unwrap();

        t.add_var(NlAddr::Child(add, 0), &mut pool, Idx::new(0), 1.0).unwrap();
        t.add_var(NlAddr::Child(add, 1), &mut pool, Idx::new(1), -1.0).unwrap();
        t.add_var(NlAddr::Child(add, 2), &mut pool, Idx::new(2), 2.5).unwrap();

        assert_eq!(eval(&t, &pool, &[3.0, 4.0, 10.0]), 3.0 - 4.0 + 25.0);
        let mut vl = t.vlist().to_vec();
        vl.sort();
        assert_eq!(vl, vec![Idx::new(0), Idx::new(1), Idx::new(2)]);
    }

    #[test]
    fn test_mul_cst_folds() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);

        let inner = t.mul_cst(NlAddr::Root, &mut pool, 2.0).unwrap();
        let leaf = t.alloc_var(Idx::new(0));
        t.put(inner, leaf);

        // multiplying again folds into the same node
        t.mul_cst(NlAddr::Root, &mut pool, 3.0).unwrap();
        assert_eq!(eval(&t, &pool, &[5.0]), 30.0);
        assert_eq!(t.node(t.root().unwrap()).op, NlOp::Mul);
    }

    #[test]
    fn test_mul_cst_by_one_is_noop() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(4);
        let addr = t.mul_cst(NlAddr::Root, &mut pool, 1.0).unwrap();
        assert_eq!(addr, NlAddr::Root);
        assert!(t.root().is_none());
    }

    #[test]
    fn test_add_bilin() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let open = t
            .add_bilin(NlAddr::Root, &mut pool, 0.5, Idx::new(0), Idx::new(1))
            .unwrap();
        assert!(open.is_none());
        assert_eq!(eval(&t, &pool, &[3.0, 8.0]), 12.0);
    }

    #[test]
    fn test_add_bilin_open_slot() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let open = t
            .add_bilin(NlAddr::Root, &mut pool, 2.0, Idx::new(0), Idx::NA)
            .unwrap()
            .expect("open slot");
        let leaf = t.alloc_var(Idx::new(1));
        t.put(open, leaf);
        assert_eq!(eval(&t, &pool, &[3.0, 4.0]), 24.0);
    }

    #[test]
    fn test_add_quad_coo_abs() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(16);
        let rows = [Idx::new(0), Idx::new(1), Idx::new(0)];
        let cols = [Idx::new(0), Idx::new(1), Idx::new(1)];
        let vals = [2.0, 4.0, 1.0];
        let (add, _) = t.ensure_add_node(NlAddr::Root, 3).unwrap();
        t.add_quad_coo_abs(add, &mut pool, &rows, &cols, &vals, 0.5)
            .unwrap();

        // 0.5*(2 x0^2 + 4 x1^2 + x0 x1)
        let x = [3.0, 2.0];
        assert_eq!(eval(&t, &pool, &x), 0.5 * (2.0 * 9.0 + 4.0 * 4.0 + 6.0));
    }

    #[test]
    fn test_scal_and_umin() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let leaf = t.alloc_var(Idx::new(0));
        t.set_root(Some(leaf));

        t.scal(&mut pool, 4.0).unwrap();
        assert_eq!(eval(&t, &pool, &[2.0]), 8.0);

        t.scal_umin();
        assert_eq!(eval(&t, &pool, &[2.0]), -8.0);
        t.scal_umin();
        assert_eq!(eval(&t, &pool, &[2.0]), 8.0);
    }

    #[test]
    fn test_add_nlexpr_scales_copy() {
        let mut src_pool = Pool::new();
        let mut src = NlTree::with_estimate(8);
        src.add_bilin(NlAddr::Root, &mut src_pool, 3.0, Idx::new(0), Idx::new(1))
            .unwrap();
        let src_root = src.root().unwrap();

        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 1).unwrap();
        t.add_nlexpr(NlAddr::Child(add, 0), &src, src_root, Some(&src_pool), &mut pool, -2.0)
            .unwrap();

        // -2 * (3 * x0 * x1)
        assert_eq!(eval(&t, &pool, &[2.0, 5.0]), -60.0);
        let mut vl = t.vlist().to_vec();
        vl.sort();
        assert_eq!(vl, vec![Idx::new(0), Idx::new(1)]);
    }

    #[test]
    fn test_replace_var_by_cst() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 2).unwrap();
        t.add_var(NlAddr::Child(add, 0), &mut pool, Idx::new(0), 1.0).unwrap();
        t.add_var(NlAddr::Child(add, 1), &mut pool, Idx::new(1), 3.0).unwrap();

        let k = pool.get(7.0).unwrap();
        t.replace_var_by_cst(Idx::new(0), k).unwrap();
        assert_eq!(eval(&t, &pool, &[0.0, 2.0]), 7.0 + 6.0);
        assert_eq!(t.vlist(), &[Idx::new(1)]);
    }

    #[test]
    fn test_replace_var_by_tree() {
        let mut pool = Pool::new_gams();

        // substitution expression: x1 * x2
        let mut sub = NlTree::with_estimate(4);
        sub.add_bilin(NlAddr::Root, &mut pool, 1.0, Idx::new(1), Idx::new(2))
            .unwrap();

        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 2).unwrap();
        t.add_var(NlAddr::Child(add, 0), &mut pool, Idx::new(0), 2.0).unwrap();
        t.add_var(NlAddr::Child(add, 1), &mut pool, Idx::new(3), 1.0).unwrap();

        t.replace_var_by_tree(Idx::new(0), &sub, None, &mut pool).unwrap();
        // 2*(x1*x2) + x3
        assert_eq!(eval(&t, &pool, &[99.0, 3.0, 4.0, 5.0]), 2.0 * 12.0 + 5.0);
        assert!(!t.vlist().contains(&Idx::new(0)));
    }
}
