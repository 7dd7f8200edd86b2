//! Expression tree for the nonlinear part of an equation.
//!
//! An [`NlTree`] owns an arena of nodes, an optional root, and a
//! deduplicated list of the variables reachable from the root (`vlist`).
//! The vlist is what keeps the container matrix in sync after bulk edits:
//! every primitive that introduces a variable appends to it.
//!
//! Nodes are never individually freed; orphaned nodes stay in the arena
//! until the tree is dropped. A purely linear equation has no root.

pub mod ampl;
pub mod edit;
pub mod eval;
pub mod gams;
pub mod node;

use remold_core::{CoreError, CoreResult, Idx, Pool, PoolIdx};

use node::{NlNode, NlOp, NodeId, OpArg};

/// A child-slot address inside a tree: either the root slot or the `pos`-th
/// child slot of a node. Editing primitives insert at an address and return
/// the address where the next piece should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlAddr {
    Root,
    Child(NodeId, usize),
}

/// Expression tree of one equation.
#[derive(Debug, Clone, PartialEq)]
pub struct NlTree {
    nodes: Vec<NlNode>,
    root: Option<NodeId>,
    /// Index of the owning equation.
    pub ei: Idx,
    /// Deduplicated variables reachable from the root.
    vlist: Vec<Idx>,
}

impl NlTree {
    /// Create a tree sized for roughly `est_nodes` nodes.
    pub fn with_estimate(est_nodes: usize) -> NlTree {
        NlTree {
            nodes: Vec::with_capacity(est_nodes.max(4)),
            root: None,
            ei: Idx::NA,
            vlist: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, id: Option<NodeId>) {
        self.root = id;
    }

    /// True when there is nothing to evaluate (no root at all, or a root
    /// Add that never received an operand).
    pub fn is_trivial(&self) -> bool {
        match self.root {
            None => true,
            Some(id) => {
                let n = self.node(id);
                n.op == NlOp::Add && n.count_operands() == 0
            }
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &NlNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NlNode {
        &mut self.nodes[id.index()]
    }

    /// Allocate a node with `nchildren` empty child slots.
    pub fn alloc(&mut self, op: NlOp, nchildren: usize) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NlNode::new(op, nchildren));
        id
    }

    /// Allocate a variable leaf and record it in the vlist.
    pub fn alloc_var(&mut self, vi: Idx) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NlNode::var(vi));
        self.vlist_add(vi);
        id
    }

    pub fn alloc_cst(&mut self, pool_idx: PoolIdx) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NlNode::cst(pool_idx));
        id
    }

    // ------------------------------------------------------------------
    // Addressing
    // ------------------------------------------------------------------

    /// The node currently stored at an address, if any.
    pub fn at(&self, addr: NlAddr) -> Option<NodeId> {
        match addr {
            NlAddr::Root => self.root,
            NlAddr::Child(parent, pos) => self.node(parent).children.get(pos).copied().flatten(),
        }
    }

    /// Store a node at an address, growing the child array if needed.
    pub fn put(&mut self, addr: NlAddr, id: NodeId) {
        match addr {
            NlAddr::Root => self.root = Some(id),
            NlAddr::Child(parent, pos) => {
                let children = &mut self.node_mut(parent).children;
                if pos >= children.len() {
                    children.resize(pos + 1, None);
                }
                children[pos] = Some(id);
            }
        }
    }

    /// First empty child slot of a node, reserving more slots if all are
    /// full.
    pub fn child_free_slot(&mut self, id: NodeId) -> usize {
        let node = self.node_mut(id);
        match node.children.iter().position(Option::is_none) {
            Some(pos) => pos,
            None => {
                let pos = node.children.len();
                node.children.resize(pos + 3, None);
                pos
            }
        }
    }

    /// Append `extra` empty child slots to a node.
    pub fn reserve_children(&mut self, id: NodeId, extra: usize) {
        let children = &mut self.node_mut(id).children;
        let len = children.len();
        children.resize(len + extra, None);
    }

    // ------------------------------------------------------------------
    // Variable list
    // ------------------------------------------------------------------

    pub fn vlist(&self) -> &[Idx] {
        &self.vlist
    }

    pub fn vlist_add(&mut self, vi: Idx) {
        debug_assert!(vi.is_valid());
        if !self.vlist.contains(&vi) {
            self.vlist.push(vi);
        }
    }

    pub fn reset_vlist(&mut self) {
        self.vlist.clear();
    }

    /// Variables reachable from the root, deduplicated, without touching
    /// the stored vlist.
    pub fn collect_vars(&self) -> Vec<Idx> {
        let mut out = Vec::new();
        let Some(root) = self.root else { return out };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.index()];
            let vi = match (node.op, node.oparg) {
                (NlOp::Var, _) => Some(Idx::new(node.value as usize)),
                (_, OpArg::Var(vi)) => Some(vi),
                _ => None,
            };
            if let Some(vi) = vi {
                if !out.contains(&vi) {
                    out.push(vi);
                }
            }
            stack.extend(node.live_children());
        }
        out
    }

    /// Rebuild the vlist by walking the tree from the root.
    pub fn refresh_vlist(&mut self) {
        self.vlist.clear();
        let Some(root) = self.root else { return };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.index()];
            let vi = match (node.op, node.oparg) {
                (NlOp::Var, _) => Some(Idx::new(node.value as usize)),
                (_, OpArg::Var(vi)) => Some(vi),
                _ => None,
            };
            if let Some(vi) = vi {
                if !self.vlist.contains(&vi) {
                    self.vlist.push(vi);
                }
            }
            stack.extend(node.live_children());
        }
    }

    // ------------------------------------------------------------------
    // Structure maintenance
    // ------------------------------------------------------------------

    /// Collapse an `Add` node whose effective operand count is one down to
    /// that operand. A no-op for anything else.
    pub fn check_add(&mut self, id: NodeId) -> CoreResult<()> {
        let node = self.node(id);
        if node.op != NlOp::Add || node.count_operands() != 1 {
            return Ok(());
        }

        match node.oparg {
            OpArg::Unset => {
                let child = node.live_children().next().expect("one operand");
                self.nodes[id.index()] = self.nodes[child.index()].clone();
            }
            OpArg::Cst(k) | OpArg::Fma(k) => {
                self.nodes[id.index()] = NlNode::cst(k);
            }
            OpArg::Var(vi) => {
                self.nodes[id.index()] = NlNode::var(vi);
            }
        }
        Ok(())
    }

    /// Ensure the root is an `Add` node ready to receive new summands and
    /// return its id.
    ///
    /// If the root is a constant multiple (a `Mul` by pool constant `k`
    /// wrapping an `Add`), the reported `coeff` is divided by `k` so a
    /// downstream multiply does not double-count the factor.
    pub fn find_or_add_root_add_node(
        &mut self,
        pool: &Pool,
        coeff: &mut f64,
    ) -> CoreResult<NodeId> {
        match self.root {
            None => {
                let add = self.alloc(NlOp::Add, 2);
                self.root = Some(add);
                Ok(add)
            }
            Some(root_id) => {
                let root = self.node(root_id);
                match root.op {
                    NlOp::Add => Ok(root_id),
                    NlOp::Mul => {
                        // a scaled tree: dive under the multiplier if the
                        // single child is an Add
                        if let (OpArg::Cst(k) | OpArg::Fma(k), 1) =
                            (root.oparg, root.live_children().count())
                        {
                            let child = root.live_children().next().expect("one child");
                            if self.node(child).op == NlOp::Add {
                                let k_val = pool.read(k)?;
                                if k_val.abs() < f64::EPSILON {
                                    return Err(CoreError::InvalidValue(
                                        "root multiplier is zero".into(),
                                    ));
                                }
                                *coeff /= k_val;
                                return Ok(child);
                            }
                        }
                        self.wrap_root_in_add()
                    }
                    _ => self.wrap_root_in_add(),
                }
            }
        }
    }

    fn wrap_root_in_add(&mut self) -> CoreResult<NodeId> {
        let old = self.root.expect("non-empty root");
        let add = self.alloc(NlOp::Add, 2);
        self.node_mut(add).children[0] = Some(old);
        self.root = Some(add);
        Ok(add)
    }

    /// Make sure `addr` holds an `Add` node with at least `extra` free
    /// child slots; returns the node and the offset of the first free slot.
    pub fn ensure_add_node(
        &mut self,
        addr: NlAddr,
        extra: usize,
    ) -> CoreResult<(NodeId, usize)> {
        match self.at(addr) {
            None => {
                let add = self.alloc(NlOp::Add, extra.max(1));
                self.put(addr, add);
                Ok((add, 0))
            }
            Some(id) => {
                let node = self.node_mut(id);
                if node.op != NlOp::Add {
                    return Err(CoreError::UnExpectedData(format!(
                        "expected an Add node at the insertion point, found {:?}",
                        node.op
                    )));
                }
                let offset = match node.children.iter().position(Option::is_none) {
                    Some(pos) => pos,
                    None => node.children.len(),
                };
                let needed = offset + extra;
                if node.children.len() < needed {
                    node.children.resize(needed, None);
                }
                Ok((id, offset))
            }
        }
    }

    // ------------------------------------------------------------------
    // Copies
    // ------------------------------------------------------------------

    /// Deep-copy a subtree of `src` into this tree, maintaining the vlist.
    ///
    /// `src_pool` translates constant payloads when the source tree comes
    /// from another container; pass `None` when both share a pool.
    pub fn copy_in(
        &mut self,
        src: &NlTree,
        src_node: NodeId,
        src_pool: Option<&Pool>,
        pool: &mut Pool,
    ) -> CoreResult<NodeId> {
        self.copy_in_x(src, src_node, src_pool, pool, None)
    }

    /// Deep-copy with every variable index translated through `rosetta`.
    pub fn copy_in_rosetta(
        &mut self,
        src: &NlTree,
        src_node: NodeId,
        rosetta: &[Idx],
        src_pool: Option<&Pool>,
        pool: &mut Pool,
    ) -> CoreResult<NodeId> {
        self.copy_in_x(src, src_node, src_pool, pool, Some(rosetta))
    }

    fn copy_in_x(
        &mut self,
        src: &NlTree,
        src_node: NodeId,
        src_pool: Option<&Pool>,
        pool: &mut Pool,
        rosetta: Option<&[Idx]>,
    ) -> CoreResult<NodeId> {
        let snode = src.node(src_node);

        let mut node = NlNode::new(snode.op, snode.children.len());
        node.print_now = snode.print_now;
        node.value = snode.value;
        node.oparg = snode.oparg;

        // translate variable payloads
        let map_vi = |vi: Idx| -> CoreResult<Idx> {
            match rosetta {
                None => Ok(vi),
                Some(table) => {
                    let vi_new = table[vi.idx()];
                    if !vi_new.is_valid() {
                        return Err(CoreError::Inconsistency(format!(
                            "variable {vi} maps to {vi_new} during tree copy"
                        )));
                    }
                    Ok(vi_new)
                }
            }
        };

        match (snode.op, snode.oparg) {
            (NlOp::Var, _) => {
                let vi = map_vi(Idx::new(snode.value as usize))?;
                node.value = vi.idx() as u32;
                self.vlist_add(vi);
            }
            (_, OpArg::Var(vi)) => {
                let vi = map_vi(vi)?;
                node.oparg = OpArg::Var(vi);
                self.vlist_add(vi);
            }
            (NlOp::Cst, _) => {
                if let Some(sp) = src_pool {
                    if snode.value != 0 {
                        node.value = pool.get(sp.read(snode.value)?)?;
                    }
                }
            }
            (_, OpArg::Cst(k)) => {
                if let Some(sp) = src_pool {
                    node.oparg = OpArg::Cst(pool.get(sp.read(k)?)?);
                }
            }
            (_, OpArg::Fma(k)) => {
                if let Some(sp) = src_pool {
                    node.oparg = OpArg::Fma(pool.get(sp.read(k)?)?);
                }
            }
            _ => {}
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);

        for (i, child) in snode.children.iter().enumerate() {
            if let Some(child) = child {
                let copied = self.copy_in_x(src, *child, src_pool, pool, rosetta)?;
                self.nodes[id.index()].children[i] = Some(copied);
            }
        }

        Ok(id)
    }

    /// Deep copy of the whole tree.
    pub fn dup(&self) -> NlTree {
        self.clone()
    }

    /// Deep copy with variable translation. Fails if any reachable variable
    /// maps to a sentinel.
    pub fn dup_rosetta(&self, rosetta: &[Idx]) -> CoreResult<NlTree> {
        let mut out = self.clone();
        out.apply_rosetta(rosetta)?;
        Ok(out)
    }

    /// Walk the tree, replacing every variable index `vi` by `rosetta[vi]`.
    /// Maintains the vlist.
    pub fn apply_rosetta(&mut self, rosetta: &[Idx]) -> CoreResult<()> {
        let Some(root) = self.root else { return Ok(()) };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id.index()];
            if node.op == NlOp::Var {
                let vi_new = rosetta[node.value as usize];
                if !vi_new.is_valid() {
                    return Err(CoreError::Inconsistency(format!(
                        "variable {} maps to {vi_new} in the translation table",
                        node.value
                    )));
                }
                node.value = vi_new.idx() as u32;
            } else if let OpArg::Var(vi) = node.oparg {
                let vi_new = rosetta[vi.idx()];
                if !vi_new.is_valid() {
                    return Err(CoreError::Inconsistency(format!(
                        "variable {vi} maps to {vi_new} in the translation table"
                    )));
                }
                node.oparg = OpArg::Var(vi_new);
            }
            stack.extend(self.nodes[id.index()].live_children());
        }
        self.refresh_vlist();
        Ok(())
    }
}

/// Create the tree of an equation on demand.
///
/// `est_nodes` sizes the arena; the estimate is free to be rough, the arena
/// grows as needed.
pub fn bootstrap(tree_slot: &mut Option<NlTree>, ei: Idx, est_nodes: usize) -> &mut NlTree {
    if tree_slot.is_none() {
        let mut tree = NlTree::with_estimate(est_nodes);
        tree.ei = ei;
        *tree_slot = Some(tree);
    }
    tree_slot.as_mut().expect("just created")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_addressing() {
        let mut t = NlTree::with_estimate(4);
        let add = t.alloc(NlOp::Add, 2);
        t.set_root(Some(add));
        let v = t.alloc_var(Idx::new(3));
        t.put(NlAddr::Child(add, 0), v);

        assert_eq!(t.at(NlAddr::Root), Some(add));
        assert_eq!(t.at(NlAddr::Child(add, 0)), Some(v));
        assert_eq!(t.at(NlAddr::Child(add, 1)), None);
        assert_eq!(t.vlist(), &[Idx::new(3)]);
    }

    #[test]
    fn test_check_add_collapses_single_child() {
        let mut t = NlTree::with_estimate(4);
        let add = t.alloc(NlOp::Add, 3);
        let v = t.alloc_var(Idx::new(0));
        t.node_mut(add).children[1] = Some(v);
        t.set_root(Some(add));

        t.check_add(add).unwrap();
        assert_eq!(t.node(add).op, NlOp::Var);
        assert_eq!(t.node(add).var_idx(), Idx::new(0));
    }

    #[test]
    fn test_check_add_keeps_two_operands() {
        let mut t = NlTree::with_estimate(4);
        let add = t.alloc(NlOp::Add, 1);
        let v = t.alloc_var(Idx::new(0));
        t.node_mut(add).children[0] = Some(v);
        t.node_mut(add).oparg = OpArg::Cst(1);
        t.check_add(add).unwrap();
        assert_eq!(t.node(add).op, NlOp::Add);
    }

    #[test]
    fn test_find_or_add_root_add_node() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(4);

        let mut coeff = 3.0;
        let add = t.find_or_add_root_add_node(&pool, &mut coeff).unwrap();
        assert_eq!(t.root(), Some(add));
        assert_eq!(coeff, 3.0);

        // wrap the Add in a Mul by 2: coeff must get divided
        let k = pool.get(2.0).unwrap();
        let mul = t.alloc(NlOp::Mul, 1);
        t.node_mut(mul).oparg = OpArg::Cst(k);
        t.node_mut(mul).children[0] = Some(add);
        t.set_root(Some(mul));

        let mut coeff = 3.0;
        let found = t.find_or_add_root_add_node(&pool, &mut coeff).unwrap();
        assert_eq!(found, add);
        assert_eq!(coeff, 1.5);
    }

    #[test]
    fn test_apply_rosetta() {
        let mut t = NlTree::with_estimate(4);
        let add = t.alloc(NlOp::Add, 2);
        let v0 = t.alloc_var(Idx::new(0));
        let v2 = t.alloc_var(Idx::new(2));
        t.node_mut(add).children[0] = Some(v0);
        t.node_mut(add).children[1] = Some(v2);
        t.set_root(Some(add));

        let rosetta = vec![Idx::new(5), Idx::DELETED, Idx::new(1)];
        t.apply_rosetta(&rosetta).unwrap();
        assert_eq!(t.node(v0).var_idx(), Idx::new(5));
        assert_eq!(t.node(v2).var_idx(), Idx::new(1));
        let mut vl = t.vlist().to_vec();
        vl.sort();
        assert_eq!(vl, vec![Idx::new(1), Idx::new(5)]);

        // identity rosetta is a no-op
        let before = t.clone();
        let identity: Vec<Idx> = (0..8).map(Idx::new).collect();
        t.apply_rosetta(&identity).unwrap();
        assert_eq!(t.node(v0), before.node(v0));
        assert_eq!(t.node(v2), before.node(v2));
    }

    #[test]
    fn test_copy_in_translates_pool() {
        let mut src_pool = Pool::new();
        let k = src_pool.get(7.5).unwrap();
        let mut src = NlTree::with_estimate(4);
        let mul = src.alloc(NlOp::Mul, 1);
        src.node_mut(mul).oparg = OpArg::Cst(k);
        let v = src.alloc_var(Idx::new(1));
        src.node_mut(mul).children[0] = Some(v);
        src.set_root(Some(mul));

        let mut dst_pool = Pool::new_gams();
        let mut dst = NlTree::with_estimate(4);
        let copied = dst
            .copy_in(&src, mul, Some(&src_pool), &mut dst_pool)
            .unwrap();

        let OpArg::Cst(k_new) = dst.node(copied).oparg else {
            panic!("expected fused constant")
        };
        assert_eq!(dst_pool.read(k_new).unwrap(), 7.5);
        assert_eq!(dst.vlist(), &[Idx::new(1)]);
    }
}
