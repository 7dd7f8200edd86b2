//! GAMS bytecode ↔ expression tree translation.
//!
//! A stream is parsed forward with a stack of in-flight nodes; N-ary
//! arithmetic nodes are sized by a greedy look-ahead over consecutive
//! opcodes of the same class, with `MulIAdd` fused into FMA operands.
//!
//! Emission walks the tree right-to-left and generates the stream forward,
//! then reverses it so a stack interpreter reads it back correctly. The
//! reversed stream is framed as `[Header(len), body..., Store(ei+1)]`.

use remold_core::{CoreError, CoreResult, Idx};

use crate::instr::{GamsOp, OpArgKind, OpcodeStream, GAMS_OPCODE_COUNT};

use super::node::{NlFunc, NlOp, NodeId, OpArg};
use super::NlTree;

// ---------------------------------------------------------------------
// Construction from bytecode
// ---------------------------------------------------------------------

/// Count how many upcoming opcodes belong to the N-ary node started at
/// `k`. Consecutive opcodes of the same class extend the node; for an Add
/// node, a push immediately followed by `MulIAdd` extends it by the fused
/// pair.
fn greedy_build(instrs: &[GamsOp], k: usize) -> usize {
    let class = instrs[k].op_class();
    let kmax = instrs.len();
    let start = k + 1;
    let mut kk = start;

    while kk < kmax {
        let instr = instrs[kk];
        let iclass = instr.op_class();
        if iclass == class && instr != GamsOp::MulIAdd {
            kk += 1;
        } else if class == Some(NlOp::Add)
            && matches!(iclass, Some(NlOp::Cst) | Some(NlOp::Var))
            && kk + 1 < kmax
            && instrs[kk + 1] == GamsOp::MulIAdd
        {
            kk += 2;
        } else {
            break;
        }
    }

    kk - start
}

fn pop(stack: &mut Vec<NodeId>) -> CoreResult<NodeId> {
    stack
        .pop()
        .ok_or_else(|| CoreError::InvalidOpCode("operand stack underflow".into()))
}

/// Parse one arithmetic family opcode at `k`; returns the position after
/// the consumed opcodes.
fn parse_arith(
    tree: &mut NlTree,
    instrs: &[GamsOp],
    args: &[i32],
    k: usize,
    stack: &mut Vec<NodeId>,
) -> CoreResult<usize> {
    let key = instrs[k];
    let class = key
        .op_class()
        .ok_or_else(|| CoreError::InvalidOpCode(format!("{} is not arithmetic", key.name())))?;

    let fwd = greedy_build(instrs, k);
    let node = tree.alloc(class, fwd + 2);

    if fwd == 0 && key == GamsOp::MulIAdd {
        tree.node_mut(node).oparg = OpArg::Fma(args[k] as u32);
    }

    let first = pop(stack)?;
    tree.node_mut(node).children[0] = Some(first);

    let mut d = 0usize;
    let mut i = 1usize;
    while i + d < fwd + 2 {
        let mut kk = k + i - 1 + d;
        let mut inner_prod = false;

        if instrs[kk].op_class() != Some(class) {
            // a push feeding the MulIAdd that follows it
            debug_assert_eq!(instrs[kk + 1], GamsOp::MulIAdd);
            kk += 1;
            d += 1;
            inner_prod = true;
        }

        match instrs[kk].oparg_kind() {
            OpArgKind::Cst => {
                let leaf = tree.alloc_cst(if instrs[kk] == GamsOp::PushZero {
                    0
                } else {
                    args[kk] as u32
                });
                tree.node_mut(node).children[i] = Some(leaf);
            }
            OpArgKind::Var => {
                let leaf = tree.alloc_var(Idx::new((args[kk] - 1) as usize));
                tree.node_mut(node).children[i] = Some(leaf);
            }
            OpArgKind::Fma => {
                let tmp = tree.alloc(NlOp::Mul, 1);
                tree.node_mut(tmp).oparg = OpArg::Fma(args[kk] as u32);

                if inner_prod {
                    tree.node_mut(tmp).print_now = true;
                    let push_op = instrs[kk - 1];
                    let leaf = match push_op.op_class() {
                        Some(NlOp::Var) => {
                            tree.alloc_var(Idx::new((args[kk - 1] - 1) as usize))
                        }
                        Some(NlOp::Cst) => tree.alloc_cst(if push_op == GamsOp::PushZero {
                            0
                        } else {
                            args[kk - 1] as u32
                        }),
                        _ => {
                            return Err(CoreError::InvalidOpCode(format!(
                                "{} cannot feed a fused multiply-add",
                                push_op.name()
                            )))
                        }
                    };
                    tree.node_mut(tmp).children[0] = Some(leaf);
                } else {
                    let prev = tree.node(node).children[i - 1];
                    tree.node_mut(tmp).children[0] = prev;
                    let replacement = pop(stack)?;
                    tree.node_mut(node).children[i - 1] = Some(replacement);
                }
                tree.node_mut(node).children[i] = Some(tmp);
            }
            OpArgKind::Unset => {
                let child = pop(stack)?;
                tree.node_mut(node).children[i] = Some(child);
            }
        }

        i += 1;
    }

    stack.push(node);
    Ok(k + fwd + 1)
}

/// Build an expression tree from a GAMS opcode stream.
///
/// Returns `None` for an empty stream (the equation is purely linear).
pub fn from_gams(stream: &OpcodeStream) -> CoreResult<Option<NlTree>> {
    let codelen = stream.len();
    if codelen == 0 {
        return Ok(None);
    }

    let mut tree = NlTree::with_estimate(codelen * 9 / 5);
    let instrs = &stream.instrs;
    let args = &stream.args;

    let mut stack: Vec<NodeId> = Vec::with_capacity(codelen);
    let mut pending_argn: Option<usize> = None;

    let mut k = 0usize;
    while k < codelen {
        let key = instrs[k];
        match key {
            GamsOp::NoOp | GamsOp::Header => k += 1,

            GamsOp::Store => {
                // trust the index in the bytecode
                tree.ei = Idx::new((args[k] - 1) as usize);
                k += 1;
            }

            GamsOp::PushV => {
                let leaf = tree.alloc_var(Idx::new((args[k] - 1) as usize));
                stack.push(leaf);
                k += 1;
            }

            GamsOp::PushI => {
                let leaf = tree.alloc_cst(args[k] as u32);
                stack.push(leaf);
                k += 1;
            }

            GamsOp::PushZero => {
                let leaf = tree.alloc_cst(0);
                stack.push(leaf);
                k += 1;
            }

            GamsOp::Add
            | GamsOp::AddV
            | GamsOp::AddI
            | GamsOp::Sub
            | GamsOp::SubV
            | GamsOp::SubI
            | GamsOp::Mul
            | GamsOp::MulV
            | GamsOp::MulI
            | GamsOp::Div
            | GamsOp::DivV
            | GamsOp::DivI
            | GamsOp::MulIAdd => {
                k = parse_arith(&mut tree, instrs, args, k, &mut stack)?;
            }

            GamsOp::UMin => {
                let child = pop(&mut stack)?;
                let um = tree.alloc(NlOp::Umin, 1);
                tree.node_mut(um).children[0] = Some(child);
                stack.push(um);
                k += 1;
            }

            GamsOp::UMinV => {
                let um = tree.alloc(NlOp::Umin, 0);
                let vi = Idx::new((args[k] - 1) as usize);
                tree.node_mut(um).oparg = OpArg::Var(vi);
                tree.vlist_add(vi);
                stack.push(um);
                k += 1;
            }

            GamsOp::CallArg1 => {
                let child = pop(&mut stack)?;
                let call = tree.alloc(NlOp::Call1, 1);
                tree.node_mut(call).value = args[k] as u32;
                tree.node_mut(call).children[0] = Some(child);
                stack.push(call);
                k += 1;
            }

            GamsOp::CallArg2 => {
                let right = pop(&mut stack)?;
                let left = pop(&mut stack)?;
                let call = tree.alloc(NlOp::Call2, 2);
                // variable^constant and constant^variable collapse to the
                // general real power
                let fc = args[k] as u32;
                tree.node_mut(call).value =
                    if fc == NlFunc::Cvpower as u32 || fc == NlFunc::Vcpower as u32 {
                        NlFunc::Rpower as u32
                    } else {
                        fc
                    };
                tree.node_mut(call).children[0] = Some(left);
                tree.node_mut(call).children[1] = Some(right);
                stack.push(call);
                k += 1;
            }

            GamsOp::FuncArgN => {
                pending_argn = Some(args[k] as usize);
                k += 1;
            }

            GamsOp::CallArgN => {
                let n = pending_argn.take().ok_or_else(|| {
                    CoreError::InvalidOpCode("CallArgN without a preceding FuncArgN".into())
                })?;
                if n < 3 {
                    return Err(CoreError::InvalidValue(format!(
                        "CallArgN with {n} operands"
                    )));
                }
                let call = tree.alloc(NlOp::CallN, n);
                tree.node_mut(call).value = args[k] as u32;
                for i in (0..n).rev() {
                    let child = pop(&mut stack)?;
                    tree.node_mut(call).children[i] = Some(child);
                }
                stack.push(call);
                k += 1;
            }

            GamsOp::Chk => {
                return Err(CoreError::UnExpectedData(format!(
                    "unexpected opcode {} in stream",
                    key.name()
                )))
            }
        }
    }

    let root = stack.pop();
    tree.set_root(root);
    tree.refresh_vlist();
    Ok(Some(tree))
}

// ---------------------------------------------------------------------
// Emission to bytecode
// ---------------------------------------------------------------------

/// Upper bound on the emitted stream length for a tree.
fn size_upper_bound(tree: &NlTree) -> usize {
    if tree.is_trivial() {
        0
    } else {
        3 * (tree.num_nodes() + 1)
    }
}

/// One child of an arithmetic node, together with the operator instruction
/// that combines it into the node.
fn emit_arith_child(
    tree: &NlTree,
    class: NlOp,
    child: NodeId,
    out: &mut OpcodeStream,
    explore: &mut Vec<NodeId>,
) -> CoreResult<()> {
    let c = tree.node(child);

    // a bare leaf merges into the operator as its fused variant
    if c.is_leaf() && c.live_children().next().is_none() {
        let arg = match c.op {
            NlOp::Var => c.value as i32 + 1,
            _ => c.value as i32,
        };
        out.push(GamsOp::fused(class, Some(c.op))?, arg);
        return Ok(());
    }

    // a constant-multiplied child of a sum is a fused multiply-add
    if class == NlOp::Add && c.op == NlOp::Mul && c.live_children().count() == 1 {
        if let OpArg::Fma(k) = c.oparg {
            out.push(GamsOp::MulIAdd, k as i32);
            let inner = c.live_children().next().expect("one child");
            return emit_node(tree, inner, out);
        }
    }

    out.push(GamsOp::fused(class, None)?, 0);
    if c.print_now {
        emit_node(tree, child, out)
    } else {
        explore.push(child);
        Ok(())
    }
}

fn emit_arith(tree: &NlTree, id: NodeId, out: &mut OpcodeStream) -> CoreResult<()> {
    let node = tree.node(id);
    let class = node.op;

    // the fused operand, if any, is combined last: its instruction comes
    // first in the forward stream
    let mut oparg_has_instr = false;
    match node.oparg {
        OpArg::Cst(k) => {
            out.push(GamsOp::fused(class, Some(NlOp::Cst))?, k as i32);
            oparg_has_instr = true;
        }
        OpArg::Var(vi) => {
            out.push(GamsOp::fused(class, Some(NlOp::Var))?, vi.idx() as i32 + 1);
            oparg_has_instr = true;
        }
        OpArg::Fma(k) => {
            // an FMA-tagged Mul outside an Add parent degrades to a plain
            // constant multiply; on an Add the tag carries no operand
            if class == NlOp::Mul {
                out.push(GamsOp::MulI, k as i32);
                oparg_has_instr = true;
            }
        }
        OpArg::Unset => {}
    }

    let children: Vec<NodeId> = node.live_children().collect();

    if children.len() < 2 {
        if oparg_has_instr && children.len() == 1 {
            return emit_node(tree, children[0], out);
        }
        if class == NlOp::Add && children.len() == 1 {
            return emit_node(tree, children[0], out);
        }
        return Err(CoreError::InvalidValue(format!(
            "{class:?} node has {} operands",
            node.count_operands()
        )));
    }

    let mut explore: Vec<NodeId> = Vec::new();

    for &child in children[2..].iter().rev() {
        emit_arith_child(tree, class, child, out, &mut explore)?;
    }
    emit_arith_child(tree, class, children[1], out, &mut explore)?;

    // the first child carries no operator of its own
    explore.push(children[0]);

    for &deferred in explore.iter().rev() {
        emit_node(tree, deferred, out)?;
    }

    Ok(())
}

fn emit_node(tree: &NlTree, id: NodeId, out: &mut OpcodeStream) -> CoreResult<()> {
    let node = tree.node(id);
    node.chk_children()?;

    match node.op {
        NlOp::Var => {
            out.push(GamsOp::PushV, node.value as i32 + 1);
            Ok(())
        }

        NlOp::Cst => {
            if node.value > 0 {
                out.push(GamsOp::PushI, node.value as i32);
            } else {
                out.push(GamsOp::PushZero, 0);
            }
            Ok(())
        }

        NlOp::Add | NlOp::Sub | NlOp::Mul | NlOp::Div => emit_arith(tree, id, out),

        NlOp::Umin => match node.oparg {
            OpArg::Var(vi) => {
                out.push(GamsOp::UMinV, vi.idx() as i32 + 1);
                Ok(())
            }
            _ => {
                out.push(GamsOp::UMin, 0);
                let child = node.live_children().next().expect("checked above");
                emit_node(tree, child, out)
            }
        },

        NlOp::Call1 => {
            out.push(GamsOp::CallArg1, node.value as i32);
            let child = node.live_children().next().expect("checked above");
            emit_node(tree, child, out)
        }

        NlOp::Call2 => {
            out.push(GamsOp::CallArg2, node.value as i32);
            let kids: Vec<NodeId> = node.live_children().collect();
            emit_node(tree, kids[1], out)?;
            emit_node(tree, kids[0], out)
        }

        NlOp::CallN => {
            out.push(GamsOp::CallArgN, node.value as i32);
            let count_at = out.len();
            out.push(GamsOp::FuncArgN, 0);

            let mut cnt = 0;
            for child in node.live_children().collect::<Vec<_>>().into_iter().rev() {
                emit_node(tree, child, out)?;
                cnt += 1;
            }
            out.args[count_at] = cnt;
            Ok(())
        }
    }
}

/// Emit a tree as a GAMS opcode stream for equation `ei`.
///
/// Returns an empty stream when the tree has no content.
pub fn to_gams(tree: &NlTree, ei: Idx) -> CoreResult<OpcodeStream> {
    let bound = size_upper_bound(tree);
    if bound == 0 {
        return Ok(OpcodeStream::default());
    }

    let mut out = OpcodeStream::with_capacity(bound);
    out.push(GamsOp::Store, ei.idx() as i32 + 1);

    emit_node(tree, tree.root().expect("non-trivial tree"), &mut out)?;
    debug_assert!(out.len() <= bound);

    out.push(GamsOp::Header, out.len() as i32 + 1);
    out.reverse();

    chk_gms_opcode(&out)?;
    Ok(out)
}

/// Validate a finished (reversed) opcode stream.
pub fn chk_gms_opcode(stream: &OpcodeStream) -> CoreResult<()> {
    let len = stream.len();
    if len == 0 {
        return Ok(());
    }

    if stream.instrs[0] != GamsOp::Header {
        return Err(CoreError::InvalidOpCode(format!(
            "stream starts with {}, not Header",
            stream.instrs[0].name()
        )));
    }
    if stream.args[0] != len as i32 {
        return Err(CoreError::InvalidOpCode(format!(
            "declared length {} does not match stream length {len}",
            stream.args[0]
        )));
    }

    for (i, &instr) in stream.instrs.iter().enumerate() {
        if (instr as i32) >= GAMS_OPCODE_COUNT {
            return Err(CoreError::InvalidOpCode(format!(
                "opcode @{i} has value {} (max is {})",
                instr as i32,
                GAMS_OPCODE_COUNT - 1
            )));
        }
        if instr == GamsOp::NoOp {
            return Err(CoreError::InvalidOpCode(format!("opcode @{i} is a no-op")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nltree::eval::eval_tree;
    use crate::nltree::NlAddr;
    use remold_core::Pool;

    fn roundtrip(tree: &NlTree, ei: Idx) -> NlTree {
        let stream = to_gams(tree, ei).unwrap();
        from_gams(&stream).unwrap().expect("non-empty stream")
    }

    fn assert_same_eval(a: &NlTree, b: &NlTree, pool: &Pool, points: &[&[f64]]) {
        for x in points {
            let va = eval_tree(a, pool, x).unwrap();
            let vb = eval_tree(b, pool, x).unwrap();
            assert!(
                (va - vb).abs() < 1e-12 * (1.0 + va.abs()),
                "trees differ at {x:?}: {va} vs {vb}"
            );
        }
    }

    #[test]
    fn test_roundtrip_flat_sum() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 3).unwrap();
        for (i, c) in [(0, 1.0), (1, -1.0), (2, 2.5)] {
            t.add_var(NlAddr::Child(add, i), &mut pool, Idx::new(i), c).unwrap();
        }

        let t2 = roundtrip(&t, Idx::new(4));
        assert_eq!(t2.ei, Idx::new(4));
        assert_same_eval(&t, &t2, &pool, &[&[1.0, 2.0, 3.0], &[-1.0, 0.5, 4.0]]);

        let mut vl = t2.vlist().to_vec();
        vl.sort();
        assert_eq!(vl, vec![Idx::new(0), Idx::new(1), Idx::new(2)]);
    }

    #[test]
    fn test_roundtrip_bilinear() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(16);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 2).unwrap();
        t.add_bilin(NlAddr::Child(add, 0), &mut pool, 0.5, Idx::new(0), Idx::new(1))
            .unwrap();
        t.add_bilin(NlAddr::Child(add, 1), &mut pool, 2.0, Idx::new(2), Idx::new(3))
            .unwrap();

        let t2 = roundtrip(&t, Idx::new(0));
        assert_same_eval(&t, &t2, &pool, &[&[1.0, 2.0, 3.0, 4.0], &[0.5, -3.0, 2.0, 1.5]]);
    }

    #[test]
    fn test_roundtrip_quadratic_with_print_now() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(32);
        let rows = [Idx::new(0), Idx::new(1), Idx::new(2)];
        let cols = [Idx::new(0), Idx::new(1), Idx::new(2)];
        let vals = [2.0, 4.0, 6.0];
        let (add, _) = t.ensure_add_node(NlAddr::Root, 3).unwrap();
        t.add_quad_coo_abs(add, &mut pool, &rows, &cols, &vals, 0.5)
            .unwrap();

        let t2 = roundtrip(&t, Idx::new(1));
        assert_same_eval(&t, &t2, &pool, &[&[1.0, 2.0, 3.0], &[-2.0, 0.0, 0.5]]);
    }

    #[test]
    fn test_roundtrip_call_and_umin() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(16);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 2).unwrap();
        t.add_call1(NlAddr::Child(add, 0), Idx::new(0), NlFunc::Exp).unwrap();
        t.add_var(NlAddr::Child(add, 1), &mut pool, Idx::new(1), -1.0).unwrap();

        let t2 = roundtrip(&t, Idx::new(0));
        assert_same_eval(&t, &t2, &pool, &[&[0.0, 1.0], &[1.0, -2.0]]);
    }

    #[test]
    fn test_stream_framing() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        t.add_bilin(NlAddr::Root, &mut pool, 1.0, Idx::new(0), Idx::new(1)).unwrap();

        let stream = to_gams(&t, Idx::new(7)).unwrap();
        assert_eq!(stream.instrs[0], GamsOp::Header);
        assert_eq!(stream.args[0], stream.len() as i32);
        assert_eq!(*stream.instrs.last().unwrap(), GamsOp::Store);
        assert_eq!(*stream.args.last().unwrap(), 8);
        assert!(stream.len() <= 3 * (t.num_nodes() + 1));
    }

    #[test]
    fn test_empty_tree_emits_nothing() {
        let t = NlTree::with_estimate(2);
        let stream = to_gams(&t, Idx::new(0)).unwrap();
        assert!(stream.is_empty());
        assert!(from_gams(&stream).unwrap().is_none());
    }

    #[test]
    fn test_chk_rejects_bad_streams() {
        let mut stream = OpcodeStream::default();
        stream.push(GamsOp::PushV, 1);
        assert!(chk_gms_opcode(&stream).is_err());

        let mut stream = OpcodeStream::default();
        stream.push(GamsOp::Header, 2);
        stream.push(GamsOp::NoOp, 0);
        assert!(chk_gms_opcode(&stream).is_err());
    }

    #[test]
    fn test_structural_roundtrip_simple() {
        // a sum of plain variables round-trips to the identical shape
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 2).unwrap();
        t.add_var(NlAddr::Child(add, 0), &mut pool, Idx::new(0), 1.0).unwrap();
        t.add_var(NlAddr::Child(add, 1), &mut pool, Idx::new(1), 1.0).unwrap();

        let t2 = roundtrip(&t, Idx::new(0));
        let root = t2.node(t2.root().unwrap());
        assert_eq!(root.op, NlOp::Add);
        let kids: Vec<_> = root.live_children().collect();
        assert_eq!(kids.len(), 2);
        assert_eq!(t2.node(kids[0]).var_idx(), Idx::new(0));
        assert_eq!(t2.node(kids[1]).var_idx(), Idx::new(1));
    }
}
