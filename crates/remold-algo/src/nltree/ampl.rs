//! AMPL NL emission.
//!
//! The NL format is line-oriented prefix notation: `o<N>` for an operator,
//! `v<N>` for a variable, `n<float>` for a constant, and a bare integer for
//! the operand count of a variadic operator. Function codes without an AMPL
//! equivalent are rejected with an opcode error.

use std::fmt::Write;

use remold_core::{CoreError, CoreResult, Idx, Pool};

use super::node::{NlFunc, NlOp, NodeId, OpArg};
use super::NlTree;

// AMPL opcode numbers (asl/opcode.hd)
const OPPLUS: i32 = 0;
const OPMINUS: i32 = 1;
const OPMULT: i32 = 2;
const OPDIV: i32 = 3;
const OPREM: i32 = 4;
const OPPOW: i32 = 5;
const MINLIST: i32 = 11;
const MAXLIST: i32 = 12;
const CEIL: i32 = 13;
const FLOOR: i32 = 14;
const ABS: i32 = 15;
const OPUMINUS: i32 = 16;
const OP_TANH: i32 = 37;
const OP_TAN: i32 = 38;
const OP_SQRT: i32 = 39;
const OP_SINH: i32 = 40;
const OP_SIN: i32 = 41;
const OP_LOG10: i32 = 42;
const OP_LOG: i32 = 43;
const OP_EXP: i32 = 44;
const OP_COSH: i32 = 45;
const OP_COS: i32 = 46;
const OP_ATAN2: i32 = 48;
const OP_ATAN: i32 = 49;
const OP_ASIN: i32 = 51;
const OP_ACOS: i32 = 53;
const OPSUMLIST: i32 = 54;
const OP_ROUND: i32 = 57;
const OP_TRUNC: i32 = 58;
const OP2POW: i32 = 77;

fn ampl_func(func: NlFunc) -> CoreResult<i32> {
    use NlFunc::*;
    let code = match func {
        Ceil => CEIL,
        Floor => FLOOR,
        Round => OP_ROUND,
        Trunc => OP_TRUNC,
        Mod => OPREM,
        Min => MINLIST,
        Max => MAXLIST,
        Sqr => OP2POW,
        Exp => OP_EXP,
        Log => OP_LOG,
        Log10 => OP_LOG10,
        Sqrt => OP_SQRT,
        Abs => ABS,
        Cos => OP_COS,
        Sin => OP_SIN,
        Tan => OP_TAN,
        Arccos => OP_ACOS,
        Arcsin => OP_ASIN,
        Arctan => OP_ATAN,
        Arctan2 => OP_ATAN2,
        Sinh => OP_SINH,
        Cosh => OP_COSH,
        Tanh => OP_TANH,
        Power | Rpower | Cvpower | Vcpower => OPPOW,
        other => {
            return Err(CoreError::InvalidOpCode(format!(
                "function {} has no AMPL equivalent",
                other.name()
            )))
        }
    };
    Ok(code)
}

enum Operand {
    Node(NodeId),
    Var(Idx),
    Cst(f64),
}

struct AmplEmitter<'a> {
    tree: &'a NlTree,
    pool: &'a Pool,
    out: String,
}

impl AmplEmitter<'_> {
    fn op(&mut self, code: i32) {
        let _ = writeln!(self.out, "o{code}");
    }

    fn operand(&mut self, operand: &Operand) -> CoreResult<()> {
        match operand {
            Operand::Node(id) => self.node(*id),
            Operand::Var(vi) => {
                let _ = writeln!(self.out, "v{}", vi.idx());
                Ok(())
            }
            Operand::Cst(v) => {
                let _ = writeln!(self.out, "n{v}");
                Ok(())
            }
        }
    }

    /// All operands of an arithmetic node: the fused operand first (it is
    /// combined exactly once, position is immaterial for `+`/`*` and the
    /// tail position for `-`/`/` is handled by the caller), then the
    /// explicit children.
    fn operands(&mut self, id: NodeId) -> CoreResult<Vec<Operand>> {
        let node = self.tree.node(id);
        let mut ops = Vec::with_capacity(node.children.len() + 1);
        for child in node.live_children() {
            ops.push(Operand::Node(child));
        }
        match node.oparg {
            OpArg::Unset => {}
            OpArg::Var(vi) => ops.push(Operand::Var(vi)),
            OpArg::Cst(k) | OpArg::Fma(k) => ops.push(Operand::Cst(self.pool.read(k)?)),
        }
        Ok(ops)
    }

    /// Left-fold a binary operator over operands: `a - b - c` becomes
    /// `o1(o1(a, b), c)` in prefix form.
    fn fold_binary(&mut self, code: i32, ops: &[Operand]) -> CoreResult<()> {
        for _ in 1..ops.len() {
            self.op(code);
        }
        // prefix order: the innermost pair comes first
        self.operand(&ops[0])?;
        for operand in &ops[1..] {
            self.operand(operand)?;
        }
        Ok(())
    }

    fn node(&mut self, id: NodeId) -> CoreResult<()> {
        let node = self.tree.node(id);
        node.chk_children()?;

        match node.op {
            NlOp::Var => self.operand(&Operand::Var(node.var_idx())),
            NlOp::Cst => {
                let v = if node.value == 0 { 0.0 } else { self.pool.read(node.value)? };
                self.operand(&Operand::Cst(v))
            }
            NlOp::Add => {
                let ops = self.operands(id)?;
                match ops.len() {
                    0 => Err(CoreError::InvalidValue("empty sum".into())),
                    1 => self.operand(&ops[0]),
                    2 => self.fold_binary(OPPLUS, &ops),
                    n => {
                        self.op(OPSUMLIST);
                        let _ = writeln!(self.out, "{n}");
                        for operand in &ops {
                            self.operand(operand)?;
                        }
                        Ok(())
                    }
                }
            }
            NlOp::Sub => {
                let ops = self.operands(id)?;
                self.fold_binary(OPMINUS, &ops)
            }
            NlOp::Mul => {
                let ops = self.operands(id)?;
                match ops.len() {
                    0 => Err(CoreError::InvalidValue("empty product".into())),
                    1 => self.operand(&ops[0]),
                    _ => self.fold_binary(OPMULT, &ops),
                }
            }
            NlOp::Div => {
                let ops = self.operands(id)?;
                self.fold_binary(OPDIV, &ops)
            }
            NlOp::Umin => {
                self.op(OPUMINUS);
                match node.oparg {
                    OpArg::Var(vi) => self.operand(&Operand::Var(vi)),
                    _ => {
                        let child = node.live_children().next().expect("checked above");
                        self.node(child)
                    }
                }
            }
            NlOp::Call1 | NlOp::Call2 | NlOp::CallN => {
                let func = NlFunc::from_raw(node.value)?;
                let code = ampl_func(func)?;
                self.op(code);
                if node.op == NlOp::CallN {
                    let n = node.live_children().count();
                    let _ = writeln!(self.out, "{n}");
                }
                for child in node.live_children() {
                    self.node(child)?;
                }
                Ok(())
            }
        }
    }
}

/// Emit a tree as an AMPL NL expression fragment.
///
/// Returns an empty string for a trivial tree (a purely linear equation).
pub fn to_ampl(tree: &NlTree, pool: &Pool) -> CoreResult<String> {
    if tree.is_trivial() {
        return Ok(String::new());
    }

    let mut emitter = AmplEmitter { tree, pool, out: String::new() };
    emitter.node(tree.root().expect("non-trivial tree"))?;
    Ok(emitter.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nltree::NlAddr;

    #[test]
    fn test_bilinear_emission() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        t.add_bilin(NlAddr::Root, &mut pool, 0.5, Idx::new(0), Idx::new(1)).unwrap();

        let s = to_ampl(&t, &pool).unwrap();
        // 0.5 * v0 * v1 as a folded product with the fused constant last
        assert_eq!(s, "o2\no2\nv0\nv1\nn0.5\n");
    }

    #[test]
    fn test_sqr_maps_to_op2pow() {
        let mut t = NlTree::with_estimate(4);
        t.add_sqr(NlAddr::Root, Idx::new(2)).unwrap();
        let pool = Pool::new_gams();
        assert_eq!(to_ampl(&t, &pool).unwrap(), "o77\nv2\n");
    }

    #[test]
    fn test_sumlist_for_wide_sums() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 3).unwrap();
        for i in 0..3 {
            t.add_var(NlAddr::Child(add, i), &mut pool, Idx::new(i), 1.0).unwrap();
        }
        let s = to_ampl(&t, &pool).unwrap();
        assert_eq!(s, "o54\n3\nv0\nv1\nv2\n");
    }

    #[test]
    fn test_unmapped_function_is_rejected() {
        let mut t = NlTree::with_estimate(4);
        t.add_call1(NlAddr::Root, Idx::new(0), NlFunc::Sigmoid).unwrap();
        let pool = Pool::new_gams();
        assert!(matches!(to_ampl(&t, &pool), Err(CoreError::InvalidOpCode(_))));
    }

    #[test]
    fn test_trivial_tree() {
        let t = NlTree::with_estimate(2);
        let pool = Pool::new_gams();
        assert_eq!(to_ampl(&t, &pool).unwrap(), "");
    }
}
