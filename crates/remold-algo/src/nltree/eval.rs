//! Numeric evaluation of expression trees.
//!
//! Used by the deferred-evaluation subsystem to recover eliminated
//! variables after a solve, and by tests to compare trees algebraically.

use remold_core::{CoreError, CoreResult, Idx, Pool};

use super::node::{NlFunc, NlOp, NodeId, OpArg};
use super::NlTree;

/// Evaluate a tree at the point `x` (indexed by variable index).
pub fn eval_tree(tree: &NlTree, pool: &Pool, x: &[f64]) -> CoreResult<f64> {
    match tree.root() {
        None => Ok(0.0),
        Some(root) => eval_node(tree, pool, x, root),
    }
}

fn var_value(x: &[f64], vi: Idx) -> CoreResult<f64> {
    let i = vi.inbounds(x.len())?;
    Ok(x[i])
}

fn eval_node(tree: &NlTree, pool: &Pool, x: &[f64], id: NodeId) -> CoreResult<f64> {
    let node = tree.node(id);

    let implicit = |pool: &Pool| -> CoreResult<Option<f64>> {
        Ok(match node.oparg {
            OpArg::Unset => None,
            OpArg::Cst(k) | OpArg::Fma(k) => Some(pool.read(k)?),
            OpArg::Var(vi) => Some(var_value(x, vi)?),
        })
    };

    match node.op {
        NlOp::Cst => {
            if node.value == 0 {
                Ok(0.0)
            } else {
                pool.read(node.value)
            }
        }
        NlOp::Var => var_value(x, node.var_idx()),
        NlOp::Add => {
            let mut acc = 0.0;
            for child in node.live_children() {
                acc += eval_node(tree, pool, x, child)?;
            }
            // the vestigial FMA tag on an Add carries no operand
            if !matches!(node.oparg, OpArg::Fma(_)) {
                if let Some(v) = implicit(pool)? {
                    acc += v;
                }
            }
            Ok(acc)
        }
        NlOp::Sub => {
            let mut children = node.live_children();
            let first = children
                .next()
                .ok_or_else(|| CoreError::InvalidValue("Sub node without operand".into()))?;
            let mut acc = eval_node(tree, pool, x, first)?;
            for child in children {
                acc -= eval_node(tree, pool, x, child)?;
            }
            if let Some(v) = implicit(pool)? {
                acc -= v;
            }
            Ok(acc)
        }
        NlOp::Mul => {
            let mut acc = 1.0;
            for child in node.live_children() {
                acc *= eval_node(tree, pool, x, child)?;
            }
            if let Some(v) = implicit(pool)? {
                acc *= v;
            }
            Ok(acc)
        }
        NlOp::Div => {
            let mut children = node.live_children();
            let first = children
                .next()
                .ok_or_else(|| CoreError::InvalidValue("Div node without operand".into()))?;
            let mut acc = eval_node(tree, pool, x, first)?;
            for child in children {
                acc /= eval_node(tree, pool, x, child)?;
            }
            if let Some(v) = implicit(pool)? {
                acc /= v;
            }
            Ok(acc)
        }
        NlOp::Umin => match node.oparg {
            OpArg::Var(vi) => Ok(-var_value(x, vi)?),
            _ => {
                let child = node.live_children().next().ok_or_else(|| {
                    CoreError::InvalidValue("unary minus without operand".into())
                })?;
                Ok(-eval_node(tree, pool, x, child)?)
            }
        },
        NlOp::Call1 | NlOp::Call2 | NlOp::CallN => {
            let func = NlFunc::from_raw(node.value)?;
            let mut args = Vec::with_capacity(node.children.len());
            for child in node.live_children() {
                args.push(eval_node(tree, pool, x, child)?);
            }
            eval_func(func, &args)
        }
    }
}

fn eval_func(func: NlFunc, args: &[f64]) -> CoreResult<f64> {
    let arg1 = |i: usize| -> CoreResult<f64> {
        args.get(i).copied().ok_or_else(|| {
            CoreError::InvalidValue(format!("function {} is missing operand {i}", func.name()))
        })
    };

    let v = match func {
        NlFunc::Sqr => {
            let a = arg1(0)?;
            a * a
        }
        NlFunc::Exp => arg1(0)?.exp(),
        NlFunc::Log => arg1(0)?.ln(),
        NlFunc::Log10 => arg1(0)?.log10(),
        NlFunc::Log2 => arg1(0)?.log2(),
        NlFunc::Sqrt => arg1(0)?.sqrt(),
        NlFunc::Abs => arg1(0)?.abs(),
        NlFunc::Cos => arg1(0)?.cos(),
        NlFunc::Sin => arg1(0)?.sin(),
        NlFunc::Tan => arg1(0)?.tan(),
        NlFunc::Arccos => arg1(0)?.acos(),
        NlFunc::Arcsin => arg1(0)?.asin(),
        NlFunc::Arctan => arg1(0)?.atan(),
        NlFunc::Arctan2 => arg1(0)?.atan2(arg1(1)?),
        NlFunc::Sinh => arg1(0)?.sinh(),
        NlFunc::Cosh => arg1(0)?.cosh(),
        NlFunc::Tanh => arg1(0)?.tanh(),
        NlFunc::Ceil => arg1(0)?.ceil(),
        NlFunc::Floor => arg1(0)?.floor(),
        NlFunc::Round => arg1(0)?.round(),
        NlFunc::Trunc => arg1(0)?.trunc(),
        NlFunc::Sign => arg1(0)?.signum(),
        NlFunc::Mod => arg1(0)? % arg1(1)?,
        NlFunc::Power | NlFunc::Rpower | NlFunc::Cvpower | NlFunc::Vcpower => {
            arg1(0)?.powf(arg1(1)?)
        }
        NlFunc::Signpower => {
            let (a, p) = (arg1(0)?, arg1(1)?);
            a.signum() * a.abs().powf(p)
        }
        NlFunc::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        NlFunc::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        NlFunc::Pi => std::f64::consts::PI,
        NlFunc::Entropy => {
            let a = arg1(0)?;
            -a * a.ln()
        }
        NlFunc::Sigmoid => {
            let a = arg1(0)?;
            1.0 / (1.0 + (-a).exp())
        }
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nltree::NlAddr;

    #[test]
    fn test_empty_tree_is_zero() {
        let tree = NlTree::with_estimate(1);
        let pool = Pool::new_gams();
        assert_eq!(eval_tree(&tree, &pool, &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_call_eval() {
        let mut pool = Pool::new_gams();
        let mut t = NlTree::with_estimate(8);
        let (add, _) = t.ensure_add_node(NlAddr::Root, 2).unwrap();
        t.add_sqr(NlAddr::Child(add, 0), Idx::new(0)).unwrap();
        t.add_var(NlAddr::Child(add, 1), &mut pool, Idx::new(1), 2.0).unwrap();

        let v = eval_tree(&t, &pool, &[3.0, 1.0]).unwrap();
        assert_eq!(v, 9.0 + 2.0);
    }

    #[test]
    fn test_out_of_range_point() {
        let mut t = NlTree::with_estimate(2);
        let leaf = t.alloc_var(Idx::new(5));
        t.set_root(Some(leaf));
        let pool = Pool::new_gams();
        assert!(eval_tree(&t, &pool, &[0.0]).is_err());
    }
}
