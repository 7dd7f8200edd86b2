//! Deferred evaluation of eliminated variables.
//!
//! A transformation that eliminates a variable records an `(equation,
//! variable)` pair: after the solver returns, the variable is recovered by
//! solving that equation for it. Pairs are ordered so that a variable
//! whose defining equation depends on other pending variables is evaluated
//! after them; the ordering cost of a pair grows by the cost of every
//! pending variable found in its equation.

use tracing::{trace, warn};

use remold_core::{CoreError, CoreResult, Idx};

use crate::container::Container;
use crate::nltree::eval::eval_tree;

/// Order the deferred-evaluation pairs of every stage by dependency cost.
fn sort_eval_pairs(ctr: &mut Container) -> CoreResult<()> {
    let total_n = ctr.total_n;

    for stage in 0..=ctr.current_stage as usize {
        let len = ctr.equvar_evals[stage].pairs.len();
        if len == 0 {
            continue;
        }

        trace!(stage, pairs = len, "sorting deferred evaluations");

        // position + 1 of each pending variable, 0 = not pending
        let mut toeval = vec![0u32; total_n];
        let mut pending: Vec<(Idx, Idx)> = Vec::with_capacity(len);
        {
            let pairs = &mut ctr.equvar_evals[stage].pairs;
            for (j, pair) in pairs.iter_mut().enumerate() {
                toeval[pair.var.idx()] = j as u32 + 1;
                pair.cost = 1;
                pending.push((pair.equ, pair.var));
            }
        }

        // iterate until every variable's equation is free of other pending
        // variables, or no progress is made
        loop {
            let mut next_round: Vec<(Idx, Idx)> = Vec::new();

            for &(ei, vi) in &pending {
                let row: Vec<Idx> = ctr.walk_all_equ(ei).map(|(vid, _, _)| vid).collect();

                let mut keep = false;
                let mut extra_cost = 0u32;
                for vid in row {
                    if vid == vi || toeval[vid.idx()] == 0 {
                        continue;
                    }
                    keep = true;
                    let other = (toeval[vid.idx()] - 1) as usize;
                    extra_cost += ctr.equvar_evals[stage].pairs[other].cost;
                }

                if keep {
                    let this = (toeval[vi.idx()] - 1) as usize;
                    ctr.equvar_evals[stage].pairs[this].cost += extra_cost;
                    next_round.push((ei, vi));
                } else {
                    toeval[vi.idx()] = 0;
                }
            }

            if next_round.is_empty() {
                break;
            }
            if next_round.len() == pending.len() {
                warn!(
                    stage,
                    remaining = next_round.len(),
                    "circular dependency between deferred evaluations"
                );
                break;
            }
            pending = next_round;

            // restore the pending markers dropped this round
            for slot in toeval.iter_mut() {
                *slot = 0;
            }
            for &(_, vi) in &pending {
                let pos = ctr.equvar_evals[stage]
                    .pairs
                    .iter()
                    .position(|p| p.var == vi)
                    .expect("pending pair exists");
                toeval[vi.idx()] = pos as u32 + 1;
            }
        }

        ctr.equvar_evals[stage].pairs.sort_by_key(|p| p.cost);
    }

    Ok(())
}

/// Recover every deferred variable, newest stage first.
///
/// For a pair `(e, v)` with `e : c_v * v + lin(x) + nl(x) + cst ∈ K`, the
/// variable comes back as `v = (-lin(x) - nl(x) - cst) / c_v`, reading the
/// already-reported values of the other variables.
pub fn eval_equvar(ctr: &mut Container) -> CoreResult<()> {
    sort_eval_pairs(ctr)?;

    let total_n = ctr.total_n;
    let mut values: Vec<f64> = ctr
        .vars
        .iter()
        .take(total_n)
        .map(|v| v.value.unwrap_or(f64::NAN))
        .collect();

    for stage in (0..=ctr.current_stage as usize).rev() {
        let pairs = ctr.equvar_evals[stage].pairs.clone();
        if pairs.is_empty() {
            continue;
        }
        trace!(stage, pairs = pairs.len(), "evaluating deferred variables");

        for pair in pairs {
            let vi = pair.var;
            let ei = pair.equ;
            ctr.chk_vi(vi)?;
            ctr.chk_ei(ei)?;

            let equ = &ctr.equs[ei.idx()];

            let mut acc = 0.0;
            let mut coeff_inv = f64::NAN;
            for (idx, c) in equ.lequ.iter() {
                if idx != vi {
                    acc += c * values[idx.idx()];
                } else {
                    if c.abs() < f64::EPSILON {
                        return Err(CoreError::InvalidValue(format!(
                            "coefficient of '{}' in '{}' is too small to solve for",
                            ctr.var_name(vi),
                            ctr.equ_name(ei)
                        )));
                    }
                    coeff_inv = 1.0 / c;
                }
            }
            if !coeff_inv.is_finite() {
                return Err(CoreError::InvalidValue(format!(
                    "variable '{}' does not appear linearly in '{}'",
                    ctr.var_name(vi),
                    ctr.equ_name(ei)
                )));
            }

            if let Some(tree) = &equ.tree {
                acc += eval_tree(tree, &ctr.pool, &values)?;
            }
            acc += equ.raw_cst();

            let val = -acc * coeff_inv;
            if !val.is_finite() {
                return Err(CoreError::InvalidValue(format!(
                    "evaluation of '{}' via '{}' yields {val}",
                    ctr.var_name(vi),
                    ctr.equ_name(ei)
                )));
            }

            trace!(var = %ctr.var_name(vi), equ = %ctr.equ_name(ei), val, "deferred value");
            values[vi.idx()] = val;
            ctr.vars[vi.idx()].value = Some(val);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remold_core::IdxSet;

    #[test]
    fn test_eval_single_pair() {
        // v5 recovered from an equation with 2*v5, a linear part, and constant 3
        let mut ctr = Container::new("t");
        let _vs = ctr.add_vars(6);
        let ei = ctr.add_func().unwrap();
        let v = IdxSet::list(vec![Idx::new(0), Idx::new(1), Idx::new(5)]);
        ctr.equ_addlin(ei, &v, &[1.0, 4.0, 2.0]).unwrap();
        ctr.equ_setcst(ei, 3.0).unwrap();

        ctr.vars[0].value = Some(2.0);
        ctr.vars[1].value = Some(0.5);

        ctr.add_eval_equvar(ei, Idx::new(5)).unwrap();
        eval_equvar(&mut ctr).unwrap();

        // v5 = (-(1*2 + 4*0.5) - 3) / 2
        assert_eq!(ctr.vars[5].value, Some(-(2.0 + 2.0 + 3.0) / 2.0));
    }

    #[test]
    fn test_eval_dependency_order() {
        // v1 is defined through an equation that contains v0, itself
        // deferred: v0 must be evaluated first regardless of insertion
        // order
        let mut ctr = Container::new("t");
        let _vs = ctr.add_vars(3);

        // e0: v0 + v2 = 0  ->  v0 = -v2
        let e0 = ctr.add_func().unwrap();
        let s0 = IdxSet::list(vec![Idx::new(0), Idx::new(2)]);
        ctr.equ_addlin(e0, &s0, &[1.0, 1.0]).unwrap();

        // e1: v1 + 2*v0 = 0  ->  v1 = -2*v0
        let e1 = ctr.add_func().unwrap();
        let s1 = IdxSet::list(vec![Idx::new(1), Idx::new(0)]);
        ctr.equ_addlin(e1, &s1, &[1.0, 2.0]).unwrap();

        ctr.vars[2].value = Some(3.0);

        // insert the dependent pair first
        ctr.add_eval_equvar(e1, Idx::new(1)).unwrap();
        ctr.add_eval_equvar(e0, Idx::new(0)).unwrap();

        eval_equvar(&mut ctr).unwrap();
        assert_eq!(ctr.vars[0].value, Some(-3.0));
        assert_eq!(ctr.vars[1].value, Some(6.0));
    }

    #[test]
    fn test_eval_with_nonlinear_part() {
        let mut ctr = Container::new("t");
        let _vs = ctr.add_vars(2);

        // e: 2*v1 + v0^2 + 1 = 0 -> v1 = -(v0^2 + 1)/2
        let ei = ctr.add_func().unwrap();
        let lin = IdxSet::list(vec![Idx::new(1)]);
        ctr.equ_addlin(ei, &lin, &[2.0]).unwrap();
        let rows = [Idx::new(0)];
        ctr.equ_addquadabsolute(ei, &rows, &rows, &[2.0], 1.0).unwrap();
        ctr.equ_setcst(ei, 1.0).unwrap();

        ctr.vars[0].value = Some(3.0);
        ctr.add_eval_equvar(ei, Idx::new(1)).unwrap();
        eval_equvar(&mut ctr).unwrap();

        // the quadratic convention halves the coefficient: tree is v0^2
        assert_eq!(ctr.vars[1].value, Some(-(9.0 + 1.0) / 2.0));
    }

    #[test]
    fn test_eval_missing_linear_coeff() {
        let mut ctr = Container::new("t");
        let _vs = ctr.add_vars(2);
        let ei = ctr.add_func().unwrap();
        let lin = IdxSet::list(vec![Idx::new(0)]);
        ctr.equ_addlin(ei, &lin, &[1.0]).unwrap();

        ctr.add_eval_equvar(ei, Idx::new(1)).unwrap();
        assert!(matches!(
            eval_equvar(&mut ctr),
            Err(CoreError::InvalidValue(_))
        ));
    }
}
