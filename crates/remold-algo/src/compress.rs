//! Compression: produce a contiguous container from a filtered view.
//!
//! `compress_vars` / `compress_equs` renumber the kept entries into a
//! contiguous prefix, recording the forward translation (`rosetta`) in the
//! source container and the reverse translation in the destination's
//! inherited sets. `export_compressed` drives a full filtered copy,
//! including the opcode rewriting of nonlinear parts, and `problem_batch`
//! flattens a compressed container for a solver plugin.

use tracing::{debug, trace};

use remold_core::equ::EquObject;
use remold_core::{Cone, CoreError, CoreResult, Idx, IdxSet, Var};
use remold_solver_common::{NlRow, ProblemBatch, ProblemSense, RowRelation, PROTOCOL_VERSION};

use crate::container::{Container, Inherited};
use crate::fops::Fops;
use crate::nltree::gams::{from_gams, to_gams};

fn keep_var(fops: Option<&Fops>, ctr: &Container, vi: Idx) -> bool {
    fops.is_none_or(|f| f.keep_var(ctr, vi))
}

fn keep_equ(fops: Option<&Fops>, ctr: &Container, ei: Idx) -> bool {
    fops.is_none_or(|f| f.keep_equ(ctr, ei))
}

/// Compress the variables of `src` into `dst`.
///
/// The forward rosetta (`src` index → `dst` index or `DELETED`) lands in
/// `src.rosetta_vars`; the reverse map becomes `dst.var_inherited`.
pub fn compress_vars(
    src: &mut Container,
    dst: &mut Container,
    fops: Option<&Fops>,
) -> CoreResult<()> {
    let (dst_n, _) = match fops {
        Some(f) => f.sizes(src),
        // without a filter every slot carries over, deleted or not
        None => (src.total_n, src.total_m),
    };
    if dst_n == 0 {
        return Err(CoreError::RuntimeError(
            "no variables in the destination model".into(),
        ));
    }
    if dst.total_n != 0 {
        return Err(CoreError::UnExpectedData(
            "destination container already has variables".into(),
        ));
    }

    // pre-size the destination records; they are overwritten in place so a
    // permutation can land entries out of order
    dst.reserve_vars(dst_n);
    for i in 0..dst_n {
        dst.vars.push(Var::new(Idx::new(i)));
        dst.var_names.push(String::new());
    }
    dst.total_n = dst_n;

    let mut rosetta = vec![Idx::INVALID; src.total_n];
    let mut rev = vec![Idx::NA; dst_n];
    let mut skip = 0usize;

    for i in 0..src.total_n {
        let vi_src = Idx::new(i);
        if !keep_var(fops, src, vi_src) {
            rosetta[i] = Idx::DELETED;
            skip += 1;
            continue;
        }

        let vi = match fops.and_then(|f| f.vars_permutation(vi_src)) {
            Some(p) => p,
            None => Idx::new(i - skip),
        };
        if vi.inbounds(dst_n).is_err() {
            return Err(CoreError::Inconsistency(format!(
                "variable {vi_src} lands at {vi}, beyond the filtered size {dst_n}"
            )));
        }

        rosetta[i] = vi;
        rev[vi.idx()] = vi_src;

        let mut var = src.vars[i].clone();
        var.idx = vi;
        trace!(src = %vi_src, dst = %vi, lb = var.bnd.lb, ub = var.bnd.ub, "compress var");
        dst.vars[vi.idx()] = var;
        dst.var_names[vi.idx()] = src.var_names[i].clone();
    }

    let nvars = src.total_n - skip;
    dst.var_inherited = Some(Inherited {
        cur: IdxSet::compact(0, nvars),
        src: IdxSet::list(rev),
    });
    src.rosetta_vars = Some(rosetta);

    // every inactive source variable must have been skipped
    if skip < src.total_n - src.n {
        return Err(CoreError::Inconsistency(format!(
            "inactive variable count is inconsistent: {skip} skipped vs {} - {}",
            src.total_n, src.n
        )));
    }
    Ok(())
}

/// Explain every equation a compaction filter dropped: it must be either
/// already deleted or a vacuous constraint whose cone accepts `0`.
fn audit_skipped_equs(src: &Container, skipped: &[Idx]) -> CoreResult<()> {
    for &ei in skipped {
        if src.cmat.deleted_equ_head(ei).is_some() {
            continue;
        }

        let equ = &src.equs[ei.idx()];
        if equ.has_lin() || equ.has_nl() {
            return Err(CoreError::Inconsistency(format!(
                "inactive equation '{}' has algebraic content that cannot be explained",
                src.equ_name(ei)
            )));
        }

        let cst = equ.raw_cst();
        match equ.cone {
            Cone::Zero => {
                if cst.abs() > f64::EPSILON {
                    return Err(CoreError::ModelInfeasible(format!(
                        "vacuous constraint '{}' is not fulfilled: 0 != {cst}",
                        src.equ_name(ei)
                    )));
                }
            }
            Cone::RMinus => {
                if cst > 0.0 {
                    return Err(CoreError::ModelInfeasible(format!(
                        "vacuous constraint '{}' is not fulfilled: 0 < {cst}",
                        src.equ_name(ei)
                    )));
                }
            }
            Cone::RPlus => {
                if cst < 0.0 {
                    return Err(CoreError::ModelInfeasible(format!(
                        "vacuous constraint '{}' is not fulfilled: 0 > {cst}",
                        src.equ_name(ei)
                    )));
                }
            }
            Cone::R => {}
            Cone::None => {
                if equ.object == EquObject::Mapping {
                    // a dangling constant mapping carries no constraint
                    continue;
                }
                return Err(CoreError::Inconsistency(format!(
                    "nonsensical equation '{}': 0 ?? {cst}",
                    src.equ_name(ei)
                )));
            }
            other => {
                debug!(equ = %src.equ_name(ei), cone = %other, "unsupported vacuous cone");
                return Err(CoreError::NotImplemented(
                    "vacuous constraints in structured cones",
                ));
            }
        }
    }
    Ok(())
}

/// Compress the equations of `src` into `dst` as metadata shells; the
/// algebraic content follows during export.
pub fn compress_equs(
    src: &mut Container,
    dst: &mut Container,
    fops: Option<&Fops>,
) -> CoreResult<()> {
    if dst.total_m != 0 {
        return Err(CoreError::UnExpectedData(
            "destination container already has equations".into(),
        ));
    }

    let mut rosetta = vec![Idx::INVALID; src.total_m];
    let mut rev = Vec::new();
    let mut skipped = Vec::new();

    for i in 0..src.total_m {
        let ei_src = Idx::new(i);
        if !keep_equ(fops, src, ei_src) {
            rosetta[i] = Idx::DELETED;
            skipped.push(ei_src);
            continue;
        }

        let src_equ = &src.equs[i];
        let ei =
            dst.add_equ_empty(Some(src.equ_name(ei_src)), src_equ.object, src_equ.cone)?;
        dst.equs[ei.idx()] = src.equs[i].copy_metadata(ei);
        rosetta[i] = ei;
        rev.push(ei_src);
    }

    let nequs = rev.len();
    dst.equ_inherited = Some(Inherited {
        cur: IdxSet::compact(0, nequs),
        src: IdxSet::list(rev),
    });
    src.rosetta_equs = Some(rosetta);

    // an activity-based compaction must account for everything it dropped
    if matches!(fops, None | Some(Fops::Empty) | Some(Fops::Active(_))) {
        audit_skipped_equs(src, &skipped)?;
    }
    Ok(())
}

/// Produce a compressed container from the source's current filtered view.
///
/// The source keeps the forward rosetta for report-back; the destination
/// owns deep copies of everything it needs (pool included).
pub fn export_compressed(src: &mut Container, name: &str) -> CoreResult<Container> {
    let mut fops = src.fops.take();
    let result = export_inner(src, name, &mut fops);
    src.fops = fops;
    result
}

fn export_inner(
    src: &mut Container,
    name: &str,
    fops: &mut Option<Fops>,
) -> CoreResult<Container> {
    debug!(src = %src.name, dst = %name, fops = fops.as_ref().map_or("none", Fops::type_name),
           "exporting compressed container");

    let mut dst = Container::new(name);
    dst.pool = src.pool.clone();

    compress_vars(src, &mut dst, fops.as_ref())?;
    compress_equs(src, &mut dst, fops.as_ref())?;

    let rosetta_vars = src.rosetta_vars.clone().expect("set by compress_vars");
    let rosetta_equs = src.rosetta_equs.clone().expect("set by compress_equs");
    let absorb_dropped = matches!(
        fops,
        Some(Fops::Subset(_)) | Some(Fops::EmpDagSubDag(_))
    );

    for i in 0..src.total_m {
        let ei_dst = rosetta_equs[i];
        if !ei_dst.is_valid() {
            continue;
        }
        let ei_src = Idx::new(i);

        // ------------------------------------------------------------
        // linear part, translated; dropped variables either freeze into
        // the constant or abort the compression
        // ------------------------------------------------------------
        let src_lin: Vec<(Idx, f64)> = src.equs[i].lequ.iter().collect();
        for (vi, val) in src_lin {
            let vi_new = rosetta_vars[vi.idx()];
            if vi_new.is_valid() {
                dst.equs[ei_dst.idx()].lequ.add(vi_new, val)?;
            } else if absorb_dropped {
                let frozen = src.vars[vi.idx()].value.unwrap_or(0.0);
                dst.equs[ei_dst.idx()].add_cst(val * frozen)?;
            } else if val.abs() > f64::EPSILON {
                return Err(CoreError::ModelInfeasible(format!(
                    "equation '{}' references the deleted variable '{}' with \
                     coefficient {val}",
                    src.equ_name(ei_src),
                    src.var_name(vi)
                )));
            }
        }

        // ------------------------------------------------------------
        // nonlinear part, through bytecode rewriting
        // ------------------------------------------------------------
        if src.equs[i].has_nl() {
            let tree_src = src.equs[i].tree.as_ref().expect("has_nl");
            let mut stream = to_gams(tree_src, ei_src)?;
            match fops {
                Some(f) => f.transform_gams_opcode(
                    &rosetta_vars,
                    ei_dst,
                    &mut stream,
                    &src.vars,
                    &mut dst.pool,
                )?,
                None => Fops::Empty.transform_gams_opcode(
                    &rosetta_vars,
                    ei_dst,
                    &mut stream,
                    &src.vars,
                    &mut dst.pool,
                )?,
            }
            dst.equs[ei_dst.idx()].tree = from_gams(&stream)?;
        }

        // ------------------------------------------------------------
        // register the row
        // ------------------------------------------------------------
        let mut entries: Vec<(Idx, Option<f64>, bool)> = dst.equs[ei_dst.idx()]
            .lequ
            .iter()
            .map(|(vi, val)| (vi, Some(val), false))
            .collect();
        if let Some(tree) = &dst.equs[ei_dst.idx()].tree {
            for vi in tree.collect_vars() {
                if !entries.iter().any(|&(v, _, _)| v == vi) {
                    entries.push((vi, None, true));
                }
            }
        }

        if entries.is_empty() {
            dst.set_equ_as_cst(ei_dst)?;
        } else {
            dst.cmat.fill_equ(ei_dst, &entries, &mut dst.vars, &mut dst.n)?;
        }
    }

    // carry the objective over when it survived the filter
    if src.objequ.is_valid() {
        let mapped = rosetta_equs[src.objequ.idx()];
        if mapped.is_valid() {
            dst.objequ = mapped;
        }
    }

    Ok(dst)
}

/// Flatten a compressed container into a solver problem batch.
pub fn problem_batch(ctr: &Container) -> CoreResult<ProblemBatch> {
    let n = ctr.total_n;
    let m = ctr.total_m;

    let mut row_relation = Vec::with_capacity(m);
    let mut row_cst = Vec::with_capacity(m);
    let mut row_multiplier = Vec::with_capacity(m);
    let mut lin_row = Vec::new();
    let mut lin_col = Vec::new();
    let mut lin_val = Vec::new();
    let mut nl_rows = Vec::new();

    for (i, equ) in ctr.equs.iter().enumerate().take(m) {
        let relation = match (equ.object, equ.cone) {
            (EquObject::ConeInclusion, Cone::Zero) => RowRelation::Eq,
            (EquObject::ConeInclusion, Cone::RMinus) => RowRelation::Le,
            (EquObject::ConeInclusion, Cone::RPlus) => RowRelation::Ge,
            (EquObject::ConeInclusion, Cone::R) => RowRelation::Free,
            (EquObject::ConeInclusion, _) => {
                return Err(CoreError::NotImplemented(
                    "structured cones in solver batches",
                ))
            }
            _ => RowRelation::Free,
        };
        row_relation.push(relation);
        row_cst.push(equ.raw_cst());
        row_multiplier.push(equ.multiplier.unwrap_or(f64::NAN));

        for (vi, val) in equ.lequ.iter() {
            lin_row.push(i as u32);
            lin_col.push(vi.idx() as u32);
            lin_val.push(val);
        }

        if equ.has_nl() {
            let stream = to_gams(equ.tree.as_ref().expect("has_nl"), Idx::new(i))?;
            let (instrs, args) = stream.raw();
            nl_rows.push(NlRow { row: i as u32, instrs, args });
        }
    }

    let (sense, objective_row) = if ctr.objequ.is_valid() {
        (ProblemSense::Min, Some(ctr.objequ.idx() as u32))
    } else {
        (ProblemSense::Feasibility, None)
    };

    let vtype = |v: &Var| -> u8 {
        use remold_core::VarType::*;
        match v.vtype {
            Continuous => 0,
            Binary => 1,
            Integer => 2,
            SemiContinuous => 3,
            SemiInteger => 4,
            Sos1 => 5,
            Sos2 => 6,
        }
    };

    Ok(ProblemBatch {
        protocol_version: PROTOCOL_VERSION,
        name: ctr.name.clone(),
        sense,
        objective_row,
        var_lb: ctr.vars.iter().take(n).map(|v| v.bnd.lb).collect(),
        var_ub: ctr.vars.iter().take(n).map(|v| v.bnd.ub).collect(),
        var_level: ctr.vars.iter().take(n).map(|v| v.value.unwrap_or(f64::NAN)).collect(),
        var_multiplier: ctr
            .vars
            .iter()
            .take(n)
            .map(|v| v.multiplier.unwrap_or(f64::NAN))
            .collect(),
        var_type: ctr.vars.iter().take(n).map(vtype).collect(),
        row_relation,
        row_cst,
        row_multiplier,
        lin_row,
        lin_col,
        lin_val,
        nl_rows,
        pool: ctr.pool.as_slice().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fops::FilterActive;

    fn ten_var_container() -> Container {
        let mut ctr = Container::new("src");
        let v = ctr.add_vars(10);
        let ei = ctr.add_func().unwrap();
        let vals: Vec<f64> = (0..10).map(|i| i as f64 + 1.0).collect();
        ctr.equ_addlin(ei, &v, &vals).unwrap();
        ctr
    }

    #[test]
    fn test_compress_vars_renumbering() {
        // ten variables, the filter deactivates 2 and 5
        let mut src = ten_var_container();
        let mut fops = Fops::Active(FilterActive::default());
        fops.deactivate_var(Idx::new(2)).unwrap();
        fops.deactivate_var(Idx::new(5)).unwrap();

        let mut dst = Container::new("dst");
        compress_vars(&mut src, &mut dst, Some(&fops)).unwrap();

        let rosetta = src.rosetta_vars.as_ref().unwrap();
        let expect: Vec<Idx> = vec![
            Idx::new(0),
            Idx::new(1),
            Idx::DELETED,
            Idx::new(2),
            Idx::new(3),
            Idx::DELETED,
            Idx::new(4),
            Idx::new(5),
            Idx::new(6),
            Idx::new(7),
        ];
        assert_eq!(rosetta, &expect);

        let inh = dst.var_inherited.as_ref().unwrap();
        let rev: Vec<usize> = (0..8).map(|i| inh.src.fget(i).idx()).collect();
        assert_eq!(rev, vec![0, 1, 3, 4, 6, 7, 8, 9]);
        assert_eq!(dst.total_n, 8);
    }

    #[test]
    fn test_export_aborts_on_referenced_deleted_var() {
        let mut src = ten_var_container();
        let mut fops = Fops::Active(FilterActive::default());
        fops.deactivate_var(Idx::new(2)).unwrap();
        src.fops = Some(fops);

        // variable 2 still has coefficient 3.0 in the only equation
        let err = export_compressed(&mut src, "dst").unwrap_err();
        assert!(matches!(err, CoreError::ModelInfeasible(_)));
    }

    #[test]
    fn test_export_full_copy() {
        let mut src = ten_var_container();
        let dst = export_compressed(&mut src, "dst").unwrap();

        assert_eq!(dst.total_n, 10);
        assert_eq!(dst.total_m, 1);
        assert_eq!(dst.n, 10);
        assert_eq!(dst.equs[0].lequ.len(), 10);
        dst.chk_expensive().unwrap();
    }

    #[test]
    fn test_problem_batch_shape() {
        let mut src = ten_var_container();
        let dst = export_compressed(&mut src, "dst").unwrap();
        let batch = problem_batch(&dst).unwrap();
        batch.validate().unwrap();
        assert_eq!(batch.n_vars(), 10);
        assert_eq!(batch.n_rows(), 1);
        assert_eq!(batch.lin_val.len(), 10);
        assert!(batch.nl_rows.is_empty());
        assert_eq!(batch.sense, ProblemSense::Feasibility);
    }
}
