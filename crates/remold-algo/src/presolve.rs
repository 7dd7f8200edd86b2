//! Staged presolve pipeline.
//!
//! Each stage of a container may carry auxiliary subproblems, stored as
//! subset filters. The pipeline freezes the current variable values into
//! pool slots. Then, newest stage first and subsets in reverse attachment
//! order, it activates each subset, exports the filtered view into a fresh
//! container, hands it to the solver plugin, and reports the values and
//! multipliers back through the rosetta.
//!
//! The pre-entry filter state is restored whether the pipeline succeeds or
//! fails; the first failing subproblem aborts and surfaces its error.

use tracing::{debug, info};

use remold_core::{CoreError, CoreResult, PoolIdx};
use remold_solver_common::SolverPlugin;

use crate::compress::{export_compressed, problem_batch};
use crate::container::Container;
use crate::fops::Fops;

/// Run every attached auxiliary subproblem of every stage.
pub fn presolve(ctr: &mut Container, plugin: &mut dyn SolverPlugin) -> CoreResult<()> {
    let nb: usize = ctr.stage_subsets.iter().map(Vec::len).sum();
    if nb == 0 {
        return Ok(());
    }

    info!(container = %ctr.name, subproblems = nb, "presolving");

    // freeze the current variable values: slot `offset + vi` holds the
    // value filtered-out variables are replaced by in subproblems
    let offset_pool = ctr.pool.reserve_slots(ctr.total_n);
    for vi in 0..ctr.total_n {
        let val = ctr.vars[vi].value.unwrap_or(0.0);
        ctr.pool.set_slot(offset_pool + vi as PoolIdx, val);
    }

    let saved_fops = ctr.fops.take();
    let stages: Vec<Vec<crate::fops::FilterSubset>> = ctr.stage_subsets.clone();

    let mut status = Ok(());
    'stages: for (s, subsets) in stages.iter().enumerate().rev() {
        for (i, fs) in subsets.iter().enumerate().rev() {
            let mut fs = fs.clone();
            fs.nlpoolvars.offset_vars_pool = offset_pool;
            ctr.fops = Some(Fops::Subset(fs));

            let name = format!("{}_s{s}_i{i}", ctr.name);
            debug!(stage = s, iter = i, "presolving subproblem");

            if let Err(err) = solve_one(ctr, plugin, &name, offset_pool) {
                status = Err(err);
                break 'stages;
            }
        }
    }

    ctr.fops = saved_fops;
    ctr.rosetta_vars = None;
    ctr.rosetta_equs = None;

    status
}

fn solve_one(
    ctr: &mut Container,
    plugin: &mut dyn SolverPlugin,
    name: &str,
    offset_pool: PoolIdx,
) -> CoreResult<()> {
    let dst = export_compressed(ctr, name)?;
    let batch = problem_batch(&dst)?;

    let solution = plugin.solve(&batch).map_err(|err| {
        CoreError::RuntimeError(format!(
            "solver '{}' failed on subproblem '{name}': {err}",
            plugin.name()
        ))
    })?;
    solution
        .validate_against(&batch)
        .map_err(|err| CoreError::RuntimeError(err.to_string()))?;
    if !solution.status.has_solution() {
        return Err(CoreError::RuntimeError(format!(
            "subproblem '{name}' came back {:?}",
            solution.status
        )));
    }

    // report the subproblem values back into the source container, and
    // refresh the frozen pool image so later subproblems read them
    let rosetta_vars = ctr.rosetta_vars.take().ok_or_else(|| {
        CoreError::Inconsistency("export did not leave a variable rosetta".into())
    })?;
    for (k, &vi_new) in rosetta_vars.iter().enumerate() {
        if !vi_new.is_valid() {
            continue;
        }
        let level = solution.var_level[vi_new.idx()];
        let var = &mut ctr.vars[k];
        var.value = Some(level);
        var.multiplier = Some(solution.var_multiplier[vi_new.idx()]);
        ctr.pool.set_slot(offset_pool + k as PoolIdx, level);
    }

    let rosetta_equs = ctr.rosetta_equs.take().ok_or_else(|| {
        CoreError::Inconsistency("export did not leave an equation rosetta".into())
    })?;
    for (k, &ei_new) in rosetta_equs.iter().enumerate() {
        if !ei_new.is_valid() {
            continue;
        }
        let equ = &mut ctr.equs[k];
        equ.value = Some(solution.row_level[ei_new.idx()]);
        equ.multiplier = Some(solution.row_multiplier[ei_new.idx()]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fops::FilterSubset;
    use remold_core::{Idx, IdxSet};
    use remold_solver_common::{AlwaysFailSolver, EchoLevelsSolver};

    fn container_with_subset() -> Container {
        let mut ctr = Container::new("pre");
        let v = ctr.add_varsinbox(4, 1.0, 8.0);
        let e = ctr.add_func().unwrap();
        ctr.equ_addlin(e, &v, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        for (i, var) in ctr.vars.iter_mut().enumerate() {
            var.value = Some(i as f64);
        }

        // subproblem over the first two variables and the only equation
        let fs = FilterSubset::new(
            vec![IdxSet::compact(0, 2)],
            vec![IdxSet::compact(0, 1)],
        )
        .unwrap();
        ctr.add_stage_subset(fs);
        ctr
    }

    #[test]
    fn test_presolve_reports_back() {
        let mut ctr = container_with_subset();
        presolve(&mut ctr, &mut EchoLevelsSolver).unwrap();

        // kept variables got their levels echoed back
        assert_eq!(ctr.vars[0].value, Some(0.0));
        assert_eq!(ctr.vars[1].value, Some(1.0));
        assert_eq!(ctr.vars[0].multiplier, Some(0.0));
        // filtered-out variables are untouched
        assert_eq!(ctr.vars[2].value, Some(2.0));
        // the equation received level and multiplier
        assert_eq!(ctr.equs[0].value, Some(0.0));
        // filter state restored
        assert!(ctr.fops.is_none());
    }

    #[test]
    fn test_presolve_restores_state_on_failure() {
        let mut ctr = container_with_subset();
        let err = presolve(&mut ctr, &mut AlwaysFailSolver).unwrap_err();
        assert!(matches!(err, CoreError::RuntimeError(_)));
        assert!(ctr.fops.is_none());
    }

    #[test]
    fn test_presolve_without_subsets_is_noop() {
        let mut ctr = Container::new("empty");
        ctr.add_vars(1);
        presolve(&mut ctr, &mut EchoLevelsSolver).unwrap();
    }

    #[test]
    fn test_presolve_freezes_values_in_pool() {
        let mut ctr = container_with_subset();
        let pool_before = ctr.pool.len();
        presolve(&mut ctr, &mut EchoLevelsSolver).unwrap();
        // four slots were reserved for the frozen values
        assert_eq!(ctr.pool.len(), pool_before + 4);
        let off = pool_before as PoolIdx;
        assert_eq!(ctr.pool.read(off + 2).unwrap(), 2.0);
        let _ = Idx::new(0);
    }
}
