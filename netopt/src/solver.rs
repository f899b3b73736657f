//! Thin adapter over the MILP engine.
//!
//! The adapter is the only module that touches `good_lp`; everything
//! else works against [`Problem`]. Persisting LP files in debug mode
//! is its only side effect.

use crate::{
    problem::{Cmp, Problem, Sense, VarId, VarKind},
    OptError,
};
use good_lp::{
    constraint::Constraint, solvers::highs::highs, Expression, ProblemVariables, Solution as _,
    SolverModel, Variable,
};
use log::{debug, info};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

/// Binary decisions within this distance of 1 count as selected.
pub const EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, Default)]
pub struct SolveOptions {
    /// Relative MIP gap at which the search may stop.
    pub rel_gap: Option<f64>,
    /// Wall-clock budget for one solve, minutes.
    pub max_time_minutes: Option<f64>,
    /// Pin the solver thread count for reproducibility.
    pub threads: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    /// A solution exists but the time budget expired first.
    Feasible,
    Infeasible,
    TimedOut,
    Unbounded,
}

/// Extracted variable values of a solved problem.
#[derive(Debug, Clone)]
pub struct Solution {
    values: Vec<f64>,
    pub objective: f64,
}

impl Solution {
    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }

    pub fn selected(&self, var: VarId) -> bool {
        self.value(var) > 1.0 - EPSILON
    }
}

#[derive(Debug)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub solution: Option<Solution>,
}

impl SolveResult {
    /// A timeout without an incumbent is handled like infeasibility.
    pub fn usable(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }
}

/// Solves `problem` with the HiGHS backend.
pub fn solve(problem: &Problem, options: &SolveOptions) -> Result<SolveResult, OptError> {
    let mut vars = ProblemVariables::new();
    let handles: Vec<Variable> = problem
        .vars
        .iter()
        .map(|def| match def.kind {
            VarKind::Binary => vars.add(good_lp::variable().binary()),
            VarKind::Continuous { lb, ub } => {
                let definition = good_lp::variable().min(lb);
                if ub == f64::INFINITY {
                    vars.add(definition)
                } else {
                    vars.add(definition.max(ub))
                }
            }
        })
        .collect();

    let to_expression = |expr: &crate::problem::LinExpr| -> Expression {
        let mut out = Expression::from(expr.constant);
        for (var, coef) in expr.simplified() {
            out += coef * handles[var.0];
        }
        out
    };

    let objective = to_expression(&problem.objective);
    let mut model = match problem.sense {
        Sense::Minimize => vars.minimise(objective).using(highs),
        Sense::Maximize => vars.maximise(objective).using(highs),
    };
    model = model.set_verbose(false);
    if let Some(minutes) = options.max_time_minutes {
        model = model.set_time_limit(minutes.abs() * 60.0);
    }
    if let Some(gap) = options.rel_gap {
        if gap > 0.0 {
            debug!("relative stopping criteria {:.2}% of optimal", gap * 100.0);
            model = model.set_mip_rel_gap(gap);
        }
    }
    if let Some(threads) = options.threads {
        model = model.set_threads(threads);
    }

    for constraint in &problem.constraints {
        // Constant constraints either hold trivially or decide the
        // whole problem.
        if constraint.expr.simplified().is_empty() {
            let lhs = constraint.expr.constant;
            let holds = match constraint.cmp {
                Cmp::Le => lhs <= constraint.rhs + EPSILON,
                Cmp::Ge => lhs >= constraint.rhs - EPSILON,
                Cmp::Eq => (lhs - constraint.rhs).abs() <= EPSILON,
            };
            if holds {
                continue;
            }
            return Ok(SolveResult {
                status: SolveStatus::Infeasible,
                solution: None,
            });
        }
        let lhs = to_expression(&constraint.expr);
        let built: Constraint = match constraint.cmp {
            Cmp::Le => lhs.leq(constraint.rhs),
            Cmp::Ge => lhs.geq(constraint.rhs),
            Cmp::Eq => lhs.eq(constraint.rhs),
        };
        model = model.with(built);
    }

    let started = Instant::now();
    let outcome = model.solve();
    let elapsed = started.elapsed();
    info!(
        "{}: {} vars, {} constraints, solved in {elapsed:?}",
        problem.name,
        problem.vars.len(),
        problem.constraints.len()
    );

    match outcome {
        Ok(solved) => {
            let values: Vec<f64> = handles.iter().map(|&handle| solved.value(handle)).collect();
            let objective = solved.eval(to_expression(&problem.objective));
            let hit_time_limit = options
                .max_time_minutes
                .map(|minutes| elapsed.as_secs_f64() >= minutes.abs() * 60.0)
                .unwrap_or(false);
            let status = if hit_time_limit {
                SolveStatus::Feasible
            } else {
                SolveStatus::Optimal
            };
            Ok(SolveResult {
                status,
                solution: Some(Solution { values, objective }),
            })
        }
        Err(good_lp::ResolutionError::Infeasible) => Ok(SolveResult {
            status: SolveStatus::Infeasible,
            solution: None,
        }),
        Err(good_lp::ResolutionError::Unbounded) => Ok(SolveResult {
            status: SolveStatus::Unbounded,
            solution: None,
        }),
        Err(error) => {
            let message = error.to_string();
            if message.to_ascii_lowercase().contains("time") {
                Ok(SolveResult {
                    status: SolveStatus::TimedOut,
                    solution: None,
                })
            } else {
                Err(OptError::Solver(message))
            }
        }
    }
}

/// Writes the problem as `<dir>/<phase>.lp` when a debug directory is
/// configured.
pub fn dump_lp(problem: &Problem, debug_dir: Option<&Path>, phase: &str) -> Result<Option<PathBuf>, OptError> {
    let Some(dir) = debug_dir else {
        return Ok(None);
    };
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{phase}.lp"));
    let mut buffer = Vec::new();
    problem.write_lp(&mut buffer)?;
    fs::write(&path, buffer)?;
    info!("{phase} problem dumped to {}", path.display());
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::{solve, SolveOptions, SolveStatus};
    use crate::problem::{Cmp, LinExpr, Problem, Sense};

    #[test]
    fn test_small_milp() {
        // max x + 2y st x + y <= 1, binaries.
        let mut problem = Problem::new("small");
        let x = problem.add_binary("x".into());
        let y = problem.add_binary("y".into());
        let mut objective = LinExpr::new();
        objective.add_term(x, 1.0).add_term(y, 2.0);
        problem.set_objective(Sense::Maximize, objective);
        let mut expr = LinExpr::new();
        expr.add_term(x, 1.0).add_term(y, 1.0);
        problem.constrain(expr, Cmp::Le, 1.0);

        let result = solve(&problem, &SolveOptions::default()).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        let solution = result.solution.unwrap();
        assert!(solution.selected(y));
        assert!(!solution.selected(x));
    }

    #[test]
    fn test_infeasible_is_a_status_not_an_error() {
        let mut problem = Problem::new("infeasible");
        let x = problem.add_continuous("x".into(), 0.0, 1.0);
        problem.constrain(LinExpr::term(x, 1.0), Cmp::Ge, 2.0);
        let result = solve(&problem, &SolveOptions::default()).unwrap();
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert!(result.solution.is_none());
    }
}
