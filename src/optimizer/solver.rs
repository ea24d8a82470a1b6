//! Solver adapters.
//!
//! [`LpSolver`] is the seam between the engine and a concrete backend.
//! [`MicroLpSolver`] translates a [`Problem`] into a `good_lp` model solved by
//! the pure-Rust `microlp` simplex and branch-and-bound implementation.

use std::time::{Duration, Instant};

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolutionStatus, SolverModel,
    Variable, WithTimeLimit, microlp, variable,
};
use tracing::debug;

use crate::error::ScheduleError;
use crate::optimizer::problem::{Problem, Sense};

/// Default wall-clock budget for one solve.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(10);

/// An optimal assignment for every variable of a [`Problem`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedProblem {
    /// Indexed by [`crate::optimizer::problem::VarId`].
    pub values: Vec<f64>,
    pub objective: f64,
    pub elapsed: Duration,
}

/// Solves a minimization problem to proven optimality or reports why it
/// could not.
///
/// Implementations must never return a partial or best-effort assignment as
/// [`Ok`].
pub trait LpSolver {
    /// # Errors
    ///
    /// [`ScheduleError::Infeasible`], [`ScheduleError::Unbounded`],
    /// [`ScheduleError::SolveTimeout`] or [`ScheduleError::SolverFailure`].
    fn solve(&self, problem: &Problem) -> Result<SolvedProblem, ScheduleError>;
}

/// `microlp` through `good_lp`, bounded by a wall-clock budget.
///
/// The budget is handed to microlp as its own time limit, so the solve stops
/// on the calling thread once it runs out. An incumbent found before that is
/// discarded unless it was proven optimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicroLpSolver {
    time_budget: Duration,
}

impl Default for MicroLpSolver {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_BUDGET)
    }
}

impl MicroLpSolver {
    pub fn new(time_budget: Duration) -> Self {
        Self { time_budget }
    }

    pub fn time_budget(&self) -> Duration {
        self.time_budget
    }
}

impl LpSolver for MicroLpSolver {
    fn solve(&self, problem: &Problem) -> Result<SolvedProblem, ScheduleError> {
        let started = Instant::now();
        let values = solve_microlp(problem, self.time_budget)?;
        let elapsed = started.elapsed();
        let objective = problem.objective_value(&values);
        debug!(
            ?elapsed,
            objective,
            mixed_integer = problem.has_integers(),
            "microlp solved"
        );
        Ok(SolvedProblem {
            values,
            objective,
            elapsed,
        })
    }
}

fn solve_microlp(problem: &Problem, budget: Duration) -> Result<Vec<f64>, ScheduleError> {
    let mut vars = ProblemVariables::new();
    let handles: Vec<Variable> = problem
        .variables
        .iter()
        .map(|def| {
            let mut definition = variable().min(def.lower);
            if let Some(upper) = def.upper {
                definition = definition.max(upper);
            }
            if def.integer {
                definition = definition.integer();
            }
            vars.add(definition)
        })
        .collect();

    let mut objective = Expression::with_capacity(problem.objective.len());
    for &(var, coefficient) in &problem.objective {
        objective.add_mul(coefficient, handles[var.0]);
    }

    let mut model = vars
        .minimise(objective)
        .using(microlp)
        .with_time_limit(budget.as_secs_f64());
    for row in &problem.constraints {
        let mut lhs = Expression::with_capacity(row.terms.len());
        for &(var, coefficient) in &row.terms {
            lhs.add_mul(coefficient, handles[var.0]);
        }
        let constraint = match row.sense {
            Sense::Eq => lhs.eq(row.rhs),
            Sense::Le => lhs.leq(row.rhs),
            Sense::Ge => lhs.geq(row.rhs),
        };
        model.add_constraint(constraint);
    }

    let solution = model.solve().map_err(|e| match e {
        ResolutionError::Infeasible => ScheduleError::Infeasible,
        ResolutionError::Unbounded => ScheduleError::Unbounded,
        // microlp only reports `Other` when the limit expires with no incumbent.
        ResolutionError::Other(_) => ScheduleError::SolveTimeout { budget },
        other => ScheduleError::SolverFailure(other.to_string()),
    })?;
    if !matches!(solution.status(), SolutionStatus::Optimal) {
        return Err(ScheduleError::SolveTimeout { budget });
    }

    let values: Vec<f64> = handles.iter().map(|&h| solution.value(h)).collect();
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(ScheduleError::SolverFailure(format!(
            "solver returned a non-finite value for `{}`",
            problem.variables[i].name
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::optimizer::problem::ConstraintKind;

    const ROW: ConstraintKind = ConstraintKind::PowerBalance { site: 0, step: 0 };

    #[test]
    fn solves_small_lp() {
        // min x + 2y  s.t. x + y = 3, x <= 2
        let mut p = Problem::new();
        let x = p.add_variable("x".into(), 0.0, Some(2.0));
        let y = p.add_variable("y".into(), 0.0, None);
        p.add_constraint(ROW, vec![(x, 1.0), (y, 1.0)], Sense::Eq, 3.0);
        p.objective = vec![(x, 1.0), (y, 2.0)];

        let solved = MicroLpSolver::default().solve(&p).expect("feasible");
        assert_abs_diff_eq!(solved.values[x.0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(solved.values[y.0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(solved.objective, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn inequality_rows_are_honoured() {
        // min -x  s.t. x <= 1.5, x >= 0.5
        let mut p = Problem::new();
        let x = p.add_variable("x".into(), 0.0, None);
        p.add_constraint(ROW, vec![(x, 1.0)], Sense::Le, 1.5);
        p.add_constraint(ROW, vec![(x, 1.0)], Sense::Ge, 0.5);
        p.objective = vec![(x, -1.0)];
        let solved = MicroLpSolver::default().solve(&p).unwrap();
        assert_abs_diff_eq!(solved.values[x.0], 1.5, epsilon = 1e-9);
    }

    #[test]
    fn binary_indicator_keeps_one_side_at_zero() {
        // min -x - y  s.t. x <= 3z, y <= 3(1 - z), x, y in [0, 2], z binary.
        // The relaxation reaches -3 with z = 1/2; the integer optimum is -2.
        let mut p = Problem::new();
        let x = p.add_variable("x".into(), 0.0, Some(2.0));
        let y = p.add_variable("y".into(), 0.0, Some(2.0));
        let z = p.add_binary("z".into());
        p.add_constraint(ROW, vec![(x, 1.0), (z, -3.0)], Sense::Le, 0.0);
        p.add_constraint(ROW, vec![(y, 1.0), (z, 3.0)], Sense::Le, 3.0);
        p.objective = vec![(x, -1.0), (y, -1.0)];

        let solved = MicroLpSolver::default().solve(&p).expect("feasible");
        let indicator = solved.values[z.0];
        assert!(indicator == 0.0 || indicator == 1.0, "z = {indicator}");
        assert_abs_diff_eq!(solved.values[x.0] * solved.values[y.0], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(solved.objective, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn contradictory_rows_are_infeasible() {
        let mut p = Problem::new();
        let x = p.add_variable("x".into(), 0.0, Some(1.0));
        p.add_constraint(ROW, vec![(x, 1.0)], Sense::Eq, 2.0);
        p.objective = vec![(x, 1.0)];
        assert_eq!(MicroLpSolver::default().solve(&p), Err(ScheduleError::Infeasible));
    }

    #[test]
    fn unbounded_objective_is_reported() {
        let mut p = Problem::new();
        let x = p.add_variable("x".into(), 0.0, None);
        p.objective = vec![(x, -1.0)];
        assert_eq!(MicroLpSolver::default().solve(&p), Err(ScheduleError::Unbounded));
    }

    #[test]
    fn exhausted_budget_stops_the_solve() {
        let mut p = Problem::new();
        let x = p.add_variable("x".into(), 0.0, Some(2.0));
        let y = p.add_variable("y".into(), 0.0, None);
        p.add_constraint(ROW, vec![(x, 1.0), (y, 1.0)], Sense::Eq, 3.0);
        p.objective = vec![(x, 1.0), (y, 2.0)];

        let solver = MicroLpSolver::new(Duration::ZERO);
        assert_eq!(
            solver.solve(&p),
            Err(ScheduleError::SolveTimeout {
                budget: Duration::ZERO
            })
        );
    }
}
