use log::{debug, warn};

use crate::{
    master::{Assignment, LinearConstraint, MasterSolution, Sense, VarId},
    problem::Problem,
    solution::Event,
    solvers::SolverError,
};

#[derive(Debug, Clone)]
pub enum Cut {
    /// The listed decisions cannot all be 1 at the same time.
    Feasibility { vars: Vec<VarId>, degraded: bool },
    /// The candidate `solution` costs `objective`; other candidates are
    /// bounded by `objective - M * (number of flipped decisions)`.
    Optimality {
        objective: i64,
        events: Vec<Event>,
        solution: MasterSolution,
    },
}

impl Cut {
    pub fn materialize(&self, big_m: i64) -> Result<LinearConstraint, SolverError> {
        match self {
            Cut::Feasibility { vars, .. } => {
                let terms = vars.iter().map(|v| (*v, 1)).collect::<Vec<_>>();
                let rhs = terms.len() as i64 - 1;
                Ok(LinearConstraint::new(terms, Sense::Le, rhs))
            }
            Cut::Optimality {
                objective,
                solution,
                ..
            } => {
                let n_active = solution.active.len() as i64;
                let rhs = big_m
                    .checked_mul(n_active)
                    .and_then(|m| objective.checked_sub(m))
                    .ok_or(SolverError::BigMOverflow)?;
                let terms = solution
                    .active
                    .iter()
                    .map(|v| (*v, -big_m))
                    .chain(solution.inactive.iter().map(|v| (*v, big_m)))
                    .collect();
                Ok(LinearConstraint {
                    terms,
                    theta: 1,
                    sense: Sense::Ge,
                    rhs,
                })
            }
        }
    }

    /// Lower bound an optimality cut puts on the cost of `assignment`.
    pub fn bound_at(&self, assignment: &Assignment, big_m: i64) -> Option<i128> {
        match self {
            Cut::Feasibility { .. } => None,
            Cut::Optimality {
                objective,
                solution,
                ..
            } => {
                let deviation = solution.active.iter().filter(|v| !assignment[**v]).count()
                    + solution.inactive.iter().filter(|v| assignment[**v]).count();
                Some(*objective as i128 - big_m as i128 * deviation as i128)
            }
        }
    }
}

/// An upper bound on the latest start time of any scheduled operation,
/// assuming the start times are the earliest ones satisfying the
/// schedule's difference constraints.
fn latest_start_bound(problem: &Problem) -> Option<i64> {
    let mut bound = problem
        .trains
        .iter()
        .flat_map(|t| t.operations.iter())
        .map(|op| op.start_lb)
        .max()
        .unwrap_or(0);
    for op in problem.trains.iter().flat_map(|t| t.operations.iter()) {
        bound = bound.checked_add(op.min_duration)?.checked_add(op.max_release_time())?;
    }
    Some(bound)
}

/// Smallest big-M strictly above any schedule cost the subproblems can report.
pub fn safe_big_m(problem: &Problem) -> Result<i64, SolverError> {
    let latest = latest_start_bound(problem).ok_or(SolverError::BigMOverflow)?;
    let mut total: i64 = 0;
    for term in problem.objective.iter() {
        let op = problem.operation((term.train, term.operation));
        let t = op.start_ub.map(|ub| ub.min(latest)).unwrap_or(latest);
        let cost = if t > term.threshold {
            (t - term.threshold)
                .checked_mul(term.coeff)
                .and_then(|c| c.checked_add(term.increment))
        } else {
            Some(0)
        };
        total = cost
            .and_then(|c| total.checked_add(c))
            .ok_or(SolverError::BigMOverflow)?;
    }
    let big_m = total.checked_add(1).ok_or(SolverError::BigMOverflow)?;
    debug!("Derived big-M {}", big_m);
    Ok(big_m)
}

/// Uses `configured` if given and not smaller than the derived bound.
pub fn choose_big_m(problem: &Problem, configured: Option<i64>) -> Result<i64, SolverError> {
    let required = safe_big_m(problem)?;
    match configured {
        Some(m) if m < required => {
            warn!("Configured big-M {} is below the derived bound {}", m, required);
            Err(SolverError::BigMTooSmall {
                configured: m,
                required,
            })
        }
        Some(m) => Ok(m),
        None => Ok(required),
    }
}
