use std::{
    collections::{HashSet, VecDeque},
    time::Instant,
};

use log::{debug, info, trace};
use typed_index_collections::TiVec;

use crate::{
    master::{Assignment, LinearConstraint, MasterProblem, Sense, VarId},
    solvers::{CandidateReply, MasterEngine, SearchStatus, SolverError},
};

/// Depth-first branch and cut over the master's binary variables with
/// bound propagation on the linear rows. Cuts returned for a candidate are
/// kept for the rest of the search.
#[derive(Default)]
pub struct BranchAndCut {
    pub nodes: usize,
    pub candidates: usize,
    pub best: Option<i64>,
}

impl BranchAndCut {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `sum(coeff * x) + theta * θ <= rhs`
struct Row {
    terms: Vec<(usize, i64)>,
    theta: i64,
    rhs: i64,
}

struct Frame {
    var: usize,
    value: bool,
    trail_len: usize,
    flipped: bool,
}

struct SearchState {
    rows: Vec<Row>,
    /// Rows without θ, by variable.
    watches: Vec<Vec<usize>>,
    /// Rows bounding θ from below.
    theta_rows: Vec<usize>,
    seen: HashSet<LinearConstraint>,
    values: Vec<Option<bool>>,
    trail: Vec<usize>,
    frames: Vec<Frame>,
    infeasible: bool,
}

impl SearchState {
    fn new(n_vars: usize) -> Self {
        SearchState {
            rows: Vec::new(),
            watches: vec![Vec::new(); n_vars],
            theta_rows: Vec::new(),
            seen: HashSet::new(),
            values: vec![None; n_vars],
            trail: Vec::new(),
            frames: Vec::new(),
            infeasible: false,
        }
    }

    /// Adds a constraint as one or two `<=` rows. Returns the new row indices.
    fn add_constraint(&mut self, constraint: &LinearConstraint) -> Result<Vec<usize>, SolverError> {
        if !self.seen.insert(constraint.clone()) {
            return Ok(Vec::new());
        }
        let terms = constraint
            .terms
            .iter()
            .filter(|(_, a)| *a != 0)
            .map(|(v, a)| (usize::from(*v), *a))
            .collect::<Vec<_>>();
        let negated = || terms.iter().map(|(v, a)| (*v, -a)).collect::<Vec<_>>();

        let mut rows = Vec::new();
        if matches!(constraint.sense, Sense::Le | Sense::Eq) {
            rows.push(Row {
                terms: terms.clone(),
                theta: constraint.theta,
                rhs: constraint.rhs,
            });
        }
        if matches!(constraint.sense, Sense::Ge | Sense::Eq) {
            rows.push(Row {
                terms: negated(),
                theta: -constraint.theta,
                rhs: -constraint.rhs,
            });
        }

        let mut added = Vec::new();
        for row in rows {
            if row.theta > 0 {
                return Err(SolverError::Unsupported(format!(
                    "upper bound on the cost variable in {:?}",
                    constraint
                )));
            }
            let idx = self.rows.len();
            if row.theta < 0 {
                self.theta_rows.push(idx);
            } else {
                if row.terms.is_empty() && row.rhs < 0 {
                    self.infeasible = true;
                }
                for (v, _) in row.terms.iter() {
                    self.watches[*v].push(idx);
                }
            }
            self.rows.push(row);
            added.push(idx);
        }
        Ok(added)
    }

    fn assign(&mut self, var: usize, value: bool) {
        self.values[var] = Some(value);
        self.trail.push(var);
    }

    fn undo_to(&mut self, trail_len: usize) {
        while self.trail.len() > trail_len {
            if let Some(var) = self.trail.pop() {
                self.values[var] = None;
            }
        }
    }

    fn min_activity(&self, row: &Row) -> i128 {
        row.terms
            .iter()
            .map(|(v, a)| match self.values[*v] {
                Some(true) => *a as i128,
                Some(false) => 0,
                None => (*a).min(0) as i128,
            })
            .sum()
    }

    /// Fixes variables implied by the queued rows. Returns `false` on a violated row.
    fn propagate(&mut self, mut queue: VecDeque<usize>) -> bool {
        while let Some(r) = queue.pop_front() {
            let min = self.min_activity(&self.rows[r]);
            let rhs = self.rows[r].rhs as i128;
            if min > rhs {
                return false;
            }
            let implied = self.rows[r]
                .terms
                .iter()
                .filter(|(v, _)| self.values[*v].is_none())
                .filter(|(_, a)| min + (*a as i128).abs() > rhs)
                .map(|(v, a)| (*v, *a < 0))
                .collect::<Vec<_>>();
            for (v, value) in implied {
                if self.values[v].is_none() {
                    self.assign(v, value);
                    queue.extend(self.watches[v].iter().copied());
                }
            }
        }
        true
    }

    fn propagate_var(&mut self, var: usize) -> bool {
        let queue = self.watches[var].iter().copied().collect();
        self.propagate(queue)
    }

    fn propagate_rows(&mut self, rows: &[usize]) -> bool {
        let queue = rows.iter().copied().filter(|r| self.rows[*r].theta == 0).collect();
        self.propagate(queue)
    }

    fn decide(&mut self, var: usize, value: bool) -> bool {
        self.frames.push(Frame {
            var,
            value,
            trail_len: self.trail.len(),
            flipped: false,
        });
        self.assign(var, value);
        self.propagate_var(var)
    }

    /// Moves to the next unexplored branch. Returns `false` when the tree is exhausted.
    fn backtrack(&mut self) -> bool {
        while let Some(frame) = self.frames.pop() {
            self.undo_to(frame.trail_len);
            if !frame.flipped {
                let value = !frame.value;
                self.frames.push(Frame {
                    var: frame.var,
                    value,
                    trail_len: frame.trail_len,
                    flipped: true,
                });
                self.assign(frame.var, value);
                if self.propagate_var(frame.var) {
                    return true;
                }
            }
        }
        false
    }

    fn rows_satisfied(&self) -> bool {
        self.rows
            .iter()
            .filter(|row| row.theta == 0)
            .all(|row| self.min_activity(row) <= row.rhs as i128)
    }

    /// Smallest θ allowed by the θ rows under a complete assignment.
    fn theta_bound(&self) -> i64 {
        let mut bound: i128 = 0;
        for &r in self.theta_rows.iter() {
            let row = &self.rows[r];
            let excess = self.min_activity(row) - row.rhs as i128;
            let divisor = -row.theta as i128;
            if excess > 0 {
                bound = bound.max((excess + divisor - 1) / divisor);
            }
        }
        bound.min(i64::MAX as i128) as i64
    }

    fn assignment(&self) -> Assignment {
        self.values.iter().map(|v| v.unwrap_or(false)).collect::<TiVec<VarId, bool>>()
    }
}

impl MasterEngine for BranchAndCut {
    fn search(
        &mut self,
        master: &MasterProblem,
        deadline: Option<Instant>,
        on_candidate: &mut dyn FnMut(&Assignment) -> Result<CandidateReply, SolverError>,
    ) -> Result<SearchStatus, SolverError> {
        let _p = hprof::enter("branch and cut");
        let n_vars = master.vars.len();
        let mut state = SearchState::new(n_vars);
        let mut static_rows = Vec::new();
        for constraint in master.constraints.iter() {
            static_rows.extend(state.add_constraint(constraint)?);
        }
        debug!("Branch and cut over {} variables and {} rows", n_vars, state.rows.len());

        if state.infeasible || !state.propagate_rows(&static_rows) {
            info!("Master problem is infeasible at the root");
            return Ok(SearchStatus::Exhausted);
        }

        loop {
            if state.infeasible {
                return Ok(SearchStatus::Exhausted);
            }
            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                info!("Branch and cut reached the time limit after {} nodes", self.nodes);
                return Ok(SearchStatus::TimeLimit);
            }

            let next = (0..n_vars).find(|v| state.values[*v].is_none());
            if let Some(var) = next {
                self.nodes += 1;
                if !state.decide(var, master.phase[VarId::from(var)]) && !state.backtrack() {
                    return Ok(SearchStatus::Exhausted);
                }
                continue;
            }

            // Complete assignment.
            if state.rows_satisfied() {
                let theta = state.theta_bound();
                if self.best.map(|best| theta < best).unwrap_or(true) {
                    let assignment = state.assignment();
                    self.candidates += 1;
                    let reply = on_candidate(&assignment)?;
                    let mut added = Vec::new();
                    for cut in reply.cuts.iter() {
                        added.extend(state.add_constraint(cut)?);
                    }
                    trace!("Candidate {} added {} rows", self.candidates, added.len());

                    let theta = state.theta_bound();
                    if !state.infeasible
                        && state.rows_satisfied()
                        && self.best.map(|best| theta < best).unwrap_or(true)
                    {
                        debug!("New best master candidate with cost {}", theta);
                        self.best = Some(theta);
                    }
                    if reply.terminate {
                        return Ok(SearchStatus::Terminated);
                    }
                }
            }

            if !state.backtrack() {
                debug!(
                    "Branch and cut exhausted after {} nodes and {} candidates",
                    self.nodes, self.candidates
                );
                return Ok(SearchStatus::Exhausted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cuts::{self, Cut},
        deadlock::DeadlockConfig,
        problem::Problem,
        solvers::difflogic::DiffLogicSubproblem,
        subproblem::{solve_subproblem, SubproblemOutcome},
        test_instances,
    };

    fn benders_cut(problem: &Problem, master: &MasterProblem, assignment: &Assignment, big_m: i64) -> LinearConstraint {
        let mut backend = DiffLogicSubproblem::new(true);
        let cut = match solve_subproblem(problem, master, assignment, &mut backend).unwrap() {
            SubproblemOutcome::Feasible { objective, events } => Cut::Optimality {
                objective,
                events,
                solution: master.extract_solution(assignment),
            },
            SubproblemOutcome::Infeasible { conflict, degraded } => Cut::Feasibility {
                vars: conflict,
                degraded,
            },
        };
        cut.materialize(big_m).unwrap()
    }

    #[test]
    fn enumerates_every_feasible_candidate() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let mut seen = Vec::new();
        let mut engine = BranchAndCut::new();
        let status = engine
            .search(&master, None, &mut |a: &Assignment| -> Result<CandidateReply, SolverError> {
                seen.push(a.clone());
                // Forbid exactly this candidate.
                let terms = a.iter_enumerated().map(|(v, x)| (v, if *x { 1 } else { -1 })).collect::<Vec<_>>();
                let ones = a.iter().filter(|x| **x).count() as i64;
                Ok(CandidateReply {
                    cuts: vec![LinearConstraint::new(terms, Sense::Le, ones - 1)],
                    terminate: false,
                })
            })
            .unwrap();
        assert_eq!(status, SearchStatus::Exhausted);
        // Two routes times two orders.
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|a| master.constraints.iter().all(|c| c.is_satisfied(a, 0))));
        assert_eq!(engine.best, None);
    }

    #[test]
    fn finds_optimum_with_benders_cuts() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let big_m = cuts::choose_big_m(&problem, None).unwrap();
        let mut engine = BranchAndCut::new();
        let status = engine
            .search(&master, None, &mut |a: &Assignment| -> Result<CandidateReply, SolverError> {
                Ok(CandidateReply {
                    cuts: vec![benders_cut(&problem, &master, a, big_m)],
                    terminate: false,
                })
            })
            .unwrap();
        assert_eq!(status, SearchStatus::Exhausted);
        assert_eq!(engine.best, Some(7));
    }

    #[test]
    fn duplicate_cuts_do_not_change_the_search() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let big_m = cuts::choose_big_m(&problem, None).unwrap();

        let run = |copies: usize| {
            let mut seen = Vec::new();
            let mut engine = BranchAndCut::new();
            engine
                .search(&master, None, &mut |a: &Assignment| -> Result<CandidateReply, SolverError> {
                    seen.push(a.clone());
                    let cut = benders_cut(&problem, &master, a, big_m);
                    Ok(CandidateReply {
                        cuts: vec![cut; copies],
                        terminate: false,
                    })
                })
                .unwrap();
            (seen, engine.best)
        };
        assert_eq!(run(1), run(3));
    }

    #[test]
    fn infeasible_master_is_exhausted_without_candidates() {
        let problem = test_instances::single_conflict().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let mut calls = 0;
        let mut engine = BranchAndCut::new();
        let status = engine
            .search(&master, None, &mut |_: &Assignment| -> Result<CandidateReply, SolverError> {
                calls += 1;
                // Rule out everything.
                Ok(CandidateReply {
                    cuts: vec![LinearConstraint::new(vec![], Sense::Le, -1)],
                    terminate: false,
                })
            })
            .unwrap();
        assert_eq!(status, SearchStatus::Exhausted);
        assert_eq!(calls, 1);
        assert_eq!(engine.best, None);
    }

    #[test]
    fn terminate_stops_the_search() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let mut calls = 0;
        let status = BranchAndCut::new()
            .search(&master, None, &mut |_: &Assignment| -> Result<CandidateReply, SolverError> {
                calls += 1;
                Ok(CandidateReply {
                    cuts: vec![],
                    terminate: true,
                })
            })
            .unwrap();
        assert_eq!(status, SearchStatus::Terminated);
        assert_eq!(calls, 1);
    }

    #[test]
    fn expired_deadline_stops_before_any_candidate() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let status = BranchAndCut::new()
            .search(&master, Some(Instant::now()), &mut |_: &Assignment| -> Result<CandidateReply, SolverError> {
                panic!("no candidate expected")
            })
            .unwrap();
        assert_eq!(status, SearchStatus::TimeLimit);
    }
}
