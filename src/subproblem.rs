use std::collections::{BTreeMap, HashMap};

use log::{trace, warn};

use crate::{
    master::{Assignment, MasterProblem, VarId},
    problem::{OpRef, Problem},
    solution::Event,
    solvers::SolverError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubproblemStatus {
    Feasible,
    Infeasible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubproblemOutcome {
    Feasible { objective: i64, events: Vec<Event> },
    /// `degraded` is set when the backend could not name the conflicting
    /// constraints and every active decision was blamed instead.
    Infeasible { conflict: Vec<VarId>, degraded: bool },
}

/// A timing model for one fixed master candidate. Every posted constraint
/// carries the master decisions it depends on; a conflict is reported as the
/// union of the decisions of an infeasible subset of constraints.
pub trait SubproblemBackend {
    type Time: Copy;

    /// Start time of `op` with `lb <= t <= ub`.
    fn new_time(&mut self, op: OpRef, lb: i64, ub: Option<i64>, labels: &[VarId]) -> Result<Self::Time, SolverError>;

    /// `after >= before + min_gap`
    fn post_precedence(
        &mut self,
        before: Self::Time,
        after: Self::Time,
        min_gap: i64,
        labels: &[VarId],
    ) -> Result<(), SolverError>;

    /// `later >= earlier_exit + release`
    fn post_resource_order(
        &mut self,
        earlier_exit: Self::Time,
        later: Self::Time,
        release: i64,
        labels: &[VarId],
    ) -> Result<(), SolverError>;

    /// Finds the earliest start times, which minimize any nondecreasing objective.
    fn solve(&mut self) -> Result<SubproblemStatus, SolverError>;

    fn start_time(&self, time: Self::Time) -> Result<i64, SolverError>;

    /// Decisions behind an infeasible subset of the posted constraints. May be
    /// empty when the backend cannot tell.
    fn conflict(&mut self) -> Result<Vec<VarId>, SolverError>;
}

struct ActiveOp<T> {
    time: T,
    labels: Vec<VarId>,
    successor: Option<usize>,
}

fn merge_labels(a: &[VarId], b: &[VarId], extra: Option<VarId>) -> Vec<VarId> {
    let mut labels = a.iter().chain(b.iter()).copied().chain(extra).collect::<Vec<_>>();
    labels.sort();
    labels.dedup();
    labels
}

/// Builds and solves the timing problem for the routes and orders chosen by
/// `assignment`. Only operations on each train's chosen route are scheduled.
pub fn solve_subproblem<B: SubproblemBackend>(
    problem: &Problem,
    master: &MasterProblem,
    assignment: &Assignment,
    backend: &mut B,
) -> Result<SubproblemOutcome, SolverError> {
    let _p = hprof::enter("subproblem");

    // Walk each train's chosen route. An operation depends on every route
    // decision taken on the way to it.
    let mut active: BTreeMap<OpRef, ActiveOp<B::Time>> = BTreeMap::new();
    for (train_idx, train) in problem.trains.iter().enumerate() {
        let mut op_idx = 0;
        let mut labels: Vec<VarId> = Vec::new();
        loop {
            let op = &train.operations[op_idx];
            let time = backend.new_time((train_idx, op_idx), op.start_lb, op.start_ub, &labels)?;
            let next = master.chosen_successor(problem, assignment, (train_idx, op_idx))?;
            let next_labels = next.map(|(_, z)| merge_labels(&labels, &[], z));
            active.insert(
                (train_idx, op_idx),
                ActiveOp {
                    time,
                    labels,
                    successor: next.map(|(s, _)| s),
                },
            );
            match (next, next_labels) {
                (Some((s, _)), Some(l)) => {
                    op_idx = s;
                    labels = l;
                }
                _ => break,
            }
        }
    }

    for (&(train_idx, op_idx), op) in active.iter() {
        if let Some(s) = op.successor {
            let next = &active[&(train_idx, s)];
            let min_duration = problem.trains[train_idx].operations[op_idx].min_duration;
            backend.post_precedence(op.time, next.time, min_duration, &next.labels)?;
        }
    }

    let mut n_resource_constraints = 0;
    for &(a, b) in master.conflicts.iter() {
        // Last operations never leave their resources and are not ordered.
        let (op_a, op_b) = match (active.get(&a), active.get(&b)) {
            (Some(op_a), Some(op_b)) if op_a.successor.is_some() && op_b.successor.is_some() => (op_a, op_b),
            _ => continue,
        };
        let a_first = master.ahead(assignment, a, b).ok_or_else(|| missing_order(a, b))?;
        let (earlier, later, first, second) = if a_first {
            (op_a, op_b, a, b)
        } else {
            (op_b, op_a, b, a)
        };
        let y = master.order_var(first, second).ok_or_else(|| missing_order(first, second))?;
        let exit = match earlier.successor {
            Some(s) => &active[&(first.0, s)],
            None => continue,
        };
        let release = problem.shared_release(first, second).unwrap_or(0);
        let labels = merge_labels(&exit.labels, &later.labels, Some(y));
        backend.post_resource_order(exit.time, later.time, release, &labels)?;
        n_resource_constraints += 1;
    }
    trace!(
        "subproblem with {} operations and {} resource constraints",
        active.len(),
        n_resource_constraints
    );

    match backend.solve()? {
        SubproblemStatus::Feasible => {
            let mut start_times = HashMap::new();
            let mut events = Vec::with_capacity(active.len());
            for (&(train, operation), op) in active.iter() {
                let time = backend.start_time(op.time)?;
                start_times.insert((train, operation), time);
                events.push(Event {
                    train,
                    operation,
                    time,
                });
            }
            Ok(SubproblemOutcome::Feasible {
                objective: problem.objective_value(&start_times),
                events,
            })
        }
        SubproblemStatus::Infeasible => {
            let conflict = backend.conflict()?;
            if conflict.is_empty() {
                warn!("Infeasible subproblem without a conflict; blaming all active decisions");
                let conflict = assignment
                    .iter_enumerated()
                    .filter(|(_, value)| **value)
                    .map(|(v, _)| v)
                    .collect();
                Ok(SubproblemOutcome::Infeasible {
                    conflict,
                    degraded: true,
                })
            } else {
                Ok(SubproblemOutcome::Infeasible {
                    conflict,
                    degraded: false,
                })
            }
        }
    }
}

fn missing_order(first: OpRef, second: OpRef) -> SolverError {
    SolverError::InvalidAssignment(format!("no order variable for {:?} before {:?}", first, second))
}
