use std::collections::BTreeSet;

use crate::{
    idl::{DVar, IdlModel, IdlSolver},
    master::VarId,
    problem::OpRef,
    solvers::SolverError,
    subproblem::{SubproblemBackend, SubproblemStatus},
};

/// Subproblem backend on the in-crate difference logic solver. Master
/// decisions are used directly as constraint labels.
pub struct DiffLogicSubproblem {
    solver: IdlSolver<VarId>,
    assumptions: BTreeSet<VarId>,
    minimize_cores: bool,
    model: Option<IdlModel>,
    core: Option<Vec<VarId>>,
}

impl DiffLogicSubproblem {
    pub fn new(minimize_cores: bool) -> Self {
        DiffLogicSubproblem {
            solver: IdlSolver::new(),
            assumptions: BTreeSet::new(),
            minimize_cores,
            model: None,
            core: None,
        }
    }

    fn assume(&mut self, labels: &[VarId]) {
        self.assumptions.extend(labels.iter().copied());
    }
}

impl SubproblemBackend for DiffLogicSubproblem {
    type Time = DVar;

    fn new_time(&mut self, _op: OpRef, lb: i64, ub: Option<i64>, labels: &[VarId]) -> Result<DVar, SolverError> {
        let zero = self.solver.zero();
        let t = self.solver.new_int();
        self.solver.add_diff(labels, zero, t, -lb);
        if let Some(ub) = ub {
            self.solver.add_diff(labels, t, zero, ub);
        }
        self.assume(labels);
        Ok(t)
    }

    fn post_precedence(&mut self, before: DVar, after: DVar, min_gap: i64, labels: &[VarId]) -> Result<(), SolverError> {
        self.solver.add_diff(labels, before, after, -min_gap);
        self.assume(labels);
        Ok(())
    }

    fn post_resource_order(
        &mut self,
        earlier_exit: DVar,
        later: DVar,
        release: i64,
        labels: &[VarId],
    ) -> Result<(), SolverError> {
        self.solver.add_diff(labels, earlier_exit, later, -release);
        self.assume(labels);
        Ok(())
    }

    fn solve(&mut self) -> Result<SubproblemStatus, SolverError> {
        let _p = hprof::enter("difflogic solve");
        let assumptions = self.assumptions.iter().copied().collect::<Vec<_>>();
        match self.solver.solve_with_assumptions(&assumptions) {
            Ok(model) => {
                self.model = Some(model);
                Ok(SubproblemStatus::Feasible)
            }
            Err(core) => {
                self.core = Some(core);
                Ok(SubproblemStatus::Infeasible)
            }
        }
    }

    fn start_time(&self, time: DVar) -> Result<i64, SolverError> {
        self.model
            .as_ref()
            .and_then(|m| m.get_int_value(time))
            .ok_or_else(|| SolverError::UnexpectedStatus("no start time in difference logic model".to_string()))
    }

    fn conflict(&mut self) -> Result<Vec<VarId>, SolverError> {
        let mut core = self
            .core
            .take()
            .ok_or_else(|| SolverError::UnexpectedStatus("no conflict in difference logic solver".to_string()))?;
        if self.minimize_cores && core.len() > 1 {
            let _p = hprof::enter("minimize core");
            self.solver.minimize_core(&mut core);
        }
        Ok(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deadlock::DeadlockConfig,
        master::{Assignment, MasterProblem},
        subproblem::{solve_subproblem, SubproblemOutcome},
        test_instances,
    };

    /// Every infeasible candidate's conflict must stay infeasible when only
    /// the conflict's decisions are assumed.
    #[test]
    fn conflicts_replay_as_infeasible() {
        for instance in [test_instances::single_conflict(), test_instances::route_choice()] {
            let problem = instance.problem;
            let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
            let n = master.vars.len();
            for bits in 0..(1u32 << n) {
                let assignment: Assignment = (0..n).map(|i| bits & (1 << i) != 0).collect();
                if !master.constraints.iter().all(|c| c.is_satisfied(&assignment, 0)) {
                    continue;
                }
                for minimize in [false, true] {
                    let mut backend = DiffLogicSubproblem::new(minimize);
                    let outcome = solve_subproblem(&problem, &master, &assignment, &mut backend).unwrap();
                    if let SubproblemOutcome::Infeasible { conflict, degraded } = outcome {
                        assert!(!degraded);
                        assert!(conflict.iter().all(|v| assignment[*v]));
                        assert!(backend.solver.solve_with_assumptions(&conflict).is_err());
                    }
                }
            }
        }
    }
}
