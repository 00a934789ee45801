use std::collections::HashMap;

use log::{debug, info};
use typed_index_collections::TiVec;

use crate::{
    deadlock::{self, DeadlockConfig},
    problem::{Conflict, OpRef, OrderKey, Problem, ProblemError},
    solvers::SolverError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl From<VarId> for usize {
    fn from(v: VarId) -> Self {
        v.0 as usize
    }
}

impl From<usize> for VarId {
    fn from(x: usize) -> Self {
        VarId(x as u32)
    }
}

/// The master problem's binary decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MasterVar {
    /// Train `train` continues from `op` to `successor`.
    Route { train: usize, op: usize, successor: usize },
    /// `first` leaves the shared resources before `second` starts.
    Order { first: OpRef, second: OpRef },
}

impl std::fmt::Display for MasterVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterVar::Route { train, op, successor } => write!(f, "z_{}_{}_{}", train, op, successor),
            MasterVar::Order { first, second } => {
                write!(f, "y_{}_{}_{}_{}", first.0, first.1, second.0, second.1)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// `sum(coeff * var) + theta * θ  (sense)  rhs` over master variables and the
/// continuous cost variable θ.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinearConstraint {
    pub terms: Vec<(VarId, i64)>,
    pub theta: i64,
    pub sense: Sense,
    pub rhs: i64,
}

pub type Assignment = TiVec<VarId, bool>;

/// A master candidate split into the decisions set to 1 and those set to 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasterSolution {
    pub active: Vec<VarId>,
    pub inactive: Vec<VarId>,
}

impl LinearConstraint {
    pub fn new(terms: Vec<(VarId, i64)>, sense: Sense, rhs: i64) -> Self {
        LinearConstraint {
            terms,
            theta: 0,
            sense,
            rhs,
        }
    }

    pub fn activity(&self, assignment: &Assignment) -> i128 {
        self.terms
            .iter()
            .filter(|(v, _)| assignment[*v])
            .map(|(_, a)| *a as i128)
            .sum()
    }

    pub fn is_satisfied(&self, assignment: &Assignment, theta: i64) -> bool {
        let lhs = self.activity(assignment) + self.theta as i128 * theta as i128;
        let rhs = self.rhs as i128;
        match self.sense {
            Sense::Le => lhs <= rhs,
            Sense::Ge => lhs >= rhs,
            Sense::Eq => lhs == rhs,
        }
    }
}

pub struct MasterProblem {
    pub vars: TiVec<VarId, MasterVar>,
    pub constraints: Vec<LinearConstraint>,
    /// Preferred value for each variable when branching.
    pub phase: TiVec<VarId, bool>,
    pub conflicts: Vec<Conflict>,
    route_vars: HashMap<(usize, usize, usize), VarId>,
    order_vars: HashMap<OrderKey, VarId>,
}

impl MasterProblem {
    pub fn new(problem: &Problem, config: &DeadlockConfig) -> Result<Self, ProblemError> {
        let _p = hprof::enter("build master");
        problem.validate()?;

        let mut vars: TiVec<VarId, MasterVar> = TiVec::new();
        let mut phase: TiVec<VarId, bool> = TiVec::new();
        let mut constraints = Vec::new();
        let mut route_vars = HashMap::new();
        let mut order_vars = HashMap::new();

        // Route variables, only where a train actually branches.
        for (train_idx, train) in problem.trains.iter().enumerate() {
            let remaining = train.shortest_remaining_duration();
            for (op_idx, op) in train.operations.iter().enumerate() {
                if op.successors.len() < 2 {
                    continue;
                }
                let preferred = op.successors.iter().copied().min_by_key(|s| remaining[*s]);
                let mut choice = Vec::new();
                for &successor in op.successors.iter() {
                    let var = vars.push_and_get_key(MasterVar::Route {
                        train: train_idx,
                        op: op_idx,
                        successor,
                    });
                    phase.push(Some(successor) == preferred);
                    route_vars.insert((train_idx, op_idx, successor), var);
                    choice.push((var, 1));
                }
                constraints.push(LinearConstraint::new(choice, Sense::Eq, 1));
            }
        }

        // Order variables in both directions for every conflict.
        let conflicts = problem.conflicts();
        for &(a, b) in conflicts.iter() {
            let ab = vars.push_and_get_key(MasterVar::Order { first: a, second: b });
            let ba = vars.push_and_get_key(MasterVar::Order { first: b, second: a });
            let a_first = (problem.operation(a).start_lb, a) <= (problem.operation(b).start_lb, b);
            phase.push(a_first);
            phase.push(!a_first);
            order_vars.insert((a, b), ab);
            order_vars.insert((b, a), ba);
            constraints.push(LinearConstraint::new(vec![(ab, 1), (ba, 1)], Sense::Eq, 1));
        }

        let mut master = MasterProblem {
            vars,
            constraints,
            phase,
            conflicts,
            route_vars,
            order_vars,
        };

        if config.path_pruning {
            let pruned = deadlock::prune_unreachable_routes(problem);
            for (train, op, successor) in pruned.iter().copied() {
                let var = master.route_vars[&(train, op, successor)];
                master.phase[var] = false;
                master.constraints.push(LinearConstraint::new(vec![(var, 1)], Sense::Eq, 0));
            }
            info!("Path pruning fixed {} route variables", pruned.len());
        }

        if config.swaps {
            let pairs = deadlock::swap_pairs(problem);
            for (c1, c2) in pairs.iter() {
                let (v1, v2) = (master.order_vars[c1], master.order_vars[c2]);
                master.constraints.push(LinearConstraint::new(vec![(v1, 1), (v2, -1)], Sense::Eq, 0));
            }
            info!("Added {} swap constraints", pairs.len());
        }

        if config.cycles {
            let cycles = deadlock::three_cycles(problem);
            for cycle in cycles.iter() {
                let terms = cycle.iter().map(|key| (master.order_vars[key], 1)).collect();
                master.constraints.push(LinearConstraint::new(terms, Sense::Le, 2));
            }
            info!("Added {} three-cycle constraints", cycles.len());
        }

        debug!(
            "Master problem has {} variables and {} constraints",
            master.vars.len(),
            master.constraints.len()
        );
        Ok(master)
    }

    pub fn route_var(&self, train: usize, op: usize, successor: usize) -> Option<VarId> {
        self.route_vars.get(&(train, op, successor)).copied()
    }

    pub fn order_var(&self, first: OpRef, second: OpRef) -> Option<VarId> {
        self.order_vars.get(&(first, second)).copied()
    }

    /// Whether the assignment puts `a` ahead of `b`. `None` if they do not conflict.
    pub fn ahead(&self, assignment: &Assignment, a: OpRef, b: OpRef) -> Option<bool> {
        self.order_var(a, b).map(|v| assignment[v])
    }

    pub fn describe(&self, var: VarId) -> String {
        self.vars[var].to_string()
    }

    /// The successor the assignment routes `(train, op)` to, with the route
    /// variable that made the choice. `None` at the sink.
    pub fn chosen_successor(
        &self,
        problem: &Problem,
        assignment: &Assignment,
        (train, op): OpRef,
    ) -> Result<Option<(usize, Option<VarId>)>, SolverError> {
        let successors = &problem.trains[train].operations[op].successors;
        match successors.len() {
            0 => Ok(None),
            1 => Ok(Some((successors[0], None))),
            _ => {
                let mut chosen = successors.iter().filter_map(|&s| {
                    self.route_var(train, op, s)
                        .filter(|v| assignment[*v])
                        .map(|v| (s, Some(v)))
                });
                match (chosen.next(), chosen.next()) {
                    (Some(choice), None) => Ok(Some(choice)),
                    _ => Err(SolverError::InvalidAssignment(format!(
                        "operation t{}o{} does not have exactly one chosen successor",
                        train, op
                    ))),
                }
            }
        }
    }

    pub fn extract_solution(&self, assignment: &Assignment) -> MasterSolution {
        let mut solution = MasterSolution::default();
        for (var, value) in assignment.iter_enumerated() {
            if *value {
                solution.active.push(var);
            } else {
                solution.inactive.push(var);
            }
        }
        solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_instances;

    fn assignment_with(master: &MasterProblem, active: &[VarId]) -> Assignment {
        master.vars.keys().map(|v| active.contains(&v)).collect()
    }

    #[test]
    fn variables_for_branches_and_conflicts() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        assert_eq!(master.vars.len(), 4);
        assert!(master.route_var(0, 0, 1).is_some());
        assert!(master.route_var(0, 0, 2).is_some());
        assert!(master.route_var(0, 1, 3).is_none());
        assert!(master.order_var((0, 1), (1, 0)).is_some());
        assert!(master.order_var((1, 0), (0, 1)).is_some());
        assert!(master.order_var((0, 2), (1, 0)).is_none());

        // Shorter remaining route and earlier operation are preferred.
        let z_a = master.route_var(0, 0, 1).unwrap();
        let z_b = master.route_var(0, 0, 2).unwrap();
        assert!(master.phase[z_a]);
        assert!(!master.phase[z_b]);
        assert!(master.phase[master.order_var((0, 1), (1, 0)).unwrap()]);
    }

    #[test]
    fn route_choice_and_order_exclusivity() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let z_a = master.route_var(0, 0, 1).unwrap();
        let z_b = master.route_var(0, 0, 2).unwrap();
        let y_ab = master.order_var((0, 1), (1, 0)).unwrap();
        let y_ba = master.order_var((1, 0), (0, 1)).unwrap();

        let feasible = |active: &[VarId]| {
            let a = assignment_with(&master, active);
            master.constraints.iter().all(|c| c.is_satisfied(&a, 0))
        };
        assert!(feasible(&[z_a, y_ab]));
        assert!(feasible(&[z_b, y_ba]));
        assert!(!feasible(&[z_a, z_b, y_ab]));
        assert!(!feasible(&[y_ab]));
        assert!(!feasible(&[z_a, y_ab, y_ba]));
        assert!(!feasible(&[z_a]));
    }

    #[test]
    fn chosen_successor_follows_route_variable() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let z_b = master.route_var(0, 0, 2).unwrap();
        let a = assignment_with(&master, &[z_b]);
        assert_eq!(master.chosen_successor(&problem, &a, (0, 0)).unwrap(), Some((2, Some(z_b))));
        assert_eq!(master.chosen_successor(&problem, &a, (0, 2)).unwrap(), Some((3, None)));
        assert_eq!(master.chosen_successor(&problem, &a, (0, 3)).unwrap(), None);

        let none = assignment_with(&master, &[]);
        assert!(master.chosen_successor(&problem, &none, (0, 0)).is_err());
    }

    #[test]
    fn deadlock_constraints_are_added() {
        let problem = test_instances::opposite_directions().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let c1 = master.order_var((0, 0), (1, 1)).unwrap();
        let c2 = master.order_var((0, 1), (1, 0)).unwrap();
        let swap = LinearConstraint::new(vec![(c1, 1), (c2, -1)], Sense::Eq, 0);
        assert!(master.constraints.contains(&swap));

        let without = DeadlockConfig {
            swaps: false,
            ..Default::default()
        };
        let master = MasterProblem::new(&problem, &without).unwrap();
        assert!(!master.constraints.contains(&swap));

        let problem = test_instances::triple_cycle().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let cycle = [
            master.order_var((0, 0), (1, 1)).unwrap(),
            master.order_var((1, 0), (2, 1)).unwrap(),
            master.order_var((2, 0), (0, 1)).unwrap(),
        ];
        let a = assignment_with(&master, &cycle);
        assert!(master.constraints.iter().any(|c| !c.is_satisfied(&a, 0) && c.sense == Sense::Le));
    }

    #[test]
    fn pruned_route_is_fixed_to_zero() {
        let problem = test_instances::prunable_branch().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let long = master.route_var(0, 0, 1).unwrap();
        let short = master.route_var(0, 0, 2).unwrap();
        assert!(master
            .constraints
            .contains(&LinearConstraint::new(vec![(long, 1)], Sense::Eq, 0)));
        assert!(!master.phase[long]);
        assert!(master.phase[short]);
    }

    #[test]
    fn ahead_and_describe() {
        let problem = test_instances::single_conflict().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let y = master.order_var((1, 0), (0, 0)).unwrap();
        let a = assignment_with(&master, &[y]);
        assert_eq!(master.ahead(&a, (1, 0), (0, 0)), Some(true));
        assert_eq!(master.ahead(&a, (0, 0), (1, 0)), Some(false));
        assert_eq!(master.ahead(&a, (0, 0), (0, 1)), None);
        assert_eq!(master.describe(y), "y_1_0_0_0");
    }

    #[test]
    fn extract_solution_partitions_variables() {
        let problem = test_instances::route_choice().problem;
        let master = MasterProblem::new(&problem, &DeadlockConfig::default()).unwrap();
        let z_b = master.route_var(0, 0, 2).unwrap();
        let y_ba = master.order_var((1, 0), (0, 1)).unwrap();
        let solution = master.extract_solution(&assignment_with(&master, &[z_b, y_ba]));
        assert_eq!(solution.active, vec![z_b, y_ba]);
        assert_eq!(solution.inactive.len(), 2);
    }
}
