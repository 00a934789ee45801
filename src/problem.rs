use std::collections::{BTreeMap, BTreeSet, HashMap};

use derive_more::Display;
use log::{debug, warn};

use crate::solution::Event;

/// `(train, operation)` index pair.
pub type OpRef = (usize, usize);

/// Canonically ordered pair of operations of different trains that use a common resource.
pub type Conflict = (OpRef, OpRef);

/// Order between two conflicting operations: the first one leaves the shared
/// resources (and waits out the release time) before the second one starts.
pub type OrderKey = (OpRef, OpRef);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUse {
    pub resource: usize,
    pub release_time: i64,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub start_lb: i64,
    pub start_ub: Option<i64>,
    pub min_duration: i64,
    pub successors: Vec<usize>,
    pub resources: Vec<ResourceUse>,
}

/// A train's operations form a DAG rooted at operation 0 with the last
/// operation as the unique sink.
#[derive(Debug, Clone)]
pub struct Train {
    pub operations: Vec<Operation>,
}

/// Piecewise-linear delay cost `coeff * max(0, t - threshold) + increment * [t > threshold]`
/// charged on the start time `t` of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectiveTerm {
    pub train: usize,
    pub operation: usize,
    pub threshold: i64,
    pub coeff: i64,
    pub increment: i64,
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub trains: Vec<Train>,
    pub objective: Vec<ObjectiveTerm>,
}

/// A problem together with the instance's resource names, indexed by resource id.
#[derive(Debug, Clone)]
pub struct NamedProblem {
    pub problem: Problem,
    pub resource_names: Vec<String>,
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ProblemError {
    #[display(fmt = "train {} has no operations", _0)]
    EmptyTrain(usize),
    #[display(fmt = "operation t{}o{} lists successor {} outside its train", train, op, successor)]
    DanglingSuccessor { train: usize, op: usize, successor: usize },
    #[display(fmt = "operation t{}o{} has no successors but is not the last operation", train, op)]
    MissingSuccessors { train: usize, op: usize },
    #[display(fmt = "the last operation of train {} has successors", _0)]
    SinkHasSuccessors(usize),
    #[display(fmt = "the operation graph of train {} has a cycle", _0)]
    Cyclic(usize),
    #[display(fmt = "operation t{}o{} has a negative duration or release time", train, op)]
    NegativeTime { train: usize, op: usize },
    #[display(fmt = "objective term refers to unknown operation t{}o{}", train, op)]
    UnknownOperation { train: usize, op: usize },
    #[display(fmt = "objective term for t{}o{} has a negative coefficient or increment", train, op)]
    NegativeCost { train: usize, op: usize },
}

impl std::error::Error for ProblemError {}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[display(fmt = "train {} has no event for its first operation", _0)]
    MissingStart(usize),
    #[display(fmt = "train {} does not follow a single route to its last operation", _0)]
    BrokenRoute(usize),
    #[display(fmt = "event for t{}o{} is outside the train's route", train, op)]
    StrayEvent { train: usize, op: usize },
    #[display(fmt = "event for t{}o{} is outside its time window", train, op)]
    TimeWindow { train: usize, op: usize },
    #[display(fmt = "operation t{}o{} is shorter than its minimum duration", train, op)]
    Duration { train: usize, op: usize },
    #[display(fmt = "resource {} is used by {:?} and {:?} at the same time", resource, a, b)]
    ResourceOverlap { resource: usize, a: OpRef, b: OpRef },
}

impl std::error::Error for VerificationError {}

impl ObjectiveTerm {
    pub fn cost(&self, t: i64) -> i64 {
        if t > self.threshold {
            self.coeff * (t - self.threshold) + self.increment
        } else {
            0
        }
    }
}

impl Train {
    pub fn sink(&self) -> usize {
        self.operations.len() - 1
    }

    /// Kahn's algorithm over the successor lists. `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let n = self.operations.len();
        let mut in_degree = vec![0usize; n];
        for op in self.operations.iter() {
            for &s in op.successors.iter() {
                in_degree[s] += 1;
            }
        }

        let mut stack = (0..n).filter(|&i| in_degree[i] == 0).collect::<Vec<_>>();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = stack.pop() {
            order.push(i);
            for &s in self.operations[i].successors.iter() {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    stack.push(s);
                }
            }
        }

        (order.len() == n).then(|| order)
    }

    /// For every operation, the smallest total minimum duration needed to go
    /// from its start to the start of the sink.
    pub fn shortest_remaining_duration(&self) -> Vec<i64> {
        let mut dist = vec![i64::MAX; self.operations.len()];
        let order = match self.topological_order() {
            Some(order) => order,
            None => {
                warn!("shortest_remaining_duration on a cyclic train");
                return dist;
            }
        };

        for &op_idx in order.iter().rev() {
            let op = &self.operations[op_idx];
            if op.successors.is_empty() {
                if op_idx == self.sink() {
                    dist[op_idx] = 0;
                }
                continue;
            }
            dist[op_idx] = op
                .successors
                .iter()
                .map(|&s| dist[s].saturating_add(op.min_duration))
                .min()
                .unwrap_or(i64::MAX);
        }
        dist
    }
}

impl Operation {
    pub fn max_release_time(&self) -> i64 {
        self.resources.iter().map(|r| r.release_time).max().unwrap_or(0)
    }
}

impl Problem {
    pub fn operation(&self, (train, op): OpRef) -> &Operation {
        &self.trains[train].operations[op]
    }

    pub fn num_operations(&self) -> usize {
        self.trains.iter().map(|t| t.operations.len()).sum()
    }

    pub fn validate(&self) -> Result<(), ProblemError> {
        for (train_idx, train) in self.trains.iter().enumerate() {
            if train.operations.is_empty() {
                return Err(ProblemError::EmptyTrain(train_idx));
            }
            let n = train.operations.len();
            for (op_idx, op) in train.operations.iter().enumerate() {
                if let Some(&successor) = op.successors.iter().find(|&&s| s >= n) {
                    return Err(ProblemError::DanglingSuccessor {
                        train: train_idx,
                        op: op_idx,
                        successor,
                    });
                }
                if op.min_duration < 0 || op.resources.iter().any(|r| r.release_time < 0) {
                    return Err(ProblemError::NegativeTime {
                        train: train_idx,
                        op: op_idx,
                    });
                }
                if op_idx == n - 1 {
                    if !op.successors.is_empty() {
                        return Err(ProblemError::SinkHasSuccessors(train_idx));
                    }
                } else if op.successors.is_empty() {
                    return Err(ProblemError::MissingSuccessors {
                        train: train_idx,
                        op: op_idx,
                    });
                }
            }
            // Acyclic and every non-sink operation has a successor, so every path ends in the sink.
            if train.topological_order().is_none() {
                return Err(ProblemError::Cyclic(train_idx));
            }
        }

        for term in self.objective.iter() {
            let exists = self
                .trains
                .get(term.train)
                .map(|t| term.operation < t.operations.len())
                .unwrap_or(false);
            if !exists {
                return Err(ProblemError::UnknownOperation {
                    train: term.train,
                    op: term.operation,
                });
            }
            if term.coeff < 0 || term.increment < 0 {
                return Err(ProblemError::NegativeCost {
                    train: term.train,
                    op: term.operation,
                });
            }
        }
        Ok(())
    }

    /// Operations using each resource, in `(train, op)` order.
    pub fn resource_usage(&self) -> BTreeMap<usize, Vec<OpRef>> {
        let mut usage: BTreeMap<usize, BTreeSet<OpRef>> = BTreeMap::new();
        for (train_idx, train) in self.trains.iter().enumerate() {
            for (op_idx, op) in train.operations.iter().enumerate() {
                for r in op.resources.iter() {
                    usage.entry(r.resource).or_default().insert((train_idx, op_idx));
                }
            }
        }
        usage
            .into_iter()
            .map(|(r, ops)| (r, ops.into_iter().collect()))
            .collect()
    }

    /// All pairs of operations of different trains sharing at least one
    /// resource, each pair once with the smaller `(train, op)` first.
    pub fn conflicts(&self) -> Vec<Conflict> {
        let _p = hprof::enter("conflicts");
        let mut conflicts = BTreeSet::new();
        for (_resource, ops) in self.resource_usage() {
            for (i, a) in ops.iter().enumerate() {
                for b in ops[i + 1..].iter() {
                    if a.0 != b.0 {
                        conflicts.insert((*a.min(b), *a.max(b)));
                    }
                }
            }
        }
        debug!("Found {} conflicting operation pairs", conflicts.len());
        conflicts.into_iter().collect()
    }

    /// Largest release time of `earlier` over the resources it shares with `later`.
    pub fn shared_release(&self, earlier: OpRef, later: OpRef) -> Option<i64> {
        let later_op = self.operation(later);
        self.operation(earlier)
            .resources
            .iter()
            .filter(|r| later_op.resources.iter().any(|l| l.resource == r.resource))
            .map(|r| r.release_time)
            .max()
    }

    pub fn objective_value(&self, start_times: &HashMap<OpRef, i64>) -> i64 {
        self.objective
            .iter()
            .filter_map(|term| {
                start_times
                    .get(&(term.train, term.operation))
                    .map(|t| term.cost(*t))
            })
            .sum()
    }

    /// Checks that the events describe one complete route per train that
    /// respects time windows, minimum durations and resource exclusivity, and
    /// returns its cost.
    pub fn verify_solution(&self, events: &[Event]) -> Result<i64, VerificationError> {
        let _p = hprof::enter("verify_solution");
        let mut times: Vec<HashMap<usize, i64>> = vec![HashMap::new(); self.trains.len()];
        for event in events.iter() {
            let known = event.train < self.trains.len()
                && event.operation < self.trains[event.train].operations.len();
            if !known || times[event.train].insert(event.operation, event.time).is_some() {
                return Err(VerificationError::StrayEvent {
                    train: event.train,
                    op: event.operation,
                });
            }
        }

        // Route and timing of each train.
        let mut routes: Vec<Vec<usize>> = Vec::with_capacity(self.trains.len());
        for (train_idx, train) in self.trains.iter().enumerate() {
            let train_times = &times[train_idx];
            if !train_times.contains_key(&0) {
                return Err(VerificationError::MissingStart(train_idx));
            }
            let mut route = vec![0];
            let mut op_idx = 0;
            while op_idx != train.sink() {
                let op = &train.operations[op_idx];
                let mut next = op.successors.iter().filter(|s| train_times.contains_key(s));
                let succ = match (next.next(), next.next()) {
                    (Some(s), None) => *s,
                    _ => return Err(VerificationError::BrokenRoute(train_idx)),
                };
                if train_times[&succ] - train_times[&op_idx] < op.min_duration {
                    return Err(VerificationError::Duration {
                        train: train_idx,
                        op: op_idx,
                    });
                }
                route.push(succ);
                op_idx = succ;
            }
            if route.len() != train_times.len() {
                let stray = train_times.keys().find(|o| !route.contains(o)).copied();
                return Err(VerificationError::StrayEvent {
                    train: train_idx,
                    op: stray.unwrap_or(0),
                });
            }
            for &op_idx in route.iter() {
                let op = &train.operations[op_idx];
                let t = train_times[&op_idx];
                if t < op.start_lb || op.start_ub.map(|ub| t > ub).unwrap_or(false) {
                    return Err(VerificationError::TimeWindow {
                        train: train_idx,
                        op: op_idx,
                    });
                }
            }
            routes.push(route);
        }

        // Occupation intervals [start, end of successor + release) on each resource.
        let mut occupations: BTreeMap<usize, Vec<(OpRef, i64, i64)>> = BTreeMap::new();
        for (train_idx, route) in routes.iter().enumerate() {
            for pair in route.windows(2) {
                let op = &self.trains[train_idx].operations[pair[0]];
                let start = times[train_idx][&pair[0]];
                let end = times[train_idx][&pair[1]];
                for r in op.resources.iter() {
                    occupations
                        .entry(r.resource)
                        .or_default()
                        .push(((train_idx, pair[0]), start, end + r.release_time));
                }
            }
        }
        for (resource, occ) in occupations.iter() {
            for (i, (a, a_start, a_end)) in occ.iter().enumerate() {
                for (b, b_start, b_end) in occ[i + 1..].iter() {
                    if a.0 != b.0 && !(b_start >= a_end || a_start >= b_end) {
                        return Err(VerificationError::ResourceOverlap {
                            resource: *resource,
                            a: *a,
                            b: *b,
                        });
                    }
                }
            }
        }

        let start_times = events
            .iter()
            .map(|e| ((e.train, e.operation), e.time))
            .collect::<HashMap<_, _>>();
        Ok(self.objective_value(&start_times))
    }
}
