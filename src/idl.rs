//! Integer difference logic: conjunctions of `x - y <= k` constraints, each
//! guarded by a set of labels. Solving under a set of assumed labels enables
//! exactly the constraints whose labels are all assumed, and returns either
//! the least solution or a set of assumed labels whose constraints are
//! contradictory.

use std::{collections::HashSet, fmt::Debug, hash::Hash};

use log::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DVar(u32);

/// `to >= from + weight`
struct Edge<L> {
    from: usize,
    to: usize,
    weight: i64,
    labels: Vec<L>,
}

pub struct IdlSolver<L> {
    n_vars: usize,
    edges: Vec<Edge<L>>,
}

#[derive(Debug)]
pub struct IdlModel {
    values: Vec<Option<i64>>,
}

impl IdlModel {
    /// The least value of `v` relative to the zero variable, or `None` if
    /// nothing bounds `v` from below.
    pub fn get_int_value(&self, v: DVar) -> Option<i64> {
        self.values[v.0 as usize]
    }
}

impl<L: Copy + Ord + Hash + Debug> Default for IdlSolver<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Copy + Ord + Hash + Debug> IdlSolver<L> {
    pub fn new() -> Self {
        IdlSolver {
            n_vars: 1,
            edges: Vec::new(),
        }
    }

    pub fn zero(&self) -> DVar {
        DVar(0)
    }

    pub fn new_int(&mut self) -> DVar {
        self.n_vars += 1;
        DVar(self.n_vars as u32 - 1)
    }

    /// Adds `x - y <= k`, enabled when all `labels` are assumed.
    pub fn add_diff(&mut self, labels: &[L], x: DVar, y: DVar, k: i64) {
        let mut labels = labels.to_vec();
        labels.sort();
        labels.dedup();
        self.edges.push(Edge {
            from: x.0 as usize,
            to: y.0 as usize,
            weight: -k,
            labels,
        });
    }

    pub fn solve_with_assumptions(&mut self, assumptions: &[L]) -> Result<IdlModel, Vec<L>> {
        let assumed = assumptions.iter().copied().collect::<HashSet<_>>();
        let enabled = (0..self.edges.len())
            .filter(|e| self.edges[*e].labels.iter().all(|l| assumed.contains(l)))
            .collect::<Vec<_>>();

        match self.longest_paths(&enabled) {
            Ok(values) => Ok(IdlModel { values }),
            Err(cycle) => {
                let edges = cycle.as_deref().unwrap_or(&enabled);
                let mut core = edges
                    .iter()
                    .flat_map(|e| self.edges[*e].labels.iter().copied())
                    .collect::<Vec<_>>();
                core.sort();
                core.dedup();
                trace!("idl conflict over {} edges, core {:?}", edges.len(), core);
                Err(core)
            }
        }
    }

    /// Bellman-Ford from the zero variable maximizing path weights. A
    /// relaxation in the last round means a positive cycle, which is
    /// returned as a list of edges (or `None` if it could not be traced).
    fn longest_paths(&self, enabled: &[usize]) -> Result<Vec<Option<i64>>, Option<Vec<usize>>> {
        let n = self.n_vars;
        let mut dist: Vec<Option<i64>> = vec![None; n];
        let mut pred: Vec<Option<usize>> = vec![None; n];
        dist[0] = Some(0);

        for round in 0..n {
            let mut last_relaxed = None;
            for &e in enabled.iter() {
                let edge = &self.edges[e];
                if let Some(d) = dist[edge.from] {
                    let candidate = d.saturating_add(edge.weight);
                    if dist[edge.to].map(|current| candidate > current).unwrap_or(true) {
                        dist[edge.to] = Some(candidate);
                        pred[edge.to] = Some(e);
                        last_relaxed = Some(edge.to);
                    }
                }
            }
            match last_relaxed {
                None => return Ok(dist),
                Some(v) if round + 1 == n => return Err(self.trace_cycle(&pred, v)),
                Some(_) => {}
            }
        }
        Ok(dist)
    }

    fn trace_cycle(&self, pred: &[Option<usize>], from: usize) -> Option<Vec<usize>> {
        // Walking back n steps from a node relaxed in round n lands on the cycle.
        let mut v = from;
        for _ in 0..self.n_vars {
            v = self.edges[pred[v]?].from;
        }
        let start = v;
        let mut cycle = Vec::new();
        loop {
            let e = pred[v]?;
            cycle.push(e);
            v = self.edges[e].from;
            if v == start {
                return Some(cycle);
            }
            if cycle.len() > self.n_vars {
                return None;
            }
        }
    }

    /// Shrinks an infeasible set of labels until removing any single label
    /// makes the remaining constraints satisfiable.
    pub fn minimize_core(&mut self, core: &mut Vec<L>) {
        let mut necessary: Vec<L> = Vec::new();
        while let Some(candidate) = core.iter().copied().find(|l| !necessary.contains(l)) {
            let assumptions = core.iter().copied().filter(|l| *l != candidate).collect::<Vec<_>>();
            match self.solve_with_assumptions(&assumptions) {
                Ok(_) => necessary.push(candidate),
                Err(smaller) => *core = smaller,
            }
        }
        trace!("minimized core to {:?}", core);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_solution() {
        let mut s: IdlSolver<u32> = IdlSolver::new();
        let zero = s.zero();
        let x = s.new_int();
        let y = s.new_int();
        // x >= 3, y >= x + 2, y >= 1
        s.add_diff(&[], zero, x, -3);
        s.add_diff(&[1], x, y, -2);
        s.add_diff(&[], zero, y, -1);

        let model = s.solve_with_assumptions(&[1]).unwrap();
        assert_eq!(model.get_int_value(x), Some(3));
        assert_eq!(model.get_int_value(y), Some(5));

        let model = s.solve_with_assumptions(&[]).unwrap();
        assert_eq!(model.get_int_value(y), Some(1));
    }

    #[test]
    fn positive_cycle_gives_core() {
        let mut s: IdlSolver<u32> = IdlSolver::new();
        let zero = s.zero();
        let x = s.new_int();
        let y = s.new_int();
        s.add_diff(&[], zero, x, 0);
        // y >= x + 5, y <= x + 2
        s.add_diff(&[1], x, y, -5);
        s.add_diff(&[2], y, x, 2);
        s.add_diff(&[3], zero, y, -100);

        assert_eq!(s.solve_with_assumptions(&[1, 2, 3]).unwrap_err(), vec![1, 2]);
        assert!(s.solve_with_assumptions(&[1, 3]).is_ok());
    }

    #[test]
    fn bounds_through_zero() {
        let mut s: IdlSolver<u32> = IdlSolver::new();
        let zero = s.zero();
        let x = s.new_int();
        // x >= 5 and x <= 3
        s.add_diff(&[7], zero, x, -5);
        s.add_diff(&[8], x, zero, 3);
        assert_eq!(s.solve_with_assumptions(&[7, 8]).unwrap_err(), vec![7, 8]);

        // Unlabelled constraints are always enabled.
        let mut s: IdlSolver<u32> = IdlSolver::new();
        let zero = s.zero();
        let x = s.new_int();
        s.add_diff(&[], zero, x, -5);
        s.add_diff(&[], x, zero, 3);
        assert_eq!(s.solve_with_assumptions(&[]).unwrap_err(), Vec::<u32>::new());
    }

    #[test]
    fn multi_label_constraint_needs_all_labels() {
        let mut s: IdlSolver<u32> = IdlSolver::new();
        let zero = s.zero();
        let x = s.new_int();
        s.add_diff(&[], zero, x, -5);
        s.add_diff(&[1, 2], x, zero, 3);
        assert!(s.solve_with_assumptions(&[1]).is_ok());
        assert_eq!(s.solve_with_assumptions(&[1, 2]).unwrap_err(), vec![1, 2]);
    }

    #[test]
    fn minimized_core_is_irreducible() {
        let mut s: IdlSolver<u32> = IdlSolver::new();
        let zero = s.zero();
        let x = s.new_int();
        let y = s.new_int();
        let w = s.new_int();
        // Two independent contradictions: {1, 2} on x and y, {3, 4} on w.
        s.add_diff(&[1], zero, x, -10);
        s.add_diff(&[2], x, y, -1);
        s.add_diff(&[2], y, zero, 5);
        s.add_diff(&[3], zero, w, -4);
        s.add_diff(&[4], w, zero, 2);
        s.add_diff(&[5], zero, y, 0);

        let all = [1, 2, 3, 4, 5];
        let mut core = s.solve_with_assumptions(&all).unwrap_err();
        s.minimize_core(&mut core);
        assert!(core == vec![1, 2] || core == vec![3, 4], "core {:?}", core);
        assert!(s.solve_with_assumptions(&core).is_err());
        for l in core.iter() {
            let without = core.iter().copied().filter(|x| x != l).collect::<Vec<_>>();
            assert!(s.solve_with_assumptions(&without).is_ok());
        }
    }
}
