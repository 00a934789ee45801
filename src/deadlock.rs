use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::problem::{OrderKey, Problem};

/// Which deadlock-avoidance families the master problem includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlockConfig {
    pub swaps: bool,
    pub cycles: bool,
    pub path_pruning: bool,
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        DeadlockConfig {
            swaps: true,
            cycles: true,
            path_pruning: true,
        }
    }
}

/// Pairs of orders that must agree because the two trains pass two shared
/// resources in opposite directions. For each train, the last operation
/// using a resource represents that resource.
pub fn swap_pairs(problem: &Problem) -> Vec<(OrderKey, OrderKey)> {
    let _p = hprof::enter("swap pairs");
    let last_use = problem
        .trains
        .iter()
        .map(|train| {
            let mut map = BTreeMap::new();
            for (op_idx, op) in train.operations.iter().enumerate() {
                for r in op.resources.iter() {
                    map.insert(r.resource, op_idx);
                }
            }
            map
        })
        .collect::<Vec<_>>();

    let mut pairs = Vec::new();
    for t1 in 0..problem.trains.len() {
        for t2 in (t1 + 1)..problem.trains.len() {
            let shared = last_use[t1]
                .keys()
                .filter(|r| last_use[t2].contains_key(r))
                .copied()
                .collect::<Vec<_>>();
            for (i, ra) in shared.iter().enumerate() {
                for rb in shared[i + 1..].iter() {
                    let (o1a, o1b) = (last_use[t1][ra], last_use[t1][rb]);
                    let (o2a, o2b) = (last_use[t2][ra], last_use[t2][rb]);
                    let opposite = (o1a < o1b && o2a > o2b) || (o1a > o1b && o2a < o2b);
                    if opposite {
                        pairs.push((((t1, o1a), (t2, o2a)), ((t1, o1b), (t2, o2b))));
                    }
                }
            }
        }
    }
    debug!("Found {} swap pairs", pairs.len());
    pairs
}

/// Orders that would close a cyclic wait among three trains. Each ordered
/// pair of trains is represented by its first conflict, and every triple
/// yields one cycle in each direction.
pub fn three_cycles(problem: &Problem) -> Vec<[OrderKey; 3]> {
    let _p = hprof::enter("three cycles");
    let mut representative = BTreeMap::new();
    for ((t1, o1), (t2, o2)) in problem.conflicts() {
        representative.entry((t1, t2)).or_insert((o1, o2));
        representative.entry((t2, t1)).or_insert((o2, o1));
    }
    let trains = representative.keys().map(|(t, _)| *t).collect::<BTreeSet<_>>();
    let trains = trains.into_iter().collect::<Vec<_>>();

    let order = |a: usize, b: usize| -> Option<OrderKey> {
        representative.get(&(a, b)).map(|(oa, ob)| ((a, *oa), (b, *ob)))
    };

    let mut cycles = Vec::new();
    for (i, &t1) in trains.iter().enumerate() {
        for (j, &t2) in trains.iter().enumerate().skip(i + 1) {
            for &t3 in trains.iter().skip(j + 1) {
                if let (Some(a), Some(b), Some(c)) = (order(t1, t2), order(t2, t3), order(t3, t1)) {
                    cycles.push([a, b, c]);
                }
                if let (Some(a), Some(b), Some(c)) = (order(t1, t3), order(t3, t2), order(t2, t1)) {
                    cycles.push([a, b, c]);
                }
            }
        }
    }
    debug!("Found {} three-train cycles", cycles.len());
    cycles
}

/// Route choices `(train, op, successor)` after which the train cannot reach
/// its last operation before that operation's upper bound.
pub fn prune_unreachable_routes(problem: &Problem) -> Vec<(usize, usize, usize)> {
    let _p = hprof::enter("prune routes");
    let mut pruned = Vec::new();
    for (train_idx, train) in problem.trains.iter().enumerate() {
        let deadline = match train.operations[train.sink()].start_ub {
            Some(ub) => ub,
            None => continue,
        };
        let remaining = train.shortest_remaining_duration();
        for (op_idx, op) in train.operations.iter().enumerate() {
            if op.successors.len() < 2 {
                continue;
            }
            for &s in op.successors.iter() {
                let earliest = op
                    .start_lb
                    .saturating_add(op.min_duration)
                    .saturating_add(remaining[s]);
                if earliest > deadline {
                    pruned.push((train_idx, op_idx, s));
                }
            }
        }
    }
    debug!("Pruned {} route choices", pruned.len());
    pruned
}
