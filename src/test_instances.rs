//! Small instances shared by the unit tests.

use serde_json::json;

use crate::{parser, problem::NamedProblem};

fn instance(value: serde_json::Value) -> NamedProblem {
    parser::parse(&value.to_string()).unwrap()
}

/// Two trains competing for resource `A`. Train 1 must enter `A` by time 3,
/// so only train 1 going first is feasible. Optimal cost is 16.
pub fn single_conflict() -> NamedProblem {
    instance(json!({
        "trains": [
            [
                {"start_lb": 0, "min_duration": 5, "successors": [1], "resources": [{"resource": "A"}]},
                {"min_duration": 3, "successors": [2], "resources": [{"resource": "B"}]},
                {"min_duration": 0}
            ],
            [
                {"start_lb": 2, "start_ub": 3, "min_duration": 4, "successors": [1], "resources": [{"resource": "A"}]},
                {"min_duration": 0}
            ]
        ],
        "objective": [
            {"type": "op_delay", "train": 0, "operation": 2, "threshold": 8, "coeff": 1, "increment": 10},
            {"type": "op_delay", "train": 1, "operation": 1, "threshold": 6, "coeff": 1}
        ]
    }))
}

/// Train 0 chooses between a short route over `A`, which train 1 also needs,
/// and a longer route over `B`. Optimal cost is 7, taking `B`.
pub fn route_choice() -> NamedProblem {
    instance(json!({
        "trains": [
            [
                {"min_duration": 1, "successors": [1, 2]},
                {"min_duration": 4, "successors": [3], "resources": [{"resource": "A"}]},
                {"min_duration": 6, "successors": [3], "resources": [{"resource": "B"}]},
                {"min_duration": 0}
            ],
            [
                {"min_duration": 10, "successors": [1], "resources": [{"resource": "A"}]},
                {"min_duration": 0}
            ]
        ],
        "objective": [
            {"type": "op_delay", "train": 0, "operation": 3, "threshold": 0, "coeff": 1},
            {"type": "op_delay", "train": 1, "operation": 1, "threshold": 10, "coeff": 2}
        ]
    }))
}

/// Two trains passing resources `A` and `B` in opposite order.
pub fn opposite_directions() -> NamedProblem {
    instance(json!({
        "trains": [
            [
                {"min_duration": 3, "successors": [1], "resources": [{"resource": "A"}]},
                {"min_duration": 3, "successors": [2], "resources": [{"resource": "B"}]},
                {"min_duration": 0}
            ],
            [
                {"min_duration": 3, "successors": [1], "resources": [{"resource": "B"}]},
                {"min_duration": 3, "successors": [2], "resources": [{"resource": "A"}]},
                {"min_duration": 0}
            ]
        ]
    }))
}

/// Like `opposite_directions`, but both trains pass `A` before `B`.
pub fn same_direction() -> NamedProblem {
    instance(json!({
        "trains": [
            [
                {"min_duration": 3, "successors": [1], "resources": [{"resource": "A"}]},
                {"min_duration": 3, "successors": [2], "resources": [{"resource": "B"}]},
                {"min_duration": 0}
            ],
            [
                {"min_duration": 3, "successors": [1], "resources": [{"resource": "A"}]},
                {"min_duration": 3, "successors": [2], "resources": [{"resource": "B"}]},
                {"min_duration": 0}
            ]
        ]
    }))
}

/// Three trains where each pair shares exactly one resource:
/// `X` for trains 0 and 1, `Y` for trains 1 and 2, `Z` for trains 2 and 0.
pub fn triple_cycle() -> NamedProblem {
    instance(json!({
        "trains": [
            [
                {"min_duration": 2, "successors": [1], "resources": [{"resource": "X"}]},
                {"min_duration": 2, "successors": [2], "resources": [{"resource": "Z"}]},
                {"min_duration": 0}
            ],
            [
                {"min_duration": 2, "successors": [1], "resources": [{"resource": "Y"}]},
                {"min_duration": 2, "successors": [2], "resources": [{"resource": "X"}]},
                {"min_duration": 0}
            ],
            [
                {"min_duration": 2, "successors": [1], "resources": [{"resource": "Z"}]},
                {"min_duration": 2, "successors": [2], "resources": [{"resource": "Y"}]},
                {"min_duration": 0}
            ]
        ]
    }))
}

/// One train whose branch over operation 1 cannot reach the sink before its deadline.
pub fn prunable_branch() -> NamedProblem {
    instance(json!({
        "trains": [
            [
                {"min_duration": 1, "successors": [1, 2]},
                {"min_duration": 100, "successors": [3]},
                {"min_duration": 5, "successors": [3]},
                {"min_duration": 0, "start_ub": 50}
            ]
        ]
    }))
}
