use std::{collections::HashMap, path::Path};

use derive_more::Display;
use log::{debug, info};
use serde::Deserialize;

use crate::problem::{NamedProblem, ObjectiveTerm, Operation, Problem, ProblemError, ResourceUse, Train};

#[derive(Debug, Display)]
pub enum InstanceError {
    #[display(fmt = "could not read instance file: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "malformed instance: {}", _0)]
    Json(serde_json::Error),
    #[display(fmt = "unsupported objective type {:?}", _0)]
    UnknownObjectiveType(String),
    #[display(fmt = "invalid instance: {}", _0)]
    Problem(ProblemError),
}

impl std::error::Error for InstanceError {}

impl From<std::io::Error> for InstanceError {
    fn from(e: std::io::Error) -> Self {
        InstanceError::Io(e)
    }
}

impl From<serde_json::Error> for InstanceError {
    fn from(e: serde_json::Error) -> Self {
        InstanceError::Json(e)
    }
}

impl From<ProblemError> for InstanceError {
    fn from(e: ProblemError) -> Self {
        InstanceError::Problem(e)
    }
}

#[derive(Deserialize)]
struct RawInstance {
    trains: Vec<Vec<RawOperation>>,
    #[serde(default)]
    objective: Vec<RawObjectiveTerm>,
}

#[derive(Deserialize)]
struct RawOperation {
    #[serde(default)]
    start_lb: i64,
    start_ub: Option<i64>,
    min_duration: i64,
    #[serde(default)]
    successors: Vec<usize>,
    #[serde(default)]
    resources: Vec<RawResourceUse>,
}

#[derive(Deserialize)]
struct RawResourceUse {
    resource: String,
    #[serde(default)]
    release_time: i64,
}

#[derive(Deserialize)]
struct RawObjectiveTerm {
    #[serde(rename = "type")]
    kind: String,
    train: usize,
    operation: usize,
    #[serde(default)]
    threshold: i64,
    #[serde(default)]
    coeff: i64,
    #[serde(default)]
    increment: i64,
}

pub fn read_file(path: &Path) -> Result<NamedProblem, InstanceError> {
    let _p = hprof::enter("read instance");
    let contents = std::fs::read_to_string(path)?;
    let instance = parse(&contents)?;
    info!(
        "Read {}: {} trains, {} operations, {} resources, {} objective terms",
        path.display(),
        instance.problem.trains.len(),
        instance.problem.num_operations(),
        instance.resource_names.len(),
        instance.problem.objective.len()
    );
    Ok(instance)
}

/// Parses a DISPLIB-style JSON instance. Resource names are interned to ids
/// in order of first appearance.
pub fn parse(json: &str) -> Result<NamedProblem, InstanceError> {
    let raw: RawInstance = serde_json::from_str(json)?;

    let mut resource_ids: HashMap<String, usize> = HashMap::new();
    let mut resource_names = Vec::new();
    let trains = raw
        .trains
        .into_iter()
        .map(|operations| Train {
            operations: operations
                .into_iter()
                .map(|op| Operation {
                    start_lb: op.start_lb,
                    start_ub: op.start_ub,
                    min_duration: op.min_duration,
                    successors: op.successors,
                    resources: op
                        .resources
                        .into_iter()
                        .map(|r| {
                            let next_id = resource_names.len();
                            let resource = *resource_ids.entry(r.resource.clone()).or_insert_with(|| {
                                resource_names.push(r.resource);
                                next_id
                            });
                            ResourceUse {
                                resource,
                                release_time: r.release_time,
                            }
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect::<Vec<_>>();

    let objective = raw
        .objective
        .into_iter()
        .map(|term| {
            if term.kind != "op_delay" {
                return Err(InstanceError::UnknownObjectiveType(term.kind));
            }
            Ok(ObjectiveTerm {
                train: term.train,
                operation: term.operation,
                threshold: term.threshold,
                coeff: term.coeff,
                increment: term.increment,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let problem = Problem { trains, objective };
    problem.validate()?;
    debug!("Resources {:?}", resource_names);
    Ok(NamedProblem {
        problem,
        resource_names,
    })
}
