use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::{
    cuts::{self, Cut},
    deadlock::DeadlockConfig,
    master::{Assignment, MasterProblem},
    problem::Problem,
    solution::Event,
    solvers::{bnb::BranchAndCut, difflogic::DiffLogicSubproblem, CandidateReply, MasterEngine, SearchStatus, SolverError},
    subproblem::{solve_subproblem, SubproblemOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubproblemKind {
    DiffLogic,
    Gurobi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKind {
    BranchAndCut,
    Gurobi { lazy: bool },
}

#[derive(Debug, Clone)]
pub struct LbbdConfig {
    pub time_limit: Option<Duration>,
    pub iteration_limit: Option<usize>,
    /// Overrides the derived big-M. Must not be smaller than it.
    pub big_m: Option<i64>,
    pub master: MasterKind,
    pub subproblem: SubproblemKind,
    pub deadlock: DeadlockConfig,
    pub minimize_cores: bool,
    /// Keep every generated cut in the result.
    pub record_cuts: bool,
}

impl Default for LbbdConfig {
    fn default() -> Self {
        LbbdConfig {
            time_limit: None,
            iteration_limit: None,
            big_m: None,
            master: MasterKind::BranchAndCut,
            subproblem: SubproblemKind::DiffLogic,
            deadlock: DeadlockConfig::default(),
            minimize_cores: true,
            record_cuts: false,
        }
    }
}

impl LbbdConfig {
    fn uses_gurobi(&self) -> bool {
        self.subproblem == SubproblemKind::Gurobi || matches!(self.master, MasterKind::Gurobi { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbbdStatus {
    Optimal,
    Infeasible,
    TimeLimit,
    IterationLimit,
}

#[derive(Debug, Clone)]
pub struct Incumbent {
    pub objective: i64,
    pub events: Vec<Event>,
    pub iteration: usize,
    pub found_after: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct LbbdStats {
    pub iterations: usize,
    pub feasibility_cuts: usize,
    pub degraded_cuts: usize,
    pub optimality_cuts: usize,
    /// `(iteration, objective)` for every incumbent improvement.
    pub incumbent_history: Vec<(usize, i64)>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct LbbdResult {
    pub status: LbbdStatus,
    pub incumbent: Option<Incumbent>,
    pub big_m: i64,
    pub stats: LbbdStats,
    pub cuts: Vec<Cut>,
}

/// Runs logic-based Benders decomposition: the master proposes routes and
/// orders, the subproblem schedules them, and every candidate is answered
/// with a feasibility or optimality cut.
pub fn solve(
    problem: &Problem,
    config: &LbbdConfig,
    mut output_stats: impl FnMut(String, serde_json::Value),
) -> Result<LbbdResult, SolverError> {
    let _p = hprof::enter("lbbd");
    let start_time = Instant::now();
    let deadline = config.time_limit.map(|limit| start_time + limit);

    if config.uses_gurobi() && !cfg!(feature = "gurobi") {
        return Err(SolverError::BackendUnavailable("gurobi"));
    }

    let master = MasterProblem::new(problem, &config.deadlock)?;
    let big_m = cuts::choose_big_m(problem, config.big_m)?;
    info!(
        "Master problem: {} variables, {} constraints, {} conflicts, big-M {}",
        master.vars.len(),
        master.constraints.len(),
        master.conflicts.len(),
        big_m
    );
    output_stats("master_vars".to_string(), master.vars.len().into());
    output_stats("master_constraints".to_string(), master.constraints.len().into());
    output_stats("conflicts".to_string(), master.conflicts.len().into());
    output_stats("big_m".to_string(), big_m.into());

    #[cfg(feature = "gurobi")]
    let env = if config.uses_gurobi() {
        Some(grb::Env::new("")?)
    } else {
        None
    };

    let mut incumbent: Option<Incumbent> = None;
    let mut stats = LbbdStats::default();
    let mut cut_log = Vec::new();

    let search_status = {
        let mut on_candidate = |assignment: &Assignment| -> Result<CandidateReply, SolverError> {
            stats.iterations += 1;
            let outcome = match config.subproblem {
                SubproblemKind::DiffLogic => {
                    let mut backend = DiffLogicSubproblem::new(config.minimize_cores);
                    solve_subproblem(problem, &master, assignment, &mut backend)?
                }
                #[cfg(feature = "gurobi")]
                SubproblemKind::Gurobi => {
                    let env = env.as_ref().ok_or(SolverError::BackendUnavailable("gurobi"))?;
                    let mut backend = crate::solvers::gurobi::GurobiSubproblem::new(env)?;
                    solve_subproblem(problem, &master, assignment, &mut backend)?
                }
                #[cfg(not(feature = "gurobi"))]
                SubproblemKind::Gurobi => return Err(SolverError::BackendUnavailable("gurobi")),
            };

            let cut = match outcome {
                SubproblemOutcome::Feasible { objective, events } => {
                    stats.optimality_cuts += 1;
                    let improved = incumbent.as_ref().map(|i| objective < i.objective).unwrap_or(true);
                    if improved {
                        info!(
                            "Iteration {}: new incumbent with cost {} after {:.2}s",
                            stats.iterations,
                            objective,
                            start_time.elapsed().as_secs_f64()
                        );
                        stats.incumbent_history.push((stats.iterations, objective));
                        incumbent = Some(Incumbent {
                            objective,
                            events: events.clone(),
                            iteration: stats.iterations,
                            found_after: start_time.elapsed(),
                        });
                    } else {
                        debug!("Iteration {}: feasible schedule with cost {}", stats.iterations, objective);
                    }
                    Cut::Optimality {
                        objective,
                        events,
                        solution: master.extract_solution(assignment),
                    }
                }
                SubproblemOutcome::Infeasible { conflict, degraded } => {
                    stats.feasibility_cuts += 1;
                    if degraded {
                        stats.degraded_cuts += 1;
                    }
                    debug!(
                        "Iteration {}: infeasible, conflict {:?}",
                        stats.iterations,
                        conflict.iter().map(|v| master.describe(*v)).collect::<Vec<_>>()
                    );
                    Cut::Feasibility {
                        vars: conflict,
                        degraded,
                    }
                }
            };

            let constraint = cut.materialize(big_m)?;
            if config.record_cuts {
                cut_log.push(cut);
            }
            let terminate = config
                .iteration_limit
                .map(|limit| stats.iterations >= limit)
                .unwrap_or(false);
            Ok(CandidateReply {
                cuts: vec![constraint],
                terminate,
            })
        };

        match config.master {
            MasterKind::BranchAndCut => BranchAndCut::new().search(&master, deadline, &mut on_candidate)?,
            #[cfg(feature = "gurobi")]
            MasterKind::Gurobi { lazy } => {
                let env = env.as_ref().ok_or(SolverError::BackendUnavailable("gurobi"))?;
                crate::solvers::gurobi::GurobiMaster::new(env, lazy).search(&master, deadline, &mut on_candidate)?
            }
            #[cfg(not(feature = "gurobi"))]
            MasterKind::Gurobi { .. } => return Err(SolverError::BackendUnavailable("gurobi")),
        }
    };

    let status = match search_status {
        SearchStatus::Exhausted if incumbent.is_some() => LbbdStatus::Optimal,
        SearchStatus::Exhausted => LbbdStatus::Infeasible,
        SearchStatus::TimeLimit => LbbdStatus::TimeLimit,
        SearchStatus::Terminated => LbbdStatus::IterationLimit,
    };
    stats.elapsed = start_time.elapsed();

    match (&status, &incumbent) {
        (LbbdStatus::Infeasible, _) => warn!("No feasible schedule exists"),
        (_, Some(i)) => info!("Finished with status {:?} and cost {}", status, i.objective),
        (_, None) => warn!("Finished with status {:?} and no schedule", status),
    }
    output_stats("status".to_string(), format!("{:?}", status).into());
    output_stats("iterations".to_string(), stats.iterations.into());
    output_stats("feasibility_cuts".to_string(), stats.feasibility_cuts.into());
    output_stats("degraded_cuts".to_string(), stats.degraded_cuts.into());
    output_stats("optimality_cuts".to_string(), stats.optimality_cuts.into());
    output_stats("solve_time".to_string(), stats.elapsed.as_secs_f64().into());
    if let Some(i) = incumbent.as_ref() {
        output_stats("objective".to_string(), i.objective.into());
    }

    Ok(LbbdResult {
        status,
        incumbent,
        big_m,
        stats,
        cuts: cut_log,
    })
}
