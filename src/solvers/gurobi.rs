use std::time::Instant;

use grb::{
    callback::{Callback, CbResult, Where},
    constr::IneqExpr,
    prelude::*,
};
use log::{debug, info};
use typed_index_collections::TiVec;

use crate::{
    master::{Assignment, LinearConstraint, MasterProblem, Sense, VarId},
    problem::OpRef,
    solvers::{CandidateReply, MasterEngine, SearchStatus, SolverError},
    subproblem::{SubproblemBackend, SubproblemStatus},
};

fn to_ineq(constraint: &LinearConstraint, vars: &TiVec<VarId, Var>, theta: Var) -> IneqExpr {
    let lhs = constraint
        .terms
        .iter()
        .map(|(v, a)| (*a as f64) * vars[*v])
        .sum::<Expr>()
        + (constraint.theta as f64) * theta;
    let rhs = constraint.rhs as f64;
    match constraint.sense {
        Sense::Le => c!(lhs <= rhs),
        Sense::Ge => c!(lhs >= rhs),
        Sense::Eq => c!(lhs == rhs),
    }
}

fn set_time_limit(model: &mut Model, deadline: Option<Instant>) -> Result<bool, SolverError> {
    if let Some(deadline) = deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        model.set_param(param::TimeLimit, remaining.as_secs_f64())?;
    }
    Ok(true)
}

/// Master problem as a Gurobi MIP. With `lazy` set, candidates are checked
/// in a MIPSOL callback and cuts are added as lazy constraints; otherwise
/// the MIP is re-solved after each round of cuts.
pub struct GurobiMaster<'e> {
    env: &'e grb::Env,
    lazy: bool,
}

impl<'e> GurobiMaster<'e> {
    pub fn new(env: &'e grb::Env, lazy: bool) -> Self {
        GurobiMaster { env, lazy }
    }
}

struct LazyCuts<'a> {
    vars: &'a TiVec<VarId, Var>,
    theta: Var,
    on_candidate: &'a mut dyn FnMut(&Assignment) -> Result<CandidateReply, SolverError>,
    error: Option<SolverError>,
    terminated: bool,
    candidates: usize,
}

impl<'a> Callback for LazyCuts<'a> {
    fn callback(&mut self, w: Where) -> CbResult {
        if let Where::MIPSol(ctx) = w {
            let values = ctx.get_solution(self.vars.iter())?;
            let assignment: Assignment = values.iter().map(|x| *x > 0.5).collect();
            self.candidates += 1;
            match (self.on_candidate)(&assignment) {
                Ok(reply) => {
                    for cut in reply.cuts.iter() {
                        ctx.add_lazy(to_ineq(cut, self.vars, self.theta))?;
                    }
                    if reply.terminate {
                        self.terminated = true;
                        ctx.terminate();
                    }
                }
                Err(e) => {
                    self.error = Some(e);
                    ctx.terminate();
                }
            }
        }
        Ok(())
    }
}

impl<'e> MasterEngine for GurobiMaster<'e> {
    fn search(
        &mut self,
        master: &MasterProblem,
        deadline: Option<Instant>,
        on_candidate: &mut dyn FnMut(&Assignment) -> Result<CandidateReply, SolverError>,
    ) -> Result<SearchStatus, SolverError> {
        let _p = hprof::enter("gurobi master");
        let mut model = Model::with_env("master", self.env)?;
        model.set_param(param::OutputFlag, 0)?;

        let vars = master
            .vars
            .iter()
            .map(|v| add_binvar!(model, name: &v.to_string()))
            .collect::<Result<TiVec<VarId, Var>, _>>()?;
        let theta = add_ctsvar!(model, name: "theta", bounds: 0.., obj: 1.0)?;
        for (idx, constraint) in master.constraints.iter().enumerate() {
            model.add_constr(&format!("master{}", idx), to_ineq(constraint, &vars, theta))?;
        }
        debug!(
            "Gurobi master with {} variables and {} constraints",
            vars.len(),
            master.constraints.len()
        );

        if self.lazy {
            model.set_param(param::LazyConstraints, 1)?;
            if !set_time_limit(&mut model, deadline)? {
                return Ok(SearchStatus::TimeLimit);
            }
            let mut callback = LazyCuts {
                vars: &vars,
                theta,
                on_candidate,
                error: None,
                terminated: false,
                candidates: 0,
            };
            model.optimize_with_callback(&mut callback)?;
            info!("Gurobi master checked {} candidates", callback.candidates);
            if let Some(e) = callback.error {
                return Err(e);
            }
            if callback.terminated {
                return Ok(SearchStatus::Terminated);
            }
            return match model.status()? {
                Status::Optimal | Status::Infeasible | Status::InfOrUnbd => Ok(SearchStatus::Exhausted),
                Status::TimeLimit => Ok(SearchStatus::TimeLimit),
                status => Err(SolverError::UnexpectedStatus(format!("{:?}", status))),
            };
        }

        let mut n_cuts = 0;
        loop {
            if !set_time_limit(&mut model, deadline)? {
                return Ok(SearchStatus::TimeLimit);
            }
            model.optimize()?;
            match model.status()? {
                Status::Optimal => {}
                Status::Infeasible | Status::InfOrUnbd => return Ok(SearchStatus::Exhausted),
                Status::TimeLimit => return Ok(SearchStatus::TimeLimit),
                status => return Err(SolverError::UnexpectedStatus(format!("{:?}", status))),
            }

            let mut assignment: Assignment = TiVec::with_capacity(vars.len());
            for var in vars.iter() {
                assignment.push(model.get_obj_attr(attr::X, var)? > 0.5);
            }
            let theta_value = model.get_obj_attr(attr::X, &theta)?.round() as i64;

            let reply = on_candidate(&assignment)?;
            let violated = reply.cuts.iter().any(|c| !c.is_satisfied(&assignment, theta_value));
            for cut in reply.cuts.iter() {
                model.add_constr(&format!("cut{}", n_cuts), to_ineq(cut, &vars, theta))?;
                n_cuts += 1;
            }
            if reply.terminate {
                return Ok(SearchStatus::Terminated);
            }
            if !violated {
                return Ok(SearchStatus::Exhausted);
            }
        }
    }
}

/// Subproblem as a Gurobi LP minimizing the sum of start times. Bounds are
/// explicit constraints so that they can appear in an IIS.
pub struct GurobiSubproblem {
    model: Model,
    labelled: Vec<(Constr, Vec<VarId>)>,
}

impl GurobiSubproblem {
    pub fn new(env: &grb::Env) -> Result<Self, SolverError> {
        let mut model = Model::with_env("subproblem", env)?;
        model.set_param(param::OutputFlag, 0)?;
        model.set_param(param::DualReductions, 0)?;
        Ok(GurobiSubproblem {
            model,
            labelled: Vec::new(),
        })
    }

    fn add_labelled(&mut self, name: &str, constr: IneqExpr, labels: &[VarId]) -> Result<(), SolverError> {
        let constr = self.model.add_constr(name, constr)?;
        self.labelled.push((constr, labels.to_vec()));
        Ok(())
    }
}

impl SubproblemBackend for GurobiSubproblem {
    type Time = Var;

    fn new_time(&mut self, (train, op): OpRef, lb: i64, ub: Option<i64>, labels: &[VarId]) -> Result<Var, SolverError> {
        let x = add_ctsvar!(self.model, name: &format!("x_{}_{}", train, op), bounds: .., obj: 1.0)?;
        let lb = lb as f64;
        self.add_labelled(&format!("lb_{}_{}", train, op), c!(x >= lb), labels)?;
        if let Some(ub) = ub {
            let ub = ub as f64;
            self.add_labelled(&format!("ub_{}_{}", train, op), c!(x <= ub), labels)?;
        }
        Ok(x)
    }

    fn post_precedence(&mut self, before: Var, after: Var, min_gap: i64, labels: &[VarId]) -> Result<(), SolverError> {
        let gap = min_gap as f64;
        let name = format!("path{}", self.labelled.len());
        self.add_labelled(&name, c!(after - before >= gap), labels)
    }

    fn post_resource_order(
        &mut self,
        earlier_exit: Var,
        later: Var,
        release: i64,
        labels: &[VarId],
    ) -> Result<(), SolverError> {
        let release = release as f64;
        let name = format!("res{}", self.labelled.len());
        self.add_labelled(&name, c!(later - earlier_exit >= release), labels)
    }

    fn solve(&mut self) -> Result<SubproblemStatus, SolverError> {
        let _p = hprof::enter("gurobi subproblem");
        self.model.optimize()?;
        match self.model.status()? {
            Status::Optimal => Ok(SubproblemStatus::Feasible),
            Status::Infeasible => Ok(SubproblemStatus::Infeasible),
            status => Err(SolverError::UnexpectedStatus(format!("{:?}", status))),
        }
    }

    fn start_time(&self, time: Var) -> Result<i64, SolverError> {
        Ok(self.model.get_obj_attr(attr::X, &time)?.round() as i64)
    }

    fn conflict(&mut self) -> Result<Vec<VarId>, SolverError> {
        let _p = hprof::enter("iis");
        self.model.compute_iis()?;
        let mut conflict = Vec::new();
        for (constr, labels) in self.labelled.iter() {
            if self.model.get_obj_attr(attr::IISConstr, constr)? > 0 {
                conflict.extend(labels.iter().copied());
            }
        }
        conflict.sort();
        conflict.dedup();
        Ok(conflict)
    }
}
