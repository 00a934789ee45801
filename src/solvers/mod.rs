use std::time::Instant;

use derive_more::Display;

use crate::{
    master::{Assignment, LinearConstraint, MasterProblem},
    problem::ProblemError,
};

pub mod bnb;
pub mod difflogic;
#[cfg(feature = "gurobi")]
pub mod gurobi;

#[derive(Debug, Display)]
pub enum SolverError {
    #[display(fmt = "{}", _0)]
    Problem(ProblemError),
    #[display(fmt = "invalid master assignment: {}", _0)]
    InvalidAssignment(String),
    #[display(fmt = "unexpected solver status: {}", _0)]
    UnexpectedStatus(String),
    #[display(fmt = "big-M {} is smaller than the derived bound {}", configured, required)]
    BigMTooSmall { configured: i64, required: i64 },
    #[display(fmt = "optimality cut coefficients overflow")]
    BigMOverflow,
    #[display(fmt = "the {} backend is not compiled in", _0)]
    BackendUnavailable(&'static str),
    #[display(fmt = "unsupported master constraint: {}", _0)]
    Unsupported(String),
    #[cfg(feature = "gurobi")]
    #[display(fmt = "gurobi: {}", _0)]
    GurobiError(grb::Error),
}

impl std::error::Error for SolverError {}

impl From<ProblemError> for SolverError {
    fn from(e: ProblemError) -> Self {
        SolverError::Problem(e)
    }
}

#[cfg(feature = "gurobi")]
impl From<grb::Error> for SolverError {
    fn from(e: grb::Error) -> Self {
        SolverError::GurobiError(e)
    }
}

/// What the decomposition loop hands back for one master candidate.
#[derive(Debug, Default)]
pub struct CandidateReply {
    pub cuts: Vec<LinearConstraint>,
    pub terminate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// The search space is closed: the best accepted candidate is optimal,
    /// or no candidate was accepted and the master is infeasible.
    Exhausted,
    TimeLimit,
    Terminated,
}

/// A master problem search that reports every complete integer candidate to
/// `on_candidate` and adds the returned cuts as lazy constraints.
///
/// A candidate is accepted as the new best when it satisfies all constraints
/// after its cuts are added and its cost variable is strictly below the
/// previous best.
pub trait MasterEngine {
    fn search(
        &mut self,
        master: &MasterProblem,
        deadline: Option<Instant>,
        on_candidate: &mut dyn FnMut(&Assignment) -> Result<CandidateReply, SolverError>,
    ) -> Result<SearchStatus, SolverError>;
}
