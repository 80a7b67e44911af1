use thiserror::Error;

use crate::benders::CutKind;
use crate::lp::Status;

/// Errors raised by the solver backend and the Benders driver.
///
/// Infeasible subproblems are not errors: they are expected and produce
/// feasibility cuts. Everything here means the run cannot continue soundly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The master (or a model solved outside the loop) has no solution.
    #[error("model `{model}` is infeasible (iteration {iteration})")]
    ModelInfeasible { model: String, iteration: usize },

    /// The solver returned neither an optimal nor an infeasible status.
    #[error("solver returned {status:?} for model `{model}` (iteration {iteration})")]
    SolverNumerical {
        model: String,
        iteration: usize,
        status: Status,
    },

    /// A generated cut excludes the point it was derived from in the wrong way.
    #[error("{kind:?} cut from subproblem {subproblem} is unsound (residual {residual:e})")]
    CutSoundnessViolation {
        subproblem: usize,
        kind: CutKind,
        residual: f64,
    },

    /// The same cache key produced two different subproblem results.
    #[error("cache key collision for subproblem {subproblem}: {key}")]
    CacheKeyCollision { subproblem: usize, key: String },

    /// A linking row references a master variable outside the subproblem key.
    #[error("subproblem {subproblem} depends on variable {var} which is not in its key")]
    InvalidKey { subproblem: usize, var: usize },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),
}

pub type Result<T> = std::result::Result<T, Error>;
