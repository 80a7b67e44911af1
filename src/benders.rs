//! Benders decomposition with lazy cuts and subproblem caching.
//!
//! A [`Controller`] owns a master MIP over first-stage decisions and a set of
//! [`Subproblem`]s. Each subproblem gets a surrogate variable in the master
//! that underestimates its objective; optimality cuts raise the surrogates and
//! feasibility cuts remove first-stage decisions no subproblem can live with.
//! Subproblem solves are memoised per key in a [`ResultCache`].

pub mod assignment;
pub mod cache;
pub mod controller;
pub mod cut;
pub mod subproblem;


pub use assignment::Assignment;
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use controller::{BendersOutcome, BendersStatus, Controller, IterationRecord, Master, Phase};
pub use cut::{Cut, CutGenerator, CutKind};
pub use subproblem::{
    LinkingRow, SubResult, Subproblem, SubproblemAdapter, SubproblemModel, Witness,
};

use crate::lp::SolverConfig;

/// How cuts reach the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Solve the master to optimality, separate, add cuts, repeat.
    Iterative,
    /// Solve the master once; cuts are injected from the incumbent callback.
    LazyCallback,
}

/// Which feasibility cuts the generator may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeasibilityCutMode {
    /// Problem-specific cut, then Farkas cut, then no-good cut.
    Strongest,
    /// Always a no-good cut on the subproblem scope.
    NoGoodOnly,
}

/// Configuration for a Benders run.
#[derive(Debug, Clone)]
pub struct BendersConfig {
    /// Maximum integer-phase iterations (master solves, or incumbents seen by
    /// the lazy callback)
    pub max_iterations: usize,
    /// Relative tolerance for cut violation and bound comparisons
    pub tolerance: f64,
    pub protocol: Protocol,
    /// Run a warm-up phase on the LP relaxation of the master first
    pub relaxed_phase: bool,
    pub relaxed_max_iterations: usize,
    pub feasibility_cuts: FeasibilityCutMode,
    pub use_cache: bool,
    /// Re-solve on cache hits and fail if the result differs
    pub verify_cache: bool,
    pub solver: SolverConfig,
}

impl Default for BendersConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            protocol: Protocol::Iterative,
            relaxed_phase: false,
            relaxed_max_iterations: 50,
            feasibility_cuts: FeasibilityCutMode::Strongest,
            use_cache: true,
            verify_cache: false,
            solver: SolverConfig::default(),
        }
    }
}
