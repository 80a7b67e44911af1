//! A small in-process LP/MIP backend.
//!
//! The Benders driver only needs a handful of operations from an optimizer:
//! build a model, solve it, read duals after an LP solve and intercept integer
//! incumbents during a branch-and-bound search. This module provides exactly
//! that surface on top of a dense two-phase simplex, which is plenty for
//! teaching-sized instances.

pub mod branch_and_bound;
pub mod expr;
pub mod model;
pub mod simplex;
pub mod var_map;

pub use expr::LinearExpr;
pub use model::{Constraint, ConstraintId, Incumbent, IncumbentDecision, Model, Solution};
pub use var_map::VarMap;

/// Handle to a variable of a [`Model`]. Only meaningful for the model that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(usize);

impl Var {
    pub(crate) fn new(index: usize) -> Self {
        Var(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    Binary,
    Integer,
    Continuous,
}

/// Relation between a constraint's left-hand side and its right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl Sense {
    pub(crate) fn flipped(self) -> Self {
        match self {
            Sense::Le => Sense::Ge,
            Sense::Ge => Sense::Le,
            Sense::Eq => Sense::Eq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Proven optimal.
    Optimal,
    /// A feasible solution was found but the node limit stopped the proof.
    Feasible,
    Infeasible,
    Unbounded,
    /// The incumbent callback asked the search to stop.
    Interrupted,
    /// Iteration/node limit without a usable answer, or a numerical breakdown.
    Error,
}

/// Configuration for the simplex and branch-and-bound routines.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Maximum simplex pivots per LP solve (both phases together)
    pub max_iterations: usize,
    /// Maximum branch-and-bound nodes
    pub max_nodes: usize,
    /// Pivot and reduced-cost tolerance
    pub tolerance: f64,
    /// Phase-one residual above which an LP is declared infeasible
    pub feasibility_tolerance: f64,
    /// Distance from the nearest integer tolerated for integral variables
    pub integrality_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            max_nodes: 100_000,
            tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
            integrality_tolerance: 1e-6,
        }
    }
}
