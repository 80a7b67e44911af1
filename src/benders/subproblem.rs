use log::trace;

use crate::benders::Assignment;
use crate::error::{Error, Result};
use crate::lp::{Constraint, ConstraintId, Model, SolverConfig, Status, Var};

/// Right-hand side of a subproblem row as an affine function of master
/// variables: `constant + Σ coef · x`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkingRow {
    pub constant: f64,
    pub terms: Vec<(Var, f64)>,
}

impl LinkingRow {
    pub fn new(constant: f64, terms: Vec<(Var, f64)>) -> Self {
        Self { constant, terms }
    }

    /// Row whose rhs is `coef · var`.
    pub fn scaled(var: Var, coef: f64) -> Self {
        Self::new(0.0, vec![(var, coef)])
    }

    /// The rhs at `key`, or `None` if the row depends on a variable outside it.
    pub fn value(&self, key: &Assignment) -> Option<f64> {
        self.terms
            .iter()
            .map(|&(v, c)| key.get(v).map(|x| c * x))
            .sum::<Option<f64>>()
            .map(|s| s + self.constant)
    }
}

/// A subproblem instance built for one key. `linking[i]` is the model row
/// whose rhs is described by the `i`-th [`LinkingRow`] of the subproblem.
#[derive(Debug, Clone)]
pub struct SubproblemModel {
    pub model: Model,
    pub linking: Vec<ConstraintId>,
}

/// What an infeasible subproblem leaves behind for the cut generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Witness {
    /// Phase-one residual at the solved key.
    pub infeasibility: f64,
    /// Farkas multipliers of the linking rows; empty when the backend gave none.
    pub ray: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubResult {
    Optimal { objective: f64, duals: Vec<f64> },
    Infeasible(Witness),
}

impl SubResult {
    pub fn is_feasible(&self) -> bool {
        matches!(self, SubResult::Optimal { .. })
    }

    /// Bit-for-bit equality, used to verify cache hits.
    pub fn same_bits(&self, other: &SubResult) -> bool {
        fn bits(a: &[f64], b: &[f64]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
        }
        match (self, other) {
            (
                SubResult::Optimal { objective, duals },
                SubResult::Optimal {
                    objective: o2,
                    duals: d2,
                },
            ) => objective.to_bits() == o2.to_bits() && bits(duals, d2),
            (SubResult::Infeasible(a), SubResult::Infeasible(b)) => {
                a.infeasibility.to_bits() == b.infeasibility.to_bits() && bits(&a.ray, &b.ray)
            }
            _ => false,
        }
    }
}

/// A Benders subproblem: a smaller LP conditioned on part of the master's
/// first-stage decisions.
///
/// The LP built for a key must depend on the key only through the rows named
/// by [`Subproblem::linking`]; that is what makes duals and Farkas rays turn
/// into valid cuts. Subproblems whose feasible region depends on the key in
/// other ways report `polyhedral() == false` and never get Farkas cuts.
pub trait Subproblem {
    fn name(&self) -> &str;

    /// Master variables this subproblem depends on. The cache key is the
    /// incumbent restricted to exactly these.
    fn scope(&self) -> &[Var];

    /// Rows whose right-hand side is an affine function of scope variables.
    fn linking(&self) -> &[LinkingRow];

    /// Builds the LP for `key`.
    fn build(&self, key: &Assignment) -> Result<SubproblemModel>;

    /// Objective weight of this subproblem's surrogate in the master.
    fn weight(&self) -> f64 {
        1.0
    }

    /// A valid lower bound on the subproblem objective over all keys.
    fn lower_bound(&self) -> f64;

    fn polyhedral(&self) -> bool {
        true
    }

    /// A problem-specific feasibility cut, stronger than the generic ones.
    /// The returned constraint must exclude `key`.
    fn feasibility_cut(
        &self,
        _key: &Assignment,
        _witness: &Witness,
        _adapter: &SubproblemAdapter,
    ) -> Result<Option<Constraint>> {
        Ok(None)
    }
}

/// Builds and solves subproblem instances and classifies the outcome.
#[derive(Debug, Clone)]
pub struct SubproblemAdapter {
    config: SolverConfig,
    iteration: usize,
}

impl SubproblemAdapter {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            iteration: 0,
        }
    }

    /// Iteration reported in error diagnostics.
    pub fn set_iteration(&mut self, iteration: usize) {
        self.iteration = iteration;
    }

    /// Solves `sub` at `key`. Statuses other than optimal or infeasible are
    /// hard errors.
    pub fn solve(&self, sub: &dyn Subproblem, key: &Assignment) -> Result<SubResult> {
        let built = sub.build(key)?;
        if built.linking.len() != sub.linking().len() {
            return Err(Error::InvalidModel(format!(
                "subproblem `{}` built {} linking rows, declared {}",
                sub.name(),
                built.linking.len(),
                sub.linking().len()
            )));
        }
        if built.model.has_integral_vars() {
            return Err(Error::InvalidModel(format!(
                "subproblem `{}` must be a linear program",
                sub.name()
            )));
        }

        let sol = built.model.solve(&self.config)?;
        trace!(
            "subproblem `{}` at {}: {:?}",
            built.model.name(),
            key,
            sol.status
        );
        match sol.status {
            Status::Optimal => {
                let duals = built
                    .linking
                    .iter()
                    .map(|&id| {
                        sol.dual(id).ok_or_else(|| {
                            Error::InvalidModel(format!(
                                "subproblem `{}` has no row {}",
                                sub.name(),
                                id.index()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(SubResult::Optimal {
                    objective: sol.objective,
                    duals,
                })
            }
            Status::Infeasible => {
                let ray = built
                    .linking
                    .iter()
                    .map(|&id| sol.farkas(id))
                    .collect::<Option<Vec<_>>>()
                    .unwrap_or_default();
                Ok(SubResult::Infeasible(Witness {
                    infeasibility: sol.infeasibility,
                    ray,
                }))
            }
            status => Err(Error::SolverNumerical {
                model: built.model.name().to_string(),
                iteration: self.iteration,
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::{LinearExpr, ObjectiveSense, Sense, VarKind};
    use approx::assert_abs_diff_eq;

    /// min y subject to y >= rhs(x), y <= 10
    struct Floor {
        scope: Vec<Var>,
        linking: Vec<LinkingRow>,
        unbounded: bool,
    }

    impl Floor {
        fn new(x: Var) -> Self {
            Self {
                scope: vec![x],
                linking: vec![LinkingRow::scaled(x, 4.0)],
                unbounded: false,
            }
        }
    }

    impl Subproblem for Floor {
        fn name(&self) -> &str {
            "floor"
        }

        fn scope(&self) -> &[Var] {
            &self.scope
        }

        fn linking(&self) -> &[LinkingRow] {
            &self.linking
        }

        fn build(&self, key: &Assignment) -> Result<SubproblemModel> {
            let mut model = Model::new("floor");
            let upper = if self.unbounded { f64::INFINITY } else { 10.0 };
            let y = model.add_variable(VarKind::Continuous, f64::NEG_INFINITY, upper, "y");
            let rhs = self.linking[0].value(key).unwrap_or(0.0);
            let row = model.add_constraint(LinearExpr::from(y), Sense::Ge, rhs, "floor");
            let sense = if self.unbounded {
                ObjectiveSense::Maximize
            } else {
                ObjectiveSense::Minimize
            };
            model.set_objective(LinearExpr::from(y), sense);
            Ok(SubproblemModel {
                model,
                linking: vec![row],
            })
        }

        fn lower_bound(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_optimal_result_carries_duals() {
        let x = Var::new(0);
        let adapter = SubproblemAdapter::new(SolverConfig::default());
        let key = Assignment::new([(x, 2.0)]);
        match adapter.solve(&Floor::new(x), &key).unwrap() {
            SubResult::Optimal { objective, duals } => {
                assert_abs_diff_eq!(objective, 8.0, epsilon = 1e-9);
                assert_abs_diff_eq!(duals[0], 1.0, epsilon = 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_infeasible_result_carries_ray() {
        let x = Var::new(0);
        let adapter = SubproblemAdapter::new(SolverConfig::default());
        let key = Assignment::new([(x, 3.0)]);
        match adapter.solve(&Floor::new(x), &key).unwrap() {
            SubResult::Infeasible(w) => {
                assert_abs_diff_eq!(w.infeasibility, 2.0, epsilon = 1e-9);
                assert_eq!(w.ray.len(), 1);
                // The residual max(0, rhs - 10) grows one for one with the floor.
                assert_abs_diff_eq!(w.ray[0], 1.0, epsilon = 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbounded_is_a_hard_error() {
        let x = Var::new(0);
        let mut sub = Floor::new(x);
        sub.unbounded = true;
        let mut adapter = SubproblemAdapter::new(SolverConfig::default());
        adapter.set_iteration(7);
        let err = adapter.solve(&sub, &Assignment::new([(x, 1.0)])).unwrap_err();
        assert_eq!(
            err,
            Error::SolverNumerical {
                model: "floor".to_string(),
                iteration: 7,
                status: Status::Unbounded,
            }
        );
    }

    #[test]
    fn test_same_bits() {
        let a = SubResult::Optimal {
            objective: 1.0,
            duals: vec![0.0],
        };
        let b = SubResult::Optimal {
            objective: 1.0,
            duals: vec![-0.0],
        };
        assert_eq!(a, b);
        assert!(!a.same_bits(&b));
        assert!(a.same_bits(&a.clone()));
    }
}
