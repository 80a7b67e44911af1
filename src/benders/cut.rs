use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};

use crate::benders::{
    Assignment, FeasibilityCutMode, LinkingRow, Subproblem, SubproblemAdapter, Witness,
};
use crate::error::{Error, Result};
use crate::lp::{Constraint, LinearExpr, Sense, Var};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CutKind {
    Feasibility,
    Optimality,
}

impl fmt::Display for CutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutKind::Feasibility => write!(f, "feas"),
            CutKind::Optimality => write!(f, "opt"),
        }
    }
}

/// A linear inequality over master variables derived from one subproblem solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    pub kind: CutKind,
    pub subproblem: usize,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
    /// The subproblem key the cut was derived at.
    pub origin: Assignment,
}

impl Cut {
    pub fn to_constraint(&self, name: impl Into<String>) -> Constraint {
        Constraint::new(self.expr.clone(), self.sense, self.rhs, name)
    }

    /// Violation at a dense master point.
    pub fn violation(&self, values: &[f64]) -> f64 {
        self.to_constraint("").violation(values)
    }

    fn violation_at(&self, subproblem: usize, key: &Assignment) -> Result<f64> {
        let missing = self.expr.terms().iter().find(|&&(v, _)| !key.contains(v));
        if let Some(&(v, _)) = missing {
            return Err(Error::InvalidKey {
                subproblem,
                var: v.index(),
            });
        }
        let lhs = key.evaluate(&self.expr).unwrap_or(f64::NAN);
        Ok(match self.sense {
            Sense::Le => lhs - self.rhs,
            Sense::Ge => self.rhs - lhs,
            Sense::Eq => (lhs - self.rhs).abs(),
        })
    }
}

/// Turns subproblem results into master cuts and checks each one before it
/// leaves.
#[derive(Debug, Clone)]
pub struct CutGenerator {
    tolerance: f64,
    /// Smallest residual that counts as infeasible; matches the LP solver's
    /// phase-one threshold so every infeasible subproblem can be cut off.
    infeasibility_tolerance: f64,
    mode: FeasibilityCutMode,
}

impl CutGenerator {
    /// # Arguments
    /// * `tolerance` - Relative tolerance of the optimality-cut tightness check
    /// * `infeasibility_tolerance` - Violation a feasibility cut must exceed at
    ///   its origin, normally `SolverConfig::feasibility_tolerance`
    /// * `mode` - Which feasibility cuts may be generated
    pub fn new(tolerance: f64, infeasibility_tolerance: f64, mode: FeasibilityCutMode) -> Self {
        Self {
            tolerance,
            infeasibility_tolerance,
            mode,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// `theta >= objective + Σ_j g_j (x_j - x̂_j)` with `g_j = Σ_i π_i coef_ij`.
    ///
    /// The assembled cut is evaluated at `(theta = objective, key)` and must
    /// hold with equality there.
    pub fn optimality_cut(
        &self,
        subproblem: usize,
        theta: Var,
        key: &Assignment,
        objective: f64,
        duals: &[f64],
        linking: &[LinkingRow],
    ) -> Result<Option<Cut>> {
        let slopes = slopes(subproblem, key, duals, linking)?;
        let mut expr = LinearExpr::term(theta, 1.0);
        let mut rhs = objective;
        for (&v, &g) in &slopes {
            expr.add_term(v, -g);
            rhs -= g * key.get(v).unwrap_or(0.0);
        }
        let cut = Cut {
            kind: CutKind::Optimality,
            subproblem,
            expr: expr.normalized(),
            sense: Sense::Ge,
            rhs,
            origin: key.clone(),
        };

        let origin = Assignment::new(key.iter().chain(std::iter::once((theta, objective))));
        let residual = cut.violation_at(subproblem, &origin)?.abs();
        if !(residual <= self.tolerance * (1.0 + objective.abs()))
            || !cut.expr.is_finite()
            || !cut.rhs.is_finite()
        {
            return self.unsound(subproblem, CutKind::Optimality, residual);
        }
        debug!("optimality cut from subproblem {} at {}", subproblem, key);
        Ok(Some(cut))
    }

    /// `Σ_j g_j (x_j - x̂_j) <= -w`, from the Farkas multipliers of the
    /// linking rows. `None` when the witness has no usable ray.
    pub fn farkas_cut(
        &self,
        subproblem: usize,
        key: &Assignment,
        witness: &Witness,
        linking: &[LinkingRow],
    ) -> Result<Option<Cut>> {
        if witness.infeasibility <= self.infeasibility_tolerance
            || witness.ray.len() != linking.len()
        {
            return Ok(None);
        }
        let slopes = slopes(subproblem, key, &witness.ray, linking)?;
        let mut expr = LinearExpr::new();
        let mut rhs = -witness.infeasibility;
        for (&v, &g) in &slopes {
            expr.add_term(v, g);
            rhs += g * key.get(v).unwrap_or(0.0);
        }
        let cut = Cut {
            kind: CutKind::Feasibility,
            subproblem,
            expr: expr.normalized(),
            sense: Sense::Le,
            rhs,
            origin: key.clone(),
        };
        debug!("Farkas cut from subproblem {} at {}", subproblem, key);
        self.checked_feasibility(cut)
    }

    /// `Σ_{x̂_i = 1} (1 - x_i) + Σ_{x̂_i = 0} x_i >= 1`, written with the
    /// constant moved to the right. `None` unless the key is binary.
    pub fn no_good_cut(&self, subproblem: usize, key: &Assignment) -> Result<Option<Cut>> {
        if key.is_empty() || !key.is_binary() {
            return Ok(None);
        }
        let ones = key.ones().count();
        let expr: LinearExpr = key
            .iter()
            .map(|(v, x)| (v, if x == 1.0 { -1.0 } else { 1.0 }))
            .collect();
        let cut = Cut {
            kind: CutKind::Feasibility,
            subproblem,
            expr,
            sense: Sense::Ge,
            rhs: 1.0 - ones as f64,
            origin: key.clone(),
        };
        debug!("no-good cut from subproblem {} at {}", subproblem, key);
        self.checked_feasibility(cut)
    }

    /// Wraps a cut supplied by the subproblem itself.
    pub fn problem_specific_cut(
        &self,
        subproblem: usize,
        key: &Assignment,
        constraint: Constraint,
    ) -> Result<Option<Cut>> {
        let cut = Cut {
            kind: CutKind::Feasibility,
            subproblem,
            expr: constraint.expr,
            sense: constraint.sense,
            rhs: constraint.rhs,
            origin: key.clone(),
        };
        debug!("problem-specific cut from subproblem {} at {}", subproblem, key);
        self.checked_feasibility(cut)
    }

    /// Best feasibility cut available for an infeasible key.
    ///
    /// With `relaxed` set only Farkas cuts are produced, since the key may be
    /// fractional. Returns `None` when nothing valid can be derived.
    pub fn feasibility_cut(
        &self,
        subproblem: usize,
        sub: &dyn Subproblem,
        key: &Assignment,
        witness: &Witness,
        adapter: &SubproblemAdapter,
        relaxed: bool,
    ) -> Result<Option<Cut>> {
        if relaxed {
            return if sub.polyhedral() {
                self.farkas_cut(subproblem, key, witness, sub.linking())
            } else {
                Ok(None)
            };
        }
        if self.mode == FeasibilityCutMode::Strongest {
            if let Some(constraint) = sub.feasibility_cut(key, witness, adapter)? {
                if let Some(cut) = self.problem_specific_cut(subproblem, key, constraint)? {
                    return Ok(Some(cut));
                }
            }
            if sub.polyhedral() {
                if let Some(cut) = self.farkas_cut(subproblem, key, witness, sub.linking())? {
                    return Ok(Some(cut));
                }
            }
        }
        self.no_good_cut(subproblem, key)
    }

    fn checked_feasibility(&self, cut: Cut) -> Result<Option<Cut>> {
        let violation = cut.violation_at(cut.subproblem, &cut.origin)?;
        if !(violation > self.infeasibility_tolerance)
            || !cut.expr.is_finite()
            || !cut.rhs.is_finite()
        {
            return self.unsound(cut.subproblem, CutKind::Feasibility, violation);
        }
        Ok(Some(cut))
    }

    fn unsound(&self, subproblem: usize, kind: CutKind, residual: f64) -> Result<Option<Cut>> {
        if cfg!(debug_assertions) {
            Err(Error::CutSoundnessViolation {
                subproblem,
                kind,
                residual,
            })
        } else {
            warn!(
                "skipping unsound {} cut from subproblem {} (residual {:e})",
                kind, subproblem, residual
            );
            Ok(None)
        }
    }
}

/// `g_j = Σ_i m_i coef_ij` over the linking rows.
fn slopes(
    subproblem: usize,
    key: &Assignment,
    multipliers: &[f64],
    linking: &[LinkingRow],
) -> Result<BTreeMap<Var, f64>> {
    let mut slopes = BTreeMap::new();
    for (row, &m) in linking.iter().zip(multipliers) {
        for &(v, c) in &row.terms {
            if !key.contains(v) {
                return Err(Error::InvalidKey {
                    subproblem,
                    var: v.index(),
                });
            }
            *slopes.entry(v).or_insert(0.0) += m * c;
        }
    }
    Ok(slopes)
}
