use crate::error::{Error, Result};
use crate::lp::{branch_and_bound, simplex};
use crate::lp::{LinearExpr, ObjectiveSense, Sense, SolverConfig, Status, Var, VarKind};

/// Handle to a constraint of a [`Model`]. Lazy constraints added during a
/// callback solve get ids after the ones that existed before the solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(usize);

impl ConstraintId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
    pub name: String,
}

impl Constraint {
    pub fn new(expr: LinearExpr, sense: Sense, rhs: f64, name: impl Into<String>) -> Self {
        Self {
            expr,
            sense,
            rhs,
            name: name.into(),
        }
    }

    /// Amount by which `values` violates the constraint (zero when satisfied).
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }

    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        self.violation(values) <= tolerance
    }
}

#[derive(Debug, Clone)]
struct VarData {
    name: String,
    kind: VarKind,
    lower: f64,
    upper: f64,
}

/// An optimization model: variables, linear constraints and a linear objective.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    vars: Vec<VarData>,
    constraints: Vec<Constraint>,
    objective: LinearExpr,
    sense: ObjectiveSense,
    relaxed: bool,
}

/// Result of a model solve.
#[derive(Debug, Clone)]
pub struct Solution {
    pub status: Status,
    /// Variable values, indexed by [`Var::index`]. Empty unless a solution exists.
    pub values: Vec<f64>,
    pub objective: f64,
    /// Shadow prices: derivative of the objective with respect to each
    /// constraint's right-hand side. For a MIP these belong to the LP at the
    /// node that produced the incumbent.
    pub duals: Vec<f64>,
    /// Farkas multipliers of an infeasible LP, one per constraint.
    pub farkas: Vec<f64>,
    /// Phase-one optimum of an infeasible LP (sum of artificial values).
    pub infeasibility: f64,
    /// Branch-and-bound nodes processed (1 for a pure LP).
    pub nodes: usize,
    /// Lazy constraints added by the incumbent callback during this solve.
    pub lazy_constraints: usize,
}

impl Solution {
    pub(crate) fn without_point(status: Status) -> Self {
        Self {
            status,
            values: Vec::new(),
            objective: f64::NAN,
            duals: Vec::new(),
            farkas: Vec::new(),
            infeasibility: 0.0,
            nodes: 0,
            lazy_constraints: 0,
        }
    }

    pub fn value(&self, var: Var) -> f64 {
        self.values.get(var.index()).copied().unwrap_or(f64::NAN)
    }

    pub fn dual(&self, id: ConstraintId) -> Option<f64> {
        self.duals.get(id.index()).copied()
    }

    pub fn farkas(&self, id: ConstraintId) -> Option<f64> {
        self.farkas.get(id.index()).copied()
    }
}

/// Information handed to the incumbent callback.
#[derive(Debug, Clone, Copy)]
pub struct Incumbent<'a> {
    pub values: &'a [f64],
    pub objective: f64,
    pub node: usize,
}

/// What the incumbent callback wants the search to do with a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum IncumbentDecision {
    Accept,
    /// Reject the candidate and add these constraints to the model for the
    /// rest of the search. An empty list is the same as `Accept`.
    Cut(Vec<Constraint>),
    /// Stop the search, keeping the best accepted incumbent.
    Abort,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: Vec::new(),
            constraints: Vec::new(),
            objective: LinearExpr::new(),
            sense: ObjectiveSense::Minimize,
            relaxed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a variable. Binary variables are clamped to `[0, 1]`.
    pub fn add_variable(
        &mut self,
        kind: VarKind,
        lower: f64,
        upper: f64,
        name: impl Into<String>,
    ) -> Var {
        let (lower, upper) = match kind {
            VarKind::Binary => (lower.max(0.0), upper.min(1.0)),
            _ => (lower, upper),
        };
        self.vars.push(VarData {
            name: name.into(),
            kind,
            lower,
            upper,
        });
        Var::new(self.vars.len() - 1)
    }

    pub fn add_constraint(
        &mut self,
        expr: LinearExpr,
        sense: Sense,
        rhs: f64,
        name: impl Into<String>,
    ) -> ConstraintId {
        self.push_constraint(Constraint::new(expr, sense, rhs, name))
    }

    pub fn push_constraint(&mut self, constraint: Constraint) -> ConstraintId {
        self.constraints.push(constraint);
        ConstraintId(self.constraints.len() - 1)
    }

    pub fn set_objective(&mut self, expr: LinearExpr, sense: ObjectiveSense) {
        self.objective = expr;
        self.sense = sense;
    }

    pub fn add_objective_term(&mut self, var: Var, coef: f64) {
        self.objective.add_term(var, coef);
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn objective_sense(&self) -> ObjectiveSense {
        self.sense
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(id.index())
    }

    pub fn var_kind(&self, var: Var) -> VarKind {
        self.vars[var.index()].kind
    }

    pub fn var_name(&self, var: Var) -> &str {
        &self.vars[var.index()].name
    }

    pub fn bounds(&self, var: Var) -> (f64, f64) {
        let data = &self.vars[var.index()];
        (data.lower, data.upper)
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        (0..self.vars.len()).map(Var::new)
    }

    /// Whether the variable must take an integral value in the current mode.
    pub fn is_integral(&self, var: Var) -> bool {
        !self.relaxed && self.vars[var.index()].kind != VarKind::Continuous
    }

    pub fn has_integral_vars(&self) -> bool {
        self.vars().any(|v| self.is_integral(v))
    }

    /// Treats every variable as continuous until [`Model::restore_domains`].
    pub fn relax(&mut self) {
        self.relaxed = true;
    }

    pub fn restore_domains(&mut self) {
        self.relaxed = false;
    }

    /// Objective value of a point, including the objective constant.
    pub fn evaluate_objective(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }

    /// Checks bounds, constraints and integrality of a point.
    pub fn is_feasible(&self, values: &[f64], tolerance: f64) -> bool {
        if values.len() != self.vars.len() {
            return false;
        }
        let bounds_ok = self.vars().all(|v| {
            let x = values[v.index()];
            let (lo, hi) = self.bounds(v);
            x >= lo - tolerance
                && x <= hi + tolerance
                && (!self.is_integral(v) || (x - x.round()).abs() <= tolerance)
        });
        bounds_ok
            && self
                .constraints
                .iter()
                .all(|c| c.is_satisfied(values, tolerance))
    }

    pub(crate) fn validate(&self, extra: &[Constraint]) -> Result<()> {
        for (i, data) in self.vars.iter().enumerate() {
            if data.lower.is_nan() || data.upper.is_nan() {
                return Err(Error::InvalidModel(format!(
                    "variable {} ({}) of `{}` has NaN bounds",
                    i, data.name, self.name
                )));
            }
        }
        let n = self.vars.len();
        let check = |expr: &LinearExpr, what: &str| -> Result<()> {
            if !expr.is_finite() {
                return Err(Error::InvalidModel(format!(
                    "{} of `{}` has non-finite coefficients",
                    what, self.name
                )));
            }
            match expr.max_var_index() {
                Some(idx) if idx >= n => Err(Error::InvalidModel(format!(
                    "{} of `{}` references unknown variable {}",
                    what, self.name, idx
                ))),
                _ => Ok(()),
            }
        };
        check(&self.objective, "objective")?;
        for c in self.constraints.iter().chain(extra) {
            check(&c.expr, &format!("constraint `{}`", c.name))?;
            if !c.rhs.is_finite() {
                return Err(Error::InvalidModel(format!(
                    "constraint `{}` of `{}` has a non-finite right-hand side",
                    c.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Solves the model: a single simplex solve when nothing is integral,
    /// branch-and-bound otherwise.
    pub fn solve(&self, config: &SolverConfig) -> Result<Solution> {
        self.validate(&[])?;
        if self.has_integral_vars() {
            let mut lazy = Vec::new();
            branch_and_bound::search(self, &mut lazy, config, None)
        } else {
            let bounds: Vec<(f64, f64)> = self.vars().map(|v| self.bounds(v)).collect();
            simplex::solve(self, &[], &bounds, config)
        }
    }

    /// Solves the model with branch-and-bound, calling `on_incumbent` for every
    /// integral node solution before it may become the incumbent.
    ///
    /// Constraints returned through [`IncumbentDecision::Cut`] become lazy
    /// constraints: they apply to every node processed afterwards and are
    /// appended to the model when the search ends, so they persist.
    pub fn solve_with_incumbent_callback<F>(
        &mut self,
        config: &SolverConfig,
        mut on_incumbent: F,
    ) -> Result<Solution>
    where
        F: FnMut(&Incumbent<'_>) -> Result<IncumbentDecision>,
    {
        self.validate(&[])?;
        let mut lazy = Vec::new();
        let callback: &mut branch_and_bound::IncumbentCallback<'_> = &mut on_incumbent;
        let result = branch_and_bound::search(self, &mut lazy, config, Some(callback));
        self.constraints.extend(lazy);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_bounds_are_clamped() {
        let mut model = Model::new("clamp");
        let x = model.add_variable(VarKind::Binary, -3.0, 7.0, "x");
        assert_eq!(model.bounds(x), (0.0, 1.0));
        assert!(model.is_integral(x));
        model.relax();
        assert!(!model.is_integral(x));
    }

    #[test]
    fn test_unknown_variable_is_rejected() {
        let mut model = Model::new("bad");
        let x = model.add_variable(VarKind::Continuous, 0.0, 1.0, "x");
        model.add_constraint(LinearExpr::term(Var::new(5), 1.0), Sense::Le, 1.0, "ghost");
        model.set_objective(LinearExpr::from(x), ObjectiveSense::Minimize);
        assert!(matches!(
            model.solve(&SolverConfig::default()),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn test_constraint_lookup() {
        let mut model = Model::new("lookup");
        let x = model.add_variable(VarKind::Continuous, 0.0, 1.0, "x");
        let id = model.add_constraint(LinearExpr::term(x, 3.0), Sense::Ge, 1.0, "floor");
        let c = model.constraint(id).unwrap();
        assert_eq!(c.name, "floor");
        assert_eq!((c.sense, c.rhs), (Sense::Ge, 1.0));
        assert!(model.constraint(ConstraintId(1)).is_none());
    }

    #[test]
    fn test_violation() {
        let x = Var::new(0);
        let c = Constraint::new(LinearExpr::term(x, 2.0), Sense::Ge, 3.0, "c");
        assert_eq!(c.violation(&[1.0]), 1.0);
        assert_eq!(c.violation(&[2.0]), 0.0);
    }
}
