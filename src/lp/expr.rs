use std::collections::BTreeMap;
use std::ops::{Add, Mul, Neg, Sub};

use crate::lp::Var;

/// A linear expression `Σ coef · var + constant`.
///
/// Terms are kept in insertion order and may repeat a variable; call
/// [`LinearExpr::normalized`] to merge them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(Var, f64)>,
    constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(var: Var, coef: f64) -> Self {
        Self {
            terms: vec![(var, coef)],
            constant: 0.0,
        }
    }

    /// Sum of the given variables, each with coefficient one.
    pub fn sum<I: IntoIterator<Item = Var>>(vars: I) -> Self {
        vars.into_iter().map(|v| (v, 1.0)).collect()
    }

    pub fn add_term(&mut self, var: Var, coef: f64) -> &mut Self {
        self.terms.push((var, coef));
        self
    }

    pub fn terms(&self) -> &[(Var, f64)] {
        &self.terms
    }

    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Merges repeated variables, drops zero coefficients and sorts by variable.
    pub fn normalized(&self) -> Self {
        let mut merged: BTreeMap<Var, f64> = BTreeMap::new();
        for &(var, coef) in &self.terms {
            *merged.entry(var).or_insert(0.0) += coef;
        }
        Self {
            terms: merged.into_iter().filter(|&(_, c)| c != 0.0).collect(),
            constant: self.constant,
        }
    }

    /// Evaluates the expression on a dense value vector indexed by [`Var::index`].
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, coef)| coef * values.get(var.index()).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }

    pub fn coefficient(&self, var: Var) -> f64 {
        self.terms
            .iter()
            .filter(|&&(v, _)| v == var)
            .map(|&(_, c)| c)
            .sum()
    }

    pub fn max_var_index(&self) -> Option<usize> {
        self.terms.iter().map(|(v, _)| v.index()).max()
    }

    pub fn is_finite(&self) -> bool {
        self.constant.is_finite() && self.terms.iter().all(|(_, c)| c.is_finite())
    }
}

impl From<Var> for LinearExpr {
    fn from(var: Var) -> Self {
        LinearExpr::term(var, 1.0)
    }
}

impl FromIterator<(Var, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (Var, f64)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
            constant: 0.0,
        }
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: LinearExpr) -> LinearExpr {
        self.terms.extend(rhs.terms);
        self.constant += rhs.constant;
        self
    }
}

impl Sub for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: LinearExpr) -> LinearExpr {
        self + (-rhs)
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> LinearExpr {
        self * -1.0
    }
}

impl Mul<f64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(mut self, rhs: f64) -> LinearExpr {
        for term in &mut self.terms {
            term.1 *= rhs;
        }
        self.constant *= rhs;
        self
    }
}
