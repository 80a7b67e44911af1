use std::fmt;
use std::hash::{Hash, Hasher};

use crate::lp::{LinearExpr, Model, Var, VarKind};

/// Immutable snapshot of master variable values, sorted by variable.
///
/// Values compare and hash by bit pattern, so two assignments are equal only
/// when every value is bit-identical. `-0.0` is folded into `0.0` on the way
/// in.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    entries: Vec<(Var, f64)>,
}

impl Assignment {
    /// Builds an assignment; a variable given twice keeps its last value.
    pub fn new<I: IntoIterator<Item = (Var, f64)>>(entries: I) -> Self {
        let mut entries: Vec<(Var, f64)> = entries
            .into_iter()
            .map(|(v, x)| (v, if x == 0.0 { 0.0 } else { x }))
            .collect();
        entries.sort_by_key(|&(v, _)| v);
        let mut deduped: Vec<(Var, f64)> = Vec::with_capacity(entries.len());
        for (v, x) in entries {
            match deduped.last_mut() {
                Some(last) if last.0 == v => last.1 = x,
                _ => deduped.push((v, x)),
            }
        }
        Self { entries: deduped }
    }

    /// Snapshots `vars` from a dense value vector of `model`.
    ///
    /// Values of integral variables within `tolerance` of an integer are
    /// rounded, so solver noise never produces distinct keys for the same
    /// decision.
    pub fn capture(model: &Model, vars: &[Var], values: &[f64], tolerance: f64) -> Self {
        Self::new(vars.iter().map(|&v| {
            let x = values.get(v.index()).copied().unwrap_or(0.0);
            let rounded = x.round();
            if model.var_kind(v) != VarKind::Continuous
                && (x - rounded).abs() <= tolerance
            {
                (v, rounded)
            } else {
                (v, x)
            }
        }))
    }

    /// The sub-assignment over `scope`. Variables of `scope` that are not
    /// assigned here are left out.
    pub fn restrict(&self, scope: &[Var]) -> Self {
        Self::new(scope.iter().filter_map(|&v| self.get(v).map(|x| (v, x))))
    }

    pub fn get(&self, var: Var) -> Option<f64> {
        self.entries
            .binary_search_by_key(&var, |&(v, _)| v)
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn contains(&self, var: Var) -> bool {
        self.get(var).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Var, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.entries.iter().map(|&(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every value is exactly 0 or 1.
    pub fn is_binary(&self) -> bool {
        self.entries.iter().all(|&(_, x)| x == 0.0 || x == 1.0)
    }

    /// Variables assigned exactly 1.
    pub fn ones(&self) -> impl Iterator<Item = Var> + '_ {
        self.entries
            .iter()
            .filter(|&&(_, x)| x == 1.0)
            .map(|&(v, _)| v)
    }

    /// Evaluates `expr` on this assignment, or `None` if it references a
    /// variable that is not assigned.
    pub fn evaluate(&self, expr: &LinearExpr) -> Option<f64> {
        expr.terms()
            .iter()
            .map(|&(v, c)| self.get(v).map(|x| c * x))
            .sum::<Option<f64>>()
            .map(|s| s + expr.constant_term())
    }

    /// Writes the assignment into a dense value vector.
    pub fn overlay(&self, values: &mut [f64]) {
        for &(v, x) in &self.entries {
            if let Some(slot) = values.get_mut(v.index()) {
                *slot = x;
            }
        }
    }
}

impl PartialEq for Assignment {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.0 == b.0 && a.1.to_bits() == b.1.to_bits())
    }
}

impl Eq for Assignment {}

impl Hash for Assignment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entries.len().hash(state);
        for &(v, x) in &self.entries {
            v.hash(state);
            x.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (v, x)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "x{}={}", v.index(), x)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_order_and_signed_zero_do_not_matter() {
        let a = Assignment::new([(Var::new(2), 1.0), (Var::new(0), -0.0)]);
        let b = Assignment::new([(Var::new(0), 0.0), (Var::new(2), 1.0)]);
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_capture_rounds_only_integral_vars() {
        let mut model = Model::new("m");
        let x = model.add_variable(VarKind::Binary, 0.0, 1.0, "x");
        let y = model.add_variable(VarKind::Continuous, 0.0, 10.0, "y");
        let z = model.add_variable(VarKind::Integer, 0.0, 10.0, "z");
        let snap = Assignment::capture(&model, &[x, y, z], &[0.9999999999, 2.0000000001, 2.5], 1e-6);
        assert_eq!(snap.get(x), Some(1.0));
        assert_eq!(snap.get(y), Some(2.0000000001));
        // too far from an integer to be noise
        assert_eq!(snap.get(z), Some(2.5));
    }

    #[test]
    fn test_restrict_and_evaluate() {
        let x = Var::new(0);
        let y = Var::new(1);
        let z = Var::new(2);
        let full = Assignment::new([(x, 1.0), (y, 0.0), (z, 3.0)]);
        let part = full.restrict(&[z, x]);
        assert_eq!(part.len(), 2);
        assert!(!part.contains(y));
        assert_eq!(part.ones().collect::<Vec<_>>(), vec![x]);

        let expr = LinearExpr::from_iter([(x, 2.0), (z, 1.0)]);
        assert_eq!(part.evaluate(&expr), Some(5.0));
        assert_eq!(part.evaluate(&LinearExpr::from(y)), None);
        assert!(!full.is_binary());
        assert!(part.restrict(&[x]).is_binary());
    }
}
