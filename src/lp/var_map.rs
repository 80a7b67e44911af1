use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Error, Result};
use crate::lp::{Model, Var, VarKind};

/// Sparse collection of model variables keyed by index tuples.
///
/// The key set is fixed at construction by a domain generator, so a lookup
/// with a key outside the domain is an error rather than a silent miss.
/// Iteration follows the order of the domain generator.
#[derive(Debug, Clone)]
pub struct VarMap<K> {
    name: String,
    order: Vec<K>,
    vars: HashMap<K, Var>,
}

impl<K> VarMap<K>
where
    K: Hash + Eq + Clone + Debug,
{
    /// Creates one variable per key yielded by `domain`.
    ///
    /// # Arguments
    /// * `model` - Model receiving the variables
    /// * `name` - Prefix for variable names (`name[key]`)
    /// * `domain` - Generator of valid keys; duplicates are rejected
    /// * `shape` - Kind and bounds for each key
    pub fn build<I, F>(model: &mut Model, name: &str, domain: I, mut shape: F) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        F: FnMut(&K) -> (VarKind, f64, f64),
    {
        let mut order = Vec::new();
        let mut vars = HashMap::new();
        for key in domain {
            if vars.contains_key(&key) {
                return Err(Error::InvalidIndex(format!(
                    "{}: duplicate key {:?} in domain",
                    name, key
                )));
            }
            let (kind, lower, upper) = shape(&key);
            let var = model.add_variable(kind, lower, upper, format!("{}{:?}", name, key));
            order.push(key.clone());
            vars.insert(key, var);
        }
        Ok(Self {
            name: name.to_string(),
            order,
            vars,
        })
    }

    pub fn get(&self, key: &K) -> Result<Var> {
        self.vars.get(key).copied().ok_or_else(|| {
            Error::InvalidIndex(format!("{}: key {:?} is outside the domain", self.name, key))
        })
    }

    /// Lookup for keys that may legitimately be absent (sparse domains).
    pub fn try_get(&self, key: &K) -> Option<Var> {
        self.vars.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.vars.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Var)> + '_ {
        self.order.iter().map(move |k| (k, self.vars[k]))
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
