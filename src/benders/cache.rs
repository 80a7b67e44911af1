use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::benders::{Assignment, CutKind, SubResult};
use crate::error::{Error, Result};

/// A subproblem together with the slice of the master incumbent it sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subproblem: usize,
    pub assignment: Assignment,
}

impl CacheKey {
    pub fn new(subproblem: usize, assignment: Assignment) -> Self {
        Self {
            subproblem,
            assignment,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Memoised subproblem results for the lifetime of one run, plus the set of
/// keys a cut has already been emitted for.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: HashMap<CacheKey, SubResult>,
    emitted: HashSet<(CacheKey, CutKind)>,
    enabled: bool,
    verify: bool,
    stats: CacheStats,
}

impl ResultCache {
    /// # Arguments
    /// * `enabled` - When false every lookup recomputes
    /// * `verify` - Recompute on every hit and compare bit-for-bit
    pub fn new(enabled: bool, verify: bool) -> Self {
        Self {
            entries: HashMap::new(),
            emitted: HashSet::new(),
            enabled,
            verify,
            stats: CacheStats::default(),
        }
    }

    /// Returns the stored result for `key`, computing and storing it on a miss.
    ///
    /// Errors from `compute` propagate and leave nothing behind.
    pub fn get_or_compute<F>(&mut self, key: &CacheKey, compute: F) -> Result<SubResult>
    where
        F: FnOnce() -> Result<SubResult>,
    {
        if !self.enabled {
            self.stats.misses += 1;
            return compute();
        }
        if let Some(stored) = self.entries.get(key) {
            self.stats.hits += 1;
            trace!("cache hit: subproblem {} at {}", key.subproblem, key.assignment);
            if self.verify {
                let fresh = compute()?;
                if !fresh.same_bits(stored) {
                    return Err(Error::CacheKeyCollision {
                        subproblem: key.subproblem,
                        key: key.assignment.to_string(),
                    });
                }
            }
            return Ok(stored.clone());
        }

        self.stats.misses += 1;
        let result = compute()?;
        debug!(
            "cached subproblem {} at {} (feasible: {})",
            key.subproblem,
            key.assignment,
            result.is_feasible()
        );
        self.entries.insert(key.clone(), result.clone());
        Ok(result)
    }

    /// Records that a cut of `kind` was emitted for `key`. Returns false if
    /// one already was, in which case the caller must not add it again.
    pub fn mark_emitted(&mut self, key: &CacheKey, kind: CutKind) -> bool {
        self.emitted.insert((key.clone(), kind))
    }

    pub fn was_emitted(&self, key: &CacheKey, kind: CutKind) -> bool {
        self.emitted.contains(&(key.clone(), kind))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benders::Witness;
    use crate::lp::Var;
    use std::cell::Cell;

    fn key(x: f64) -> CacheKey {
        CacheKey::new(0, Assignment::new([(Var::new(0), x)]))
    }

    #[test]
    fn test_hit_skips_compute() {
        let mut cache = ResultCache::new(true, false);
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(SubResult::Optimal {
                objective: 3.0,
                duals: vec![1.0],
            })
        };
        let first = cache.get_or_compute(&key(1.0), compute).unwrap();
        let second = cache.get_or_compute(&key(1.0), compute).unwrap();
        assert!(first.same_bits(&second));
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_cache_always_computes() {
        let mut cache = ResultCache::new(false, false);
        let calls = Cell::new(0);
        for _ in 0..3 {
            cache
                .get_or_compute(&key(1.0), || {
                    calls.set(calls.get() + 1);
                    Ok(SubResult::Infeasible(Witness {
                        infeasibility: 1.0,
                        ray: Vec::new(),
                    }))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_verify_detects_collision() {
        let mut cache = ResultCache::new(true, true);
        let objective = Cell::new(1.0);
        let compute = || {
            Ok(SubResult::Optimal {
                objective: objective.get(),
                duals: Vec::new(),
            })
        };
        cache.get_or_compute(&key(2.0), compute).unwrap();
        cache.get_or_compute(&key(2.0), compute).unwrap();
        objective.set(1.0 + f64::EPSILON);
        let err = cache.get_or_compute(&key(2.0), compute).unwrap_err();
        assert!(matches!(err, Error::CacheKeyCollision { subproblem: 0, .. }));
    }

    #[test]
    fn test_emitted_set() {
        let mut cache = ResultCache::new(true, false);
        assert!(cache.mark_emitted(&key(0.0), CutKind::Feasibility));
        assert!(!cache.mark_emitted(&key(0.0), CutKind::Feasibility));
        assert!(cache.mark_emitted(&key(0.0), CutKind::Optimality));
        assert!(cache.was_emitted(&key(0.0), CutKind::Optimality));
        assert!(!cache.was_emitted(&key(1.0), CutKind::Optimality));
    }
}
