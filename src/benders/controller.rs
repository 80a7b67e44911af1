use log::{debug, info, warn};

use crate::benders::{
    Assignment, BendersConfig, CacheKey, CacheStats, Cut, CutGenerator, CutKind, Protocol,
    ResultCache, SubResult, Subproblem, SubproblemAdapter,
};
use crate::error::{Error, Result};
use crate::lp::{
    Constraint, IncumbentDecision, Model, ObjectiveSense, Solution, SolverConfig, Status, Var,
    VarKind,
};

/// The master problem: first-stage decisions plus one surrogate per
/// subproblem.
#[derive(Debug, Clone)]
pub struct Master {
    model: Model,
    first_stage: Vec<Var>,
    surrogates: Vec<Var>,
}

impl Master {
    /// Every variable already in `model` is a first-stage decision.
    pub fn new(model: Model) -> Self {
        let first_stage = model.vars().collect();
        Self {
            model,
            first_stage,
            surrogates: Vec::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn first_stage(&self) -> &[Var] {
        &self.first_stage
    }

    pub fn surrogates(&self) -> &[Var] {
        &self.surrogates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Master solved as an LP; only optimality and Farkas cuts.
    Relaxed,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BendersStatus {
    /// An incumbent satisfied every subproblem within tolerance.
    Converged,
    /// The iteration cap was reached first.
    MaxIterExceeded,
}

#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub iteration: usize,
    pub phase: Phase,
    /// Master objective at the separated point.
    pub lower_bound: f64,
    /// Best feasible cost known after this iteration (infinite if none).
    pub upper_bound: f64,
    pub cuts_added: usize,
    pub master_constraints: usize,
    pub incumbent: Assignment,
}

#[derive(Debug, Clone)]
pub struct BendersOutcome {
    pub status: BendersStatus,
    /// Cost of the best fully feasible solution, if one was found.
    pub objective: Option<f64>,
    /// Master values of that solution, indexed by [`Var::index`].
    pub values: Vec<f64>,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub iterations: usize,
    pub cuts: Vec<Cut>,
    pub history: Vec<IterationRecord>,
    pub cache: CacheStats,
}

impl BendersOutcome {
    pub fn is_converged(&self) -> bool {
        self.status == BendersStatus::Converged
    }

    pub fn value(&self, var: Var) -> f64 {
        self.values.get(var.index()).copied().unwrap_or(f64::NAN)
    }
}

/// Result of separating one master point against every subproblem.
struct Separation {
    cuts: Vec<Cut>,
    /// Every subproblem was feasible.
    feasible: bool,
    /// An infeasible subproblem yielded no usable cut (relaxed phase only).
    stuck: bool,
}

/// Everything the loop needs except the master model itself, so the
/// incumbent callback can borrow it while the master is being solved.
struct Separator {
    subproblems: Vec<Box<dyn Subproblem>>,
    surrogates: Vec<Var>,
    first_stage: Vec<Var>,
    adapter: SubproblemAdapter,
    cache: ResultCache,
    generator: CutGenerator,
    config: BendersConfig,
    cuts: Vec<Cut>,
    history: Vec<IterationRecord>,
    best: Option<(f64, Vec<f64>)>,
}

impl Separator {
    /// Solves every subproblem at `values` and collects violated cuts.
    fn separate(
        &mut self,
        master: &Model,
        values: &[f64],
        iteration: usize,
        phase: Phase,
    ) -> Result<Separation> {
        let relaxed = phase == Phase::Relaxed;
        let tol = self.config.tolerance;
        let int_tol = self.config.solver.integrality_tolerance;
        self.adapter.set_iteration(iteration);

        let mut cuts = Vec::new();
        let mut feasible = true;
        let mut stuck = false;
        let mut recourse = 0.0;
        let mut estimate = 0.0;

        for (index, sub) in self.subproblems.iter().enumerate() {
            let key = Assignment::capture(master, sub.scope(), values, int_tol);
            let cache_key = CacheKey::new(index, key.clone());
            let adapter = &self.adapter;
            let result = self
                .cache
                .get_or_compute(&cache_key, || adapter.solve(&**sub, &key))?;

            match result {
                SubResult::Optimal { objective, duals } => {
                    let theta = self.surrogates[index];
                    let theta_hat = values[theta.index()];
                    recourse += sub.weight() * objective;
                    estimate += sub.weight() * theta_hat;
                    if theta_hat >= objective - tol * (1.0 + objective.abs())
                        || self.cache.was_emitted(&cache_key, CutKind::Optimality)
                    {
                        continue;
                    }
                    let cut = self.generator.optimality_cut(
                        index,
                        theta,
                        &key,
                        objective,
                        &duals,
                        sub.linking(),
                    )?;
                    if let Some(cut) = cut {
                        self.cache.mark_emitted(&cache_key, CutKind::Optimality);
                        cuts.push(cut);
                    }
                }
                SubResult::Infeasible(witness) => {
                    feasible = false;
                    debug!(
                        "subproblem {} (`{}`) infeasible at {} (w = {:e})",
                        index,
                        sub.name(),
                        key,
                        witness.infeasibility
                    );
                    if self.cache.was_emitted(&cache_key, CutKind::Feasibility) {
                        // The earlier cut should have removed this key.
                        return Err(Error::CutSoundnessViolation {
                            subproblem: index,
                            kind: CutKind::Feasibility,
                            residual: 0.0,
                        });
                    }
                    let cut = self.generator.feasibility_cut(
                        index,
                        &**sub,
                        &key,
                        &witness,
                        &self.adapter,
                        relaxed,
                    )?;
                    match cut {
                        Some(cut) => {
                            self.cache.mark_emitted(&cache_key, CutKind::Feasibility);
                            cuts.push(cut);
                        }
                        None if relaxed => stuck = true,
                        None => {
                            return Err(Error::InvalidModel(format!(
                                "no valid feasibility cut for subproblem `{}` at {}",
                                sub.name(),
                                key
                            )))
                        }
                    }
                }
            }
        }

        if feasible && !relaxed {
            let cost = master.evaluate_objective(values) - estimate + recourse;
            let improves = self.best.as_ref().map_or(true, |(ub, _)| cost < *ub);
            if improves {
                debug!("new upper bound {} at iteration {}", cost, iteration);
                self.best = Some((cost, values.to_vec()));
            }
        }

        Ok(Separation {
            cuts,
            feasible,
            stuck,
        })
    }

    fn upper_bound(&self) -> f64 {
        self.best.as_ref().map_or(f64::INFINITY, |(ub, _)| *ub)
    }

    /// Logs and records one iteration, then returns the cuts as named master
    /// constraints ready to be added.
    fn commit(
        &mut self,
        iteration: usize,
        phase: Phase,
        lower_bound: f64,
        master_constraints: usize,
        values: &[f64],
        cuts: Vec<Cut>,
    ) -> Vec<Constraint> {
        let constraints: Vec<_> = cuts
            .iter()
            .enumerate()
            .map(|(i, cut)| {
                cut.to_constraint(format!(
                    "benders_{}_{}_{}",
                    cut.kind,
                    cut.subproblem,
                    self.cuts.len() + i
                ))
            })
            .collect();
        let upper_bound = self.upper_bound();
        info!(
            "iteration {} ({:?}): lower bound {:.6}, upper bound {:.6}, {} cuts",
            iteration,
            phase,
            lower_bound,
            upper_bound,
            cuts.len()
        );
        self.history.push(IterationRecord {
            iteration,
            phase,
            lower_bound,
            upper_bound,
            cuts_added: cuts.len(),
            master_constraints: master_constraints + cuts.len(),
            incumbent: Assignment::new(
                self.first_stage
                    .iter()
                    .map(|&v| (v, values.get(v.index()).copied().unwrap_or(f64::NAN))),
            ),
        });
        self.cuts.extend(cuts);
        constraints
    }
}

/// Drives the master/subproblem loop.
///
/// # Example
/// ```
/// use benders::benders::{BendersConfig, Controller};
/// use benders::problems::dakota::Dakota;
///
/// let dakota = Dakota::default();
/// let mut controller = dakota.controller(BendersConfig::default()).unwrap();
/// let outcome = controller.solve().unwrap();
/// assert!(outcome.is_converged());
/// ```
pub struct Controller {
    master: Master,
    separator: Separator,
}

impl Controller {
    /// Wraps a master model whose variables are all first-stage decisions.
    /// The master must minimise.
    pub fn new(model: Model, config: BendersConfig) -> Result<Self> {
        if model.objective_sense() != ObjectiveSense::Minimize {
            return Err(Error::InvalidModel(format!(
                "master `{}` must minimise",
                model.name()
            )));
        }
        let master = Master::new(model);
        let separator = Separator {
            subproblems: Vec::new(),
            surrogates: Vec::new(),
            first_stage: master.first_stage.clone(),
            adapter: SubproblemAdapter::new(config.solver.clone()),
            cache: ResultCache::new(config.use_cache, config.verify_cache),
            generator: CutGenerator::new(
                config.tolerance,
                config.solver.feasibility_tolerance,
                config.feasibility_cuts,
            ),
            config,
            cuts: Vec::new(),
            history: Vec::new(),
            best: None,
        };
        Ok(Self { master, separator })
    }

    /// Registers a subproblem and adds its weighted surrogate to the master
    /// objective. Returns the surrogate.
    pub fn add_subproblem(&mut self, sub: Box<dyn Subproblem>) -> Result<Var> {
        let index = self.separator.subproblems.len();
        if let Some(&stray) = sub
            .scope()
            .iter()
            .find(|v| !self.master.first_stage.contains(v))
        {
            return Err(Error::InvalidKey {
                subproblem: index,
                var: stray.index(),
            });
        }
        let lower = sub.lower_bound();
        if !lower.is_finite() {
            return Err(Error::InvalidModel(format!(
                "subproblem `{}` needs a finite lower bound",
                sub.name()
            )));
        }
        let theta = self.master.model.add_variable(
            VarKind::Continuous,
            lower,
            f64::INFINITY,
            format!("theta[{}]", sub.name()),
        );
        self.master.model.add_objective_term(theta, sub.weight());
        self.master.surrogates.push(theta);
        self.separator.surrogates.push(theta);
        self.separator.subproblems.push(sub);
        Ok(theta)
    }

    pub fn master(&self) -> &Master {
        &self.master
    }

    /// Mutable access for side constraints added before [`Controller::solve`].
    pub fn master_model_mut(&mut self) -> &mut Model {
        &mut self.master.model
    }

    pub fn num_subproblems(&self) -> usize {
        self.separator.subproblems.len()
    }

    pub fn cuts(&self) -> &[Cut] {
        &self.separator.cuts
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.separator.cache.stats()
    }

    /// Runs the loop under the configured protocol, preceded by the relaxed
    /// phase when enabled.
    pub fn solve(&mut self) -> Result<BendersOutcome> {
        let mut iteration = 0;
        if self.separator.config.relaxed_phase && self.master.model.has_integral_vars() {
            self.master.model.relax();
            let relaxed = self.run_relaxed(&mut iteration);
            self.master.model.restore_domains();
            relaxed?;
        }
        match self.separator.config.protocol {
            Protocol::Iterative => self.run_iterative(iteration),
            Protocol::LazyCallback => self.run_lazy(iteration),
        }
    }

    fn solve_master(&self, iteration: usize) -> Result<Solution> {
        let sol = self.master.model.solve(&self.separator.config.solver)?;
        match sol.status {
            Status::Optimal => Ok(sol),
            Status::Infeasible => Err(Error::ModelInfeasible {
                model: self.master.model.name().to_string(),
                iteration,
            }),
            status => Err(Error::SolverNumerical {
                model: self.master.model.name().to_string(),
                iteration,
                status,
            }),
        }
    }

    fn add_cuts(&mut self, constraints: Vec<Constraint>) {
        for constraint in constraints {
            self.master.model.push_constraint(constraint);
        }
    }

    fn run_relaxed(&mut self, iteration: &mut usize) -> Result<()> {
        let cap = self.separator.config.relaxed_max_iterations;
        for _ in 0..cap {
            *iteration += 1;
            let sol = self.solve_master(*iteration)?;
            let sep =
                self.separator
                    .separate(&self.master.model, &sol.values, *iteration, Phase::Relaxed)?;
            let done = sep.cuts.is_empty() || sep.stuck;
            let constraints = self.separator.commit(
                *iteration,
                Phase::Relaxed,
                sol.objective,
                self.master.model.num_constraints(),
                &sol.values,
                sep.cuts,
            );
            self.add_cuts(constraints);
            if done {
                info!("relaxed phase finished after {} iterations", iteration);
                return Ok(());
            }
        }
        info!("relaxed phase hit its cap of {} iterations", cap);
        Ok(())
    }

    fn run_iterative(&mut self, start: usize) -> Result<BendersOutcome> {
        let max = self.separator.config.max_iterations;
        let mut lower_bound = f64::NEG_INFINITY;
        for iteration in start + 1..=start + max {
            let sol = self.solve_master(iteration)?;
            lower_bound = sol.objective;
            let sep =
                self.separator
                    .separate(&self.master.model, &sol.values, iteration, Phase::Integer)?;
            if sep.cuts.is_empty() && !sep.feasible {
                return Err(Error::InvalidModel(format!(
                    "master point of iteration {} is infeasible but produced no cut",
                    iteration
                )));
            }
            let converged = sep.cuts.is_empty();
            let constraints = self.separator.commit(
                iteration,
                Phase::Integer,
                sol.objective,
                self.master.model.num_constraints(),
                &sol.values,
                sep.cuts,
            );
            self.add_cuts(constraints);
            if converged {
                return Ok(self.outcome(BendersStatus::Converged, lower_bound, iteration));
            }
        }
        warn!("Benders loop stopped after {} iterations", max);
        Ok(self.outcome(BendersStatus::MaxIterExceeded, lower_bound, start + max))
    }

    fn run_lazy(&mut self, start: usize) -> Result<BendersOutcome> {
        let max = self.separator.config.max_iterations;
        let solver: SolverConfig = self.separator.config.solver.clone();
        // Kinds and objective do not change during the search; only the
        // constraint count does, and that is tracked through the cuts.
        let snapshot = self.master.model.clone();
        let base = snapshot.num_constraints();
        let base_cuts = self.separator.cuts.len();
        let mut iteration = start;
        let mut aborted = false;

        let Controller { master, separator } = self;
        let sol = master.model.solve_with_incumbent_callback(&solver, |inc| {
            if iteration >= start + max {
                aborted = true;
                return Ok(IncumbentDecision::Abort);
            }
            iteration += 1;
            let sep = separator.separate(&snapshot, inc.values, iteration, Phase::Integer)?;
            if sep.cuts.is_empty() && !sep.feasible {
                return Err(Error::InvalidModel(format!(
                    "incumbent at node {} is infeasible but produced no cut",
                    inc.node
                )));
            }
            let added = separator.cuts.len() - base_cuts;
            let constraints = separator.commit(
                iteration,
                Phase::Integer,
                inc.objective,
                base + added,
                inc.values,
                sep.cuts,
            );
            if constraints.is_empty() {
                Ok(IncumbentDecision::Accept)
            } else {
                Ok(IncumbentDecision::Cut(constraints))
            }
        })?;

        let model_name = self.master.model.name().to_string();
        // Bound of the last incumbent the callback saw.
        let last_bound = self
            .separator
            .history
            .last()
            .map_or(f64::NEG_INFINITY, |record| record.lower_bound);
        match sol.status {
            Status::Optimal => Ok(self.outcome(BendersStatus::Converged, sol.objective, iteration)),
            Status::Interrupted if aborted => {
                warn!("lazy Benders search stopped after {} incumbents", iteration - start);
                Ok(self.outcome(BendersStatus::MaxIterExceeded, last_bound, iteration))
            }
            // node limit with an incumbent
            Status::Feasible => {
                warn!("master search hit its node limit");
                Ok(self.outcome(BendersStatus::MaxIterExceeded, last_bound, iteration))
            }
            Status::Infeasible => Err(Error::ModelInfeasible {
                model: model_name,
                iteration,
            }),
            status => Err(Error::SolverNumerical {
                model: model_name,
                iteration,
                status,
            }),
        }
    }

    fn outcome(&self, status: BendersStatus, lower_bound: f64, iterations: usize) -> BendersOutcome {
        let separator = &self.separator;
        let (objective, values) = match &separator.best {
            Some((ub, values)) => (Some(*ub), values.clone()),
            None => (None, Vec::new()),
        };
        info!(
            "Benders {:?} after {} iterations: {} cuts, cache {:?}",
            status,
            iterations,
            separator.cuts.len(),
            separator.cache.stats()
        );
        BendersOutcome {
            status,
            objective,
            values,
            lower_bound,
            upper_bound: separator.upper_bound(),
            iterations,
            cuts: separator.cuts.clone(),
            history: separator.history.clone(),
            cache: separator.cache.stats(),
        }
    }
}
