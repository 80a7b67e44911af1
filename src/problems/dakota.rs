//! The Dakota furniture problem as a two-stage stochastic LP.
//!
//! Resources (lumber, finishing and carpentry hours) are bought before demand
//! is known; desks, tables and chairs are then produced and sold per demand
//! scenario. Each scenario is one subproblem weighted by its probability, and
//! every scenario is feasible for any purchase, so only optimality cuts arise.

use crate::benders::{
    Assignment, BendersConfig, Controller, LinkingRow, Subproblem, SubproblemModel,
};
use crate::error::{Error, Result};
use crate::lp::{
    LinearExpr, Model, ObjectiveSense, Sense, Solution, SolverConfig, Status, Var, VarKind, VarMap,
};

#[derive(Debug, Clone)]
pub struct Dakota {
    /// Unit cost per resource
    pub costs: Vec<f64>,
    /// `consumption[r][p]`: units of resource `r` used by one unit of product `p`
    pub consumption: Vec<Vec<f64>>,
    /// Sale price per product
    pub prices: Vec<f64>,
    /// `demand[p][s]`: demand for product `p` in scenario `s`
    pub demand: Vec<Vec<f64>>,
    pub probabilities: Vec<f64>,
}

impl Default for Dakota {
    fn default() -> Self {
        Self {
            costs: vec![2.0, 4.0, 5.2],
            consumption: vec![
                vec![8.0, 6.0, 1.0],
                vec![4.0, 2.0, 1.5],
                vec![2.0, 1.5, 0.5],
            ],
            prices: vec![60.0, 40.0, 10.0],
            demand: vec![
                vec![50.0, 150.0, 250.0],
                vec![20.0, 110.0, 250.0],
                vec![200.0, 225.0, 500.0],
            ],
            probabilities: vec![0.3, 0.4, 0.3],
        }
    }
}

/// Production and sales once purchases and demand are known.
struct Scenario {
    name: String,
    scope: Vec<Var>,
    linking: Vec<LinkingRow>,
    consumption: Vec<Vec<f64>>,
    prices: Vec<f64>,
    demand: Vec<f64>,
    probability: f64,
    index: usize,
}

impl Subproblem for Scenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> &[Var] {
        &self.scope
    }

    fn linking(&self) -> &[LinkingRow] {
        &self.linking
    }

    fn build(&self, key: &Assignment) -> Result<SubproblemModel> {
        let mut model = Model::new(self.name.clone());
        let sell: Vec<Var> = self
            .demand
            .iter()
            .enumerate()
            .map(|(p, &d)| {
                model.add_variable(VarKind::Continuous, 0.0, d, format!("y[{}]", p))
            })
            .collect();

        let mut linking = Vec::with_capacity(self.linking.len());
        for (r, row) in self.linking.iter().enumerate() {
            let available = row.value(key).ok_or_else(|| Error::InvalidKey {
                subproblem: self.index,
                var: self.scope[r].index(),
            })?;
            let usage: LinearExpr = sell
                .iter()
                .zip(&self.consumption[r])
                .map(|(&y, &a)| (y, a))
                .collect();
            linking.push(model.add_constraint(
                usage,
                Sense::Le,
                available,
                format!("resource[{}]", r),
            ));
        }

        let revenue: LinearExpr = sell
            .iter()
            .zip(&self.prices)
            .map(|(&y, &c)| (y, -c))
            .collect();
        model.set_objective(revenue, ObjectiveSense::Minimize);
        Ok(SubproblemModel { model, linking })
    }

    fn weight(&self) -> f64 {
        self.probability
    }

    /// Selling the whole demand is the best any purchase can do.
    fn lower_bound(&self) -> f64 {
        -self
            .demand
            .iter()
            .zip(&self.prices)
            .map(|(d, c)| d * c)
            .sum::<f64>()
    }
}

impl Dakota {
    pub fn num_resources(&self) -> usize {
        self.costs.len()
    }

    pub fn num_products(&self) -> usize {
        self.prices.len()
    }

    pub fn num_scenarios(&self) -> usize {
        self.probabilities.len()
    }

    fn validate(&self) -> Result<()> {
        let (r, p, s) = (
            self.num_resources(),
            self.num_products(),
            self.num_scenarios(),
        );
        let shaped = self.consumption.len() == r
            && self.consumption.iter().all(|row| row.len() == p)
            && self.demand.len() == p
            && self.demand.iter().all(|row| row.len() == s);
        if !shaped {
            return Err(Error::InvalidModel(
                "dakota: inconsistent data dimensions".to_string(),
            ));
        }
        Ok(())
    }

    /// Purchase decisions with their cost; the scenarios come in as surrogates.
    fn purchase_model(&self, name: &str) -> (Model, Vec<Var>) {
        let mut model = Model::new(name);
        let buy: Vec<Var> = (0..self.num_resources())
            .map(|r| {
                model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, format!("x[{}]", r))
            })
            .collect();
        let cost: LinearExpr = buy.iter().zip(&self.costs).map(|(&x, &c)| (x, c)).collect();
        model.set_objective(cost, ObjectiveSense::Minimize);
        (model, buy)
    }

    /// A controller over the purchase decisions with one subproblem per
    /// scenario. The purchase variables are the master's first-stage variables,
    /// in resource order.
    pub fn controller(&self, config: BendersConfig) -> Result<Controller> {
        self.validate()?;
        let (model, buy) = self.purchase_model("dakota_master");
        let mut controller = Controller::new(model, config)?;
        for s in 0..self.num_scenarios() {
            controller.add_subproblem(Box::new(Scenario {
                name: format!("dakota_scenario_{}", s),
                scope: buy.clone(),
                linking: buy.iter().map(|&x| LinkingRow::scaled(x, 1.0)).collect(),
                consumption: self.consumption.clone(),
                prices: self.prices.clone(),
                demand: self.demand.iter().map(|row| row[s]).collect(),
                probability: self.probabilities[s],
                index: s,
            }))?;
        }
        Ok(controller)
    }

    /// The deterministic equivalent: purchases plus per-scenario sales in one LP.
    pub fn monolithic(&self) -> Result<(Model, Vec<Var>)> {
        self.validate()?;
        let (mut model, buy) = self.purchase_model("dakota_monolithic");
        let (p_count, s_count) = (self.num_products(), self.num_scenarios());
        let domain = (0..p_count).flat_map(|p| (0..s_count).map(move |s| (p, s)));
        let sell = VarMap::build(&mut model, "y", domain, |&(p, s)| {
            (VarKind::Continuous, 0.0, self.demand[p][s])
        })?;

        for s in 0..s_count {
            for (r, &x) in buy.iter().enumerate() {
                let mut usage = LinearExpr::term(x, -1.0);
                for p in 0..p_count {
                    usage.add_term(sell.get(&(p, s))?, self.consumption[r][p]);
                }
                model.add_constraint(usage, Sense::Le, 0.0, format!("resource[{},{}]", r, s));
            }
        }
        for (&(p, s), y) in sell.iter() {
            model.add_objective_term(y, -self.probabilities[s] * self.prices[p]);
        }
        Ok((model, buy))
    }

    /// Solves the deterministic equivalent to optimality.
    pub fn solve_monolithic(&self, config: &SolverConfig) -> Result<Solution> {
        let (model, _) = self.monolithic()?;
        let sol = model.solve(config)?;
        if sol.status != Status::Optimal {
            return Err(Error::SolverNumerical {
                model: model.name().to_string(),
                iteration: 0,
                status: sol.status,
            });
        }
        Ok(sol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scenario_lower_bound() {
        let dakota = Dakota::default();
        let controller = dakota.controller(BendersConfig::default()).unwrap();
        assert_eq!(controller.num_subproblems(), 3);
        // high demand: 60 * 250 + 40 * 250 + 10 * 500
        let theta = controller.master().surrogates()[2];
        assert_eq!(controller.master().model().bounds(theta).0, -30_000.0);
    }

    #[test]
    fn test_monolithic_matches_textbook_profit() {
        let (model, _) = Dakota::default().monolithic().unwrap();
        let sol = model.solve(&SolverConfig::default()).unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!(model.is_feasible(&sol.values, 1e-6));
        assert_relative_eq!(-sol.objective, 1730.0, max_relative = 1e-6);
    }

    #[test]
    fn test_bad_dimensions_are_rejected() {
        let mut dakota = Dakota::default();
        dakota.demand.pop();
        assert!(matches!(
            dakota.controller(BendersConfig::default()),
            Err(Error::InvalidModel(_))
        ));
    }
}
