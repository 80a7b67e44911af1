use log::{debug, trace};

use crate::error::Result;
use crate::lp::simplex;
use crate::lp::{
    Constraint, Incumbent, IncumbentDecision, Model, ObjectiveSense, Solution, SolverConfig,
    Status,
};

/// Signature of the incumbent callback threaded through the search.
pub type IncumbentCallback<'a> = dyn FnMut(&Incumbent<'_>) -> Result<IncumbentDecision> + 'a;

struct Node {
    bounds: Vec<(f64, f64)>,
    depth: usize,
}

/// Depth-first branch-and-bound over the integral variables of `model`.
///
/// Nodes carry tightened variable bounds rather than extra rows. When a node
/// LP comes back integral, `callback` (if any) decides whether it becomes the
/// incumbent; constraints it returns are pushed onto `lazy`, apply to every
/// later node and trigger a re-solve of the current one. Nodes pruned before
/// a lazy constraint arrived stay pruned, which is sound because constraints
/// only ever raise node bounds.
///
/// # Returns
/// * `Status::Optimal` when the tree is exhausted with an incumbent
/// * `Status::Infeasible` when it is exhausted without one
/// * `Status::Feasible` / `Status::Error` when the node limit stops the search
///   with / without an incumbent
/// * `Status::Interrupted` when the callback aborts
pub fn search(
    model: &Model,
    lazy: &mut Vec<Constraint>,
    config: &SolverConfig,
    mut callback: Option<&mut IncumbentCallback<'_>>,
) -> Result<Solution> {
    // Compare everything in minimisation terms.
    let sign = match model.objective_sense() {
        ObjectiveSense::Minimize => 1.0,
        ObjectiveSense::Maximize => -1.0,
    };
    let int_tol = config.integrality_tolerance;

    let root: Vec<(f64, f64)> = model
        .vars()
        .map(|v| {
            let (lo, hi) = model.bounds(v);
            if model.is_integral(v) {
                ((lo - int_tol).ceil(), (hi + int_tol).floor())
            } else {
                (lo, hi)
            }
        })
        .collect();

    let mut stack = vec![Node {
        bounds: root,
        depth: 0,
    }];
    let mut incumbent: Option<Solution> = None;
    let mut best = f64::INFINITY;
    let mut nodes = 0;
    let mut lazy_added = 0;
    let mut node_limit_hit = false;
    let mut interrupted = false;

    'tree: while let Some(node) = stack.pop() {
        if nodes >= config.max_nodes {
            node_limit_hit = true;
            break;
        }
        nodes += 1;

        loop {
            let relaxation = simplex::solve(model, lazy, &node.bounds, config)?;
            match relaxation.status {
                Status::Optimal => {}
                Status::Infeasible => break,
                Status::Unbounded => {
                    debug!("`{}`: unbounded relaxation at node {}", model.name(), nodes);
                    let mut sol = Solution::without_point(Status::Unbounded);
                    sol.nodes = nodes;
                    sol.lazy_constraints = lazy_added;
                    return Ok(sol);
                }
                _ => {
                    debug!("`{}`: simplex failed at node {}", model.name(), nodes);
                    let mut sol = Solution::without_point(Status::Error);
                    sol.nodes = nodes;
                    sol.lazy_constraints = lazy_added;
                    return Ok(sol);
                }
            }

            let bound = sign * relaxation.objective;
            if bound >= best - prune_margin(best) {
                trace!("node {} pruned by bound {}", nodes, relaxation.objective);
                break;
            }

            let fractional = model
                .vars()
                .filter(|&v| model.is_integral(v))
                .map(|v| {
                    let x = relaxation.values[v.index()];
                    (v.index(), x, (x - x.round()).abs())
                })
                .filter(|&(_, _, frac)| frac > int_tol)
                .max_by(|a, b| a.2.total_cmp(&b.2));

            if let Some((j, x, _)) = fractional {
                let (lo, hi) = node.bounds[j];
                let mut down = node.bounds.clone();
                down[j] = (lo, x.floor());
                let mut up = node.bounds.clone();
                up[j] = (x.ceil(), hi);
                let depth = node.depth + 1;
                // The child nearer the LP value is explored first.
                if x - x.floor() < 0.5 {
                    stack.push(Node { bounds: up, depth });
                    stack.push(Node { bounds: down, depth });
                } else {
                    stack.push(Node { bounds: down, depth });
                    stack.push(Node { bounds: up, depth });
                }
                break;
            }

            let mut candidate = relaxation;
            for v in model.vars().filter(|&v| model.is_integral(v)) {
                let x = &mut candidate.values[v.index()];
                *x = x.round();
            }
            candidate.objective = model.evaluate_objective(&candidate.values);

            let decision = match callback.as_deref_mut() {
                Some(cb) => cb(&Incumbent {
                    values: &candidate.values,
                    objective: candidate.objective,
                    node: nodes,
                })?,
                None => IncumbentDecision::Accept,
            };
            match decision {
                IncumbentDecision::Cut(cuts) if !cuts.is_empty() => {
                    trace!("node {}: {} lazy constraints", nodes, cuts.len());
                    lazy_added += cuts.len();
                    lazy.extend(cuts);
                    continue;
                }
                IncumbentDecision::Abort => {
                    interrupted = true;
                    break 'tree;
                }
                _ => {
                    debug!(
                        "`{}`: new incumbent {} at node {} (depth {})",
                        model.name(),
                        candidate.objective,
                        nodes,
                        node.depth
                    );
                    best = sign * candidate.objective;
                    incumbent = Some(candidate);
                    break;
                }
            }
        }
    }

    let status = match (&incumbent, interrupted, node_limit_hit) {
        (_, true, _) => Status::Interrupted,
        (Some(_), false, true) => Status::Feasible,
        (None, false, true) => Status::Error,
        (Some(_), false, false) => Status::Optimal,
        (None, false, false) => Status::Infeasible,
    };
    let mut sol = incumbent.unwrap_or_else(|| Solution::without_point(status));
    sol.status = status;
    sol.nodes = nodes;
    sol.lazy_constraints = lazy_added;
    Ok(sol)
}

fn prune_margin(best: f64) -> f64 {
    if best.is_finite() {
        1e-9 * (1.0 + best.abs())
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::{LinearExpr, Sense, VarKind};
    use approx::assert_abs_diff_eq;

    fn knapsack() -> Model {
        // maximize 5a + 4b + 3c subject to 2a + 3b + c <= 5, 4a + b + 2c <= 11, 3a + 4b + 2c <= 8
        let mut model = Model::new("knapsack");
        let a = model.add_variable(VarKind::Integer, 0.0, f64::INFINITY, "a");
        let b = model.add_variable(VarKind::Integer, 0.0, f64::INFINITY, "b");
        let c = model.add_variable(VarKind::Integer, 0.0, f64::INFINITY, "c");
        model.add_constraint(
            LinearExpr::from_iter([(a, 2.0), (b, 3.0), (c, 1.0)]),
            Sense::Le,
            5.0,
            "r1",
        );
        model.add_constraint(
            LinearExpr::from_iter([(a, 4.0), (b, 1.0), (c, 2.0)]),
            Sense::Le,
            11.0,
            "r2",
        );
        model.add_constraint(
            LinearExpr::from_iter([(a, 3.0), (b, 4.0), (c, 2.0)]),
            Sense::Le,
            8.0,
            "r3",
        );
        model.set_objective(
            LinearExpr::from_iter([(a, 5.0), (b, 4.0), (c, 3.0)]),
            ObjectiveSense::Maximize,
        );
        model
    }

    #[test]
    fn test_simple_ilp() {
        // maximize x + y subject to 2x + 2y <= 9, x, y integer
        let mut model = Model::new("simple");
        let x = model.add_variable(VarKind::Integer, 0.0, f64::INFINITY, "x");
        let y = model.add_variable(VarKind::Integer, 0.0, f64::INFINITY, "y");
        model.add_constraint(
            LinearExpr::from_iter([(x, 2.0), (y, 2.0)]),
            Sense::Le,
            9.0,
            "cap",
        );
        model.set_objective(LinearExpr::sum([x, y]), ObjectiveSense::Maximize);

        let sol = model.solve(&SolverConfig::default()).unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert_abs_diff_eq!(sol.objective, 4.0, epsilon = 1e-9);
        for v in [x, y] {
            assert_eq!(sol.value(v), sol.value(v).round());
        }
    }

    #[test]
    fn test_knapsack_optimum() {
        let sol = knapsack().solve(&SolverConfig::default()).unwrap();
        assert_eq!(sol.status, Status::Optimal);
        // a = 2, b = 0, c = 1
        assert_abs_diff_eq!(sol.objective, 13.0, epsilon = 1e-9);
    }

    #[test]
    fn test_infeasible_ilp() {
        // 2x = 3 has no integral solution
        let mut model = Model::new("parity");
        let x = model.add_variable(VarKind::Integer, 0.0, 10.0, "x");
        model.add_constraint(LinearExpr::term(x, 2.0), Sense::Eq, 3.0, "odd");
        model.set_objective(LinearExpr::from(x), ObjectiveSense::Minimize);
        let sol = model.solve(&SolverConfig::default()).unwrap();
        assert_eq!(sol.status, Status::Infeasible);
    }

    #[test]
    fn test_lazy_constraints_reshape_the_search() {
        // The callback forbids a + b + c >= 3 lazily; the optimum must respect it.
        let mut model = knapsack();
        let vars: Vec<_> = model.vars().collect();
        let before = model.num_constraints();
        let mut calls = 0;
        let sol = model
            .solve_with_incumbent_callback(&SolverConfig::default(), |inc| {
                calls += 1;
                let total: f64 = vars.iter().map(|v| inc.values[v.index()]).sum();
                if total >= 3.0 - 1e-9 {
                    Ok(IncumbentDecision::Cut(vec![Constraint::new(
                        LinearExpr::sum(vars.iter().copied()),
                        Sense::Le,
                        2.0,
                        "lazy_total",
                    )]))
                } else {
                    Ok(IncumbentDecision::Accept)
                }
            })
            .unwrap();

        assert_eq!(sol.status, Status::Optimal);
        assert!(calls >= 1);
        let total: f64 = vars.iter().map(|&v| sol.value(v)).sum();
        assert!(total <= 2.0 + 1e-9);
        // a = 2 is still possible under the lazy row.
        assert_abs_diff_eq!(sol.objective, 10.0, epsilon = 1e-9);
        assert_eq!(model.num_constraints(), before + sol.lazy_constraints);
        assert!(sol.lazy_constraints >= 1);
    }

    #[test]
    fn test_abort_stops_the_search() {
        let mut model = knapsack();
        let before = model.num_constraints();
        let sol = model
            .solve_with_incumbent_callback(&SolverConfig::default(), |_| {
                Ok(IncumbentDecision::Abort)
            })
            .unwrap();
        assert_eq!(sol.status, Status::Interrupted);
        assert!(sol.values.is_empty());
        assert_eq!(model.num_constraints(), before);
    }
}
