use log::trace;
use ndarray::Array2;

use crate::error::Result;
use crate::lp::{Constraint, Model, ObjectiveSense, Sense, Solution, SolverConfig, Status};

/// Entries smaller than this are flushed to zero after a pivot.
const CLEAN_EPSILON: f64 = 1e-12;

enum Phase {
    Optimal,
    Unbounded,
    IterationLimit,
}

/// Structural column of the standard-form problem: `x[var] += sign * column`.
struct Column {
    var: usize,
    sign: f64,
}

/// Solves the LP relaxation of `model` (plus `lazy` rows) under the given
/// variable bounds with a dense two-phase simplex.
///
/// The problem is rewritten in standard form: finite lower bounds are shifted
/// to zero, finite upper bounds become extra rows, free variables are split.
/// Every row gets an artificial column so the final tableau exposes
/// `B^-1` and therefore the duals of all rows. Bland's rule keeps
/// degenerate problems from cycling.
///
/// # Returns
/// * `Status::Optimal` with values, objective and duals
/// * `Status::Infeasible` with Farkas multipliers and the phase-one residual
/// * `Status::Unbounded`, or `Status::Error` when the iteration limit is hit
///
/// # Complexity
/// * Time: O(k · m · (n + m)) for k pivots on an m-row, n-column problem
/// * Space: O(m · (n + m))
pub fn solve(
    model: &Model,
    lazy: &[Constraint],
    bounds: &[(f64, f64)],
    config: &SolverConfig,
) -> Result<Solution> {
    let n = model.num_vars();
    let rows: Vec<&Constraint> = model.constraints().iter().chain(lazy).collect();
    let m_c = rows.len();

    // Contradictory bounds make the LP infeasible independently of any rhs,
    // so the Farkas multipliers of the rows are all zero.
    let mut bound_gap: f64 = 0.0;
    for &(lo, hi) in bounds {
        if lo == f64::INFINITY || hi == f64::NEG_INFINITY {
            bound_gap = f64::INFINITY;
        } else if lo > hi + config.feasibility_tolerance {
            bound_gap = bound_gap.max(lo - hi);
        }
    }
    if bound_gap > 0.0 {
        let mut sol = Solution::without_point(Status::Infeasible);
        sol.farkas = vec![0.0; m_c];
        sol.infeasibility = bound_gap;
        sol.nodes = 1;
        return Ok(sol);
    }

    let mut offsets = vec![0.0; n];
    let mut columns: Vec<Column> = Vec::new();
    let mut var_columns: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut upper_rows: Vec<(usize, f64)> = Vec::new();
    for (j, &(lo, hi)) in bounds.iter().enumerate().take(n) {
        if lo.is_finite() {
            offsets[j] = lo;
            var_columns[j].push(columns.len());
            if hi.is_finite() {
                upper_rows.push((columns.len(), hi - lo));
            }
            columns.push(Column { var: j, sign: 1.0 });
        } else if hi.is_finite() {
            offsets[j] = hi;
            var_columns[j].push(columns.len());
            columns.push(Column { var: j, sign: -1.0 });
        } else {
            var_columns[j].push(columns.len());
            columns.push(Column { var: j, sign: 1.0 });
            var_columns[j].push(columns.len());
            columns.push(Column { var: j, sign: -1.0 });
        }
    }
    let n_s = columns.len();
    let m = m_c + upper_rows.len();

    // Dense rows in column space, with senses and shifted right-hand sides.
    let mut coeffs: Vec<Vec<f64>> = Vec::with_capacity(m);
    let mut senses: Vec<Sense> = Vec::with_capacity(m);
    let mut rhs: Vec<f64> = Vec::with_capacity(m);
    for c in &rows {
        let mut row = vec![0.0; n_s];
        let mut b = c.rhs - c.expr.constant_term();
        for &(var, a) in c.expr.terms() {
            let j = var.index();
            b -= a * offsets[j];
            for &col in &var_columns[j] {
                row[col] += a * columns[col].sign;
            }
        }
        coeffs.push(row);
        senses.push(c.sense);
        rhs.push(b);
    }
    for &(col, width) in &upper_rows {
        let mut row = vec![0.0; n_s];
        row[col] = 1.0;
        coeffs.push(row);
        senses.push(Sense::Le);
        rhs.push(width);
    }

    let mut sigma = vec![1.0; m];
    for i in 0..m {
        if rhs[i] < 0.0 {
            sigma[i] = -1.0;
            rhs[i] = -rhs[i];
            senses[i] = senses[i].flipped();
            for a in coeffs[i].iter_mut() {
                *a = -*a;
            }
        }
    }

    let n_slack = senses.iter().filter(|&&s| s != Sense::Eq).count();
    let art0 = n_s + n_slack;
    let total = art0 + m;
    let mut tableau = Array2::<f64>::zeros((m + 1, total + 1));
    let mut basis = vec![0usize; m];
    let mut next_slack = n_s;
    for i in 0..m {
        for (j, &a) in coeffs[i].iter().enumerate() {
            tableau[[i + 1, j]] = a;
        }
        tableau[[i + 1, art0 + i]] = 1.0;
        tableau[[i + 1, total]] = rhs[i];
        basis[i] = art0 + i;
        match senses[i] {
            Sense::Le => {
                tableau[[i + 1, next_slack]] = 1.0;
                basis[i] = next_slack;
                next_slack += 1;
            }
            Sense::Ge => {
                tableau[[i + 1, next_slack]] = -1.0;
                next_slack += 1;
            }
            Sense::Eq => {}
        }
    }

    let mut iterations = 0;

    // Phase one: minimise the sum of artificials.
    let mut phase_one_costs = vec![0.0; total];
    for cost in phase_one_costs.iter_mut().skip(art0) {
        *cost = 1.0;
    }
    set_objective_row(&mut tableau, &basis, &phase_one_costs);
    match run(&mut tableau, &mut basis, total, config, &mut iterations) {
        Phase::Optimal => {}
        // The phase-one objective is bounded below by zero.
        Phase::Unbounded | Phase::IterationLimit => {
            return Ok(limit_solution(iterations));
        }
    }

    let residual = -tableau[[0, total]];
    if residual > config.feasibility_tolerance {
        let farkas = (0..m_c)
            .map(|i| sigma[i] * (1.0 - tableau[[0, art0 + i]]))
            .collect();
        trace!(
            "`{}` infeasible after {} pivots (residual {:e})",
            model.name(),
            iterations,
            residual
        );
        let mut sol = Solution::without_point(Status::Infeasible);
        sol.farkas = farkas;
        sol.infeasibility = residual;
        sol.nodes = 1;
        return Ok(sol);
    }

    // Push zero-valued artificials out of the basis where possible. Rows
    // where this fails are redundant and keep their artificial at zero.
    for i in 0..m {
        if basis[i] >= art0 {
            if let Some(j) = (0..art0).find(|&j| tableau[[i + 1, j]].abs() > config.tolerance) {
                pivot(&mut tableau, i + 1, j);
                basis[i] = j;
            }
        }
    }

    // Phase two on the real objective, artificials barred from entering.
    let objective_sign = match model.objective_sense() {
        ObjectiveSense::Minimize => 1.0,
        ObjectiveSense::Maximize => -1.0,
    };
    let objective = model.objective().normalized();
    let mut var_costs = vec![0.0; n];
    for &(var, c) in objective.terms() {
        var_costs[var.index()] += c;
    }
    let mut costs = vec![0.0; total];
    for (col, column) in columns.iter().enumerate() {
        costs[col] = objective_sign * var_costs[column.var] * column.sign;
    }
    set_objective_row(&mut tableau, &basis, &costs);
    match run(&mut tableau, &mut basis, art0, config, &mut iterations) {
        Phase::Optimal => {}
        Phase::Unbounded => {
            let mut sol = Solution::without_point(Status::Unbounded);
            sol.nodes = 1;
            return Ok(sol);
        }
        Phase::IterationLimit => return Ok(limit_solution(iterations)),
    }

    let mut column_values = vec![0.0; total];
    for (i, &b) in basis.iter().enumerate() {
        column_values[b] = tableau[[i + 1, total]];
    }
    let mut values = offsets;
    for (col, column) in columns.iter().enumerate() {
        values[column.var] += column.sign * column_values[col];
    }
    let duals = (0..m_c)
        .map(|i| -objective_sign * sigma[i] * tableau[[0, art0 + i]])
        .map(|d| if d.abs() < CLEAN_EPSILON { 0.0 } else { d })
        .collect();

    trace!("`{}` optimal after {} pivots", model.name(), iterations);
    Ok(Solution {
        status: Status::Optimal,
        objective: model.evaluate_objective(&values),
        values,
        duals,
        farkas: Vec::new(),
        infeasibility: 0.0,
        nodes: 1,
        lazy_constraints: 0,
    })
}

fn limit_solution(iterations: usize) -> Solution {
    trace!("simplex stopped after {} pivots", iterations);
    let mut sol = Solution::without_point(Status::Error);
    sol.nodes = 1;
    sol
}

/// Rebuilds row 0 as reduced costs `c_j - c_B B^-1 A_j` and `-c_B x_B`.
fn set_objective_row(tableau: &mut Array2<f64>, basis: &[usize], costs: &[f64]) {
    let cols = tableau.ncols();
    for j in 0..cols {
        let mut value = if j < costs.len() { costs[j] } else { 0.0 };
        for (i, &b) in basis.iter().enumerate() {
            value -= costs[b] * tableau[[i + 1, j]];
        }
        tableau[[0, j]] = value;
    }
}

/// Bland's-rule pivoting over columns `0..allowed`.
fn run(
    tableau: &mut Array2<f64>,
    basis: &mut [usize],
    allowed: usize,
    config: &SolverConfig,
    iterations: &mut usize,
) -> Phase {
    let rhs_col = tableau.ncols() - 1;
    loop {
        let entering = match (0..allowed).find(|&j| tableau[[0, j]] < -config.tolerance) {
            Some(j) => j,
            None => return Phase::Optimal,
        };

        let mut leaving: Option<(usize, f64)> = None;
        for (i, &b) in basis.iter().enumerate() {
            let a = tableau[[i + 1, entering]];
            if a > config.tolerance {
                let ratio = tableau[[i + 1, rhs_col]].max(0.0) / a;
                leaving = match leaving {
                    None => Some((i, ratio)),
                    Some((r, best)) => {
                        if ratio < best - CLEAN_EPSILON
                            || (ratio <= best + CLEAN_EPSILON && b < basis[r])
                        {
                            Some((i, ratio))
                        } else {
                            Some((r, best))
                        }
                    }
                };
            }
        }
        let Some((row, _)) = leaving else {
            return Phase::Unbounded;
        };

        if *iterations >= config.max_iterations {
            return Phase::IterationLimit;
        }
        pivot(tableau, row + 1, entering);
        basis[row] = entering;
        *iterations += 1;
    }
}

fn pivot(tableau: &mut Array2<f64>, pivot_row: usize, pivot_col: usize) {
    let cols = tableau.ncols();
    let scale = 1.0 / tableau[[pivot_row, pivot_col]];
    for j in 0..cols {
        let v = tableau[[pivot_row, j]] * scale;
        tableau[[pivot_row, j]] = if v.abs() < CLEAN_EPSILON { 0.0 } else { v };
    }
    tableau[[pivot_row, pivot_col]] = 1.0;

    let pivot_values = tableau.row(pivot_row).to_owned();
    for i in 0..tableau.nrows() {
        if i == pivot_row {
            continue;
        }
        let factor = tableau[[i, pivot_col]];
        if factor == 0.0 {
            continue;
        }
        for j in 0..cols {
            let v = tableau[[i, j]] - factor * pivot_values[j];
            tableau[[i, j]] = if v.abs() < CLEAN_EPSILON { 0.0 } else { v };
        }
        tableau[[i, pivot_col]] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::{LinearExpr, VarKind};
    use approx::assert_abs_diff_eq;

    fn solve_model(model: &Model) -> Solution {
        model.solve(&SolverConfig::default()).unwrap()
    }

    #[test]
    fn test_simple_lp() {
        // minimize -x - y subject to x + y <= 1, x, y >= 0
        let mut model = Model::new("simple");
        let x = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "x");
        let y = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "y");
        let c = model.add_constraint(LinearExpr::sum([x, y]), Sense::Le, 1.0, "cap");
        model.set_objective(-LinearExpr::sum([x, y]), ObjectiveSense::Minimize);

        let sol = solve_model(&model);
        assert_eq!(sol.status, Status::Optimal);
        assert_abs_diff_eq!(sol.objective, -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.value(x) + sol.value(y), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.dual(c).unwrap(), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bounded_lp_with_duals() {
        // maximize 2x + y subject to x + y <= 2, x <= 1
        let mut model = Model::new("bounded");
        let x = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "x");
        let y = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "y");
        let total = model.add_constraint(LinearExpr::sum([x, y]), Sense::Le, 2.0, "total");
        let only_x = model.add_constraint(LinearExpr::from(x), Sense::Le, 1.0, "x_cap");
        model.set_objective(
            LinearExpr::from_iter([(x, 2.0), (y, 1.0)]),
            ObjectiveSense::Maximize,
        );

        let sol = solve_model(&model);
        assert_eq!(sol.status, Status::Optimal);
        assert_abs_diff_eq!(sol.objective, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.value(x), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.value(y), 1.0, epsilon = 1e-9);
        // One more unit of either rhs is worth exactly one unit of objective.
        assert_abs_diff_eq!(sol.dual(total).unwrap(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.dual(only_x).unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_equality_and_ge_rows() {
        // minimize x + 2y subject to x + y = 4, x >= 1, y >= 1.5, x <= 2
        let mut model = Model::new("mixed");
        let x = model.add_variable(VarKind::Continuous, f64::NEG_INFINITY, 2.0, "x");
        let y = model.add_variable(VarKind::Continuous, f64::NEG_INFINITY, f64::INFINITY, "y");
        let eq = model.add_constraint(LinearExpr::sum([x, y]), Sense::Eq, 4.0, "sum");
        model.add_constraint(LinearExpr::from(x), Sense::Ge, 1.0, "x_min");
        let y_min = model.add_constraint(LinearExpr::from(y), Sense::Ge, 1.5, "y_min");
        model.set_objective(
            LinearExpr::from_iter([(x, 1.0), (y, 2.0)]),
            ObjectiveSense::Minimize,
        );

        let sol = solve_model(&model);
        assert_eq!(sol.status, Status::Optimal);
        assert_abs_diff_eq!(sol.value(x), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.value(y), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.objective, 6.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.dual(eq).unwrap(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.dual(y_min).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_infeasible_lp_has_farkas_certificate() {
        // x + y <= 5 and x + y >= 6
        let mut model = Model::new("infeasible");
        let x = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "x");
        let y = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "y");
        let le = model.add_constraint(LinearExpr::sum([x, y]), Sense::Le, 5.0, "le");
        let ge = model.add_constraint(LinearExpr::sum([x, y]), Sense::Ge, 6.0, "ge");
        model.set_objective(LinearExpr::sum([x, y]), ObjectiveSense::Maximize);

        let sol = solve_model(&model);
        assert_eq!(sol.status, Status::Infeasible);
        assert_abs_diff_eq!(sol.infeasibility, 1.0, epsilon = 1e-9);
        let u_le = sol.farkas(le).unwrap();
        let u_ge = sol.farkas(ge).unwrap();
        // The certificate reproduces the residual at the solved rhs ...
        assert_abs_diff_eq!(u_le * 5.0 + u_ge * 6.0, 1.0, epsilon = 1e-9);
        // ... and proves the system feasible once the gap closes.
        assert!(u_le * 6.0 + u_ge * 6.0 <= 1e-9);
    }

    #[test]
    fn test_unbounded_lp() {
        let mut model = Model::new("unbounded");
        let x = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "x");
        model.add_constraint(LinearExpr::from(x), Sense::Ge, 1.0, "x_min");
        model.set_objective(LinearExpr::from(x), ObjectiveSense::Maximize);
        assert_eq!(solve_model(&model).status, Status::Unbounded);
    }

    #[test]
    fn test_degenerate_lp() {
        // minimize -x - y subject to x + y <= 1, x <= 0.5, y <= 0.5
        let mut model = Model::new("degenerate");
        let x = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "x");
        let y = model.add_variable(VarKind::Continuous, 0.0, f64::INFINITY, "y");
        model.add_constraint(LinearExpr::sum([x, y]), Sense::Le, 1.0, "sum");
        model.add_constraint(LinearExpr::from(x), Sense::Le, 0.5, "x_cap");
        model.add_constraint(LinearExpr::from(y), Sense::Le, 0.5, "y_cap");
        model.set_objective(-LinearExpr::sum([x, y]), ObjectiveSense::Minimize);

        let sol = solve_model(&model);
        assert_eq!(sol.status, Status::Optimal);
        assert_abs_diff_eq!(sol.value(x), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.value(y), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(sol.objective, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_contradictory_bounds() {
        let mut model = Model::new("bounds");
        let x = model.add_variable(VarKind::Continuous, 0.0, 1.0, "x");
        model.set_objective(LinearExpr::from(x), ObjectiveSense::Minimize);
        let sol = solve(&model, &[], &[(2.0, 1.0)], &SolverConfig::default()).unwrap();
        assert_eq!(sol.status, Status::Infeasible);
        assert_abs_diff_eq!(sol.infeasibility, 1.0, epsilon = 1e-12);
    }
}
