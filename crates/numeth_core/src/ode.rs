//! Fixed-step drivers for `dy/dx = f(x, y)`.

use crate::equation_engine::{Argument, CompiledExpression, ExpressionOde};
use crate::error::{NumethError, Result};
use crate::solvers::{EulerStages, ImprovedEuler, RkStages, RK4};
use crate::traits::Steppable;
use serde::{Deserialize, Serialize};

/// Variable names an ODE right-hand side is compiled against, in call order.
pub const ODE_VARIABLES: [&str; 2] = ["x", "y"];

/// Upper bound on the number of steps a single run may take.
pub const MAX_STEPS: usize = 10_000_000;

/// Initial value problem on a fixed grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdeProblem {
    pub h: f64,
    pub x0: f64,
    pub y0: f64,
    pub x_end: f64,
}

impl OdeProblem {
    pub fn new(h: f64, x0: f64, y0: f64, x_end: f64) -> Self {
        Self { h, x0, y0, x_end }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.h.is_finite() && self.h > 0.0) {
            return Err(NumethError::InvalidInput(format!(
                "step size must be positive and finite, got {}",
                self.h
            )));
        }
        for (name, value) in [("x0", self.x0), ("y0", self.y0), ("x_end", self.x_end)] {
            if !value.is_finite() {
                return Err(NumethError::InvalidInput(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Abscissas visited after the initial point by improved Euler.
    ///
    /// Mirrors a half-open range `[x0 + h, x_end + h)` with stride `h`:
    /// the length is `ceil((stop - start) / h)` and the values are
    /// `start`, `start + h`, then `start + i·(x1 - start)`. So `x_end` is
    /// included when it falls on the grid, and one point past it may appear
    /// when it does not.
    pub fn euler_grid(&self) -> Result<Vec<f64>> {
        let start = self.x0 + self.h;
        let stop = self.x_end + self.h;
        let len = ((stop - start) / self.h).ceil();
        if len.is_nan() || len <= 0.0 {
            return Ok(Vec::new());
        }
        let len = checked_step_count(len)?;

        let second = start + self.h;
        let delta = second - start;
        let grid = (0..len)
            .map(|i| match i {
                0 => start,
                1 => second,
                _ => start + i as f64 * delta,
            })
            .collect();
        Ok(grid)
    }

    /// Number of RK4 steps: `(x_end - x0) / h` rounded half to even.
    /// A negative count means no steps.
    pub fn rk4_step_count(&self) -> Result<usize> {
        let steps = ((self.x_end - self.x0) / self.h).round_ties_even();
        if steps <= 0.0 {
            return Ok(0);
        }
        checked_step_count(steps)
    }
}

fn checked_step_count(count: f64) -> Result<usize> {
    if count > MAX_STEPS as f64 {
        return Err(NumethError::InvalidInput(format!(
            "run would take {count} steps (limit {MAX_STEPS})"
        )));
    }
    Ok(count as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdeMethod {
    ImprovedEuler,
    RungeKutta4,
}

/// Per-step intermediate values; one entry per step taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "stages", rename_all = "snake_case")]
pub enum StageHistory {
    ImprovedEuler(Vec<EulerStages>),
    RungeKutta4(Vec<RkStages>),
}

impl StageHistory {
    pub fn len(&self) -> usize {
        match self {
            StageHistory::ImprovedEuler(stages) => stages.len(),
            StageHistory::RungeKutta4(stages) => stages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of a fixed-step run. `steps`, `xs` and `ys` share one length and
/// start with the initial condition at step 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdeSolution {
    pub method: OdeMethod,
    pub problem: OdeProblem,
    pub steps: Vec<usize>,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub stages: StageHistory,
    /// Exact solution sampled at `xs`, when one was supplied.
    pub exact: Option<Vec<f64>>,
}

impl OdeSolution {
    fn start(method: OdeMethod, problem: &OdeProblem, capacity: usize) -> Self {
        let mut steps = Vec::with_capacity(capacity + 1);
        let mut xs = Vec::with_capacity(capacity + 1);
        let mut ys = Vec::with_capacity(capacity + 1);
        steps.push(0);
        xs.push(problem.x0);
        ys.push(problem.y0);
        let stages = match method {
            OdeMethod::ImprovedEuler => StageHistory::ImprovedEuler(Vec::with_capacity(capacity)),
            OdeMethod::RungeKutta4 => StageHistory::RungeKutta4(Vec::with_capacity(capacity)),
        };
        Self {
            method,
            problem: *problem,
            steps,
            xs,
            ys,
            stages,
            exact: None,
        }
    }

    fn push(&mut self, x: f64, y: f64) {
        let n = self.steps.len();
        self.steps.push(n);
        self.xs.push(x);
        self.ys.push(y);
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Samples an exact solution `y(x)` at every `xs` value.
    pub fn attach_exact_solution(&mut self, exact: &str) -> Result<()> {
        let expression = CompiledExpression::compile(exact, &["x"])?;
        let values = expression.evaluate_broadcast(&[Argument::Array(&self.xs)])?;
        self.exact = Some(values);
        Ok(())
    }

    /// `|exact - y|` per point, when an exact solution is attached.
    pub fn errors(&self) -> Option<Vec<f64>> {
        self.exact.as_ref().map(|exact| {
            exact
                .iter()
                .zip(&self.ys)
                .map(|(exact, y)| (exact - y).abs())
                .collect()
        })
    }
}

/// Improved Euler over a compiled `f(x, y)`.
pub fn integrate_improved_euler(
    expression: &CompiledExpression,
    problem: &OdeProblem,
) -> Result<OdeSolution> {
    problem.validate()?;
    let ode = ExpressionOde::new(expression)?;
    let grid = problem.euler_grid()?;
    log::debug!(
        "improved euler: f = {}, h = {}, x0 = {}, y0 = {}, x_end = {}, {} steps",
        expression.source(),
        problem.h,
        problem.x0,
        problem.y0,
        problem.x_end,
        grid.len()
    );

    let mut solution = OdeSolution::start(OdeMethod::ImprovedEuler, problem, grid.len());
    let mut stepper = ImprovedEuler::new();
    let (mut x, mut y) = (problem.x0, problem.y0);
    for next_x in grid {
        stepper.set_next_x(next_x);
        let stages = stepper.step(&ode, &mut x, &mut y, problem.h)?;
        log::trace!("euler n = {}: x = {x}, y = {y}", solution.len());
        if let StageHistory::ImprovedEuler(history) = &mut solution.stages {
            history.push(stages);
        }
        solution.push(x, y);
    }

    log::debug!("improved euler finished at x = {x}, y = {y}");
    Ok(solution)
}

/// Classic RK4 over a compiled `f(x, y)`, taking exactly
/// `problem.rk4_step_count()` steps.
pub fn integrate_runge_kutta4(
    expression: &CompiledExpression,
    problem: &OdeProblem,
) -> Result<OdeSolution> {
    problem.validate()?;
    let ode = ExpressionOde::new(expression)?;
    let steps = problem.rk4_step_count()?;
    log::debug!(
        "rk4: f = {}, h = {}, x0 = {}, y0 = {}, x_end = {}, {} steps",
        expression.source(),
        problem.h,
        problem.x0,
        problem.y0,
        problem.x_end,
        steps
    );

    let mut solution = OdeSolution::start(OdeMethod::RungeKutta4, problem, steps);
    let mut stepper = RK4::new();
    let (mut x, mut y) = (problem.x0, problem.y0);
    for _ in 0..steps {
        let stages = stepper.step(&ode, &mut x, &mut y, problem.h)?;
        log::trace!("rk4 n = {}: x = {x}, y = {y}, k = {}", solution.len(), stages.k_avg);
        if let StageHistory::RungeKutta4(history) = &mut solution.stages {
            history.push(stages);
        }
        solution.push(x, y);
    }

    log::debug!("rk4 finished at x = {x}, y = {y}");
    Ok(solution)
}

/// Improved Euler for `dy/dx = expr` with `expr` over `x` and `y`.
pub fn solve_improved_euler(
    expr: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
) -> Result<OdeSolution> {
    let expression = CompiledExpression::compile(expr, &ODE_VARIABLES)?;
    integrate_improved_euler(&expression, &OdeProblem::new(h, x0, y0, x_end))
}

/// As [`solve_improved_euler`], also sampling the exact solution `exact(x)`.
pub fn solve_improved_euler_with_exact(
    expr: &str,
    exact: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
) -> Result<OdeSolution> {
    let mut solution = solve_improved_euler(expr, h, x0, y0, x_end)?;
    solution.attach_exact_solution(exact)?;
    Ok(solution)
}

/// RK4 for `dy/dx = expr` with `expr` over `x` and `y`.
pub fn solve_runge_kutta4(
    expr: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
) -> Result<OdeSolution> {
    let expression = CompiledExpression::compile(expr, &ODE_VARIABLES)?;
    integrate_runge_kutta4(&expression, &OdeProblem::new(h, x0, y0, x_end))
}

/// As [`solve_runge_kutta4`], also sampling the exact solution `exact(x)`.
pub fn solve_runge_kutta4_with_exact(
    expr: &str,
    exact: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
) -> Result<OdeSolution> {
    let mut solution = solve_runge_kutta4(expr, h, x0, y0, x_end)?;
    solution.attach_exact_solution(exact)?;
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_uniform_spacing(solution: &OdeSolution) {
        assert_eq!(solution.steps.len(), solution.xs.len());
        assert_eq!(solution.ys.len(), solution.xs.len());
        for (i, n) in solution.steps.iter().enumerate() {
            assert_eq!(*n, i);
        }
        for pair in solution.xs.windows(2) {
            let dx = pair[1] - pair[0];
            assert!(
                (dx - solution.problem.h).abs() < 1e-9,
                "x spacing {dx} differs from h = {}",
                solution.problem.h
            );
        }
    }

    #[test]
    fn euler_grid_includes_end_on_exact_multiple() {
        let grid = OdeProblem::new(0.5, 0.0, 1.0, 2.0)
            .euler_grid()
            .expect("grid");
        assert_eq!(grid, vec![0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn euler_grid_overshoots_when_end_is_off_grid() {
        let grid = OdeProblem::new(0.5, 0.0, 1.0, 1.2)
            .euler_grid()
            .expect("grid");
        assert_eq!(grid, vec![0.5, 1.0, 1.5]);
    }

    #[test]
    fn euler_grid_is_empty_when_end_precedes_start() {
        let problem = OdeProblem::new(0.1, 1.0, 1.0, 0.0);
        assert!(problem.euler_grid().expect("grid").is_empty());
        let solution = solve_improved_euler("x + y", 0.1, 1.0, 1.0, 0.0).expect("solve");
        assert_eq!(solution.xs, vec![1.0]);
        assert_eq!(solution.steps, vec![0]);
        assert!(solution.stages.is_empty());
    }

    #[test]
    fn rk4_step_count_rounds_half_to_even() {
        assert_eq!(OdeProblem::new(0.1, 0.0, 1.0, 2.0).rk4_step_count().expect("count"), 20);
        assert_eq!(OdeProblem::new(1.0, 0.0, 1.0, 2.5).rk4_step_count().expect("count"), 2);
        assert_eq!(OdeProblem::new(1.0, 0.0, 1.0, 3.5).rk4_step_count().expect("count"), 4);
        assert_eq!(OdeProblem::new(1.0, 0.0, 1.0, -3.0).rk4_step_count().expect("count"), 0);
    }

    #[test]
    fn invalid_problems_are_rejected() {
        for h in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let err = solve_runge_kutta4("y", h, 0.0, 1.0, 1.0).expect_err("bad h");
            assert!(matches!(err, NumethError::InvalidInput(_)), "h = {h}: {err}");
            let err = solve_improved_euler("y", h, 0.0, 1.0, 1.0).expect_err("bad h");
            assert!(matches!(err, NumethError::InvalidInput(_)), "h = {h}: {err}");
        }
        let err = solve_runge_kutta4("y", 0.1, f64::NAN, 1.0, 1.0).expect_err("bad x0");
        assert!(matches!(err, NumethError::InvalidInput(_)));
        let err = solve_runge_kutta4("y", 1e-12, 0.0, 1.0, 1.0).expect_err("too many steps");
        assert!(matches!(err, NumethError::InvalidInput(_)));
    }

    #[test]
    fn improved_euler_reference_problem() {
        let solution = solve_improved_euler("y - x**2 + 1", 0.2, 0.0, 0.5, 2.0).expect("solve");
        assert_eq!(solution.method, OdeMethod::ImprovedEuler);
        assert_uniform_spacing(&solution);
        assert_eq!(solution.stages.len(), solution.len() - 1);

        let last_x = *solution.xs.last().expect("points");
        assert!(last_x >= 2.0 - 1e-9 && last_x < 2.0 + 0.2, "last x = {last_x}");
        assert_eq!(solution.len(), 11);

        // Heun's values for this problem are well known.
        assert_relative_eq!(solution.ys[1], 0.826, epsilon = 1e-12);
        assert_relative_eq!(solution.ys[2], 1.20692, epsilon = 1e-10);
        // Exact y = (x + 1)^2 - 0.5 e^x; Heun with h = 0.2 is off by about 0.072 at x = 2.
        let exact = 9.0 - 0.5 * 2f64.exp();
        assert!((solution.ys[10] - exact).abs() < 0.08, "y(2) = {}", solution.ys[10]);
    }

    #[test]
    fn rk4_reference_problem_has_fixed_length() {
        let solution = solve_runge_kutta4("2*x*y", 0.1, 0.0, 1.0, 2.0).expect("solve");
        assert_eq!(solution.method, OdeMethod::RungeKutta4);
        assert_eq!(solution.len(), 21);
        assert_eq!(solution.stages.len(), 20);
        assert_eq!(*solution.steps.last().expect("steps"), 20);
        assert_uniform_spacing(&solution);

        // y = e^{x^2}
        let last = *solution.ys.last().expect("points");
        assert_relative_eq!(last, 4f64.exp(), max_relative = 1e-3);
    }

    #[test]
    fn rk4_final_x_is_accumulated() {
        let solution = solve_runge_kutta4("y", 0.1, 0.0, 1.0, 0.3).expect("solve");
        assert_eq!(solution.len(), 4);
        let accumulated = 0.0 + 0.1 + 0.1 + 0.1;
        assert_eq!(*solution.xs.last().expect("points"), accumulated);
    }

    #[test]
    fn rk4_is_exact_for_cubic_slope() {
        // dy/dx = 3x^2 integrates exactly under RK4 (Simpson's rule).
        let solution = solve_runge_kutta4("3*x**2", 0.25, 0.0, 0.0, 1.0).expect("solve");
        for (x, y) in solution.xs.iter().zip(&solution.ys) {
            assert_relative_eq!(*y, x * x * x, epsilon = 1e-12);
        }
    }

    #[test]
    fn exact_solution_produces_errors() {
        let solution = solve_improved_euler_with_exact(
            "y - x^2 + 1",
            "(x + 1)^2 - 0.5*exp(x)",
            0.2,
            0.0,
            0.5,
            2.0,
        )
        .expect("solve");
        let exact = solution.exact.as_ref().expect("exact values");
        let errors = solution.errors().expect("errors");
        assert_eq!(exact.len(), solution.len());
        assert_eq!(errors[0], 0.0);
        assert!(errors.iter().all(|e| *e >= 0.0 && *e < 0.08));

        let rk = solve_runge_kutta4_with_exact(
            "y - x^2 + 1",
            "(x + 1)^2 - 0.5*exp(x)",
            0.2,
            0.0,
            0.5,
            2.0,
        )
        .expect("solve");
        let rk_errors = rk.errors().expect("errors");
        assert!(rk_errors.iter().all(|e| *e < 2e-4), "{rk_errors:?}");
    }

    #[test]
    fn exact_solution_must_only_use_x() {
        let err = solve_runge_kutta4_with_exact("y", "y + 1", 0.1, 0.0, 1.0, 1.0)
            .expect_err("exact solution over y");
        assert!(matches!(err, NumethError::UnknownSymbol(_)));
    }

    #[test]
    fn non_finite_slope_aborts_the_run() {
        let err = solve_improved_euler("1 / (x - 0.4)", 0.2, 0.0, 0.0, 1.0)
            .expect_err("pole on the grid");
        match err {
            NumethError::Computation { x, .. } => assert!((x - 0.4).abs() < 1e-12, "x = {x}"),
            other => panic!("expected computation error, got {other}"),
        }

        let err = solve_runge_kutta4("y / (x - 0.1)", 0.2, 0.0, 1.0, 1.0)
            .expect_err("pole at midpoint");
        assert!(matches!(err, NumethError::Computation { .. }));
    }

    #[test]
    fn parse_errors_surface_unchanged() {
        let err = solve_runge_kutta4("x +* y", 0.1, 0.0, 1.0, 1.0).expect_err("malformed");
        assert!(matches!(err, NumethError::Parse { offset: 3, .. }), "{err}");
        let err = solve_improved_euler("x + t", 0.1, 0.0, 1.0, 1.0).expect_err("unknown");
        assert_eq!(err, NumethError::UnknownSymbol("t".to_string()));
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let a = solve_runge_kutta4("sin(x) * y", 0.05, 0.0, 1.0, 3.0).expect("solve");
        let b = solve_runge_kutta4("sin(x) * y", 0.05, 0.0, 1.0, 3.0).expect("solve");
        assert_eq!(a, b);
        let c = solve_improved_euler("x*y", 0.1, 0.0, 1.0, 1.0).expect("solve");
        let d = solve_improved_euler("x*y", 0.1, 0.0, 1.0, 1.0).expect("solve");
        assert_eq!(
            c.ys.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            d.ys.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }
}
