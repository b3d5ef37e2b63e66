//! Solver entry points returning serialized tables.

use anyhow::{Context, Result};
use numeth_core::newton::{solve_newton_raphson_with, NewtonSettings};
use numeth_core::ode::{solve_improved_euler, solve_runge_kutta4, OdeMethod, OdeSolution};
use numeth_core::results::{Curve, IterationRow, StepRow};
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

/// Padding around the visited Newton iterates when sampling `f` for a plot.
const PLOT_MARGIN: f64 = 1.0;
const PLOT_SAMPLES: usize = 500;

#[derive(Debug, Serialize)]
pub(crate) struct OdeTable {
    method: OdeMethod,
    rows: Vec<StepRow>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exact: Option<Vec<f64>>,
}

impl From<OdeSolution> for OdeTable {
    fn from(solution: OdeSolution) -> Self {
        Self {
            method: solution.method,
            rows: solution.rows(),
            exact: solution.exact,
            xs: solution.xs,
            ys: solution.ys,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NewtonTable {
    root: Option<f64>,
    rows: Vec<IterationRow>,
    curve: Curve,
}

fn to_js<T: Serialize>(table: Result<T>) -> Result<JsValue, JsValue> {
    let table = table.map_err(|e| JsValue::from_str(&format!("{:#}", e)))?;
    to_value(&table).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

pub(crate) fn improved_euler_table(
    equation: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
    exact: Option<&str>,
) -> Result<OdeTable> {
    let mut solution = solve_improved_euler(equation, h, x0, y0, x_end)
        .with_context(|| format!("Improved Euler failed for dy/dx = {equation}"))?;
    if let Some(exact) = exact.filter(|s| !s.trim().is_empty()) {
        solution
            .attach_exact_solution(exact)
            .with_context(|| format!("Exact solution y = {exact} is invalid"))?;
    }
    Ok(solution.into())
}

pub(crate) fn runge_kutta4_table(
    equation: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
    exact: Option<&str>,
) -> Result<OdeTable> {
    let mut solution = solve_runge_kutta4(equation, h, x0, y0, x_end)
        .with_context(|| format!("Runge-Kutta 4 failed for dy/dx = {equation}"))?;
    if let Some(exact) = exact.filter(|s| !s.trim().is_empty()) {
        solution
            .attach_exact_solution(exact)
            .with_context(|| format!("Exact solution y = {exact} is invalid"))?;
    }
    Ok(solution.into())
}

pub(crate) fn newton_raphson_table(
    equation: &str,
    x0: f64,
    settings: NewtonSettings,
) -> Result<NewtonTable> {
    let solution = solve_newton_raphson_with(equation, x0, settings)
        .with_context(|| format!("Newton-Raphson failed for f(x) = {equation}"))?;
    let rows = solution.rows().context("Failed to evaluate f at the iterates")?;
    let curve = solution
        .plot_range(PLOT_MARGIN, PLOT_SAMPLES)
        .context("Failed to sample f for plotting")?;
    Ok(NewtonTable {
        root: solution.root,
        rows,
        curve,
    })
}

#[wasm_bindgen(js_name = improvedEuler)]
pub fn improved_euler(
    equation: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
    exact: Option<String>,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    to_js(improved_euler_table(equation, h, x0, y0, x_end, exact.as_deref()))
}

#[wasm_bindgen(js_name = rungeKutta4)]
pub fn runge_kutta4(
    equation: &str,
    h: f64,
    x0: f64,
    y0: f64,
    x_end: f64,
    exact: Option<String>,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    to_js(runge_kutta4_table(equation, h, x0, y0, x_end, exact.as_deref()))
}

/// `max_iterations = 0` keeps the default ceiling.
#[wasm_bindgen(js_name = newtonRaphson)]
pub fn newton_raphson(
    equation: &str,
    x0: f64,
    tolerance: f64,
    max_iterations: u32,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let mut settings = NewtonSettings::with_tolerance(tolerance);
    if max_iterations > 0 {
        settings.max_iterations = max_iterations as usize;
    }
    to_js(newton_raphson_table(equation, x0, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use numeth_core::NumethError;

    #[test]
    fn improved_euler_table_has_rows_and_series() {
        let table =
            improved_euler_table("y - x**2 + 1", 0.2, 0.0, 0.5, 2.0, None).expect("table");
        assert_eq!(table.method, OdeMethod::ImprovedEuler);
        assert_eq!(table.rows.len(), 11);
        assert_eq!(table.xs.len(), table.ys.len());
        assert!(table.exact.is_none());
    }

    #[test]
    fn blank_exact_solution_is_ignored() {
        let table = runge_kutta4_table("x*y", 0.1, 0.0, 1.0, 1.0, Some("  ")).expect("table");
        assert!(table.exact.is_none());
        assert_eq!(table.rows.len(), 11);

        let table = runge_kutta4_table("x*y", 0.1, 0.0, 1.0, 1.0, Some("exp(x^2/2)"))
            .expect("exact solution should compile");
        let errors: Vec<f64> = table.rows.iter().map(|row| row.error.expect("error")).collect();
        assert!(errors.iter().all(|e| *e < 1e-5), "{errors:?}");
    }

    #[test]
    fn newton_table_samples_plot_curve() {
        let table =
            newton_raphson_table("x^2 - 4", 3.0, NewtonSettings::default()).expect("table");
        let root = table.root.expect("root");
        assert!((root - 2.0).abs() < 1e-6);
        assert_eq!(table.curve.xs.len(), PLOT_SAMPLES);
        assert_eq!(table.rows[0].fx, 5.0);
    }

    #[test]
    fn errors_keep_the_core_cause() {
        let err = runge_kutta4_table("x +", 0.1, 0.0, 1.0, 1.0, None).expect_err("parse error");
        let cause = err.downcast_ref::<NumethError>().expect("core error");
        assert!(matches!(cause, NumethError::Parse { .. }));
        assert!(format!("{err:#}").contains("Runge-Kutta 4 failed"));

        let settings = NewtonSettings {
            max_iterations: 10,
            ..NewtonSettings::default()
        };
        let err = newton_raphson_table("x^2 + 1", 0.5, settings).expect_err("no real root");
        assert!(matches!(
            err.downcast_ref::<NumethError>(),
            Some(NumethError::Divergence { .. })
        ));
    }

    #[test]
    fn zero_derivative_is_not_an_error() {
        let table =
            newton_raphson_table("x^2 + 1", 0.0, NewtonSettings::default()).expect("table");
        assert!(table.root.is_none());
        assert_eq!(table.rows.len(), 1);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::{improved_euler, newton_raphson, runge_kutta4};
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn improved_euler_reports_parse_errors_as_strings() {
        let result = improved_euler("y +", 0.1, 0.0, 1.0, 1.0, None);
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Improved Euler failed"), "{message}");
        assert!(message.contains("parse error"), "{message}");
    }

    #[wasm_bindgen_test]
    fn runge_kutta4_reports_invalid_exact_solution() {
        let result = runge_kutta4("x*y", 0.1, 0.0, 1.0, 1.0, Some("exp(z)".to_string()));
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Exact solution y = exp(z) is invalid"), "{message}");
    }

    #[wasm_bindgen_test]
    fn newton_raphson_reports_divergence() {
        let result = newton_raphson("x^2 + 1", 0.5, 1e-6, 10);
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Newton-Raphson failed"), "{message}");
    }

    #[wasm_bindgen_test]
    fn successful_runs_serialize_to_objects() {
        let table = runge_kutta4("y", 0.5, 0.0, 1.0, 1.0, None).expect("table");
        assert!(table.is_object());
        let table = newton_raphson("x^2 - 4", 3.0, 1e-6, 0).expect("table");
        assert!(table.is_object());
    }
}
