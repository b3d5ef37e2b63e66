use crate::equation_engine::CompiledExpression;
use crate::error::{NumethError, Result};
use serde::{Deserialize, Serialize};

/// Variable name a root-finding expression is compiled against.
pub const ROOT_VARIABLES: [&str; 1] = ["x"];

pub const DEFAULT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings {
    /// Success threshold on `|f(x)|`.
    pub tolerance: f64,
    /// Newton updates allowed before giving up with `Divergence`.
    pub max_iterations: usize,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: 1000,
        }
    }
}

impl NewtonSettings {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(NumethError::InvalidInput(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(NumethError::InvalidInput(
                "max_iterations must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Callable handle on `f'` for a single-variable expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    function: CompiledExpression,
}

impl Derivative {
    pub fn of(function: CompiledExpression) -> Result<Self> {
        if function.arity() != 1 {
            return Err(NumethError::InvalidInput(format!(
                "derivative needs a single-variable expression, '{}' has {}",
                function.source(),
                function.arity()
            )));
        }
        Ok(Self { function })
    }

    pub fn evaluate(&self, x: f64) -> Result<f64> {
        self.function.value_and_derivative(x).map(|(_, slope)| slope)
    }
}

/// Outcome of a Newton-Raphson run.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonSolution {
    /// `None` when the derivative vanished before convergence.
    pub root: Option<f64>,
    /// Every visited x, starting with the initial guess.
    pub xs: Vec<f64>,
    pub function: CompiledExpression,
    pub derivative: Derivative,
    pub settings: NewtonSettings,
}

impl NewtonSolution {
    /// Number of visited points, the initial guess included.
    pub fn iterations(&self) -> usize {
        self.xs.len()
    }
}

/// Newton-Raphson over a compiled `f(x)`.
///
/// At each point the tolerance test runs before the derivative test, so a
/// point with `|f(x)| < tolerance` is a root even where `f'(x) = 0`.
pub fn find_root(
    function: &CompiledExpression,
    x0: f64,
    settings: NewtonSettings,
) -> Result<NewtonSolution> {
    settings.validate()?;
    if !x0.is_finite() {
        return Err(NumethError::InvalidInput(format!(
            "initial guess must be finite, got {x0}"
        )));
    }
    let derivative = Derivative::of(function.clone())?;
    log::debug!(
        "newton-raphson: f = {}, x0 = {}, tolerance = {}, max_iterations = {}",
        function.source(),
        x0,
        settings.tolerance,
        settings.max_iterations
    );

    let mut xs = vec![x0];
    let mut current = x0;
    let mut updates = 0usize;

    let root = loop {
        let (f_val, df_val) = function.value_and_derivative(current)?;
        if !f_val.is_finite() {
            return Err(NumethError::computation(
                current,
                format!("f(x) is not finite ({f_val})"),
            ));
        }
        if f_val.abs() < settings.tolerance {
            break Some(current);
        }

        if !df_val.is_finite() {
            return Err(NumethError::computation(
                current,
                format!("f'(x) is not finite ({df_val})"),
            ));
        }
        if df_val == 0.0 {
            log::debug!("newton-raphson: f'(x) = 0 at x = {current}, no root");
            break None;
        }

        if updates >= settings.max_iterations {
            return Err(NumethError::Divergence {
                iterations: updates,
                last_x: current,
            });
        }

        let next = current - f_val / df_val;
        log::trace!("newton-raphson {updates}: x = {current}, f = {f_val}, f' = {df_val}");
        xs.push(next);
        current = next;
        updates += 1;
    };

    log::debug!("newton-raphson finished after {updates} updates: root = {root:?}");
    Ok(NewtonSolution {
        root,
        xs,
        function: function.clone(),
        derivative,
        settings,
    })
}

/// Newton-Raphson for `f(x) = expr` with the given tolerance.
pub fn solve_newton_raphson(expr: &str, x0: f64, tolerance: f64) -> Result<NewtonSolution> {
    solve_newton_raphson_with(expr, x0, NewtonSettings::with_tolerance(tolerance))
}

pub fn solve_newton_raphson_with(
    expr: &str,
    x0: f64,
    settings: NewtonSettings,
) -> Result<NewtonSolution> {
    let function = CompiledExpression::compile(expr, &ROOT_VARIABLES)?;
    find_root(&function, x0, settings)
}
