//! Row shapes handed to the presentation layer.

use crate::equation_engine::Argument;
use crate::error::{NumethError, Result};
use crate::newton::NewtonSolution;
use crate::ode::{OdeSolution, StageHistory};
use crate::solvers::{EulerStages, RkStages};
use serde::{Deserialize, Serialize};

/// Intermediate values attached to one table row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowStages {
    ImprovedEuler(EulerStages),
    RungeKutta4(RkStages),
}

/// One row of an ODE table. `stages` holds the values of the step that
/// leaves this point, so the last row has none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRow {
    pub n: usize,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<RowStages>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

/// One Newton-Raphson iterate with its function value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRow {
    pub iteration: usize,
    pub x: f64,
    pub fx: f64,
}

/// Sampled curve for plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl OdeSolution {
    pub fn rows(&self) -> Vec<StepRow> {
        let errors = self.errors();
        (0..self.len())
            .map(|i| {
                let stages = match &self.stages {
                    StageHistory::ImprovedEuler(history) => {
                        history.get(i).copied().map(RowStages::ImprovedEuler)
                    }
                    StageHistory::RungeKutta4(history) => {
                        history.get(i).copied().map(RowStages::RungeKutta4)
                    }
                };
                StepRow {
                    n: self.steps[i],
                    x: self.xs[i],
                    y: self.ys[i],
                    stages,
                    exact: self.exact.as_ref().map(|exact| exact[i]),
                    error: errors.as_ref().map(|errors| errors[i]),
                }
            })
            .collect()
    }
}

impl NewtonSolution {
    pub fn rows(&self) -> Result<Vec<IterationRow>> {
        let fxs = self
            .function
            .evaluate_broadcast(&[Argument::Array(&self.xs)])?;
        Ok(self
            .xs
            .iter()
            .zip(fxs)
            .enumerate()
            .map(|(iteration, (&x, fx))| IterationRow { iteration, x, fx })
            .collect())
    }

    /// Samples `f` on `[min(xs) - margin, max(xs) + margin]`.
    pub fn plot_range(&self, margin: f64, samples: usize) -> Result<Curve> {
        let (lo, hi) = self
            .xs
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        let xs = linspace(lo - margin, hi + margin, samples)?;
        let ys = self.function.evaluate_broadcast(&[Argument::Array(&xs)])?;
        Ok(Curve { xs, ys })
    }
}

/// `samples` evenly spaced points from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, samples: usize) -> Result<Vec<f64>> {
    if !start.is_finite() || !end.is_finite() {
        return Err(NumethError::InvalidInput(format!(
            "range [{start}, {end}] must be finite"
        )));
    }
    match samples {
        0 => Ok(Vec::new()),
        1 => Ok(vec![start]),
        _ => {
            let step = (end - start) / (samples - 1) as f64;
            let mut points: Vec<f64> = (0..samples).map(|i| start + i as f64 * step).collect();
            points[samples - 1] = end;
            Ok(points)
        }
    }
}
