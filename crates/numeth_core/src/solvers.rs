use crate::error::{NumethError, Result};
use crate::traits::{Scalar, ScalarOde, Steppable};
use serde::{Deserialize, Serialize};

/// Intermediate values of one improved Euler step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerStages {
    /// Slope at the start of the step, `f(xn, yn)`.
    pub slope_start: f64,
    /// Predictor `y* = yn + h·f(xn, yn)`.
    pub predictor: f64,
    /// Slope at the predicted end point, `f(x_{n+1}, y*)`.
    pub slope_end: f64,
}

/// Slope evaluations of one RK4 step and their weighted average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RkStages {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k_avg: f64,
}

impl RkStages {
    pub fn as_tuple(&self) -> (f64, f64, f64, f64, f64) {
        (self.k1, self.k2, self.k3, self.k4, self.k_avg)
    }
}

fn finite<T: Scalar>(value: T, x: T, what: &str) -> Result<T> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(NumethError::computation(
            x.to_f64().unwrap_or(f64::NAN),
            format!("{what} is not finite ({value:?})"),
        ))
    }
}

fn to_f64<T: Scalar>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Heun's predictor-corrector (improved Euler).
///
/// The end abscissa of the step is supplied by the caller through
/// `set_next_x`, so the driver can reproduce its own grid exactly; without
/// it the step ends at `x + h`.
#[derive(Debug, Default)]
pub struct ImprovedEuler<T: Scalar> {
    next_x: Option<T>,
}

impl<T: Scalar> ImprovedEuler<T> {
    pub fn new() -> Self {
        Self { next_x: None }
    }

    /// Fixes the abscissa the next step lands on.
    pub fn set_next_x(&mut self, next_x: T) {
        self.next_x = Some(next_x);
    }
}

impl<T: Scalar> Steppable<T> for ImprovedEuler<T> {
    type Stages = EulerStages;

    fn step(
        &mut self,
        ode: &impl ScalarOde<T>,
        x: &mut T,
        y: &mut T,
        h: T,
    ) -> Result<EulerStages> {
        let half = T::lift(0.5);
        let (x0, y0) = (*x, *y);
        let x1 = self.next_x.take().unwrap_or(x0 + h);

        // y* = yn + h f(xn, yn)
        let slope_start = finite(ode.slope(x0, y0), x0, "f(xn, yn)")?;
        let predictor = finite(y0 + h * slope_start, x0, "predictor y*")?;

        // y_{n+1} = yn + h/2 (f(xn, yn) + f(x_{n+1}, y*))
        let slope_end = finite(ode.slope(x1, predictor), x1, "f(x_{n+1}, y*)")?;
        let y1 = finite(y0 + h * half * (slope_start + slope_end), x1, "y_{n+1}")?;

        *x = x1;
        *y = y1;

        Ok(EulerStages {
            slope_start: to_f64(slope_start),
            predictor: to_f64(predictor),
            slope_end: to_f64(slope_end),
        })
    }
}

/// Classic Runge-Kutta 4th order solver.
#[derive(Debug, Default)]
pub struct RK4<T: Scalar> {
    _scalar: std::marker::PhantomData<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new() -> Self {
        Self {
            _scalar: std::marker::PhantomData,
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    type Stages = RkStages;

    fn step(&mut self, ode: &impl ScalarOde<T>, x: &mut T, y: &mut T, h: T) -> Result<RkStages> {
        let half = T::lift(0.5);
        let two = T::lift(2.0);
        let six = T::lift(6.0);
        let (x0, y0) = (*x, *y);

        // k1 = f(x, y)
        let k1 = finite(ode.slope(x0, y0), x0, "k1")?;
        // k2 = f(x + h/2, y + k1 h/2)
        let k2 = finite(ode.slope(x0 + h * half, y0 + k1 * h * half), x0, "k2")?;
        // k3 = f(x + h/2, y + k2 h/2)
        let k3 = finite(ode.slope(x0 + h * half, y0 + k2 * h * half), x0, "k3")?;
        // k4 = f(x + h, y + k3 h)
        let k4 = finite(ode.slope(x0 + h, y0 + k3 * h), x0, "k4")?;

        let k_avg = finite((k1 + two * k2 + two * k3 + k4) / six, x0, "k")?;

        *x = x0 + h;
        *y = finite(y0 + k_avg * h, *x, "y_{i+1}")?;

        Ok(RkStages {
            k1: to_f64(k1),
            k2: to_f64(k2),
            k3: to_f64(k3),
            k4: to_f64(k4),
            k_avg: to_f64(k_avg),
        })
    }
}
