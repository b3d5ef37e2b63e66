use crate::error::Result;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can flow through the expression VM and the steppers.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lifts an `f64` constant into the scalar type.
    fn lift(value: f64) -> Self {
        // Every Scalar in this crate (f64, Dual) accepts any f64.
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order explicit ODE `dy/dx = f(x, y)` in one dependent variable.
pub trait ScalarOde<T: Scalar> {
    /// Evaluates the slope at `(x, y)`.
    fn slope(&self, x: T, y: T) -> T;
}

/// A fixed-step solver that advances `(x, y)` by one step of size `h`.
pub trait Steppable<T: Scalar> {
    /// Intermediate values produced by a single step (slopes, predictors).
    type Stages;

    /// Performs one step.
    /// x: current abscissa (updated after step)
    /// y: current state (updated after step)
    /// h: step size
    ///
    /// Fails when any evaluated slope or the new state is non-finite.
    fn step(
        &mut self,
        ode: &impl ScalarOde<T>,
        x: &mut T,
        y: &mut T,
        h: T,
    ) -> Result<Self::Stages>;
}
