//! The `numeth_core` crate compiles user formulas and runs three classical
//! numerical methods over them.
//!
//! Key components:
//! - **Equation Engine**: tokenizer, parser and bytecode VM for formulas over an
//!   explicit, ordered list of variable names.
//! - **Autodiff**: `Dual` numbers, so the same bytecode yields exact derivatives.
//! - **Solvers**: fixed-step steppers (improved Euler, RK4) behind `Steppable`.
//! - **ODE / Newton**: drivers with the grid, step-count and iteration policies.
//! - **Results**: table rows and plot sampling for the presentation layer.
pub mod autodiff;
pub mod equation_engine;
pub mod error;
pub mod newton;
pub mod ode;
pub mod results;
pub mod solvers;
pub mod traits;

pub use error::{NumethError, Result};
pub use newton::{solve_newton_raphson, solve_newton_raphson_with, NewtonSettings, NewtonSolution};
pub use ode::{
    solve_improved_euler, solve_improved_euler_with_exact, solve_runge_kutta4,
    solve_runge_kutta4_with_exact, OdeProblem, OdeSolution,
};
