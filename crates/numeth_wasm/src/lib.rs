//! WASM bridge: exposes the numeth solvers and compiled expressions to the
//! JavaScript front end, which owns every table, chart and message.

mod expression;
mod methods;

pub use expression::WasmExpression;
pub use methods::{improved_euler, newton_raphson, runge_kutta4};
