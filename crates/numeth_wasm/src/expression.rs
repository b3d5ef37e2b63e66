//! Compiled expression handle for plot-range evaluation on the JS side.

use js_sys::Float64Array;
use numeth_core::equation_engine::{Argument, CompiledExpression};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmExpression {
    expression: CompiledExpression,
}

impl WasmExpression {
    pub(crate) fn compile(source: &str, var_names: &[String]) -> numeth_core::Result<Self> {
        let expression = CompiledExpression::compile(source, var_names)?;
        Ok(Self { expression })
    }

    /// First variable sweeps `xs`; the rest are held at `fixed`.
    pub(crate) fn series(&self, xs: &[f64], fixed: &[f64]) -> numeth_core::Result<Vec<f64>> {
        let mut args = Vec::with_capacity(1 + fixed.len());
        args.push(Argument::Array(xs));
        args.extend(fixed.iter().map(|&value| Argument::Scalar(value)));
        self.expression.evaluate_broadcast(&args)
    }
}

#[wasm_bindgen]
impl WasmExpression {
    #[wasm_bindgen(constructor)]
    pub fn new(source: &str, var_names: Vec<String>) -> Result<WasmExpression, JsValue> {
        console_error_panic_hook::set_once();
        Self::compile(source, &var_names).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn source(&self) -> String {
        self.expression.source().to_string()
    }

    pub fn arity(&self) -> usize {
        self.expression.arity()
    }

    pub fn evaluate(&self, args: &[f64]) -> Result<f64, JsValue> {
        self.expression
            .evaluate(args)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Non-finite samples are returned as-is so the chart can break the line.
    #[wasm_bindgen(js_name = evaluateSeries)]
    pub fn evaluate_series(&self, xs: &[f64], fixed: &[f64]) -> Result<Float64Array, JsValue> {
        let values = self
            .series(xs, fixed)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Float64Array::from(values.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn series_holds_trailing_variables_fixed() {
        let expression =
            WasmExpression::compile("x*y + 1", &names(&["x", "y"])).expect("compile");
        let values = expression.series(&[0.0, 1.0, 2.0], &[3.0]).expect("series");
        assert_eq!(values, vec![1.0, 4.0, 7.0]);
    }

    #[test]
    fn series_keeps_non_finite_samples() {
        let expression = WasmExpression::compile("1/x", &names(&["x"])).expect("compile");
        let values = expression.series(&[-1.0, 0.0, 1.0], &[]).expect("series");
        assert_eq!(values[0], -1.0);
        assert!(values[1].is_infinite());
    }

    #[test]
    fn scalar_evaluation_and_metadata() {
        let expression = WasmExpression::new("sqrt(x)", names(&["x"])).expect("compile");
        assert_eq!(expression.arity(), 1);
        assert_eq!(expression.source(), "sqrt(x)");
        assert_eq!(expression.evaluate(&[9.0]).expect("value"), 3.0);
    }

    #[test]
    fn series_rejects_wrong_fixed_count() {
        let expression =
            WasmExpression::compile("x + y", &names(&["x", "y"])).expect("compile");
        assert!(expression.series(&[1.0], &[]).is_err());
    }
}
