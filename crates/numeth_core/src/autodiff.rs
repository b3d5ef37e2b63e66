//! Forward-mode automatic differentiation.
//!
//! Running compiled bytecode on `Dual::variable(x)` yields `f(x)` in `value`
//! and `f'(x)` in `deriv`, which is how the Newton-Raphson solver obtains an
//! exact derivative of the user expression.

use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::num::FpCategory;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number `value + deriv·ε` with `ε² = 0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub value: f64,
    pub deriv: f64,
}

impl Dual {
    pub fn new(value: f64, deriv: f64) -> Self {
        Self { value, deriv }
    }

    /// The independent variable: seeds the derivative with 1.
    pub fn variable(value: f64) -> Self {
        Self::new(value, 1.0)
    }

    pub fn constant(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    /// Applies a scalar function given its value and derivative at `self.value`.
    fn chain(self, value: f64, slope: f64) -> Self {
        Self::new(value, slope * self.deriv)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.deriv == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.value + rhs.value, self.deriv + rhs.deriv)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.value - rhs.value, self.deriv - rhs.deriv)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.value * rhs.value,
            self.value * rhs.deriv + self.deriv * rhs.value,
        )
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.value / rhs.value,
            (self.deriv * rhs.value - self.value * rhs.deriv) / (rhs.value * rhs.value),
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.value, -self.deriv)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d/dx (a mod b) = a' away from the jumps.
        Self::new(self.value % rhs.value, self.deriv)
    }
}

macro_rules! assign_from_binary {
    ($($trait:ident :: $method:ident => $op:tt),* $(,)?) => {
        $(
            impl $trait for Dual {
                fn $method(&mut self, rhs: Self) {
                    *self = *self $op rhs;
                }
            }
        )*
    };
}

assign_from_binary! {
    AddAssign::add_assign => +,
    SubAssign::sub_assign => -,
    MulAssign::mul_assign => *,
    DivAssign::div_assign => /,
    RemAssign::rem_assign => %,
}

impl Num for Dual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(src: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(src, radix).map(Self::constant)
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.value.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.value.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.value)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for Dual {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, -0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }

    // Classification looks at the value only; a finite value with an infinite
    // derivative is caught by the Newton solver's own checks.
    fn is_nan(self) -> bool {
        self.value.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.value.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.value.is_finite()
    }
    fn is_normal(self) -> bool {
        self.value.is_normal()
    }
    fn classify(self) -> FpCategory {
        self.value.classify()
    }
    fn is_sign_positive(self) -> bool {
        self.value.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.value.is_sign_negative()
    }

    fn floor(self) -> Self {
        Self::constant(self.value.floor())
    }
    fn ceil(self) -> Self {
        Self::constant(self.value.ceil())
    }
    fn round(self) -> Self {
        Self::constant(self.value.round())
    }
    fn trunc(self) -> Self {
        Self::constant(self.value.trunc())
    }
    fn fract(self) -> Self {
        Self::new(self.value.fract(), self.deriv)
    }
    fn abs(self) -> Self {
        let sign = if self.value >= 0.0 { 1.0 } else { -1.0 };
        self.chain(self.value.abs(), sign)
    }
    fn signum(self) -> Self {
        Self::constant(self.value.signum())
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }
    fn max(self, other: Self) -> Self {
        if self.value > other.value {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.value < other.value {
            self
        } else {
            other
        }
    }
    fn abs_sub(self, other: Self) -> Self {
        if self.value <= other.value {
            Self::zero()
        } else {
            self - other
        }
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        self.chain(self.value.powi(n), n as f64 * self.value.powi(n - 1))
    }

    fn powf(self, n: Self) -> Self {
        let value = self.value.powf(n.value);
        // Split the two partials so a constant exponent never touches ln(base),
        // which is NaN for negative bases and -inf at zero.
        let mut deriv = 0.0;
        if self.deriv != 0.0 && n.value != 0.0 {
            deriv += n.value * self.value.powf(n.value - 1.0) * self.deriv;
        }
        if n.deriv != 0.0 {
            deriv += value * self.value.ln() * n.deriv;
        }
        Self::new(value, deriv)
    }

    fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s)
    }
    fn cbrt(self) -> Self {
        let c = self.value.cbrt();
        self.chain(c, 1.0 / (3.0 * c * c))
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }

    fn exp(self) -> Self {
        let e = self.value.exp();
        self.chain(e, e)
    }
    fn exp2(self) -> Self {
        let e = self.value.exp2();
        self.chain(e, e * std::f64::consts::LN_2)
    }
    fn exp_m1(self) -> Self {
        self.chain(self.value.exp_m1(), self.value.exp())
    }
    fn ln(self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.value.log2(), 1.0 / (self.value * std::f64::consts::LN_2))
    }
    fn log10(self) -> Self {
        self.chain(
            self.value.log10(),
            1.0 / (self.value * std::f64::consts::LN_10),
        )
    }
    fn ln_1p(self) -> Self {
        self.chain(self.value.ln_1p(), 1.0 / (1.0 + self.value))
    }

    fn sin(self) -> Self {
        self.chain(self.value.sin(), self.value.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.value.cos(), -self.value.sin())
    }
    fn tan(self) -> Self {
        let t = self.value.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
    fn asin(self) -> Self {
        self.chain(
            self.value.asin(),
            1.0 / (1.0 - self.value * self.value).sqrt(),
        )
    }
    fn acos(self) -> Self {
        self.chain(
            self.value.acos(),
            -1.0 / (1.0 - self.value * self.value).sqrt(),
        )
    }
    fn atan(self) -> Self {
        self.chain(self.value.atan(), 1.0 / (1.0 + self.value * self.value))
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.value * self.value + other.value * other.value;
        Self::new(
            self.value.atan2(other.value),
            (other.value * self.deriv - self.value * other.deriv) / denom,
        )
    }

    fn sinh(self) -> Self {
        self.chain(self.value.sinh(), self.value.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.value.cosh(), self.value.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.value.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        self.chain(
            self.value.asinh(),
            1.0 / (self.value * self.value + 1.0).sqrt(),
        )
    }
    fn acosh(self) -> Self {
        self.chain(
            self.value.acosh(),
            1.0 / (self.value * self.value - 1.0).sqrt(),
        )
    }
    fn atanh(self) -> Self {
        self.chain(self.value.atanh(), 1.0 / (1.0 - self.value * self.value))
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.value.integer_decode()
    }
}

#[cfg(test)]
mod tests {
    use super::Dual;
    use approx::assert_relative_eq;
    use num_traits::Float;

    #[test]
    fn product_and_quotient_rules() {
        let x = Dual::variable(3.0);
        let product = x * x * Dual::constant(2.0);
        assert_relative_eq!(product.value, 18.0);
        assert_relative_eq!(product.deriv, 12.0);

        let quotient = Dual::constant(1.0) / x;
        assert_relative_eq!(quotient.deriv, -1.0 / 9.0, epsilon = 1e-15);
    }

    #[test]
    fn powf_with_constant_exponent_handles_negative_and_zero_base() {
        let two = Dual::constant(2.0);

        let at_negative = Dual::variable(-3.0).powf(two);
        assert_relative_eq!(at_negative.value, 9.0);
        assert_relative_eq!(at_negative.deriv, -6.0);

        let at_zero = Dual::variable(0.0).powf(Dual::constant(3.0));
        assert_eq!(at_zero.value, 0.0);
        assert_eq!(at_zero.deriv, 0.0, "derivative of x^3 at 0 must be exactly zero");
    }

    #[test]
    fn zeroth_power_is_constant_even_at_zero() {
        let one = Dual::variable(0.0).powf(Dual::constant(0.0));
        assert_eq!(one.value, 1.0);
        assert_eq!(one.deriv, 0.0);
    }

    #[test]
    fn powf_with_variable_exponent() {
        // d/dx 2^x = 2^x ln 2
        let value = Dual::constant(2.0).powf(Dual::variable(3.0));
        assert_relative_eq!(value.value, 8.0);
        assert_relative_eq!(value.deriv, 8.0 * 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn transcendental_derivatives_match_analytic_forms() {
        let x0 = 0.4;
        let x = Dual::variable(x0);
        let cases: [(Dual, f64); 8] = [
            (x.sin(), x0.cos()),
            (x.cos(), -x0.sin()),
            (x.tan(), 1.0 / (x0.cos() * x0.cos())),
            (x.exp(), x0.exp()),
            (x.ln(), 1.0 / x0),
            (x.sqrt(), 0.5 / x0.sqrt()),
            (x.atan(), 1.0 / (1.0 + x0 * x0)),
            (x.tanh(), 1.0 - x0.tanh() * x0.tanh()),
        ];
        for (index, (dual, expected)) in cases.iter().enumerate() {
            assert!(
                (dual.deriv - expected).abs() < 1e-12,
                "case {index}: expected {expected}, got {}",
                dual.deriv
            );
        }
    }

    #[test]
    fn abs_derivative_follows_sign() {
        assert_eq!(Dual::variable(-2.0).abs().deriv, -1.0);
        assert_eq!(Dual::variable(2.0).abs().deriv, 1.0);
    }
}
