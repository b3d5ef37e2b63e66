use thiserror::Error;

/// Errors surfaced by expression compilation and the numerical methods.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumethError {
    /// Malformed expression syntax.
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// The expression names something outside the declared variables and the
    /// function library.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A solver step produced a non-finite value.
    #[error("computation failed at x = {x}: {message}")]
    Computation { x: f64, message: String },

    /// Newton-Raphson ran out of iterations before converging.
    #[error("no convergence after {iterations} iterations (last x = {last_x})")]
    Divergence { iterations: usize, last_x: f64 },

    /// Invalid solver parameters or argument shapes.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl NumethError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn computation(x: f64, message: impl Into<String>) -> Self {
        Self::Computation {
            x,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NumethError>;
