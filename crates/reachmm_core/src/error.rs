//! Error taxonomy shared by the interval engine and the propagator.
//!
//! Divergence of a propagation run is deliberately absent here: an unbounded
//! enclosure is still a sound answer, so it is reported as
//! [`RunStatus::Diverged`](crate::propagator::RunStatus) instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReachError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReachError {
    /// An interval with `lower > upper` or a NaN bound was constructed or produced.
    #[error("invalid interval at index {index}: [{lower}, {upper}]")]
    InvalidInterval {
        index: usize,
        lower: f64,
        upper: f64,
    },

    /// An operation was applied outside its domain.
    #[error("domain error in {op}: {detail}")]
    Domain { op: &'static str, detail: String },

    /// Operand shapes cannot be broadcast together.
    #[error("shape mismatch: {lhs:?} cannot be combined with {rhs:?}")]
    Shape { lhs: Vec<usize>, rhs: Vec<usize> },

    /// Plain length mismatch between a slice and what a component expects.
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// No monotone decomposition is known or derivable, or a supplied one breaks
    /// the decomposition contract.
    #[error("decomposition error: {0}")]
    Decomposition(String),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("expression error: {0}")]
    Expression(String),
}

impl ReachError {
    pub(crate) fn domain(op: &'static str, detail: impl Into<String>) -> Self {
        ReachError::Domain {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(ReachError::Dimension {
                what,
                expected,
                got,
            })
        }
    }
}
