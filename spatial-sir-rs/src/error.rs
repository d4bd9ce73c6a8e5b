use thiserror::Error;

use crate::state::Compartment;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("no transition counts supplied for compartment {compartment}")]
    MissingTransition { compartment: Compartment },

    /// A transition drew more individuals out of a compartment than it held.
    #[error("compartment {compartment} went negative at age {age}, location {location}: {value}")]
    NegativeState {
        compartment: Compartment,
        age: usize,
        location: usize,
        value: f64,
    },

    #[error("matrix stack has no layers")]
    EmptyStack,
}

impl EngineError {
    pub(crate) fn shape(
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    ) -> Self {
        EngineError::ShapeMismatch {
            what,
            expected,
            found,
        }
    }
}
