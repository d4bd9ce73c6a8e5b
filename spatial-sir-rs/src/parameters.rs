use nalgebra::DMatrix;

use crate::error::{EngineError, Result};
use crate::stack::MatrixStack;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Transmission scaling.
    pub beta: f64,
    /// Mean infectious duration; recovery happens at rate `1 / gamma`.
    pub gamma: f64,
    /// Fraction of contacts made on the visited patch instead of at home.
    pub f_v: f64,
    /// Age x age contacts at the home patch.
    pub contacts: DMatrix<f64>,
    /// Location x location origin-destination fractions, optionally one
    /// layer per age group.
    pub mobility: MatrixStack,
}

impl Parameters {
    pub fn new(
        beta: f64,
        gamma: f64,
        f_v: f64,
        contacts: DMatrix<f64>,
        mobility: MatrixStack,
    ) -> Self {
        Parameters {
            beta,
            gamma,
            f_v,
            contacts,
            mobility,
        }
    }

    pub fn n_age(&self) -> usize {
        self.contacts.nrows()
    }

    pub fn n_locations(&self) -> usize {
        self.mobility.dim()
    }

    /// Fails unless the scalars are in domain and the matrices match a state
    /// of `n_age` x `n_locations` cells.
    pub fn validate(&self, n_age: usize, n_locations: usize) -> Result<()> {
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(EngineError::InvalidParameter {
                name: "beta",
                value: self.beta,
                reason: "must be finite and positive",
            });
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(EngineError::InvalidParameter {
                name: "gamma",
                value: self.gamma,
                reason: "must be finite and positive",
            });
        }
        if !(0.0..=1.0).contains(&self.f_v) {
            return Err(EngineError::InvalidParameter {
                name: "f_v",
                value: self.f_v,
                reason: "must lie in [0, 1]",
            });
        }
        if self.contacts.shape() != (n_age, n_age) {
            return Err(EngineError::shape(
                "contact matrix",
                (n_age, n_age),
                self.contacts.shape(),
            ));
        }
        if let Some(value) = self.contacts.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(EngineError::InvalidParameter {
                name: "contacts",
                value: *value,
                reason: "entries must be finite and non-negative",
            });
        }
        self.mobility.check("mobility", n_locations, n_age)?;
        self.mobility.check_non_negative("mobility")
    }
}
