//! Simulation engine for an SIR infection spreading across a population
//! stratified by age group and geographic patch.
//!
//! The engine is stateless: every call takes the current [`State`] and
//! [`Parameters`], rebuilds whatever it needs and returns fresh arrays.
//! Stepping is left to the caller, either by integrating
//! [`OdeModel::derivative`] or by sampling counts from [`JumpModel::rates`]
//! and applying them with [`JumpModel::apply_transitionings`].

pub mod contact;
pub mod error;
pub mod force;
pub mod model;
pub mod parameters;
pub mod stack;
pub mod state;

pub use contact::ContactTensor;
pub use error::{EngineError, Result};
pub use force::{ForceOfInfection, relative_infectious, visiting_population};
pub use model::{JumpModel, OdeModel, SpatialSir, TransitionRates, Transitionings};
pub use parameters::Parameters;
pub use stack::{MatrixStack, batch_matmul};
pub use state::{Compartment, Derivative, State};
