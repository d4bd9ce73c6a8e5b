use std::fmt;

use nalgebra::DMatrix;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Compartment {
    S,
    I,
    R,
}

impl Compartment {
    pub const ALL: [Compartment; 3] = [Compartment::S, Compartment::I, Compartment::R];

    pub fn name(&self) -> &'static str {
        match self {
            Compartment::S => "S",
            Compartment::I => "I",
            Compartment::R => "R",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Susceptible, infectious and recovered counts per (age, location) cell.
///
/// Rows index age groups and columns index locations.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub s: DMatrix<f64>,
    pub i: DMatrix<f64>,
    pub r: DMatrix<f64>,
}

impl State {
    pub fn new(s: DMatrix<f64>, i: DMatrix<f64>, r: DMatrix<f64>) -> Result<Self> {
        let shape = s.shape();
        if i.shape() != shape {
            return Err(EngineError::shape("I", shape, i.shape()));
        }
        if r.shape() != shape {
            return Err(EngineError::shape("R", shape, r.shape()));
        }
        Ok(State { s, i, r })
    }

    /// Everyone susceptible except `i`, nobody recovered.
    pub fn from_population(population: &DMatrix<f64>, i: DMatrix<f64>) -> Result<Self> {
        if i.shape() != population.shape() {
            return Err(EngineError::shape("I", population.shape(), i.shape()));
        }
        let s = population - &i;
        let r = DMatrix::zeros(population.nrows(), population.ncols());
        State::new(s, i, r)
    }

    pub fn n_age(&self) -> usize {
        self.s.nrows()
    }

    pub fn n_locations(&self) -> usize {
        self.s.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.s.shape()
    }

    pub fn compartment(&self, compartment: Compartment) -> &DMatrix<f64> {
        match compartment {
            Compartment::S => &self.s,
            Compartment::I => &self.i,
            Compartment::R => &self.r,
        }
    }

    /// Cell-wise population `S + I + R`.
    pub fn total(&self) -> DMatrix<f64> {
        &self.s + &self.i + &self.r
    }

    pub fn population(&self) -> f64 {
        self.s.sum() + self.i.sum() + self.r.sum()
    }

    /// Column-major concatenation `S | I | R`, the layout generic integrators
    /// step over.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(3 * self.s.len());
        for compartment in Compartment::ALL {
            flat.extend_from_slice(self.compartment(compartment).as_slice());
        }
        flat
    }

    pub fn from_flat(n_age: usize, n_locations: usize, flat: &[f64]) -> Result<Self> {
        let cells = n_age * n_locations;
        if flat.len() != 3 * cells {
            return Err(EngineError::shape(
                "flat state",
                (3, cells),
                (flat.len() / cells.max(1), cells),
            ));
        }
        let block = |k: usize| {
            DMatrix::from_column_slice(n_age, n_locations, &flat[k * cells..(k + 1) * cells])
        };
        State::new(block(0), block(1), block(2))
    }

    /// Every cell holding a negative count, in compartment order.
    pub fn negative_cells(&self) -> Vec<(Compartment, usize, usize, f64)> {
        let mut cells = Vec::new();
        for compartment in Compartment::ALL {
            let values = self.compartment(compartment);
            for location in 0..values.ncols() {
                for age in 0..values.nrows() {
                    let value = values[(age, location)];
                    if value < 0.0 {
                        cells.push((compartment, age, location, value));
                    }
                }
            }
        }
        cells
    }

    pub fn check_non_negative(&self) -> Result<()> {
        match self.negative_cells().first() {
            Some(&(compartment, age, location, value)) => Err(EngineError::NegativeState {
                compartment,
                age,
                location,
                value,
            }),
            None => Ok(()),
        }
    }
}

/// Instantaneous rates of change of each compartment.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    pub ds: DMatrix<f64>,
    pub di: DMatrix<f64>,
    pub dr: DMatrix<f64>,
}

impl Derivative {
    /// `dS + dI + dR`, zero for a closed population.
    pub fn sum(&self) -> DMatrix<f64> {
        &self.ds + &self.di + &self.dr
    }

    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(3 * self.ds.len());
        flat.extend_from_slice(self.ds.as_slice());
        flat.extend_from_slice(self.di.as_slice());
        flat.extend_from_slice(self.dr.as_slice());
        flat
    }
}
