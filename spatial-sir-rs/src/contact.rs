use log::debug;
use nalgebra::DMatrix;

use crate::error::{EngineError, Result};
use crate::stack::MatrixStack;

/// Contact intensity `C[a, b, p, q]` between age groups `a` and `b` for a
/// resident of patch `p` spending time on patch `q`.
///
/// `C = (1 - f_v) * N[a, b] * [p == q] + f_v * N[a, b] * M[p, q]`, where an
/// age-stratified `M` contributes the layer of the susceptible's own age `a`:
/// travel depends on who moves, not on who is met.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactTensor {
    n_age: usize,
    n_locations: usize,
    // Row-major over (a, b, p, q).
    data: Vec<f64>,
}

impl ContactTensor {
    pub fn build(contacts: &DMatrix<f64>, mobility: &MatrixStack, f_v: f64) -> Result<Self> {
        let n_age = contacts.nrows();
        if contacts.ncols() != n_age {
            return Err(EngineError::shape(
                "contact matrix",
                (n_age, n_age),
                contacts.shape(),
            ));
        }
        let n_locations = mobility.dim();
        mobility.check("mobility", n_locations, n_age)?;
        debug!("building contact tensor for {n_age} age groups x {n_locations} locations");

        let mut data = vec![0.0; n_age * n_age * n_locations * n_locations];
        let mut idx = 0;
        for a in 0..n_age {
            let layer = mobility.layer(a);
            for b in 0..n_age {
                let n_ab = contacts[(a, b)];
                for p in 0..n_locations {
                    for q in 0..n_locations {
                        let home = if p == q { 1.0 - f_v } else { 0.0 };
                        data[idx] = n_ab * (home + f_v * layer[(p, q)]);
                        idx += 1;
                    }
                }
            }
        }

        Ok(ContactTensor {
            n_age,
            n_locations,
            data,
        })
    }

    pub fn n_age(&self) -> usize {
        self.n_age
    }

    pub fn n_locations(&self) -> usize {
        self.n_locations
    }

    /// # Panics
    ///
    /// Panics if an age index is not below [`n_age`](Self::n_age) or a
    /// location index is not below [`n_locations`](Self::n_locations).
    pub fn get(&self, a: usize, b: usize, p: usize, q: usize) -> f64 {
        assert!(
            a < self.n_age && b < self.n_age && p < self.n_locations && q < self.n_locations,
            "contact index ({a}, {b}, {p}, {q}) out of range for {} age groups x {} locations",
            self.n_age,
            self.n_locations
        );
        let l = self.n_locations;
        self.data[((a * self.n_age + b) * l + p) * l + q]
    }

    /// `out[(a, p)] = sum_{b, q} C[a, b, p, q] * field[(b, q)]`.
    pub fn contract(&self, field: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let shape = (self.n_age, self.n_locations);
        if field.shape() != shape {
            return Err(EngineError::shape("contracted field", shape, field.shape()));
        }

        let mut out = DMatrix::zeros(self.n_age, self.n_locations);
        for a in 0..self.n_age {
            for p in 0..self.n_locations {
                let mut sum = 0.0;
                for b in 0..self.n_age {
                    for q in 0..self.n_locations {
                        sum += self.get(a, b, p, q) * field[(b, q)];
                    }
                }
                out[(a, p)] = sum;
            }
        }
        Ok(out)
    }
}
