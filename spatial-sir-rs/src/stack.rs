use nalgebra::DMatrix;

use crate::error::{EngineError, Result};

/// A square weight matrix that is either shared by every slice of a batch or
/// given explicitly per slice.
///
/// `Layers(v)` is the (m, m, n) form: `v[k]` holds `W[.., .., k]`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixStack {
    Broadcast(DMatrix<f64>),
    Layers(Vec<DMatrix<f64>>),
}

impl MatrixStack {
    /// Side length `m` of every layer.
    pub fn dim(&self) -> usize {
        match self {
            MatrixStack::Broadcast(w) => w.nrows(),
            MatrixStack::Layers(layers) => layers.first().map_or(0, |w| w.nrows()),
        }
    }

    /// Number of explicit layers, `None` when broadcast.
    pub fn layer_count(&self) -> Option<usize> {
        match self {
            MatrixStack::Broadcast(_) => None,
            MatrixStack::Layers(layers) => Some(layers.len()),
        }
    }

    /// Layer `k`, or the shared matrix whatever `k` is when broadcast.
    ///
    /// # Panics
    ///
    /// Panics if the stack has explicit layers and `k` is not below
    /// [`layer_count`](Self::layer_count).
    pub fn layer(&self, k: usize) -> &DMatrix<f64> {
        match self {
            MatrixStack::Broadcast(w) => w,
            MatrixStack::Layers(layers) => &layers[k],
        }
    }

    pub fn transpose(&self) -> MatrixStack {
        match self {
            MatrixStack::Broadcast(w) => MatrixStack::Broadcast(w.transpose()),
            MatrixStack::Layers(layers) => {
                MatrixStack::Layers(layers.iter().map(|w| w.transpose()).collect())
            }
        }
    }

    /// Materialize `n` explicit layers.
    pub fn broadcast_to(&self, n: usize) -> MatrixStack {
        match self {
            MatrixStack::Broadcast(w) => MatrixStack::Layers(vec![w.clone(); n]),
            MatrixStack::Layers(_) => self.clone(),
        }
    }

    /// Checks that every layer is `m` x `m` and, for an explicit stack, that
    /// there are exactly `n` layers.
    pub fn check(&self, what: &'static str, m: usize, n: usize) -> Result<()> {
        let layers: &[DMatrix<f64>] = match self {
            MatrixStack::Broadcast(w) => std::slice::from_ref(w),
            MatrixStack::Layers(layers) => {
                if layers.is_empty() {
                    return Err(EngineError::EmptyStack);
                }
                if layers.len() != n {
                    return Err(EngineError::shape(what, (m, n), (m, layers.len())));
                }
                layers
            }
        };
        for w in layers {
            if w.shape() != (m, m) {
                return Err(EngineError::shape(what, (m, m), w.shape()));
            }
        }
        Ok(())
    }

    pub(crate) fn check_non_negative(&self, name: &'static str) -> Result<()> {
        let layers: &[DMatrix<f64>] = match self {
            MatrixStack::Broadcast(w) => std::slice::from_ref(w),
            MatrixStack::Layers(layers) => layers,
        };
        for value in layers.iter().flat_map(|w| w.iter()) {
            if !value.is_finite() || *value < 0.0 {
                return Err(EngineError::InvalidParameter {
                    name,
                    value: *value,
                    reason: "entries must be finite and non-negative",
                });
            }
        }
        Ok(())
    }
}

/// Batched row-vector/matrix product.
///
/// For `x` of shape (n, m) returns the (n, m) matrix
/// `out[(i, j)] = sum_l x[(i, l)] * W[l, j, i]`. The layer is chosen by the
/// row index `i` of `x`, not by the output column.
pub fn batch_matmul(x: &DMatrix<f64>, w: &MatrixStack) -> Result<DMatrix<f64>> {
    let (n, m) = x.shape();
    w.check("batch weights", m, n)?;

    if let MatrixStack::Broadcast(w) = w {
        return Ok(x * w);
    }

    let mut out = DMatrix::zeros(n, m);
    for i in 0..n {
        let layer = w.layer(i);
        for j in 0..m {
            let mut sum = 0.0;
            for l in 0..m {
                sum += x[(i, l)] * layer[(l, j)];
            }
            out[(i, j)] = sum;
        }
    }
    Ok(out)
}
