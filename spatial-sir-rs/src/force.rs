use log::trace;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::contact::ContactTensor;
use crate::error::{EngineError, Result};
use crate::parameters::Parameters;
use crate::stack::{MatrixStack, batch_matmul};
use crate::state::State;

/// How the force of infection is assembled. Both strategies give the same
/// field up to rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceOfInfection {
    /// Contract the full four-index contact tensor.
    #[default]
    ContactTensor,
    /// Factor the visiting term through batched products with the mobility
    /// matrix, never materializing the tensor.
    VisitingPopulation,
}

impl ForceOfInfection {
    /// Hazard `lambda[(a, p)]` for a susceptible of age `a` living on patch `p`.
    pub fn evaluate(&self, state: &State, parameters: &Parameters) -> Result<DMatrix<f64>> {
        let shape = state.shape();
        if state.i.shape() != shape {
            return Err(EngineError::shape("I", shape, state.i.shape()));
        }
        if state.r.shape() != shape {
            return Err(EngineError::shape("R", shape, state.r.shape()));
        }
        parameters.validate(state.n_age(), state.n_locations())?;
        let prevalence = relative_infectious(state);
        let lambda = match self {
            ForceOfInfection::ContactTensor => {
                let tensor = ContactTensor::build(
                    &parameters.contacts,
                    &parameters.mobility,
                    parameters.f_v,
                )?;
                tensor.contract(&prevalence)? * parameters.beta
            }
            ForceOfInfection::VisitingPopulation => factored(&prevalence, parameters)?,
        };
        trace!(
            "{self:?} force of infection: max {:.3e}, total {:.3e}",
            lambda.max(),
            lambda.sum()
        );
        Ok(lambda)
    }
}

/// `I / (S + I + R)` per cell. Empty cells contribute no infection pressure.
pub fn relative_infectious(state: &State) -> DMatrix<f64> {
    let total = state.total();
    state
        .i
        .zip_map(&total, |i, t| if t > 0.0 { i / t } else { 0.0 })
}

/// Individuals of each age found on each patch after mobility:
/// `out[(a, q)] = sum_p x[(a, p)] * M[p, q, a]`.
pub fn visiting_population(x: &DMatrix<f64>, mobility: &MatrixStack) -> Result<DMatrix<f64>> {
    batch_matmul(x, mobility)
}

fn factored(prevalence: &DMatrix<f64>, parameters: &Parameters) -> Result<DMatrix<f64>> {
    let n = &parameters.contacts;
    let f_v = parameters.f_v;

    // Contact-weighted prevalence seen by age a on each patch.
    let home = n * prevalence;
    // Age-a residents of patch p take it from every patch q they visit:
    // sum_q M[p, q, a] * home[(a, q)].
    let away = batch_matmul(&home, &parameters.mobility.transpose())?;
    Ok((home * (1.0 - f_v) + away * f_v) * parameters.beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn parameters(f_v: f64) -> Parameters {
        Parameters::new(
            0.1,
            5.0,
            f_v,
            DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]),
            MatrixStack::Broadcast(DMatrix::from_row_slice(2, 2, &[0.0, 0.3, 0.2, 0.0])),
        )
    }

    fn state() -> State {
        State::new(
            DMatrix::from_element(2, 2, 100.0),
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]),
            DMatrix::zeros(2, 2),
        )
        .unwrap()
    }

    #[test]
    fn test_relative_infectious_empty_cell() {
        let state = State::new(
            DMatrix::from_row_slice(1, 2, &[0.0, 9.0]),
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            DMatrix::zeros(1, 2),
        )
        .unwrap();
        let x = relative_infectious(&state);
        assert_eq!(x[(0, 0)], 0.0);
        assert_relative_eq!(x[(0, 1)], 0.1);
    }

    #[test]
    fn test_empty_cell_gives_finite_lambda() {
        let mut state = state();
        state.s[(1, 1)] = 0.0;
        for force in [ForceOfInfection::ContactTensor, ForceOfInfection::VisitingPopulation] {
            let lambda = force.evaluate(&state, &parameters(0.5)).unwrap();
            assert!(lambda.iter().all(|l| l.is_finite()));
        }
    }

    #[test]
    fn test_scenario_values() {
        let x = 1.0 / 101.0;
        let lambda = ForceOfInfection::ContactTensor
            .evaluate(&state(), &parameters(0.5))
            .unwrap();
        let expected = DMatrix::from_row_slice(
            2,
            2,
            &[0.1 * 1.0 * x, 0.1 * 0.2 * x, 0.1 * 0.5 * x, 0.1 * 0.1 * x],
        );
        assert_relative_eq!(lambda, expected, epsilon = 1e-15);
    }

    #[test]
    fn test_zero_infection() {
        let mut state = state();
        state.i.fill(0.0);
        for force in [ForceOfInfection::ContactTensor, ForceOfInfection::VisitingPopulation] {
            let lambda = force.evaluate(&state, &parameters(0.5)).unwrap();
            assert_eq!(lambda, DMatrix::zeros(2, 2));
        }
    }

    #[test]
    fn test_home_only_ignores_mobility() {
        let mut p = parameters(0.0);
        let lambda = ForceOfInfection::ContactTensor.evaluate(&state(), &p).unwrap();
        let home = &p.contacts * relative_infectious(&state()) * p.beta;
        assert_relative_eq!(lambda, home, epsilon = 1e-15);

        p.mobility = MatrixStack::Broadcast(DMatrix::from_element(2, 2, 0.7));
        let changed = ForceOfInfection::ContactTensor.evaluate(&state(), &p).unwrap();
        assert_relative_eq!(lambda, changed, epsilon = 1e-15);
    }

    #[test]
    fn test_visit_only_has_no_home_term() {
        let p = parameters(1.0);
        let lambda = ForceOfInfection::ContactTensor.evaluate(&state(), &p).unwrap();
        // Nobody on patch 0 visits patch 0, the only infectious patch.
        assert_eq!(lambda[(0, 0)], 0.0);
        assert_eq!(lambda[(1, 0)], 0.0);
        assert!(lambda[(0, 1)] > 0.0);
    }

    #[test]
    fn test_strategies_agree_with_age_layers() {
        let mut p = parameters(0.3);
        p.mobility = MatrixStack::Layers(vec![
            DMatrix::from_row_slice(2, 2, &[0.0, 0.3, 0.2, 0.0]),
            DMatrix::from_row_slice(2, 2, &[0.0, 0.05, 0.6, 0.0]),
        ]);
        let mut state = state();
        state.i[(1, 1)] = 7.0;
        let tensor = ForceOfInfection::ContactTensor.evaluate(&state, &p).unwrap();
        let factored = ForceOfInfection::VisitingPopulation.evaluate(&state, &p).unwrap();
        assert_relative_eq!(tensor, factored, epsilon = 1e-14);
    }

    #[test]
    fn test_only_travelling_age_picks_up_remote_hazard() {
        // Age 0 travels 0 -> 1, age 1 stays home; ages only mix across groups.
        let p = Parameters::new(
            1.0,
            5.0,
            1.0,
            DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]),
            MatrixStack::Layers(vec![
                DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
                DMatrix::zeros(2, 2),
            ]),
        );
        let state = State::new(
            DMatrix::from_element(2, 2, 1.0),
            DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 1.0]),
            DMatrix::zeros(2, 2),
        )
        .unwrap();
        let expected = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, 0.0]);
        for force in [ForceOfInfection::ContactTensor, ForceOfInfection::VisitingPopulation] {
            let lambda = force.evaluate(&state, &p).unwrap();
            assert_relative_eq!(lambda, expected, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_mismatched_compartments_rejected() {
        let mut wrong_i = state();
        wrong_i.i = DMatrix::zeros(3, 2);
        for force in [ForceOfInfection::ContactTensor, ForceOfInfection::VisitingPopulation] {
            assert_eq!(
                force.evaluate(&wrong_i, &parameters(0.5)),
                Err(EngineError::shape("I", (2, 2), (3, 2)))
            );
        }
        let mut wrong_r = state();
        wrong_r.r = DMatrix::zeros(2, 1);
        assert_eq!(
            ForceOfInfection::ContactTensor.evaluate(&wrong_r, &parameters(0.5)),
            Err(EngineError::shape("R", (2, 2), (2, 1)))
        );
    }

    #[test]
    fn test_visiting_population() {
        let total = state().total();
        let visiting = visiting_population(&total, &parameters(0.5).mobility).unwrap();
        // 30% of patch 0 and 20% of patch 1 travel.
        assert_relative_eq!(visiting[(0, 0)], 101.0 * 0.0 + 100.0 * 0.2);
        assert_relative_eq!(visiting[(0, 1)], 101.0 * 0.3);
    }

    #[test]
    fn test_strategy_from_config() {
        let force: ForceOfInfection = serde_json::from_str("\"visiting_population\"").unwrap();
        assert_eq!(force, ForceOfInfection::VisitingPopulation);
        assert_eq!(ForceOfInfection::default(), ForceOfInfection::ContactTensor);
    }

    fn grid(n_age: usize, n_loc: usize) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(0.0f64..50.0, n_age * n_loc)
    }

    proptest! {
        #[test]
        fn prop_strategies_agree(
            s in grid(3, 4),
            i in grid(3, 4),
            r in grid(3, 4),
            n in prop::collection::vec(0.0f64..5.0, 9),
            m in prop::collection::vec(0.0f64..0.5, 16),
            f_v in 0.0f64..=1.0,
        ) {
            let mut m = DMatrix::from_row_slice(4, 4, &m);
            m.fill_diagonal(0.0);
            let p = Parameters::new(0.2, 4.0, f_v, DMatrix::from_row_slice(3, 3, &n), MatrixStack::Broadcast(m));
            let state = State::new(
                DMatrix::from_row_slice(3, 4, &s),
                DMatrix::from_row_slice(3, 4, &i),
                DMatrix::from_row_slice(3, 4, &r),
            ).unwrap();
            let tensor = ForceOfInfection::ContactTensor.evaluate(&state, &p).unwrap();
            let factored = ForceOfInfection::VisitingPopulation.evaluate(&state, &p).unwrap();
            for (a, b) in tensor.iter().zip(factored.iter()) {
                prop_assert!((a - b).abs() <= 1e-12 * (1.0 + a.abs()), "{} != {}", a, b);
                prop_assert!(a.is_finite() && *a >= 0.0);
            }
        }
    }
}
