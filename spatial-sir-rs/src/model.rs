use std::collections::BTreeMap;

use log::trace;
use nalgebra::DMatrix;

use crate::error::{EngineError, Result};
use crate::force::ForceOfInfection;
use crate::parameters::Parameters;
use crate::state::{Compartment, Derivative, State};

/// Per-cell Poisson rates keyed by source compartment. Each entry lists the
/// competing outgoing transitions of that compartment.
pub type TransitionRates = BTreeMap<Compartment, Vec<DMatrix<f64>>>;

/// Realized transition counts for one step, laid out like [`TransitionRates`].
pub type Transitionings = BTreeMap<Compartment, Vec<DMatrix<u64>>>;

/// A model advanced by an external ODE integrator.
pub trait OdeModel {
    fn derivative(&self, t: f64, state: &State) -> Result<Derivative>;
}

/// A model advanced by a tau-leaping jump process: the caller samples counts
/// from [`JumpModel::rates`] and hands them back to
/// [`JumpModel::apply_transitionings`].
pub trait JumpModel {
    fn rates(&self, t: f64, state: &State) -> Result<TransitionRates>;

    fn apply_transitionings(
        &self,
        t: f64,
        tau: f64,
        transitionings: &Transitionings,
        state: &State,
    ) -> Result<State>;
}

/// SIR dynamics on an age x location grid with home and visited-patch
/// contacts.
#[derive(Debug, Clone)]
pub struct SpatialSir {
    pub parameters: Parameters,
    pub force: ForceOfInfection,
}

impl SpatialSir {
    pub fn new(parameters: Parameters, force: ForceOfInfection) -> Self {
        SpatialSir { parameters, force }
    }

    /// Nothing is cached between calls; the contact structure is rebuilt
    /// from the current parameters every time.
    pub fn force_of_infection(&self, state: &State) -> Result<DMatrix<f64>> {
        self.force.evaluate(state, &self.parameters)
    }

    fn recovery_rate(&self) -> f64 {
        1.0 / self.parameters.gamma
    }
}

impl OdeModel for SpatialSir {
    // Time-homogeneous: `t` only satisfies the integrator interface.
    fn derivative(&self, t: f64, state: &State) -> Result<Derivative> {
        let lambda = self.force_of_infection(state)?;
        let infections = lambda.component_mul(&state.s);
        let recoveries = &state.i * self.recovery_rate();
        trace!("derivative at t = {t}: {:.3e} new infections", infections.sum());

        Ok(Derivative {
            ds: infections.map(|x| -x),
            di: &infections - &recoveries,
            dr: recoveries,
        })
    }
}

impl JumpModel for SpatialSir {
    fn rates(&self, t: f64, state: &State) -> Result<TransitionRates> {
        let lambda = self.force_of_infection(state)?;
        trace!("rates at t = {t}");

        let mut rates = TransitionRates::new();
        rates.insert(Compartment::S, vec![lambda.component_mul(&state.s)]);
        rates.insert(Compartment::I, vec![&state.i * self.recovery_rate()]);
        Ok(rates)
    }

    /// Applies one step of counts. Counts are not capped by the compartment
    /// they drain: a state driven negative is reported as
    /// [`EngineError::NegativeState`] rather than clamped.
    fn apply_transitionings(
        &self,
        t: f64,
        tau: f64,
        transitionings: &Transitionings,
        state: &State,
    ) -> Result<State> {
        let infections = counts(transitionings, Compartment::S, state)?;
        let recoveries = counts(transitionings, Compartment::I, state)?;
        trace!("applying transitionings at t = {t}, tau = {tau}");

        let next = State::new(
            &state.s - &infections,
            &state.i + &infections - &recoveries,
            &state.r + &recoveries,
        )?;
        next.check_non_negative()?;
        Ok(next)
    }
}

fn counts(
    transitionings: &Transitionings,
    compartment: Compartment,
    state: &State,
) -> Result<DMatrix<f64>> {
    let count = transitionings
        .get(&compartment)
        .and_then(|outgoing| outgoing.first())
        .ok_or(EngineError::MissingTransition { compartment })?;
    if count.shape() != state.shape() {
        return Err(EngineError::shape(
            "transition counts",
            state.shape(),
            count.shape(),
        ));
    }
    Ok(count.map(|c| c as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::MatrixStack;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use proptest::prelude::*;

    fn model(f_v: f64, mobility: DMatrix<f64>) -> SpatialSir {
        SpatialSir::new(
            Parameters::new(
                0.1,
                5.0,
                f_v,
                DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]),
                MatrixStack::Broadcast(mobility),
            ),
            ForceOfInfection::ContactTensor,
        )
    }

    fn scenario_model() -> SpatialSir {
        model(0.5, DMatrix::from_row_slice(2, 2, &[0.0, 0.3, 0.2, 0.0]))
    }

    fn scenario_state() -> State {
        State::new(
            DMatrix::from_element(2, 2, 100.0),
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]),
            DMatrix::zeros(2, 2),
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_reachable_cells() {
        let model = scenario_model();
        let state = scenario_state();
        let lambda = model.force_of_infection(&state).unwrap();
        assert!(lambda.iter().all(|l| *l > 0.0));

        let d = model.derivative(0.0, &state).unwrap();
        // Every susceptible cell without infectious residents gains infections.
        assert!(d.di[(1, 0)] > 0.0);
        assert!(d.di[(0, 1)] > 0.0);
        assert!(d.di[(1, 1)] > 0.0);
        // The seeded cell also loses its case to recovery at rate 1 / gamma.
        assert_relative_eq!(d.di[(0, 0)], lambda[(0, 0)] * 100.0 - 0.2, epsilon = 1e-15);
        assert_relative_eq!(d.dr[(0, 0)], 0.2);
    }

    #[test]
    fn test_scenario_unreachable_location() {
        // Residents of patch 1 never visit patch 0, where the case is.
        let model = model(0.5, DMatrix::from_row_slice(2, 2, &[0.0, 0.3, 0.0, 0.0]));
        let state = scenario_state();
        let d = model.derivative(0.0, &state).unwrap();
        assert!(d.di[(0, 0)] != 0.0);
        assert!(d.di[(1, 0)] > 0.0);
        assert_abs_diff_eq!(d.di[(0, 1)], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(d.di[(1, 1)], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_zero_infection_fixed_point() {
        let mut state = scenario_state();
        state.i.fill(0.0);
        let d = scenario_model().derivative(3.0, &state).unwrap();
        assert_eq!(d.ds, DMatrix::zeros(2, 2));
        assert_eq!(d.dr, DMatrix::zeros(2, 2));
    }

    #[test]
    fn test_time_homogeneous() {
        let model = scenario_model();
        let state = scenario_state();
        assert_eq!(
            model.derivative(0.0, &state).unwrap(),
            model.derivative(42.0, &state).unwrap()
        );
    }

    #[test]
    fn test_rates() {
        let model = scenario_model();
        let state = scenario_state();
        let rates = model.rates(0.0, &state).unwrap();
        assert_eq!(rates.len(), 2);
        let lambda = model.force_of_infection(&state).unwrap();
        assert_relative_eq!(rates[&Compartment::S][0], lambda * 100.0, epsilon = 1e-15);
        assert_relative_eq!(
            rates[&Compartment::I][0],
            DMatrix::from_row_slice(2, 2, &[0.2, 0.0, 0.0, 0.0])
        );
    }

    #[test]
    fn test_apply_transitionings() {
        let model = scenario_model();
        let state = scenario_state();
        let mut counts = Transitionings::new();
        counts.insert(
            Compartment::S,
            vec![DMatrix::from_row_slice(2, 2, &[3, 1, 0, 2])],
        );
        counts.insert(
            Compartment::I,
            vec![DMatrix::from_row_slice(2, 2, &[1, 0, 0, 0])],
        );
        let next = model.apply_transitionings(0.0, 1.0, &counts, &state).unwrap();
        assert_eq!(next.s, DMatrix::from_row_slice(2, 2, &[97.0, 99.0, 100.0, 98.0]));
        assert_eq!(next.i, DMatrix::from_row_slice(2, 2, &[3.0, 1.0, 0.0, 2.0]));
        assert_eq!(next.r, DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]));
        assert_eq!(next.total(), state.total());
    }

    #[test]
    fn test_oversampling_is_reported() {
        let model = scenario_model();
        let state = scenario_state();
        let mut counts = Transitionings::new();
        counts.insert(Compartment::S, vec![DMatrix::zeros(2, 2)]);
        counts.insert(
            Compartment::I,
            vec![DMatrix::from_row_slice(2, 2, &[2, 0, 0, 0])],
        );
        assert_eq!(
            model.apply_transitionings(0.0, 1.0, &counts, &state),
            Err(EngineError::NegativeState {
                compartment: Compartment::I,
                age: 0,
                location: 0,
                value: -1.0
            })
        );
    }

    #[test]
    fn test_missing_transition() {
        let model = scenario_model();
        let mut counts = Transitionings::new();
        counts.insert(Compartment::S, vec![DMatrix::zeros(2, 2)]);
        assert_eq!(
            model.apply_transitionings(0.0, 1.0, &counts, &scenario_state()),
            Err(EngineError::MissingTransition {
                compartment: Compartment::I
            })
        );
        counts.insert(Compartment::I, vec![]);
        assert!(model
            .apply_transitionings(0.0, 1.0, &counts, &scenario_state())
            .is_err());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut model = scenario_model();
        model.parameters.f_v = -0.1;
        assert!(matches!(
            model.derivative(0.0, &scenario_state()),
            Err(EngineError::InvalidParameter { name: "f_v", .. })
        ));
        assert!(model.rates(0.0, &scenario_state()).is_err());
    }

    #[test]
    fn test_state_shape_rejected() {
        let state = State::new(
            DMatrix::from_element(3, 2, 10.0),
            DMatrix::zeros(3, 2),
            DMatrix::zeros(3, 2),
        )
        .unwrap();
        assert!(matches!(
            scenario_model().derivative(0.0, &state),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_derivative_conserves_population(
            s in prop::collection::vec(0.0f64..1e5, 6),
            i in prop::collection::vec(0.0f64..1e3, 6),
            r in prop::collection::vec(0.0f64..1e4, 6),
            f_v in 0.0f64..=1.0,
        ) {
            let mobility = DMatrix::from_row_slice(3, 3, &[0.0, 0.1, 0.2, 0.05, 0.0, 0.3, 0.0, 0.4, 0.0]);
            let mut model = model(f_v, mobility);
            model.force = ForceOfInfection::VisitingPopulation;
            let state = State::new(
                DMatrix::from_row_slice(2, 3, &s),
                DMatrix::from_row_slice(2, 3, &i),
                DMatrix::from_row_slice(2, 3, &r),
            ).unwrap();
            let d = model.derivative(0.0, &state).unwrap();
            for (k, total) in d.sum().iter().enumerate() {
                let scale = d.ds[k].abs().max(d.di[k].abs()).max(d.dr[k].abs()).max(1.0);
                prop_assert!(total.abs() <= 1e-9 * scale);
            }
        }

        #[test]
        fn prop_transitionings_conserve_population(
            s in prop::collection::vec(0u64..1000, 4),
            i in prop::collection::vec(0u64..1000, 4),
            infections in prop::collection::vec(0u64..1000, 4),
            recoveries in prop::collection::vec(0u64..1000, 4),
        ) {
            let to_f64 = |v: &Vec<u64>| DMatrix::from_row_slice(2, 2, &v.iter().map(|x| *x as f64).collect::<Vec<_>>());
            let state = State::new(to_f64(&s), to_f64(&i), DMatrix::from_element(2, 2, 5.0)).unwrap();
            let mut counts = Transitionings::new();
            counts.insert(Compartment::S, vec![DMatrix::from_row_slice(2, 2, &infections)]);
            counts.insert(Compartment::I, vec![DMatrix::from_row_slice(2, 2, &recoveries)]);

            match scenario_model().apply_transitionings(0.0, 1.0, &counts, &state) {
                Ok(next) => prop_assert_eq!(next.total(), state.total()),
                Err(EngineError::NegativeState { .. }) => {
                    prop_assert!((0..4).any(|k| infections[k] > s[k] || recoveries[k] > i[k] + infections[k]));
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
