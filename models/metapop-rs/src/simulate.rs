use log::{debug, info, warn};
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng, distr::Distribution, rngs::StdRng};
use rand_distr::Poisson;
use rayon::prelude::*;
use spatial_sir::{
    EngineError, JumpModel, OdeModel, State, TransitionRates, Transitionings,
};

use crate::error::{Result, RunError};

// Tolerance when deciding whether a step landed on a whole time unit.
const TIME_EPSILON: f64 = 1e-9;

/// States recorded along one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub replicate: u64,
    pub times: Vec<f64>,
    pub states: Vec<State>,
}

impl Trajectory {
    pub fn new(replicate: u64) -> Self {
        Trajectory {
            replicate,
            times: Vec::new(),
            states: Vec::new(),
        }
    }

    pub fn push(&mut self, t: f64, state: State) {
        self.times.push(t);
        self.states.push(state);
    }

    pub fn final_state(&self) -> Option<&State> {
        self.states.last()
    }

    /// `(t, S, I, R)` summed over all cells.
    pub fn totals(&self) -> Vec<(f64, f64, f64, f64)> {
        self.times
            .iter()
            .zip(&self.states)
            .map(|(t, state)| (*t, state.s.sum(), state.i.sum(), state.r.sum()))
            .collect()
    }
}

/// One classical Runge-Kutta step over the flattened state.
pub fn rk4_step<M: OdeModel>(model: &M, t: f64, dt: f64, state: &State) -> Result<State> {
    let (n_age, n_locations) = state.shape();
    let y = state.to_flat();
    let shifted = |k: &[f64], h: f64| -> Result<State> {
        let y: Vec<f64> = y.iter().zip(k).map(|(y, k)| y + h * k).collect();
        Ok(State::from_flat(n_age, n_locations, &y)?)
    };

    let k1 = model.derivative(t, state)?.to_flat();
    let k2 = model
        .derivative(t + 0.5 * dt, &shifted(&k1, 0.5 * dt)?)?
        .to_flat();
    let k3 = model
        .derivative(t + 0.5 * dt, &shifted(&k2, 0.5 * dt)?)?
        .to_flat();
    let k4 = model.derivative(t + dt, &shifted(&k3, dt)?)?.to_flat();

    let next: Vec<f64> = (0..y.len())
        .map(|n| y[n] + (dt / 6.0) * (k1[n] + 2.0 * k2[n] + 2.0 * k3[n] + k4[n]))
        .collect();
    Ok(State::from_flat(n_age, n_locations, &next)?)
}

/// Integrates from `t = 0` to `sim_length` with fixed steps of at most `dt`,
/// recording every whole time unit and the end point.
pub fn integrate<M: OdeModel>(
    model: &M,
    initial: &State,
    sim_length: f64,
    dt: f64,
) -> Result<Trajectory> {
    let mut trajectory = Trajectory::new(0);
    let mut state = initial.clone();
    let mut t = 0.0;
    trajectory.push(t, state.clone());

    while t < sim_length - TIME_EPSILON {
        let h = dt.min(sim_length - t);
        state = rk4_step(model, t, h, &state)?;
        let next = t + h;
        let done = next >= sim_length - TIME_EPSILON;
        if done || crosses_whole_time(t, next) {
            trajectory.push(next, state.clone());
        }
        t = next;
    }
    debug!("integrated {} records up to t = {t}", trajectory.times.len());
    Ok(trajectory)
}

fn crosses_whole_time(from: f64, to: f64) -> bool {
    (to + TIME_EPSILON).floor() > (from + TIME_EPSILON).floor()
}

/// Draws `Poisson(rate * tau)` counts for every transition and cell.
pub fn sample_transitionings<R: Rng + ?Sized>(
    rates: &TransitionRates,
    tau: f64,
    rng: &mut R,
) -> Result<Transitionings> {
    let mut transitionings = Transitionings::new();
    for (compartment, outgoing) in rates {
        let mut counts = Vec::with_capacity(outgoing.len());
        for rate in outgoing {
            let mut drawn = DMatrix::<u64>::zeros(rate.nrows(), rate.ncols());
            for (count, rate) in drawn.iter_mut().zip(rate.iter()) {
                let mean = rate * tau;
                // Poisson requires a positive mean
                if mean > 0.0 {
                    let poisson = Poisson::new(mean).map_err(|e| {
                        RunError::Sampling(format!("{compartment} rate {rate}: {e}"))
                    })?;
                    *count = poisson.sample(rng) as u64;
                }
            }
            counts.push(drawn);
        }
        transitionings.insert(*compartment, counts);
    }
    Ok(transitionings)
}

/// Fixed-step tau-leaping from `t = 0` to `sim_length`. The last leap is
/// shortened so the run ends exactly at `sim_length`.
///
/// A draw that would leave a compartment negative is discarded and redrawn,
/// at most `max_redraws` times per step; after that the engine's
/// [`EngineError::NegativeState`] is returned.
pub fn tau_leap<M: JumpModel, R: Rng + ?Sized>(
    model: &M,
    initial: &State,
    sim_length: f64,
    tau: f64,
    max_redraws: usize,
    rng: &mut R,
    replicate: u64,
) -> Result<Trajectory> {
    let mut trajectory = Trajectory::new(replicate);
    let mut state = initial.clone();
    let mut t = 0.0;
    trajectory.push(t, state.clone());

    while t < sim_length - TIME_EPSILON {
        let h = tau.min(sim_length - t);
        let rates = model.rates(t, &state)?;
        let mut redraws = 0;
        state = loop {
            let transitionings = sample_transitionings(&rates, h, rng)?;
            match model.apply_transitionings(t, h, &transitionings, &state) {
                Ok(next) => break next,
                Err(EngineError::NegativeState {
                    compartment,
                    age,
                    location,
                    value,
                }) if redraws < max_redraws => {
                    redraws += 1;
                    warn!(
                        "replicate {replicate}, t = {t}: {compartment} at age {age}, \
                         location {location} would be {value}; redrawing ({redraws}/{max_redraws})"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };
        t += h;
        trajectory.push(t, state.clone());
    }
    Ok(trajectory)
}

/// Runs `replicates` independent tau-leaping trajectories in parallel.
/// Replicate `k` is numbered `first_replicate + k` and seeded with
/// `seed + first_replicate + k`.
#[allow(clippy::too_many_arguments)]
pub fn run_ensemble<M: JumpModel + Sync>(
    model: &M,
    initial: &State,
    sim_length: f64,
    tau: f64,
    max_redraws: usize,
    replicates: u64,
    seed: u64,
    first_replicate: u64,
) -> Result<Vec<Trajectory>> {
    info!("running {replicates} stochastic replicates with tau = {tau}");
    (0..replicates)
        .into_par_iter()
        .map(|k| {
            let replicate = first_replicate + k;
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(replicate));
            tau_leap(model, initial, sim_length, tau, max_redraws, &mut rng, replicate)
        })
        .collect()
}
