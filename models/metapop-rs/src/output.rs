use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use spatial_sir::{MatrixStack, State, visiting_population};

use crate::error::Result;
use crate::parameters::Method;
use crate::simulate::Trajectory;

pub const CELL_HEADERS: [&str; 7] = ["replicate", "time", "age", "location", "S", "I", "R"];
pub const TOTAL_HEADERS: [&str; 5] = ["replicate", "time", "S", "I", "R"];

/// Long-format rows, one per replicate, time and cell.
pub fn cell_rows(trajectories: &[Trajectory]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for trajectory in trajectories {
        for (t, state) in trajectory.times.iter().zip(&trajectory.states) {
            for age in 0..state.n_age() {
                for location in 0..state.n_locations() {
                    rows.push(vec![
                        trajectory.replicate.to_string(),
                        t.to_string(),
                        age.to_string(),
                        location.to_string(),
                        state.s[(age, location)].to_string(),
                        state.i[(age, location)].to_string(),
                        state.r[(age, location)].to_string(),
                    ]);
                }
            }
        }
    }
    rows
}

pub fn total_rows(trajectories: &[Trajectory]) -> Vec<Vec<String>> {
    trajectories
        .iter()
        .flat_map(|trajectory| {
            trajectory.totals().into_iter().map(|(t, s, i, r)| {
                vec![
                    trajectory.replicate.to_string(),
                    t.to_string(),
                    s.to_string(),
                    i.to_string(),
                    r.to_string(),
                ]
            })
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ReplicateSummary {
    pub replicate: u64,
    pub final_time: f64,
    pub susceptible: f64,
    pub infectious: f64,
    pub recovered: f64,
    /// Final population present on each patch per age group after mobility.
    pub visiting_population: Vec<Vec<f64>>,
}

#[derive(Debug, Serialize)]
pub struct RunMetadata {
    pub input_digest: String,
    pub seed: u64,
    pub method: Method,
    pub replicates: Vec<ReplicateSummary>,
}

impl RunMetadata {
    pub fn new(
        input: &serde_json::Map<String, Value>,
        seed: u64,
        method: Method,
        mobility: &MatrixStack,
        trajectories: &[Trajectory],
    ) -> Result<Self> {
        let replicates = trajectories
            .iter()
            .filter_map(|trajectory| {
                let state = trajectory.final_state()?;
                let final_time = *trajectory.times.last()?;
                Some(summarize(trajectory.replicate, final_time, state, mobility))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RunMetadata {
            input_digest: input_digest(input)?,
            seed,
            method,
            replicates,
        })
    }
}

fn summarize(
    replicate: u64,
    final_time: f64,
    state: &State,
    mobility: &MatrixStack,
) -> Result<ReplicateSummary> {
    let visiting = visiting_population(&state.total(), mobility)?;
    Ok(ReplicateSummary {
        replicate,
        final_time,
        susceptible: state.s.sum(),
        infectious: state.i.sum(),
        recovered: state.r.sum(),
        visiting_population: visiting
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect(),
    })
}

/// SHA-256 of the scenario inputs, hex encoded. `serde_json` maps keep
/// their keys sorted, so equal inputs give equal digests.
pub fn input_digest(input: &serde_json::Map<String, Value>) -> Result<String> {
    let bytes = serde_json::to_vec(input)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
