pub mod environment;
pub mod error;
pub mod output;
pub mod parameters;
pub mod simulate;

use std::path::Path;

use environment::Environment;
use error::{Result, RunError};
use log::{error, info};
use output::{CELL_HEADERS, RunMetadata, TOTAL_HEADERS};
use parameters::{Method, RunInput};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    if let Err(e) = run() {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // A run file on the command line takes the place of the JSON on stdin.
    let env = match std::env::args().nth(1) {
        Some(path) => Environment::from_toml_file(Path::new(&path))?,
        None => Environment::from_stdin()?,
    }
    .with_input_type::<RunInput>()?;
    let input = env
        .input
        .as_ref()
        .ok_or_else(|| RunError::Config("missing input".to_string()))?;

    let scenario = input.build(&env.files)?;
    info!(
        "simulating {} age groups x {} locations for {} time units ({:?})",
        scenario.initial.n_age(),
        scenario.initial.n_locations(),
        input.sim_length,
        input.method
    );

    let trajectories = match input.method {
        Method::Deterministic { dt } => {
            let mut trajectory =
                simulate::integrate(&scenario.model, &scenario.initial, input.sim_length, dt)?;
            trajectory.replicate = env.replicate;
            vec![trajectory]
        }
        Method::Stochastic {
            tau,
            replicates,
            max_redraws,
        } => simulate::run_ensemble(
            &scenario.model,
            &scenario.initial,
            input.sim_length,
            tau,
            max_redraws,
            replicates,
            env.seed,
            env.replicate,
        )?,
    };

    env.write_csv("sir_output.csv", &CELL_HEADERS, &output::cell_rows(&trajectories))?;
    env.write_csv("sir_totals.csv", &TOTAL_HEADERS, &output::total_rows(&trajectories))?;

    let metadata = RunMetadata::new(
        env.input_json(),
        env.seed,
        input.method,
        &scenario.model.parameters.mobility,
        &trajectories,
    )?;
    env.write("run_metadata.json", &serde_json::to_vec_pretty(&metadata)?)?;

    for summary in &metadata.replicates {
        info!(
            "replicate {} at t = {}: S = {}, I = {}, R = {}",
            summary.replicate,
            summary.final_time,
            summary.susceptible,
            summary.infectious,
            summary.recovered
        );
    }
    Ok(())
}
