use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use spatial_sir::{Compartment, ForceOfInfection, MatrixStack, Parameters, SpatialSir, State};

use crate::error::{Result, RunError};

/// Scenario inputs. Matrices are nested row-major lists; `contacts` and
/// `mobility` may instead come from the `contacts` / `mobility` data files.
#[derive(Debug, Clone, Deserialize)]
pub struct RunInput {
    pub beta: f64,
    pub gamma: f64,
    pub f_v: f64,
    #[serde(default)]
    pub contacts: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub mobility: Option<MobilityInput>,
    pub susceptible: Vec<Vec<f64>>,
    pub infectious: Vec<Vec<f64>>,
    #[serde(default)]
    pub recovered: Option<Vec<Vec<f64>>>,
    #[serde(default = "default_sim_length")]
    pub sim_length: f64,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub force_of_infection: ForceOfInfection,
    #[serde(default = "default_true")]
    pub zero_mobility_diagonal: bool,
}

/// Origin-destination fractions, `[p][q]` or per age group as `[p][q][age]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MobilityInput {
    Shared(Vec<Vec<f64>>),
    AgeStratified(Vec<Vec<Vec<f64>>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Method {
    Deterministic {
        #[serde(default = "default_dt")]
        dt: f64,
    },
    Stochastic {
        #[serde(default = "default_tau")]
        tau: f64,
        #[serde(default = "default_replicates")]
        replicates: u64,
        /// Redraws allowed per step when a draw empties a compartment
        /// below zero. Zero aborts on the first such draw.
        #[serde(default = "default_max_redraws")]
        max_redraws: usize,
    },
}

impl Default for Method {
    fn default() -> Self {
        Method::Deterministic { dt: default_dt() }
    }
}

fn default_sim_length() -> f64 {
    90.0
}

fn default_true() -> bool {
    true
}

fn default_dt() -> f64 {
    0.25
}

fn default_tau() -> f64 {
    0.5
}

fn default_replicates() -> u64 {
    1
}

fn default_max_redraws() -> usize {
    100
}

/// Tau-leaping moves whole individuals, so every starting count must be an
/// integer.
fn whole_counts(state: &State) -> Result<()> {
    for compartment in Compartment::ALL {
        let values = state.compartment(compartment);
        if let Some(k) = values.iter().position(|v| v.fract() != 0.0) {
            let (age, location) = (k % values.nrows(), k / values.nrows());
            return Err(RunError::Config(format!(
                "stochastic runs need whole counts: {compartment} at age {age}, \
                 location {location} is {}",
                values[k]
            )));
        }
    }
    Ok(())
}

/// A model ready to run together with its initial state.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub model: SpatialSir,
    pub initial: State,
}

impl RunInput {
    pub fn build(&self, files: &HashMap<String, PathBuf>) -> Result<Scenario> {
        if !(self.sim_length.is_finite() && self.sim_length > 0.0) {
            return Err(RunError::Config(format!(
                "sim_length must be positive, got {}",
                self.sim_length
            )));
        }
        match self.method {
            Method::Deterministic { dt } if !(dt.is_finite() && dt > 0.0) => {
                return Err(RunError::Config(format!("dt must be positive, got {dt}")));
            }
            Method::Stochastic { tau, .. } if !(tau.is_finite() && tau > 0.0) => {
                return Err(RunError::Config(format!("tau must be positive, got {tau}")));
            }
            _ => {}
        }

        let s = matrix(&self.susceptible, "susceptible")?;
        let i = matrix(&self.infectious, "infectious")?;
        let r = match &self.recovered {
            Some(rows) => matrix(rows, "recovered")?,
            None => DMatrix::zeros(s.nrows(), s.ncols()),
        };
        let initial = State::new(s, i, r)?;
        initial.check_non_negative()?;
        if matches!(self.method, Method::Stochastic { .. }) {
            whole_counts(&initial)?;
        }

        let contacts = match (&self.contacts, files.get("contacts")) {
            (Some(rows), _) => matrix(rows, "contacts")?,
            (None, Some(path)) => load_matrix(path)?,
            (None, None) => return Err(RunError::Config("no contact matrix given".to_string())),
        };

        let mut mobility = match (&self.mobility, files.get("mobility")) {
            (Some(MobilityInput::Shared(rows)), _) => MatrixStack::Broadcast(matrix(rows, "mobility")?),
            (Some(MobilityInput::AgeStratified(cube)), _) => stratified(cube)?,
            (None, Some(path)) => MatrixStack::Broadcast(load_matrix(path)?),
            (None, None) => return Err(RunError::Config("no mobility matrix given".to_string())),
        };
        if self.zero_mobility_diagonal {
            mobility = zero_diagonal(mobility);
        }

        let parameters = Parameters::new(self.beta, self.gamma, self.f_v, contacts, mobility);
        parameters.validate(initial.n_age(), initial.n_locations())?;

        Ok(Scenario {
            model: SpatialSir::new(parameters, self.force_of_infection),
            initial,
        })
    }
}

fn matrix(rows: &[Vec<f64>], what: &str) -> Result<DMatrix<f64>> {
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.is_empty() || ncols == 0 {
        return Err(RunError::Config(format!("{what} is empty")));
    }
    if let Some(row) = rows.iter().position(|row| row.len() != ncols) {
        return Err(RunError::Config(format!(
            "{what} row {row} has {} entries, expected {ncols}",
            rows[row].len()
        )));
    }
    Ok(DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]))
}

fn stratified(cube: &[Vec<Vec<f64>>]) -> Result<MatrixStack> {
    let n = cube.len();
    let n_age = cube
        .first()
        .and_then(|row| row.first())
        .map_or(0, Vec::len);
    let well_formed = n_age > 0
        && cube
            .iter()
            .all(|row| row.len() == n && row.iter().all(|ages| ages.len() == n_age));
    if !well_formed {
        return Err(RunError::Config(
            "age-stratified mobility must have shape [location][location][age]".to_string(),
        ));
    }
    Ok(MatrixStack::Layers(
        (0..n_age)
            .map(|a| DMatrix::from_fn(n, n, |p, q| cube[p][q][a]))
            .collect(),
    ))
}

/// Self-loops are handled by the home term, so they are removed from the
/// origin-destination data.
fn zero_diagonal(stack: MatrixStack) -> MatrixStack {
    match stack {
        MatrixStack::Broadcast(mut w) => {
            w.fill_diagonal(0.0);
            MatrixStack::Broadcast(w)
        }
        MatrixStack::Layers(mut layers) => {
            for w in layers.iter_mut() {
                w.fill_diagonal(0.0);
            }
            MatrixStack::Layers(layers)
        }
    }
}

/// Reads a headerless numeric CSV into a matrix.
pub fn load_matrix(path: &Path) -> Result<DMatrix<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .map(|field| {
                field.parse::<f64>().map_err(|e| {
                    RunError::Config(format!("{}: bad value {field:?}: {e}", path.display()))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    matrix(&rows, &path.display().to_string())
}
