use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, RunError};

/// Run environment handed to the model: scenario inputs, random seed,
/// replicate index, data files and where output goes.
pub struct Environment<I = ()> {
    input_json: serde_json::Map<String, Value>,
    pub input: Option<I>,
    pub seed: u64,
    pub replicate: u64,
    pub files: HashMap<String, PathBuf>,
    output: Value,
}

impl Environment {
    pub fn from_json(data: Value) -> Self {
        let mut input_json = data
            .get("input")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let seed = input_json
            .remove("seed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let replicate = input_json
            .remove("replicate")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let files = data
            .get("model")
            .and_then(|m| m.get("files"))
            .and_then(|f| f.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), PathBuf::from(s))))
                    .collect()
            })
            .unwrap_or_default();

        let output = data.get("output").cloned().unwrap_or(Value::Null);

        Self {
            input_json,
            input: None,
            seed,
            replicate,
            files,
            output,
        }
    }

    pub fn from_stdin() -> Result<Self> {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Err(RunError::Config("no input on stdin".to_string()));
        }
        let data: Value = serde_json::from_str(&raw)?;
        Ok(Self::from_json(data))
    }

    /// Same document as [`Environment::from_json`], written as TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let data: Value = toml::from_str(raw)?;
        Ok(Self::from_json(data))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn with_input_type<I: DeserializeOwned>(self) -> Result<Environment<I>> {
        let input_value = Value::Object(self.input_json.clone());
        let input = serde_json::from_value(input_value)?;
        Ok(Environment {
            input_json: self.input_json,
            input: Some(input),
            seed: self.seed,
            replicate: self.replicate,
            files: self.files,
            output: self.output,
        })
    }
}

impl<I> Environment<I> {
    pub fn input_json(&self) -> &serde_json::Map<String, Value> {
        &self.input_json
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        let output = &self.output;

        if output.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
            return output
                .get("dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from);
        }

        // Profiled output: use "default", else the first profile.
        let profile = output
            .get("profile")
            .and_then(|v| v.as_object())
            .and_then(|profiles| profiles.get("default").or_else(|| profiles.values().next()))?;
        if profile.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
            return profile
                .get("dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from);
        }

        None
    }

    pub fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        match self.output_dir() {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                fs::write(dir.join(filename), data)?;
            }
            None => io::stdout().write_all(data)?,
        }
        Ok(())
    }

    pub fn write_csv(&self, filename: &str, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
        match self.output_dir() {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                let file = fs::File::create(dir.join(filename))?;
                write_records(csv::Writer::from_writer(file), headers, rows)
            }
            None => write_records(csv::Writer::from_writer(io::stdout()), headers, rows),
        }
    }
}

fn write_records<W: Write>(
    mut wtr: csv::Writer<W>,
    headers: &[&str],
    rows: &[Vec<String>],
) -> Result<()> {
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
