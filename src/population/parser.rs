//! Reader for the pharmacokinetic-data table.
//!
//! The table is a CSV with one row per trial: subject id, trial id, body
//! mass, a dosing-type flag (1 = oral slow release, 2 = oral immediate,
//! 3 = intravenous), and semicolon-separated lists of dosing times, dose
//! amounts, sampling times, and sampled values. Rows sharing a subject id
//! become experiments of the same individual.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::{Experiment, Individual};
use crate::dosing::{DoseForm, Regimen};
use crate::error::{ConfigError, PbpkError};
use crate::model::outputs::OutputId;

/// How CSV dosing flags translate into regimens.
#[derive(Debug, Clone, Copy)]
pub struct PkDataOptions {
    /// Infusion window for bolus-equivalent doses (h).
    pub infusion_duration: f64,
    /// Lumen form for immediate-release rows.
    pub immediate_form: DoseForm,
    /// Weibull shape for slow-release rows.
    pub release_shape: f64,
    /// Weibull scale for slow-release rows.
    pub release_scale: f64,
    /// Output the sampled values refer to.
    pub output: OutputId,
}

impl Default for PkDataOptions {
    fn default() -> Self {
        PkDataOptions {
            infusion_duration: 0.1,
            immediate_form: DoseForm::ImmediateDissolved,
            release_shape: 1.0,
            release_scale: 1.0,
            output: OutputId::CentralNgPerMl,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    subject_id: String,
    trial_id: String,
    body_mass: f64,
    dosing_type: u8,
    dosing_times: String,
    dose_amounts: String,
    sampling_times: String,
    sampled_values: String,
}

fn parse_list(record: usize, field: &str, raw: &str) -> Result<Vec<f64>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|_| ConfigError::MalformedPkData {
                record,
                reason: format!("cannot parse `{}` in {}", s, field),
            })
        })
        .collect()
}

fn build_regimen(
    record: usize,
    options: &PkDataOptions,
    dosing_type: u8,
    times: &[f64],
    amounts: &[f64],
) -> Result<Regimen, PbpkError> {
    if times.is_empty() || times.len() != amounts.len() {
        return Err(ConfigError::MalformedPkData {
            record,
            reason: format!(
                "dosing times ({}) and amounts ({}) must be non-empty and parallel",
                times.len(),
                amounts.len()
            ),
        }
        .into());
    }
    let interval = if times.len() > 1 {
        times[1] - times[0]
    } else {
        0.0
    };
    let regimen = match dosing_type {
        1 => Regimen::weibull_release(
            DoseForm::DelayedDissolved,
            amounts.iter().sum(),
            times[0],
            options.release_shape,
            options.release_scale,
        )?,
        2 => Regimen::repeated_bolus(
            options.immediate_form,
            amounts[0],
            times.len() as u32,
            interval,
            options.infusion_duration,
        )?,
        3 => Regimen::intravenous(
            amounts[0],
            times.len() as u32,
            interval,
            options.infusion_duration,
        )?,
        other => {
            return Err(ConfigError::MalformedPkData {
                record,
                reason: format!("unknown dosing type flag {}", other),
            }
            .into())
        }
    };
    Ok(regimen)
}

/// Parse a pkdata table from any reader.
pub fn read_pkdata<R: Read>(
    reader: R,
    options: &PkDataOptions,
) -> Result<Vec<Individual>, PbpkError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut individuals: Vec<Individual> = Vec::new();
    for (index, row) in csv_reader.deserialize::<RawRecord>().enumerate() {
        let record = index + 1;
        let raw = row.map_err(|e| ConfigError::MalformedPkData {
            record,
            reason: e.to_string(),
        })?;

        let dosing_times = parse_list(record, "dosing_times", &raw.dosing_times)?;
        let dose_amounts = parse_list(record, "dose_amounts", &raw.dose_amounts)?;
        let sampling_times = parse_list(record, "sampling_times", &raw.sampling_times)?;
        let sampled_values = parse_list(record, "sampled_values", &raw.sampled_values)?;

        let regimen = build_regimen(
            record,
            options,
            raw.dosing_type,
            &dosing_times,
            &dose_amounts,
        )?;
        let experiment = Experiment {
            id: raw.trial_id,
            regimen,
            output: options.output,
            times: sampling_times,
            observations: sampled_values,
        };

        match individuals
            .iter_mut()
            .find(|individual| individual.id == raw.subject_id)
        {
            Some(individual) => individual.experiments.push(experiment),
            None => individuals.push(Individual {
                id: raw.subject_id,
                body_mass: raw.body_mass,
                experiments: vec![experiment],
            }),
        }
    }
    Ok(individuals)
}

/// Parse a pkdata table from a file path.
pub fn read_pkdata_path<P: AsRef<Path>>(
    path: P,
    options: &PkDataOptions,
) -> Result<Vec<Individual>, PbpkError> {
    let file = File::open(path.as_ref()).map_err(|e| ConfigError::MalformedPkData {
        record: 0,
        reason: format!("cannot open {}: {}", path.as_ref().display(), e),
    })?;
    read_pkdata(file, options)
}
