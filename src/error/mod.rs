use thiserror::Error;

/// Top-level error type for the crate.
///
/// Configuration problems are detected before integration starts and carry
/// the identity of the offending parameter or experiment. Integration
/// failures are reported per trajectory so that one failing draw in a
/// population run does not abort its siblings.
#[derive(Error, Debug)]
pub enum PbpkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The stiff solver could not meet its tolerance contract.
    #[error("integration failed: {0}")]
    Integration(String),

    #[error("solver setup failed: {0}")]
    Solver(#[from] diffsol::error::DiffsolError),
}

/// Errors raised while validating a parameter set, dosing regimen, or
/// population tree. All variants are fatal to the run they belong to and
/// are raised before the first derivative evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("parameter `{name}` is not finite (value: {value})")]
    NonFinite { name: &'static str, value: f64 },

    #[error("parameter `{name}` must be positive (value: {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("parameter `{name}` must not be negative (value: {value})")]
    Negative { name: &'static str, value: f64 },

    /// The liver flow fraction does not cover the summed gut-segment
    /// fractions, which would imply a negative hepatic arterial flow.
    #[error(
        "inconsistent blood flow fractions: portal flow {portal} exceeds total hepatic flow {hepatic}"
    )]
    InconsistentFlowFractions { portal: f64, hepatic: f64 },

    /// Weibull release is undefined for non-positive shape or scale.
    #[error("invalid Weibull release parameters: shape {shape}, scale {scale}")]
    InvalidWeibull { shape: f64, scale: f64 },

    /// The dose form does not match the release kind, e.g. a delayed form
    /// paired with a bolus-equivalent schedule.
    #[error("dose form {form} cannot be used with a {kind} regimen")]
    IncompatibleDoseForm {
        form: &'static str,
        kind: &'static str,
    },

    #[error("experiment `{id}`: observation times ({times}) and values ({values}) differ in length")]
    ObservationLengthMismatch {
        id: String,
        times: usize,
        values: usize,
    },

    #[error("experiment `{id}`: observed value {value} at t = {time} is not a positive finite number")]
    InvalidObservation { id: String, time: f64, value: f64 },

    #[error("population parameter `{name}` is declared more than once")]
    DuplicateParameter { name: &'static str },

    #[error("prior for `{name}` is invalid: {reason}")]
    InvalidPrior {
        name: &'static str,
        reason: &'static str,
    },

    #[error("prior for `{name}` has an empty support [{low}, {high}]")]
    InvalidBounds {
        name: &'static str,
        low: f64,
        high: f64,
    },

    #[error("individual `{id}` has no experiments")]
    EmptyIndividual { id: String },

    #[error("pkdata record {record}: {reason}")]
    MalformedPkData { record: usize, reason: String },
}
