//! Physiologically based pharmacokinetic simulation with a compartmental
//! absorption-and-transit gut model and a hierarchical population layer.
//!
//! The crate has three parts:
//! - [`params`] and [`model`]: raw parameter sets, the one-shot scaler that
//!   derives per-simulation constants, the mass-balance dynamics, and the
//!   derived output calculator.
//! - [`dosing`] and [`simulator`]: dosing/release generation and the
//!   forward driver that couples the dynamics to the external stiff solver.
//! - [`population`]: the population / individual / experiment tree with
//!   priors, random-effect sampling, and the observation likelihood
//!   consumed by an external Bayesian estimation driver.

pub mod dosing;
pub mod error;
pub mod model;
pub mod params;
pub mod population;
pub mod simulator;

pub use dosing::{DoseForm, DoseProgram, DoseRate, Regimen};
pub use error::{ConfigError, PbpkError};
pub use model::{Diagnostics, OutputId, Outputs, ScaledModel};
pub use params::{AcidBase, Physiology, Segment, Substance};
pub use population::{
    Experiment, Individual, IndividualDraw, ParamId, Population, PopulationDraw, PopulationFit,
    Prior, ThetaSpec,
};
pub use simulator::{MassBalanceReport, MassBalanceViolation, Settings, Simulation, Trajectory};

pub mod prelude {
    pub use crate::dosing::{DoseForm, Regimen};
    pub use crate::error::{ConfigError, PbpkError};
    pub use crate::model::{OutputId, Outputs};
    pub use crate::params::{AcidBase, Physiology, Segment, Substance};
    pub use crate::population::parser::{read_pkdata, read_pkdata_path, PkDataOptions};
    pub use crate::population::{
        Experiment, Individual, IndividualDraw, ParamId, Population, PopulationDraw, Prior,
        ThetaSpec,
    };
    pub use crate::simulator::{Settings, Simulation, Trajectory};
}
