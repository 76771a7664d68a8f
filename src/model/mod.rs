//! The compartmental ACAT/PBPK model: parameter scaling, state layout,
//! mass-balance dynamics, and derived outputs.

pub mod dynamics;
pub mod outputs;
pub mod scaled;
pub mod state;

pub use outputs::{Diagnostics, OutputId, Outputs};
pub use scaled::{ScaledModel, ScaledSegment};
