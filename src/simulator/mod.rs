//! Forward simulation driver.
//!
//! Couples the scaled model and compiled dosing program to the external
//! stiff solver and returns the state trajectory sampled at the requested
//! output times. The solver is treated as a black box honoring an
//! (rtol, atol) tolerance contract; step-size and stability control stay on
//! its side of the interface.

mod closure;

use diffsol::{
    error::{DiffsolError, OdeSolverError},
    ode_solver::method::OdeSolverMethod,
    Bdf, NewtonNonlinearSolver, OdeBuilder, OdeSolverStopReason,
};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::dosing::{DoseProgram, Regimen};
use crate::error::{ConfigError, PbpkError};
use crate::model::outputs::{self, OutputId, Outputs};
use crate::model::scaled::ScaledModel;
use crate::model::state::{conserved_mass, N_STATES};
use crate::params::{Physiology, Substance};
use closure::AcatProblem;

type M = nalgebra::DMatrix<f64>;

/// Solver and diagnostic settings for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Settings {
    pub rtol: f64,
    pub atol: f64,
    /// Initial step size handed to the solver.
    pub h0: f64,
    /// Relative threshold for the post-hoc conservation check.
    pub mass_balance_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rtol: 1e-4,
            atol: 1e-4,
            h0: 1e-3,
            mass_balance_tolerance: 1e-6,
        }
    }
}

/// Raw state trajectory sampled at the output times.
#[derive(Debug, Clone)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Array2<f64>,
}

impl Trajectory {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &Array2<f64> {
        &self.states
    }

    pub fn state_at(&self, index: usize) -> ArrayView1<'_, f64> {
        self.states.row(index)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// One mass-balance check that exceeded the tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MassBalanceViolation {
    pub time: f64,
    pub expected: f64,
    pub actual: f64,
    pub relative_error: f64,
}

/// Outcome of the post-hoc conservation diagnostic.
#[derive(Debug, Clone, Default)]
pub struct MassBalanceReport {
    pub checked: usize,
    pub violations: Vec<MassBalanceViolation>,
}

impl MassBalanceReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn worst(&self) -> Option<&MassBalanceViolation> {
        self.violations.iter().max_by(|a, b| {
            a.relative_error
                .partial_cmp(&b.relative_error)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// A fully configured forward simulation: scaled model plus compiled doses.
#[derive(Debug, Clone)]
pub struct Simulation {
    model: ScaledModel,
    program: DoseProgram,
}

impl Simulation {
    /// Scale the raw parameters and compile the regimen. All configuration
    /// errors surface here, before any integration.
    pub fn new(
        physiology: &Physiology,
        substance: &Substance,
        regimen: &Regimen,
        body_mass: f64,
    ) -> Result<Self, PbpkError> {
        let model = ScaledModel::new(physiology, substance, body_mass)?;
        Ok(Simulation {
            model,
            program: regimen.compile(),
        })
    }

    pub fn model(&self) -> &ScaledModel {
        &self.model
    }

    pub fn program(&self) -> &DoseProgram {
        &self.program
    }

    /// Integrate from t = 0 and sample the state at the given output times.
    ///
    /// Times are sorted and deduplicated; the trajectory reports the grid it
    /// actually used. The solver is stopped at every dose discontinuity so
    /// the BDF history never straddles a rate jump.
    pub fn run(&self, times: &[f64], settings: &Settings) -> Result<Trajectory, PbpkError> {
        let mut output_times: Vec<f64> = times.to_vec();
        for &t in &output_times {
            if !t.is_finite() || t < 0.0 {
                return Err(ConfigError::Negative {
                    name: "output time",
                    value: t,
                }
                .into());
            }
        }
        output_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
        output_times.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        if output_times.is_empty() {
            return Ok(Trajectory {
                times: Vec::new(),
                states: Array2::zeros((0, N_STATES)),
            });
        }

        let t_end = *output_times.last().unwrap();
        let mut stops: Vec<f64> = output_times.clone();
        stops.extend(
            self.program
                .breakpoints()
                .into_iter()
                .filter(|&b| b > 0.0 && b < t_end),
        );
        stops.sort_by(|a, b| a.partial_cmp(b).unwrap());
        stops.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        tracing::debug!(
            stops = stops.len(),
            t_end,
            "integrating trajectory"
        );

        let problem = OdeBuilder::<M>::new()
            .atol(vec![settings.atol; N_STATES])
            .rtol(settings.rtol)
            .t0(0.0)
            .h0(settings.h0)
            .build_from_eqn(AcatProblem::new(self.model.clone(), self.program.clone()))?;
        let mut solver: Bdf<'_, AcatProblem, NewtonNonlinearSolver<M, diffsol::NalgebraLU<f64>>> =
            problem.bdf::<diffsol::NalgebraLU<f64>>()?;

        let mut states = Array2::zeros((output_times.len(), N_STATES));
        let mut row = 0;

        // The initial state is all zeros; record it for any t = 0 request.
        if output_times[row] <= 1e-12 {
            row += 1;
        }

        for &stop in stops.iter().filter(|&&s| s > 1e-12) {
            match solver.set_stop_time(stop) {
                Ok(()) => loop {
                    match solver.step() {
                        Ok(OdeSolverStopReason::InternalTimestep) => continue,
                        Ok(OdeSolverStopReason::TstopReached) => break,
                        Ok(reason) => {
                            return Err(PbpkError::Integration(format!(
                                "unexpected solver stop: {:?}",
                                reason
                            )))
                        }
                        Err(DiffsolError::OdeSolverError(
                            OdeSolverError::StepSizeTooSmall { .. },
                        )) => {
                            return Err(PbpkError::Integration(
                                "step size underflow; a rate constant is approaching zero or infinity"
                                    .to_string(),
                            ))
                        }
                        Err(err) => return Err(PbpkError::Integration(err.to_string())),
                    }
                },
                Err(DiffsolError::OdeSolverError(OdeSolverError::StopTimeAtCurrentTime)) => {}
                Err(err) => return Err(PbpkError::Integration(err.to_string())),
            }
            while row < output_times.len() && (output_times[row] - stop).abs() < 1e-12 {
                let y = solver.state().y;
                states
                    .row_mut(row)
                    .assign(&ArrayView1::from(y.as_slice()));
                row += 1;
            }
        }

        Ok(Trajectory {
            times: output_times,
            states,
        })
    }

    /// Derived outputs at every recorded time point.
    pub fn outputs(&self, trajectory: &Trajectory) -> Vec<Outputs> {
        trajectory
            .times
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                let row = trajectory.states.row(i);
                let slice = row.as_slice().expect("trajectory rows are contiguous");
                outputs::compute(&self.model, t, slice)
            })
            .collect()
    }

    /// One named output as (time, value) pairs.
    pub fn series(&self, trajectory: &Trajectory, id: OutputId) -> Vec<(f64, f64)> {
        self.outputs(trajectory)
            .into_iter()
            .map(|o| (o.time, o.get(id)))
            .collect()
    }

    /// Post-hoc conservation diagnostic: compares the conserved state sum
    /// against the cumulative administered dose at every recorded time.
    /// Violations are warnings for the specific draw, not errors.
    pub fn check_mass_balance(
        &self,
        trajectory: &Trajectory,
        settings: &Settings,
    ) -> MassBalanceReport {
        let mut report = MassBalanceReport::default();
        for (i, &t) in trajectory.times.iter().enumerate() {
            let row = trajectory.states.row(i);
            let slice = row.as_slice().expect("trajectory rows are contiguous");
            let expected = self.program.cumulative(t);
            let actual = conserved_mass(slice);
            let relative_error = (actual - expected).abs() / expected.abs().max(1e-12);
            report.checked += 1;
            if relative_error > settings.mass_balance_tolerance {
                report.violations.push(MassBalanceViolation {
                    time: t,
                    expected,
                    actual,
                    relative_error,
                });
            }
        }
        if let Some(worst) = report.worst() {
            tracing::warn!(
                violations = report.violations.len(),
                time = worst.time,
                relative_error = worst.relative_error,
                "mass balance violated"
            );
        }
        report
    }
}
