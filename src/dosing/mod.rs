//! Dosing and release-rate generation.
//!
//! A [`Regimen`] is the validated descriptor of how drug enters the system.
//! Compiling it yields a [`DoseProgram`], the time-resolved input-flux
//! function the dynamics evaluate at every step. Oral input lands in the
//! stomach lumen (dissolved or undissolved per the [`DoseForm`]), the
//! intravenous route feeds the central compartment directly.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::params::physiology::{non_negative, positive};

/// Physical form and release mode of an oral dose.
///
/// Exactly one variant is selected when the regimen is constructed;
/// immediate forms pair with bolus-equivalent schedules and delayed forms
/// with the Weibull release profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseForm {
    /// Pre-dissolved drug released directly into stomach fluid.
    ImmediateDissolved,
    /// Solid drug released into the stomach, dissolving in situ.
    ImmediateUndissolved,
    /// Extended-release formulation releasing dissolved drug.
    DelayedDissolved,
    /// Extended-release formulation releasing solid drug.
    DelayedUndissolved,
}

impl DoseForm {
    /// Whether released mass enters the dissolved lumen pool.
    pub fn is_dissolved(&self) -> bool {
        matches!(self, DoseForm::ImmediateDissolved | DoseForm::DelayedDissolved)
    }

    /// Whether this form requires a delayed-release schedule.
    pub fn is_delayed(&self) -> bool {
        matches!(self, DoseForm::DelayedDissolved | DoseForm::DelayedUndissolved)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DoseForm::ImmediateDissolved => "immediate-dissolved",
            DoseForm::ImmediateUndissolved => "immediate-undissolved",
            DoseForm::DelayedDissolved => "delayed-dissolved",
            DoseForm::DelayedUndissolved => "delayed-undissolved",
        }
    }
}

impl std::fmt::Display for DoseForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A validated dosing regimen.
///
/// Construct through the associated functions, which reject inconsistent
/// form/schedule pairs and non-positive Weibull parameters before any
/// integration starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Regimen {
    /// N doses of a fixed amount, each delivered as a short constant-rate
    /// infusion. Models instantaneous oral dosing as a brief high-rate
    /// pulse for numerical stability.
    RepeatedBolus {
        form: DoseForm,
        /// Amount per dose (umol).
        amount: f64,
        n_doses: u32,
        /// Time between dose starts (h).
        interval: f64,
        /// Infusion window per dose (h).
        duration: f64,
    },
    /// One dose on a given occasion: administered at
    /// `lag + occasion_index * interval` over `duration`.
    PerOccasion {
        form: DoseForm,
        amount: f64,
        lag: f64,
        interval: f64,
        occasion_index: u32,
        duration: f64,
    },
    /// Delayed release following a lag-shifted Weibull profile; the release
    /// rate is the Weibull density scaled by the total dose. Shape 1
    /// degenerates to first-order release.
    WeibullRelease {
        form: DoseForm,
        /// Total releasable amount (umol).
        amount: f64,
        lag: f64,
        shape: f64,
        scale: f64,
    },
    /// Bolus-equivalent infusions into the central blood compartment.
    Intravenous {
        amount: f64,
        n_doses: u32,
        interval: f64,
        duration: f64,
    },
}

impl Regimen {
    pub fn repeated_bolus(
        form: DoseForm,
        amount: f64,
        n_doses: u32,
        interval: f64,
        duration: f64,
    ) -> Result<Self, ConfigError> {
        if form.is_delayed() {
            return Err(ConfigError::IncompatibleDoseForm {
                form: form.name(),
                kind: "repeated-bolus",
            });
        }
        non_negative("dose amount", amount)?;
        non_negative("dose interval", interval)?;
        positive("infusion duration", duration)?;
        Ok(Regimen::RepeatedBolus {
            form,
            amount,
            n_doses,
            interval,
            duration,
        })
    }

    pub fn per_occasion(
        form: DoseForm,
        amount: f64,
        lag: f64,
        interval: f64,
        occasion_index: u32,
        duration: f64,
    ) -> Result<Self, ConfigError> {
        if form.is_delayed() {
            return Err(ConfigError::IncompatibleDoseForm {
                form: form.name(),
                kind: "per-occasion",
            });
        }
        non_negative("dose amount", amount)?;
        non_negative("dose lag", lag)?;
        non_negative("dose interval", interval)?;
        positive("infusion duration", duration)?;
        Ok(Regimen::PerOccasion {
            form,
            amount,
            lag,
            interval,
            occasion_index,
            duration,
        })
    }

    pub fn weibull_release(
        form: DoseForm,
        amount: f64,
        lag: f64,
        shape: f64,
        scale: f64,
    ) -> Result<Self, ConfigError> {
        if !form.is_delayed() {
            return Err(ConfigError::IncompatibleDoseForm {
                form: form.name(),
                kind: "weibull-release",
            });
        }
        non_negative("dose amount", amount)?;
        non_negative("dose lag", lag)?;
        if !(shape > 0.0 && shape.is_finite() && scale > 0.0 && scale.is_finite()) {
            return Err(ConfigError::InvalidWeibull { shape, scale });
        }
        Ok(Regimen::WeibullRelease {
            form,
            amount,
            lag,
            shape,
            scale,
        })
    }

    pub fn intravenous(
        amount: f64,
        n_doses: u32,
        interval: f64,
        duration: f64,
    ) -> Result<Self, ConfigError> {
        non_negative("dose amount", amount)?;
        non_negative("dose interval", interval)?;
        positive("infusion duration", duration)?;
        Ok(Regimen::Intravenous {
            amount,
            n_doses,
            interval,
            duration,
        })
    }

    /// Compile into the time-resolved program read by the dynamics.
    pub fn compile(&self) -> DoseProgram {
        match *self {
            Regimen::RepeatedBolus {
                form,
                amount,
                n_doses,
                interval,
                duration,
            } => {
                let windows = (0..n_doses)
                    .map(|k| DoseWindow {
                        start: k as f64 * interval,
                        duration,
                        amount,
                        target: DoseTarget::from_form(form),
                    })
                    .collect();
                DoseProgram {
                    windows,
                    release: None,
                }
            }
            Regimen::PerOccasion {
                form,
                amount,
                lag,
                interval,
                occasion_index,
                duration,
            } => DoseProgram {
                windows: vec![DoseWindow {
                    start: lag + occasion_index as f64 * interval,
                    duration,
                    amount,
                    target: DoseTarget::from_form(form),
                }],
                release: None,
            },
            Regimen::WeibullRelease {
                form,
                amount,
                lag,
                shape,
                scale,
            } => DoseProgram {
                windows: Vec::new(),
                release: Some(WeibullProfile {
                    amount,
                    lag,
                    shape,
                    scale,
                    target: DoseTarget::from_form(form),
                }),
            },
            Regimen::Intravenous {
                amount,
                n_doses,
                interval,
                duration,
            } => {
                let windows = (0..n_doses)
                    .map(|k| DoseWindow {
                        start: k as f64 * interval,
                        duration,
                        amount,
                        target: DoseTarget::Central,
                    })
                    .collect();
                DoseProgram {
                    windows,
                    release: None,
                }
            }
        }
    }
}

/// Where an input flux is deposited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseTarget {
    StomachDissolved,
    StomachUndissolved,
    Central,
}

impl DoseTarget {
    fn from_form(form: DoseForm) -> Self {
        if form.is_dissolved() {
            DoseTarget::StomachDissolved
        } else {
            DoseTarget::StomachUndissolved
        }
    }
}

/// One constant-rate infusion window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoseWindow {
    pub start: f64,
    pub duration: f64,
    pub amount: f64,
    pub target: DoseTarget,
}

impl DoseWindow {
    fn rate_at(&self, t: f64) -> f64 {
        if t >= self.start && t <= self.start + self.duration {
            self.amount / self.duration
        } else {
            0.0
        }
    }

    fn cumulative_at(&self, t: f64) -> f64 {
        if t <= self.start {
            0.0
        } else if t >= self.start + self.duration {
            self.amount
        } else {
            self.amount * (t - self.start) / self.duration
        }
    }
}

/// Lag-shifted Weibull release profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeibullProfile {
    pub amount: f64,
    pub lag: f64,
    pub shape: f64,
    pub scale: f64,
    pub target: DoseTarget,
}

impl WeibullProfile {
    /// Instantaneous release rate: total dose times the Weibull density.
    fn rate_at(&self, t: f64) -> f64 {
        let tau = t - self.lag;
        if tau <= 0.0 {
            return 0.0;
        }
        let z = tau / self.scale;
        let k = self.shape;
        self.amount * (k / self.scale) * z.powf(k - 1.0) * (-z.powf(k)).exp()
    }

    /// Released mass up to time t: total dose times the Weibull CDF.
    fn cumulative_at(&self, t: f64) -> f64 {
        let tau = t - self.lag;
        if tau <= 0.0 {
            return 0.0;
        }
        let z = tau / self.scale;
        self.amount * (1.0 - (-z.powf(self.shape)).exp())
    }
}

/// Instantaneous input flux split by destination (umol/h).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DoseRate {
    pub dissolved: f64,
    pub undissolved: f64,
    pub intravenous: f64,
}

impl DoseRate {
    pub const ZERO: DoseRate = DoseRate {
        dissolved: 0.0,
        undissolved: 0.0,
        intravenous: 0.0,
    };

    pub fn total(&self) -> f64 {
        self.dissolved + self.undissolved + self.intravenous
    }

    fn add(&mut self, target: DoseTarget, rate: f64) {
        match target {
            DoseTarget::StomachDissolved => self.dissolved += rate,
            DoseTarget::StomachUndissolved => self.undissolved += rate,
            DoseTarget::Central => self.intravenous += rate,
        }
    }
}

/// Compiled, time-resolved dosing program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseProgram {
    windows: Vec<DoseWindow>,
    release: Option<WeibullProfile>,
}

impl DoseProgram {
    /// Input flux at time t.
    pub fn rate(&self, t: f64) -> DoseRate {
        let mut rate = DoseRate::ZERO;
        for window in &self.windows {
            rate.add(window.target, window.rate_at(t));
        }
        if let Some(release) = &self.release {
            rate.add(release.target, release.rate_at(t));
        }
        rate
    }

    /// Total mass administered up to time t, for the conservation check.
    pub fn cumulative(&self, t: f64) -> f64 {
        let windows: f64 = self.windows.iter().map(|w| w.cumulative_at(t)).sum();
        let release = self.release.map_or(0.0, |r| r.cumulative_at(t));
        windows + release
    }

    /// Rate discontinuities the solver must not step across.
    ///
    /// Window edges are hard discontinuities; the Weibull lag is the onset
    /// of a possibly steep rise.
    pub fn breakpoints(&self) -> Vec<f64> {
        let mut points = Vec::with_capacity(2 * self.windows.len() + 1);
        for window in &self.windows {
            points.push(window.start);
            points.push(window.start + window.duration);
        }
        if let Some(release) = &self.release {
            points.push(release.lag);
        }
        points.sort_by(|a, b| a.partial_cmp(b).unwrap());
        points.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        points
    }
}
