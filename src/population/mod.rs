//! The hierarchical population model.
//!
//! Three nested scopes: a [`Population`] declaring hyper-priors over
//! log-transformed kinetic parameters, [`Individual`]s drawing realized
//! log-parameters around the population means, and [`Experiment`]s pairing
//! one dosing regimen with one observed time series. The tree is pure data
//! consumed by an external estimation driver; sampling mechanics (proposal,
//! acceptance) live outside this crate.

pub mod likelihood;
pub mod parser;
pub mod prior;

pub use likelihood::{ExperimentFailure, PopulationFit};
pub use prior::Prior;

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dosing::Regimen;
use crate::error::ConfigError;
use crate::model::outputs::OutputId;
use crate::params::{Physiology, Substance};

/// Kinetic parameters estimated on the log scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamId {
    /// ln of effective permeability (dm/h).
    Permeability,
    /// ln of central volume (L).
    CentralVolume,
    /// ln of the central to peripheral rate constant (1/h).
    Kc2p,
    /// ln of the peripheral to central rate constant (1/h).
    Kp2c,
    /// ln of the systemic elimination rate constant (1/h).
    Elimination,
    /// ln of the Weibull release shape.
    ReleaseShape,
    /// ln of the Weibull release scale.
    ReleaseScale,
}

impl ParamId {
    pub const ALL: [ParamId; 7] = [
        ParamId::Permeability,
        ParamId::CentralVolume,
        ParamId::Kc2p,
        ParamId::Kp2c,
        ParamId::Elimination,
        ParamId::ReleaseShape,
        ParamId::ReleaseScale,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParamId::Permeability => "ln_permeability",
            ParamId::CentralVolume => "ln_volume_central",
            ParamId::Kc2p => "ln_kc2p",
            ParamId::Kp2c => "ln_kp2c",
            ParamId::Elimination => "ln_kelim",
            ParamId::ReleaseShape => "ln_release_shape",
            ParamId::ReleaseScale => "ln_release_scale",
        }
    }
}

impl std::fmt::Display for ParamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declaration of one estimated parameter at the population scope.
///
/// The uniform location prior doubles as the truncation interval for the
/// individual- and occasion-level draws, so every scope referencing this
/// parameter shares the same bounds by construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThetaSpec {
    pub id: ParamId,
    /// Hyper-prior over the population mean; must be uniform.
    pub mean_prior: Prior,
    /// Hyper-prior over the between-individual variance; must be
    /// inverse-gamma.
    pub variance_prior: Prior,
    /// Within-individual variance prior for parameters that redraw per
    /// occasion; `None` disables inter-occasion variability.
    pub occasion_variance_prior: Option<Prior>,
}

/// One dosing regimen paired with one observed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub regimen: Regimen,
    /// The sampled output the observations refer to.
    pub output: OutputId,
    /// Observation times (h), parallel to `observations`.
    pub times: Vec<f64>,
    /// Observed values, positive (the error model is log-normal).
    pub observations: Vec<f64>,
}

/// One subject: a fixed body-mass covariate and its experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub id: String,
    /// Body mass (kg), the fixed covariate entering the scaler.
    pub body_mass: f64,
    pub experiments: Vec<Experiment>,
}

/// The population scope: hyper-priors, the shared substance and physiology
/// templates, and the individuals underneath.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Population {
    pub physiology: Physiology,
    /// Substance template; estimated parameters overwrite its fields per
    /// draw.
    pub substance: Substance,
    pub thetas: Vec<ThetaSpec>,
    /// Inverse-gamma prior over the residual (log-scale) error variance.
    pub residual_variance_prior: Prior,
    pub individuals: Vec<Individual>,
}

/// Realized hyper-parameters for one population draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationDraw {
    pub means: HashMap<ParamId, f64>,
    pub variances: HashMap<ParamId, f64>,
    pub occasion_variances: HashMap<ParamId, f64>,
    pub residual_variance: f64,
}

/// Realized log-parameters for one individual (or one occasion).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndividualDraw {
    pub log_params: HashMap<ParamId, f64>,
}

impl Population {
    /// Validate the whole tree before the estimation driver touches it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.physiology.validate()?;
        self.substance.validate()?;

        let mut seen: Vec<ParamId> = Vec::new();
        for theta in &self.thetas {
            if seen.contains(&theta.id) {
                return Err(ConfigError::DuplicateParameter {
                    name: theta.id.name(),
                });
            }
            seen.push(theta.id);

            theta.mean_prior.validate(theta.id.name())?;
            if !matches!(theta.mean_prior, Prior::Uniform { .. }) {
                return Err(ConfigError::InvalidPrior {
                    name: theta.id.name(),
                    reason: "location hyper-prior must be uniform",
                });
            }
            theta.variance_prior.validate(theta.id.name())?;
            if !matches!(theta.variance_prior, Prior::InverseGamma { .. }) {
                return Err(ConfigError::InvalidPrior {
                    name: theta.id.name(),
                    reason: "variance hyper-prior must be inverse-gamma",
                });
            }
            if let Some(prior) = &theta.occasion_variance_prior {
                prior.validate(theta.id.name())?;
                if !matches!(prior, Prior::InverseGamma { .. }) {
                    return Err(ConfigError::InvalidPrior {
                        name: theta.id.name(),
                        reason: "occasion variance prior must be inverse-gamma",
                    });
                }
            }
        }

        self.residual_variance_prior
            .validate("residual_variance")?;
        if !matches!(self.residual_variance_prior, Prior::InverseGamma { .. }) {
            return Err(ConfigError::InvalidPrior {
                name: "residual_variance",
                reason: "residual variance prior must be inverse-gamma",
            });
        }

        for individual in &self.individuals {
            if !(individual.body_mass.is_finite() && individual.body_mass > 0.0) {
                return Err(ConfigError::NonPositive {
                    name: "body_mass",
                    value: individual.body_mass,
                });
            }
            if individual.experiments.is_empty() {
                return Err(ConfigError::EmptyIndividual {
                    id: individual.id.clone(),
                });
            }
            for experiment in &individual.experiments {
                if experiment.times.len() != experiment.observations.len() {
                    return Err(ConfigError::ObservationLengthMismatch {
                        id: experiment.id.clone(),
                        times: experiment.times.len(),
                        values: experiment.observations.len(),
                    });
                }
                for (&t, &v) in experiment.times.iter().zip(&experiment.observations) {
                    if !(t.is_finite() && t >= 0.0 && v.is_finite() && v > 0.0) {
                        return Err(ConfigError::InvalidObservation {
                            id: experiment.id.clone(),
                            time: t,
                            value: v,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Draw hyper-parameters from their priors, for chain initialization or
    /// Monte Carlo over the full hierarchy.
    pub fn sample_population<R: Rng + ?Sized>(&self, rng: &mut R) -> PopulationDraw {
        let mut means = HashMap::new();
        let mut variances = HashMap::new();
        let mut occasion_variances = HashMap::new();
        for theta in &self.thetas {
            means.insert(theta.id, theta.mean_prior.sample(rng));
            variances.insert(theta.id, theta.variance_prior.sample(rng));
            if let Some(prior) = &theta.occasion_variance_prior {
                occasion_variances.insert(theta.id, prior.sample(rng));
            }
        }
        PopulationDraw {
            means,
            variances,
            occasion_variances,
            residual_variance: self.residual_variance_prior.sample(rng),
        }
    }

    /// Draw one individual's log-parameters around the population means,
    /// truncated to the bounds of the location hyper-prior.
    pub fn sample_individual<R: Rng + ?Sized>(
        &self,
        population: &PopulationDraw,
        rng: &mut R,
    ) -> IndividualDraw {
        let mut log_params = HashMap::new();
        for theta in &self.thetas {
            let (low, high) = theta.mean_prior.support();
            let draw = Prior::TruncatedNormal {
                mean: population.means[&theta.id],
                sd: population.variances[&theta.id].sqrt(),
                low,
                high,
            };
            log_params.insert(theta.id, draw.sample(rng));
        }
        IndividualDraw { log_params }
    }

    /// Redraw the inter-occasion subset around the individual's values with
    /// the within-individual variance, reusing the same bounds.
    pub fn sample_occasion<R: Rng + ?Sized>(
        &self,
        population: &PopulationDraw,
        individual: &IndividualDraw,
        rng: &mut R,
    ) -> IndividualDraw {
        let mut occasion = individual.clone();
        for theta in &self.thetas {
            let Some(&variance) = population.occasion_variances.get(&theta.id) else {
                continue;
            };
            let (low, high) = theta.mean_prior.support();
            let draw = Prior::TruncatedNormal {
                mean: individual.log_params[&theta.id],
                sd: variance.sqrt(),
                low,
                high,
            };
            occasion.log_params.insert(theta.id, draw.sample(rng));
        }
        occasion
    }

    /// Materialize a draw into the concrete substance and regimen the
    /// simulator consumes.
    pub fn apply_draw(&self, draw: &IndividualDraw, regimen: &Regimen) -> (Substance, Regimen) {
        let mut substance = self.substance.clone();
        let mut regimen = regimen.clone();
        for (&id, &log_value) in &draw.log_params {
            let value = log_value.exp();
            match id {
                ParamId::Permeability => substance.permeability = value,
                ParamId::CentralVolume => substance.volume_central = value,
                ParamId::Kc2p => substance.kc2p = value,
                ParamId::Kp2c => substance.kp2c = value,
                ParamId::Elimination => substance.kelim = value,
                ParamId::ReleaseShape => {
                    if let Regimen::WeibullRelease { shape, .. } = &mut regimen {
                        *shape = value;
                    }
                }
                ParamId::ReleaseScale => {
                    if let Regimen::WeibullRelease { scale, .. } = &mut regimen {
                        *scale = value;
                    }
                }
            }
        }
        (substance, regimen)
    }

    /// Joint log prior density of a population draw, for the external
    /// sampler's posterior evaluation.
    pub fn log_prior(&self, population: &PopulationDraw, individuals: &[IndividualDraw]) -> f64 {
        let mut total = self
            .residual_variance_prior
            .log_density(population.residual_variance);
        for theta in &self.thetas {
            total += theta.mean_prior.log_density(population.means[&theta.id]);
            total += theta
                .variance_prior
                .log_density(population.variances[&theta.id]);
            if let Some(prior) = &theta.occasion_variance_prior {
                total += prior.log_density(population.occasion_variances[&theta.id]);
            }
            let (low, high) = theta.mean_prior.support();
            let conditional = Prior::TruncatedNormal {
                mean: population.means[&theta.id],
                sd: population.variances[&theta.id].sqrt(),
                low,
                high,
            };
            for draw in individuals {
                total += conditional.log_density(draw.log_params[&theta.id]);
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dosing::DoseForm;
    use crate::model::scaled::test_substance;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    pub(crate) fn test_population() -> Population {
        let regimen =
            Regimen::repeated_bolus(DoseForm::ImmediateDissolved, 3128.39, 2, 0.0, 0.1).unwrap();
        Population {
            physiology: Physiology::default(),
            substance: test_substance(),
            thetas: vec![
                ThetaSpec {
                    id: ParamId::Permeability,
                    mean_prior: Prior::Uniform {
                        low: -7.0,
                        high: -2.0,
                    },
                    variance_prior: Prior::InverseGamma {
                        shape: 3.0,
                        scale: 0.5,
                    },
                    occasion_variance_prior: Some(Prior::InverseGamma {
                        shape: 3.0,
                        scale: 0.1,
                    }),
                },
                ThetaSpec {
                    id: ParamId::Elimination,
                    mean_prior: Prior::Uniform {
                        low: -4.0,
                        high: 1.0,
                    },
                    variance_prior: Prior::InverseGamma {
                        shape: 3.0,
                        scale: 0.5,
                    },
                    occasion_variance_prior: None,
                },
            ],
            residual_variance_prior: Prior::InverseGamma {
                shape: 3.0,
                scale: 0.2,
            },
            individuals: vec![Individual {
                id: "subject_01".to_string(),
                body_mass: 72.7,
                experiments: vec![Experiment {
                    id: "trial_01".to_string(),
                    regimen,
                    output: OutputId::CentralNgPerMl,
                    times: vec![1.0, 2.0, 4.0, 8.0],
                    observations: vec![350.0, 410.0, 280.0, 120.0],
                }],
            }],
        }
    }

    #[test]
    fn valid_tree_passes_validation() {
        test_population().validate().unwrap();
    }

    #[test]
    fn tree_survives_a_json_round_trip() {
        let population = test_population();
        let json = serde_json::to_string(&population).unwrap();
        let back: Population = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back.individuals.len(), population.individuals.len());
        assert_eq!(
            back.individuals[0].experiments[0].regimen,
            population.individuals[0].experiments[0].regimen
        );
    }

    #[test]
    fn non_uniform_location_prior_is_rejected() {
        let mut population = test_population();
        population.thetas[0].mean_prior = Prior::InverseGamma {
            shape: 1.0,
            scale: 1.0,
        };
        assert!(matches!(
            population.validate(),
            Err(ConfigError::InvalidPrior { .. })
        ));
    }

    #[test]
    fn duplicate_theta_is_rejected() {
        let mut population = test_population();
        let duplicate = population.thetas[0];
        population.thetas.push(duplicate);
        assert!(matches!(
            population.validate(),
            Err(ConfigError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn mismatched_observations_are_rejected() {
        let mut population = test_population();
        population.individuals[0].experiments[0].observations.pop();
        assert!(matches!(
            population.validate(),
            Err(ConfigError::ObservationLengthMismatch { .. })
        ));
    }

    #[test]
    fn individual_draws_respect_hyper_prior_bounds() {
        let population = test_population();
        let mut rng = StdRng::seed_from_u64(42);
        let hyper = population.sample_population(&mut rng);
        for _ in 0..200 {
            let draw = population.sample_individual(&hyper, &mut rng);
            for theta in &population.thetas {
                let (low, high) = theta.mean_prior.support();
                let value = draw.log_params[&theta.id];
                assert!(
                    (low..=high).contains(&value),
                    "{} = {} outside [{}, {}]",
                    theta.id,
                    value,
                    low,
                    high
                );
            }
        }
    }

    #[test]
    fn occasion_redraw_touches_only_iov_parameters() {
        let population = test_population();
        let mut rng = StdRng::seed_from_u64(43);
        let hyper = population.sample_population(&mut rng);
        let individual = population.sample_individual(&hyper, &mut rng);
        let occasion = population.sample_occasion(&hyper, &individual, &mut rng);
        // Elimination declares no occasion variance, so it carries over.
        assert_eq!(
            occasion.log_params[&ParamId::Elimination],
            individual.log_params[&ParamId::Elimination]
        );
        // Bounds still hold for the redrawn subset.
        let (low, high) = population.thetas[0].mean_prior.support();
        assert!((low..=high).contains(&occasion.log_params[&ParamId::Permeability]));
    }

    #[test]
    fn apply_draw_exponentiates_into_the_substance() {
        let population = test_population();
        let mut draw = IndividualDraw::default();
        draw.log_params.insert(ParamId::Permeability, -5.0);
        draw.log_params.insert(ParamId::Elimination, -1.0);
        let regimen = population.individuals[0].experiments[0].regimen.clone();
        let (substance, _) = population.apply_draw(&draw, &regimen);
        assert!((substance.permeability - (-5.0f64).exp()).abs() < 1e-12);
        assert!((substance.kelim - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn apply_draw_rewrites_weibull_release() {
        let mut population = test_population();
        let regimen =
            Regimen::weibull_release(DoseForm::DelayedDissolved, 1000.0, 0.5, 1.2, 3.0).unwrap();
        population.individuals[0].experiments[0].regimen = regimen.clone();
        let mut draw = IndividualDraw::default();
        draw.log_params.insert(ParamId::ReleaseShape, 0.0);
        draw.log_params.insert(ParamId::ReleaseScale, 1.0);
        let (_, regimen) = population.apply_draw(&draw, &regimen);
        match regimen {
            Regimen::WeibullRelease { shape, scale, .. } => {
                assert!((shape - 1.0).abs() < 1e-12);
                assert!((scale - 1.0f64.exp()).abs() < 1e-12);
            }
            other => panic!("unexpected regimen {:?}", other),
        }
    }
}
