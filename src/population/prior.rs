//! Prior distributions stored as data.
//!
//! A [`Prior`] is a distribution kind plus its parameter tuple; the
//! estimation driver samples and scores through this enum instead of
//! executing distribution-specific statements.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};
use statrs::distribution::ContinuousCDF;
use statrs::function::gamma::ln_gamma;

use crate::error::ConfigError;

/// ln(2 pi)
pub(crate) const LOG_2PI: f64 = 1.8378770664093453_f64;

/// Log density of the normal distribution, stable in log space.
#[inline(always)]
pub(crate) fn lognormpdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let diff = x - mean;
    -0.5 * LOG_2PI - sigma.ln() - (diff * diff) / (2.0 * sigma * sigma)
}

/// A prior declaration: distribution kind and hyper-parameters.
///
/// Uniform priors double as the truncation bounds for every deeper scope
/// that references the same underlying parameter, so bounds can never drift
/// apart between levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    /// Flat over [low, high]; used for location hyper-parameters.
    Uniform { low: f64, high: f64 },
    /// Inverse-gamma; used for variance hyper-parameters.
    InverseGamma { shape: f64, scale: f64 },
    /// Normal restricted to [low, high]; used for subject-level draws.
    TruncatedNormal {
        mean: f64,
        sd: f64,
        low: f64,
        high: f64,
    },
}

impl Prior {
    /// Check the parameter tuple, naming the owning parameter on failure.
    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        match *self {
            Prior::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low < high) {
                    return Err(ConfigError::InvalidBounds { name, low, high });
                }
            }
            Prior::InverseGamma { shape, scale } => {
                if !(shape > 0.0 && shape.is_finite()) {
                    return Err(ConfigError::InvalidPrior {
                        name,
                        reason: "inverse-gamma shape must be positive",
                    });
                }
                if !(scale > 0.0 && scale.is_finite()) {
                    return Err(ConfigError::InvalidPrior {
                        name,
                        reason: "inverse-gamma scale must be positive",
                    });
                }
            }
            Prior::TruncatedNormal { mean, sd, low, high } => {
                if !(mean.is_finite() && sd.is_finite() && sd > 0.0) {
                    return Err(ConfigError::InvalidPrior {
                        name,
                        reason: "truncated normal needs a finite mean and positive sd",
                    });
                }
                if !(low.is_finite() && high.is_finite() && low < high) {
                    return Err(ConfigError::InvalidBounds { name, low, high });
                }
            }
        }
        Ok(())
    }

    /// The support interval, `(-inf, inf)` style bounds included.
    pub fn support(&self) -> (f64, f64) {
        match *self {
            Prior::Uniform { low, high } => (low, high),
            Prior::InverseGamma { .. } => (0.0, f64::INFINITY),
            Prior::TruncatedNormal { low, high, .. } => (low, high),
        }
    }

    /// Draw one value. The prior must have passed [`Prior::validate`].
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Prior::Uniform { low, high } => low + (high - low) * rng.random::<f64>(),
            Prior::InverseGamma { shape, scale } => {
                // If G ~ Gamma(shape, 1/scale) then 1/G ~ InvGamma(shape, scale).
                let gamma = Gamma::new(shape, 1.0 / scale).expect("validated inverse-gamma");
                1.0 / gamma.sample(rng)
            }
            Prior::TruncatedNormal { mean, sd, low, high } => {
                let normal = Normal::new(mean, sd).expect("validated truncated normal");
                // Rejection sampling; the validated support has positive mass.
                loop {
                    let x = normal.sample(rng);
                    if x >= low && x <= high {
                        return x;
                    }
                }
            }
        }
    }

    /// Log density at x, negative infinity outside the support.
    pub fn log_density(&self, x: f64) -> f64 {
        match *self {
            Prior::Uniform { low, high } => {
                if x < low || x > high {
                    f64::NEG_INFINITY
                } else {
                    -(high - low).ln()
                }
            }
            Prior::InverseGamma { shape, scale } => {
                if x <= 0.0 {
                    f64::NEG_INFINITY
                } else {
                    shape * scale.ln() - ln_gamma(shape) - (shape + 1.0) * x.ln() - scale / x
                }
            }
            Prior::TruncatedNormal { mean, sd, low, high } => {
                if x < low || x > high {
                    f64::NEG_INFINITY
                } else {
                    let normal = statrs::distribution::Normal::new(mean, sd)
                        .expect("validated truncated normal");
                    let mass = normal.cdf(high) - normal.cdf(low);
                    lognormpdf(x, mean, sd) - mass.ln()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn uniform_samples_stay_in_support() {
        let prior = Prior::Uniform {
            low: -3.0,
            high: 2.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let x = prior.sample(&mut rng);
            assert!((-3.0..=2.0).contains(&x));
        }
    }

    #[test]
    fn inverse_gamma_samples_are_positive() {
        let prior = Prior::InverseGamma {
            shape: 3.0,
            scale: 2.0,
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            assert!(prior.sample(&mut rng) > 0.0);
        }
    }

    #[test]
    fn truncated_normal_respects_bounds() {
        let prior = Prior::TruncatedNormal {
            mean: 0.0,
            sd: 2.0,
            low: -1.0,
            high: 0.5,
        };
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..1000 {
            let x = prior.sample(&mut rng);
            assert!((-1.0..=0.5).contains(&x));
        }
    }

    #[test]
    fn uniform_density_is_flat_inside_and_void_outside() {
        let prior = Prior::Uniform { low: 0.0, high: 4.0 };
        assert_relative_eq!(prior.log_density(1.0), -(4.0f64).ln());
        assert_relative_eq!(prior.log_density(3.9), -(4.0f64).ln());
        assert_eq!(prior.log_density(5.0), f64::NEG_INFINITY);
    }

    #[test]
    fn truncated_normal_density_integrates_over_its_window() {
        // Against the untruncated density the truncated one is inflated by
        // the inverse window mass.
        let prior = Prior::TruncatedNormal {
            mean: 1.0,
            sd: 1.0,
            low: -1.0,
            high: 3.0,
        };
        let full = lognormpdf(1.0, 1.0, 1.0);
        let truncated = prior.log_density(1.0);
        assert!(truncated > full);
        // Window is mean +/- 2 sd: about 95.45 percent of the mass.
        assert_relative_eq!((full - truncated).exp(), 0.9545, epsilon = 1e-3);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let prior = Prior::Uniform { low: 2.0, high: 2.0 };
        assert!(matches!(
            prior.validate("ln_permeability"),
            Err(ConfigError::InvalidBounds { .. })
        ));
        let prior = Prior::InverseGamma {
            shape: -1.0,
            scale: 1.0,
        };
        assert!(matches!(
            prior.validate("residual_variance"),
            Err(ConfigError::InvalidPrior { .. })
        ));
    }
}
