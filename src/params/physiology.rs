use serde::{Deserialize, Serialize};

use super::{Segment, N_SEGMENTS};
use crate::error::ConfigError;

/// Fixed physiological description of one gut segment.
///
/// Units: lengths and radii in dm, volumes derived in L, times in h.
/// Volume fractions are L of compartment per kg of body mass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentPhysiology {
    /// Segment length (dm).
    pub length: f64,
    /// Segment radius (dm).
    pub radius: f64,
    /// Luminal pH, used for the saturation concentration.
    pub ph: f64,
    /// Transit half-life of luminal contents (h).
    pub transit_half_life: f64,
    /// Luminal fluid volume as a fraction of body mass (L/kg).
    pub lumen_volume_fraction: f64,
    /// Wall tissue volume as a fraction of body mass (L/kg).
    pub wall_volume_fraction: f64,
    /// Fraction of total blood flow perfusing this segment.
    pub flow_fraction: f64,
}

/// Fixed physiological constants for the whole subject.
///
/// The [`Default`] implementation is a reference human; individual subjects
/// differ through the body-mass covariate supplied at scaling time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Physiology {
    /// Per-segment geometry, pH, transit, and perfusion, in transit order.
    pub segments: [SegmentPhysiology; N_SEGMENTS],
    /// Allometric coefficient for total blood flow (L/h/kg^0.75).
    pub flow_coefficient: f64,
    /// Fraction of total blood flow entering the liver (portal plus arterial).
    pub liver_flow_fraction: f64,
    /// Liver volume as a fraction of body mass (L/kg).
    pub liver_volume_fraction: f64,
    /// Thickness of the absorptive epithelial layer (dm).
    pub epithelial_thickness: f64,
    /// Gut microsomal protein content (mg protein per mL tissue).
    pub microsomal_protein_gut: f64,
    /// Liver microsomal protein content (mg protein per mL tissue).
    pub microsomal_protein_liver: f64,
}

impl Default for Physiology {
    fn default() -> Self {
        // Reference human, fasted state.
        let seg = |length, radius, ph, transit_half_life, lumen_f, wall_f, flow_f| {
            SegmentPhysiology {
                length,
                radius,
                ph,
                transit_half_life,
                lumen_volume_fraction: lumen_f,
                wall_volume_fraction: wall_f,
                flow_fraction: flow_f,
            }
        };
        Physiology {
            segments: [
                seg(2.0, 0.80, 1.8, 0.25, 0.00070, 0.0021, 0.024),
                seg(2.5, 0.15, 6.0, 0.26, 0.00060, 0.0008, 0.016),
                seg(10.0, 0.13, 6.4, 1.02, 0.00210, 0.0030, 0.056),
                seg(10.0, 0.11, 7.0, 2.06, 0.00210, 0.0025, 0.033),
                seg(1.7, 0.35, 6.4, 4.55, 0.00070, 0.0005, 0.006),
                seg(9.0, 0.25, 6.8, 13.5, 0.00150, 0.0015, 0.038),
            ],
            flow_coefficient: 15.0,
            liver_flow_fraction: 0.227,
            liver_volume_fraction: 0.0257,
            epithelial_thickness: 6.0e-4,
            microsomal_protein_gut: 3.0,
            microsomal_protein_liver: 40.0,
        }
    }
}

impl Physiology {
    /// Check every constant for finiteness and sign before scaling.
    ///
    /// The flow-fraction consistency check (portal versus hepatic) needs the
    /// allometric total and therefore lives in the scaler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for p in self.segments.iter() {
            positive("segment length", p.length)?;
            positive("segment radius", p.radius)?;
            finite("segment ph", p.ph)?;
            positive("transit_half_life", p.transit_half_life)?;
            positive("lumen_volume_fraction", p.lumen_volume_fraction)?;
            positive("wall_volume_fraction", p.wall_volume_fraction)?;
            positive("flow_fraction", p.flow_fraction)?;
        }
        positive("flow_coefficient", self.flow_coefficient)?;
        positive("liver_flow_fraction", self.liver_flow_fraction)?;
        positive("liver_volume_fraction", self.liver_volume_fraction)?;
        positive("epithelial_thickness", self.epithelial_thickness)?;
        positive("microsomal_protein_gut", self.microsomal_protein_gut)?;
        positive("microsomal_protein_liver", self.microsomal_protein_liver)?;
        Ok(())
    }

    pub fn segment(&self, segment: Segment) -> &SegmentPhysiology {
        &self.segments[segment.index()]
    }
}

pub(crate) fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { name, value })
    }
}

pub(crate) fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}

pub(crate) fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_physiology_is_valid() {
        Physiology::default().validate().unwrap();
    }

    #[test]
    fn gut_flow_fractions_leave_room_for_arterial_flow() {
        let phys = Physiology::default();
        let portal: f64 = phys.segments.iter().map(|s| s.flow_fraction).sum();
        assert!(portal < phys.liver_flow_fraction);
    }

    #[test]
    fn rejects_non_positive_half_life() {
        let mut phys = Physiology::default();
        phys.segments[0].transit_half_life = 0.0;
        assert!(matches!(
            phys.validate(),
            Err(ConfigError::NonPositive { .. })
        ));
    }
}
