//! The parameter scaler.
//!
//! [`ScaledModel::new`] turns the raw physiology and substance parameters
//! plus the body-mass covariate into the immutable set of derived constants
//! the dynamics function reads. It runs exactly once per parameter set,
//! before integration, and is the single place where configuration errors
//! are raised.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::params::{Physiology, Segment, Substance, N_SEGMENTS};

/// Lower bound on the diffusion boundary-layer thickness (um).
const BOUNDARY_LAYER_MIN: f64 = 5.0;
/// Upper bound on the diffusion boundary-layer thickness (um).
const BOUNDARY_LAYER_MAX: f64 = 30.0;
/// um to dm.
const UM_TO_DM: f64 = 1.0e-5;
/// Diffusivity prefactor of the molar-volume power law (dm^2/h at unit
/// molar volume), Wilke-Chang form for aqueous media at body temperature.
const DIFFUSIVITY_COEFFICIENT: f64 = 7.7e-3;
/// Converts nmol/min/mg protein times mg/mL times L into umol/h.
const MICROSOMAL_RATE_FACTOR: f64 = 60.0;
/// Allometric exponent for total blood flow.
const FLOW_EXPONENT: f64 = 0.75;

/// Derived constants for one gut segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScaledSegment {
    /// First-order transit rate to the next segment (1/h).
    pub transit_rate: f64,
    /// Luminal fluid volume (L).
    pub volume_lumen: f64,
    /// Epithelial layer volume (L).
    pub volume_epithelium: f64,
    /// Wall tissue volume (L).
    pub volume_wall: f64,
    /// Cylindrical epithelial surface area (dm^2).
    pub surface_area: f64,
    /// Blood flow perfusing the segment wall (L/h).
    pub blood_flow: f64,
    /// Saturation concentration at the segment pH (umol/L).
    pub csat: f64,
    /// Passive absorption capacity: permeability x area x scale (L/h).
    pub ka: f64,
    /// Epithelium-wall passive conductance: permeability x area (L/h).
    pub wall_conductance: f64,
    /// Absorption scale factor, gates carrier transport alongside `ka`.
    pub absorption_scale: f64,
    /// Influx transporter capacity apportioned to this segment (umol/h).
    pub vmax_influx: f64,
    /// Efflux transporter capacity apportioned to this segment (umol/h).
    pub vmax_efflux: f64,
    /// Scaled epithelial metabolic capacity (umol/h).
    pub vmax_metabolism: f64,
}

/// Immutable derived parameter set threaded into the dynamics and outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaledModel {
    pub segments: [ScaledSegment; N_SEGMENTS],
    /// Sum of all gut segment flows (L/h).
    pub portal_flow: f64,
    /// Hepatic arterial flow: liver share of total minus portal (L/h).
    pub arterial_flow: f64,
    /// Dissolution rate constant, Nernst-Brunner (L/umol/h).
    pub k_dissolution: f64,
    /// First-order precipitation rate constant (1/h).
    pub k_precipitation: f64,
    pub km_influx_gut: f64,
    pub km_efflux_gut: f64,
    pub km_metabolism_gut: f64,
    pub volume_liver: f64,
    pub vmax_metabolism_liver: f64,
    pub km_metabolism_liver: f64,
    pub vmax_influx_liver: f64,
    pub km_influx_liver: f64,
    pub vmax_efflux_liver: f64,
    pub km_efflux_liver: f64,
    pub fu_gut: f64,
    pub fu_liver: f64,
    pub fu_blood: f64,
    pub kpuu_gut: f64,
    pub kpuu_liver: f64,
    pub keq_lumen_epithelium: f64,
    pub keq_epithelium_wall: f64,
    pub volume_central: f64,
    pub volume_peripheral: f64,
    pub kc2p: f64,
    pub kp2c: f64,
    pub kelim: f64,
    pub molecular_mass: f64,
    pub body_mass: f64,
}

impl ScaledModel {
    /// Run the scaler. Fails fast on any invalid or inconsistent input.
    pub fn new(
        physiology: &Physiology,
        substance: &Substance,
        body_mass: f64,
    ) -> Result<Self, ConfigError> {
        physiology.validate()?;
        substance.validate()?;
        if !(body_mass.is_finite() && body_mass > 0.0) {
            return Err(ConfigError::NonPositive {
                name: "body_mass",
                value: body_mass,
            });
        }

        let total_flow = physiology.flow_coefficient * body_mass.powf(FLOW_EXPONENT);
        let hepatic_flow = physiology.liver_flow_fraction * total_flow;

        let total_area: f64 = physiology
            .segments
            .iter()
            .map(|s| s.length * 2.0 * std::f64::consts::PI * s.radius)
            .sum();

        let mut portal_flow = 0.0;
        let mut segments = [ScaledSegment {
            transit_rate: 0.0,
            volume_lumen: 0.0,
            volume_epithelium: 0.0,
            volume_wall: 0.0,
            surface_area: 0.0,
            blood_flow: 0.0,
            csat: 0.0,
            ka: 0.0,
            wall_conductance: 0.0,
            absorption_scale: 0.0,
            vmax_influx: 0.0,
            vmax_efflux: 0.0,
            vmax_metabolism: 0.0,
        }; N_SEGMENTS];

        for segment in Segment::ALL {
            let i = segment.index();
            let raw = physiology.segment(segment);
            let area = raw.length * 2.0 * std::f64::consts::PI * raw.radius;
            let volume_epithelium = area * physiology.epithelial_thickness;
            let blood_flow = raw.flow_fraction * total_flow;
            portal_flow += blood_flow;

            let scale = substance.absorption_scale[i];
            let area_fraction = area / total_area;

            segments[i] = ScaledSegment {
                transit_rate: std::f64::consts::LN_2 / raw.transit_half_life,
                volume_lumen: raw.lumen_volume_fraction * body_mass,
                volume_epithelium,
                volume_wall: raw.wall_volume_fraction * body_mass,
                surface_area: area,
                blood_flow,
                csat: substance.solubility * substance.acid_base.ionization_factor(raw.ph),
                ka: substance.permeability * area * scale,
                wall_conductance: substance.permeability * area,
                absorption_scale: scale,
                vmax_influx: substance.vmax_influx_gut * area_fraction,
                vmax_efflux: substance.vmax_efflux_gut * area_fraction,
                vmax_metabolism: substance.vmax_metabolism_gut
                    * physiology.microsomal_protein_gut
                    * volume_epithelium
                    * MICROSOMAL_RATE_FACTOR,
            };
        }

        let arterial_flow = hepatic_flow - portal_flow;
        if arterial_flow < 0.0 {
            return Err(ConfigError::InconsistentFlowFractions {
                portal: portal_flow,
                hepatic: hepatic_flow,
            });
        }

        let volume_liver = physiology.liver_volume_fraction * body_mass;

        Ok(ScaledModel {
            segments,
            portal_flow,
            arterial_flow,
            k_dissolution: dissolution_constant(substance),
            k_precipitation: substance.precipitation_rate,
            km_influx_gut: substance.km_influx_gut,
            km_efflux_gut: substance.km_efflux_gut,
            km_metabolism_gut: substance.km_metabolism_gut,
            volume_liver,
            vmax_metabolism_liver: substance.vmax_metabolism_liver
                * physiology.microsomal_protein_liver
                * volume_liver
                * MICROSOMAL_RATE_FACTOR,
            km_metabolism_liver: substance.km_metabolism_liver,
            vmax_influx_liver: substance.vmax_influx_liver,
            km_influx_liver: substance.km_influx_liver,
            vmax_efflux_liver: substance.vmax_efflux_liver,
            km_efflux_liver: substance.km_efflux_liver,
            fu_gut: substance.fu_gut,
            fu_liver: substance.fu_liver,
            fu_blood: substance.fu_blood,
            kpuu_gut: substance.kpuu_gut,
            kpuu_liver: substance.kpuu_liver,
            keq_lumen_epithelium: substance.keq_lumen_epithelium,
            keq_epithelium_wall: substance.keq_epithelium_wall,
            volume_central: substance.volume_central,
            volume_peripheral: substance.volume_peripheral,
            kc2p: substance.kc2p,
            kp2c: substance.kp2c,
            kelim: substance.kelim,
            molecular_mass: substance.molecular_mass,
            body_mass,
        })
    }

    pub fn segment(&self, segment: Segment) -> &ScaledSegment {
        &self.segments[segment.index()]
    }
}

/// Boundary-layer thickness: particle radius clamped to its physical range.
fn boundary_layer_thickness(particle_radius: f64) -> f64 {
    particle_radius.clamp(BOUNDARY_LAYER_MIN, BOUNDARY_LAYER_MAX)
}

/// Nernst-Brunner dissolution constant.
///
/// Diffusivity follows a power law in molar volume; the molar particle
/// density converts the solid mass into dissolving surface.
fn dissolution_constant(substance: &Substance) -> f64 {
    let diffusivity = DIFFUSIVITY_COEFFICIENT * substance.molar_volume.powf(-0.6);
    let radius = substance.particle_radius * UM_TO_DM;
    let layer = boundary_layer_thickness(substance.particle_radius) * UM_TO_DM;
    // g/cm3 to umol/L of solid.
    let molar_density = substance.particle_density * 1.0e9 / substance.molecular_mass;
    3.0 * diffusivity / (molar_density * radius * layer)
}

/// Reference substance used across the crate's tests.
#[cfg(test)]
pub(crate) fn test_substance() -> Substance {
    use crate::params::AcidBase;
    Substance {
        molecular_mass: 239.74,
        molar_volume: 167.0,
        acid_base: AcidBase::Neutral,
        solubility: 4000.0,
        precipitation_rate: 0.0,
        particle_radius: 10.0,
        particle_density: 1.2,
        permeability: (-4.8f64).exp(),
        absorption_scale: [1.0; N_SEGMENTS],
        vmax_influx_gut: 0.0,
        km_influx_gut: 100.0,
        vmax_efflux_gut: 0.0,
        km_efflux_gut: 100.0,
        vmax_influx_liver: 0.0,
        km_influx_liver: 100.0,
        vmax_efflux_liver: 0.0,
        km_efflux_liver: 100.0,
        vmax_metabolism_gut: 0.0,
        km_metabolism_gut: 50.0,
        vmax_metabolism_liver: 0.05,
        km_metabolism_liver: 50.0,
        fu_gut: 0.5,
        fu_liver: 0.3,
        fu_blood: 0.2,
        kpuu_gut: 1.0,
        kpuu_liver: 1.5,
        keq_lumen_epithelium: 1.0,
        keq_epithelium_wall: 1.0,
        volume_central: 15.0,
        volume_peripheral: 30.0,
        kc2p: 0.3,
        kp2c: 0.15,
        kelim: 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::AcidBase;
    use approx::assert_relative_eq;

    #[test]
    fn allometric_flow_and_portal_sum() {
        let phys = Physiology::default();
        let model = ScaledModel::new(&phys, &test_substance(), 72.7).unwrap();
        let total = phys.flow_coefficient * 72.7f64.powf(0.75);
        let expected_portal: f64 = phys
            .segments
            .iter()
            .map(|s| s.flow_fraction * total)
            .sum();
        assert_relative_eq!(model.portal_flow, expected_portal, max_relative = 1e-12);
        assert_relative_eq!(
            model.arterial_flow,
            phys.liver_flow_fraction * total - expected_portal,
            max_relative = 1e-12
        );
        assert!(model.arterial_flow > 0.0);
    }

    #[test]
    fn inconsistent_flow_fractions_are_fatal() {
        let mut phys = Physiology::default();
        phys.liver_flow_fraction = 0.05;
        let err = ScaledModel::new(&phys, &test_substance(), 72.7);
        assert!(matches!(
            err,
            Err(ConfigError::InconsistentFlowFractions { .. })
        ));
    }

    #[test]
    fn transit_rates_follow_half_lives() {
        let phys = Physiology::default();
        let model = ScaledModel::new(&phys, &test_substance(), 72.7).unwrap();
        for segment in Segment::ALL {
            assert_relative_eq!(
                model.segment(segment).transit_rate,
                std::f64::consts::LN_2 / phys.segment(segment).transit_half_life,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn csat_reflects_segment_ph_for_a_base() {
        let mut substance = test_substance();
        substance.acid_base = AcidBase::Base { pka: 8.0 };
        let model = ScaledModel::new(&Physiology::default(), &substance, 72.7).unwrap();
        // The acidic stomach solubilizes a base far more than the ileum.
        let stomach = model.segment(Segment::Stomach).csat;
        let ileum = model.segment(Segment::Ileum).csat;
        assert!(stomach > 100.0 * ileum);
    }

    #[test]
    fn boundary_layer_is_clamped() {
        assert_eq!(boundary_layer_thickness(2.0), 5.0);
        assert_eq!(boundary_layer_thickness(17.0), 17.0);
        assert_eq!(boundary_layer_thickness(250.0), 30.0);
    }

    #[test]
    fn smaller_particles_dissolve_faster() {
        let mut fine = test_substance();
        fine.particle_radius = 6.0;
        let mut coarse = test_substance();
        coarse.particle_radius = 60.0;
        assert!(dissolution_constant(&fine) > dissolution_constant(&coarse));
    }

    #[test]
    fn absorption_scale_gates_ka() {
        let mut substance = test_substance();
        substance.absorption_scale[Segment::Colon.index()] = 0.0;
        substance.absorption_scale[Segment::Jejunum.index()] = 0.5;
        let model = ScaledModel::new(&Physiology::default(), &substance, 72.7).unwrap();
        assert_eq!(model.segment(Segment::Colon).ka, 0.0);
        let jejunum = model.segment(Segment::Jejunum);
        assert_relative_eq!(
            jejunum.ka,
            0.5 * jejunum.wall_conductance,
            max_relative = 1e-12
        );
    }

    #[test]
    fn microsomal_scaling_uses_compartment_volume() {
        let phys = Physiology::default();
        let mut substance = test_substance();
        substance.vmax_metabolism_liver = 0.1;
        let model = ScaledModel::new(&phys, &substance, 72.7).unwrap();
        let expected = 0.1
            * phys.microsomal_protein_liver
            * phys.liver_volume_fraction
            * 72.7
            * MICROSOMAL_RATE_FACTOR;
        assert_relative_eq!(model.vmax_metabolism_liver, expected, max_relative = 1e-12);
    }
}
