use serde::{Deserialize, Serialize};

use super::N_SEGMENTS;
use crate::error::ConfigError;
use crate::params::physiology::{finite, non_negative, positive};

/// Ionization class of the substance.
///
/// Selects the Henderson-Hasselbalch correction applied to the intrinsic
/// solubility at each segment's luminal pH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AcidBase {
    Neutral,
    Acid { pka: f64 },
    Base { pka: f64 },
    Ampholyte { pka_acid: f64, pka_base: f64 },
}

impl AcidBase {
    /// Solubility multiplier at the given pH.
    pub fn ionization_factor(&self, ph: f64) -> f64 {
        match *self {
            AcidBase::Neutral => 1.0,
            AcidBase::Acid { pka } => 1.0 + 10f64.powf(ph - pka),
            AcidBase::Base { pka } => 1.0 + 10f64.powf(pka - ph),
            AcidBase::Ampholyte { pka_acid, pka_base } => {
                1.0 + 10f64.powf(ph - pka_acid) + 10f64.powf(pka_base - ph)
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            AcidBase::Neutral => Ok(()),
            AcidBase::Acid { pka } | AcidBase::Base { pka } => finite("pka", pka),
            AcidBase::Ampholyte { pka_acid, pka_base } => {
                finite("pka_acid", pka_acid)?;
                finite("pka_base", pka_base)
            }
        }
    }
}

/// Substance and galenic parameters.
///
/// Units: masses in umol, volumes in L, times in h, lengths in dm unless
/// noted. Concentrations are umol/L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substance {
    /// Molecular mass (g/mol). Also converts central concentration to ng/mL.
    pub molecular_mass: f64,
    /// Molar volume (cm3/mol), input to the diffusivity power law.
    pub molar_volume: f64,
    /// Ionization class and constants.
    pub acid_base: AcidBase,
    /// Intrinsic aqueous solubility of the neutral species (umol/L).
    pub solubility: f64,
    /// First-order precipitation rate constant (1/h).
    pub precipitation_rate: f64,
    /// Particle radius of the solid form (um).
    pub particle_radius: f64,
    /// True density of the solid form (g/cm3).
    pub particle_density: f64,
    /// Effective epithelial permeability (dm/h).
    pub permeability: f64,
    /// Per-segment absorption scale factor in [0, 1].
    ///
    /// Kept as a continuous value rather than a boolean: intermediate
    /// values model partial regional absorption (reduced effective area,
    /// formulation coatings). Zero suppresses all uptake in that segment.
    pub absorption_scale: [f64; N_SEGMENTS],
    /// Total apical influx transporter capacity across the gut (umol/h).
    pub vmax_influx_gut: f64,
    /// Michaelis constant of the gut influx transporter (umol/L).
    pub km_influx_gut: f64,
    /// Total apical efflux transporter capacity across the gut (umol/h).
    pub vmax_efflux_gut: f64,
    /// Michaelis constant of the gut efflux transporter (umol/L).
    pub km_efflux_gut: f64,
    /// Hepatic uptake transporter capacity (umol/h).
    pub vmax_influx_liver: f64,
    /// Michaelis constant of the hepatic uptake transporter (umol/L).
    pub km_influx_liver: f64,
    /// Hepatic efflux transporter capacity (umol/h).
    pub vmax_efflux_liver: f64,
    /// Michaelis constant of the hepatic efflux transporter (umol/L).
    pub km_efflux_liver: f64,
    /// In-vitro metabolic turnover in gut microsomes (nmol/min/mg protein).
    pub vmax_metabolism_gut: f64,
    /// Michaelis constant of gut metabolism (umol/L).
    pub km_metabolism_gut: f64,
    /// In-vitro metabolic turnover in liver microsomes (nmol/min/mg protein).
    pub vmax_metabolism_liver: f64,
    /// Michaelis constant of hepatic metabolism (umol/L).
    pub km_metabolism_liver: f64,
    /// Unbound fraction in gut tissue (epithelium and wall).
    pub fu_gut: f64,
    /// Unbound fraction in liver tissue.
    pub fu_liver: f64,
    /// Unbound fraction in blood.
    pub fu_blood: f64,
    /// Unbound tissue to unbound blood partition coefficient, gut wall.
    pub kpuu_gut: f64,
    /// Unbound tissue to unbound blood partition coefficient, liver.
    pub kpuu_liver: f64,
    /// Equilibrium ratio between lumen and unbound epithelial concentration.
    pub keq_lumen_epithelium: f64,
    /// Equilibrium ratio between unbound epithelial and wall concentration.
    pub keq_epithelium_wall: f64,
    /// Central (blood) compartment volume (L).
    pub volume_central: f64,
    /// Peripheral compartment volume (L).
    pub volume_peripheral: f64,
    /// Central to peripheral transfer rate constant (1/h).
    pub kc2p: f64,
    /// Peripheral to central transfer rate constant (1/h).
    pub kp2c: f64,
    /// First-order systemic elimination rate constant (1/h).
    pub kelim: f64,
}

impl Substance {
    /// Check every field for finiteness and sign before scaling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("molecular_mass", self.molecular_mass)?;
        positive("molar_volume", self.molar_volume)?;
        self.acid_base.validate()?;
        positive("solubility", self.solubility)?;
        non_negative("precipitation_rate", self.precipitation_rate)?;
        positive("particle_radius", self.particle_radius)?;
        positive("particle_density", self.particle_density)?;
        non_negative("permeability", self.permeability)?;
        for &scale in self.absorption_scale.iter() {
            non_negative("absorption_scale", scale)?;
        }
        non_negative("vmax_influx_gut", self.vmax_influx_gut)?;
        positive("km_influx_gut", self.km_influx_gut)?;
        non_negative("vmax_efflux_gut", self.vmax_efflux_gut)?;
        positive("km_efflux_gut", self.km_efflux_gut)?;
        non_negative("vmax_influx_liver", self.vmax_influx_liver)?;
        positive("km_influx_liver", self.km_influx_liver)?;
        non_negative("vmax_efflux_liver", self.vmax_efflux_liver)?;
        positive("km_efflux_liver", self.km_efflux_liver)?;
        non_negative("vmax_metabolism_gut", self.vmax_metabolism_gut)?;
        positive("km_metabolism_gut", self.km_metabolism_gut)?;
        non_negative("vmax_metabolism_liver", self.vmax_metabolism_liver)?;
        positive("km_metabolism_liver", self.km_metabolism_liver)?;
        positive("fu_gut", self.fu_gut)?;
        positive("fu_liver", self.fu_liver)?;
        positive("fu_blood", self.fu_blood)?;
        positive("kpuu_gut", self.kpuu_gut)?;
        positive("kpuu_liver", self.kpuu_liver)?;
        positive("keq_lumen_epithelium", self.keq_lumen_epithelium)?;
        positive("keq_epithelium_wall", self.keq_epithelium_wall)?;
        positive("volume_central", self.volume_central)?;
        positive("volume_peripheral", self.volume_peripheral)?;
        non_negative("kc2p", self.kc2p)?;
        non_negative("kp2c", self.kp2c)?;
        non_negative("kelim", self.kelim)?;
        Ok(())
    }
}
