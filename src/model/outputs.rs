//! Derived, reportable quantities.
//!
//! A pure transformation from one raw state snapshot to concentrations and
//! mass-balance diagnostics, evaluated once per recorded time point rather
//! than per solver step.

use serde::{Deserialize, Serialize};

use super::scaled::ScaledModel;
use super::state::*;
use crate::params::{Segment, N_SEGMENTS};

/// Names of the reportable scalar output series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputId {
    /// Central blood concentration in ng/mL.
    CentralNgPerMl,
    /// Central blood concentration in umol/L.
    Central,
    /// Peripheral compartment concentration in umol/L.
    Peripheral,
    /// Liver concentration in umol/L.
    Liver,
    TotalLumenDissolved,
    TotalLumenUndissolved,
    TotalEpithelium,
    TotalWall,
    TotalAbsorbed,
    TotalGutMetabolized,
    /// Mass lost to feces, dissolved plus undissolved.
    TotalFecal,
    /// Mass eliminated from the body by any route.
    TotalEliminated,
    TotalInBody,
    /// Body plus eliminated, the conservation diagnostic.
    GrandTotal,
    /// Portal cumulative mass over total lumen dissolved mass.
    AbsorptionRatio,
}

impl OutputId {
    pub fn name(&self) -> &'static str {
        match self {
            OutputId::CentralNgPerMl => "central_ng_per_ml",
            OutputId::Central => "central",
            OutputId::Peripheral => "peripheral",
            OutputId::Liver => "liver",
            OutputId::TotalLumenDissolved => "total_lumen_dissolved",
            OutputId::TotalLumenUndissolved => "total_lumen_undissolved",
            OutputId::TotalEpithelium => "total_epithelium",
            OutputId::TotalWall => "total_wall",
            OutputId::TotalAbsorbed => "total_absorbed",
            OutputId::TotalGutMetabolized => "total_gut_metabolized",
            OutputId::TotalFecal => "total_fecal",
            OutputId::TotalEliminated => "total_eliminated",
            OutputId::TotalInBody => "total_in_body",
            OutputId::GrandTotal => "grand_total",
            OutputId::AbsorptionRatio => "absorption_ratio",
        }
    }
}

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// All derived quantities at a single time point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outputs {
    pub time: f64,
    /// Luminal dissolved concentration per segment (umol/L).
    pub lumen_dissolved_concentration: [f64; N_SEGMENTS],
    /// Epithelial concentration per segment (umol/L).
    pub epithelium_concentration: [f64; N_SEGMENTS],
    /// Wall concentration per segment (umol/L).
    pub wall_concentration: [f64; N_SEGMENTS],
    pub central_concentration: f64,
    pub central_ng_per_ml: f64,
    pub peripheral_concentration: f64,
    pub liver_concentration: f64,
    pub diagnostics: Diagnostics,
}

/// Mass-balance aggregates across segments (umol).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Diagnostics {
    pub total_lumen_dissolved: f64,
    pub total_lumen_undissolved: f64,
    pub total_epithelium: f64,
    pub total_wall: f64,
    pub total_absorbed: f64,
    pub total_gut_metabolized: f64,
    pub total_fecal: f64,
    pub total_eliminated: f64,
    pub total_in_body: f64,
    pub grand_total: f64,
    pub absorption_ratio: f64,
}

/// Compute the reportable outputs from one state snapshot.
pub fn compute(model: &ScaledModel, time: f64, x: &[f64]) -> Outputs {
    let mut lumen_dissolved_concentration = [0.0; N_SEGMENTS];
    let mut epithelium_concentration = [0.0; N_SEGMENTS];
    let mut wall_concentration = [0.0; N_SEGMENTS];

    let mut total_lumen_dissolved = 0.0;
    let mut total_lumen_undissolved = 0.0;
    let mut total_epithelium = 0.0;
    let mut total_wall = 0.0;
    let mut total_absorbed = 0.0;
    let mut total_gut_metabolized = 0.0;

    for segment in Segment::ALL {
        let i = segment.index();
        let seg = model.segment(segment);
        lumen_dissolved_concentration[i] = x[lumen_dissolved(segment)] / seg.volume_lumen;
        epithelium_concentration[i] = x[epithelium(segment)] / seg.volume_epithelium;
        wall_concentration[i] = x[wall(segment)] / seg.volume_wall;

        total_lumen_dissolved += x[lumen_dissolved(segment)];
        total_lumen_undissolved += x[lumen_undissolved(segment)];
        total_epithelium += x[epithelium(segment)];
        total_wall += x[wall(segment)];
        total_absorbed += x[absorbed(segment)];
        total_gut_metabolized += x[gut_metabolized(segment)];
    }

    let total_fecal = x[FECES_DISSOLVED] + x[FECES_UNDISSOLVED];
    let total_eliminated =
        total_gut_metabolized + x[LIVER_METABOLIZED] + x[CENTRAL_ELIMINATED] + total_fecal;
    let total_in_body = total_lumen_dissolved
        + total_lumen_undissolved
        + total_epithelium
        + total_wall
        + x[CENTRAL]
        + x[PERIPHERAL]
        + x[LIVER];

    let central_concentration = x[CENTRAL] / model.volume_central;

    Outputs {
        time,
        lumen_dissolved_concentration,
        epithelium_concentration,
        wall_concentration,
        central_concentration,
        // umol/L times g/mol gives ug/L, which is ng/mL.
        central_ng_per_ml: central_concentration * model.molecular_mass,
        peripheral_concentration: x[PERIPHERAL] / model.volume_peripheral,
        liver_concentration: x[LIVER] / model.volume_liver,
        diagnostics: Diagnostics {
            total_lumen_dissolved,
            total_lumen_undissolved,
            total_epithelium,
            total_wall,
            total_absorbed,
            total_gut_metabolized,
            total_fecal,
            total_eliminated,
            total_in_body,
            grand_total: total_in_body + total_eliminated,
            absorption_ratio: if total_lumen_dissolved == 0.0 {
                0.0
            } else {
                x[PORTAL_CUMULATIVE] / total_lumen_dissolved
            },
        },
    }
}

impl Outputs {
    /// Look up a scalar series value by output id.
    pub fn get(&self, id: OutputId) -> f64 {
        match id {
            OutputId::CentralNgPerMl => self.central_ng_per_ml,
            OutputId::Central => self.central_concentration,
            OutputId::Peripheral => self.peripheral_concentration,
            OutputId::Liver => self.liver_concentration,
            OutputId::TotalLumenDissolved => self.diagnostics.total_lumen_dissolved,
            OutputId::TotalLumenUndissolved => self.diagnostics.total_lumen_undissolved,
            OutputId::TotalEpithelium => self.diagnostics.total_epithelium,
            OutputId::TotalWall => self.diagnostics.total_wall,
            OutputId::TotalAbsorbed => self.diagnostics.total_absorbed,
            OutputId::TotalGutMetabolized => self.diagnostics.total_gut_metabolized,
            OutputId::TotalFecal => self.diagnostics.total_fecal,
            OutputId::TotalEliminated => self.diagnostics.total_eliminated,
            OutputId::TotalInBody => self.diagnostics.total_in_body,
            OutputId::GrandTotal => self.diagnostics.grand_total,
            OutputId::AbsorptionRatio => self.diagnostics.absorption_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scaled::test_substance;
    use crate::params::Physiology;
    use approx::assert_relative_eq;

    fn test_model() -> ScaledModel {
        ScaledModel::new(&Physiology::default(), &test_substance(), 72.7).unwrap()
    }

    #[test]
    fn absorption_ratio_guards_against_empty_lumen() {
        let model = test_model();
        let mut x = vec![0.0; N_STATES];
        x[PORTAL_CUMULATIVE] = 10.0;
        let outputs = compute(&model, 1.0, &x);
        assert_eq!(outputs.diagnostics.absorption_ratio, 0.0);
    }

    #[test]
    fn central_unit_conversion_uses_molecular_mass() {
        let model = test_model();
        let mut x = vec![0.0; N_STATES];
        x[CENTRAL] = 30.0;
        let outputs = compute(&model, 0.0, &x);
        let expected_umolar = 30.0 / model.volume_central;
        assert_relative_eq!(outputs.central_concentration, expected_umolar);
        assert_relative_eq!(
            outputs.central_ng_per_ml,
            expected_umolar * 239.74,
            max_relative = 1e-12
        );
    }

    #[test]
    fn grand_total_matches_conserved_sum() {
        let model = test_model();
        let mut x = vec![0.0; N_STATES];
        for (i, v) in x.iter_mut().enumerate() {
            *v = (i + 1) as f64;
        }
        let outputs = compute(&model, 0.0, &x);
        assert_relative_eq!(
            outputs.diagnostics.grand_total,
            conserved_mass(&x),
            max_relative = 1e-12
        );
    }

    #[test]
    fn output_ids_cover_every_series() {
        let model = test_model();
        let x = vec![0.5; N_STATES];
        let outputs = compute(&model, 0.0, &x);
        for id in [
            OutputId::CentralNgPerMl,
            OutputId::Central,
            OutputId::Peripheral,
            OutputId::Liver,
            OutputId::TotalLumenDissolved,
            OutputId::TotalLumenUndissolved,
            OutputId::TotalEpithelium,
            OutputId::TotalWall,
            OutputId::TotalAbsorbed,
            OutputId::TotalGutMetabolized,
            OutputId::TotalFecal,
            OutputId::TotalEliminated,
            OutputId::TotalInBody,
            OutputId::GrandTotal,
            OutputId::AbsorptionRatio,
        ] {
            assert!(outputs.get(id).is_finite(), "{} not finite", id);
        }
    }
}
