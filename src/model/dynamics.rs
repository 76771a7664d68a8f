//! The compartment mass-balance dynamics.
//!
//! [`derivatives`] is the function the stiff solver evaluates at every
//! step. It is pure: rates depend only on the state, the scaled model, and
//! the instantaneous dose rate, so independent draws can evaluate it
//! concurrently without synchronization.

use nalgebra::DVector;

use super::scaled::ScaledModel;
use super::state::*;
use crate::dosing::DoseRate;
use crate::params::Segment;

/// Evaluate all instantaneous rates of change.
///
/// Concentrations are computed from masses clamped at zero so that the
/// saturable (Michaelis-Menten) consumption terms cannot amplify transient
/// negative masses from the implicit solver. Every flux is added to exactly
/// one source and one sink, which keeps the conserved sum exact by
/// construction.
pub fn derivatives(model: &ScaledModel, dose: &DoseRate, x: &DVector<f64>, dx: &mut DVector<f64>) {
    dx.fill(0.0);

    let mut inflow_dissolved = dose.dissolved;
    let mut inflow_undissolved = dose.undissolved;
    let mut portal_total = 0.0;

    for segment in Segment::ALL {
        let seg = model.segment(segment);
        let i_ld = lumen_dissolved(segment);
        let i_lu = lumen_undissolved(segment);
        let i_ep = epithelium(segment);
        let i_wa = wall(segment);

        let c_lumen = x[i_ld].max(0.0) / seg.volume_lumen;
        let c_epithelium_unbound = model.fu_gut * x[i_ep].max(0.0) / seg.volume_epithelium;
        let c_wall = x[i_wa].max(0.0) / seg.volume_wall;
        let c_wall_unbound = model.fu_gut * c_wall;

        // Dissolution driving force; a dissolved concentration above Csat
        // turns the same expression into net precipitation.
        let j_dissolution = model.k_dissolution * (seg.csat - c_lumen) * x[i_lu].max(0.0);
        let j_precipitation = model.k_precipitation * x[i_ld];

        // First-order transit to the next segment, feces after the colon.
        let j_transit_dissolved = seg.transit_rate * x[i_ld];
        let j_transit_undissolved = seg.transit_rate * x[i_lu];

        // Lumen to epithelium, dissolved form only. The segment scale
        // factor is already folded into ka and gates the carriers too, so a
        // switched-off segment absorbs exactly nothing.
        let passive = seg.ka * (c_lumen - model.keq_lumen_epithelium * c_epithelium_unbound);
        let influx = seg.absorption_scale * seg.vmax_influx * c_lumen
            / (model.km_influx_gut + c_lumen);
        let efflux = seg.absorption_scale * seg.vmax_efflux * c_epithelium_unbound
            / (model.km_efflux_gut + c_epithelium_unbound);
        let j_absorption = passive + influx - efflux;

        // Epithelium to wall, passive on unbound concentrations.
        let j_wall = seg.wall_conductance
            * (c_epithelium_unbound - model.keq_epithelium_wall * c_wall_unbound);

        // Epithelial first-pass metabolism.
        let j_metabolism = seg.vmax_metabolism * c_epithelium_unbound
            / (model.km_metabolism_gut + c_epithelium_unbound);

        // Wall to portal blood: flow times segment-exit blood concentration,
        // tissue -> unbound tissue -> unbound blood -> total blood.
        let c_exit_blood = c_wall * model.fu_gut / model.kpuu_gut / model.fu_blood;
        let j_portal = seg.blood_flow * c_exit_blood;

        dx[i_ld] = inflow_dissolved + j_dissolution - j_precipitation
            - j_transit_dissolved
            - j_absorption;
        dx[i_lu] = inflow_undissolved - j_dissolution + j_precipitation - j_transit_undissolved;
        dx[i_ep] = j_absorption - j_wall - j_metabolism;
        dx[i_wa] = j_wall - j_portal;
        dx[absorbed(segment)] = j_absorption;
        dx[gut_metabolized(segment)] = j_metabolism;

        portal_total += j_portal;
        inflow_dissolved = j_transit_dissolved;
        inflow_undissolved = j_transit_undissolved;
    }

    // The colon empties into the feces trackers.
    dx[FECES_DISSOLVED] = inflow_dissolved;
    dx[FECES_UNDISSOLVED] = inflow_undissolved;
    dx[PORTAL_CUMULATIVE] = portal_total;

    // Liver: portal and arterial inflow, carrier transport against the
    // central compartment, saturable metabolism, flow-limited outflow.
    let c_central = x[CENTRAL].max(0.0) / model.volume_central;
    let c_liver = x[LIVER].max(0.0) / model.volume_liver;
    let c_liver_unbound = model.fu_liver * c_liver;

    let j_arterial = model.arterial_flow * c_central;
    let j_influx_liver =
        model.vmax_influx_liver * c_central / (model.km_influx_liver + c_central);
    let j_efflux_liver = model.vmax_efflux_liver * c_liver_unbound
        / (model.km_efflux_liver + c_liver_unbound);
    let j_metabolism_liver = model.vmax_metabolism_liver * c_liver_unbound
        / (model.km_metabolism_liver + c_liver_unbound);
    let c_liver_exit = c_liver * model.fu_liver / model.kpuu_liver / model.fu_blood;
    let j_hepatic_venous = (model.portal_flow + model.arterial_flow) * c_liver_exit;

    dx[LIVER] = j_arterial + portal_total + j_influx_liver
        - j_efflux_liver
        - j_metabolism_liver
        - j_hepatic_venous;
    dx[LIVER_METABOLIZED] = j_metabolism_liver;

    // Two-compartment disposition. The peripheral net flux and the
    // elimination flux are each computed once and reused in the paired
    // equations so the balance stays exact.
    let j_peripheral = model.kc2p * x[CENTRAL] - model.kp2c * x[PERIPHERAL];
    let j_elimination = model.kelim * x[CENTRAL];

    dx[PERIPHERAL] = j_peripheral;
    dx[CENTRAL_ELIMINATED] = j_elimination;
    dx[CENTRAL] = dose.intravenous + j_hepatic_venous
        - j_arterial
        - j_influx_liver
        + j_efflux_liver
        - j_peripheral
        - j_elimination;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scaled::test_substance;
    use crate::params::{Physiology, N_SEGMENTS};
    use approx::assert_relative_eq;

    fn test_model() -> ScaledModel {
        ScaledModel::new(&Physiology::default(), &test_substance(), 72.7).unwrap()
    }

    fn derivative_sum_is_input_rate(model: &ScaledModel, dose: &DoseRate, x: &DVector<f64>) {
        let mut dx = DVector::zeros(N_STATES);
        derivatives(model, dose, x, &mut dx);
        let conserved: f64 = conserved_mass(dx.as_slice());
        assert_relative_eq!(conserved, dose.total(), epsilon = 1e-9 * dose.total().max(1.0));
    }

    #[test]
    fn fluxes_conserve_mass_for_arbitrary_states() {
        let model = test_model();
        // A deliberately lopsided state exercising every flux path.
        let mut x = DVector::zeros(N_STATES);
        for segment in Segment::ALL {
            x[lumen_dissolved(segment)] = 40.0 + segment.index() as f64;
            x[lumen_undissolved(segment)] = 200.0;
            x[epithelium(segment)] = 3.0;
            x[wall(segment)] = 7.0;
        }
        x[CENTRAL] = 120.0;
        x[PERIPHERAL] = 60.0;
        x[LIVER] = 25.0;

        derivative_sum_is_input_rate(&model, &DoseRate::ZERO, &x);
        derivative_sum_is_input_rate(
            &model,
            &DoseRate {
                dissolved: 500.0,
                undissolved: 120.0,
                intravenous: 30.0,
            },
            &x,
        );
    }

    #[test]
    fn dissolution_is_zero_at_saturation() {
        let model = test_model();
        let seg = model.segment(Segment::Jejunum);
        let mut x = DVector::zeros(N_STATES);
        // Dissolved concentration exactly at Csat, plenty of solid left.
        x[lumen_dissolved(Segment::Jejunum)] = seg.csat * seg.volume_lumen;
        x[lumen_undissolved(Segment::Jejunum)] = 500.0;

        let mut dx = DVector::zeros(N_STATES);
        derivatives(&model, &DoseRate::ZERO, &x, &mut dx);

        // With zero precipitation the only loss from the solid pool is
        // transit: the driving-force term vanishes at saturation.
        let expected = -seg.transit_rate * 500.0;
        assert_relative_eq!(
            dx[lumen_undissolved(Segment::Jejunum)],
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn supersaturation_drives_net_precipitation() {
        let model = test_model();
        let seg = model.segment(Segment::Duodenum);
        let mut x = DVector::zeros(N_STATES);
        x[lumen_dissolved(Segment::Duodenum)] = 2.0 * seg.csat * seg.volume_lumen;
        x[lumen_undissolved(Segment::Duodenum)] = 10.0;

        let mut dx = DVector::zeros(N_STATES);
        derivatives(&model, &DoseRate::ZERO, &x, &mut dx);

        // Negative driving force moves mass back to the solid pool on top
        // of the transit loss.
        assert!(dx[lumen_undissolved(Segment::Duodenum)] > -seg.transit_rate * 10.0);
    }

    #[test]
    fn switched_off_segments_have_zero_absorption_rate() {
        let mut substance = test_substance();
        substance.absorption_scale = [0.0; N_SEGMENTS];
        substance.vmax_influx_gut = 50.0;
        substance.vmax_efflux_gut = 50.0;
        let model = ScaledModel::new(&Physiology::default(), &substance, 72.7).unwrap();

        let mut x = DVector::zeros(N_STATES);
        for segment in Segment::ALL {
            x[lumen_dissolved(segment)] = 100.0;
            x[epithelium(segment)] = 5.0;
        }
        let mut dx = DVector::zeros(N_STATES);
        derivatives(&model, &DoseRate::ZERO, &x, &mut dx);
        for segment in Segment::ALL {
            assert_eq!(dx[absorbed(segment)], 0.0);
        }
    }

    #[test]
    fn undissolved_mass_is_never_absorbed() {
        let model = test_model();
        let mut x = DVector::zeros(N_STATES);
        for segment in Segment::ALL {
            x[lumen_undissolved(segment)] = 100.0;
        }
        // Suppress dissolution by saturating the (empty) dissolved pool is
        // not possible here, so check the direct path instead: with no
        // dissolved mass anywhere the absorbed trackers see no flux.
        let mut model_no_diss = model.clone();
        model_no_diss.k_dissolution = 0.0;
        let mut dx = DVector::zeros(N_STATES);
        derivatives(&model_no_diss, &DoseRate::ZERO, &x, &mut dx);
        for segment in Segment::ALL {
            assert_eq!(dx[absorbed(segment)], 0.0);
        }
    }

    #[test]
    fn peripheral_flux_is_shared_between_equations() {
        let model = test_model();
        let mut x = DVector::zeros(N_STATES);
        x[CENTRAL] = 80.0;
        x[PERIPHERAL] = 20.0;
        let mut dx = DVector::zeros(N_STATES);
        derivatives(&model, &DoseRate::ZERO, &x, &mut dx);

        let j_peripheral = model.kc2p * 80.0 - model.kp2c * 20.0;
        let j_elimination = model.kelim * 80.0;
        assert_relative_eq!(dx[PERIPHERAL], j_peripheral, max_relative = 1e-12);
        assert_relative_eq!(dx[CENTRAL_ELIMINATED], j_elimination, max_relative = 1e-12);
        // Central loses exactly what the trackers and liver gain.
        let j_arterial = model.arterial_flow * 80.0 / model.volume_central;
        assert_relative_eq!(
            dx[CENTRAL],
            -j_arterial - j_peripheral - j_elimination,
            max_relative = 1e-12
        );
    }

    #[test]
    fn negative_transients_do_not_amplify() {
        let model = test_model();
        let mut x = DVector::zeros(N_STATES);
        // Small negative overshoot in the epithelium, as an implicit step
        // can transiently produce.
        x[epithelium(Segment::Ileum)] = -1e-9;
        let mut dx = DVector::zeros(N_STATES);
        derivatives(&model, &DoseRate::ZERO, &x, &mut dx);
        // Metabolism reads a clamped concentration, so no mass is created.
        assert_eq!(dx[gut_metabolized(Segment::Ileum)], 0.0);
    }
}
