// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Property-Based Tests (proptest) for xal-model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for xal-model using proptest.
//!
//! Covers: identity elements, sub-step convergence, map composition along
//! a lattice, gap phase continuity, tracker persistence, probe/tracker
//! compatibility, singular responses.

use std::f64::consts::PI;

use proptest::prelude::*;
use xal_math::covariance::{CovarianceMatrix, Twiss};
use xal_math::phase::{PhaseMatrix, PhaseVector};
use xal_model::archive::{DataAdaptor, DataNode};
use xal_model::element::{quad_strength, quadrupole_map, Element};
use xal_model::lattice::{Lattice, Sequence};
use xal_model::probe::{Probe, ProbeKind, Species};
use xal_model::rf_gap::RfGap;
use xal_model::tracker::{Tracker, NODETAG_ALGORITHM};
use xal_model::trajectory::{ProbeState, StateData, Trajectory};
use xal_types::config::{EmitGrowthModel, TrackerSettings, UpdatePolicy};
use xal_types::constants::LIGHT_SPEED;
use xal_types::error::ModelError;

const W0: f64 = 2.5e6;
const FREQ: f64 = 4.025e8;

fn vector_strategy() -> impl Strategy<Value = PhaseVector> {
    prop::array::uniform6(-1e-3f64..1e-3).prop_map(PhaseVector::from_coords)
}

fn envelope_probe(current: f64) -> Probe {
    let cov = CovarianceMatrix::from_twiss(&[
        Twiss::new(-0.18, 0.24, 2.9e-6),
        Twiss::new(-0.32, 0.40, 2.9e-6),
        Twiss::new(-0.53, 0.87, 3.9e-6),
    ]);
    Probe::envelope(Species::proton(), W0, cov).with_beam_current(current)
}

// ── Identity Elements ────────────────────────────────────────────────

proptest! {
    /// Zero-length drifts and zero-ETL gaps change nothing.
    #[test]
    fn identity_elements_leave_probe_unchanged(
        v in vector_strategy(),
        phase in -PI..PI,
    ) {
        let tracker = Tracker::new(ProbeKind::Particle);
        for element in [
            Element::drift("d0", 0.0),
            Element::rf_gap("g0", RfGap::new(0.0, phase, FREQ)),
            Element::marker("m0"),
        ] {
            let mut probe = Probe::particle(Species::proton(), W0, v);
            tracker.propagate_element(&mut probe, &element).unwrap();
            prop_assert_eq!(probe.phase_coordinates().unwrap(), v);
            prop_assert_eq!(probe.kinetic_energy(), W0);
            prop_assert_eq!(probe.position(), 0.0);
        }
    }
}

// ── Sub-step Convergence ─────────────────────────────────────────────

proptest! {
    /// Sub-stepped quadrupoles compose to the single-step map.
    #[test]
    fn quadrupole_substeps_match_direct_map(
        gradient in -10.0f64..10.0,
        length in 0.05f64..0.5,
        step in 0.001f64..0.05,
    ) {
        let mut tracker = Tracker::new(ProbeKind::TransferMap);
        tracker.set_step_size(step).unwrap();
        let mut probe = Probe::transfer_map(Species::proton(), W0);
        let quad = Element::quadrupole("q", length, gradient);
        let k = quad_strength(&probe, gradient).unwrap();
        let direct = quadrupole_map(length, k, probe.gamma());
        tracker.propagate_element(&mut probe, &quad).unwrap();
        let stepped = probe.response_map().unwrap();
        prop_assert!(stepped.approx_eq(&direct, 1e-9),
            "max diff {}", stepped.max_abs_diff(&direct));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// With space charge the envelope converges as the step shrinks.
    #[test]
    fn space_charge_envelope_converges(current in 0.0f64..0.02) {
        let drift = Element::drift("d", 0.3);
        let sizes = [0.01, 0.005, 0.0025].map(|step| {
            let mut tracker = Tracker::new(ProbeKind::Envelope);
            tracker.set_step_size(step).unwrap();
            let mut probe = envelope_probe(current);
            tracker.propagate_element(&mut probe, &drift).unwrap();
            probe.covariance().unwrap().rms_sizes()
        });
        for plane in 0..3 {
            let coarse = (sizes[0][plane] - sizes[2][plane]).abs();
            let fine = (sizes[1][plane] - sizes[2][plane]).abs();
            prop_assert!(fine <= coarse + 1e-15, "plane {}: {} vs {}", plane, fine, coarse);
            prop_assert!(coarse / sizes[2][plane] < 1e-2);
        }
    }
}

// ── Composition Along a Lattice ──────────────────────────────────────

proptest! {
    /// A particle tracked element by element lands where the accumulated
    /// transfer map sends it.
    #[test]
    fn particle_follows_accumulated_map(
        v in vector_strategy(),
        g1 in -8.0f64..8.0,
        g2 in -8.0f64..8.0,
        etl in 0.0f64..2.0e5,
        phase in -PI / 2.0..0.0,
    ) {
        let mut seq = Sequence::new("cell");
        seq.add_element(Element::quadrupole("q1", 0.1, g1), 0.0)
            .add_element(Element::rf_gap("g", RfGap::new(etl, phase, FREQ).as_first_gap()), 0.2)
            .add_element(Element::sector_dipole("b", 0.3, 0.1), 0.3)
            .add_element(Element::quadrupole("q2", 0.1, g2), 0.7);
        let lattice = Lattice::from_sequence(&seq).unwrap();

        let mut particle = Probe::particle(Species::proton(), W0, v);
        Tracker::new(ProbeKind::Particle).propagate(&mut particle, &lattice).unwrap();
        let mut map = Probe::transfer_map(Species::proton(), W0);
        Tracker::new(ProbeKind::TransferMap).propagate(&mut map, &lattice).unwrap();

        let direct = map.response_map().unwrap().apply(&v);
        prop_assert!(particle.phase_coordinates().unwrap().approx_eq(&direct, 1e-12));
        prop_assert_eq!(particle.kinetic_energy(), map.kinetic_energy());

        // S(q2)·S(q1)⁻¹ carries the q1 exit state to the q2 exit state
        let traj = particle.trajectory();
        let response = map.trajectory().state_response("q1", "q2").unwrap();
        let at = |id: &str| match &traj.state_for_element(id).unwrap().data {
            StateData::Particle(p) => *p,
            other => panic!("unexpected state {other:?}"),
        };
        prop_assert!(response.apply(&at("q1")).approx_eq(&at("q2"), 1e-12));
    }
}

// ── Gap Phase Continuity ─────────────────────────────────────────────

proptest! {
    /// φ₂ = φ₁ + 2π·Δs/(λβ), plus π in π-mode structures.
    #[test]
    fn gap_phase_continuity(
        spacing in 0.01f64..1.0,
        design in -PI..PI,
        pi_mode in any::<bool>(),
    ) {
        let mode = i32::from(pi_mode);
        let mut seq = Sequence::new("cav");
        seq.add_element(Element::rf_gap("g1", RfGap::new(0.0, design, FREQ).as_first_gap()), 0.0)
            .add_element(
                Element::rf_gap("g2", RfGap::new(0.0, 0.0, FREQ).with_structure_mode(mode)),
                spacing,
            );
        let lattice = Lattice::from_sequence(&seq).unwrap();
        let mut probe = Probe::transfer_map(Species::proton(), W0);
        Tracker::new(ProbeKind::TransferMap).propagate(&mut probe, &lattice).unwrap();

        let lambda = LIGHT_SPEED / FREQ;
        let mut expected = design + 2.0 * PI * spacing / (lambda * probe.beta());
        if pi_mode {
            expected += PI;
        }
        let record = probe.last_gap().unwrap();
        prop_assert!((record.phase - expected).abs() < 1e-9);
        prop_assert!((record.position - spacing).abs() < 1e-12);
    }
}

// ── Tracker Persistence ──────────────────────────────────────────────

fn policy_strategy() -> impl Strategy<Value = UpdatePolicy> {
    prop_oneof![
        Just(UpdatePolicy::Custom),
        Just(UpdatePolicy::Always),
        Just(UpdatePolicy::Exit),
        Just(UpdatePolicy::Entrance),
        Just(UpdatePolicy::EntranceAndExit),
    ]
}

fn growth_strategy() -> impl Strategy<Value = EmitGrowthModel> {
    prop_oneof![
        Just(EmitGrowthModel::Trace3d),
        Just(EmitGrowthModel::Gaussian1d),
        Just(EmitGrowthModel::Gaussian3d),
        Just(EmitGrowthModel::Uniform3d),
    ]
}

fn kind_strategy() -> impl Strategy<Value = ProbeKind> {
    prop::sample::select(ProbeKind::ALL.to_vec())
}

proptest! {
    /// save followed by load reproduces the configuration.
    #[test]
    fn tracker_archive_roundtrip(
        kind in kind_strategy(),
        step_size in 1e-4f64..0.1,
        space_charge in any::<bool>(),
        emittance_growth in any::<bool>(),
        model in growth_strategy(),
        phase_calc in any::<bool>(),
        policy in policy_strategy(),
        debug in any::<bool>(),
    ) {
        let settings = TrackerSettings {
            step_size,
            space_charge,
            emittance_growth,
            emit_growth_model: model,
            rf_gap_phase_calculation: phase_calc,
            update_policy: policy,
            debug,
            ..TrackerSettings::default()
        };
        let tracker = Tracker::new(kind).with_settings(settings).unwrap();
        let mut root = DataNode::new("root");
        tracker.save(&mut root);

        let json = root.to_json().unwrap();
        let restored_root = DataNode::from_json(&json).unwrap();
        let node = restored_root.required_child(NODETAG_ALGORITHM).unwrap();
        let restored = Tracker::new_instance(node).unwrap();
        prop_assert_eq!(restored.kind(), kind);
        prop_assert_eq!(restored.settings(), tracker.settings());
        prop_assert_eq!(restored.version(), tracker.version());
    }
}

// ── Probe/Tracker Compatibility ──────────────────────────────────────

proptest! {
    /// Only the matching tracker accepts a probe.
    #[test]
    fn mismatched_probe_is_rejected(
        probe_kind in kind_strategy(),
        tracker_kind in kind_strategy(),
    ) {
        let beam = xal_types::config::BeamSettings {
            species_charge: 1.0,
            rest_energy: Species::proton().rest_energy,
            kinetic_energy: W0,
            beam_current: 0.0,
            bunch_frequency: FREQ,
            normalized_emittance: false,
            twiss: [xal_types::config::TwissSettings {
                alpha: 0.0,
                beta: 0.5,
                emittance: 1e-6,
            }; 3],
            ensemble_size: 8,
            seed: 1,
        };
        let mut probe = Probe::from_beam(probe_kind, &beam).unwrap();
        let result = Tracker::new(tracker_kind)
            .propagate_element(&mut probe, &Element::drift("d", 0.1));
        if probe_kind == tracker_kind {
            prop_assert!(result.is_ok());
        } else {
            let is_mismatch = matches!(result, Err(ModelError::ProbeMismatch { .. }));
            prop_assert!(is_mismatch);
            prop_assert_eq!(probe.position(), 0.0);
        }
    }
}

// ── Singular Responses ───────────────────────────────────────────────

proptest! {
    /// A near-singular recorded map cannot be inverted for a response.
    #[test]
    fn singular_response_is_detected(scale in 1e-6f64..1e-3) {
        let singular = PhaseMatrix::with_blocks(
            [[scale, 0.0], [0.0, scale]],
            [[scale, 0.0], [0.0, scale]],
            [[scale, 0.0], [0.0, scale]],
        );
        let state = |id: &str, map: PhaseMatrix| ProbeState {
            element_id: id.to_string(),
            position: 0.0,
            time: 0.0,
            kinetic_energy: W0,
            species: Species::proton(),
            data: StateData::TransferMap(map),
        };
        let mut traj = Trajectory::new();
        traj.push(state("a", singular));
        traj.push(state("b", PhaseMatrix::identity()));
        let is_singular = matches!(
            traj.state_response("a", "b"),
            Err(ModelError::SingularMatrix { .. })
        );
        prop_assert!(is_singular);
        prop_assert!(traj.state_response("b", "a").is_ok());
    }
}
