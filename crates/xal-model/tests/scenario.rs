// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Gap and Drift Regression
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Ideal RF gap at −90° with a tiny ETL, followed by a drift to 0.07 m.
//!
//! The reference envelope at the end of the drift was computed from the
//! initial Twiss parameters with the model's drift map.

use std::f64::consts::PI;
use std::path::PathBuf;

use xal_math::phase::PhaseMatrix;
use xal_model::element::{drift_map, Element};
use xal_model::lattice::{Lattice, Sequence};
use xal_model::probe::{Probe, ProbeKind};
use xal_model::rf_gap::RfGap;
use xal_model::tracker::Tracker;
use xal_types::config::ModelConfig;

const GAP_ETL: f64 = 78019.7e-6;
const GAP_FREQUENCY: f64 = 4.025e8;

fn config() -> ModelConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("configs")
        .join("gap_test.json");
    ModelConfig::from_file(&path.to_string_lossy()).unwrap()
}

fn gap_drift_lattice() -> Lattice {
    let mut seq = Sequence::new("gap-test");
    seq.add_element(
        Element::rf_gap("gap", RfGap::new(GAP_ETL, -PI / 2.0, GAP_FREQUENCY).as_first_gap()),
        0.0,
    )
    .add_element(Element::marker("end"), 0.07);
    Lattice::from_sequence(&seq).unwrap()
}

fn assert_close(label: &str, got: f64, want: f64) {
    assert!(
        ((got - want) / want).abs() < 0.01,
        "{label}: got {got:e}, expected {want:e}"
    );
}

#[test]
fn envelope_after_gap_and_drift() {
    xal_types::logging::try_init_tracing();
    let cfg = config();
    let tracker = Tracker::from_config(&cfg).unwrap();
    let mut probe = Probe::from_beam(ProbeKind::Envelope, &cfg.beam).unwrap();
    let lattice = gap_drift_lattice();
    tracker.propagate(&mut probe, &lattice).unwrap();

    let ids: Vec<&str> = probe
        .trajectory()
        .iter()
        .map(|s| s.element_id.as_str())
        .collect();
    assert_eq!(ids, ["gap", "end:drift", "end"]);

    let state = probe.trajectory().state_for_element("end").unwrap();
    assert!((state.position - 0.07).abs() < 1e-12);
    let cov = state.covariance().unwrap();
    let sizes = cov.rms_sizes();
    let twiss = cov.twiss();

    assert_close("sigma_x", sizes[0], 9.119650e-4);
    assert_close("sigma_y", sizes[1], 1.143114e-3);
    assert_close("sigma_z", sizes[2], 1.924663e-3);
    assert_close("beta_x", twiss[0].beta, 0.289571);
    assert_close("beta_y", twiss[1].beta, 0.456488);
    assert_close("beta_z", twiss[2].beta, 0.949110);
    assert_close("alpha_x", twiss[0].alpha, -0.471860);
    assert_close("alpha_y", twiss[1].alpha, -0.519416);
    assert_close("alpha_z", twiss[2].alpha, -0.630857);

    assert!((probe.kinetic_energy() - 2.5e6).abs() < 1e-6);
}

#[test]
fn gap_is_nearly_transparent_and_response_is_the_drift() {
    let cfg = config();
    let tracker = Tracker::from_type_name("TransferMapTracker").unwrap();
    let mut probe = Probe::from_beam(ProbeKind::TransferMap, &cfg.beam).unwrap();
    tracker.propagate(&mut probe, &gap_drift_lattice()).unwrap();

    let gap_map = probe
        .trajectory()
        .state_for_element("gap")
        .unwrap()
        .response_map()
        .copied()
        .unwrap();
    assert!(gap_map.approx_eq(&PhaseMatrix::identity(), 1e-6));

    let response = probe.trajectory().state_response("gap", "end").unwrap();
    let drift = drift_map(0.07, probe.gamma());
    assert!(response.approx_eq(&drift, 1e-9));

    let record = probe.last_gap().unwrap();
    assert_eq!(record.phase, -PI / 2.0);
    assert_eq!(record.position, 0.0);
}

#[test]
fn reset_restores_injection_state() {
    let cfg = config();
    let tracker = Tracker::from_config(&cfg).unwrap();
    let mut probe = Probe::from_beam(ProbeKind::Envelope, &cfg.beam).unwrap();
    let initial = probe.covariance().unwrap();
    tracker.propagate(&mut probe, &gap_drift_lattice()).unwrap();
    assert!(!probe.trajectory().is_empty());

    probe.reset();
    assert!(probe.trajectory().is_empty());
    assert_eq!(probe.position(), 0.0);
    assert_eq!(probe.covariance().unwrap(), initial);

    // a reset probe reproduces the same run
    tracker.propagate(&mut probe, &gap_drift_lattice()).unwrap();
    let again = probe.trajectory().state_for_element("end").unwrap();
    assert!((again.position - 0.07).abs() < 1e-12);
}
