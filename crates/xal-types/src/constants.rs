// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Speed of light in vacuum (m/s)
pub const LIGHT_SPEED: f64 = 2.997_924_58e8;

/// Vacuum permittivity (F/m)
pub const PERMITTIVITY: f64 = 8.854_187_817e-12;

/// Elementary charge (C)
pub const Q_ELECTRON: f64 = 1.602176634e-19;

/// Proton rest energy (eV)
pub const PROTON_REST_ENERGY: f64 = 9.382_720_88e8;

/// H- ion rest energy (eV)
pub const HMINUS_REST_ENERGY: f64 = 9.393_014e8;

/// Electron rest energy (eV)
pub const ELECTRON_REST_ENERGY: f64 = 5.109_989_5e5;

/// Default thick-element integration step (m).
pub const DEFAULT_STEP_SIZE: f64 = 0.004;

/// Uniform-ellipsoid equivalent factor 5^(3/2) applied to rms sizes in the
/// space-charge elliptic integrals.
pub const CONST_UNIFORM_BEAM: f64 = 11.180_339_887_498_949;

/// Correlation sum below which the beam is treated as upright in
/// configuration space.
pub const TOLER_CORRELATION: f64 = 0.01;

/// Convergence tolerance for the mid-gap velocity iteration.
pub const PHASE_CALC_TOLERANCE: f64 = 1e-12;

/// Iteration cap for the mid-gap velocity iteration.
pub const PHASE_CALC_MAX_ITER: usize = 50;

/// Default |det| threshold for phase-matrix inversion.
pub const SINGULAR_TOLERANCE: f64 = 1e-14;
