// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Emittance Growth
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Emittance growth from the finite phase spread of a bunch crossing an
//! RF gap.
//!
//! The gap's thin-lens focusing terms are scaled by Fourier transforms of
//! the longitudinal density, F_t for ⟨x'|x⟩ and ⟨y'|y⟩ and F_z for
//! ⟨z'|z⟩. The phase spread is that of the equivalent uniform bunch.

use std::f64::consts::PI;

use xal_math::covariance::CovarianceMatrix;
use xal_math::phase::{PhaseIndex, PhaseMatrix};
use xal_types::config::EmitGrowthModel;

/// Below this the TRACE3D transverse transform switches to its series.
const TRACE3D_SMALL_ARG: f64 = 0.1;
/// Below this the spherical Bessel forms lose too many digits.
const BESSEL_SMALL_ARG: f64 = 0.3;

/// Effective phase spread Δφ = 2π·√(5⟨zz⟩)/(β̄λ) (rad).
pub fn phase_spread(covariance: &CovarianceMatrix, mid_beta: f64, wavelength: f64) -> f64 {
    let z_2 = 5.0 * covariance.central_cov_zz().max(0.0);
    2.0 * PI * z_2.sqrt() / (mid_beta * wavelength)
}

fn spherical_j2(x: f64) -> f64 {
    let (s, c) = x.sin_cos();
    (3.0 / (x * x) - 1.0) * s / x - 3.0 * c / (x * x)
}

fn spherical_j3(x: f64) -> f64 {
    let (s, c) = x.sin_cos();
    (15.0 / (x * x * x) - 6.0 / x) * s / x - (15.0 / (x * x) - 1.0) * c / x
}

/// Transverse transform F_t(Δφ).
pub fn transverse_factor(model: EmitGrowthModel, dphi: f64) -> f64 {
    let x2 = dphi * dphi;
    match model {
        EmitGrowthModel::Trace3d => {
            if dphi < TRACE3D_SMALL_ARG {
                return 1.0 - x2 / 14.0 + x2 * x2 / 504.0;
            }
            let t = 3.0 / x2;
            let sinc = dphi.sin() / dphi;
            5.0 * t * (sinc * (t - 1.0) - dphi.cos() * t)
        }
        EmitGrowthModel::Gaussian1d => (-x2 / 8.0).exp(),
        EmitGrowthModel::Gaussian3d => (-x2 / 10.0).exp(),
        EmitGrowthModel::Uniform3d => {
            if dphi.abs() < BESSEL_SMALL_ARG {
                let x4 = x2 * x2;
                return 1.0 - x2 / 14.0 + x4 / 504.0 - x4 * x2 / 33264.0;
            }
            15.0 * spherical_j2(dphi) / x2
        }
    }
}

/// Longitudinal transform F_z(Δφ).
pub fn longitudinal_factor(model: EmitGrowthModel, dphi: f64) -> f64 {
    let x2 = dphi * dphi;
    match model {
        EmitGrowthModel::Trace3d => 1.0 - x2 / 12.0,
        EmitGrowthModel::Gaussian1d => (1.0 - x2 / 4.0) * (-x2 / 8.0).exp(),
        EmitGrowthModel::Gaussian3d => (1.0 - x2 / 5.0) * (-x2 / 10.0).exp(),
        EmitGrowthModel::Uniform3d => {
            if dphi.abs() < BESSEL_SMALL_ARG {
                let x4 = x2 * x2;
                return 1.0 - 3.0 * x2 / 14.0 + 5.0 * x4 / 504.0 - x4 * x2 / 4752.0;
            }
            15.0 * (spherical_j2(dphi) / x2 - spherical_j3(dphi) / dphi)
        }
    }
}

/// (F_t, F_t, F_z) for `model` at phase spread `dphi`.
pub fn growth_factors(model: EmitGrowthModel, dphi: f64) -> [f64; 3] {
    let ft = transverse_factor(model, dphi);
    [ft, ft, longitudinal_factor(model, dphi)]
}

/// Scale the thin-lens focusing terms of a gap map by `factors`.
pub fn apply_growth(map: &PhaseMatrix, factors: [f64; 3]) -> PhaseMatrix {
    let mut out = *map;
    let terms = [
        (PhaseIndex::Xp, PhaseIndex::X),
        (PhaseIndex::Yp, PhaseIndex::Y),
        (PhaseIndex::Zp, PhaseIndex::Z),
    ];
    for ((row, col), f) in terms.into_iter().zip(factors) {
        out.set_elem(row, col, map.elem(row, col) * f);
    }
    out
}
