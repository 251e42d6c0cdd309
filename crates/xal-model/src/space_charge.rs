// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Space Charge
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Linear space-charge kick of a uniformly filled ellipsoidal bunch.
//!
//! The self-field of an ellipsoid with the same second moments as the beam
//! is linear inside the bunch. Its strength along each semi-axis is given
//! by Carlson's R_D over the squared semi-axes in the bunch rest frame,
//! where the longitudinal extent is stretched by γ.
//!
//! When the spatial moments are correlated the ellipsoid is rotated onto
//! its principal axes first, the kick is built there and rotated back.

use ndarray::Array2;
use tracing::warn;
use xal_math::covariance::CovarianceMatrix;
use xal_math::elliptic::carlson_rd;
use xal_math::linalg::symmetric_eigen;
use xal_math::phase::{PhaseIndex, PhaseMatrix};
use xal_types::constants::{CONST_UNIFORM_BEAM, TOLER_CORRELATION};
use xal_types::error::{ModelError, ModelResult};

/// Sum of squared normalized spatial correlations:
/// σxy²/(σxxσyy) + σxz²/(σxxσzz) + σyz²/(σyyσzz).
pub fn correlation_index(spatial: &[[f64; 3]; 3]) -> f64 {
    let [xx, yy, zz] = [spatial[0][0], spatial[1][1], spatial[2][2]];
    let (xy, xz, yz) = (spatial[0][1], spatial[0][2], spatial[1][2]);
    xy * xy / (xx * yy) + xz * xz / (xx * zz) + yz * yz / (yy * zz)
}

/// Space-charge map for a step of `length` with generalized perveance
/// `perveance` at Lorentz factor `gamma`. The kick acts about the centroid.
pub fn space_charge_matrix(
    covariance: &CovarianceMatrix,
    perveance: f64,
    gamma: f64,
    length: f64,
) -> ModelResult<PhaseMatrix> {
    if perveance == 0.0 || length == 0.0 {
        return Ok(PhaseMatrix::identity());
    }
    let spatial = covariance.spatial_central();
    if !(spatial[0][0] > 0.0 && spatial[1][1] > 0.0 && spatial[2][2] > 0.0) {
        return Err(ModelError::Numerical(format!(
            "degenerate bunch for space charge: <xx>={:e}, <yy>={:e}, <zz>={:e}",
            spatial[0][0], spatial[1][1], spatial[2][2]
        )));
    }

    let strength = length * perveance;
    let kick = if correlation_index(&spatial) < TOLER_CORRELATION {
        upright_kick(&spatial, strength, gamma)?
    } else {
        warn!(
            correlation = correlation_index(&spatial),
            "correlated bunch, building space charge in the principal frame"
        );
        tilted_kick(&spatial, strength, gamma)?
    };

    let mut local = PhaseMatrix::identity();
    let momenta = [PhaseIndex::Xp, PhaseIndex::Yp, PhaseIndex::Zp];
    let positions = [PhaseIndex::X, PhaseIndex::Y, PhaseIndex::Z];
    for (i, row) in momenta.iter().enumerate() {
        for (j, col) in positions.iter().enumerate() {
            local.set_elem(*row, *col, kick[i][j]);
        }
    }

    let mean = covariance.mean();
    Ok(PhaseMatrix::translation(&mean)
        .times(&local)
        .times(&PhaseMatrix::translation(&mean.scale(-1.0))))
}

fn upright_kick(spatial: &[[f64; 3]; 3], strength: f64, gamma: f64) -> ModelResult<[[f64; 3]; 3]> {
    let g2 = gamma * gamma;
    let (xx, yy, zz) = (spatial[0][0], spatial[1][1], g2 * spatial[2][2]);
    let rdx = carlson_rd(yy, zz, xx)? / CONST_UNIFORM_BEAM;
    let rdy = carlson_rd(zz, xx, yy)? / CONST_UNIFORM_BEAM;
    let rdz = carlson_rd(xx, yy, zz)? / CONST_UNIFORM_BEAM;
    let k = gamma * strength;
    Ok([[k * rdx, 0.0, 0.0], [0.0, k * rdy, 0.0], [0.0, 0.0, k * rdz]])
}

fn tilted_kick(spatial: &[[f64; 3]; 3], strength: f64, gamma: f64) -> ModelResult<[[f64; 3]; 3]> {
    // rest-frame stretch of the longitudinal axis
    let d = [1.0, 1.0, gamma];
    let rest = Array2::from_shape_fn((3, 3), |(i, j)| d[i] * d[j] * spatial[i][j]);
    let (eigenvalues, rotation) = symmetric_eigen(&rest);
    if eigenvalues.iter().any(|v| !(*v > 0.0)) {
        return Err(ModelError::Numerical(format!(
            "bunch ellipsoid is not positive definite: eigenvalues {eigenvalues}"
        )));
    }

    let mut rd = [0.0; 3];
    for (i, value) in rd.iter_mut().enumerate() {
        let j = (i + 1) % 3;
        let k = (i + 2) % 3;
        *value = carlson_rd(eigenvalues[j], eigenvalues[k], eigenvalues[i])? / CONST_UNIFORM_BEAM;
    }

    // lab kick = strength · diag(γ, γ, 1) · R · diag(rd) · Rᵀ · diag(1, 1, γ)
    let lab_scale = [gamma, gamma, 1.0];
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            let rotated: f64 = (0..3)
                .map(|m| rotation[[i, m]] * rd[m] * rotation[[j, m]])
                .sum();
            *value = strength * lab_scale[i] * rotated * d[j];
        }
    }
    Ok(out)
}
