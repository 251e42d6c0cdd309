// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Elliptic
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Carlson symmetric elliptic integrals R_F and R_D.
//!
//! Evaluated by the duplication theorem followed by a fifth-order Taylor
//! series (Carlson 1995, Numer. Algorithms 10, 13-26). R_D supplies the
//! self-field form factors of a uniformly charged ellipsoid.

use xal_types::error::{ModelError, ModelResult};

const RF_ERRTOL: f64 = 0.0008;
const RD_ERRTOL: f64 = 0.0015;

/// R_F(x, y, z) = ½ ∫₀^∞ [(t+x)(t+y)(t+z)]^(-1/2) dt.
///
/// Requires x, y, z ≥ 0 with at most one of them zero.
pub fn carlson_rf(x: f64, y: f64, z: f64) -> ModelResult<f64> {
    let zeros = [x, y, z].iter().filter(|v| **v == 0.0).count();
    if x < 0.0 || y < 0.0 || z < 0.0 || zeros > 1 || !(x + y + z).is_finite() {
        return Err(ModelError::Numerical(format!(
            "carlson_rf arguments out of domain: ({x}, {y}, {z})"
        )));
    }

    let (mut x, mut y, mut z) = (x, y, z);
    loop {
        let (sx, sy, sz) = (x.sqrt(), y.sqrt(), z.sqrt());
        let lambda = sx * (sy + sz) + sy * sz;
        x = 0.25 * (x + lambda);
        y = 0.25 * (y + lambda);
        z = 0.25 * (z + lambda);
        let ave = (x + y + z) / 3.0;
        let dx = (ave - x) / ave;
        let dy = (ave - y) / ave;
        let dz = (ave - z) / ave;
        if dx.abs().max(dy.abs()).max(dz.abs()) < RF_ERRTOL {
            let e2 = dx * dy - dz * dz;
            let e3 = dx * dy * dz;
            return Ok((1.0 + (e2 / 24.0 - 0.1 - 3.0 * e3 / 44.0) * e2 + e3 / 14.0) / ave.sqrt());
        }
    }
}

/// R_D(x, y, z) = 3/2 ∫₀^∞ [(t+x)(t+y)]^(-1/2) (t+z)^(-3/2) dt.
///
/// Requires x, y ≥ 0 with x + y > 0, and z > 0.
pub fn carlson_rd(x: f64, y: f64, z: f64) -> ModelResult<f64> {
    if x < 0.0 || y < 0.0 || x + y <= 0.0 || !(z > 0.0) || !(x + y + z).is_finite() {
        return Err(ModelError::Numerical(format!(
            "carlson_rd arguments out of domain: ({x}, {y}, {z})"
        )));
    }

    const C1: f64 = 3.0 / 14.0;
    const C2: f64 = 1.0 / 6.0;
    const C3: f64 = 9.0 / 22.0;
    const C4: f64 = 3.0 / 26.0;
    const C5: f64 = 0.25 * C3;
    const C6: f64 = 1.5 * C4;

    let (mut x, mut y, mut z) = (x, y, z);
    let mut sum = 0.0;
    let mut fac = 1.0;
    loop {
        let (sx, sy, sz) = (x.sqrt(), y.sqrt(), z.sqrt());
        let lambda = sx * (sy + sz) + sy * sz;
        sum += fac / (sz * (z + lambda));
        fac *= 0.25;
        x = 0.25 * (x + lambda);
        y = 0.25 * (y + lambda);
        z = 0.25 * (z + lambda);
        let ave = 0.2 * (x + y + 3.0 * z);
        let dx = (ave - x) / ave;
        let dy = (ave - y) / ave;
        let dz = (ave - z) / ave;
        if dx.abs().max(dy.abs()).max(dz.abs()) < RD_ERRTOL {
            let ea = dx * dy;
            let eb = dz * dz;
            let ec = ea - eb;
            let ed = ea - 6.0 * eb;
            let ee = ed + ec + ec;
            let series = 1.0
                + ed * (-C1 + C5 * ed - C6 * dz * ee)
                + dz * (C2 * ee + dz * (-C3 * ec + dz * C4 * ea));
            return Ok(3.0 * sum + fac * series / (ave * ave.sqrt()));
        }
    }
}
