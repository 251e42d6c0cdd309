//! Symplectic structure of linear maps and a drift-kick-drift stepper.
//!
//! A 6×6 linear map M on (x, x', y, y', z, z') is symplectic when
//! M·J·Mᵀ = J for the block-diagonal form J = diag(j, j, j), j = [[0, 1], [−1, 0]].
//! Non-accelerating magnetic elements satisfy this; RF gaps do not, since
//! the conjugate momenta shrink by βᵢγᵢ/β_fγ_f.

use crate::phase::{PhaseMatrix, PhaseVector};

/// Nonlinear transverse/longitudinal force evaluated at a phase point.
pub trait KickField {
    /// Momentum change per unit length (Δx', Δy', Δz') at `v`.
    fn kick(&self, v: &PhaseVector) -> [f64; 3];
}

/// The 7×7 homogeneous extension of J (row/column 6 zero).
pub fn symplectic_form() -> PhaseMatrix {
    let mut j = PhaseMatrix::zero();
    for plane in 0..3 {
        j.set(2 * plane, 2 * plane + 1, 1.0);
        j.set(2 * plane + 1, 2 * plane, -1.0);
    }
    j
}

/// Largest entry of |M·J·Mᵀ − J| over the 6×6 dynamical block.
pub fn symplectic_defect(m: &PhaseMatrix) -> f64 {
    let j = symplectic_form();
    let mut linear = *m;
    for k in 0..6 {
        linear.set(k, 6, 0.0);
        linear.set(6, k, 0.0);
    }
    linear.times(&j).times(&linear.transpose()).max_abs_diff(&j)
}

pub fn is_symplectic(m: &PhaseMatrix, tol: f64) -> bool {
    symplectic_defect(m) <= tol
}

/// One second-order leapfrog step: half drift, thin kick of strength
/// `length`, half drift.
pub fn drift_kick_drift<K: KickField>(
    v: &PhaseVector,
    half_drift: &PhaseMatrix,
    field: &K,
    length: f64,
) -> PhaseVector {
    let mut mid = half_drift.apply(v);
    let [dxp, dyp, dzp] = field.kick(&mid);
    let c = mid.coords();
    mid = PhaseVector::new(
        c[0],
        c[1] + length * dxp,
        c[2],
        c[3] + length * dyp,
        c[4],
        c[5] + length * dzp,
    );
    half_drift.apply(&mid)
}
