// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Covariance
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Second-moment beam description and Twiss parameters.
//!
//! The covariance matrix is the homogeneous 7×7 moment ⟨z·zᵀ⟩. Its last
//! column holds the centroid, so the central moments are
//! σᵢⱼ − μᵢμⱼ. Under a linear map M it transforms as M·Σ·Mᵀ.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::linalg::symmetric_eigen;
use crate::phase::{PhaseIndex, PhaseMatrix, PhaseVector, DIM};

/// Courant-Snyder parameters of one phase plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twiss {
    pub alpha: f64,
    /// Envelope function (m).
    pub beta: f64,
    /// Rms geometric emittance (m·rad).
    pub emittance: f64,
}

impl Twiss {
    pub fn new(alpha: f64, beta: f64, emittance: f64) -> Self {
        Self {
            alpha,
            beta,
            emittance,
        }
    }

    /// γ = (1 + α²)/β.
    pub fn gamma(&self) -> f64 {
        (1.0 + self.alpha * self.alpha) / self.beta
    }

    /// Rms beam size √(βε).
    pub fn envelope_radius(&self) -> f64 {
        (self.beta * self.emittance).sqrt()
    }

    /// Central second moments [[⟨x²⟩, ⟨xx'⟩], [⟨xx'⟩, ⟨x'²⟩]].
    pub fn moments(&self) -> [[f64; 2]; 2] {
        let e = self.emittance;
        [
            [self.beta * e, -self.alpha * e],
            [-self.alpha * e, self.gamma() * e],
        ]
    }

    /// Twiss parameters of a 2×2 central moment block. A degenerate block
    /// (zero emittance) yields all-zero parameters.
    pub fn from_moments(block: [[f64; 2]; 2]) -> Self {
        let det = block[0][0] * block[1][1] - block[0][1] * block[1][0];
        if !(det > 0.0) {
            return Self::default();
        }
        let emittance = det.sqrt();
        Self {
            alpha: -block[0][1] / emittance,
            beta: block[0][0] / emittance,
            emittance,
        }
    }

    /// Convert a normalized emittance to geometric by dividing by βγ.
    pub fn denormalized(&self, beta_gamma: f64) -> Self {
        Self {
            emittance: self.emittance / beta_gamma,
            ..*self
        }
    }
}

/// Homogeneous 7×7 second-moment matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    matrix: PhaseMatrix,
}

impl Default for CovarianceMatrix {
    fn default() -> Self {
        let mut matrix = PhaseMatrix::zero();
        matrix.set(6, 6, 1.0);
        Self { matrix }
    }
}

impl CovarianceMatrix {
    pub fn from_matrix(matrix: PhaseMatrix) -> Self {
        Self { matrix }
    }

    /// Centered, uncoupled beam described by three Twiss triples.
    pub fn from_twiss(twiss: &[Twiss; 3]) -> Self {
        Self::from_twiss_with_mean(twiss, &PhaseVector::zero())
    }

    pub fn from_twiss_with_mean(twiss: &[Twiss; 3], mean: &PhaseVector) -> Self {
        let mut matrix = PhaseMatrix::zero();
        for (plane, tw) in twiss.iter().enumerate() {
            matrix.set_block(2 * plane, tw.moments());
        }
        let mu = mean.to_homogeneous();
        for i in 0..DIM {
            for j in 0..DIM {
                let central = if i < 6 && j < 6 { matrix.get(i, j) } else { 0.0 };
                matrix.set(i, j, central + mu[i] * mu[j]);
            }
        }
        Self { matrix }
    }

    pub fn matrix(&self) -> &PhaseMatrix {
        &self.matrix
    }

    /// Beam centroid, read from the homogeneous column.
    pub fn mean(&self) -> PhaseVector {
        let mut coords = [0.0; 6];
        for (i, c) in coords.iter_mut().enumerate() {
            *c = self.matrix.get(i, 6);
        }
        PhaseVector::from_coords(coords)
    }

    /// Central moment ⟨(zᵢ − μᵢ)(zⱼ − μⱼ)⟩.
    pub fn central(&self, i: PhaseIndex, j: PhaseIndex) -> f64 {
        let mean = self.mean();
        self.matrix.elem(i, j) - mean.get(i) * mean.get(j)
    }

    pub fn central_cov_xx(&self) -> f64 {
        self.central(PhaseIndex::X, PhaseIndex::X)
    }

    pub fn central_cov_yy(&self) -> f64 {
        self.central(PhaseIndex::Y, PhaseIndex::Y)
    }

    pub fn central_cov_zz(&self) -> f64 {
        self.central(PhaseIndex::Z, PhaseIndex::Z)
    }

    /// Central 3×3 spatial block over (x, y, z).
    pub fn spatial_central(&self) -> [[f64; 3]; 3] {
        let axes = [PhaseIndex::X, PhaseIndex::Y, PhaseIndex::Z];
        let mut out = [[0.0; 3]; 3];
        for (i, a) in axes.iter().enumerate() {
            for (j, b) in axes.iter().enumerate() {
                out[i][j] = self.central(*a, *b);
            }
        }
        out
    }

    /// Central 6×6 moment matrix as an ndarray.
    pub fn central_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((6, 6), |(i, j)| {
            self.central(PhaseIndex::DYNAMIC[i], PhaseIndex::DYNAMIC[j])
        })
    }

    /// Twiss parameters of the x, y and z planes from the central blocks.
    pub fn twiss(&self) -> [Twiss; 3] {
        let mut out = [Twiss::default(); 3];
        for (plane, tw) in out.iter_mut().enumerate() {
            let a = PhaseIndex::DYNAMIC[2 * plane];
            let b = PhaseIndex::DYNAMIC[2 * plane + 1];
            *tw = Twiss::from_moments([
                [self.central(a, a), self.central(a, b)],
                [self.central(b, a), self.central(b, b)],
            ]);
        }
        out
    }

    pub fn rms_emittances(&self) -> [f64; 3] {
        self.twiss().map(|t| t.emittance)
    }

    /// Rms sizes (σx, σy, σz).
    pub fn rms_sizes(&self) -> [f64; 3] {
        [
            self.central_cov_xx().max(0.0).sqrt(),
            self.central_cov_yy().max(0.0).sqrt(),
            self.central_cov_zz().max(0.0).sqrt(),
        ]
    }

    /// Σ' = M·Σ·Mᵀ.
    pub fn propagate(&self, map: &PhaseMatrix) -> CovarianceMatrix {
        Self {
            matrix: map.conjugate(&self.matrix),
        }
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        self.matrix.is_symmetric(tol)
    }

    /// Smallest eigenvalue of the central 6×6 block is ≥ −`tol`.
    pub fn is_positive_semidefinite(&self, tol: f64) -> bool {
        let (eigenvalues, _) = symmetric_eigen(&self.central_array());
        eigenvalues.iter().all(|v| *v >= -tol)
    }
}
