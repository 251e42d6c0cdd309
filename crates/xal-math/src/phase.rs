// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Phase Space Algebra
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Homogeneous phase-space vectors and 7×7 affine transfer matrices.
//!
//! Coordinates are ordered (x, x', y, y', z, z', 1). The trailing
//! homogeneous coordinate lets a single matrix carry both the linear map
//! (rows/columns 0–5) and a translation (column 6, rows 0–5).

use std::ops::{Add, Index, Mul, Sub};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use xal_types::constants::SINGULAR_TOLERANCE;
use xal_types::error::{ModelError, ModelResult};

use crate::linalg::LuFactors;

/// Dimension of the homogeneous phase space.
pub const DIM: usize = 7;

/// Named phase-space coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseIndex {
    X = 0,
    Xp = 1,
    Y = 2,
    Yp = 3,
    Z = 4,
    Zp = 5,
    Hom = 6,
}

impl PhaseIndex {
    /// The six dynamical coordinates, excluding the homogeneous one.
    pub const DYNAMIC: [PhaseIndex; 6] = [
        PhaseIndex::X,
        PhaseIndex::Xp,
        PhaseIndex::Y,
        PhaseIndex::Yp,
        PhaseIndex::Z,
        PhaseIndex::Zp,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Point in homogeneous phase space. The homogeneous coordinate is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseVector {
    coords: [f64; 6],
}

impl PhaseVector {
    pub fn new(x: f64, xp: f64, y: f64, yp: f64, z: f64, zp: f64) -> Self {
        Self {
            coords: [x, xp, y, yp, z, zp],
        }
    }

    /// The origin (0, 0, 0, 0, 0, 0, 1).
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_coords(coords: [f64; 6]) -> Self {
        Self { coords }
    }

    pub fn coords(&self) -> [f64; 6] {
        self.coords
    }

    /// Full homogeneous representation, last entry 1.
    pub fn to_homogeneous(&self) -> [f64; DIM] {
        let mut out = [1.0; DIM];
        out[..6].copy_from_slice(&self.coords);
        out
    }

    pub fn get(&self, index: PhaseIndex) -> f64 {
        match index {
            PhaseIndex::Hom => 1.0,
            other => self.coords[other.index()],
        }
    }

    /// Set a dynamical coordinate. The homogeneous coordinate is fixed.
    pub fn set(&mut self, index: PhaseIndex, value: f64) {
        debug_assert!(index != PhaseIndex::Hom, "homogeneous coordinate is fixed");
        if index != PhaseIndex::Hom {
            self.coords[index.index()] = value;
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        let mut out = *self;
        out.coords.iter_mut().for_each(|c| *c *= factor);
        out
    }

    /// Euclidean norm of the six dynamical coordinates.
    pub fn norm(&self) -> f64 {
        self.coords.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    pub fn approx_eq(&self, other: &PhaseVector, tol: f64) -> bool {
        self.coords
            .iter()
            .zip(other.coords.iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl Add for PhaseVector {
    type Output = PhaseVector;
    fn add(self, rhs: PhaseVector) -> PhaseVector {
        let mut out = self;
        for (a, b) in out.coords.iter_mut().zip(rhs.coords) {
            *a += b;
        }
        out
    }
}

impl Sub for PhaseVector {
    type Output = PhaseVector;
    fn sub(self, rhs: PhaseVector) -> PhaseVector {
        let mut out = self;
        for (a, b) in out.coords.iter_mut().zip(rhs.coords) {
            *a -= b;
        }
        out
    }
}

impl Index<PhaseIndex> for PhaseVector {
    type Output = f64;
    fn index(&self, index: PhaseIndex) -> &f64 {
        const ONE: f64 = 1.0;
        match index {
            PhaseIndex::Hom => &ONE,
            other => &self.coords[other.index()],
        }
    }
}

/// 7×7 homogeneous phase matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseMatrix {
    data: [[f64; DIM]; DIM],
}

impl Default for PhaseMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl PhaseMatrix {
    pub fn zero() -> Self {
        Self {
            data: [[0.0; DIM]; DIM],
        }
    }

    pub fn identity() -> Self {
        let mut data = [[0.0; DIM]; DIM];
        for (i, row) in data.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { data }
    }

    pub fn from_array(data: [[f64; DIM]; DIM]) -> Self {
        Self { data }
    }

    /// Affine map from a 6×6 linear block (homogeneous row/column set to identity).
    pub fn from_linear(block: [[f64; 6]; 6]) -> Self {
        let mut out = Self::identity();
        for (i, row) in block.iter().enumerate() {
            out.data[i][..6].copy_from_slice(row);
        }
        out
    }

    /// Pure translation by the dynamical coordinates of `offset`.
    pub fn translation(offset: &PhaseVector) -> Self {
        let mut out = Self::identity();
        for (i, c) in offset.coords().iter().enumerate() {
            out.data[i][6] = *c;
        }
        out
    }

    /// Block-diagonal map built from the x, y and z 2×2 blocks.
    pub fn with_blocks(x: [[f64; 2]; 2], y: [[f64; 2]; 2], z: [[f64; 2]; 2]) -> Self {
        let mut out = Self::identity();
        out.set_block(0, x);
        out.set_block(2, y);
        out.set_block(4, z);
        out
    }

    pub fn as_array(&self) -> &[[f64; DIM]; DIM] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row][col] = value;
    }

    pub fn elem(&self, row: PhaseIndex, col: PhaseIndex) -> f64 {
        self.data[row.index()][col.index()]
    }

    pub fn set_elem(&mut self, row: PhaseIndex, col: PhaseIndex, value: f64) {
        self.data[row.index()][col.index()] = value;
    }

    /// Overwrite the diagonal 2×2 block whose upper-left corner is (`start`, `start`).
    pub fn set_block(&mut self, start: usize, block: [[f64; 2]; 2]) {
        for (i, row) in block.iter().enumerate() {
            self.data[start + i][start..start + 2].copy_from_slice(row);
        }
    }

    pub fn block(&self, start: usize) -> [[f64; 2]; 2] {
        [
            [self.data[start][start], self.data[start][start + 1]],
            [self.data[start + 1][start], self.data[start + 1][start + 1]],
        ]
    }

    /// Matrix product `self · rhs`: apply `rhs` first, then `self`.
    pub fn times(&self, rhs: &PhaseMatrix) -> PhaseMatrix {
        let mut out = [[0.0; DIM]; DIM];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..DIM).map(|k| self.data[i][k] * rhs.data[k][j]).sum();
            }
        }
        PhaseMatrix { data: out }
    }

    pub fn plus(&self, rhs: &PhaseMatrix) -> PhaseMatrix {
        let mut out = *self;
        for (row, rrow) in out.data.iter_mut().zip(rhs.data.iter()) {
            for (a, b) in row.iter_mut().zip(rrow) {
                *a += b;
            }
        }
        out
    }

    pub fn minus(&self, rhs: &PhaseMatrix) -> PhaseMatrix {
        self.plus(&rhs.scale(-1.0))
    }

    pub fn scale(&self, factor: f64) -> PhaseMatrix {
        let mut out = *self;
        out.data
            .iter_mut()
            .flat_map(|row| row.iter_mut())
            .for_each(|a| *a *= factor);
        out
    }

    pub fn transpose(&self) -> PhaseMatrix {
        let mut out = [[0.0; DIM]; DIM];
        for (i, row) in self.data.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                out[j][i] = *v;
            }
        }
        PhaseMatrix { data: out }
    }

    /// Congruence `self · sigma · selfᵀ`.
    pub fn conjugate(&self, sigma: &PhaseMatrix) -> PhaseMatrix {
        self.times(sigma).times(&self.transpose())
    }

    /// Apply the affine map to a phase vector. Row 6 is not consulted, so the
    /// result keeps its homogeneous coordinate at 1.
    pub fn apply(&self, v: &PhaseVector) -> PhaseVector {
        let h = v.to_homogeneous();
        let mut out = [0.0; 6];
        for (i, c) in out.iter_mut().enumerate() {
            *c = self.data[i].iter().zip(h.iter()).map(|(a, b)| a * b).sum();
        }
        PhaseVector::from_coords(out)
    }

    pub fn determinant(&self) -> f64 {
        match LuFactors::factor(&self.data) {
            Some(lu) => lu.determinant(),
            None => 0.0,
        }
    }

    /// Inverse with the default singularity tolerance.
    pub fn inverse(&self) -> ModelResult<PhaseMatrix> {
        self.inverse_with_tolerance(SINGULAR_TOLERANCE)
    }

    /// Inverse by LU solve. Fails when |det| < `tolerance`.
    pub fn inverse_with_tolerance(&self, tolerance: f64) -> ModelResult<PhaseMatrix> {
        let lu = LuFactors::factor(&self.data).ok_or(ModelError::SingularMatrix {
            det: 0.0,
            tolerance,
        })?;
        let det = lu.determinant();
        if !(det.abs() >= tolerance) {
            return Err(ModelError::SingularMatrix { det, tolerance });
        }
        let mut out = [[0.0; DIM]; DIM];
        for col in 0..DIM {
            let mut e = [0.0; DIM];
            e[col] = 1.0;
            let x = lu.solve(&e);
            for (row, v) in x.iter().enumerate() {
                out[row][col] = *v;
            }
        }
        Ok(PhaseMatrix { data: out })
    }

    /// Whether row 6 is (0, …, 0, 1) within `tol`.
    pub fn is_affine(&self, tol: f64) -> bool {
        self.data[6]
            .iter()
            .enumerate()
            .all(|(j, v)| (v - if j == 6 { 1.0 } else { 0.0 }).abs() <= tol)
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        (0..DIM).all(|i| (0..i).all(|j| (self.data[i][j] - self.data[j][i]).abs() <= tol))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().flatten().all(|v| v.is_finite())
    }

    pub fn norm_frobenius(&self) -> f64 {
        self.data.iter().flatten().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn max_abs_diff(&self, other: &PhaseMatrix) -> f64 {
        self.data
            .iter()
            .flatten()
            .zip(other.data.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    pub fn approx_eq(&self, other: &PhaseMatrix, tol: f64) -> bool {
        self.max_abs_diff(other) <= tol
    }

    pub fn to_array2(&self) -> Array2<f64> {
        Array2::from_shape_fn((DIM, DIM), |(i, j)| self.data[i][j])
    }
}

impl Mul for PhaseMatrix {
    type Output = PhaseMatrix;
    fn mul(self, rhs: PhaseMatrix) -> PhaseMatrix {
        self.times(&rhs)
    }
}

impl Mul<PhaseVector> for PhaseMatrix {
    type Output = PhaseVector;
    fn mul(self, rhs: PhaseVector) -> PhaseVector {
        self.apply(&rhs)
    }
}

impl Index<(usize, usize)> for PhaseMatrix {
    type Output = f64;
    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[row][col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> PhaseMatrix {
        let mut m = PhaseMatrix::with_blocks(
            [[0.9, 0.3], [-0.2, 1.04]],
            [[1.1, 0.05], [0.4, 0.927]],
            [[1.0, 0.2], [0.0, 1.0]],
        );
        m.set(0, 6, 1e-3);
        m.set(3, 6, -2e-4);
        m
    }

    #[test]
    fn test_identity_leaves_vector_unchanged() {
        let v = PhaseVector::new(1e-3, -2e-4, 3e-3, 0.0, 5e-3, 1e-5);
        let out = PhaseMatrix::identity().apply(&v);
        assert!(out.approx_eq(&v, 0.0));
        assert_eq!(out.get(PhaseIndex::Hom), 1.0);
    }

    #[test]
    fn test_translation_moves_vector() {
        let offset = PhaseVector::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let out = PhaseMatrix::translation(&offset).apply(&PhaseVector::zero());
        assert!(out.approx_eq(&offset, 1e-15));
    }

    #[test]
    fn test_inverse_times_self_is_identity() {
        let m = sample_map();
        let inv = m.inverse().unwrap();
        let prod = m.times(&inv);
        assert!(
            prod.approx_eq(&PhaseMatrix::identity(), 1e-12),
            "max diff {}",
            prod.max_abs_diff(&PhaseMatrix::identity())
        );
        assert!(inv.is_affine(1e-14));
    }

    #[test]
    fn test_singular_matrix_detected() {
        let mut m = PhaseMatrix::identity();
        for j in 0..DIM {
            m.set(1, j, m.get(0, j));
        }
        match m.inverse() {
            Err(ModelError::SingularMatrix { det, tolerance }) => {
                assert!(det.abs() < tolerance, "det {det}");
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_nearly_singular_respects_tolerance() {
        let mut m = PhaseMatrix::identity();
        m.set(2, 2, 1e-9);
        assert!(m.inverse_with_tolerance(1e-6).is_err());
        assert!(m.inverse_with_tolerance(1e-12).is_ok());
    }

    #[test]
    fn test_determinant_of_blocks() {
        let m = sample_map();
        let expected = (0.9 * 1.04 + 0.3 * 0.2) * (1.1 * 0.927 - 0.05 * 0.4) * 1.0;
        assert!((m.determinant() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_conjugate_preserves_symmetry() {
        let mut sigma = PhaseMatrix::zero();
        for i in 0..6 {
            sigma.set(i, i, 1e-6 * (i as f64 + 1.0));
        }
        sigma.set(0, 1, 3e-7);
        sigma.set(1, 0, 3e-7);
        sigma.set(6, 6, 1.0);
        let out = sample_map().conjugate(&sigma);
        assert!(out.is_symmetric(1e-18));
    }

    #[test]
    fn test_index_by_phase_index() {
        let v = PhaseVector::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(v[PhaseIndex::Hom], 1.0);
        assert_eq!(v[PhaseIndex::X], 1.0);
    }
}
