// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Ensemble
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Macro-particle ensembles: sampling, moments and data-parallel maps.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use xal_math::covariance::{CovarianceMatrix, Twiss};
use xal_math::phase::{PhaseMatrix, PhaseVector, DIM};
use xal_math::symplectic::{drift_kick_drift, KickField};

use crate::probe::MacroParticle;

/// Sample `count` particles from an uncorrelated Gaussian matched to
/// `twiss` in each plane. The same seed always yields the same ensemble.
pub fn gaussian_ensemble(twiss: &[Twiss; 3], count: usize, seed: u64) -> Vec<MacroParticle> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut coords = [0.0; 6];
            for (plane, tw) in twiss.iter().enumerate() {
                let u1: f64 = rng.sample(StandardNormal);
                let u2: f64 = rng.sample(StandardNormal);
                if tw.beta > 0.0 && tw.emittance > 0.0 {
                    let size = (tw.beta * tw.emittance).sqrt();
                    let slope = (tw.emittance / tw.beta).sqrt();
                    coords[2 * plane] = size * u1;
                    coords[2 * plane + 1] = slope * (-tw.alpha * u1 + u2);
                }
            }
            MacroParticle::new(PhaseVector::from_coords(coords))
        })
        .collect()
}

/// Charge and mass multiples shared by a group of macro-particles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberClass {
    pub charge: f64,
    pub mass: f64,
}

impl MemberClass {
    pub fn of(particle: &MacroParticle) -> Self {
        Self {
            charge: particle.charge,
            mass: particle.mass,
        }
    }

    pub fn contains(&self, particle: &MacroParticle) -> bool {
        particle.charge == self.charge && particle.mass == self.mass
    }
}

/// Distinct member classes in first-seen order.
pub fn member_classes(particles: &[MacroParticle]) -> Vec<MemberClass> {
    let mut classes: Vec<MemberClass> = Vec::new();
    for p in particles {
        if !classes.iter().any(|c| c.contains(p)) {
            classes.push(MemberClass::of(p));
        }
    }
    classes
}

fn total_charge(particles: &[MacroParticle]) -> f64 {
    particles.iter().map(|p| p.charge.abs()).sum()
}

/// Charge-weighted mean position.
pub fn centroid(particles: &[MacroParticle]) -> PhaseVector {
    let total = total_charge(particles);
    if !(total > 0.0) {
        return PhaseVector::zero();
    }
    let mut sum = [0.0; 6];
    for p in particles {
        let w = p.charge.abs();
        for (s, c) in sum.iter_mut().zip(p.coords.coords()) {
            *s += w * c;
        }
    }
    PhaseVector::from_coords(sum.map(|s| s / total))
}

/// Charge-weighted homogeneous second moments ⟨z·zᵀ⟩ of the ensemble.
pub fn covariance(particles: &[MacroParticle]) -> CovarianceMatrix {
    let total = total_charge(particles);
    if !(total > 0.0) {
        return CovarianceMatrix::default();
    }
    let mut acc = [[0.0; DIM]; DIM];
    for p in particles {
        let w = p.charge.abs();
        let z = p.coords.to_homogeneous();
        for i in 0..DIM {
            for j in 0..DIM {
                acc[i][j] += w * z[i] * z[j];
            }
        }
    }
    for row in acc.iter_mut() {
        for v in row.iter_mut() {
            *v /= total;
        }
    }
    CovarianceMatrix::from_matrix(PhaseMatrix::from_array(acc))
}

pub fn apply_map(particles: &mut [MacroParticle], map: &PhaseMatrix) {
    particles
        .par_iter_mut()
        .for_each(|p| p.coords = map.apply(&p.coords));
}

/// Apply `map` to the members of `class` only.
pub fn apply_class_map(particles: &mut [MacroParticle], class: MemberClass, map: &PhaseMatrix) {
    particles
        .par_iter_mut()
        .filter(|p| class.contains(p))
        .for_each(|p| p.coords = map.apply(&p.coords));
}

/// Leapfrog the members of `class` through a nonlinear field.
pub fn apply_kick<K: KickField + Sync>(
    particles: &mut [MacroParticle],
    class: MemberClass,
    half_drift: &PhaseMatrix,
    field: &K,
    length: f64,
) {
    particles
        .par_iter_mut()
        .filter(|p| class.contains(p))
        .for_each(|p| p.coords = drift_kick_drift(&p.coords, half_drift, field, length));
}
