// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Elements
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Beamline elements and their linear transfer maps.
//!
//! Maps are pure functions of the probe's current energy and the
//! sub-length being traversed. Thick maps compose exactly:
//! M(a)·M(b) = M(a + b) at fixed energy.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use xal_math::phase::{PhaseMatrix, PhaseVector};
use xal_math::symplectic::KickField;
use xal_types::constants::LIGHT_SPEED;
use xal_types::error::{ModelError, ModelResult};

use crate::probe::Probe;
use crate::rf_gap::RfGap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Drift,
    Quadrupole,
    SectorDipole,
    Octupole,
    RfGap,
    Marker,
}

impl ElementType {
    pub const COUNT: usize = 6;

    pub const ALL: [ElementType; ElementType::COUNT] = [
        ElementType::Drift,
        ElementType::Quadrupole,
        ElementType::SectorDipole,
        ElementType::Octupole,
        ElementType::RfGap,
        ElementType::Marker,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Drift => "Drift",
            ElementType::Quadrupole => "Quadrupole",
            ElementType::SectorDipole => "SectorDipole",
            ElementType::Octupole => "Octupole",
            ElementType::RfGap => "RfGap",
            ElementType::Marker => "Marker",
        }
    }
}

/// Translational misalignment of the element frame (m).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Alignment {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Alignment {
    pub fn new(dx: f64, dy: f64, dz: f64) -> Self {
        Self { dx, dy, dz }
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0 && self.dz == 0.0
    }

    pub fn offset(&self) -> PhaseVector {
        PhaseVector::new(self.dx, 0.0, self.dy, 0.0, self.dz, 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Drift,
    /// Field gradient (T/m). Positive focuses positive charges in x.
    Quadrupole { gradient: f64 },
    /// Total bend angle (rad) over the element's path length.
    SectorDipole { bend_angle: f64 },
    /// Octupole coefficient B''' (T/m³).
    Octupole { strength: f64 },
    RfGap(RfGap),
    Marker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    id: String,
    kind: ElementKind,
    length: f64,
    alignment: Alignment,
}

impl Element {
    fn with_kind(id: &str, kind: ElementKind, length: f64) -> Self {
        Self {
            id: id.to_string(),
            kind,
            length,
            alignment: Alignment::default(),
        }
    }

    pub fn drift(id: &str, length: f64) -> Self {
        Self::with_kind(id, ElementKind::Drift, length)
    }

    pub fn quadrupole(id: &str, length: f64, gradient: f64) -> Self {
        Self::with_kind(id, ElementKind::Quadrupole { gradient }, length)
    }

    pub fn sector_dipole(id: &str, length: f64, bend_angle: f64) -> Self {
        Self::with_kind(id, ElementKind::SectorDipole { bend_angle }, length)
    }

    pub fn octupole(id: &str, length: f64, strength: f64) -> Self {
        Self::with_kind(id, ElementKind::Octupole { strength }, length)
    }

    pub fn rf_gap(id: &str, gap: RfGap) -> Self {
        Self::with_kind(id, ElementKind::RfGap(gap), 0.0)
    }

    pub fn marker(id: &str) -> Self {
        Self::with_kind(id, ElementKind::Marker, 0.0)
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn element_type(&self) -> ElementType {
        match self.kind {
            ElementKind::Drift => ElementType::Drift,
            ElementKind::Quadrupole { .. } => ElementType::Quadrupole,
            ElementKind::SectorDipole { .. } => ElementType::SectorDipole,
            ElementKind::Octupole { .. } => ElementType::Octupole,
            ElementKind::RfGap(_) => ElementType::RfGap,
            ElementKind::Marker => ElementType::Marker,
        }
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn is_thick(&self) -> bool {
        !matches!(self.kind, ElementKind::RfGap(_) | ElementKind::Marker) && self.length > 0.0
    }

    pub fn rf_gap_params(&self) -> Option<&RfGap> {
        match &self.kind {
            ElementKind::RfGap(gap) => Some(gap),
            _ => None,
        }
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.id.trim().is_empty() {
            return Err(ModelError::Config("element id is empty".to_string()));
        }
        if !(self.length.is_finite() && self.length >= 0.0) {
            return Err(ModelError::Config(format!(
                "element '{}' length must be finite and >= 0, got {}",
                self.id, self.length
            )));
        }
        if let ElementKind::RfGap(gap) = &self.kind {
            if !(gap.frequency.is_finite() && gap.frequency > 0.0) {
                return Err(ModelError::Config(format!(
                    "gap '{}' frequency must be finite and > 0, got {}",
                    self.id, gap.frequency
                )));
            }
        }
        Ok(())
    }

    /// Linear transfer map over `length` at the probe's current energy.
    ///
    /// RF gaps are evaluated at their design phase; phase continuity between
    /// gaps is resolved by the tracker.
    pub fn transfer_map(&self, probe: &Probe, length: f64) -> ModelResult<PhaseMatrix> {
        let gamma = probe.gamma();
        let map = match &self.kind {
            ElementKind::Drift | ElementKind::Octupole { .. } => drift_map(length, gamma),
            ElementKind::Quadrupole { gradient } => {
                let k = quad_strength(probe, *gradient)?;
                quadrupole_map(length, k, gamma)
            }
            ElementKind::SectorDipole { bend_angle } => {
                if self.length > 0.0 && *bend_angle != 0.0 {
                    sector_dipole_map(length, bend_angle / self.length, gamma)
                } else {
                    drift_map(length, gamma)
                }
            }
            ElementKind::RfGap(gap) => gap.compute(probe, gap.phase)?.map,
            ElementKind::Marker => PhaseMatrix::identity(),
        };
        Ok(self.misaligned(map))
    }

    /// Conjugate `map` into the lab frame: T(d)·M·T(−d).
    pub fn misaligned(&self, map: PhaseMatrix) -> PhaseMatrix {
        if self.alignment.is_zero() {
            return map;
        }
        let offset = self.alignment.offset();
        PhaseMatrix::translation(&offset)
            .times(&map)
            .times(&PhaseMatrix::translation(&offset.scale(-1.0)))
    }

    pub fn energy_gain(&self, probe: &Probe, _length: f64) -> ModelResult<f64> {
        match &self.kind {
            ElementKind::RfGap(gap) => Ok(gap.compute(probe, gap.phase)?.energy_gain),
            _ => Ok(0.0),
        }
    }

    /// Time to traverse `length` (s).
    pub fn elapsed_time(&self, probe: &Probe, length: f64) -> ModelResult<f64> {
        match &self.kind {
            ElementKind::RfGap(gap) => Ok(gap.compute(probe, gap.phase)?.elapsed),
            ElementKind::Marker => Ok(0.0),
            _ => {
                let velocity = probe.velocity();
                if !(velocity > 0.0) {
                    return Err(ModelError::Numerical(format!(
                        "near-zero velocity in element '{}'",
                        self.id
                    )));
                }
                Ok(length / velocity)
            }
        }
    }

    /// Phase advance of the bunch frequency over `length` (rad).
    pub fn longitudinal_phase_advance(&self, probe: &Probe, length: f64) -> ModelResult<f64> {
        Ok(2.0 * PI * probe.bunch_frequency() * self.elapsed_time(probe, length)?)
    }
}

/// Focusing strength k = q·c·G/(βγ·Er) (1/m²).
pub fn quad_strength(probe: &Probe, gradient: f64) -> ModelResult<f64> {
    let bg = probe.beta_gamma();
    if !(bg > 0.0) {
        return Err(ModelError::Numerical(
            "quadrupole strength undefined for a probe at rest".to_string(),
        ));
    }
    let species = probe.species();
    Ok(species.charge * LIGHT_SPEED * gradient / (bg * species.rest_energy))
}

pub fn drift_map(length: f64, gamma: f64) -> PhaseMatrix {
    PhaseMatrix::with_blocks(
        [[1.0, length], [0.0, 1.0]],
        [[1.0, length], [0.0, 1.0]],
        [[1.0, length / (gamma * gamma)], [0.0, 1.0]],
    )
}

fn focusing_block(k: f64, length: f64) -> [[f64; 2]; 2] {
    if k > 0.0 {
        let root = k.sqrt();
        let (s, c) = (root * length).sin_cos();
        [[c, s / root], [-root * s, c]]
    } else if k < 0.0 {
        let root = (-k).sqrt();
        let phi = root * length;
        let (s, c) = (phi.sinh(), phi.cosh());
        [[c, s / root], [root * s, c]]
    } else {
        [[1.0, length], [0.0, 1.0]]
    }
}

pub fn quadrupole_map(length: f64, k: f64, gamma: f64) -> PhaseMatrix {
    PhaseMatrix::with_blocks(
        focusing_block(k, length),
        focusing_block(-k, length),
        [[1.0, length / (gamma * gamma)], [0.0, 1.0]],
    )
}

/// Sector bend of curvature `h` over path length `length`.
pub fn sector_dipole_map(length: f64, h: f64, gamma: f64) -> PhaseMatrix {
    let (s, c) = (h * length).sin_cos();
    let mut m = PhaseMatrix::with_blocks(
        [[c, s / h], [-h * s, c]],
        [[1.0, length], [0.0, 1.0]],
        [[1.0, length / (gamma * gamma) - (length - s / h)], [0.0, 1.0]],
    );
    m.set(0, 5, (1.0 - c) / h);
    m.set(1, 5, s);
    m.set(4, 0, -s);
    m.set(4, 1, -(1.0 - c) / h);
    m
}

/// Octupole field kick per unit length.
pub struct OctupoleKick {
    /// K3 = q·c·B'''/(βγ·Er) (1/m⁴).
    pub k3: f64,
}

impl KickField for OctupoleKick {
    fn kick(&self, v: &PhaseVector) -> [f64; 3] {
        let c = v.coords();
        let (x, y) = (c[0], c[2]);
        let a = self.k3 / 6.0;
        [
            -a * (x * x * x - 3.0 * x * y * y),
            a * (3.0 * x * x * y - y * y * y),
            0.0,
        ]
    }
}
