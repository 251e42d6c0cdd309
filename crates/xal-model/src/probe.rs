// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Probe
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Beam probes: species, kinematics and the dynamical state a tracker
//! advances through a lattice.
//!
//! A probe carries exactly one of four dynamical representations (single
//! particle, rms envelope, transfer map, macro-particle ensemble). Trackers
//! accept one representation each. Probes are only mutated by a tracker,
//! which commits a fully computed [`Advance`] per step.

use serde::{Deserialize, Serialize};
use xal_math::covariance::{CovarianceMatrix, Twiss};
use xal_math::phase::{PhaseMatrix, PhaseVector};
use xal_types::config::BeamSettings;
use xal_types::constants::{
    ELECTRON_REST_ENERGY, HMINUS_REST_ENERGY, LIGHT_SPEED, PERMITTIVITY, PROTON_REST_ENERGY,
};
use xal_types::error::{ModelError, ModelResult};

use crate::ensemble;
use crate::trajectory::{ProbeState, Trajectory};

/// Relativistic γ = W/Er + 1.
pub fn lorentz_gamma(kinetic_energy: f64, rest_energy: f64) -> f64 {
    kinetic_energy / rest_energy + 1.0
}

/// Relativistic β = √(1 − 1/γ²).
pub fn lorentz_beta(gamma: f64) -> f64 {
    (1.0 - 1.0 / (gamma * gamma)).max(0.0).sqrt()
}

/// Dynamical representation carried by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    Particle,
    Envelope,
    TransferMap,
    Ensemble,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 4] = [
        ProbeKind::Particle,
        ProbeKind::Envelope,
        ProbeKind::TransferMap,
        ProbeKind::Ensemble,
    ];

    /// Archive type string of the probe.
    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::Particle => "ParticleProbe",
            ProbeKind::Envelope => "EnvelopeProbe",
            ProbeKind::TransferMap => "TransferMapProbe",
            ProbeKind::Ensemble => "EnsembleProbe",
        }
    }

    /// Type string of the tracker that accepts this probe.
    pub fn tracker_type(self) -> &'static str {
        match self {
            ProbeKind::Particle => "ParticleTracker",
            ProbeKind::Envelope => "EnvelopeTracker",
            ProbeKind::TransferMap => "TransferMapTracker",
            ProbeKind::Ensemble => "EnsembleTracker",
        }
    }

    pub fn from_name(name: &str) -> ModelResult<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| ModelError::data_format("type", format!("unknown probe type '{name}'")))
    }

    /// Kinds whose state carries an accumulated linear map.
    pub fn has_transfer_map(self) -> bool {
        matches!(self, ProbeKind::Envelope | ProbeKind::TransferMap)
    }
}

/// Particle species: charge in units of e and rest energy in eV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub charge: f64,
    pub rest_energy: f64,
}

impl Species {
    pub fn new(charge: f64, rest_energy: f64) -> Self {
        Self {
            charge,
            rest_energy,
        }
    }

    pub fn proton() -> Self {
        Self::new(1.0, PROTON_REST_ENERGY)
    }

    pub fn hminus() -> Self {
        Self::new(-1.0, HMINUS_REST_ENERGY)
    }

    pub fn electron() -> Self {
        Self::new(-1.0, ELECTRON_REST_ENERGY)
    }
}

/// Kinetic energy (eV), path position (m) and elapsed time (s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    pub kinetic_energy: f64,
    pub position: f64,
    pub time: f64,
}

/// Phase and position of the last RF gap the probe crossed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapPhaseRecord {
    /// Unwrapped RF phase (rad).
    pub phase: f64,
    /// Probe position at the gap (m).
    pub position: f64,
}

/// One macro-particle of an ensemble. Charge and rest mass are multiples
/// of the probe species; every member moves at the probe's velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroParticle {
    pub charge: f64,
    pub mass: f64,
    pub coords: PhaseVector,
}

impl MacroParticle {
    pub fn new(coords: PhaseVector) -> Self {
        Self {
            charge: 1.0,
            mass: 1.0,
            coords,
        }
    }

    pub fn with_species_ratio(mut self, charge: f64, mass: f64) -> Self {
        self.charge = charge;
        self.mass = mass;
        self
    }
}

/// Envelope probe state: second moments, accumulated response and the
/// emittance-growth factors applied at the last gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeState {
    pub covariance: CovarianceMatrix,
    pub response: PhaseMatrix,
    /// (transverse, transverse, longitudinal) focusing scale factors.
    pub growth_factors: [f64; 3],
}

impl EnvelopeState {
    pub fn new(covariance: CovarianceMatrix) -> Self {
        Self {
            covariance,
            response: PhaseMatrix::identity(),
            growth_factors: [1.0; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dynamics {
    Particle(PhaseVector),
    Envelope(EnvelopeState),
    TransferMap(PhaseMatrix),
    Ensemble(Vec<MacroParticle>),
}

impl Dynamics {
    pub fn kind(&self) -> ProbeKind {
        match self {
            Dynamics::Particle(_) => ProbeKind::Particle,
            Dynamics::Envelope(_) => ProbeKind::Envelope,
            Dynamics::TransferMap(_) => ProbeKind::TransferMap,
            Dynamics::Ensemble(_) => ProbeKind::Ensemble,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Dynamics::Particle(v) => v.is_finite(),
            Dynamics::Envelope(env) => {
                env.covariance.matrix().is_finite() && env.response.is_finite()
            }
            Dynamics::TransferMap(m) => m.is_finite(),
            Dynamics::Ensemble(particles) => particles.iter().all(|p| p.coords.is_finite()),
        }
    }
}

/// Result of one tracker step, committed to the probe only when the whole
/// element has been computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub dynamics: Dynamics,
    pub energy_gain: f64,
    pub length: f64,
    pub elapsed: f64,
    pub gap_record: Option<GapPhaseRecord>,
}

#[derive(Debug, Clone, PartialEq)]
struct InitialConditions {
    species: Species,
    kinematics: Kinematics,
    dynamics: Dynamics,
    beam_current: f64,
    bunch_frequency: f64,
    last_gap: Option<GapPhaseRecord>,
}

#[derive(Debug, Clone)]
pub struct Probe {
    species: Species,
    kinematics: Kinematics,
    dynamics: Dynamics,
    beam_current: f64,
    bunch_frequency: f64,
    last_gap: Option<GapPhaseRecord>,
    initial: InitialConditions,
    trajectory: Trajectory,
}

const DEFAULT_BUNCH_FREQUENCY: f64 = 4.025e8;

impl Probe {
    pub fn new(species: Species, kinetic_energy: f64, dynamics: Dynamics) -> Self {
        let kinematics = Kinematics {
            kinetic_energy,
            ..Kinematics::default()
        };
        let initial = InitialConditions {
            species,
            kinematics,
            dynamics: dynamics.clone(),
            beam_current: 0.0,
            bunch_frequency: DEFAULT_BUNCH_FREQUENCY,
            last_gap: None,
        };
        Self {
            species,
            kinematics,
            dynamics,
            beam_current: 0.0,
            bunch_frequency: DEFAULT_BUNCH_FREQUENCY,
            last_gap: None,
            initial,
            trajectory: Trajectory::new(),
        }
    }

    pub fn particle(species: Species, kinetic_energy: f64, coords: PhaseVector) -> Self {
        Self::new(species, kinetic_energy, Dynamics::Particle(coords))
    }

    pub fn envelope(species: Species, kinetic_energy: f64, covariance: CovarianceMatrix) -> Self {
        Self::new(
            species,
            kinetic_energy,
            Dynamics::Envelope(EnvelopeState::new(covariance)),
        )
    }

    pub fn transfer_map(species: Species, kinetic_energy: f64) -> Self {
        Self::new(
            species,
            kinetic_energy,
            Dynamics::TransferMap(PhaseMatrix::identity()),
        )
    }

    pub fn ensemble(species: Species, kinetic_energy: f64, particles: Vec<MacroParticle>) -> Self {
        Self::new(species, kinetic_energy, Dynamics::Ensemble(particles))
    }

    /// Build a probe of `kind` from beam settings. Normalized emittances are
    /// converted to geometric ones at the injection energy.
    pub fn from_beam(kind: ProbeKind, beam: &BeamSettings) -> ModelResult<Self> {
        beam.validate()?;
        let species = Species::new(beam.species_charge, beam.rest_energy);
        let gamma = lorentz_gamma(beam.kinetic_energy, beam.rest_energy);
        let beta_gamma = lorentz_beta(gamma) * gamma;
        let twiss = beam.twiss.map(|t| {
            let tw = Twiss::new(t.alpha, t.beta, t.emittance);
            if beam.normalized_emittance && beta_gamma > 0.0 {
                tw.denormalized(beta_gamma)
            } else {
                tw
            }
        });
        let probe = match kind {
            ProbeKind::Particle => Self::particle(species, beam.kinetic_energy, PhaseVector::zero()),
            ProbeKind::Envelope => Self::envelope(
                species,
                beam.kinetic_energy,
                CovarianceMatrix::from_twiss(&twiss),
            ),
            ProbeKind::TransferMap => Self::transfer_map(species, beam.kinetic_energy),
            ProbeKind::Ensemble => Self::ensemble(
                species,
                beam.kinetic_energy,
                ensemble::gaussian_ensemble(&twiss, beam.ensemble_size, beam.seed),
            ),
        };
        Ok(probe
            .with_beam_current(beam.beam_current)
            .with_bunch_frequency(beam.bunch_frequency))
    }

    pub fn with_position(mut self, position: f64) -> Self {
        self.kinematics.position = position;
        self.refresh_initial();
        self
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.kinematics.time = time;
        self.refresh_initial();
        self
    }

    pub fn with_beam_current(mut self, current: f64) -> Self {
        self.beam_current = current;
        self.refresh_initial();
        self
    }

    pub fn with_bunch_frequency(mut self, frequency: f64) -> Self {
        self.bunch_frequency = frequency;
        self.refresh_initial();
        self
    }

    fn refresh_initial(&mut self) {
        self.initial = InitialConditions {
            species: self.species,
            kinematics: self.kinematics,
            dynamics: self.dynamics.clone(),
            beam_current: self.beam_current,
            bunch_frequency: self.bunch_frequency,
            last_gap: self.last_gap,
        };
    }

    pub fn kind(&self) -> ProbeKind {
        self.dynamics.kind()
    }

    pub fn species(&self) -> Species {
        self.species
    }

    pub fn kinematics(&self) -> Kinematics {
        self.kinematics
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.kinematics.kinetic_energy
    }

    pub fn position(&self) -> f64 {
        self.kinematics.position
    }

    pub fn time(&self) -> f64 {
        self.kinematics.time
    }

    pub fn gamma(&self) -> f64 {
        lorentz_gamma(self.kinematics.kinetic_energy, self.species.rest_energy)
    }

    pub fn beta(&self) -> f64 {
        lorentz_beta(self.gamma())
    }

    pub fn beta_gamma(&self) -> f64 {
        let gamma = self.gamma();
        lorentz_beta(gamma) * gamma
    }

    pub fn beam_current(&self) -> f64 {
        self.beam_current
    }

    pub fn bunch_frequency(&self) -> f64 {
        self.bunch_frequency
    }

    /// Charge per bunch I/f (C).
    pub fn bunch_charge(&self) -> f64 {
        if self.bunch_frequency > 0.0 {
            self.beam_current / self.bunch_frequency
        } else {
            0.0
        }
    }

    /// Generalized beam perveance K = |q|·Q/(2π ε₀ Er β² γ³).
    pub fn beam_perveance(&self) -> f64 {
        let gamma = self.gamma();
        let beta = lorentz_beta(gamma);
        let denom = 2.0 * std::f64::consts::PI
            * PERMITTIVITY
            * self.species.rest_energy
            * beta
            * beta
            * gamma.powi(3);
        if denom > 0.0 {
            self.species.charge.abs() * self.bunch_charge() / denom
        } else {
            0.0
        }
    }

    /// Velocity βc (m/s).
    pub fn velocity(&self) -> f64 {
        self.beta() * LIGHT_SPEED
    }

    pub fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    pub fn phase_coordinates(&self) -> Option<PhaseVector> {
        match &self.dynamics {
            Dynamics::Particle(v) => Some(*v),
            _ => None,
        }
    }

    pub fn covariance(&self) -> Option<CovarianceMatrix> {
        match &self.dynamics {
            Dynamics::Envelope(env) => Some(env.covariance),
            Dynamics::Ensemble(particles) => Some(ensemble::covariance(particles)),
            _ => None,
        }
    }

    pub fn envelope_state(&self) -> Option<&EnvelopeState> {
        match &self.dynamics {
            Dynamics::Envelope(env) => Some(env),
            _ => None,
        }
    }

    /// Accumulated map of transfer-map probes or response of envelope probes.
    pub fn response_map(&self) -> Option<PhaseMatrix> {
        match &self.dynamics {
            Dynamics::TransferMap(m) => Some(*m),
            Dynamics::Envelope(env) => Some(env.response),
            _ => None,
        }
    }

    pub fn particles(&self) -> Option<&[MacroParticle]> {
        match &self.dynamics {
            Dynamics::Ensemble(p) => Some(p),
            _ => None,
        }
    }

    pub fn last_gap(&self) -> Option<GapPhaseRecord> {
        self.last_gap
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn take_trajectory(&mut self) -> Trajectory {
        std::mem::take(&mut self.trajectory)
    }

    /// Snapshot of the current state labelled with `element_id`.
    pub fn create_state(&self, element_id: &str) -> ProbeState {
        ProbeState::capture(self, element_id)
    }

    /// Deep-copy species, kinematics and state from `other`, clearing the
    /// trajectory. The copied values become the new reset point.
    pub fn initialize_from(&mut self, other: &Probe) {
        self.species = other.species;
        self.kinematics = other.kinematics;
        self.dynamics = other.dynamics.clone();
        self.beam_current = other.beam_current;
        self.bunch_frequency = other.bunch_frequency;
        self.last_gap = other.last_gap;
        self.trajectory = Trajectory::new();
        self.refresh_initial();
    }

    /// Restore construction-time values and clear history.
    pub fn reset(&mut self) {
        let init = self.initial.clone();
        self.species = init.species;
        self.kinematics = init.kinematics;
        self.dynamics = init.dynamics;
        self.beam_current = init.beam_current;
        self.bunch_frequency = init.bunch_frequency;
        self.last_gap = init.last_gap;
        self.trajectory = Trajectory::new();
    }

    /// Single-particle stand-in for ensemble members whose charge and mass
    /// are `charge` and `mass` times this probe's species. The stand-in
    /// shares the probe's velocity, position and gap history, so element
    /// maps evaluated on it are the maps those members see.
    pub fn member_probe(&self, charge: f64, mass: f64) -> Probe {
        let species = Species::new(
            self.species.charge * charge,
            self.species.rest_energy * mass,
        );
        let mut member = Probe::new(
            species,
            self.kinematics.kinetic_energy * mass,
            Dynamics::Particle(PhaseVector::zero()),
        );
        member.kinematics.position = self.kinematics.position;
        member.kinematics.time = self.kinematics.time;
        member.beam_current = self.beam_current;
        member.bunch_frequency = self.bunch_frequency;
        member.last_gap = self.last_gap;
        member
    }

    /// Working copy without trajectory, used to stage a step.
    pub(crate) fn detached(&self) -> Probe {
        Probe {
            species: self.species,
            kinematics: self.kinematics,
            dynamics: self.dynamics.clone(),
            beam_current: self.beam_current,
            bunch_frequency: self.bunch_frequency,
            last_gap: self.last_gap,
            initial: self.initial.clone(),
            trajectory: Trajectory::new(),
        }
    }

    pub(crate) fn commit(&mut self, advance: Advance) {
        self.kinematics.kinetic_energy += advance.energy_gain;
        self.kinematics.position += advance.length;
        self.kinematics.time += advance.elapsed;
        self.dynamics = advance.dynamics;
        if let Some(record) = advance.gap_record {
            self.last_gap = Some(record);
        }
    }

    /// Take over the staged state of `work` and append `pending` records.
    pub(crate) fn absorb(&mut self, work: Probe, pending: Vec<ProbeState>) {
        self.species = work.species;
        self.kinematics = work.kinematics;
        self.dynamics = work.dynamics;
        self.last_gap = work.last_gap;
        for state in pending {
            self.trajectory.push(state);
        }
    }

    /// Append a snapshot by hand, for runs with the custom update policy.
    pub fn record(&mut self, state: ProbeState) {
        self.trajectory.push(state);
    }
}
