// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Trajectory
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Append-only history of probe snapshots recorded during propagation.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use xal_math::covariance::{CovarianceMatrix, Twiss};
use xal_math::phase::{PhaseMatrix, PhaseVector};
use xal_types::error::{ModelError, ModelResult};

use crate::ensemble;
use crate::probe::{lorentz_beta, lorentz_gamma, Dynamics, Probe, ProbeKind, Species};

/// Positions closer than this match in position lookups (m).
const POSITION_MATCH_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateData {
    Particle(PhaseVector),
    Envelope {
        covariance: CovarianceMatrix,
        response: PhaseMatrix,
    },
    TransferMap(PhaseMatrix),
    Ensemble {
        centroid: PhaseVector,
        covariance: CovarianceMatrix,
        size: usize,
    },
}

/// Snapshot of a probe at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeState {
    pub element_id: String,
    pub position: f64,
    pub time: f64,
    pub kinetic_energy: f64,
    pub species: Species,
    pub data: StateData,
}

impl ProbeState {
    pub fn capture(probe: &Probe, element_id: &str) -> Self {
        let data = match probe.dynamics() {
            Dynamics::Particle(v) => StateData::Particle(*v),
            Dynamics::Envelope(env) => StateData::Envelope {
                covariance: env.covariance,
                response: env.response,
            },
            Dynamics::TransferMap(m) => StateData::TransferMap(*m),
            Dynamics::Ensemble(particles) => StateData::Ensemble {
                centroid: ensemble::centroid(particles),
                covariance: ensemble::covariance(particles),
                size: particles.len(),
            },
        };
        Self {
            element_id: element_id.to_string(),
            position: probe.position(),
            time: probe.time(),
            kinetic_energy: probe.kinetic_energy(),
            species: probe.species(),
            data,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        match self.data {
            StateData::Particle(_) => ProbeKind::Particle,
            StateData::Envelope { .. } => ProbeKind::Envelope,
            StateData::TransferMap(_) => ProbeKind::TransferMap,
            StateData::Ensemble { .. } => ProbeKind::Ensemble,
        }
    }

    pub fn gamma(&self) -> f64 {
        lorentz_gamma(self.kinetic_energy, self.species.rest_energy)
    }

    pub fn beta(&self) -> f64 {
        lorentz_beta(self.gamma())
    }

    pub fn covariance(&self) -> Option<&CovarianceMatrix> {
        match &self.data {
            StateData::Envelope { covariance, .. } | StateData::Ensemble { covariance, .. } => {
                Some(covariance)
            }
            _ => None,
        }
    }

    pub fn twiss(&self) -> Option<[Twiss; 3]> {
        self.covariance().map(|c| c.twiss())
    }

    pub fn response_map(&self) -> Option<&PhaseMatrix> {
        match &self.data {
            StateData::TransferMap(m) => Some(m),
            StateData::Envelope { response, .. } => Some(response),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    states: Vec<ProbeState>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ProbeState) {
        self.states.push(state);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProbeState> {
        self.states.iter()
    }

    pub fn states(&self) -> &[ProbeState] {
        &self.states
    }

    pub fn initial_state(&self) -> Option<&ProbeState> {
        self.states.first()
    }

    pub fn final_state(&self) -> Option<&ProbeState> {
        self.states.last()
    }

    /// Last snapshot recorded for `id`, i.e. the element exit under the
    /// default update policy.
    pub fn state_for_element(&self, id: &str) -> ModelResult<&ProbeState> {
        self.states
            .iter()
            .rev()
            .find(|s| s.element_id == id)
            .ok_or_else(|| ModelError::MissingState(id.to_string()))
    }

    pub fn states_for_element(&self, id: &str) -> Vec<&ProbeState> {
        self.states.iter().filter(|s| s.element_id == id).collect()
    }

    /// Response between two elements: S(to)·S(from)⁻¹.
    pub fn state_response(&self, from: &str, to: &str) -> ModelResult<PhaseMatrix> {
        let a = self.state_for_element(from)?;
        let b = self.state_for_element(to)?;
        let map_a = a
            .response_map()
            .ok_or_else(|| ModelError::NoTransferMap(a.kind().name().to_string()))?;
        let map_b = b
            .response_map()
            .ok_or_else(|| ModelError::NoTransferMap(b.kind().name().to_string()))?;
        Ok(map_b.times(&map_a.inverse()?))
    }

    pub fn state_at_position(&self, position: f64) -> Option<&ProbeState> {
        self.states
            .iter()
            .find(|s| (s.position - position).abs() < POSITION_MATCH_TOLERANCE)
    }

    pub fn state_nearest_position(&self, position: f64) -> Option<&ProbeState> {
        self.states.iter().min_by(|a, b| {
            (a.position - position)
                .abs()
                .total_cmp(&(b.position - position).abs())
        })
    }

    /// Snapshots with `start <= position <= stop`.
    pub fn states_in_position_range(&self, start: f64, stop: f64) -> Vec<&ProbeState> {
        self.states
            .iter()
            .filter(|s| s.position >= start && s.position <= stop)
            .collect()
    }

    /// Records from the first snapshot of `from` through the last of `to`.
    pub fn sub_trajectory(&self, from: &str, to: &str) -> ModelResult<Trajectory> {
        let start = self
            .states
            .iter()
            .position(|s| s.element_id == from)
            .ok_or_else(|| ModelError::MissingState(from.to_string()))?;
        let stop = self
            .states
            .iter()
            .rposition(|s| s.element_id == to)
            .ok_or_else(|| ModelError::MissingState(to.to_string()))?;
        if stop < start {
            return Ok(Trajectory::new());
        }
        Ok(Trajectory {
            states: self.states[start..=stop].to_vec(),
        })
    }

    /// (positions, kinetic energies) of every snapshot.
    pub fn energy_profile(&self) -> (Array1<f64>, Array1<f64>) {
        let positions = self.states.iter().map(|s| s.position).collect();
        let energies = self.states.iter().map(|s| s.kinetic_energy).collect();
        (positions, energies)
    }

    /// Twiss parameters along the beamline for envelope and ensemble runs.
    pub fn twiss_profile(&self) -> Vec<(f64, [Twiss; 3])> {
        self.states
            .iter()
            .filter_map(|s| s.twiss().map(|t| (s.position, t)))
            .collect()
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a ProbeState;
    type IntoIter = std::slice::Iter<'a, ProbeState>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}
