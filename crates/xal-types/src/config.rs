// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_STEP_SIZE, PROTON_REST_ENERGY};
use crate::error::{ensure_finite, ensure_positive, ModelError, ModelResult};

/// Top-level model run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Algorithm type identifier, e.g. `"EnvelopeTracker"`.
    pub algorithm: String,
    #[serde(default)]
    pub tracker: TrackerSettings,
    pub beam: BeamSettings,
}

/// When the tracker records probe snapshots.
///
/// The discriminants are the bit values used in persisted archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Never record automatically.
    Custom = 0,
    /// Record after every sub-step.
    Always = 1,
    /// Record once at element exit.
    Exit = 2,
    /// Record once at element entrance.
    Entrance = 4,
    /// Record at entrance and exit.
    EntranceAndExit = 6,
}

impl UpdatePolicy {
    pub fn bits(self) -> i32 {
        self as i32
    }

    pub fn from_bits(bits: i32) -> ModelResult<Self> {
        match bits {
            0 => Ok(UpdatePolicy::Custom),
            1 => Ok(UpdatePolicy::Always),
            2 => Ok(UpdatePolicy::Exit),
            4 => Ok(UpdatePolicy::Entrance),
            6 => Ok(UpdatePolicy::EntranceAndExit),
            other => Err(ModelError::data_format(
                "update",
                format!("unknown probe update policy {other}"),
            )),
        }
    }

    pub fn records_entrance(self) -> bool {
        self.bits() & UpdatePolicy::Entrance.bits() != 0
    }

    pub fn records_exit(self) -> bool {
        self.bits() & UpdatePolicy::Exit.bits() != 0
    }

    pub fn records_substeps(self) -> bool {
        self == UpdatePolicy::Always
    }
}

/// Bunch distribution assumed when estimating emittance growth from the
/// phase spread across an RF gap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitGrowthModel {
    /// Weiss' original TRACE3D formulas.
    #[default]
    Trace3d,
    /// Gaussian in the longitudinal phase only.
    Gaussian1d,
    /// Axially symmetric 3D Gaussian bunch.
    Gaussian3d,
    /// Uniformly filled 3D ellipsoid.
    Uniform3d,
}

impl EmitGrowthModel {
    pub fn name(self) -> &'static str {
        match self {
            EmitGrowthModel::Trace3d => "TRACE3D",
            EmitGrowthModel::Gaussian1d => "GAUSSIAN1D",
            EmitGrowthModel::Gaussian3d => "GAUSSIAN3D",
            EmitGrowthModel::Uniform3d => "UNIFORM3D",
        }
    }

    pub fn from_name(name: &str) -> ModelResult<Self> {
        match name {
            "TRACE3D" => Ok(EmitGrowthModel::Trace3d),
            "GAUSSIAN1D" => Ok(EmitGrowthModel::Gaussian1d),
            "GAUSSIAN3D" => Ok(EmitGrowthModel::Gaussian3d),
            "UNIFORM3D" => Ok(EmitGrowthModel::Uniform3d),
            other => Err(ModelError::data_format(
                "emitGrowthModel",
                format!("unknown emittance growth model '{other}'"),
            )),
        }
    }
}

/// Tracker numerical options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Maximum sub-step length inside thick elements (m).
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default = "default_true")]
    pub space_charge: bool,
    #[serde(default)]
    pub emittance_growth: bool,
    #[serde(default)]
    pub emit_growth_model: EmitGrowthModel,
    #[serde(default = "default_true")]
    pub rf_gap_phase_calculation: bool,
    #[serde(default = "default_update_policy")]
    pub update_policy: UpdatePolicy,
    #[serde(default)]
    pub debug: bool,
    /// First element to propagate through; `None` starts at the lattice head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_element: Option<String>,
    /// Last element to propagate through; `None` runs to the lattice end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_element: Option<String>,
    #[serde(default = "default_true")]
    pub include_stop_element: bool,
}

fn default_step_size() -> f64 {
    DEFAULT_STEP_SIZE
}
fn default_true() -> bool {
    true
}
fn default_update_policy() -> UpdatePolicy {
    UpdatePolicy::Exit
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            step_size: default_step_size(),
            space_charge: true,
            emittance_growth: false,
            emit_growth_model: EmitGrowthModel::Trace3d,
            rf_gap_phase_calculation: true,
            update_policy: default_update_policy(),
            debug: false,
            start_element: None,
            stop_element: None,
            include_stop_element: true,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> ModelResult<()> {
        ensure_positive(self.step_size, "tracker.step_size")?;
        Ok(())
    }
}

/// Single-plane Twiss triple (alpha, beta [m], emittance [m rad]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwissSettings {
    pub alpha: f64,
    pub beta: f64,
    pub emittance: f64,
}

/// Beam species, kinematics and initial envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSettings {
    /// Charge in units of the elementary charge.
    #[serde(default = "default_species_charge")]
    pub species_charge: f64,
    /// Rest energy (eV).
    #[serde(default = "default_rest_energy")]
    pub rest_energy: f64,
    /// Kinetic energy (eV).
    pub kinetic_energy: f64,
    /// Beam current (A).
    #[serde(default)]
    pub beam_current: f64,
    /// Bunch repetition frequency (Hz).
    #[serde(default = "default_bunch_frequency")]
    pub bunch_frequency: f64,
    /// Emittances in `twiss` are normalized (multiplied by beta*gamma).
    #[serde(default)]
    pub normalized_emittance: bool,
    /// Twiss parameters for the x, y and z planes.
    pub twiss: [TwissSettings; 3],
    /// Macro-particle count for ensemble probes.
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    /// Seed for ensemble sampling.
    #[serde(default)]
    pub seed: u64,
}

fn default_species_charge() -> f64 {
    1.0
}
fn default_rest_energy() -> f64 {
    PROTON_REST_ENERGY
}
fn default_bunch_frequency() -> f64 {
    4.025e8
}
fn default_ensemble_size() -> usize {
    1000
}

impl BeamSettings {
    pub fn validate(&self) -> ModelResult<()> {
        ensure_finite(self.species_charge, "beam.species_charge")?;
        ensure_positive(self.rest_energy, "beam.rest_energy")?;
        ensure_positive(self.bunch_frequency, "beam.bunch_frequency")?;
        if !(self.kinetic_energy.is_finite() && self.kinetic_energy >= 0.0) {
            return Err(ModelError::Config(format!(
                "beam.kinetic_energy must be finite and >= 0, got {}",
                self.kinetic_energy
            )));
        }
        for (plane, tw) in ["x", "y", "z"].iter().zip(self.twiss.iter()) {
            ensure_positive(tw.beta, &format!("beam.twiss.{plane}.beta"))?;
            ensure_finite(tw.alpha, &format!("beam.twiss.{plane}.alpha"))?;
            if !(tw.emittance.is_finite() && tw.emittance >= 0.0) {
                return Err(ModelError::Config(format!(
                    "beam.twiss.{plane}.emittance must be finite and >= 0, got {}",
                    tw.emittance
                )));
            }
        }
        Ok(())
    }
}

impl ModelConfig {
    /// Load from a JSON file and validate it.
    pub fn from_file(path: &str) -> ModelResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path, algorithm = %config.algorithm, "loaded model config");
        Ok(config)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.algorithm.trim().is_empty() {
            return Err(ModelError::Config(
                "algorithm type identifier is empty".to_string(),
            ));
        }
        self.tracker.validate()?;
        self.beam.validate()
    }
}
