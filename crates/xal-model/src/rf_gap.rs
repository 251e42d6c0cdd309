// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — RF Gap
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Thin-lens RF acceleration gap with optional transit-time-factor model.
//!
//! Without a TTF polynomial the gap is the classic impulse of strength ETL.
//! With one, ETL = E0·L·T(β̄) and the effective phase are solved by fixed
//! point iteration at the mid-gap velocity.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::warn;
use xal_math::phase::PhaseMatrix;
use xal_math::poly::Polynomial;
use xal_types::constants::{LIGHT_SPEED, PHASE_CALC_MAX_ITER, PHASE_CALC_TOLERANCE};
use xal_types::error::{ModelError, ModelResult};

use crate::probe::{lorentz_beta, lorentz_gamma, GapPhaseRecord, Probe};

/// Two gaps closer than this are treated as the same location.
const GAP_POSITION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfGap {
    /// Integrated field times transit-time factor (V).
    pub etl: f64,
    /// Design phase (rad).
    pub phase: f64,
    /// RF frequency (Hz).
    pub frequency: f64,
    /// On-axis field amplitude (V/m), used with a TTF polynomial.
    pub e0: f64,
    /// Cell length (m), used with a TTF polynomial.
    pub cell_length: f64,
    /// Transit-time factor T(β).
    pub ttf: Polynomial,
    /// First gap of a cavity: always uses the design phase.
    pub first_gap: bool,
    /// 0 for 0-mode structures, 1 for π-mode.
    pub structure_mode: i32,
}

/// Everything the gap does to a probe in one crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapKick {
    pub map: PhaseMatrix,
    pub energy_gain: f64,
    /// Time correction from the effective phase shift (s).
    pub elapsed: f64,
    /// Mid-gap velocity β̄.
    pub mid_beta: f64,
    /// Effective phase after TTF correction (rad).
    pub effective_phase: f64,
    pub record: GapPhaseRecord,
}

struct MidGap {
    etl: f64,
    phase: f64,
    beta: f64,
    gamma: f64,
    delta_psi: f64,
    ttf_ratio: f64,
}

impl RfGap {
    pub fn new(etl: f64, phase: f64, frequency: f64) -> Self {
        Self {
            etl,
            phase,
            frequency,
            e0: 0.0,
            cell_length: 0.0,
            ttf: Polynomial::default(),
            first_gap: false,
            structure_mode: 0,
        }
    }

    pub fn with_ttf(mut self, e0: f64, cell_length: f64, ttf: Polynomial) -> Self {
        self.e0 = e0;
        self.cell_length = cell_length;
        self.ttf = ttf;
        self
    }

    pub fn as_first_gap(mut self) -> Self {
        self.first_gap = true;
        self
    }

    pub fn with_structure_mode(mut self, mode: i32) -> Self {
        self.structure_mode = mode;
        self
    }

    pub fn has_ttf(&self) -> bool {
        !self.ttf.is_zero()
    }

    pub fn wavelength(&self) -> f64 {
        LIGHT_SPEED / self.frequency
    }

    /// Phase the probe sees at this gap.
    ///
    /// Continues the phase of the previous gap across the drift between
    /// them unless phase calculation is off, this is a first gap, no gap
    /// has been crossed yet, or the probe has not moved since the last one.
    pub fn resolve_phase(&self, probe: &Probe, phase_calc: bool) -> f64 {
        if !phase_calc || self.first_gap {
            return self.phase;
        }
        let Some(last) = probe.last_gap() else {
            return self.phase;
        };
        let ds = probe.position() - last.position;
        if ds.abs() < GAP_POSITION_TOLERANCE {
            warn!(
                position = probe.position(),
                "gap at the same position as the previous one, using design phase"
            );
            return self.phase;
        }
        let mut phase = last.phase + 2.0 * PI * ds / (self.wavelength() * probe.beta());
        if self.structure_mode == 1 {
            phase += PI;
        }
        phase
    }

    fn solve_mid_gap(&self, probe: &Probe, phase: f64) -> ModelResult<MidGap> {
        let q = probe.species().charge.abs();
        let er = probe.species().rest_energy;
        let wi = probe.kinetic_energy();

        if !self.has_ttf() {
            let gain = q * self.etl * phase.cos();
            let gamma = lorentz_gamma(wi + 0.5 * gain, er);
            return Ok(MidGap {
                etl: self.etl,
                phase,
                beta: lorentz_beta(gamma),
                gamma,
                delta_psi: 0.0,
                ttf_ratio: 0.0,
            });
        }

        let amplitude = self.e0 * self.cell_length;
        let mut beta_avg = probe.beta();
        let mut phase_eff = phase;
        for _ in 0..PHASE_CALC_MAX_ITER {
            let t = self.ttf.evaluate_at(beta_avg);
            let t_prime = self.ttf.derivative_at(beta_avg);
            let etl = amplitude * t;
            let gain = q * etl * phase_eff.cos();
            let gamma = lorentz_gamma(wi + 0.5 * gain, er);
            let beta = lorentz_beta(gamma);
            if !(beta > 0.0) {
                return Err(ModelError::Numerical(format!(
                    "mid-gap velocity vanished at W = {wi:e} eV"
                )));
            }
            let delta_psi =
                -PI * q * amplitude * t_prime * phase.sin() / (er * beta * beta * gamma.powi(3));
            let next_phase = phase + delta_psi;
            let converged = (next_phase - phase_eff).abs() < PHASE_CALC_TOLERANCE
                && (beta - beta_avg).abs() < PHASE_CALC_TOLERANCE;
            phase_eff = next_phase;
            beta_avg = beta;
            if converged {
                let ttf_ratio = if t != 0.0 { -beta * t_prime / t } else { 0.0 };
                return Ok(MidGap {
                    etl,
                    phase: phase_eff,
                    beta,
                    gamma,
                    delta_psi,
                    ttf_ratio,
                });
            }
        }
        Err(ModelError::Numerical(format!(
            "gap phase iteration did not converge in {PHASE_CALC_MAX_ITER} passes"
        )))
    }

    /// Map, energy gain and phase record for a crossing at `phase`.
    pub fn compute(&self, probe: &Probe, phase: f64) -> ModelResult<GapKick> {
        let record = GapPhaseRecord {
            phase,
            position: probe.position(),
        };
        let idle = if self.has_ttf() {
            self.e0 == 0.0 || self.cell_length == 0.0
        } else {
            self.etl == 0.0
        };
        if idle {
            return Ok(GapKick {
                map: PhaseMatrix::identity(),
                energy_gain: 0.0,
                elapsed: 0.0,
                mid_beta: probe.beta(),
                effective_phase: phase,
                record,
            });
        }

        let q = probe.species().charge.abs();
        let er = probe.species().rest_energy;
        let wi = probe.kinetic_energy();
        let mid = self.solve_mid_gap(probe, phase)?;

        let energy_gain = q * mid.etl * mid.phase.cos();
        let wf = wi + energy_gain;
        if !(wf >= 0.0) {
            return Err(ModelError::Numerical(format!(
                "gap decelerates probe below rest: W = {wi:e} eV, dW = {energy_gain:e} eV"
            )));
        }
        if !(mid.beta > 0.0) {
            return Err(ModelError::Numerical(format!(
                "near-zero mid-gap velocity at W = {wi:e} eV"
            )));
        }

        let gamma_i = lorentz_gamma(wi, er);
        let bg_i = lorentz_beta(gamma_i) * gamma_i;
        let gamma_f = lorentz_gamma(wf, er);
        let bg_f = lorentz_beta(gamma_f) * gamma_f;
        if !(bg_f > 0.0) {
            return Err(ModelError::Numerical(format!(
                "near-zero exit momentum at W = {wf:e} eV"
            )));
        }
        let bg_mid = mid.beta * mid.gamma;
        let kr = PI * q * mid.etl * self.frequency * (-mid.phase).sin()
            / (LIGHT_SPEED * er * bg_mid * bg_mid);

        let (kx, ky, kxy) = if self.has_ttf() {
            let eps = q * mid.etl * mid.phase.cos()
                / (2.0 * er * mid.beta * mid.beta * mid.gamma.powi(3));
            (
                1.0 + eps * mid.ttf_ratio,
                1.0 - eps * mid.ttf_ratio,
                kr * (1.0 - mid.ttf_ratio),
            )
        } else {
            (1.0, 1.0, kr)
        };
        let kz = -2.0 * kxy * mid.gamma * mid.gamma;
        let damping = bg_i / bg_f;

        let map = PhaseMatrix::with_blocks(
            [[kx, 0.0], [kxy / bg_f, damping]],
            [[ky, 0.0], [kxy / bg_f, damping]],
            [[1.0, 0.0], [kz / bg_f, damping]],
        );

        Ok(GapKick {
            map,
            energy_gain,
            elapsed: mid.delta_psi / (2.0 * PI * self.frequency),
            mid_beta: mid.beta,
            effective_phase: mid.phase,
            record,
        })
    }
}
