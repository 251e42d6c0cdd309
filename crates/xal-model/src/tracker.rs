// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Tracker
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Probe propagation through a lattice.
//!
//! A [`Tracker`] accepts one probe kind and holds a strategy per element
//! type. Each strategy computes one step into an [`Advance`] without touching
//! the probe. Thick elements are split into `N = max(1, ⌈L/step⌉)` sub-steps,
//! each recomputed at the current energy. The probe only sees the result
//! once the whole element has been stepped, so a failing element leaves it
//! at the exit of the previous one.

use std::fmt;

use tracing::{debug, info};
use xal_math::phase::{PhaseMatrix, PhaseVector};
use xal_math::symplectic::{drift_kick_drift, KickField};
use xal_types::config::{EmitGrowthModel, ModelConfig, TrackerSettings, UpdatePolicy};
use xal_types::error::{ModelError, ModelResult};

use crate::archive::DataAdaptor;
use crate::element::{drift_map, quad_strength, Element, ElementKind, ElementType, OctupoleKick};
use crate::emittance::{apply_growth, growth_factors, phase_spread};
use crate::ensemble;
use crate::lattice::Lattice;
use crate::probe::{Advance, Dynamics, Probe, ProbeKind};
use crate::space_charge::space_charge_matrix;

pub const NODETAG_ALGORITHM: &str = "algorithm";
pub const NODETAG_TRACKER: &str = "tracker";
pub const NODETAG_OPTIONS: &str = "options";

/// Archive format version written by [`Tracker::save`].
pub const TRACKER_VERSION: i32 = 2;

/// Computes one step of `length` through an element.
pub type StepStrategy = fn(&Tracker, &Probe, &Element, f64) -> ModelResult<Advance>;

/// Per-element-type step functions.
#[derive(Clone, Copy)]
pub struct StrategyTable {
    steps: [Option<StepStrategy>; ElementType::COUNT],
}

impl StrategyTable {
    pub fn empty() -> Self {
        Self {
            steps: [None; ElementType::COUNT],
        }
    }

    /// Strategies for every built-in element type.
    pub fn standard() -> Self {
        Self::empty()
            .register(ElementType::Drift, linear_step)
            .register(ElementType::Quadrupole, linear_step)
            .register(ElementType::SectorDipole, linear_step)
            .register(ElementType::Octupole, octupole_step)
            .register(ElementType::RfGap, gap_step)
            .register(ElementType::Marker, linear_step)
    }

    pub fn register(mut self, element_type: ElementType, step: StepStrategy) -> Self {
        self.steps[element_type.index()] = Some(step);
        self
    }

    pub fn without(mut self, element_type: ElementType) -> Self {
        self.steps[element_type.index()] = None;
        self
    }

    pub fn get(&self, element_type: ElementType) -> Option<StepStrategy> {
        self.steps[element_type.index()]
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for StrategyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = ElementType::ALL
            .iter()
            .filter(|t| self.get(**t).is_some())
            .map(|t| t.name())
            .collect();
        f.debug_struct("StrategyTable")
            .field("registered", &registered)
            .finish()
    }
}

/// Propagation algorithm bound to one probe kind.
#[derive(Debug, Clone)]
pub struct Tracker {
    kind: ProbeKind,
    settings: TrackerSettings,
    strategies: StrategyTable,
    version: i32,
}

impl Tracker {
    pub fn new(kind: ProbeKind) -> Self {
        Self {
            kind,
            settings: TrackerSettings::default(),
            strategies: StrategyTable::standard(),
            version: TRACKER_VERSION,
        }
    }

    pub fn with_settings(mut self, settings: TrackerSettings) -> ModelResult<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    /// Look up a tracker by its algorithm type string.
    pub fn from_type_name(name: &str) -> ModelResult<Self> {
        ProbeKind::ALL
            .into_iter()
            .find(|k| k.tracker_type() == name)
            .map(Self::new)
            .ok_or_else(|| ModelError::Config(format!("unknown algorithm type '{name}'")))
    }

    pub fn from_config(config: &ModelConfig) -> ModelResult<Self> {
        config.validate()?;
        Self::from_type_name(&config.algorithm)?.with_settings(config.tracker.clone())
    }

    /// Rebuild a tracker from an `algorithm` node, dispatching on its type.
    pub fn new_instance(node: &dyn DataAdaptor) -> ModelResult<Self> {
        expect_algorithm_node(node)?;
        let mut tracker = Self::from_type_name(node.required_attribute("type")?)?;
        tracker.load(node)?;
        Ok(tracker)
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.tracker_type()
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn set_step_size(&mut self, step_size: f64) -> ModelResult<()> {
        let settings = TrackerSettings {
            step_size,
            ..self.settings.clone()
        };
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn set_space_charge(&mut self, enabled: bool) {
        self.settings.space_charge = enabled;
    }

    pub fn set_emittance_growth(&mut self, enabled: bool, model: EmitGrowthModel) {
        self.settings.emittance_growth = enabled;
        self.settings.emit_growth_model = model;
    }

    pub fn set_rf_gap_phase_calculation(&mut self, enabled: bool) {
        self.settings.rf_gap_phase_calculation = enabled;
    }

    pub fn set_update_policy(&mut self, policy: UpdatePolicy) {
        self.settings.update_policy = policy;
    }

    /// Restrict propagation to `start..=stop` (or `start..stop` when
    /// `include_stop` is false).
    pub fn set_range(&mut self, start: Option<&str>, stop: Option<&str>, include_stop: bool) {
        self.settings.start_element = start.map(str::to_string);
        self.settings.stop_element = stop.map(str::to_string);
        self.settings.include_stop_element = include_stop;
    }

    pub fn check_probe(&self, probe: &Probe) -> ModelResult<()> {
        if probe.kind() != self.kind {
            return Err(ModelError::ProbeMismatch {
                probe: probe.kind().name().to_string(),
                tracker: self.type_name().to_string(),
            });
        }
        Ok(())
    }

    /// Number of sub-steps for `element`.
    pub fn sub_steps(&self, element: &Element) -> usize {
        if element.is_thick() {
            ((element.length() / self.settings.step_size).ceil() as usize).max(1)
        } else {
            1
        }
    }

    fn space_charge_active(&self, probe: &Probe, length: f64) -> bool {
        self.settings.space_charge
            && length > 0.0
            && matches!(self.kind, ProbeKind::Envelope | ProbeKind::Ensemble)
            && probe.beam_perveance() > 0.0
    }

    /// Propagate through the lattice, honoring the configured start and
    /// stop elements.
    pub fn propagate(&self, probe: &mut Probe, lattice: &Lattice) -> ModelResult<()> {
        self.check_probe(probe)?;
        let (start, stop) = self.element_range(lattice)?;
        info!(
            lattice = lattice.id(),
            tracker = self.type_name(),
            elements = stop - start,
            energy = probe.kinetic_energy(),
            "propagation start"
        );
        for placed in &lattice.elements()[start..stop] {
            self.propagate_element(probe, &placed.element)?;
        }
        info!(
            lattice = lattice.id(),
            energy = probe.kinetic_energy(),
            position = probe.position(),
            records = probe.trajectory().len(),
            "propagation complete"
        );
        Ok(())
    }

    fn element_range(&self, lattice: &Lattice) -> ModelResult<(usize, usize)> {
        let locate = |id: &str| {
            lattice.index_of(id).ok_or_else(|| {
                ModelError::Config(format!(
                    "element '{id}' not found in lattice '{}'",
                    lattice.id()
                ))
            })
        };
        let start = match &self.settings.start_element {
            Some(id) => locate(id)?,
            None => 0,
        };
        let stop = match &self.settings.stop_element {
            Some(id) => locate(id)? + usize::from(self.settings.include_stop_element),
            None => lattice.len(),
        };
        if stop < start {
            return Err(ModelError::Config(format!(
                "stop element precedes start element in lattice '{}'",
                lattice.id()
            )));
        }
        Ok((start, stop))
    }

    /// Step through one element and commit the result.
    pub fn propagate_element(&self, probe: &mut Probe, element: &Element) -> ModelResult<()> {
        self.check_probe(probe)?;
        let element_type = element.element_type();
        let step = self
            .strategies
            .get(element_type)
            .ok_or_else(|| ModelError::UnsupportedElement {
                element_id: element.id().to_string(),
                element_type: element_type.name().to_string(),
            })?;

        let policy = self.settings.update_policy;
        let n = self.sub_steps(element);
        let h = element.length() / n as f64;
        let mut work = probe.detached();
        let mut pending = Vec::new();
        if policy.records_entrance() {
            pending.push(work.create_state(element.id()));
        }
        for i in 0..n {
            let advance = step(self, &work, element, h)?;
            if !advance.dynamics.is_finite() {
                return Err(ModelError::Numerical(format!(
                    "non-finite probe state in element '{}' (sub-step {i})",
                    element.id()
                )));
            }
            work.commit(advance);
            if self.settings.debug {
                debug!(
                    element = element.id(),
                    substep = i,
                    position = work.position(),
                    energy = work.kinetic_energy(),
                    "sub-step"
                );
            }
            if policy.records_substeps() {
                pending.push(work.create_state(element.id()));
            }
        }
        if policy.records_exit() {
            pending.push(work.create_state(element.id()));
        }
        debug!(
            element = element.id(),
            kind = element_type.name(),
            steps = n,
            position = work.position(),
            energy = work.kinetic_energy(),
            "element done"
        );
        probe.absorb(work, pending);
        Ok(())
    }

    /// Write the configuration as an `algorithm` child of `parent`.
    pub fn save(&self, parent: &mut dyn DataAdaptor) {
        let node = parent.create_child(NODETAG_ALGORITHM);
        node.set_string("type", self.type_name());
        node.set_int("ver", self.version);

        let s = &self.settings;
        let tracker = node.create_child(NODETAG_TRACKER);
        tracker.set_int("update", s.update_policy.bits());
        tracker.set_boolean("debug", s.debug);
        tracker.set_boolean("calcRfGapPhase", s.rf_gap_phase_calculation);
        if let Some(id) = &s.start_element {
            tracker.set_string("startElemId", id);
        }
        if let Some(id) = &s.stop_element {
            tracker.set_string("stopElemId", id);
        }
        tracker.set_boolean("inclStopElem", s.include_stop_element);

        let options = node.create_child(NODETAG_OPTIONS);
        options.set_boolean("scheff", s.space_charge);
        options.set_boolean("emitgrowth", s.emittance_growth);
        options.set_double("stepsize", s.step_size);
        options.set_string("emitGrowthModel", s.emit_growth_model.name());
    }

    /// Read the configuration from an `algorithm` node. Absent attributes
    /// keep their current values; nothing changes unless the whole node
    /// parses.
    pub fn load(&mut self, node: &dyn DataAdaptor) -> ModelResult<()> {
        expect_algorithm_node(node)?;
        let type_name = node.required_attribute("type")?;
        if type_name != self.type_name() {
            return Err(ModelError::Config(format!(
                "archive describes a {type_name}, not a {}",
                self.type_name()
            )));
        }
        let version = node.int_value("ver")?.unwrap_or(self.version);

        let mut s = self.settings.clone();
        let tracker = node.required_child(NODETAG_TRACKER)?;
        if let Some(bits) = tracker.int_value("update")? {
            s.update_policy = UpdatePolicy::from_bits(bits)?;
        }
        s.debug = tracker.boolean_value("debug")?.unwrap_or(s.debug);
        s.rf_gap_phase_calculation = tracker
            .boolean_value("calcRfGapPhase")?
            .unwrap_or(s.rf_gap_phase_calculation);
        s.start_element = tracker.string_value("startElemId");
        s.stop_element = tracker.string_value("stopElemId");
        s.include_stop_element = tracker
            .boolean_value("inclStopElem")?
            .unwrap_or(s.include_stop_element);

        let options = node.required_child(NODETAG_OPTIONS)?;
        s.space_charge = options.boolean_value("scheff")?.unwrap_or(s.space_charge);
        s.emittance_growth = options
            .boolean_value("emitgrowth")?
            .unwrap_or(s.emittance_growth);
        s.step_size = options.double_value("stepsize")?.unwrap_or(s.step_size);
        if let Some(name) = options.string_value("emitGrowthModel") {
            s.emit_growth_model = EmitGrowthModel::from_name(&name)?;
        }

        s.validate()?;
        self.settings = s;
        self.version = version;
        Ok(())
    }
}

fn expect_algorithm_node(node: &dyn DataAdaptor) -> ModelResult<()> {
    if node.name() != NODETAG_ALGORITHM {
        return Err(ModelError::data_format(
            node.name(),
            format!("wrong data source, expected '{NODETAG_ALGORITHM}' node"),
        ));
    }
    Ok(())
}

// ── Step strategies ──────────────────────────────────────────────────

/// Map of one step evaluated on a (possibly member) probe.
type StepMap<'a> = dyn Fn(&Probe, f64) -> ModelResult<PhaseMatrix> + 'a;

/// Carry the probe's dynamics through the step map, wrapping a
/// space-charge kick between two half maps when the beam has current.
/// Ensemble members are moved by the map of their own charge and mass.
fn transport(
    tracker: &Tracker,
    probe: &Probe,
    length: f64,
    map_for: &StepMap<'_>,
) -> ModelResult<Dynamics> {
    let with_space_charge = tracker.space_charge_active(probe, length);
    let dynamics = match probe.dynamics() {
        Dynamics::Particle(v) => Dynamics::Particle(map_for(probe, length)?.apply(v)),
        Dynamics::TransferMap(m) => Dynamics::TransferMap(map_for(probe, length)?.times(m)),
        Dynamics::Envelope(env) => {
            let full = if with_space_charge {
                let half = map_for(probe, 0.5 * length)?;
                let mid = env.covariance.propagate(&half);
                let kick = space_charge_matrix(
                    &mid,
                    probe.beam_perveance(),
                    probe.gamma(),
                    length,
                )?;
                half.times(&kick).times(&half)
            } else {
                map_for(probe, length)?
            };
            let mut next = *env;
            next.covariance = env.covariance.propagate(&full);
            next.response = full.times(&env.response);
            Dynamics::Envelope(next)
        }
        Dynamics::Ensemble(particles) => {
            let mut next = particles.clone();
            let classes = ensemble::member_classes(particles);
            let members: Vec<Probe> = classes
                .iter()
                .map(|c| probe.member_probe(c.charge, c.mass))
                .collect();
            if with_space_charge {
                let halves = members
                    .iter()
                    .map(|m| map_for(m, 0.5 * length))
                    .collect::<ModelResult<Vec<_>>>()?;
                for (class, half) in classes.iter().zip(&halves) {
                    ensemble::apply_class_map(&mut next, *class, half);
                }
                let mid = ensemble::covariance(&next);
                for class in &classes {
                    // the bunch field is common, the response scales with q/m
                    let kick = space_charge_matrix(
                        &mid,
                        probe.beam_perveance() * class.charge / class.mass,
                        probe.gamma(),
                        length,
                    )?;
                    ensemble::apply_class_map(&mut next, *class, &kick);
                }
                for (class, half) in classes.iter().zip(&halves) {
                    ensemble::apply_class_map(&mut next, *class, half);
                }
            } else {
                for (class, member) in classes.iter().zip(&members) {
                    ensemble::apply_class_map(&mut next, *class, &map_for(member, length)?);
                }
            }
            Dynamics::Ensemble(next)
        }
    };
    Ok(dynamics)
}

/// Linear map of the element at the probe's current energy.
pub fn linear_step(
    tracker: &Tracker,
    probe: &Probe,
    element: &Element,
    length: f64,
) -> ModelResult<Advance> {
    let map_for = |p: &Probe, len: f64| element.transfer_map(p, len);
    Ok(Advance {
        dynamics: transport(tracker, probe, length, &map_for)?,
        energy_gain: 0.0,
        length,
        elapsed: element.elapsed_time(probe, length)?,
        gap_record: None,
    })
}

struct OffsetKick<'a, K> {
    field: &'a K,
    offset: PhaseVector,
}

impl<K: KickField> KickField for OffsetKick<'_, K> {
    fn kick(&self, v: &PhaseVector) -> [f64; 3] {
        self.field.kick(&(*v - self.offset))
    }
}

/// Drift-kick-drift through the octupole field for particles and
/// ensembles. Moment-based probes only see the linear (drift) part.
pub fn octupole_step(
    tracker: &Tracker,
    probe: &Probe,
    element: &Element,
    length: f64,
) -> ModelResult<Advance> {
    let ElementKind::Octupole { strength } = element.kind() else {
        return linear_step(tracker, probe, element, length);
    };
    let offset = element.alignment().offset();
    let half = drift_map(0.5 * length, probe.gamma());
    let dynamics = match probe.dynamics() {
        Dynamics::Particle(v) => {
            let field = OctupoleKick {
                k3: quad_strength(probe, *strength)?,
            };
            let shifted = OffsetKick {
                field: &field,
                offset,
            };
            Dynamics::Particle(drift_kick_drift(v, &half, &shifted, length))
        }
        Dynamics::Ensemble(particles) => {
            let mut next = particles.clone();
            for class in ensemble::member_classes(particles) {
                let member = probe.member_probe(class.charge, class.mass);
                let field = OctupoleKick {
                    k3: quad_strength(&member, *strength)?,
                };
                let shifted = OffsetKick {
                    field: &field,
                    offset,
                };
                ensemble::apply_kick(&mut next, class, &half, &shifted, length);
            }
            Dynamics::Ensemble(next)
        }
        _ => return linear_step(tracker, probe, element, length),
    };
    Ok(Advance {
        dynamics,
        energy_gain: 0.0,
        length,
        elapsed: element.elapsed_time(probe, length)?,
        gap_record: None,
    })
}

/// Thin RF gap at the phase carried over from the previous gap.
pub fn gap_step(
    tracker: &Tracker,
    probe: &Probe,
    element: &Element,
    length: f64,
) -> ModelResult<Advance> {
    let Some(gap) = element.rf_gap_params() else {
        return linear_step(tracker, probe, element, length);
    };
    let phase = gap.resolve_phase(probe, tracker.settings.rf_gap_phase_calculation);
    let kick = gap.compute(probe, phase)?;

    let mut factors = None;
    if tracker.settings.emittance_growth {
        if let Dynamics::Envelope(env) = probe.dynamics() {
            let dphi = phase_spread(&env.covariance, kick.mid_beta, gap.wavelength());
            factors = Some(growth_factors(tracker.settings.emit_growth_model, dphi));
        }
    }
    let map_for = |p: &Probe, _len: f64| -> ModelResult<PhaseMatrix> {
        let mut map = gap.compute(p, phase)?.map;
        if let Some(f) = factors {
            map = apply_growth(&map, f);
        }
        Ok(element.misaligned(map))
    };

    let mut dynamics = transport(tracker, probe, 0.0, &map_for)?;
    if let (Dynamics::Envelope(env), Some(f)) = (&mut dynamics, factors) {
        env.growth_factors = f;
    }
    Ok(Advance {
        dynamics,
        energy_gain: kick.energy_gain,
        length,
        elapsed: kick.elapsed,
        gap_record: Some(kick.record),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DataNode;
    use crate::element::Alignment;
    use crate::lattice::Sequence;
    use crate::probe::{MacroParticle, Species};
    use crate::rf_gap::RfGap;
    use crate::trajectory::StateData;
    use std::f64::consts::PI;
    use xal_types::constants::PROTON_REST_ENERGY;
    use xal_math::covariance::{CovarianceMatrix, Twiss};

    fn waist_beam() -> CovarianceMatrix {
        CovarianceMatrix::from_twiss(&[
            Twiss::new(0.0, 0.3, 3e-6),
            Twiss::new(0.0, 0.45, 3e-6),
            Twiss::new(0.0, 0.9, 4e-6),
        ])
    }

    fn drift_lattice() -> Lattice {
        let mut seq = Sequence::new("line");
        seq.add_element(Element::marker("start"), 0.0)
            .add_element(Element::quadrupole("q1", 0.1, 5.0), 0.2)
            .add_element(Element::marker("mid"), 0.5)
            .add_element(Element::drift("d1", 0.25), 0.5)
            .add_element(Element::marker("end"), 1.0);
        Lattice::from_sequence(&seq).unwrap()
    }

    #[test]
    fn test_tracker_is_sync() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<Tracker>();
    }

    #[test]
    fn test_probe_mismatch_fails_fast() {
        let tracker = Tracker::new(ProbeKind::Envelope);
        let mut probe = Probe::particle(Species::proton(), 2.5e6, PhaseVector::zero());
        match tracker.propagate(&mut probe, &drift_lattice()) {
            Err(ModelError::ProbeMismatch { probe, tracker }) => {
                assert_eq!(probe, "ParticleProbe");
                assert_eq!(tracker, "EnvelopeTracker");
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_substeps_compose_to_direct_drift() {
        let tracker = Tracker::new(ProbeKind::TransferMap);
        let mut probe = Probe::transfer_map(Species::proton(), 2.5e6);
        let drift = Element::drift("d", 1.0);
        assert_eq!(tracker.sub_steps(&drift), 250);
        tracker.propagate_element(&mut probe, &drift).unwrap();
        let direct = drift_map(1.0, probe.gamma());
        assert!(probe.response_map().unwrap().approx_eq(&direct, 1e-12));
        assert!((probe.position() - 1.0).abs() < 1e-12);
        assert!((probe.time() - 1.0 / probe.velocity()).abs() < 1e-18);
        assert_eq!(probe.trajectory().len(), 1);
    }

    #[test]
    fn test_update_policies_control_records() {
        let drift = Element::drift("d", 0.01);
        let cases = [
            (UpdatePolicy::Always, 3),
            (UpdatePolicy::Exit, 1),
            (UpdatePolicy::Entrance, 1),
            (UpdatePolicy::EntranceAndExit, 2),
            (UpdatePolicy::Custom, 0),
        ];
        for (policy, expected) in cases {
            let mut tracker = Tracker::new(ProbeKind::Particle);
            tracker.set_update_policy(policy);
            let mut probe = Probe::particle(Species::proton(), 2.5e6, PhaseVector::zero());
            tracker.propagate_element(&mut probe, &drift).unwrap();
            assert_eq!(probe.trajectory().len(), expected, "{policy:?}");
        }
    }

    #[test]
    fn test_entrance_record_precedes_exit_record() {
        let mut tracker = Tracker::new(ProbeKind::Particle);
        tracker.set_update_policy(UpdatePolicy::EntranceAndExit);
        let mut probe = Probe::particle(Species::proton(), 2.5e6, PhaseVector::zero());
        tracker
            .propagate_element(&mut probe, &Element::drift("d", 0.5))
            .unwrap();
        let states = probe.trajectory().states_for_element("d");
        assert_eq!(states[0].position, 0.0);
        assert!((states[1].position - 0.5).abs() < 1e-12);
        assert!((probe.trajectory().state_for_element("d").unwrap().position - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unsupported_element_leaves_probe_untouched() {
        let tracker = Tracker::new(ProbeKind::Particle)
            .with_strategies(StrategyTable::standard().without(ElementType::Octupole));
        let mut probe = Probe::particle(
            Species::proton(),
            2.5e6,
            PhaseVector::new(1e-3, 0.0, 0.0, 0.0, 0.0, 0.0),
        );
        let mut seq = Sequence::new("line");
        seq.add_element(Element::drift("d1", 0.2), 0.0)
            .add_element(Element::octupole("o1", 0.1, 100.0), 0.2)
            .add_element(Element::drift("d2", 0.2), 0.3);
        let lattice = Lattice::from_sequence(&seq).unwrap();
        match tracker.propagate(&mut probe, &lattice) {
            Err(ModelError::UnsupportedElement {
                element_id,
                element_type,
            }) => {
                assert_eq!(element_id, "o1");
                assert_eq!(element_type, "Octupole");
            }
            other => panic!("Unexpected result: {other:?}"),
        }
        assert!((probe.position() - 0.2).abs() < 1e-12);
        assert_eq!(probe.trajectory().len(), 1);
        assert_eq!(probe.trajectory().final_state().unwrap().element_id, "d1");
    }

    #[test]
    fn test_failed_gap_keeps_last_completed_element() {
        let tracker = Tracker::new(ProbeKind::TransferMap);
        let mut probe = Probe::transfer_map(Species::proton(), 2.5e6);
        let mut seq = Sequence::new("line");
        seq.add_element(Element::drift("d1", 0.1), 0.0)
            .add_element(Element::rf_gap("g1", RfGap::new(-1.0e8, 0.0, 4.025e8)), 0.1);
        let lattice = Lattice::from_sequence(&seq).unwrap();
        match tracker.propagate(&mut probe, &lattice) {
            Err(ModelError::Numerical(_)) => {}
            other => panic!("Unexpected result: {other:?}"),
        }
        assert_eq!(probe.kinetic_energy(), 2.5e6);
        assert!((probe.position() - 0.1).abs() < 1e-12);
        assert!(probe.last_gap().is_none());
        assert_eq!(probe.trajectory().len(), 1);
    }

    #[test]
    fn test_zero_etl_gap_is_identity() {
        let tracker = Tracker::new(ProbeKind::Envelope);
        let mut probe = Probe::envelope(Species::proton(), 2.5e6, waist_beam());
        let before = probe.covariance().unwrap();
        tracker
            .propagate_element(&mut probe, &Element::rf_gap("g", RfGap::new(0.0, -PI / 2.0, 4.025e8)))
            .unwrap();
        assert_eq!(probe.covariance().unwrap(), before);
        assert_eq!(probe.kinetic_energy(), 2.5e6);
        assert_eq!(probe.response_map().unwrap(), PhaseMatrix::identity());
        assert!(probe.last_gap().is_some());
    }

    #[test]
    fn test_start_and_stop_elements() {
        let mut tracker = Tracker::new(ProbeKind::Particle);
        tracker.set_range(Some("q1"), Some("d1"), true);
        let lattice = drift_lattice();
        let mut probe = Probe::particle(Species::proton(), 2.5e6, PhaseVector::zero());
        tracker.propagate(&mut probe, &lattice).unwrap();
        let ids: Vec<&str> = probe
            .trajectory()
            .iter()
            .map(|s| s.element_id.as_str())
            .collect();
        assert_eq!(ids, ["q1", "mid:drift", "mid", "d1"]);

        tracker.set_range(Some("q1"), Some("d1"), false);
        let mut probe = Probe::particle(Species::proton(), 2.5e6, PhaseVector::zero());
        tracker.propagate(&mut probe, &lattice).unwrap();
        assert_eq!(probe.trajectory().final_state().unwrap().element_id, "mid");

        tracker.set_range(Some("nowhere"), None, true);
        match tracker.propagate(&mut probe, &lattice) {
            Err(ModelError::Config(msg)) => assert!(msg.contains("nowhere")),
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_space_charge_enlarges_waist_beam() {
        let drift = Element::drift("d", 0.5);
        let mut results = Vec::new();
        for current in [0.0, 0.05] {
            let tracker = Tracker::new(ProbeKind::Envelope);
            let mut probe = Probe::envelope(Species::proton(), 2.5e6, waist_beam())
                .with_beam_current(current);
            tracker.propagate_element(&mut probe, &drift).unwrap();
            results.push(probe.covariance().unwrap().rms_sizes());
        }
        for plane in 0..3 {
            assert!(results[1][plane] > results[0][plane], "plane {plane}");
        }
    }

    #[test]
    fn test_space_charge_switch_disables_kick() {
        let drift = Element::drift("d", 0.5);
        let mut tracker = Tracker::new(ProbeKind::Envelope);
        tracker.set_space_charge(false);
        let mut with_current =
            Probe::envelope(Species::proton(), 2.5e6, waist_beam()).with_beam_current(0.05);
        let mut without = Probe::envelope(Species::proton(), 2.5e6, waist_beam());
        tracker.propagate_element(&mut with_current, &drift).unwrap();
        tracker.propagate_element(&mut without, &drift).unwrap();
        assert!(with_current
            .covariance()
            .unwrap()
            .matrix()
            .approx_eq(without.covariance().unwrap().matrix(), 1e-20));
    }

    #[test]
    fn test_ensemble_moments_follow_envelope() {
        let twiss = waist_beam().twiss();
        let particles = ensemble::gaussian_ensemble(&twiss, 400, 3);
        let cov = ensemble::covariance(&particles);
        let tracker_e = Tracker::new(ProbeKind::Ensemble);
        let tracker_v = Tracker::new(ProbeKind::Envelope);
        let mut ens = Probe::ensemble(Species::proton(), 2.5e6, particles);
        let mut env = Probe::envelope(Species::proton(), 2.5e6, cov);
        let lattice = drift_lattice();
        tracker_e.propagate(&mut ens, &lattice).unwrap();
        tracker_v.propagate(&mut env, &lattice).unwrap();
        assert!(ens
            .covariance()
            .unwrap()
            .matrix()
            .approx_eq(env.covariance().unwrap().matrix(), 1e-15));
    }

    #[test]
    fn test_ensemble_members_see_their_own_charge_to_mass() {
        let tracker = Tracker::new(ProbeKind::Ensemble);
        let quad = Element::quadrupole("q", 0.1, 8.0);
        let v = PhaseVector::new(1e-3, 0.0, -1e-3, 0.0, 0.0, 0.0);
        let particles = vec![
            MacroParticle::new(v),
            MacroParticle::new(v).with_species_ratio(0.5, 1.0),
            MacroParticle::new(v).with_species_ratio(2.0, 2.0),
        ];
        let mut ens = Probe::ensemble(Species::proton(), 2.5e6, particles);
        tracker.propagate_element(&mut ens, &quad).unwrap();
        let moved = ens.particles().unwrap();

        let single = |species: Species, energy: f64| {
            let tracker = Tracker::new(ProbeKind::Particle);
            let mut probe = Probe::particle(species, energy, v);
            tracker.propagate_element(&mut probe, &quad).unwrap();
            probe.phase_coordinates().unwrap()
        };
        let half_charge = single(Species::new(0.5, PROTON_REST_ENERGY), 2.5e6);
        assert!(moved[1].coords.approx_eq(&half_charge, 1e-15));
        assert!((moved[0].coords.coords()[1] - moved[1].coords.coords()[1]).abs() > 1e-6);
        // equal q/m at equal velocity follows the reference orbit
        assert!(moved[2].coords.approx_eq(&moved[0].coords, 1e-15));
    }

    #[test]
    fn test_lead_in_drift_is_transported() {
        let tracker = Tracker::new(ProbeKind::Particle);
        let mut probe = Probe::particle(
            Species::proton(),
            2.5e6,
            PhaseVector::new(1e-3, 1e-3, 0.0, 0.0, 0.0, 0.0),
        );
        let mut seq = Sequence::new("line");
        seq.add_element(Element::marker("bpm"), 0.3)
            .add_element(Element::drift("d", 0.2), 0.3)
            .add_element(Element::marker("end"), 0.5);
        tracker
            .propagate(&mut probe, &Lattice::from_sequence(&seq).unwrap())
            .unwrap();
        let bpm = probe.trajectory().state_for_element("bpm").unwrap();
        assert!((bpm.position - 0.3).abs() < 1e-12);
        match bpm.data {
            StateData::Particle(v) => assert!((v.coords()[0] - 1.3e-3).abs() < 1e-15),
            ref other => panic!("Unexpected state: {other:?}"),
        }
        let end = probe.trajectory().state_for_element("end").unwrap();
        assert!((end.position - 0.5).abs() < 1e-12);
        assert!((probe.phase_coordinates().unwrap().coords()[0] - 1.5e-3).abs() < 1e-15);
    }

    #[test]
    fn test_phase_continues_with_exit_velocity_of_accelerating_gap() {
        let frequency = 4.025e8;
        let lambda = 2.997_924_58e8 / frequency;
        let design = -PI / 6.0;
        let tracker = Tracker::new(ProbeKind::TransferMap);
        let mut probe = Probe::transfer_map(Species::proton(), 2.5e6);
        let entry_beta = probe.beta();
        let mut seq = Sequence::new("cav");
        seq.add_element(
            Element::rf_gap("g1", RfGap::new(3.0e5, design, frequency).as_first_gap()),
            0.0,
        )
        .add_element(Element::rf_gap("g2", RfGap::new(0.0, 1.0, frequency)), 0.08);
        tracker
            .propagate(&mut probe, &Lattice::from_sequence(&seq).unwrap())
            .unwrap();

        let after_first = probe.trajectory().state_for_element("g1").unwrap();
        assert!(after_first.kinetic_energy > 2.5e6 + 2.0e5);
        let exit_beta = after_first.beta();
        let expected = design + 2.0 * PI * 0.08 / (lambda * exit_beta);
        let with_entry_beta = design + 2.0 * PI * 0.08 / (lambda * entry_beta);
        let record = probe.last_gap().unwrap();
        assert!((record.phase - expected).abs() < 1e-9, "phase {}", record.phase);
        assert!((record.phase - with_entry_beta).abs() > 0.1);
    }

    #[test]
    fn test_octupole_kick_is_cubic() {
        let tracker = Tracker::new(ProbeKind::Particle);
        let oct = Element::octupole("o", 0.2, 2.0e3);
        let drift = Element::drift("d", 0.2);
        let run = |element: &Element, x: f64| {
            let mut probe = Probe::particle(
                Species::proton(),
                2.5e6,
                PhaseVector::new(x, 0.0, 0.0, 0.0, 0.0, 0.0),
            );
            tracker.propagate_element(&mut probe, element).unwrap();
            probe.phase_coordinates().unwrap().coords()
        };
        let on_axis = run(&oct, 0.0);
        assert_eq!(on_axis, [0.0; 6]);
        let small = run(&oct, 1e-3)[1] - run(&drift, 1e-3)[1];
        let large = run(&oct, 2e-3)[1] - run(&drift, 2e-3)[1];
        assert!(small != 0.0);
        assert!((large / small - 8.0).abs() < 1e-3, "ratio {}", large / small);
    }

    #[test]
    fn test_misaligned_octupole_kicks_about_its_axis() {
        let tracker = Tracker::new(ProbeKind::Particle);
        let oct = Element::octupole("o", 0.2, 2.0e3).with_alignment(Alignment::new(1e-3, 0.0, 0.0));
        let mut probe = Probe::particle(
            Species::proton(),
            2.5e6,
            PhaseVector::new(1e-3, 0.0, 0.0, 0.0, 0.0, 0.0),
        );
        tracker.propagate_element(&mut probe, &oct).unwrap();
        let c = probe.phase_coordinates().unwrap().coords();
        assert!((c[0] - 1e-3).abs() < 1e-15);
        assert_eq!(c[1], 0.0);
    }

    #[test]
    fn test_emittance_growth_scales_gap_focusing() {
        let gap = Element::rf_gap("g", RfGap::new(2.0e5, -PI / 6.0, 4.025e8));
        let mut tracker = Tracker::new(ProbeKind::Envelope);
        tracker.set_space_charge(false);
        let mut plain = Probe::envelope(Species::proton(), 2.5e6, waist_beam());
        tracker.propagate_element(&mut plain, &gap).unwrap();
        assert_eq!(plain.envelope_state().unwrap().growth_factors, [1.0; 3]);

        tracker.set_emittance_growth(true, EmitGrowthModel::Trace3d);
        let mut grown = Probe::envelope(Species::proton(), 2.5e6, waist_beam());
        tracker.propagate_element(&mut grown, &gap).unwrap();
        let f = grown.envelope_state().unwrap().growth_factors;
        assert!(f[0] < 1.0 && f[2] < 1.0, "factors {f:?}");
        let m_plain = plain.response_map().unwrap();
        let m_grown = grown.response_map().unwrap();
        assert!((m_grown.get(1, 0) - f[0] * m_plain.get(1, 0)).abs() < 1e-15);
        assert_eq!(m_grown.get(1, 1), m_plain.get(1, 1));
        assert_eq!(grown.kinetic_energy(), plain.kinetic_energy());
    }

    #[test]
    fn test_gap_phase_carried_between_gaps() {
        let lambda = 2.997_924_58e8 / 4.025e8;
        for (mode, extra) in [(0, 0.0), (1, PI)] {
            let tracker = Tracker::new(ProbeKind::TransferMap);
            let mut probe = Probe::transfer_map(Species::proton(), 2.5e6);
            let mut seq = Sequence::new("cav");
            seq.add_element(Element::rf_gap("g1", RfGap::new(0.0, -0.5, 4.025e8).as_first_gap()), 0.0)
                .add_element(
                    Element::rf_gap("g2", RfGap::new(0.0, 1.0, 4.025e8).with_structure_mode(mode)),
                    0.05,
                );
            let lattice = Lattice::from_sequence(&seq).unwrap();
            tracker.propagate(&mut probe, &lattice).unwrap();
            let expected = -0.5 + 2.0 * PI * 0.05 / (lambda * probe.beta()) + extra;
            let record = probe.last_gap().unwrap();
            assert!((record.phase - expected).abs() < 1e-9, "mode {mode}");
            assert!((record.position - 0.05).abs() < 1e-12);
        }
    }

    #[test]
    fn test_phase_calculation_off_uses_design_phase() {
        let mut tracker = Tracker::new(ProbeKind::TransferMap);
        tracker.set_rf_gap_phase_calculation(false);
        let mut probe = Probe::transfer_map(Species::proton(), 2.5e6);
        let mut seq = Sequence::new("cav");
        seq.add_element(Element::rf_gap("g1", RfGap::new(0.0, -0.5, 4.025e8)), 0.0)
            .add_element(Element::rf_gap("g2", RfGap::new(0.0, 1.0, 4.025e8)), 0.05);
        tracker
            .propagate(&mut probe, &Lattice::from_sequence(&seq).unwrap())
            .unwrap();
        assert_eq!(probe.last_gap().unwrap().phase, 1.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut tracker = Tracker::new(ProbeKind::Envelope);
        tracker.set_step_size(0.01).unwrap();
        tracker.set_space_charge(false);
        tracker.set_emittance_growth(true, EmitGrowthModel::Uniform3d);
        tracker.set_rf_gap_phase_calculation(false);
        tracker.set_update_policy(UpdatePolicy::EntranceAndExit);
        tracker.set_range(Some("q1"), None, false);

        let mut root = DataNode::new("root");
        tracker.save(&mut root);
        let node = root.required_child(NODETAG_ALGORITHM).unwrap();
        assert_eq!(node.attribute("type"), Some("EnvelopeTracker"));
        assert_eq!(node.int_value("ver").unwrap(), Some(TRACKER_VERSION));

        let restored = Tracker::new_instance(node).unwrap();
        assert_eq!(restored.kind(), ProbeKind::Envelope);
        assert_eq!(restored.settings(), tracker.settings());
    }

    #[test]
    fn test_load_rejects_bad_archives() {
        let mut wrong = DataNode::new("probe");
        wrong.set_string("type", "EnvelopeTracker");
        assert!(matches!(
            Tracker::new_instance(&wrong),
            Err(ModelError::DataFormat { .. })
        ));

        let untyped = DataNode::new(NODETAG_ALGORITHM);
        match Tracker::new_instance(&untyped) {
            Err(ModelError::Config(msg)) => assert!(msg.contains("type")),
            other => panic!("Unexpected result: {other:?}"),
        }

        let mut unknown = DataNode::new(NODETAG_ALGORITHM);
        unknown.set_string("type", "TwissTracker");
        match Tracker::new_instance(&unknown) {
            Err(ModelError::Config(msg)) => assert!(msg.contains("TwissTracker")),
            other => panic!("Unexpected result: {other:?}"),
        }

        let mut no_options = DataNode::new(NODETAG_ALGORITHM);
        no_options.set_string("type", "ParticleTracker");
        no_options.create_child(NODETAG_TRACKER);
        match Tracker::new_instance(&no_options) {
            Err(ModelError::DataFormat { field, .. }) => assert_eq!(field, NODETAG_OPTIONS),
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_failed_load_keeps_settings() {
        let mut tracker = Tracker::new(ProbeKind::Particle);
        let mut root = DataNode::new("root");
        tracker.save(&mut root);
        let mut node = root.children.remove(0);
        node.children[1].set_string("stepsize", "-1");
        assert!(tracker.load(&node).is_err());
        assert_eq!(tracker.settings(), &TrackerSettings::default());
    }
}
