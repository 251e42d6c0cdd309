// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Archive
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Tree-structured key/value persistence.
//!
//! Model objects save into and load from any [`DataAdaptor`]: a named node
//! with string attributes and named children. [`DataNode`] is the in-memory
//! implementation; the on-disk grammar is left to whoever owns the tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xal_math::covariance::CovarianceMatrix;
use xal_math::phase::{PhaseMatrix, PhaseVector, DIM};
use xal_types::error::{ModelError, ModelResult};

use crate::probe::{Dynamics, EnvelopeState, MacroParticle, Probe, ProbeKind, Species};

pub trait DataAdaptor {
    fn name(&self) -> &str;

    fn attribute(&self, key: &str) -> Option<&str>;

    fn set_attribute(&mut self, key: &str, value: String);

    /// Children named `name`, in insertion order.
    fn children(&self, name: &str) -> Vec<&dyn DataAdaptor>;

    fn create_child(&mut self, name: &str) -> &mut dyn DataAdaptor;

    fn child(&self, name: &str) -> Option<&dyn DataAdaptor> {
        self.children(name).into_iter().next()
    }

    fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    /// Child `name`, or a data-format error naming it.
    fn required_child(&self, name: &str) -> ModelResult<&dyn DataAdaptor> {
        self.child(name)
            .ok_or_else(|| ModelError::data_format(name, "missing data node"))
    }

    /// Attribute `key`, or a configuration error naming it.
    fn required_attribute(&self, key: &str) -> ModelResult<&str> {
        self.attribute(key).ok_or_else(|| {
            ModelError::Config(format!(
                "missing required parameter '{key}' in node '{}'",
                self.name()
            ))
        })
    }

    fn string_value(&self, key: &str) -> Option<String> {
        self.attribute(key).map(str::to_string)
    }

    fn double_value(&self, key: &str) -> ModelResult<Option<f64>> {
        parse_attr(self.attribute(key), key, "a number")
    }

    fn long_value(&self, key: &str) -> ModelResult<Option<i64>> {
        parse_attr(self.attribute(key), key, "an integer")
    }

    fn int_value(&self, key: &str) -> ModelResult<Option<i32>> {
        parse_attr(self.attribute(key), key, "an integer")
    }

    fn boolean_value(&self, key: &str) -> ModelResult<Option<bool>> {
        match self.attribute(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(ModelError::data_format(
                    key,
                    format!("expected true or false, got '{raw}'"),
                )),
            },
        }
    }

    /// Comma-separated list of numbers.
    fn double_array(&self, key: &str) -> ModelResult<Option<Vec<f64>>> {
        let Some(raw) = self.attribute(key) else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        raw.split(',')
            .map(|item| {
                item.trim().parse::<f64>().map_err(|_| {
                    ModelError::data_format(key, format!("'{}' is not a number", item.trim()))
                })
            })
            .collect::<ModelResult<Vec<f64>>>()
            .map(Some)
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.set_attribute(key, value.to_string());
    }

    fn set_double(&mut self, key: &str, value: f64) {
        self.set_attribute(key, value.to_string());
    }

    fn set_long(&mut self, key: &str, value: i64) {
        self.set_attribute(key, value.to_string());
    }

    fn set_int(&mut self, key: &str, value: i32) {
        self.set_attribute(key, value.to_string());
    }

    fn set_boolean(&mut self, key: &str, value: bool) {
        self.set_attribute(key, value.to_string());
    }

    fn set_double_array(&mut self, key: &str, values: &[f64]) {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.set_attribute(key, joined);
    }
}

fn parse_attr<T: std::str::FromStr>(
    raw: Option<&str>,
    key: &str,
    expected: &str,
) -> ModelResult<Option<T>> {
    match raw {
        None => Ok(None),
        Some(text) => text
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ModelError::data_format(key, format!("expected {expected}, got '{text}'"))),
    }
}

/// In-memory archive node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<DataNode>,
}

impl DataNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn read_file(path: &str) -> ModelResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn write_file(&self, path: &str) -> ModelResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl DataAdaptor for DataNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn set_attribute(&mut self, key: &str, value: String) {
        self.attributes.insert(key.to_string(), value);
    }

    fn children(&self, name: &str) -> Vec<&dyn DataAdaptor> {
        self.children
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c as &dyn DataAdaptor)
            .collect()
    }

    fn create_child(&mut self, name: &str) -> &mut dyn DataAdaptor {
        self.children.push(DataNode::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }
}

// ── Probe persistence ────────────────────────────────────────────────

pub const NODETAG_PROBE: &str = "probe";

fn matrix_values(m: &PhaseMatrix) -> Vec<f64> {
    m.as_array().iter().flatten().copied().collect()
}

fn matrix_from_values(values: &[f64], key: &str) -> ModelResult<PhaseMatrix> {
    if values.len() != DIM * DIM {
        return Err(ModelError::data_format(
            key,
            format!("expected {} entries, got {}", DIM * DIM, values.len()),
        ));
    }
    let mut data = [[0.0; DIM]; DIM];
    for (i, row) in data.iter_mut().enumerate() {
        row.copy_from_slice(&values[i * DIM..(i + 1) * DIM]);
    }
    Ok(PhaseMatrix::from_array(data))
}

fn vector_from_values(values: &[f64], key: &str) -> ModelResult<PhaseVector> {
    let coords: [f64; 6] = values.try_into().map_err(|_| {
        ModelError::data_format(key, format!("expected 6 coordinates, got {}", values.len()))
    })?;
    Ok(PhaseVector::from_coords(coords))
}

fn required_double(node: &dyn DataAdaptor, key: &str) -> ModelResult<f64> {
    node.double_value(key)?.ok_or_else(|| {
        ModelError::Config(format!(
            "missing required parameter '{key}' in node '{}'",
            node.name()
        ))
    })
}

fn required_array(node: &dyn DataAdaptor, key: &str) -> ModelResult<Vec<f64>> {
    node.double_array(key)?.ok_or_else(|| {
        ModelError::Config(format!(
            "missing required parameter '{key}' in node '{}'",
            node.name()
        ))
    })
}

/// Write `probe` as a `probe` child of `parent`.
pub fn save_probe(probe: &Probe, parent: &mut dyn DataAdaptor) {
    let node = parent.create_child(NODETAG_PROBE);
    node.set_string("type", probe.kind().name());

    let species = node.create_child("species");
    species.set_double("charge", probe.species().charge);
    species.set_double("restEnergy", probe.species().rest_energy);

    let state = node.create_child("state");
    state.set_double("W", probe.kinetic_energy());
    state.set_double("s", probe.position());
    state.set_double("t", probe.time());
    state.set_double("current", probe.beam_current());
    state.set_double("freq", probe.bunch_frequency());

    match probe.dynamics() {
        Dynamics::Particle(v) => {
            node.create_child("coordinates")
                .set_double_array("values", &v.coords());
        }
        Dynamics::Envelope(env) => {
            node.create_child("covariance")
                .set_double_array("values", &matrix_values(env.covariance.matrix()));
            node.create_child("response")
                .set_double_array("values", &matrix_values(&env.response));
        }
        Dynamics::TransferMap(m) => {
            node.create_child("map")
                .set_double_array("values", &matrix_values(m));
        }
        Dynamics::Ensemble(particles) => {
            for p in particles {
                let child = node.create_child("particle");
                child.set_double("charge", p.charge);
                child.set_double("mass", p.mass);
                child.set_double_array("coords", &p.coords.coords());
            }
        }
    }
}

/// Rebuild a probe from a `probe` node. The loaded values become the
/// probe's reset point.
pub fn load_probe(node: &dyn DataAdaptor) -> ModelResult<Probe> {
    if node.name() != NODETAG_PROBE {
        return Err(ModelError::data_format(
            node.name(),
            format!("wrong data source, expected '{NODETAG_PROBE}' node"),
        ));
    }
    let kind = ProbeKind::from_name(node.required_attribute("type")?)?;

    let species_node = node.required_child("species")?;
    let species = Species::new(
        required_double(species_node, "charge")?,
        required_double(species_node, "restEnergy")?,
    );

    let state = node.required_child("state")?;
    let kinetic_energy = required_double(state, "W")?;

    let dynamics = match kind {
        ProbeKind::Particle => {
            let values = required_array(node.required_child("coordinates")?, "values")?;
            Dynamics::Particle(vector_from_values(&values, "coordinates")?)
        }
        ProbeKind::Envelope => {
            let cov = required_array(node.required_child("covariance")?, "values")?;
            let mut env = EnvelopeState::new(CovarianceMatrix::from_matrix(matrix_from_values(
                &cov,
                "covariance",
            )?));
            if let Some(response) = node.child("response") {
                env.response = matrix_from_values(&required_array(response, "values")?, "response")?;
            }
            Dynamics::Envelope(env)
        }
        ProbeKind::TransferMap => {
            let values = required_array(node.required_child("map")?, "values")?;
            Dynamics::TransferMap(matrix_from_values(&values, "map")?)
        }
        ProbeKind::Ensemble => {
            let particles = node
                .children("particle")
                .into_iter()
                .map(|child| {
                    let coords = vector_from_values(&required_array(child, "coords")?, "coords")?;
                    Ok(MacroParticle {
                        charge: child.double_value("charge")?.unwrap_or(1.0),
                        mass: child.double_value("mass")?.unwrap_or(1.0),
                        coords,
                    })
                })
                .collect::<ModelResult<Vec<_>>>()?;
            Dynamics::Ensemble(particles)
        }
    };

    let mut probe = Probe::new(species, kinetic_energy, dynamics)
        .with_position(state.double_value("s")?.unwrap_or(0.0))
        .with_time(state.double_value("t")?.unwrap_or(0.0));
    if let Some(current) = state.double_value("current")? {
        probe = probe.with_beam_current(current);
    }
    if let Some(freq) = state.double_value("freq")? {
        probe = probe.with_bunch_frequency(freq);
    }
    Ok(probe)
}
