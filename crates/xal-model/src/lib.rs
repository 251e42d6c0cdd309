//! Online-model propagation engine.
//!
//! Probes carry the beam state, elements and lattices describe the
//! beamline, and a tracker advances the probe element by element while
//! recording its trajectory.

pub mod archive;
pub mod element;
pub mod emittance;
pub mod ensemble;
pub mod lattice;
pub mod probe;
pub mod rf_gap;
pub mod space_charge;
pub mod tracker;
pub mod trajectory;
