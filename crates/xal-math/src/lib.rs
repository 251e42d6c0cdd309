//! Phase-space algebra and numerical primitives for the XAL online model.

pub mod covariance;
pub mod elliptic;
pub mod linalg;
pub mod phase;
pub mod poly;
pub mod symplectic;
