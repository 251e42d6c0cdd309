// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Error
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe type {probe} is incompatible with the {tracker} tracker")]
    ProbeMismatch { probe: String, tracker: String },

    #[error("Singular matrix: |det| = {det:e} below tolerance {tolerance:e}")]
    SingularMatrix { det: f64, tolerance: f64 },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Data format error in field '{field}': {message}")]
    DataFormat { field: String, message: String },

    #[error("No propagation strategy for element '{element_id}' of type {element_type}")]
    UnsupportedElement {
        element_id: String,
        element_type: String,
    },

    #[error("No trajectory state recorded for element '{0}'")]
    MissingState(String),

    #[error("Probe type {0} has no transfer-map representation")]
    NoTransferMap(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Shorthand for a [`ModelError::DataFormat`] naming the offending field.
    pub fn data_format(field: &str, message: impl Into<String>) -> Self {
        ModelError::DataFormat {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Reject NaN and infinite inputs, naming the offending quantity.
pub fn ensure_finite(value: f64, label: &str) -> ModelResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::Numerical(format!(
            "{label} must be finite, got {value}"
        )))
    }
}

/// Reject values that are not strictly positive and finite.
pub fn ensure_positive(value: f64, label: &str) -> ModelResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ModelError::Config(format!(
            "{label} must be finite and > 0, got {value}"
        )))
    }
}
