use thiserror::Error;

use crate::explanation::UpstreamError;

/// Why a feature mapping did not satisfy its disease schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("required feature `{0}` is missing")]
    Missing(String),

    #[error("feature `{feature}` has value `{value}` outside {allowed:?}")]
    OutOfDomain {
        feature: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("feature `{feature}` must be {constraint}, got {value}")]
    Constraint {
        feature: String,
        constraint: &'static str,
        value: f64,
    },
}

impl SchemaViolation {
    pub fn feature(&self) -> &str {
        match self {
            SchemaViolation::Missing(feature) => feature,
            SchemaViolation::OutOfDomain { feature, .. } => feature,
            SchemaViolation::Constraint { feature, .. } => feature,
        }
    }
}

#[derive(Debug, Error)]
pub enum XdocError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("Type error: feature `{feature}` expected {expected}, got {found}")]
    Type {
        feature: String,
        expected: &'static str,
        found: String,
    },

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("Unsupported disease type: {0}")]
    UnsupportedDisease(String),

    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    #[error("Explanation generation failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Invalid artifact {path}: {reason}")]
    Artifact { path: String, reason: String },
}

impl XdocError {
    pub(crate) fn artifact(path: impl Into<String>, reason: impl Into<String>) -> Self {
        XdocError::Artifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            XdocError::Schema(_) => "schema_error",
            XdocError::Type { .. } => "type_error",
            XdocError::ModelNotLoaded(_) => "model_not_loaded",
            XdocError::UnsupportedDisease(_) => "unsupported_disease",
            XdocError::InvalidAudience(_) => "invalid_audience",
            XdocError::Upstream(e) => e.kind(),
            XdocError::Artifact { .. } => "artifact_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, XdocError>;
