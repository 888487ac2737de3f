//! Error type shared by every stage of the GLM-Spectrum pipeline.
//!
//! Configuration and shape problems are fatal and name the offending
//! parameter.  Numerical degeneracies (rank-deficient designs, zero-variance
//! contrasts) are *not* errors: they surface as minimum-norm estimates and
//! NaN t-statistics inside an otherwise valid result.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("invalid configuration for `{param}`: {reason}")]
    InvalidConfiguration { param: &'static str, reason: String },

    #[error("degenerate regressor `{name}`: {reason}")]
    DegenerateRegressor { name: String, reason: String },

    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    InputShapeMismatch {
        what: &'static str,
        expected: String,
        found: String,
    },

    #[error("unknown {kind} `{name}`")]
    UnknownName { kind: &'static str, name: String },

    #[error("permutation run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model file: {0}")]
    Format(String),
}

impl GlmError {
    pub(crate) fn config(param: &'static str, reason: impl Into<String>) -> Self {
        GlmError::InvalidConfiguration { param, reason: reason.into() }
    }

    pub(crate) fn shape(
        what: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        GlmError::InputShapeMismatch {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

impl From<serde_json::Error> for GlmError {
    fn from(e: serde_json::Error) -> Self {
        GlmError::Format(e.to_string())
    }
}

impl From<ndarray::ShapeError> for GlmError {
    fn from(e: ndarray::ShapeError) -> Self {
        GlmError::Format(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GlmError>;
