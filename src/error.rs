// src/error.rs

use thiserror::Error;

/// Errors raised by the trajectory PCA pipeline.
///
/// Ingestion and configuration errors abort a run before any numeric work is done.
/// Per-frame problems during reconstruction surface as [`PcaError::DegenerateGeometry`]
/// for single-frame calls and as [`crate::diagnostics::PipelineWarning`] values in batch calls.
#[derive(Debug, Error)]
pub enum PcaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("input shape error: {0}")]
    InputShape(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("degenerate geometry (frame {frame:?}): {detail}")]
    DegenerateGeometry { frame: Option<usize>, detail: String },
    #[error("numeric instability: {0}")]
    NumericInstability(String),
    #[error("linear algebra failure: {0}")]
    Linalg(String),
    #[error("model not fitted: {0}")]
    NotFitted(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type PcaResult<T> = Result<T, PcaError>;

impl PcaError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        PcaError::Parse {
            line,
            message: message.into(),
        }
    }
}

impl From<ndarray::ShapeError> for PcaError {
    fn from(err: ndarray::ShapeError) -> Self {
        PcaError::InputShape(err.to_string())
    }
}
