//! Error type shared by every component of the training driver.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can abort a training run.
///
/// A user interrupt is deliberately absent: it is reported as
/// [`RunOutcome::Interrupted`](crate::train::RunOutcome) instead.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "stream invariant violated during {pass} pass: consumed {consumed} samples, \
         stream reports {expected}"
    )]
    StreamInvariantViolation {
        pass: &'static str,
        consumed: usize,
        expected: usize,
    },

    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("checkpoint {} is corrupt: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("average requested before any sample was accumulated")]
    DivisionByZero,

    #[error("unknown architecture '{0}'")]
    UnknownArchitecture(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;
