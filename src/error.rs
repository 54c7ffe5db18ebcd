//! Error types for ddrfuzz.
//!
//! Network layers return `candle_core::Result` like any candle module; everything that touches
//! sequences, datasets or checkpoints returns [`Error`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Library error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Sequence has the wrong length for the model.
    #[error("invalid sequence: length {len} (expected 1..={maxlen})")]
    InvalidSequence { len: usize, maxlen: usize },

    /// Token id outside the model's vocabulary.
    #[error("token {token} at position {position} is outside the vocabulary (size {vocab_size})")]
    TokenOutOfRange {
        token: u32,
        position: usize,
        vocab_size: usize,
    },

    /// Hyperparameters or run settings are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dataset directory yielded no usable samples.
    #[error("no sample files found under {0}")]
    EmptyDataset(PathBuf),

    /// No checkpoint marker at the expected location.
    #[error("checkpoint missing: {0}")]
    CheckpointMissing(PathBuf),

    /// Checkpoint exists but cannot be used.
    #[error("checkpoint corrupt: {path}: {reason}")]
    CheckpointCorrupt { path: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tensor computation error
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CheckpointCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
