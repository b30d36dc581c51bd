use std::io;

use thiserror::Error;

/// Result type for maxent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for maxent operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A training event or an evaluation context is malformed.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A training parameter was rejected.
    #[error("{0}")]
    InvalidParameter(String),

    /// A parameter name is not recognized.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Nothing is left to train on.
    #[error("no training data")]
    EmptyTrainingData,

    /// A name appeared twice where a bijective table is required.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The log-likelihood decreased between two iterations.
    #[error(
        "model diverging at iteration {iteration}: log-likelihood decreased from {previous:.6} to {current:.6}"
    )]
    Diverged {
        iteration: usize,
        previous: f64,
        current: f64,
    },

    /// A persisted model is corrupt or its parts are inconsistent.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// The worker pool could not be created.
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// IO error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn invalid_event(msg: impl Into<String>) -> Self {
        Error::InvalidEvent(msg.into())
    }

    pub(crate) fn invalid_parameter(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    pub(crate) fn invalid_model(msg: impl Into<String>) -> Self {
        Error::InvalidModel(msg.into())
    }

    /// Returns `true` if training stopped because the log-likelihood decreased.
    pub fn is_divergence(&self) -> bool {
        matches!(self, Error::Diverged { .. })
    }
}
