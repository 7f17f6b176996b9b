//! Error types for the sweep harness.
//!
//! | Error               | Scope                | Raised by                          |
//! |---------------------|----------------------|------------------------------------|
//! | `ConfigError`       | fatal, before jobs   | bounds, bin edges, grids, datasets |
//! | `EvaluationFailure` | fatal to one job     | the replicate loop                 |
//! | `PartialResultError`| fatal to a reduction | the result reducer                 |
//! | `StoreError`        | job storage          | file and redb stores               |
//!
//! Undefined per-bin metrics are not errors: they travel as NaN.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::JobKey;

/// Invalid configuration, detected before any job runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("relevance bounds: at least one of `low` and `high` must be set")]
    MissingRelevanceBounds,

    #[error("relevance bounds: low ({low}) must be below high ({high})")]
    InvertedRelevanceBounds { low: f64, high: f64 },

    #[error("bin edges must not be empty")]
    EmptyBinEdges,

    #[error("bin edges must be strictly increasing: edge {index} ({value}) follows {previous}")]
    NonIncreasingBinEdges {
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    #[error("strategy {strategy}: {message}")]
    InvalidParameter { strategy: String, message: String },

    #[error("dataset: {0}")]
    Dataset(String),

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn parameter(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            strategy: strategy.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by the external resampling/regression backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to launch backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend exited with {status}")]
    Exit { status: String },

    #[error("backend I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed backend response: {0}")]
    Protocol(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),
}

/// Stage of a replicate in which the backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resample,
    Fit,
    Predict,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Resample => "resample",
            Stage::Fit => "fit",
            Stage::Predict => "predict",
        })
    }
}

/// A replicate failed; the whole combination is abandoned.
#[derive(Debug, Error)]
#[error("replicate {replicate} failed during {stage}: {source}")]
pub struct EvaluationFailure {
    pub replicate: usize,
    pub stage: Stage,
    #[source]
    pub source: BackendError,
}

/// Some expected job records are absent from the store.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{strategy}: {} of {expected} job results missing ({})", missing.len(), format_keys(missing))]
pub struct PartialResultError {
    pub strategy: String,
    pub expected: usize,
    pub missing: Vec<JobKey>,
}

fn format_keys(keys: &[JobKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Durable job storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode job record: {0}")]
    Codec(#[from] bincode::Error),

    #[error("job store database: {0}")]
    Database(#[from] redb::Error),

    #[error("stored record format {found} is not supported (expected {expected})")]
    Format { found: u32, expected: u32 },
}

/// Top-level error for library operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationFailure),

    #[error(transparent)]
    PartialResult(#[from] PartialResultError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("record for {key} holds combination {found}, expected {expected}")]
    RecordMismatch {
        key: JobKey,
        expected: String,
        found: String,
    },

    #[error("scheduler: {0}")]
    Scheduler(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
