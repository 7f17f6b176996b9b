//! resweep - Parameter sweeps for imbalanced-regression resampling
//!
//! Evaluates resampling strategies (random oversampling, SMOTER, Gaussian
//! noise, WERCS, REBAGG ensembles) against a no-resampling baseline with
//! repeated Monte Carlo cross-validation, distributed as one batch job per
//! hyperparameter combination.
//!
//! # Architecture
//!
//! ```text
//! Config → Grid Expansion → Job Descriptors → Scheduler → Workers → Job Store → Reduce
//!   ↓            ↓                 ↓              ↓          ↓          ↓          ↓
//!  toml      product order       JSON          PBS/local   MCCV      bincode     CSV
//!                                                        + backend  files/redb  tables
//! ```
//!
//! Inside a worker, each replicate splits the dataset with a uniform
//! per-bin test set, resamples only the training partition, fits, predicts
//! and scores with relevance-aware metrics. Resamplers and regressors live
//! behind the [`backend::Backend`] trait.

pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod store;
pub mod sweep;
pub mod types;

pub use config::SweepConfig;
pub use error::{
    BackendError, ConfigError, Error, EvaluationFailure, PartialResultError, Result, Stage,
    StoreError,
};
pub use evaluation::{
    AggregateScores, EvaluationSettings, JobRecord, Metric, RelevanceBounds, ReplicatedEvaluator,
    SeedScheme,
};
pub use types::{BinEdges, Dataset, JobKey, Matrix};
