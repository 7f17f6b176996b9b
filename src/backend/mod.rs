//! Seams to the resampling and regression implementations.
//!
//! The harness never looks inside a resampler or a model. It hands the
//! backend a training partition plus relevance scores and a seed, and gets
//! back either resampled data or fitted predictors:
//!
//! ```text
//! Backend
//!   ├── resample(request)        → Resampled { features, targets }
//!   ├── regressor(spec, seed)    → Box<dyn Regressor>         fit / predict / save
//!   └── ensemble(spec, seed)     → Box<dyn EnsembleRegressor> fit(+relevance) / predict / save
//! ```
//!
//! `save` persists a fitted model in whatever format the backend uses;
//! the harness only chooses the path.
//!
//! [`ProcessBackend`] drives an external program over newline-delimited
//! JSON. Tests use in-process doubles from the `testing` module.

mod process;

pub use process::ProcessBackend;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::sweep::strategy::{EnsembleSpec, RegressorSpec, ResampleSpec};
use crate::types::Matrix;

/// How to launch the backend program. Part of every job descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendSettings {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            program: "resweep-backend".into(),
            args: Vec::new(),
        }
    }
}

impl BackendSettings {
    /// A backend that starts the program on first use.
    pub fn connect(&self) -> ProcessBackend {
        ProcessBackend::new(self.program.clone(), self.args.clone())
    }
}

/// Inputs for one resampling pass over a training partition.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResampleRequest<'a> {
    pub features: &'a Matrix,
    pub targets: &'a [f64],
    /// Relevance of each target, at the strategy's bounds.
    pub relevance: &'a [f64],
    pub spec: &'a ResampleSpec,
    pub seed: u64,
}

/// A resampled training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resampled {
    pub features: Matrix,
    pub targets: Vec<f64>,
}

pub trait Regressor {
    fn fit(&mut self, features: &Matrix, targets: &[f64]) -> Result<(), BackendError>;
    fn predict(&self, features: &Matrix) -> Result<Vec<f64>, BackendError>;
    fn save(&self, path: &Path) -> Result<(), BackendError>;
}

/// A bagging ensemble that resamples each bag using relevance scores.
pub trait EnsembleRegressor {
    fn fit(
        &mut self,
        features: &Matrix,
        targets: &[f64],
        relevance: &[f64],
    ) -> Result<(), BackendError>;
    fn predict(&self, features: &Matrix) -> Result<Vec<f64>, BackendError>;
    fn save(&self, path: &Path) -> Result<(), BackendError>;
}

pub trait Backend {
    fn resample(&self, request: &ResampleRequest<'_>) -> Result<Resampled, BackendError>;

    fn regressor(
        &self,
        spec: &RegressorSpec,
        seed: u64,
    ) -> Result<Box<dyn Regressor + '_>, BackendError>;

    fn ensemble(
        &self,
        spec: &EnsembleSpec,
        seed: u64,
    ) -> Result<Box<dyn EnsembleRegressor + '_>, BackendError>;
}
