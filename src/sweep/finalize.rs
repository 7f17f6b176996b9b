//! The final model: one chosen combination, fitted on every sample.
//!
//! After the sweep has picked a winner, `resweep fit-final` refits it on
//! the whole (standardized) dataset with a single seed and has the backend
//! save the model. Nothing is held out and nothing is scored. When the
//! features were standardized, the scaling is saved next to the model so
//! new samples can be transformed the same way.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::backend::{Backend, ResampleRequest};
use crate::data::Scaler;
use crate::error::{ConfigError, Error, Result};
use crate::evaluation::Metric;
use crate::evaluation::relevance::relevance;
use crate::store::JobStore;
use crate::sweep::grid::Combination;
use crate::sweep::reduce::ResultReducer;
use crate::sweep::strategy::{Plan, StrategyKind, StrategySpec};
use crate::types::{Dataset, JobKey};

/// How the combination to finalize is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// Position in the strategy's grid.
    Index(usize),
    /// Best mean of a metric over the completed sweep.
    Best(Metric),
}

/// Resolve `selection` against the expected combinations of `kind`.
///
/// `Best` reduces the strategy first, so it needs every record.
pub fn select(
    kind: StrategyKind,
    expected: &[Combination],
    selection: Selection,
    store: &dyn JobStore,
) -> Result<(JobKey, Combination)> {
    let index = match selection {
        Selection::Index(index) => index,
        Selection::Best(metric) => {
            let table = ResultReducer::new(store).reduce(kind.name(), expected)?;
            let row = table.best_by(metric).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "no {kind} combination has a defined {}",
                    metric.column()
                ))
            })?;
            expected
                .iter()
                .position(|c| *c == row.combination)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("best {kind} row is not in the grid"))
                })?
        }
    };

    let combination = expected.get(index).cloned().ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{kind} has {} combinations, no index {index}",
            expected.len()
        ))
    })?;
    Ok((JobKey::new(kind.name(), index), combination))
}

/// Fit `spec` on all of `dataset` and save the model to `path`.
///
/// Plain strategies resample the whole dataset before fitting; ensembles
/// get the raw data plus its relevance.
pub fn fit_final<B: Backend + ?Sized>(
    spec: &StrategySpec,
    dataset: &Dataset,
    backend: &B,
    seed: u64,
    path: &Path,
) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::Io {
            context: format!("creating {}", parent.display()),
            source,
        })?;
    }

    info!(
        strategy = %spec.name,
        samples = dataset.len(),
        seed,
        "fitting final model"
    );
    let features = dataset.features();
    let targets = dataset.targets();

    match &spec.plan {
        Plan::Plain {
            resample,
            regressor,
        } => {
            let resampled = match resample {
                Some(resample) => {
                    let phi = relevance(targets, &resample.bounds);
                    Some(backend.resample(&ResampleRequest {
                        features,
                        targets,
                        relevance: &phi,
                        spec: resample,
                        seed,
                    })?)
                }
                None => None,
            };
            let (x, y) = match &resampled {
                Some(r) => (&r.features, r.targets.as_slice()),
                None => (features, targets),
            };

            let mut model = backend.regressor(regressor, seed)?;
            model.fit(x, y)?;
            model.save(path)?;
        }
        Plan::Ensemble(ensemble) => {
            let phi = relevance(targets, &ensemble.bounds);
            let mut model = backend.ensemble(ensemble, seed)?;
            model.fit(features, targets, &phi)?;
            model.save(path)?;
        }
    }

    info!(path = %path.display(), "final model saved");
    Ok(path.to_path_buf())
}

/// Write `scaler` as JSON beside `model_path` (`KEY.model` → `KEY.scaler.json`).
pub fn save_scaler(scaler: &Scaler, model_path: &Path) -> Result<PathBuf> {
    let path = model_path.with_extension("scaler.json");
    let json = serde_json::to_string_pretty(scaler)?;
    fs::write(&path, json).map_err(|source| Error::Io {
        context: format!("writing {}", path.display()),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::StubBackend;
    use crate::error::Stage;
    use crate::evaluation::fixtures::synthetic_dataset;
    use crate::store::FileJobStore;
    use crate::store::fixtures::record;
    use crate::sweep::strategy::{StrategyDefaults, decode};

    fn spec(kind: StrategyKind, index: usize) -> StrategySpec {
        let combination = kind.default_grid().combination(index).unwrap();
        decode(kind, &combination, &StrategyDefaults::default()).unwrap()
    }

    fn saved_models(path: &Path) -> Vec<serde_json::Value> {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_select_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let expected = StrategyKind::Ro.default_grid().expand();

        let (key, combination) =
            select(StrategyKind::Ro, &expected, Selection::Index(13), &store).unwrap();
        assert_eq!(key, JobKey::new("RO", 13));
        assert_eq!(combination.label(), "(None, 72.2, 'extreme')");

        let err = select(StrategyKind::Ro, &expected, Selection::Index(18), &store).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid(_))), "got {err}");
    }

    #[test]
    fn test_select_best_reads_the_reduced_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let expected = StrategyKind::Ro.default_grid().expand();
        for i in 0..expected.len() {
            store.put(&record(StrategyKind::Ro, i)).unwrap();
        }

        // Fixture r2 grows with the index, mse too
        let best = |metric| {
            select(StrategyKind::Ro, &expected, Selection::Best(metric), &store)
                .unwrap()
                .0
        };
        assert_eq!(best(Metric::R2), JobKey::new("RO", 17));
        assert_eq!(best(Metric::Mse), JobKey::new("RO", 0));
    }

    #[test]
    fn test_select_best_needs_a_complete_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let expected = StrategyKind::Ro.default_grid().expand();
        store.put(&record(StrategyKind::Ro, 0)).unwrap();

        let err = select(StrategyKind::Ro, &expected, Selection::Best(Metric::F1), &store)
            .unwrap_err();
        assert!(matches!(err, Error::PartialResult(_)), "got {err}");
    }

    #[test]
    fn test_plain_strategy_resamples_everything_then_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final/RO_13.model");
        let data = synthetic_dataset(300, 4);
        let backend = StubBackend::default();

        fit_final(&spec(StrategyKind::Ro, 13), &data, &backend, 0, &path).unwrap();
        assert_eq!(backend.count(Stage::Resample), 1);
        assert_eq!(backend.count(Stage::Fit), 1);
        assert_eq!(backend.count(Stage::Predict), 0);
        assert_eq!(backend.calls.borrow()[0], (Stage::Resample, 0));
        assert_eq!(saved_models(&path).len(), 1);
    }

    #[test]
    fn test_ensemble_strategy_saves_every_bag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("REBAGG-RO_0.model");
        let data = synthetic_dataset(300, 5);
        let backend = StubBackend::default();

        fit_final(&spec(StrategyKind::RebaggRo, 0), &data, &backend, 7, &path).unwrap();
        assert_eq!(backend.count(Stage::Resample), 0);
        assert_eq!(*backend.calls.borrow(), vec![(Stage::Fit, 7)]);
        // The stub caps its bags at five
        assert_eq!(saved_models(&path).len(), 5);
    }

    #[test]
    fn test_scaler_saved_beside_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("REBAGG-RO_13.model");
        let scaler = Scaler {
            columns: vec!["ogt".into()],
            means: vec![37.5],
            scales: vec![12.0],
        };

        let path = save_scaler(&scaler, &model).unwrap();
        assert_eq!(path, dir.path().join("REBAGG-RO_13.scaler.json"));
        let back: Scaler = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, scaler);
    }

    #[test]
    fn test_backend_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("RO_0.model");
        let data = synthetic_dataset(300, 6);
        let backend = StubBackend::failing(Stage::Fit, 0);

        let err = fit_final(&spec(StrategyKind::Ro, 0), &data, &backend, 0, &path).unwrap_err();
        assert!(matches!(err, Error::Backend(_)), "got {err}");
        assert!(!path.exists());
    }
}
