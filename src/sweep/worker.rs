//! The fixed job entry point.
//!
//! `resweep run-job <descriptor>` loads the descriptor, evaluates the one
//! combination it names and writes exactly one record. A failed evaluation
//! writes nothing, so the reducer sees the job as missing.

use std::path::Path;

use tracing::info;

use crate::backend::Backend;
use crate::config::SweepConfig;
use crate::error::Result;
use crate::evaluation::{AggregateScores, JobRecord, ReplicatedEvaluator};
use crate::store::{JobStore, open_store};
use crate::sweep::dispatch::JobDescriptor;
use crate::sweep::strategy::StrategySpec;
use crate::types::Dataset;

/// Evaluate the job and persist its record.
pub fn run_job<B: Backend + ?Sized>(
    descriptor: &JobDescriptor,
    dataset: &Dataset,
    backend: &B,
    store: &dyn JobStore,
) -> Result<JobRecord> {
    let key = descriptor.key();
    let spec = descriptor.strategy_spec()?;
    info!(key = %key, combination = %descriptor.combination, "running job");

    let scores = ReplicatedEvaluator::new(backend, &descriptor.evaluation).evaluate(dataset, &spec)?;
    let record = JobRecord {
        key,
        combination: descriptor.combination.clone(),
        scores,
    };
    store.put(&record)?;
    info!(key = %record.key, "job record stored");
    Ok(record)
}

/// Everything `run-job` does: load, connect, evaluate, store.
pub fn run_descriptor_file(path: &Path) -> Result<JobRecord> {
    let descriptor = JobDescriptor::load(path)?;
    let dataset = descriptor.dataset.load()?;
    let store = open_store(&descriptor.store)?;
    let backend = descriptor.backend.connect();
    run_job(&descriptor, &dataset, &backend, store.as_ref())
}

/// The no-resampling reference: same replicates and seeds, the configured
/// baseline learner, no store.
pub fn evaluate_baseline<B: Backend + ?Sized>(
    config: &SweepConfig,
    dataset: &Dataset,
    backend: &B,
) -> Result<AggregateScores> {
    let spec = StrategySpec::baseline(config.baseline.clone());
    Ok(ReplicatedEvaluator::new(backend, &config.evaluation).evaluate(dataset, &spec)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::StubBackend;
    use crate::error::{Error, Stage};
    use crate::evaluation::fixtures::synthetic_dataset;
    use crate::store::FileJobStore;
    use crate::sweep::dispatch::{DispatchOptions, SweepDispatcher};
    use crate::sweep::reduce::ResultReducer;
    use crate::sweep::scheduler::testing::RecordingScheduler;
    use crate::sweep::strategy::StrategyKind;
    use crate::types::JobKey;

    fn small_config(dir: &Path) -> SweepConfig {
        let content = r#"
            strategies = ["RO", "REBAGG-RO"]
            replicates = 3
            per-bin-test-size = 10
            [dataset]
            path = "features.csv"
            target = "topt"
            [ensemble]
            ensemble-models = 4
        "#;
        SweepConfig::from_toml(content, dir).unwrap()
    }

    fn descriptor(config: &SweepConfig, kind: StrategyKind, index: usize) -> JobDescriptor {
        let plan = SweepDispatcher::new(config).plan(Some(&[kind])).unwrap();
        plan.jobs[index].clone()
    }

    #[test]
    fn test_job_writes_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(dir.path());
        let store = FileJobStore::new(dir.path().join("jobs"));
        let data = synthetic_dataset(500, 9);
        let job = descriptor(&cfg, StrategyKind::Ro, 4);

        let record = run_job(&job, &data, &StubBackend::default(), &store).unwrap();
        assert_eq!(record.key, JobKey::new("RO", 4));
        assert_eq!(record.scores.replicates, 3);
        let stored = store.get(&record.key).unwrap().unwrap();
        assert_eq!(stored.combination, job.combination);
        assert_eq!(stored.scores.r2.mean.to_bits(), record.scores.r2.mean.to_bits());
    }

    #[test]
    fn test_ensemble_job_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(dir.path());
        let store = FileJobStore::new(dir.path().join("jobs"));
        let data = synthetic_dataset(500, 10);
        let job = descriptor(&cfg, StrategyKind::RebaggRo, 0);

        let record = run_job(&job, &data, &StubBackend::default(), &store).unwrap();
        assert_eq!(record.key, JobKey::new("REBAGG-RO", 0));
        assert_eq!(record.scores.n_bins(), 5);
    }

    #[test]
    fn test_failed_job_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(dir.path());
        let store = FileJobStore::new(dir.path().join("jobs"));
        let data = synthetic_dataset(500, 11);
        let job = descriptor(&cfg, StrategyKind::Ro, 2);

        let backend = StubBackend::failing(Stage::Predict, 1);
        let err = run_job(&job, &data, &backend, &store).unwrap_err();
        assert!(matches!(err, Error::Evaluation(ref f) if f.replicate == 1), "got {err}");
        assert!(!store.contains(&job.key()).unwrap());
    }

    #[test]
    fn test_baseline_uses_configured_replicates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(dir.path());
        let data = synthetic_dataset(500, 12);
        let backend = StubBackend::default();

        let scores = evaluate_baseline(&cfg, &data, &backend).unwrap();
        assert_eq!(scores.replicates, 3);
        assert_eq!(backend.count(Stage::Resample), 0);
        assert_eq!(backend.count(Stage::Fit), 3);
    }

    #[test]
    fn test_sweep_with_one_lost_job_reduces_to_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let content = r#"
            strategies = ["RO"]
            replicates = 2
            per-bin-test-size = 10
            [dataset]
            path = "features.csv"
            target = "topt"
        "#;
        let cfg = SweepConfig::from_toml(content, dir.path()).unwrap();
        let data = synthetic_dataset(400, 13);
        let lost = 11;

        let dispatcher = SweepDispatcher::new(&cfg);
        let plan = dispatcher.plan(None).unwrap();
        let scheduler = RecordingScheduler::default();
        dispatcher
            .dispatch(&plan, &scheduler, DispatchOptions::default())
            .unwrap();
        let submitted = scheduler.submitted.borrow().clone();
        assert_eq!(submitted.len(), 18);

        // Every job but one runs from its descriptor file
        for (key, path) in &submitted {
            if *key == JobKey::new("RO", lost) {
                continue;
            }
            let job = JobDescriptor::load(path).unwrap();
            assert_eq!(job.key(), *key);
            let store = open_store(&job.store).unwrap();
            run_job(&job, &data, &StubBackend::default(), store.as_ref()).unwrap();
        }

        let store = open_store(&cfg.store).unwrap();
        let expected = &plan.expected[&StrategyKind::Ro];
        let err = ResultReducer::new(store.as_ref())
            .reduce("RO", expected)
            .unwrap_err();
        let Error::PartialResult(partial) = &err else {
            panic!("expected a partial result, got {err}");
        };
        assert_eq!(partial.expected, 18);
        assert_eq!(partial.missing, vec![JobKey::new("RO", lost)]);

        // Resubmitting only what is missing picks up exactly the lost job
        let rerun = RecordingScheduler::default();
        let report = dispatcher
            .dispatch(
                &plan,
                &rerun,
                DispatchOptions {
                    skip_completed: Some(store.as_ref()),
                    dry_run: false,
                },
            )
            .unwrap();
        assert_eq!(report.submitted.len(), 1);
        assert_eq!(report.submitted[0].0, JobKey::new("RO", lost));
        assert_eq!(report.skipped.len(), 17);

        let (_, path) = rerun.submitted.borrow()[0].clone();
        let job = JobDescriptor::load(&path).unwrap();
        run_job(&job, &data, &StubBackend::default(), store.as_ref()).unwrap();
        let table = ResultReducer::new(store.as_ref())
            .reduce("RO", expected)
            .unwrap();
        assert_eq!(table.rows.len(), 18);
        assert_eq!(table.rows[lost].combination, expected[lost]);
    }
}
