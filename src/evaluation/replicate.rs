//! Monte Carlo cross-validation of one strategy combination.
//!
//! ```text
//! for r in 0..R:
//!     seed  = base + r·stride
//!     split → (train, test)                      uniform per-bin test set
//!     train ─ resample? ─ fit ─ predict(test) ─ score
//! mean / population std over the R replicate scores
//! ```
//!
//! The same seed drives the split, the resampler and the learner of a
//! replicate. Only the training partition is ever resampled. Any backend
//! failure abandons the whole combination: no partial statistics.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::metrics::{AggregateScores, F1Config, MetricSuite, ReplicateScores};
use super::relevance::relevance;
use super::split::StratifiedSplitter;
use crate::backend::{Backend, ResampleRequest};
use crate::error::{BackendError, EvaluationFailure, Stage};
use crate::sweep::grid::Combination;
use crate::sweep::strategy::{Plan, StrategySpec};
use crate::types::{BinEdges, Dataset, JobKey};

/// Seed of replicate r is `base + r·stride`, wrapping on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedScheme {
    pub base: u64,
    pub stride: u64,
}

impl Default for SeedScheme {
    fn default() -> Self {
        Self { base: 0, stride: 1 }
    }
}

impl SeedScheme {
    pub fn seed_for(&self, replicate: usize) -> u64 {
        self.base
            .wrapping_add((replicate as u64).wrapping_mul(self.stride))
    }
}

/// Everything that fixes how a combination is evaluated, apart from the
/// strategy itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub edges: BinEdges,
    pub per_bin_test_size: usize,
    pub replicates: usize,
    pub seeds: SeedScheme,
    pub f1: F1Config,
}

/// The durable result of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: JobKey,
    pub combination: Combination,
    pub scores: AggregateScores,
}

/// Runs the replicate loop against a backend.
pub struct ReplicatedEvaluator<'a, B: Backend + ?Sized> {
    backend: &'a B,
    splitter: StratifiedSplitter,
    suite: MetricSuite,
    replicates: usize,
    seeds: SeedScheme,
}

impl<'a, B: Backend + ?Sized> ReplicatedEvaluator<'a, B> {
    pub fn new(backend: &'a B, settings: &EvaluationSettings) -> Self {
        Self {
            backend,
            splitter: StratifiedSplitter::new(settings.edges.clone(), settings.per_bin_test_size),
            suite: MetricSuite::new(settings.edges.clone(), settings.f1),
            replicates: settings.replicates,
            seeds: settings.seeds,
        }
    }

    /// Evaluate `strategy` over all replicates.
    ///
    /// On success the statistics cover exactly `replicates` runs.
    pub fn evaluate(
        &self,
        dataset: &Dataset,
        strategy: &StrategySpec,
    ) -> Result<AggregateScores, EvaluationFailure> {
        info!(
            strategy = %strategy.name,
            replicates = self.replicates,
            samples = dataset.len(),
            "evaluating"
        );

        let mut per_replicate = Vec::with_capacity(self.replicates);
        for r in 0..self.replicates {
            let scores = self.run_replicate(dataset, strategy, r)?;
            debug!(replicate = r, r2 = scores.r2, f1 = scores.f1, "replicate done");
            per_replicate.push(scores);
        }

        let aggregate = AggregateScores::aggregate(&per_replicate);
        info!(
            strategy = %strategy.name,
            r2 = aggregate.r2.mean,
            f1 = aggregate.f1.mean,
            mcc = aggregate.mcc.mean,
            "evaluation complete"
        );
        Ok(aggregate)
    }

    fn run_replicate(
        &self,
        dataset: &Dataset,
        strategy: &StrategySpec,
        replicate: usize,
    ) -> Result<ReplicateScores, EvaluationFailure> {
        let fail = |stage: Stage| {
            move |source: BackendError| EvaluationFailure {
                replicate,
                stage,
                source,
            }
        };

        let seed = self.seeds.seed_for(replicate);
        let split = self.splitter.split(dataset, seed);
        let (x_train, y_train) = dataset.subset(&split.train);
        let (x_test, y_test) = dataset.subset(&split.test);

        let y_pred = match &strategy.plan {
            Plan::Plain {
                resample,
                regressor,
            } => {
                let (x_fit, y_fit) = match resample {
                    Some(spec) => {
                        let phi = relevance(&y_train, &spec.bounds);
                        let out = self
                            .backend
                            .resample(&ResampleRequest {
                                features: &x_train,
                                targets: &y_train,
                                relevance: &phi,
                                spec,
                                seed,
                            })
                            .map_err(fail(Stage::Resample))?;
                        (out.features, out.targets)
                    }
                    None => (x_train, y_train),
                };

                let mut model = self
                    .backend
                    .regressor(regressor, seed)
                    .map_err(fail(Stage::Fit))?;
                model.fit(&x_fit, &y_fit).map_err(fail(Stage::Fit))?;
                model.predict(&x_test).map_err(fail(Stage::Predict))?
            }
            Plan::Ensemble(spec) => {
                let phi = relevance(&y_train, &spec.bounds);
                let mut model = self
                    .backend
                    .ensemble(spec, seed)
                    .map_err(fail(Stage::Fit))?;
                model
                    .fit(&x_train, &y_train, &phi)
                    .map_err(fail(Stage::Fit))?;
                model.predict(&x_test).map_err(fail(Stage::Predict))?
            }
        };

        if y_pred.len() != y_test.len() {
            return Err(fail(Stage::Predict)(BackendError::Protocol(format!(
                "{} predictions for {} test samples",
                y_pred.len(),
                y_test.len()
            ))));
        }

        Ok(self.suite.score(&y_test, &y_pred))
    }
}
