//! Statistically sound performance estimates for one strategy combination.
//!
//! ```text
//! relevance ──┐
//! split ──────┼──> replicate (MCCV loop) ──> AggregateScores
//! metrics ────┘
//! ```
//!
//! - [`relevance`]: target value → [0, 1] importance
//! - [`split`]: uniform-per-bin test sets under target skew
//! - [`metrics`]: R², MSE, relevance-weighted F1, bin MCC, per-bin MSE
//! - [`replicate`]: the repeated split → resample → fit → score loop

pub mod metrics;
pub mod relevance;
pub mod replicate;
pub mod split;

pub use metrics::{AggregateScores, F1Config, Metric, MetricSuite, MetricSummary, ReplicateScores};
pub use relevance::{RelevanceBounds, RelevanceFunction, relevance};
pub use replicate::{EvaluationSettings, JobRecord, ReplicatedEvaluator, SeedScheme};
pub use split::{ShortBin, Split, StratifiedSplitter, split};

#[cfg(test)]
pub(crate) mod fixtures {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::types::{Dataset, Matrix};

    /// Skewed targets (dense around 45, sparse tails) with one informative
    /// feature and two noise features.
    pub(crate) fn synthetic_dataset(n: usize, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(n);
        let mut targets = Vec::with_capacity(n);
        for _ in 0..n {
            let u: f64 = rng.gen_range(0.001..0.999);
            let y = 45.0 + 12.0 * (u / (1.0 - u)).ln();
            targets.push(y);
            rows.push(vec![
                y / 50.0 + rng.gen_range(-0.2..0.2),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ]);
        }
        Dataset::new(Matrix::from_rows(rows).unwrap(), targets).unwrap()
    }
}
