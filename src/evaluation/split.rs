//! Stratified train/test partitioning with a uniform test distribution.
//!
//! The natural target distribution is skewed: extreme values are rare. A
//! population-proportional test set would barely contain them, and every
//! aggregate metric would be insensitive to how the model does there. So
//! the test set draws the same number of samples from every bin instead.
//!
//! ```text
//! bins:       [ <30 ][30,50)[50,65)[65,85)[ ≥85 ]
//! available:    212   1340    890    410     65
//! test (70):     70     70     70     70     65   ← short bin: take all
//! train:       rest of the indices, ascending
//! ```
//!
//! Short bins are a warning, not an error. Downstream statistics must not
//! assume the test set is exactly balanced.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use tracing::warn;

use crate::types::{BinEdges, Dataset};

/// A bin that held fewer samples than requested for the test set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortBin {
    pub bin: usize,
    pub available: usize,
    pub requested: usize,
}

/// Disjoint train/test index sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Indices not drawn for testing, ascending.
    pub train: Vec<usize>,
    /// Drawn indices, grouped by bin in ascending bin order.
    pub test: Vec<usize>,
    /// Bins that could not fill their quota.
    pub short_bins: Vec<ShortBin>,
}

/// Splitter configured with bin edges and a per-bin test quota.
#[derive(Debug, Clone)]
pub struct StratifiedSplitter {
    edges: BinEdges,
    per_bin_test_size: usize,
}

impl StratifiedSplitter {
    pub fn new(edges: BinEdges, per_bin_test_size: usize) -> Self {
        Self {
            edges,
            per_bin_test_size,
        }
    }

    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    pub fn split(&self, dataset: &Dataset, seed: u64) -> Split {
        split(dataset.targets(), &self.edges, self.per_bin_test_size, seed)
    }
}

/// Partition `0..targets.len()` into train and test.
///
/// One RNG seeded with `seed` draws each bin's quota in ascending bin order,
/// so the same seed always gives the same split.
pub fn split(targets: &[f64], edges: &BinEdges, per_bin_test_size: usize, seed: u64) -> Split {
    let mut pools: Vec<Vec<usize>> = vec![Vec::new(); edges.n_bins()];
    for (i, &t) in targets.iter().enumerate() {
        pools[edges.bin_of(t)].push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut in_test = vec![false; targets.len()];
    let mut test = Vec::with_capacity(per_bin_test_size * pools.len());
    let mut short_bins = Vec::new();

    for (bin, pool) in pools.iter().enumerate() {
        if pool.len() < per_bin_test_size {
            warn!(
                bin,
                available = pool.len(),
                requested = per_bin_test_size,
                "bin has fewer samples than the test quota; taking all of them"
            );
            short_bins.push(ShortBin {
                bin,
                available: pool.len(),
                requested: per_bin_test_size,
            });
            test.extend_from_slice(pool);
        } else {
            for pos in index::sample(&mut rng, pool.len(), per_bin_test_size).into_vec() {
                test.push(pool[pos]);
            }
        }
    }

    for &i in &test {
        in_test[i] = true;
    }
    let train = (0..targets.len()).filter(|&i| !in_test[i]).collect();

    Split {
        train,
        test,
        short_bins,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn edges() -> BinEdges {
        BinEdges::new(vec![30.0, 50.0, 65.0, 85.0]).unwrap()
    }

    /// Skewed targets: dense in the middle, sparse at the extremes.
    fn skewed_targets(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let u = (i as f64 + 0.5) / n as f64;
                // Steep logit keeps most mass around 45
                45.0 + 12.0 * (u / (1.0 - u)).ln()
            })
            .collect()
    }

    #[test]
    fn test_disjoint_and_covering() {
        let targets = skewed_targets(2917);
        let s = split(&targets, &edges(), 70, 3);

        let train: HashSet<_> = s.train.iter().copied().collect();
        let test: HashSet<_> = s.test.iter().copied().collect();
        assert_eq!(test.len(), s.test.len(), "test has duplicates");
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), targets.len());
    }

    #[test]
    fn test_per_bin_quota() {
        let targets = skewed_targets(2917);
        let e = edges();
        let s = split(&targets, &e, 70, 11);

        let mut available = vec![0usize; e.n_bins()];
        for &t in &targets {
            available[e.bin_of(t)] += 1;
        }
        let mut drawn = vec![0usize; e.n_bins()];
        for &i in &s.test {
            drawn[e.bin_of(targets[i])] += 1;
        }

        for bin in 0..e.n_bins() {
            assert_eq!(drawn[bin], available[bin].min(70), "bin {bin}");
        }
        assert!(s.test.len() <= 5 * 70);
    }

    #[test]
    fn test_same_seed_same_split() {
        let targets = skewed_targets(500);
        let a = split(&targets, &edges(), 20, 42);
        let b = split(&targets, &edges(), 20, 42);
        assert_eq!(a, b);

        let c = split(&targets, &edges(), 20, 43);
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_short_bin_takes_everything() {
        // Only three samples above 85
        let mut targets: Vec<f64> = (0..100).map(|i| 40.0 + (i % 10) as f64).collect();
        targets.extend([90.0, 95.0, 99.0]);

        let s = split(&targets, &edges(), 10, 0);
        assert_eq!(
            s.short_bins.iter().find(|b| b.bin == 4),
            Some(&ShortBin {
                bin: 4,
                available: 3,
                requested: 10
            })
        );
        for i in 100..103 {
            assert!(s.test.contains(&i));
        }
        // Empty bins count as short too
        assert!(s.short_bins.iter().any(|b| b.bin == 0 && b.available == 0));
    }

    #[test]
    fn test_train_is_ascending() {
        let targets = skewed_targets(300);
        let s = split(&targets, &edges(), 15, 9);
        assert!(s.train.windows(2).all(|w| w[0] < w[1]));
    }
}
