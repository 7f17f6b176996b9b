//! Relevance: how much a target value matters to the application.
//!
//! Extreme values are the rare, interesting ones, so relevance is a
//! sigmoid anchored at a low and/or high threshold:
//!
//! ```text
//! high only:  φ(y) = σ( s_h · (y − high))      φ(high) = 0.5, rises toward 1
//! low only:   φ(y) = σ(−s_l · (y − low))       φ(low)  = 0.5, rises toward 1 below
//! both:       φ(y) = max(low branch, high branch)
//! ```
//!
//! ## Slope
//!
//! Each branch's slope is derived from the reference values so that the
//! median sits at relevance 0.01, i.e. `s = ln(99) / |threshold − median|`.
//! Thresholds are usually picked from percentiles of the target, so the
//! median is well away from them. When it is not, the slope falls back to
//! `ln(99) / std` and finally to 1.0.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Relevance at the median when slopes are derived from data.
const MEDIAN_RELEVANCE: f64 = 0.01;

const DEGENERATE_SPREAD: f64 = 1e-12;

/// Low/high relevance thresholds. At least one is set; `low < high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds", into = "RawBounds")]
pub struct RelevanceBounds {
    low: Option<f64>,
    high: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high: Option<f64>,
}

impl RelevanceBounds {
    pub fn new(low: Option<f64>, high: Option<f64>) -> Result<Self, ConfigError> {
        match (low, high) {
            (None, None) => Err(ConfigError::MissingRelevanceBounds),
            (Some(l), Some(h)) if !(l < h) => {
                Err(ConfigError::InvertedRelevanceBounds { low: l, high: h })
            }
            _ if low.is_some_and(|v| !v.is_finite()) || high.is_some_and(|v| !v.is_finite()) => {
                Err(ConfigError::Invalid("relevance bounds must be finite".into()))
            }
            _ => Ok(Self { low, high }),
        }
    }

    /// Only high values are relevant.
    pub fn high_only(high: f64) -> Result<Self, ConfigError> {
        Self::new(None, Some(high))
    }

    /// High-only bounds from a known-finite constant.
    pub(crate) const fn high_const(high: f64) -> Self {
        Self {
            low: None,
            high: Some(high),
        }
    }

    /// Only low values are relevant.
    pub fn low_only(low: f64) -> Result<Self, ConfigError> {
        Self::new(Some(low), None)
    }

    pub fn low(&self) -> Option<f64> {
        self.low
    }

    pub fn high(&self) -> Option<f64> {
        self.high
    }
}

impl TryFrom<RawBounds> for RelevanceBounds {
    type Error = ConfigError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        Self::new(raw.low, raw.high)
    }
}

impl From<RelevanceBounds> for RawBounds {
    fn from(b: RelevanceBounds) -> Self {
        RawBounds {
            low: b.low,
            high: b.high,
        }
    }
}

/// A relevance function whose slopes were fitted on reference values.
///
/// Fit once, then score any number of values element-wise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceFunction {
    bounds: RelevanceBounds,
    low_slope: f64,
    high_slope: f64,
}

impl RelevanceFunction {
    /// Derive slopes from `reference` (typically the values being scored).
    pub fn fit(bounds: RelevanceBounds, reference: &[f64]) -> Self {
        let stats = ReferenceStats::of(reference);
        Self {
            bounds,
            low_slope: bounds.low.map(|c| stats.slope_for(c)).unwrap_or(1.0),
            high_slope: bounds.high.map(|c| stats.slope_for(c)).unwrap_or(1.0),
        }
    }

    /// Fixed slopes, independent of any data.
    pub fn with_slope(bounds: RelevanceBounds, slope: f64) -> Self {
        Self {
            bounds,
            low_slope: slope,
            high_slope: slope,
        }
    }

    pub fn bounds(&self) -> RelevanceBounds {
        self.bounds
    }

    /// Relevance of a single value, in [0, 1].
    pub fn score(&self, value: f64) -> f64 {
        let low = self
            .bounds
            .low
            .map(|c| sigmoid(-self.low_slope * (value - c)));
        let high = self
            .bounds
            .high
            .map(|c| sigmoid(self.high_slope * (value - c)));
        match (low, high) {
            (Some(l), Some(h)) => l.max(h),
            (Some(l), None) => l,
            (None, Some(h)) => h,
            // unreachable: bounds are validated
            (None, None) => 0.0,
        }
    }

    pub fn scores(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.score(v)).collect()
    }
}

/// Relevance of every value, with slopes fitted on the values themselves.
///
/// Does not modify `values`.
pub fn relevance(values: &[f64], bounds: &RelevanceBounds) -> Vec<f64> {
    RelevanceFunction::fit(*bounds, values).scores(values)
}

/// Logistic function evaluated without overflow for large |z|.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

struct ReferenceStats {
    median: Option<f64>,
    std: f64,
}

impl ReferenceStats {
    fn of(values: &[f64]) -> Self {
        let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self {
                median: None,
                std: 0.0,
            };
        }
        finite.sort_by(f64::total_cmp);
        let n = finite.len();
        let median = if n % 2 == 1 {
            finite[n / 2]
        } else {
            0.5 * (finite[n / 2 - 1] + finite[n / 2])
        };
        let mean = finite.iter().sum::<f64>() / n as f64;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        Self {
            median: Some(median),
            std: var.sqrt(),
        }
    }

    fn slope_for(&self, center: f64) -> f64 {
        let logit = (1.0 / MEDIAN_RELEVANCE - 1.0).ln();
        let distance = self.median.map(|m| (center - m).abs()).unwrap_or(0.0);
        if distance > DEGENERATE_SPREAD {
            logit / distance
        } else if self.std > DEGENERATE_SPREAD {
            logit / self.std
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> Vec<f64> {
        (0..200).map(|i| 20.0 + 0.4 * i as f64).collect()
    }

    #[test]
    fn test_both_bounds_absent_is_config_error() {
        assert_eq!(
            RelevanceBounds::new(None, None),
            Err(ConfigError::MissingRelevanceBounds)
        );
        assert!(matches!(
            RelevanceBounds::new(Some(70.0), Some(30.0)),
            Err(ConfigError::InvertedRelevanceBounds { .. })
        ));
    }

    #[test]
    fn test_half_relevance_at_high_threshold() {
        let bounds = RelevanceBounds::high_only(72.2).unwrap();
        let f = RelevanceFunction::fit(bounds, &targets());
        assert!((f.score(72.2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_half_relevance_at_low_threshold() {
        let bounds = RelevanceBounds::low_only(30.0).unwrap();
        let f = RelevanceFunction::fit(bounds, &targets());
        assert!((f.score(30.0) - 0.5).abs() < 1e-12);
        assert!(f.score(10.0) > 0.9);
        assert!(f.score(60.0) < 0.1);
    }

    #[test]
    fn test_high_only_is_monotone_and_bounded() {
        let values = targets();
        let bounds = RelevanceBounds::high_only(65.0).unwrap();
        let scores = relevance(&values, &bounds);

        for pair in scores.windows(2) {
            assert!(pair[1] >= pair[0], "not monotone: {:?}", pair);
        }
        assert!(scores.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_median_sits_at_low_relevance() {
        let values = targets();
        let median = 0.5 * (values[99] + values[100]);
        let f = RelevanceFunction::fit(RelevanceBounds::high_only(72.2).unwrap(), &values);
        assert!((f.score(median) - MEDIAN_RELEVANCE).abs() < 1e-9);
    }

    #[test]
    fn test_two_sided_relevance() {
        let values = targets();
        let bounds = RelevanceBounds::new(Some(30.0), Some(72.2)).unwrap();
        let f = RelevanceFunction::fit(bounds, &values);

        assert!(f.score(0.0) > 0.98);
        assert!(f.score(200.0) > 0.99);
        assert!(f.score(50.0) < 0.1);
        assert!((f.score(30.0) - 0.5).abs() < 1e-9);
        assert!((f.score(72.2) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_inputs_are_stable() {
        let f = RelevanceFunction::with_slope(RelevanceBounds::high_only(65.0).unwrap(), 1e4);
        assert_eq!(f.score(1e6), 1.0);
        assert_eq!(f.score(-1e6), 0.0);
        assert!(!f.score(65.0 + 1e-9).is_nan());
    }

    #[test]
    fn test_constant_reference_falls_back_to_unit_slope() {
        let values = vec![65.0; 10];
        let f = RelevanceFunction::fit(RelevanceBounds::high_only(65.0).unwrap(), &values);
        assert!((f.score(66.0) - sigmoid(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_input_untouched() {
        let values = vec![10.0, 80.0, 40.0];
        let copy = values.clone();
        let _ = relevance(&values, &RelevanceBounds::high_only(65.0).unwrap());
        assert_eq!(values, copy);
    }

    #[test]
    fn test_bounds_deserialize_validates() {
        let b: RelevanceBounds = serde_json::from_str(r#"{"high": 65.0}"#).unwrap();
        assert_eq!(b.high(), Some(65.0));
        assert!(serde_json::from_str::<RelevanceBounds>("{}").is_err());
    }
}
