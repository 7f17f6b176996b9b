//! Built-in resampling strategies and typed decoding of their combinations.
//!
//! ## Catalogue
//!
//! | Strategy         | Axes (product order)                   | Learner            |
//! |------------------|----------------------------------------|--------------------|
//! | RO               | cl, ch, sample_method                  | random forest (10) |
//! | SMOTER           | cl, ch, sample_method, k               | random forest (10) |
//! | GN               | cl, ch, sample_method, delta           | random forest (10) |
//! | WERCS            | cl, ch, over, under                    | random forest (10) |
//! | WERCS-GN         | cl, ch, over, under, delta             | random forest (10) |
//! | REBAGG-RO        | cl, ch, size_method, s                 | bagged trees (100) |
//! | REBAGG-SMOTER    | cl, ch, size_method, s, k              | bagged trees (100) |
//! | REBAGG-GN        | cl, ch, size_method, s, delta          | bagged trees (100) |
//! | REBAGG-WERCS     | cl, ch, s, over, under                 | bagged trees (100) |
//! | REBAGG-WERCS-GN  | cl, ch, s, over, under, delta          | bagged trees (100) |
//!
//! `cl`/`ch` are the low/high relevance thresholds used for resampling
//! (`None` disables that side). Any grid may additionally carry the
//! optional learner axes `regressor, n_neighbors, c, gamma, alpha`, which
//! replace the default learner and are appended after the canonical axes.
//!
//! Decoding never guesses: a missing or mistyped field is a `ConfigError`
//! naming the strategy.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::grid::{Combination, ParamAxis, ParamValue, ParameterGrid};
use crate::error::ConfigError;
use crate::evaluation::RelevanceBounds;

/// Optional axes that swap the learner, in the order they are appended.
pub const LEARNER_AXES: [&str; 5] = ["regressor", "n_neighbors", "c", "gamma", "alpha"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "RO")]
    Ro,
    #[serde(rename = "SMOTER")]
    Smoter,
    #[serde(rename = "GN")]
    Gn,
    #[serde(rename = "WERCS")]
    Wercs,
    #[serde(rename = "WERCS-GN")]
    WercsGn,
    #[serde(rename = "REBAGG-RO")]
    RebaggRo,
    #[serde(rename = "REBAGG-SMOTER")]
    RebaggSmoter,
    #[serde(rename = "REBAGG-GN")]
    RebaggGn,
    #[serde(rename = "REBAGG-WERCS")]
    RebaggWercs,
    #[serde(rename = "REBAGG-WERCS-GN")]
    RebaggWercsGn,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 10] = [
        StrategyKind::Ro,
        StrategyKind::Smoter,
        StrategyKind::Gn,
        StrategyKind::Wercs,
        StrategyKind::WercsGn,
        StrategyKind::RebaggRo,
        StrategyKind::RebaggSmoter,
        StrategyKind::RebaggGn,
        StrategyKind::RebaggWercs,
        StrategyKind::RebaggWercsGn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Ro => "RO",
            StrategyKind::Smoter => "SMOTER",
            StrategyKind::Gn => "GN",
            StrategyKind::Wercs => "WERCS",
            StrategyKind::WercsGn => "WERCS-GN",
            StrategyKind::RebaggRo => "REBAGG-RO",
            StrategyKind::RebaggSmoter => "REBAGG-SMOTER",
            StrategyKind::RebaggGn => "REBAGG-GN",
            StrategyKind::RebaggWercs => "REBAGG-WERCS",
            StrategyKind::RebaggWercsGn => "REBAGG-WERCS-GN",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownStrategy(name.to_string()))
    }

    pub fn is_ensemble(&self) -> bool {
        matches!(
            self,
            StrategyKind::RebaggRo
                | StrategyKind::RebaggSmoter
                | StrategyKind::RebaggGn
                | StrategyKind::RebaggWercs
                | StrategyKind::RebaggWercsGn
        )
    }

    /// Canonical axis names, in product order.
    pub fn axes(&self) -> &'static [&'static str] {
        match self {
            StrategyKind::Ro => &["cl", "ch", "sample_method"],
            StrategyKind::Smoter => &["cl", "ch", "sample_method", "k"],
            StrategyKind::Gn => &["cl", "ch", "sample_method", "delta"],
            StrategyKind::Wercs => &["cl", "ch", "over", "under"],
            StrategyKind::WercsGn => &["cl", "ch", "over", "under", "delta"],
            StrategyKind::RebaggRo => &["cl", "ch", "size_method", "s"],
            StrategyKind::RebaggSmoter => &["cl", "ch", "size_method", "s", "k"],
            StrategyKind::RebaggGn => &["cl", "ch", "size_method", "s", "delta"],
            StrategyKind::RebaggWercs => &["cl", "ch", "s", "over", "under"],
            StrategyKind::RebaggWercsGn => &["cl", "ch", "s", "over", "under", "delta"],
        }
    }

    /// Whether `axis` may appear in this strategy's grid.
    pub fn accepts_axis(&self, axis: &str) -> bool {
        self.axes().contains(&axis) || LEARNER_AXES.contains(&axis)
    }

    /// The grid used when the configuration does not override any axis.
    pub fn default_grid(&self) -> ParameterGrid {
        let axes = self
            .axes()
            .iter()
            .map(|name| ParamAxis {
                name: name.to_string(),
                values: default_axis_values(name),
            })
            .collect();
        // Default values are never empty and names are unique
        ParameterGrid::new(axes).unwrap_or_default()
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default value list for a canonical axis.
pub fn default_axis_values(axis: &str) -> Vec<ParamValue> {
    fn floats(v: &[f64]) -> Vec<ParamValue> {
        v.iter().map(|x| ParamValue::Float(*x)).collect()
    }
    fn ints(v: &[i64]) -> Vec<ParamValue> {
        v.iter().map(|x| ParamValue::Int(*x)).collect()
    }
    fn texts(v: &[&str]) -> Vec<ParamValue> {
        v.iter().map(|x| ParamValue::from(*x)).collect()
    }

    match axis {
        "cl" => vec![ParamValue::Float(25.0), ParamValue::Float(30.0), ParamValue::Null],
        "ch" => floats(&[72.2, 60.0]),
        "sample_method" => texts(&["balance", "extreme", "average"]),
        "k" => ints(&[5, 10, 15]),
        "delta" => floats(&[0.1, 0.5, 1.0]),
        "over" | "under" => floats(&[0.5, 0.75]),
        "s" => ints(&[300, 600]),
        "size_method" => texts(&["balance", "variation"]),
        _ => Vec::new(),
    }
}

/// How oversampling decides how many synthetic samples to add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleMethod {
    Balance,
    Extreme,
    Average,
}

/// How REBAGG sizes the rare/normal mix of each bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeMethod {
    Balance,
    Variation,
}

/// The resampling algorithm, run by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum ResampleMethod {
    RandomOversample,
    Smoter { k: usize },
    GaussianNoise { delta: f64 },
    Wercs { over: f64, under: f64 },
    WercsGn { over: f64, under: f64, delta: f64 },
}

/// One resampling pass over the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleSpec {
    /// Thresholds for the relevance handed to the resampler.
    pub bounds: RelevanceBounds,
    pub method: ResampleMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_method: Option<SampleMethod>,
    pub relevance_threshold: f64,
}

/// The regression model. Tagged so the backend can dispatch on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RegressorSpec {
    RandomForest { n_estimators: usize },
    DecisionTree,
    KNeighbors { n_neighbors: usize },
    Svr {
        c: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gamma: Option<f64>,
    },
    ElasticNet { alpha: f64 },
    BayesianRidge,
}

/// A bagging ensemble whose bags are resampled before fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSpec {
    pub bounds: RelevanceBounds,
    pub method: ResampleMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_method: Option<SizeMethod>,
    /// Samples drawn per bag (`s`).
    pub samples_per_model: usize,
    /// Number of bagged models (`m`).
    pub models: usize,
    pub relevance_threshold: f64,
    pub base: RegressorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Plan {
    /// Optionally resample, then fit one regressor.
    Plain {
        resample: Option<ResampleSpec>,
        regressor: RegressorSpec,
    },
    /// Fit a bagging ensemble on the raw training partition.
    Ensemble(EnsembleSpec),
}

/// Everything the evaluator needs to run one combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub plan: Plan,
}

impl StrategySpec {
    /// No resampling at all.
    pub fn baseline(regressor: RegressorSpec) -> Self {
        Self {
            name: "baseline".into(),
            plan: Plan::Plain {
                resample: None,
                regressor,
            },
        }
    }

    /// Relevance thresholds the training partition is scored with, if the
    /// plan uses relevance at all.
    pub fn training_bounds(&self) -> Option<RelevanceBounds> {
        match &self.plan {
            Plan::Plain { resample, .. } => resample.as_ref().map(|r| r.bounds),
            Plan::Ensemble(e) => Some(e.bounds),
        }
    }
}

/// Fixed settings that are not grid axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StrategyDefaults {
    /// Relevance above which a sample counts as rare.
    pub relevance_threshold: f64,
    /// Trees in the plain random forest.
    pub forest_trees: usize,
    /// Models in each REBAGG ensemble.
    pub ensemble_models: usize,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.5,
            forest_trees: 10,
            ensemble_models: 100,
        }
    }
}

/// Turn one combination into a typed strategy.
pub fn decode(
    kind: StrategyKind,
    combination: &Combination,
    defaults: &StrategyDefaults,
) -> Result<StrategySpec, ConfigError> {
    let fields = Fields {
        kind,
        combination,
        forest_trees: defaults.forest_trees,
    };

    for (name, _) in combination.fields() {
        if !kind.accepts_axis(name) {
            return Err(ConfigError::parameter(
                kind.name(),
                format!("unexpected field `{name}`"),
            ));
        }
    }

    let bounds = RelevanceBounds::new(fields.optional_f64("cl")?, fields.optional_f64("ch")?)?;

    let method = match kind {
        StrategyKind::Ro | StrategyKind::RebaggRo => ResampleMethod::RandomOversample,
        StrategyKind::Smoter | StrategyKind::RebaggSmoter => ResampleMethod::Smoter {
            k: fields.count("k")?,
        },
        StrategyKind::Gn | StrategyKind::RebaggGn => ResampleMethod::GaussianNoise {
            delta: fields.positive("delta")?,
        },
        StrategyKind::Wercs | StrategyKind::RebaggWercs => ResampleMethod::Wercs {
            over: fields.fraction("over")?,
            under: fields.fraction("under")?,
        },
        StrategyKind::WercsGn | StrategyKind::RebaggWercsGn => ResampleMethod::WercsGn {
            over: fields.fraction("over")?,
            under: fields.fraction("under")?,
            delta: fields.positive("delta")?,
        },
    };

    let plan = if kind.is_ensemble() {
        let size_method = match kind {
            StrategyKind::RebaggWercs | StrategyKind::RebaggWercsGn => None,
            _ => Some(fields.size_method()?),
        };
        Plan::Ensemble(EnsembleSpec {
            bounds,
            method,
            size_method,
            samples_per_model: fields.count("s")?,
            models: defaults.ensemble_models,
            relevance_threshold: defaults.relevance_threshold,
            base: fields.learner(RegressorSpec::DecisionTree)?,
        })
    } else {
        let sample_method = match kind {
            StrategyKind::Wercs | StrategyKind::WercsGn => None,
            _ => Some(fields.sample_method()?),
        };
        Plan::Plain {
            resample: Some(ResampleSpec {
                bounds,
                method,
                sample_method,
                relevance_threshold: defaults.relevance_threshold,
            }),
            regressor: fields.learner(RegressorSpec::RandomForest {
                n_estimators: defaults.forest_trees,
            })?,
        }
    };

    Ok(StrategySpec {
        name: kind.name().to_string(),
        plan,
    })
}

/// Typed field access with strategy-scoped errors.
struct Fields<'a> {
    kind: StrategyKind,
    combination: &'a Combination,
    forest_trees: usize,
}

impl Fields<'_> {
    fn error(&self, message: String) -> ConfigError {
        ConfigError::parameter(self.kind.name(), message)
    }

    fn required(&self, name: &str) -> Result<&ParamValue, ConfigError> {
        self.combination
            .get(name)
            .ok_or_else(|| self.error(format!("missing field `{name}`")))
    }

    fn optional_f64(&self, name: &str) -> Result<Option<f64>, ConfigError> {
        match self.combination.get(name) {
            None | Some(ParamValue::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.error(format!("`{name}` must be a number or None, got {v}"))),
        }
    }

    fn f64(&self, name: &str) -> Result<f64, ConfigError> {
        let v = self.required(name)?;
        v.as_f64()
            .ok_or_else(|| self.error(format!("`{name}` must be a number, got {v}")))
    }

    fn positive(&self, name: &str) -> Result<f64, ConfigError> {
        let v = self.f64(name)?;
        if v > 0.0 && v.is_finite() {
            Ok(v)
        } else {
            Err(self.error(format!("`{name}` must be positive, got {v}")))
        }
    }

    fn fraction(&self, name: &str) -> Result<f64, ConfigError> {
        let v = self.f64(name)?;
        if (0.0..=1.0).contains(&v) {
            Ok(v)
        } else {
            Err(self.error(format!("`{name}` must lie in [0, 1], got {v}")))
        }
    }

    fn count(&self, name: &str) -> Result<usize, ConfigError> {
        let v = self.required(name)?;
        match v.as_usize() {
            Some(n) if n > 0 => Ok(n),
            _ => Err(self.error(format!("`{name}` must be a positive integer, got {v}"))),
        }
    }

    fn text(&self, name: &str) -> Result<&str, ConfigError> {
        let v = self.required(name)?;
        v.as_str()
            .ok_or_else(|| self.error(format!("`{name}` must be a string, got {v}")))
    }

    fn sample_method(&self) -> Result<SampleMethod, ConfigError> {
        match self.text("sample_method")? {
            "balance" => Ok(SampleMethod::Balance),
            "extreme" => Ok(SampleMethod::Extreme),
            "average" => Ok(SampleMethod::Average),
            other => Err(self.error(format!("unknown sample_method `{other}`"))),
        }
    }

    fn size_method(&self) -> Result<SizeMethod, ConfigError> {
        match self.text("size_method")? {
            "balance" => Ok(SizeMethod::Balance),
            "variation" => Ok(SizeMethod::Variation),
            other => Err(self.error(format!("unknown size_method `{other}`"))),
        }
    }

    /// The learner, overridden by the optional `regressor` axis.
    fn learner(&self, default: RegressorSpec) -> Result<RegressorSpec, ConfigError> {
        let Some(value) = self.combination.get("regressor") else {
            return Ok(default);
        };
        let name = value
            .as_str()
            .ok_or_else(|| self.error(format!("`regressor` must be a string, got {value}")))?;

        let spec = match name {
            "random-forest" => RegressorSpec::RandomForest {
                n_estimators: self.forest_trees,
            },
            "decision-tree" => RegressorSpec::DecisionTree,
            "knn" => RegressorSpec::KNeighbors {
                n_neighbors: match self.combination.get("n_neighbors") {
                    Some(_) => self.count("n_neighbors")?,
                    None => 5,
                },
            },
            "svr" => RegressorSpec::Svr {
                c: match self.combination.get("c") {
                    Some(_) => self.positive("c")?,
                    None => 1.0,
                },
                gamma: self.optional_f64("gamma")?,
            },
            "enet" => RegressorSpec::ElasticNet {
                alpha: match self.combination.get("alpha") {
                    Some(_) => self.positive("alpha")?,
                    None => 1.0,
                },
            },
            "bayesian-ridge" => RegressorSpec::BayesianRidge,
            other => return Err(self.error(format!("unknown regressor `{other}`"))),
        };
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> StrategyDefaults {
        StrategyDefaults::default()
    }

    #[test]
    fn test_default_grid_sizes() {
        let sizes: Vec<(StrategyKind, usize)> = StrategyKind::ALL
            .iter()
            .map(|k| (*k, k.default_grid().len()))
            .collect();
        assert_eq!(
            sizes,
            vec![
                (StrategyKind::Ro, 18),
                (StrategyKind::Smoter, 54),
                (StrategyKind::Gn, 54),
                (StrategyKind::Wercs, 24),
                (StrategyKind::WercsGn, 72),
                (StrategyKind::RebaggRo, 24),
                (StrategyKind::RebaggSmoter, 72),
                (StrategyKind::RebaggGn, 72),
                (StrategyKind::RebaggWercs, 48),
                (StrategyKind::RebaggWercsGn, 144),
            ]
        );
    }

    #[test]
    fn test_from_name() {
        assert_eq!(StrategyKind::from_name("REBAGG-GN"), Ok(StrategyKind::RebaggGn));
        assert_eq!(StrategyKind::from_name("wercs-gn"), Ok(StrategyKind::WercsGn));
        assert_eq!(
            StrategyKind::from_name("ADASYN"),
            Err(ConfigError::UnknownStrategy("ADASYN".into()))
        );
    }

    #[test]
    fn test_decode_ro() {
        let c = StrategyKind::Ro.default_grid().combination(13).unwrap();
        // (None, 72.2, 'extreme')
        let spec = decode(StrategyKind::Ro, &c, &defaults()).unwrap();
        let Plan::Plain {
            resample: Some(r),
            regressor,
        } = spec.plan
        else {
            panic!("expected plain plan");
        };
        assert_eq!(r.bounds.low(), None);
        assert_eq!(r.bounds.high(), Some(72.2));
        assert_eq!(r.method, ResampleMethod::RandomOversample);
        assert_eq!(r.sample_method, Some(SampleMethod::Extreme));
        assert_eq!(regressor, RegressorSpec::RandomForest { n_estimators: 10 });
    }

    #[test]
    fn test_decode_rebagg_wercs_has_no_size_method() {
        let c = StrategyKind::RebaggWercs.default_grid().combination(0).unwrap();
        let spec = decode(StrategyKind::RebaggWercs, &c, &defaults()).unwrap();
        let Plan::Ensemble(e) = spec.plan else {
            panic!("expected ensemble plan");
        };
        assert_eq!(e.size_method, None);
        assert_eq!(e.samples_per_model, 300);
        assert_eq!(e.models, 100);
        assert_eq!(e.base, RegressorSpec::DecisionTree);
        assert_eq!(e.method, ResampleMethod::Wercs { over: 0.5, under: 0.5 });
    }

    #[test]
    fn test_every_default_combination_decodes() {
        for kind in StrategyKind::ALL {
            for c in kind.default_grid().expand() {
                decode(kind, &c, &defaults())
                    .unwrap_or_else(|e| panic!("{kind} {}: {e}", c.label()));
            }
        }
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let c = Combination::new(vec![
            ("cl".into(), ParamValue::Null),
            ("ch".into(), ParamValue::Float(72.2)),
            ("sample_method".into(), ParamValue::from("sideways")),
        ]);
        let err = decode(StrategyKind::Ro, &c, &defaults()).unwrap_err();
        assert!(err.to_string().contains("sideways"), "got {err}");

        let c = Combination::new(vec![
            ("cl".into(), ParamValue::Null),
            ("ch".into(), ParamValue::Float(72.2)),
            ("k".into(), ParamValue::Int(5)),
        ]);
        assert!(decode(StrategyKind::Ro, &c, &defaults()).is_err());
    }

    #[test]
    fn test_both_thresholds_none_is_config_error() {
        let c = Combination::new(vec![
            ("cl".into(), ParamValue::Null),
            ("ch".into(), ParamValue::Null),
            ("sample_method".into(), ParamValue::from("balance")),
        ]);
        assert_eq!(
            decode(StrategyKind::Ro, &c, &defaults()),
            Err(ConfigError::MissingRelevanceBounds)
        );
    }

    #[test]
    fn test_learner_override() {
        let c = Combination::new(vec![
            ("cl".into(), ParamValue::Null),
            ("ch".into(), ParamValue::Float(72.2)),
            ("size_method".into(), ParamValue::from("variation")),
            ("s".into(), ParamValue::Int(600)),
            ("regressor".into(), ParamValue::from("svr")),
            ("c".into(), ParamValue::Float(10.0)),
            ("gamma".into(), ParamValue::Float(0.01)),
        ]);
        let spec = decode(StrategyKind::RebaggRo, &c, &defaults()).unwrap();
        let Plan::Ensemble(e) = spec.plan else {
            panic!("expected ensemble plan");
        };
        assert_eq!(
            e.base,
            RegressorSpec::Svr {
                c: 10.0,
                gamma: Some(0.01)
            }
        );
    }

    #[test]
    fn test_regressor_spec_json_shape() {
        let json = serde_json::to_value(RegressorSpec::KNeighbors { n_neighbors: 7 }).unwrap();
        assert_eq!(json["kind"], "k-neighbors");
        assert_eq!(json["n_neighbors"], 7);
    }
}
