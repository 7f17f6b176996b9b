//! Configuration loading from resweep.toml and pyproject.toml.
//!
//! Same discovery as other Python-adjacent tools:
//! - `resweep.toml` in the directory
//! - `[tool.resweep]` section in pyproject.toml, walking up
//!
//! Unlike a lint config, a sweep cannot run on defaults alone (it needs a
//! dataset), and a bad value must stop the sweep before any job is
//! submitted. So the raw TOML is validated into a typed [`SweepConfig`].
//!
//! ## Example
//!
//! ```toml
//! [tool.resweep]
//! bins = [30, 50, 65, 85]
//! per-bin-test-size = 70
//! replicates = 50
//! strategies = ["RO", "SMOTER", "REBAGG-RO"]
//!
//! [tool.resweep.dataset]
//! path = "data/features.csv"
//! target = "topt"
//! exclude = ["uniprot_id", "sequence"]
//!
//! [tool.resweep.grids.SMOTER]
//! k = [3, 5]
//! cl = ["None", 30]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::backend::BackendSettings;
use crate::data::DatasetSource;
use crate::error::{ConfigError, Error, Result};
use crate::evaluation::{EvaluationSettings, F1Config, SeedScheme};
use crate::store::StoreLocation;
use crate::sweep::grid::{ParamAxis, ParamValue, ParameterGrid};
use crate::sweep::scheduler::SchedulerConfig;
use crate::sweep::strategy::{
    LEARNER_AXES, RegressorSpec, StrategyDefaults, StrategyKind, default_axis_values,
};
use crate::types::BinEdges;

/// Standalone config file name.
pub const CONFIG_FILE: &str = "resweep.toml";

/// A validated sweep configuration. Relative paths in the file have been
/// resolved against the file's directory.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// File this config came from (for display).
    pub source: PathBuf,
    pub dataset: DatasetSource,
    pub evaluation: EvaluationSettings,
    pub defaults: StrategyDefaults,
    /// Learner for the no-resampling baseline.
    pub baseline: RegressorSpec,
    /// Enabled strategies and their grids, in catalogue order.
    pub strategies: Vec<(StrategyKind, ParameterGrid)>,
    pub store: StoreLocation,
    pub scheduler: SchedulerConfig,
    pub backend: BackendSettings,
    /// Descriptors, scripts, logs and the manifest.
    pub work_dir: PathBuf,
    /// Summary tables.
    pub results_dir: PathBuf,
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    dataset: DatasetSource,
    #[serde(default = "default_bins")]
    bins: Vec<f64>,
    #[serde(default = "default_per_bin_test_size")]
    per_bin_test_size: usize,
    #[serde(default = "default_replicates")]
    replicates: usize,
    #[serde(default)]
    seed_base: u64,
    #[serde(default = "default_seed_stride")]
    seed_stride: u64,
    /// Enabled strategy names; all ten when absent.
    strategies: Option<Vec<String>>,
    #[serde(default = "default_work_dir")]
    work_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    results_dir: PathBuf,
    #[serde(default)]
    f1: F1Config,
    #[serde(default)]
    ensemble: StrategyDefaults,
    #[serde(default = "default_baseline")]
    baseline: RegressorSpec,
    #[serde(default)]
    store: StoreLocation,
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    backend: BackendSettings,
    /// Per-strategy axis overrides.
    #[serde(default)]
    grids: BTreeMap<String, BTreeMap<String, Vec<RawValue>>>,
}

fn default_bins() -> Vec<f64> {
    vec![30.0, 50.0, 65.0, 85.0]
}

fn default_per_bin_test_size() -> usize {
    70
}

fn default_replicates() -> usize {
    50
}

fn default_seed_stride() -> u64 {
    1
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("hpc")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_baseline() -> RegressorSpec {
    RegressorSpec::RandomForest { n_estimators: 10 }
}

/// A grid value as written in TOML. `"None"` is the disabled-threshold
/// marker.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<RawValue> for ParamValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Int(v) => ParamValue::Int(v),
            RawValue::Float(v) => ParamValue::Float(v),
            RawValue::Text(s) if matches!(s.as_str(), "None" | "none" | "null") => {
                ParamValue::Null
            }
            RawValue::Text(s) => ParamValue::Text(s),
        }
    }
}

/// Wrapper for pyproject.toml structure.
#[derive(Debug, Deserialize)]
struct PyProject {
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    resweep: Option<toml::Value>,
}

impl SweepConfig {
    /// Discover and load the configuration for `directory`.
    ///
    /// Search order:
    /// 1. resweep.toml in directory
    /// 2. pyproject.toml with `[tool.resweep]` in directory
    /// 3. Walk up to the first pyproject.toml with `[tool.resweep]`
    pub fn discover(directory: &Path) -> Result<Self> {
        let standalone = directory.join(CONFIG_FILE);
        if standalone.is_file() {
            return Self::from_path(&standalone);
        }

        for dir in directory.ancestors() {
            let pyproject = dir.join("pyproject.toml");
            if !pyproject.is_file() {
                continue;
            }
            if let Some(raw) = Self::read_pyproject(&pyproject)? {
                return Self::from_raw(raw, &pyproject);
            }
        }

        Err(ConfigError::Invalid(format!(
            "no {CONFIG_FILE} or [tool.resweep] in pyproject.toml found from {}",
            directory.display()
        ))
        .into())
    }

    /// Load a specific file: a pyproject.toml is read from its
    /// `[tool.resweep]` table, anything else as a standalone config.
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.file_name().is_some_and(|n| n == "pyproject.toml") {
            let raw = Self::read_pyproject(path)?.ok_or_else(|| {
                ConfigError::Invalid(format!("{} has no [tool.resweep] table", path.display()))
            })?;
            return Self::from_raw(raw, path);
        }
        let content = read(path)?;
        Self::from_raw(toml::from_str(&content)?, path)
    }

    /// Parse a config from TOML text, resolving relative paths against
    /// `base_dir`.
    pub fn from_toml(content: &str, base_dir: &Path) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        validate(raw, base_dir.join(CONFIG_FILE), base_dir)
    }

    fn read_pyproject(path: &Path) -> Result<Option<RawConfig>> {
        let content = read(path)?;
        let pyproject: PyProject = toml::from_str(&content)?;
        match pyproject.tool.and_then(|t| t.resweep) {
            Some(table) => Ok(Some(table.try_into()?)),
            None => Ok(None),
        }
    }

    fn from_raw(raw: RawConfig, path: &Path) -> Result<Self> {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        validate(raw, path.to_path_buf(), &base_dir)
    }

    /// The grid for `kind`, if the strategy is enabled.
    pub fn grid(&self, kind: StrategyKind) -> Option<&ParameterGrid> {
        self.strategies
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, grid)| grid)
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("   Config: {}", self.source.display()));
        lines.push(format!(
            "   Dataset: {} (target `{}`)",
            self.dataset.path.display(),
            self.dataset.target
        ));
        let edges: Vec<String> = self
            .evaluation
            .edges
            .as_slice()
            .iter()
            .map(|e| e.to_string())
            .collect();
        lines.push(format!(
            "   Bins: [{}] ({} bins, {} test samples each)",
            edges.join(", "),
            self.evaluation.edges.n_bins(),
            self.evaluation.per_bin_test_size
        ));
        lines.push(format!(
            "   Replicates: {} (seeds {} + r*{})",
            self.evaluation.replicates,
            self.evaluation.seeds.base,
            self.evaluation.seeds.stride
        ));
        let total: usize = self.strategies.iter().map(|(_, g)| g.len()).sum();
        let names: Vec<String> = self
            .strategies
            .iter()
            .map(|(k, g)| format!("{k} ({})", g.len()))
            .collect();
        lines.push(format!("   Strategies: {} ({total} jobs)", names.join(", ")));
        lines.push(format!("   Backend: {}", self.backend.program));
        lines.join("\n")
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(format!("reading {}", path.display()), e))
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn validate(raw: RawConfig, source: PathBuf, base_dir: &Path) -> Result<SweepConfig> {
    let edges = BinEdges::new(raw.bins)?;
    if raw.replicates == 0 {
        return Err(ConfigError::Invalid("replicates must be at least 1".into()).into());
    }
    if raw.per_bin_test_size == 0 {
        return Err(ConfigError::Invalid("per-bin-test-size must be at least 1".into()).into());
    }
    if raw.ensemble.ensemble_models == 0 {
        return Err(ConfigError::Invalid("ensemble-models must be at least 1".into()).into());
    }
    if !(0.0..=1.0).contains(&raw.ensemble.relevance_threshold) {
        return Err(ConfigError::Invalid(format!(
            "relevance-threshold must lie in [0, 1], got {}",
            raw.ensemble.relevance_threshold
        ))
        .into());
    }
    validate_f1(&raw.f1)?;

    let enabled = match raw.strategies {
        Some(names) => {
            let mut kinds = names
                .iter()
                .map(|n| StrategyKind::from_name(n))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            kinds.sort();
            kinds.dedup();
            kinds
        }
        None => StrategyKind::ALL.to_vec(),
    };

    let mut overrides = BTreeMap::new();
    for (name, axes) in raw.grids {
        overrides.insert(StrategyKind::from_name(&name)?, axes);
    }

    let mut strategies = Vec::with_capacity(enabled.len());
    for kind in enabled {
        let grid = build_grid(kind, overrides.remove(&kind).unwrap_or_default())?;
        debug!(strategy = %kind, combinations = grid.len(), "grid ready");
        strategies.push((kind, grid));
    }
    if let Some(kind) = overrides.keys().next() {
        return Err(ConfigError::Invalid(format!(
            "grid given for {kind}, which is not in `strategies`"
        ))
        .into());
    }

    let mut dataset = raw.dataset;
    dataset.path = resolve(base_dir, dataset.path);

    let store = match raw.store {
        StoreLocation::Files { dir } => StoreLocation::Files {
            dir: resolve(base_dir, dir),
        },
        StoreLocation::Redb { path } => StoreLocation::Redb {
            path: resolve(base_dir, path),
        },
    };

    Ok(SweepConfig {
        source,
        dataset,
        evaluation: EvaluationSettings {
            edges,
            per_bin_test_size: raw.per_bin_test_size,
            replicates: raw.replicates,
            seeds: SeedScheme {
                base: raw.seed_base,
                stride: raw.seed_stride,
            },
            f1: raw.f1,
        },
        defaults: raw.ensemble,
        baseline: raw.baseline,
        strategies,
        store,
        scheduler: raw.scheduler,
        backend: raw.backend,
        work_dir: resolve(base_dir, raw.work_dir),
        results_dir: resolve(base_dir, raw.results_dir),
    })
}

fn validate_f1(f1: &F1Config) -> Result<()> {
    let invalid = |what: &str, value: f64| -> Result<()> {
        Err(ConfigError::Invalid(format!("f1 {what}, got {value}")).into())
    };
    if !(f1.relevance_threshold > 0.0 && f1.relevance_threshold < 1.0) {
        return invalid("relevance-threshold must lie in (0, 1)", f1.relevance_threshold);
    }
    if !(f1.error_threshold > 0.0) {
        return invalid("error-threshold must be positive", f1.error_threshold);
    }
    if !(f1.steepness > 0.0) {
        return invalid("steepness must be positive", f1.steepness);
    }
    Ok(())
}

/// Canonical axes take their override or default values; learner axes
/// appear only when overridden, after the canonical ones.
fn build_grid(
    kind: StrategyKind,
    overrides: BTreeMap<String, Vec<RawValue>>,
) -> std::result::Result<ParameterGrid, ConfigError> {
    let mut overrides: BTreeMap<String, Vec<ParamValue>> = overrides
        .into_iter()
        .map(|(name, values)| {
            (
                name.replace('-', "_"),
                values.into_iter().map(ParamValue::from).collect(),
            )
        })
        .collect();

    if let Some(name) = overrides.keys().find(|n| !kind.accepts_axis(n)) {
        return Err(ConfigError::parameter(
            kind.name(),
            format!("`{name}` is not an axis of this strategy"),
        ));
    }

    let mut axes: Vec<ParamAxis> = kind
        .axes()
        .iter()
        .map(|name| ParamAxis {
            name: name.to_string(),
            values: overrides
                .remove(*name)
                .unwrap_or_else(|| default_axis_values(name)),
        })
        .collect();
    for name in LEARNER_AXES {
        if let Some(values) = overrides.remove(name) {
            axes.push(ParamAxis {
                name: name.to_string(),
                values,
            });
        }
    }

    ParameterGrid::new(axes).map_err(|e| match e {
        ConfigError::Invalid(message) => ConfigError::parameter(kind.name(), message),
        other => other,
    })
}
