//! Fan-out: grid → job descriptors → scheduler.
//!
//! Every combination of every enabled strategy becomes one job. A job is a
//! self-contained JSON descriptor interpreted by the fixed worker entry
//! point (`resweep run-job <descriptor>`), so a job never needs the sweep
//! config, only its own file.
//!
//! ```text
//! <work-dir>/
//!   jobs/RO_0.json        descriptor
//!   jobs/RO_0.sh          batch script (PBS only)
//!   logs/RO_0.{out,err}
//!   manifest.json         expected combinations + submission ids
//! ```
//!
//! Submission is fire-and-forget. Collecting results is a separate pass
//! (see `reduce`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::grid::{Combination, ParameterGrid};
use super::scheduler::{JobTicket, Scheduler};
use super::strategy::{StrategyDefaults, StrategyKind, StrategySpec, decode};
use crate::backend::BackendSettings;
use crate::config::SweepConfig;
use crate::data::DatasetSource;
use crate::error::{ConfigError, Error, Result};
use crate::evaluation::EvaluationSettings;
use crate::store::{JobStore, StoreLocation};
use crate::types::JobKey;

/// Everything one job needs, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub strategy: StrategyKind,
    pub index: usize,
    pub combination: Combination,
    pub dataset: DatasetSource,
    pub evaluation: EvaluationSettings,
    pub defaults: StrategyDefaults,
    pub store: StoreLocation,
    pub backend: BackendSettings,
}

impl JobDescriptor {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.strategy.name(), self.index)
    }

    /// Decode the combination into the strategy to evaluate.
    pub fn strategy_spec(&self) -> std::result::Result<StrategySpec, ConfigError> {
        decode(self.strategy, &self.combination, &self.defaults)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading descriptor {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(|e| Error::io(format!("writing descriptor {}", path.display()), e))
    }
}

/// Cartesian expansion of `grid`, in product order.
pub fn expand(grid: &ParameterGrid) -> Vec<Combination> {
    grid.expand()
}

/// All jobs of a sweep, decoded and ready to hand out.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub jobs: Vec<JobDescriptor>,
    /// Expected combinations per strategy, in index order.
    pub expected: BTreeMap<StrategyKind, Vec<Combination>>,
}

impl SweepPlan {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Clone, Copy, Default)]
pub struct DispatchOptions<'a> {
    /// Skip jobs whose record is already in this store.
    pub skip_completed: Option<&'a dyn JobStore>,
    /// Report what would be submitted without writing or submitting.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub submitted: Vec<(JobKey, String)>,
    pub skipped: Vec<JobKey>,
    /// Keys a dry run would have submitted.
    pub pending: Vec<JobKey>,
}

pub struct SweepDispatcher<'a> {
    config: &'a SweepConfig,
}

impl<'a> SweepDispatcher<'a> {
    pub fn new(config: &'a SweepConfig) -> Self {
        Self { config }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.config.work_dir.join("jobs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.config.work_dir.join("logs")
    }

    /// The descriptor for one combination.
    pub fn materialize(
        &self,
        strategy: StrategyKind,
        index: usize,
        combination: Combination,
    ) -> JobDescriptor {
        JobDescriptor {
            strategy,
            index,
            combination,
            dataset: self.config.dataset.clone(),
            evaluation: self.config.evaluation.clone(),
            defaults: self.config.defaults,
            store: self.config.store.clone(),
            backend: self.config.backend.clone(),
        }
    }

    /// Expand the grids of the enabled strategies (or only those in
    /// `only`) and decode every combination, so a bad grid fails here and
    /// not on the cluster.
    pub fn plan(&self, only: Option<&[StrategyKind]>) -> Result<SweepPlan> {
        let mut jobs = Vec::new();
        let mut expected = BTreeMap::new();

        for (kind, grid) in &self.config.strategies {
            if only.is_some_and(|o| !o.contains(kind)) {
                continue;
            }
            let combinations = expand(grid);
            for (index, combination) in combinations.iter().enumerate() {
                decode(*kind, combination, &self.config.defaults)?;
                jobs.push(self.materialize(*kind, index, combination.clone()));
            }
            debug!(strategy = %kind, jobs = combinations.len(), "planned");
            expected.insert(*kind, combinations);
        }

        if let Some(missing) = only.and_then(|o| o.iter().find(|k| !expected.contains_key(*k))) {
            return Err(ConfigError::Invalid(format!(
                "strategy {missing} is not enabled in {}",
                self.config.source.display()
            ))
            .into());
        }

        Ok(SweepPlan { jobs, expected })
    }

    /// Write descriptors and submit each job. Returns as soon as every job
    /// has been handed to the scheduler.
    pub fn dispatch(
        &self,
        plan: &SweepPlan,
        scheduler: &dyn Scheduler,
        options: DispatchOptions<'_>,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let jobs_dir = self.jobs_dir();
        let logs_dir = self.logs_dir();

        if !options.dry_run {
            fs::create_dir_all(&jobs_dir)
                .map_err(|e| Error::io(format!("creating {}", jobs_dir.display()), e))?;
        }

        let mut manifest = Manifest::load_or_default(&self.config.work_dir)?;
        manifest.record_plan(plan);

        for job in &plan.jobs {
            let key = job.key();
            if let Some(store) = options.skip_completed {
                if store.contains(&key)? {
                    debug!(key = %key, "already complete, skipping");
                    report.skipped.push(key);
                    continue;
                }
            }
            if options.dry_run {
                report.pending.push(key);
                continue;
            }

            let descriptor = jobs_dir.join(format!("{key}.json"));
            job.save(&descriptor)?;
            let ticket = JobTicket {
                key: &key,
                descriptor: &descriptor,
                log_dir: &logs_dir,
            };
            let id = match scheduler.submit(&ticket) {
                Ok(id) => id,
                Err(e) => {
                    // Keep what was submitted so far
                    warn!(key = %key, error = %e, "submission failed");
                    manifest.save(&self.config.work_dir)?;
                    return Err(e);
                }
            };
            manifest.submissions.insert(
                key.to_string(),
                Submission {
                    scheduler: scheduler.name().to_string(),
                    id: id.clone(),
                },
            );
            report.submitted.push((key, id));
        }

        if !options.dry_run {
            manifest.save(&self.config.work_dir)?;
        }
        info!(
            submitted = report.submitted.len(),
            skipped = report.skipped.len(),
            scheduler = scheduler.name(),
            "dispatch complete"
        );
        Ok(report)
    }
}

/// One scheduler submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub scheduler: String,
    pub id: String,
}

/// What a sweep expects and what has been submitted. Dispatching again
/// merges into the existing manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Keyed by strategy name.
    pub expected: BTreeMap<String, Vec<Combination>>,
    /// Keyed by job key.
    pub submissions: BTreeMap<String, Submission>,
}

impl Manifest {
    pub const FILE: &'static str = "manifest.json";

    pub fn path(work_dir: &Path) -> PathBuf {
        work_dir.join(Self::FILE)
    }

    /// The manifest in `work_dir`, if a sweep has been dispatched there.
    pub fn load(work_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(work_dir);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(format!("reading {}", path.display()), e)),
        }
    }

    fn load_or_default(work_dir: &Path) -> Result<Self> {
        Ok(Self::load(work_dir)?.unwrap_or_default())
    }

    fn record_plan(&mut self, plan: &SweepPlan) {
        for (kind, combinations) in &plan.expected {
            self.expected.insert(kind.name().to_string(), combinations.clone());
        }
    }

    pub fn save(&self, work_dir: &Path) -> Result<()> {
        fs::create_dir_all(work_dir)
            .map_err(|e| Error::io(format!("creating {}", work_dir.display()), e))?;
        let path = Self::path(work_dir);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| Error::io(format!("writing {}", path.display()), e))
    }
}
