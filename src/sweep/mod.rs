//! The parameter sweep: what to run, how to hand it out, how to collect it.
//!
//! ```text
//! strategy ─ grid ──> dispatch ──> scheduler ──> worker (one per job) ──> store
//!                                                                          │
//!                                         summary tables <── reduce <──────┘
//! ```
//!
//! - [`grid`]: hyperparameter axes and their Cartesian expansion
//! - [`strategy`]: the built-in strategy catalogue and combination decoding
//! - [`dispatch`]: job descriptors, the sweep plan, the manifest
//! - [`scheduler`]: PBS and local job submission
//! - [`worker`]: the `run-job` entry point and the baseline
//! - [`reduce`]: completeness checks and summary tables
//! - [`finalize`]: refit the chosen combination on all data and save it

pub mod dispatch;
pub mod finalize;
pub mod grid;
pub mod reduce;
pub mod scheduler;
pub mod strategy;
pub mod worker;

pub use dispatch::{
    DispatchOptions, DispatchReport, JobDescriptor, Manifest, Submission, SweepDispatcher,
    SweepPlan, expand,
};
pub use finalize::{Selection, fit_final, save_scaler, select};
pub use grid::{Combination, ParamAxis, ParamValue, ParameterGrid};
pub use reduce::{
    ResultReducer, StrategyStatus, SummaryRow, SummaryTable, write_baseline_csv,
};
pub use scheduler::{
    JobTicket, LocalScheduler, PbsScheduler, Scheduler, SchedulerConfig,
};
pub use strategy::{
    EnsembleSpec, Plan, RegressorSpec, ResampleMethod, ResampleSpec, SampleMethod, SizeMethod,
    StrategyDefaults, StrategyKind, StrategySpec, decode,
};
pub use worker::{evaluate_baseline, run_descriptor_file, run_job};
