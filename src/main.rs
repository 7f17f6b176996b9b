//! resweep CLI - parameter sweeps for imbalanced-regression resampling
//!
//! The command-line entry point. A sweep runs in three separate passes:
//!
//! 1. `dispatch`: expand grids, write one descriptor per job, submit
//! 2. `run-job`: the worker entry point each submitted job calls
//! 3. `reduce`: collect job records into one summary table per strategy
//!
//! `plan` and `status` inspect a sweep without changing anything;
//! `baseline` evaluates the no-resampling reference in-process and
//! `fit-final` refits the chosen combination on every sample.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use resweep::config::SweepConfig;
use resweep::evaluation::Metric;
use resweep::store::open_store;
use resweep::sweep::{
    Combination, DispatchOptions, Manifest, ResultReducer, Selection, StrategyKind,
    SweepDispatcher, decode, evaluate_baseline, fit_final, run_descriptor_file, save_scaler,
    select, write_baseline_csv,
};
use resweep::Error;

/// Parameter sweeps for imbalanced-regression resampling strategies
///
/// Evaluates every hyperparameter combination of every enabled strategy
/// with repeated Monte Carlo cross-validation, one batch job per
/// combination, and reduces the results into summary tables.
///
/// Examples:
///   resweep plan                         # Show what a sweep would run
///   resweep dispatch --strategy RO       # Submit all RO jobs
///   resweep dispatch --missing           # Resubmit jobs without a record
///   resweep reduce --best f1             # Write tables, report best rows
///   resweep fit-final -s REBAGG-RO --best f1
#[derive(Parser, Debug)]
#[command(name = "resweep")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    /// Config file (resweep.toml or pyproject.toml)
    ///
    /// If omitted, resweep.toml in the current directory is used, then
    /// the nearest pyproject.toml with a [tool.resweep] table.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the configuration and the jobs a sweep would create
    Plan {
        /// Only these strategies (repeatable)
        #[arg(short, long = "strategy", value_name = "NAME")]
        strategies: Vec<String>,
    },

    /// Write job descriptors and submit them to the scheduler
    Dispatch {
        /// Only these strategies (repeatable)
        #[arg(short, long = "strategy", value_name = "NAME")]
        strategies: Vec<String>,

        /// Skip jobs whose record is already in the store
        #[arg(long)]
        missing: bool,

        /// List the jobs without writing or submitting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Evaluate one job descriptor and store its record (worker entry point)
    RunJob {
        /// Path to the job descriptor (JSON)
        descriptor: PathBuf,
    },

    /// Build summary tables from the stored job records
    Reduce {
        /// Only these strategies (repeatable)
        #[arg(short, long = "strategy", value_name = "NAME")]
        strategies: Vec<String>,

        /// Report the best combination per strategy by this metric
        /// (r2, mse, f1, mcc, mse_bin<N>)
        #[arg(long, value_name = "METRIC")]
        best: Option<String>,
    },

    /// Count completed job records per strategy
    Status {
        /// List the missing job keys
        #[arg(long)]
        list: bool,
    },

    /// Evaluate the no-resampling baseline and write its table
    Baseline,

    /// Fit one combination on the whole dataset and save the model
    FitFinal {
        /// Strategy name
        #[arg(short, long, value_name = "NAME")]
        strategy: String,

        /// Job index within the strategy's grid
        #[arg(long, required_unless_present = "best", conflicts_with = "best")]
        index: Option<usize>,

        /// Use the combination with the best mean of this metric
        #[arg(long, value_name = "METRIC")]
        best: Option<String>,

        /// Seed for resampling and fitting (default: the first replicate's)
        #[arg(long)]
        seed: Option<u64>,

        /// Where the backend saves the model
        /// (default: <results-dir>/final/<KEY>.model)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.no_color {
        owo_colors::set_override(false);
    }

    // The worker needs nothing but its descriptor
    if let Command::RunJob { descriptor } = &cli.command {
        let record = run_descriptor_file(descriptor)
            .with_context(|| format!("job {} failed", descriptor.display()))?;
        println!("{} {}", "✓".green(), record.key);
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Plan { strategies } => plan(&config, strategies),
        Command::Dispatch {
            strategies,
            missing,
            dry_run,
        } => dispatch(&config, strategies, *missing, *dry_run),
        Command::Reduce { strategies, best } => reduce(&config, strategies, best.as_deref()),
        Command::Status { list } => status(&config, *list),
        Command::Baseline => baseline(&config),
        Command::FitFinal {
            strategy,
            index,
            best,
            seed,
            output,
        } => fit_final_model(
            &config,
            strategy,
            *index,
            best.as_deref(),
            *seed,
            output.as_deref(),
        ),
        Command::RunJob { .. } => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<SweepConfig> {
    match path {
        Some(path) => SweepConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
            SweepConfig::discover(&cwd).context("Failed to load sweep configuration")
        }
    }
}

fn parse_strategies(names: &[String]) -> Result<Option<Vec<StrategyKind>>> {
    if names.is_empty() {
        return Ok(None);
    }
    let kinds = names
        .iter()
        .map(|n| StrategyKind::from_name(n))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(kinds))
}

fn banner(title: &str) {
    println!();
    println!("{}", format!(" {title} ").bold().on_blue());
    println!();
}

fn plan(config: &SweepConfig, strategies: &[String]) -> Result<()> {
    let only = parse_strategies(strategies)?;
    let plan = SweepDispatcher::new(config).plan(only.as_deref())?;

    banner("RESWEEP PLAN");
    println!("{}", config.display_summary());
    println!();
    for (kind, combinations) in &plan.expected {
        println!(
            "   {:<16} {:>4} jobs   axes: {}",
            kind.name().cyan(),
            combinations.len(),
            config
                .grid(*kind)
                .map(|g| g
                    .axes()
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "))
                .unwrap_or_default()
                .dimmed()
        );
    }
    println!();
    println!("   {} jobs in total", plan.len().bold());
    Ok(())
}

fn dispatch(config: &SweepConfig, strategies: &[String], missing: bool, dry_run: bool) -> Result<()> {
    let only = parse_strategies(strategies)?;
    let dispatcher = SweepDispatcher::new(config);
    let plan = dispatcher.plan(only.as_deref())?;

    let worker = std::env::current_exe().context("Failed to locate the resweep binary")?;
    let working_dir = std::env::current_dir().context("Failed to resolve current directory")?;
    let scheduler = config.scheduler.build(worker, working_dir);

    let store = if missing {
        Some(open_store(&config.store).context("Failed to open job store")?)
    } else {
        None
    };

    let report = dispatcher.dispatch(
        &plan,
        scheduler.as_ref(),
        DispatchOptions {
            skip_completed: store.as_deref(),
            dry_run,
        },
    )?;

    banner("RESWEEP DISPATCH");
    if dry_run {
        for key in &report.pending {
            println!("   {} {key}", "·".dimmed());
        }
        println!();
        println!(
            "   {} jobs would be submitted via {} ({} already complete)",
            report.pending.len().bold(),
            scheduler.name(),
            report.skipped.len()
        );
    } else {
        println!(
            "   {} {} jobs submitted via {} ({} already complete)",
            "✓".green(),
            report.submitted.len().bold(),
            scheduler.name(),
            report.skipped.len()
        );
        println!(
            "   Descriptors: {}",
            dispatcher.jobs_dir().display().to_string().dimmed()
        );
    }
    Ok(())
}

/// What a strategy is expected to have: the dispatched combinations if the
/// manifest records them, else the configured grid.
fn expected_for(
    config: &SweepConfig,
    manifest: Option<&Manifest>,
    kind: StrategyKind,
) -> Vec<Combination> {
    manifest
        .and_then(|m| m.expected.get(kind.name()).cloned())
        .or_else(|| config.grid(kind).map(|g| g.expand()))
        .unwrap_or_default()
}

fn selected(config: &SweepConfig, only: Option<&[StrategyKind]>) -> Vec<StrategyKind> {
    config
        .strategies
        .iter()
        .map(|(kind, _)| *kind)
        .filter(|kind| only.is_none_or(|o| o.contains(kind)))
        .collect()
}

fn parse_metric(name: Option<&str>) -> Result<Option<Metric>> {
    match name {
        Some(name) => Ok(Some(
            Metric::parse(name).with_context(|| format!("Unknown metric `{name}`"))?,
        )),
        None => Ok(None),
    }
}

fn reduce(config: &SweepConfig, strategies: &[String], best: Option<&str>) -> Result<()> {
    let only = parse_strategies(strategies)?;
    let metric = parse_metric(best)?;

    let store = open_store(&config.store).context("Failed to open job store")?;
    let manifest = Manifest::load(&config.work_dir)?;
    let reducer = ResultReducer::new(store.as_ref());

    banner("RESWEEP REDUCE");
    let mut incomplete = 0;
    for kind in selected(config, only.as_deref()) {
        let expected = expected_for(config, manifest.as_ref(), kind);
        match reducer.reduce(kind.name(), &expected) {
            Ok(table) => {
                let path = config.results_dir.join(format!("{}.csv", kind.name()));
                table.write_csv(&path)?;
                println!(
                    "   {} {:<16} {:>4} rows → {}",
                    "✓".green(),
                    kind.name(),
                    table.rows.len(),
                    path.display()
                );
                if let Some(row) = metric.and_then(|m| table.best_by(m).map(|r| (m, r))) {
                    let (m, row) = row;
                    let summary = row.scores.get(m).map(|s| s.mean).unwrap_or(f64::NAN);
                    println!(
                        "     best {} = {:.4} at {}",
                        m.column(),
                        summary.bold(),
                        row.label.cyan()
                    );
                }
            }
            Err(Error::PartialResult(partial)) => {
                incomplete += 1;
                println!(
                    "   {} {:<16} {} of {} records missing",
                    "✗".red(),
                    kind.name(),
                    partial.missing.len(),
                    partial.expected
                );
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to reduce {kind}")),
        }
    }

    if incomplete > 0 {
        bail!("{incomplete} strategies are incomplete; run `resweep status --list` for details");
    }
    Ok(())
}

fn status(config: &SweepConfig, list: bool) -> Result<()> {
    let store = open_store(&config.store).context("Failed to open job store")?;
    let manifest = Manifest::load(&config.work_dir)?;
    let reducer = ResultReducer::new(store.as_ref());

    banner("RESWEEP STATUS");
    if manifest.is_none() {
        println!("   {}", "No manifest yet; counting against the configured grids".dimmed());
    }
    let (mut done, mut total) = (0, 0);
    for kind in selected(config, None) {
        let expected = expected_for(config, manifest.as_ref(), kind).len();
        let status = reducer.status(kind.name(), expected)?;
        done += status.completed;
        total += status.expected;

        let mark = if status.is_complete() {
            "✓".green().to_string()
        } else {
            "…".yellow().to_string()
        };
        println!(
            "   {mark} {:<16} {:>4}/{:<4}",
            kind.name(),
            status.completed,
            status.expected
        );
        if list && !status.is_complete() {
            let keys: Vec<String> = status.missing.iter().map(|k| k.to_string()).collect();
            println!("       missing: {}", keys.join(", ").dimmed());
        }
    }
    println!();
    println!("   {}/{} jobs complete", done.bold(), total);
    Ok(())
}

fn baseline(config: &SweepConfig) -> Result<()> {
    let dataset = config.dataset.load().context("Failed to load dataset")?;
    let backend = config.backend.connect();
    let scores = evaluate_baseline(config, &dataset, &backend)?;

    let path = config.results_dir.join("baseline.csv");
    std::fs::create_dir_all(&config.results_dir)
        .with_context(|| format!("Failed to create {}", config.results_dir.display()))?;
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_baseline_csv(&scores, file)?;

    banner("RESWEEP BASELINE");
    println!("   R²   {:.4} ± {:.4}", scores.r2.mean, scores.r2.std);
    println!("   MSE  {:.4} ± {:.4}", scores.mse.mean, scores.mse.std);
    println!("   F1   {:.4} ± {:.4}", scores.f1.mean, scores.f1.std);
    println!("   MCC  {:.4} ± {:.4}", scores.mcc.mean, scores.mcc.std);
    println!();
    println!("   {} {}", "✓".green(), path.display());
    Ok(())
}

fn fit_final_model(
    config: &SweepConfig,
    strategy: &str,
    index: Option<usize>,
    best: Option<&str>,
    seed: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let kind = StrategyKind::from_name(strategy)?;
    if config.grid(kind).is_none() {
        bail!("{kind} is not an enabled strategy");
    }
    let selection = match (index, parse_metric(best)?) {
        (_, Some(metric)) => Selection::Best(metric),
        (Some(index), None) => Selection::Index(index),
        (None, None) => bail!("Pass --index or --best"),
    };

    let store = open_store(&config.store).context("Failed to open job store")?;
    let manifest = Manifest::load(&config.work_dir)?;
    let expected = expected_for(config, manifest.as_ref(), kind);
    let (key, combination) = select(kind, &expected, selection, store.as_ref())
        .with_context(|| format!("Failed to choose a {kind} combination"))?;
    let spec = decode(kind, &combination, &config.defaults)?;

    let seed = seed.unwrap_or_else(|| config.evaluation.seeds.seed_for(0));
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.results_dir.join("final").join(format!("{key}.model")));

    let (dataset, scaler) = config.dataset.load_scaled().context("Failed to load dataset")?;
    let backend = config.backend.connect();
    let path = fit_final(&spec, &dataset, &backend, seed, &path)
        .with_context(|| format!("Failed to fit final model for {key}"))?;
    let scaler_path = scaler
        .map(|scaler| save_scaler(&scaler, &path))
        .transpose()?;

    banner("RESWEEP FINAL MODEL");
    println!("   {} {}", key.bold(), combination.label().cyan());
    println!("   {} samples, seed {seed}", dataset.len());
    println!();
    println!("   {} {}", "✓".green(), path.display());
    if let Some(scaler_path) = scaler_path {
        println!("   {} {}", "✓".green(), scaler_path.display());
    }
    Ok(())
}
