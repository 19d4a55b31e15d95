use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rtcheck_core::config::{KNOWN_OPTIONS, PROPERTY_PREFIX};
use rtcheck_core::sim::RoundRobinSim;
use rtcheck_core::{
    Options, ProbeEnv, ProbeKind, Scheduler, Suite, SuiteConfig, SystemTimeSource,
    ThreadScheduler, ThreadSleeper, WorkerPolicy,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => execute_run(args),
        Commands::List(args) => execute_list(&args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Checks scheduler fairness and clock behaviour of the host"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the probe suite.
    Run(RunArgs),
    /// List the available probes and options.
    List(ListArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Restrict the run to these probes (repeatable).
    #[arg(long = "only", value_name = "PROBE")]
    only: Vec<ProbeKind>,
    /// Override an option, e.g. `round.robin.seconds=3` (repeatable).
    #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
    options: Vec<String>,
    /// JSON file with option values, applied after `RTCHECK_*` variables.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Scheduler the fairness probe runs on.
    #[arg(long, value_enum, default_value_t = SchedulerKind::OsThreads)]
    scheduler: SchedulerKind,
    /// Units per turn for the simulated round-robin scheduler.
    #[arg(long, default_value_t = 64)]
    quantum: u64,
    /// Pin every OS worker to this core.
    #[arg(long, value_name = "CORE")]
    pin_core: Option<usize>,
    /// Run OS workers under SCHED_RR with this priority.
    #[arg(long, value_name = "PRIORITY")]
    rr_priority: Option<i32>,
    /// Print the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SchedulerKind {
    OsThreads,
    RoundRobinSim,
}

fn gather_options(args: &RunArgs) -> Result<Options> {
    let mut options = Options::from_env();
    if let Some(path) = &args.config {
        let file = Options::from_json_file(path)
            .with_context(|| format!("failed to load options from {}", path.display()))?;
        options.merge(file);
    }
    for assignment in &args.options {
        let (name, value) = Options::parse_assignment(assignment)?;
        options.set(name, value);
    }
    Ok(options)
}

fn build_scheduler(args: &RunArgs, config: &SuiteConfig) -> Arc<dyn Scheduler> {
    match args.scheduler {
        SchedulerKind::OsThreads => Arc::new(ThreadScheduler::with_policy(WorkerPolicy {
            pin_core: args.pin_core,
            rr_priority: args.rr_priority,
        })),
        SchedulerKind::RoundRobinSim => {
            Arc::new(RoundRobinSim::uniform(config.fairness.workers, args.quantum))
        }
    }
}

fn execute_run(args: RunArgs) -> Result<()> {
    info!("rtcheck {}", env!("CARGO_PKG_VERSION"));
    let options = gather_options(&args)?;
    let config = SuiteConfig::resolve(&options);
    let scheduler = build_scheduler(&args, &config);
    let env = ProbeEnv::new(
        Arc::new(SystemTimeSource::new()),
        Arc::new(ThreadSleeper),
        scheduler,
        config,
    );

    let mut suite = Suite::new(env);
    if !args.only.is_empty() {
        suite = suite.only(&args.only);
    }
    let report = suite.run();

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{report}");
    }

    if !report.is_success() {
        bail!("{} of {} probes failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn execute_list(args: &ListArgs) -> Result<()> {
    if args.json {
        let probes: Vec<_> = ProbeKind::ALL
            .iter()
            .map(|kind| serde_json::json!({ "name": kind.name(), "description": kind.description() }))
            .collect();
        let options: Vec<_> = KNOWN_OPTIONS
            .iter()
            .map(|(name, default, unit)| {
                serde_json::json!({ "name": format!("{PROPERTY_PREFIX}{name}"), "default": default, "unit": unit })
            })
            .collect();
        let listing = serde_json::json!({ "probes": probes, "options": options });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Probes:");
    for kind in ProbeKind::ALL {
        println!("  {:<18} {}", kind.name(), kind.description());
    }
    println!("Options (also read from RTCHECK_* environment variables):");
    for (name, default, unit) in KNOWN_OPTIONS {
        println!("  {PROPERTY_PREFIX}{name:<48} default {default} {unit}");
    }
    Ok(())
}
