use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use waveplan::config::Config;
use waveplan::orchestration::{
    Coordinator, CoordinatorConfig, CoordinatorEvent, RunOutcome, ShellExecutor,
};
use waveplan::plan::{PhaseId, Plan};
use waveplan::report::Progress;
use waveplan::state::{FileStore, StateStore};
use waveplan::{wlog, wlog_error, Result};

/// Waveplan - run phased plans in dependency-ordered parallel waves
#[derive(Parser, Debug)]
#[command(name = "waveplan")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WAVEPLAN_DEBUG=1     Enable debug logging (alternative to --debug)\n    WAVEPLAN_LOG=<level> Log level: error, warn, info, debug, trace")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.waveplan/waveplan.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate a plan descriptor and print its waves
    Compile {
        /// Plan descriptor (.toml or .json)
        plan: PathBuf,
    },

    /// Execute a plan, resuming from its saved state
    Run {
        plan: PathBuf,

        /// Maximum phases running at once (default: whole wave)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Per-phase timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// State file (default: <state_dir>/<plan>.state.json)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Directory verification commands run in
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Auto-confirm checkpoint tasks
        #[arg(short = 't', long)]
        trust: bool,
    },

    /// Show the progress report
    Status {
        plan: PathBuf,

        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Reset a phase to pending so the next run dispatches it again
    Retry {
        plan: PathBuf,

        /// Phase number
        phase: PhaseId,

        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Print the state event log
    History {
        plan: PathBuf,

        #[arg(long)]
        state: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    waveplan::log::init_with_debug(cli.debug);
    wlog!("waveplan starting: {:?}", cli.command);

    let config = Config::load()?;
    let result = match cli.command {
        Command::Compile { plan } => run_compile(&plan),
        Command::Run {
            plan,
            max_parallel,
            timeout,
            state,
            workdir,
            trust,
        } => {
            let mut config = config;
            if max_parallel.is_some() {
                config.max_parallel = max_parallel;
            }
            if timeout.is_some() {
                config.phase_timeout_secs = timeout;
            }
            if trust {
                config.trust = true;
            }
            run_plan(&config, &plan, state, workdir)
        }
        Command::Status { plan, state } => run_status(&config, &plan, state),
        Command::Retry { plan, phase, state } => run_retry(&config, &plan, phase, state),
        Command::History { plan, state } => run_history(&config, &plan, state),
    };

    if let Err(e) = &result {
        wlog_error!("command failed: {}", e);
    }
    result
}

fn state_path(config: &Config, plan: &Plan, state: Option<PathBuf>) -> Result<PathBuf> {
    match state {
        Some(path) => Ok(path),
        None => config.state_path_for(plan.id()),
    }
}

fn open_store(config: &Config, plan: &Plan, state: Option<PathBuf>) -> Result<FileStore> {
    let path = state_path(config, plan, state)?;
    wlog!("state file: {}", path.display());
    Ok(FileStore::new(&path, plan.id()))
}

fn run_compile(path: &Path) -> Result<()> {
    let plan = Plan::load(path)?;
    println!("{} ({} phases, {} waves)", plan.name(), plan.len(), plan.waves().len());
    if !plan.description().is_empty() {
        println!("{}", plan.description());
    }
    for wave in plan.waves() {
        println!();
        println!("Wave {}:", wave.id);
        for id in &wave.phases {
            let Some(phase) = plan.phase(*id) else {
                continue;
            };
            let after = if phase.depends_on.is_empty() {
                String::new()
            } else {
                let ids: Vec<String> = phase.depends_on.iter().map(|p| p.to_string()).collect();
                format!(" (after {})", ids.join(", "))
            };
            println!("  {}{}", phase.label(), after);
            for file in phase.files() {
                println!("      {}", file.display());
            }
        }
    }
    Ok(())
}

fn run_plan(
    config: &Config,
    path: &Path,
    state: Option<PathBuf>,
    workdir: Option<PathBuf>,
) -> Result<()> {
    let plan = Plan::load(path)?;
    let store = Arc::new(open_store(config, &plan, state)?);
    let workdir = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let executor = Arc::new(ShellExecutor::from_config(config, &workdir));
    if !executor.is_available() {
        eprintln!("Warning: shell '{}' not found on PATH", executor.shell());
    }

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling: waiting for running phases to finish...");
                wlog!("ctrl-c received, cancelling dispatch");
                signal_cancel.cancel();
            }
        });

        let (tx, mut rx) = mpsc::channel(64);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        });

        let coordinator =
            Coordinator::new(store.clone(), CoordinatorConfig::from_config(config)).with_events(tx);
        let report = coordinator.run(&plan, executor, cancel).await;
        drop(coordinator);
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
        report
    })?;

    println!();
    print!("{}", report);

    let snapshot = rt.block_on(store.load())?;
    println!();
    print!(
        "{}",
        Progress::new(&plan, &snapshot).render(config.effective_report_title())
    );

    if report.outcome != RunOutcome::Complete {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::WaveStarted { wave, phases } => {
            let ids: Vec<String> = phases.iter().map(|p| p.to_string()).collect();
            println!("Wave {}: starting phases {}", wave, ids.join(", "));
        }
        CoordinatorEvent::PhaseStarted { phase } => println!("  phase {} running", phase),
        CoordinatorEvent::PhaseCompleted { phase } => println!("  phase {} done", phase),
        CoordinatorEvent::PhaseFailed { phase, reason } => {
            println!("  phase {} failed: {}", phase, reason)
        }
        CoordinatorEvent::PhaseBlocked { phase, cause } => {
            println!("  phase {} blocked by phase {}", phase, cause)
        }
        CoordinatorEvent::WaveFinished { wave } => println!("Wave {} finished", wave),
        CoordinatorEvent::RunFinished { .. } => {}
    }
}

fn run_status(config: &Config, path: &Path, state: Option<PathBuf>) -> Result<()> {
    let plan = Plan::load(path)?;
    let store = open_store(config, &plan, state)?;
    let rt = tokio::runtime::Runtime::new()?;
    let snapshot = rt.block_on(store.load())?;

    let unknown = snapshot.unknown_phases(&plan);
    if !unknown.is_empty() {
        return Err(waveplan::Error::ResumeConflict { phases: unknown });
    }
    let progress = Progress::new(&plan, &snapshot);
    print!("{}", progress.render(config.effective_report_title()));
    if progress.is_finished() && !progress.blocked_phases().is_empty() {
        println!();
        println!("Nothing left to run. Use `waveplan retry` on a failed phase to continue.");
    }
    Ok(())
}

fn run_retry(config: &Config, path: &Path, phase: PhaseId, state: Option<PathBuf>) -> Result<()> {
    let plan = Plan::load(path)?;
    let store = Arc::new(open_store(config, &plan, state)?);
    let coordinator = Coordinator::new(store, CoordinatorConfig::from_config(config));

    let rt = tokio::runtime::Runtime::new()?;
    let snapshot = rt.block_on(coordinator.retry(&plan, phase))?;
    println!("Phase {} is now {}", phase, snapshot.status(phase));
    Ok(())
}

fn run_history(config: &Config, path: &Path, state: Option<PathBuf>) -> Result<()> {
    let plan = Plan::load(path)?;
    let store = open_store(config, &plan, state)?;
    let rt = tokio::runtime::Runtime::new()?;
    let snapshot = rt.block_on(store.load())?;

    if snapshot.events().is_empty() {
        println!("No events recorded for {}", plan.name());
        return Ok(());
    }
    for event in snapshot.events() {
        println!("{}", event);
    }
    Ok(())
}
