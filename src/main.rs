use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use queuepilot::config::Config;
use queuepilot::core::deps::{is_ready, parse_dependencies, presentation_order, DependencyGraph};
use queuepilot::core::task::TaskId;
use queuepilot::persistence::LedgerStore;
use queuepilot::remote::cdp::CdpConnector;
use queuepilot::{qlog, qlog_warn, Result, RunReport, Scheduler, SchedulerEvent};

/// Queuepilot - runs a markdown task ledger through an IDE chat agent
#[derive(Parser, Debug)]
#[command(name = "queuepilot")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    QUEUEPILOT_LOG=LEVEL   Log level: error, warn, info, debug or trace (overrides --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.queuepilot/queuepilot.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.queuepilot/config.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// DevTools endpoint of the browser hosting the agent
    #[arg(short = 'e', long, global = true)]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run every task in the ledger, round by round
    Run {
        /// Path to the task ledger (markdown table)
        ledger: PathBuf,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,

        /// Rounds without progress before giving up
        #[arg(long)]
        stall_ceiling: Option<u32>,
    },

    /// Dispatch a single task by id
    Task {
        /// Path to the task ledger
        ledger: PathBuf,

        /// Task id (first column of the ledger)
        id: TaskId,
    },

    /// Show ordering, readiness and dependency problems without dispatching
    Plan {
        /// Path to the task ledger
        ledger: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    queuepilot::log::init(cli.debug);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }

    match cli.command {
        Command::Run {
            ledger,
            json,
            stall_ceiling,
        } => {
            if let Some(ceiling) = stall_ceiling {
                config.stall_ceiling = ceiling;
            }
            let report = run_schedule(&config, &ledger, json)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
            if !report.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Task { ledger, id } => {
            let success = run_single_task(&config, &ledger, id)?;
            println!("Task {}: {}", id, if success { "completed" } else { "failed" });
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Plan { ledger } => run_plan(&ledger),
    }
}

fn build_scheduler(config: &Config, cancel: CancellationToken) -> Scheduler {
    let connector = Arc::new(CdpConnector::new(
        config.surface.clone(),
        config.markers.clone(),
    ));
    Scheduler::from_config(connector, config).with_cancel_token(cancel)
}

/// Cancel the token on Ctrl-C.
fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            qlog_warn!("Ctrl-C received, cancelling run");
            eprintln!("\nCancelling, waiting for the current step to stop...");
            cancel.cancel();
        }
    });
}

fn run_schedule(config: &Config, ledger: &Path, json: bool) -> Result<RunReport> {
    qlog!("Run command: ledger={}, endpoint={}", ledger.display(), config.endpoint);
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let cancel = CancellationToken::new();
        watch_ctrl_c(cancel.clone());

        let (event_tx, mut event_rx) = mpsc::channel(100);
        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if !json {
                    print_event(&event);
                }
            }
        });

        let scheduler = build_scheduler(config, cancel).with_events(event_tx);
        let report = scheduler.run_schedule(ledger).await;
        drop(scheduler);
        let _ = printer.await;
        report
    })
}

fn run_single_task(config: &Config, ledger: &Path, id: TaskId) -> Result<bool> {
    qlog!("Task command: ledger={}, id={}", ledger.display(), id);
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let cancel = CancellationToken::new();
        watch_ctrl_c(cancel.clone());
        build_scheduler(config, cancel)
            .run_single_task(ledger, id)
            .await
    })
}

fn print_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::RoundStarted { round, ready } => {
            println!("Round {}: {} task(s) ready", round, ready.len());
        }
        SchedulerEvent::TaskStarted { task_id, name } => {
            println!("  -> Task {}: {}", task_id, name);
        }
        SchedulerEvent::TaskCompleted { task_id, forced } => {
            let note = if *forced { " (no completion marker)" } else { "" };
            println!("  ok Task {}{}", task_id, note);
        }
        SchedulerEvent::TaskFailed { task_id, error } => {
            println!("  !! Task {}: {}", task_id, error);
        }
        SchedulerEvent::RoundFinished {
            round,
            completed,
            stall_count,
        } => {
            println!(
                "Round {} done: {} completed, stall {}",
                round, completed, stall_count
            );
        }
        SchedulerEvent::RunFinished { .. } => println!(),
    }
}

fn run_plan(ledger_path: &Path) -> Result<()> {
    let ledger = LedgerStore::load_sync(ledger_path)?;
    let completed = ledger.completed_ids();
    let graph = DependencyGraph::build(&ledger.tasks);

    println!("{} tasks in {}", ledger.len(), ledger_path.display());
    println!();
    for task in presentation_order(&ledger.tasks) {
        let marker = if task.is_completed() {
            "done   "
        } else if is_ready(task, &completed) {
            "ready  "
        } else {
            "blocked"
        };
        let deps: Vec<String> = parse_dependencies(&task.dependencies)
            .iter()
            .map(|d| d.to_string())
            .collect();
        let deps = if deps.is_empty() {
            String::new()
        } else {
            format!(" (after {})", deps.join(", "))
        };
        println!("  [{}] {:>3}  {}{}", marker, task.id, task.name, deps);
    }

    if !ledger.duplicates.is_empty() {
        let ids: Vec<String> = ledger.duplicates.iter().map(|d| d.to_string()).collect();
        println!();
        println!("Duplicate ids (last row used): {}", ids.join(", "));
    }

    let missing = graph.tasks_with_missing();
    if !missing.is_empty() {
        println!();
        println!("Dependencies on tasks not in the ledger:");
        for id in missing {
            let ids: Vec<String> = graph
                .missing_dependencies(id)
                .iter()
                .map(|d| d.to_string())
                .collect();
            println!("  Task {} -> {}", id, ids.join(", "));
        }
    }

    let cycles = graph.cycles();
    if !cycles.is_empty() {
        println!();
        println!("Dependency cycles:");
        for cycle in cycles {
            let ids: Vec<String> = cycle.iter().map(|d| d.to_string()).collect();
            println!("  {}", ids.join(" <-> "));
        }
    }
    Ok(())
}
