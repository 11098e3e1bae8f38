// Purpose: Provides the command-line interface for running a simulation.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{BatchMode, SimulationConfig};
use crate::control::{Command, ControlHandle};
use crate::coordinator::{SimulationReport, WorkerCoordinator};
use crate::observer::{CallbackObserver, EventKind, ObserverRegistry, SimulationEvent};
use crate::order::format_cents;

/// Batchline producer/consumer simulation
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[clap(long, global = true, env = "BATCHLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run a simulation until shut down
    Run(RunArgs),

    /// Show the keys understood while a simulation runs
    Controls,

    /// Print the effective configuration as TOML
    Config(OverrideArgs),
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Number of chefs (producers)
    #[clap(long)]
    chefs: Option<usize>,

    /// Number of deliverers (consumers)
    #[clap(long)]
    deliverers: Option<usize>,

    /// Queue capacity
    #[clap(long)]
    capacity: Option<usize>,

    /// Orders per worker per batch
    #[clap(long)]
    batch_size: Option<u32>,

    /// Seed for reproducible runs
    #[clap(long)]
    seed: Option<u64>,

    /// Timeout for one queue attempt, in milliseconds
    #[clap(long)]
    operation_timeout_ms: Option<u64>,

    /// Shortest pause between work items, in milliseconds
    #[clap(long)]
    min_delay_ms: Option<u64>,

    /// Longest pause between work items, in milliseconds
    #[clap(long)]
    max_delay_ms: Option<u64>,

    /// Close batches without an operator
    #[clap(long)]
    automatic: bool,
}

impl OverrideArgs {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(chefs) = self.chefs {
            config.chefs = chefs;
        }
        if let Some(deliverers) = self.deliverers {
            config.deliverers = deliverers;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(timeout) = self.operation_timeout_ms {
            config.operation_timeout_ms = timeout;
        }
        if let Some(min) = self.min_delay_ms {
            config.min_delay_ms = min;
        }
        if let Some(max) = self.max_delay_ms {
            config.max_delay_ms = max;
        }
        if self.automatic {
            config.batch_mode = BatchMode::Automatic;
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    overrides: OverrideArgs,

    /// Stop after this many seconds
    #[clap(long)]
    duration_secs: Option<u64>,

    /// Print events and the final report as JSON
    #[clap(long)]
    json: bool,
}

/// Parse arguments and run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run(args) => {
            let config = effective_config(cli.config.as_deref(), &args.overrides)?;
            run_simulation(config, args).await?;
        }
        CliCommand::Controls => print_controls(),
        CliCommand::Config(overrides) => {
            let config = effective_config(cli.config.as_deref(), &overrides)?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn effective_config(path: Option<&Path>, overrides: &OverrideArgs) -> Result<SimulationConfig> {
    let mut config = match path {
        Some(path) => SimulationConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_simulation(config: SimulationConfig, args: RunArgs) -> Result<()> {
    let observers = ObserverRegistry::new();
    observers.register(Arc::new(console_observer(args.json)));

    if !args.json {
        println!("=> Number of chefs: {}", config.chefs);
        println!("=> Number of deliverers: {}", config.deliverers);
        println!("=> Queue capacity: {}", config.capacity);
        println!();
        print_controls();
    }

    let running = WorkerCoordinator::new(config, observers)?
        .start()
        .context("Failed to start simulation")?;
    let handle = running.handle();

    let signal_handle = handle.clone();
    ctrlc::set_handler(move || signal_handle.request_shutdown())
        .context("Error setting Ctrl-C handler")?;

    spawn_input_reader(handle.clone());

    if let Some(secs) = args.duration_secs {
        let timer_handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(secs, "run duration elapsed");
            timer_handle.request_shutdown();
        });
    }

    let report = running.join().await.context("Simulation failed")?;
    print_report(&report, args.json)?;
    Ok(())
}

// Reading stdin from the runtime would keep it alive after shutdown, so
// keys are read on a plain thread and forwarded over the control channel.
fn spawn_input_reader(handle: ControlHandle) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if handle.blocking_send(command).is_err() || command == Command::Shutdown {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "ignoring input"),
            }
        }
    });
}

fn console_observer(json: bool) -> CallbackObserver {
    CallbackObserver::new(
        "console",
        None,
        Box::new(move |event: &SimulationEvent| {
            if json {
                match serde_json::to_string(event) {
                    Ok(line) => println!("{}", line),
                    Err(err) => warn!(error = %err, "failed to serialize event"),
                }
            } else if let Some(text) = render(event) {
                println!("{}", text);
            }
        }),
    )
}

fn render(event: &SimulationEvent) -> Option<String> {
    let text = match &event.kind {
        EventKind::SimulationStarted { seed, .. } => {
            format!("=> Simulation started (seed {})", seed)
        }
        EventKind::OrderPrepared { worker, order } => format!("[{}]: Prepared {}.", worker, order),
        EventKind::OrderDelivered { worker, order } => format!("[{}]: Delivered {}", worker, order),
        EventKind::WorkerWaiting { .. } => return None,
        EventKind::BatchCompleted {
            batch,
            income,
            total_cents,
            ..
        } => {
            let mut text = format!("=== Batch {} is done, time to sum up the income! ===", batch);
            for (name, cents) in income {
                text.push_str(&format!("\n{}: {}", name, format_cents(*cents)));
            }
            text.push_str(&format!("\nTotal: {}", format_cents(*total_cents)));
            text
        }
        EventKind::BatchSummaryDeferred {
            waiting,
            participants,
        } => format!(
            "Waiting for chefs and deliverers to finish the current batch ({} of {} ready)...",
            waiting,
            participants.saturating_sub(1)
        ),
        EventKind::ControlApplied { command, status } => match command {
            Command::PauseProduction => "=> Order preparation has been paused...".to_string(),
            Command::ResumeProduction => "=> Order preparation has been resumed.".to_string(),
            Command::PauseDelivery => "=> Deliveries have been paused...".to_string(),
            Command::ResumeDelivery => "=> Deliveries have been resumed.".to_string(),
            Command::SummarizeBatch => "=> Closing the current batch...".to_string(),
            Command::Shutdown => "=> Closing down...".to_string(),
            Command::Status => match status {
                Some(status) => format!(
                    "=> Queue {}/{}{}{}, batch {}, {} of {} at the barrier, {} prepared, {} delivered",
                    status.queue_len,
                    status.capacity,
                    if status.production_paused { ", preparation paused" } else { "" },
                    if status.delivery_paused { ", delivery paused" } else { "" },
                    status.batch,
                    status.waiting,
                    status.participants,
                    status.produced,
                    status.consumed
                ),
                None => return None,
            },
        },
        EventKind::WorkerStopped { worker, .. } => format!("[{}]: Stopped working.", worker),
        EventKind::SimulationStopped { .. } => "All workers have stopped for the day.".to_string(),
    };
    Some(text)
}

fn print_controls() {
    println!("Control:");
    for command in Command::ALL {
        println!("  {} - {}", command.key(), command.description());
    }
}

fn print_report(report: &SimulationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("Prepared: {}", report.produced);
    println!("Delivered: {}", report.consumed);
    println!("Left in queue: {}", report.residual);
    println!("Batches completed: {}", report.batches);
    for (name, cents) in &report.income {
        println!("  {}: {}", name, format_cents(*cents));
    }
    println!("Total income: {}", report.total());
    println!("Seed: {} (pass --seed {} to replay)", report.seed, report.seed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;
    use crate::worker::WorkerId;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "batchline",
            "--config",
            "batchline.toml",
            "run",
            "--chefs",
            "4",
            "--seed",
            "7",
            "--automatic",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("batchline.toml")));
        let CliCommand::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(args.json);

        let mut config = SimulationConfig::default();
        args.overrides.apply(&mut config);
        assert_eq!(config.chefs, 4);
        assert_eq!(config.deliverers, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.batch_mode, BatchMode::Automatic);
    }

    #[test]
    fn test_effective_config_reads_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batchline.toml");
        std::fs::write(&path, "capacity = 8\nchefs = 2\n").unwrap();

        let overrides = OverrideArgs {
            chefs: Some(6),
            deliverers: Some(6),
            ..OverrideArgs::default()
        };
        let config = effective_config(Some(path.as_path()), &overrides).unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.chefs, 6);
        assert_eq!(config.deliverers, 6);
    }

    #[test]
    fn test_effective_config_rejects_invalid_overrides() {
        let overrides = OverrideArgs {
            capacity: Some(0),
            ..OverrideArgs::default()
        };
        assert!(effective_config(None, &overrides).is_err());
    }

    #[test]
    fn test_render_matches_console_wording() {
        let order = Order {
            sequence: 1,
            name: "Pepperoni".into(),
            size: 14,
            topping: "Onions".into(),
            price_cents: 2999,
        };
        let event = SimulationEvent::now(EventKind::OrderPrepared {
            worker: WorkerId::chef(2),
            order,
        });
        assert_eq!(
            render(&event).unwrap(),
            "[Chef 2]: Prepared Pepperoni of size 14 with Onions ($29.99)."
        );

        let waiting = SimulationEvent::now(EventKind::WorkerWaiting {
            worker: WorkerId::chef(2),
            batch: 1,
        });
        assert!(render(&waiting).is_none());
    }
}
