//! Tessera CLI
//!
//! Run, resume and configure tile simulations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tessera_engine::snapshot::SnapshotKey;
use tessera_engine::telemetry::TelemetryFrame;
use tessera_engine::{RunOptions, RunSummary, SimConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic tile simulation kernel", long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario to completion
    Run {
        /// Scenario file; the default scenario is used if it does not exist
        #[arg(short, long, default_value = "tessera.yaml")]
        config: PathBuf,

        /// Ticks to run instead of the configured tick_count
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Snapshot directory instead of the configured output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print every telemetry frame to stdout as a JSON line
        #[arg(long)]
        frames: bool,
    },

    /// Write the default scenario as YAML
    GenerateConfig {
        /// Destination file; stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Continue a scenario from one of its checkpoints
    Resume {
        /// Scenario file that produced the checkpoint
        #[arg(short, long, default_value = "tessera.yaml")]
        config: PathBuf,

        /// Tick of the checkpoint to resume from
        #[arg(long)]
        tick: u64,

        /// Ticks to run after the checkpoint
        #[arg(short, long)]
        ticks: u64,

        /// Snapshot directory instead of the configured output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print every telemetry frame to stdout as a JSON line
        #[arg(long)]
        frames: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            config,
            ticks,
            output,
            frames,
        } => cmd_run(&config, ticks, output, frames),
        Commands::GenerateConfig { output } => cmd_generate_config(output.as_deref()),
        Commands::Resume {
            config,
            tick,
            ticks,
            output,
            frames,
        } => cmd_resume(&config, tick, ticks, output, frames),
    }
}

/// Load `path`, or fall back to the default scenario if it does not exist.
fn load_config(path: &Path, output: Option<PathBuf>) -> Result<SimConfig> {
    let mut config = if path.exists() {
        SimConfig::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        info!(path = %path.display(), "config file not found; using the default scenario");
        tessera_engine::generate_config()
    };
    if let Some(dir) = output {
        config.snapshot.output_dir = dir;
    }
    Ok(config)
}

fn options(ticks: Option<u64>, frames: bool) -> RunOptions {
    let sink = frames.then(|| {
        Box::new(|frame: &TelemetryFrame| match serde_json::to_string(frame) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(tick = frame.tick, error = %e, "failed to encode telemetry frame"),
        }) as tessera_engine::run::FrameSink
    });
    RunOptions {
        ticks,
        store: None,
        sink,
    }
}

fn report(summary: &RunSummary) {
    println!("ticks run:       {}", summary.ticks_run);
    println!("final tick:      {}", summary.last_frame.tick);
    println!("population:      {}", summary.last_frame.total_population);
    println!("starving:        {} regions", summary.last_frame.starving_regions.len());
    for key in &summary.checkpoints {
        println!("checkpoint:      {key}");
    }
    if let Some(avg) = summary.average_tick_time {
        println!("avg tick time:   {avg:?}");
    }
    println!("state hash:      {}", summary.final_state_hash);
}

fn cmd_run(path: &Path, ticks: Option<u64>, output: Option<PathBuf>, frames: bool) -> Result<()> {
    let config = load_config(path, output)?;
    let summary = tessera_engine::run(&config, options(ticks, frames))
        .with_context(|| format!("running scenario '{}'", config.name))?;
    report(&summary);
    Ok(())
}

fn cmd_generate_config(output: Option<&Path>) -> Result<()> {
    let config = tessera_engine::generate_config();
    match output {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "default configuration written");
        }
        None => print!("{}", config.to_yaml_string()?),
    }
    Ok(())
}

fn cmd_resume(
    path: &Path,
    tick: u64,
    ticks: u64,
    output: Option<PathBuf>,
    frames: bool,
) -> Result<()> {
    let config = load_config(path, output)?;
    let key = SnapshotKey::new(config.name.clone(), tick);
    let summary = tessera_engine::resume(&config, &key, ticks, options(None, frames))
        .with_context(|| format!("resuming {key}"))?;
    report(&summary);
    Ok(())
}
