mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use settings::RunSettings;
use stormpipe_runtime::RunController;

/// Stormpipe - a pipeline orchestrator for stochastic-loss workflows
#[derive(Parser)]
#[command(name = "stormpipe")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Log level (trace, debug, info, warn, error)
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a run described by a settings file
  Run {
    /// Path to the run settings file (JSON)
    settings: PathBuf,

    /// Workspace root (overrides the settings file)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Partition count (overrides the settings file)
    #[arg(long)]
    partitions: Option<u32>,
  },
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .init();

  match cli.command {
    Some(Commands::Run {
      settings,
      workspace,
      partitions,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(settings, workspace, partitions))
    }
    None => {
      println!("stormpipe - use --help to see available commands");
      Ok(ExitCode::SUCCESS)
    }
  }
}

async fn run(
  settings_file: PathBuf,
  workspace: Option<PathBuf>,
  partitions: Option<u32>,
) -> Result<ExitCode> {
  let content = tokio::fs::read_to_string(&settings_file)
    .await
    .with_context(|| format!("failed to read settings file: {}", settings_file.display()))?;
  let settings = RunSettings::parse(&content)?;
  let request = settings.into_request(workspace, partitions)?;

  let controller = RunController::new(request);

  let cancel = controller.cancellation_token();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      cancel.cancel();
    }
  });

  let report = controller.run().await?;

  if report.success() {
    println!("run {} succeeded", report.run_id);
    for output in &report.outputs {
      println!("  output: {}", output.display());
    }
    Ok(ExitCode::SUCCESS)
  } else {
    eprintln!("run {} failed", report.run_id);
    for failure in report.failures() {
      match failure.exit_code() {
        Some(code) => eprintln!("  {} exited with code {}", failure.name, code),
        None => eprintln!("  {} ({:?})", failure.name, failure.status),
      }
    }
    Ok(ExitCode::FAILURE)
  }
}
