use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod cmd;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about = "Autonomous QA validation loop for agent-built work")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Spec directory holding implementation_plan.json. Defaults to the most
    /// recently modified one under .vigil/specs/
    #[arg(long, global = true)]
    pub spec_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run, inspect or reset QA validation for a spec
    Qa {
        #[command(subcommand)]
        command: QaCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum QaCommands {
    /// Review, fix and re-review until approved, exhausted or escalated
    Run {
        /// Override [qa] max_iterations from vigil.toml
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Run even when the build still has unfinished subtasks
        #[arg(long)]
        force: bool,
    },
    /// Show signoff state, iteration count and build progress
    Status,
    /// Summarize recurring issues across the iteration history
    Summary {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear the signoff, iteration history and stats
    Reset,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default vigil.toml file
    Init,
}

/// Stderr logging filtered by `RUST_LOG`; `qa run` also gets a daily JSON
/// log file under `.vigil/logs/`. The guard must outlive the run.
fn init_tracing(verbose: bool, file_log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    let filter = EnvFilter::from_default_env().add_directive(default_level.into());

    let (file_layer, guard) = match file_log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "vigil.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let file_log_dir = matches!(
        cli.command,
        Commands::Qa {
            command: QaCommands::Run { .. }
        }
    )
    .then(|| vigil::vigil_config::get_vigil_dir(&project_dir).join("logs"));
    let guard = init_tracing(cli.verbose, file_log_dir.as_deref());

    match &cli.command {
        Commands::Qa { command } => match command {
            QaCommands::Run {
                max_iterations,
                force,
            } => {
                let approved = cmd::cmd_qa_run(&cli, project_dir, *max_iterations, *force).await?;
                if !approved {
                    drop(guard);
                    std::process::exit(1);
                }
            }
            QaCommands::Status => cmd::cmd_qa_status(&cli, project_dir)?,
            QaCommands::Summary { json } => cmd::cmd_qa_summary(&cli, project_dir, *json)?,
            QaCommands::Reset => cmd::cmd_qa_reset(&cli, project_dir)?,
        },
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
