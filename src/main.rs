use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about = "Micro-phase orchestration engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to cadence.toml. Defaults to .cadence/cadence.toml in the project directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of styled output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a feature stream from a plan file and drive it to completion
    Start {
        /// Path to the plan JSON declaring the stream's phases
        plan: PathBuf,

        /// Override the feature name from the plan
        #[arg(long)]
        feature: Option<String>,
    },
    /// Show the status snapshot of a stream
    Status {
        /// Stream identifier printed by `start`
        stream: String,

        /// Also print the transition log
        #[arg(long)]
        log: bool,
    },
    /// Abandon a stream: mark all non-terminal phases abandoned
    Abandon {
        /// Stream identifier printed by `start`
        stream: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "cadence=debug" } else { "cadence=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(&cli).await;

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
            cmd::exit_code_for(&err)
        }
    };
    std::process::exit(code.into());
}

async fn run(cli: &Cli) -> Result<u8> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config_path = cli.config.as_deref();

    match &cli.command {
        Commands::Start { plan, feature } => {
            cmd::cmd_start(&project_dir, config_path, plan, feature.as_deref(), cli.json).await
        }
        Commands::Status { stream, log } => {
            cmd::cmd_status(&project_dir, config_path, stream, *log, cli.json)
        }
        Commands::Abandon { stream } => {
            cmd::cmd_abandon(&project_dir, config_path, stream, cli.json)
        }
    }
}
