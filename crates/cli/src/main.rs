mod context;
mod controller_cmd;
mod doctor;
mod facade;
mod worker;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memory_config::AppConfig;

use context::Context;

#[derive(Debug, Parser)]
#[command(name = "memory", version, about = "Tiered conversational memory service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Direct invocations of the public memory API against a running backend.
    Facade {
        #[command(subcommand)]
        command: facade::FacadeCommand,
    },
    /// Run a single embedding or preference worker loop in the foreground.
    Worker(worker::WorkerArgs),
    /// Supervise a pool of workers (or describe an out-of-process deployment).
    Controller {
        #[command(subcommand)]
        command: controller_cmd::ControllerCommand,
    },
    /// Report backend connectivity, queue depth, and collection sizes.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config).with_context(|| format!("loading config from {}", cli.config))?;
    let ctx = Context::new(config);

    match cli.command {
        Commands::Facade { command } => facade::run(&ctx, command).await,
        Commands::Worker(args) => worker::run(&ctx, args).await,
        Commands::Controller { command } => controller_cmd::run(&ctx, command).await,
        Commands::Doctor => doctor::run(&ctx).await,
    }
}
