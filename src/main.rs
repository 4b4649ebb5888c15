use batchlog::cli;
use batchlog::config::resolve_config_path;
use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "batchlog=info,tower_http=info";

/// Serves rotated service logs as numbered batches over HTTP.
#[derive(Parser)]
#[command(name = "batchlog", version)]
struct Cli {
    /// Config file; defaults to ~/.config/batchlog/config.yml, then /etc/batchlog/config.yml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the watcher and the HTTP server (the default)
    Run,
    /// Starter configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write the commented starter config
    Init(InitArgs),
}

#[derive(Args)]
struct InitArgs {
    /// Print instead of writing the user config file
    #[arg(long)]
    stdout: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config_path = resolve_config_path(cli.config.as_deref());
            cli::run::run(config_path).await?
        }
        Command::Config(ConfigCommand::Init(args)) => cli::config::init(args.stdout)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    dispatch(Cli::parse()).await
}
