use chanrelay::config::resolve_config_path;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chanrelay")]
#[command(about = "Channel crawler that relays new messages to one chat", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every configured source once
    Run,
    /// Serve the HTTP surface; each POST /crawl triggers one run
    Serve,
    /// Print message log and watermark statistics
    Stats,
    /// Delete duplicate message log rows, keeping the earliest ingested.
    ///
    /// Logs created by chanrelay enforce one row per message id, so this only
    /// finds work on logs imported from stores without that constraint.
    Dedupe,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chanrelay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            chanrelay::cli::run::run(config_path).await?;
        }
        Some(Commands::Serve) => {
            chanrelay::cli::run::serve(config_path).await?;
        }
        Some(Commands::Stats) => {
            chanrelay::cli::maintenance::stats(config_path).await?;
        }
        Some(Commands::Dedupe) => {
            chanrelay::cli::maintenance::dedupe(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                chanrelay::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                chanrelay::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
