mod config;
mod control;
mod intent;
mod runner;
mod signals;
mod supervisor;

use clap::Parser;
use runner::{RunError, Runner};
use std::path::PathBuf;
use supervisor::ChildCommand;
use tokio_util::sync::CancellationToken;

/// A minimal process supervisor: keeps one child running across crashes.
///
/// One Ctrl-C restarts the child, a short burst stops it and exits, five or
/// more in quick succession force-kill it. SIGTERM always stops gracefully.
#[derive(Parser, Debug)]
#[command(name = "respawn", version, about)]
pub struct Cli {
    /// Config file path (default: respawn.toml, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print resolved settings and the child command, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (signals received, coalesced requests)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Command to supervise, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "respawn=debug"
    } else if cli.quiet {
        "respawn=warn"
    } else {
        "respawn=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, required) = match cli.config {
        Some(path) => (path, true),
        None => (PathBuf::from(config::DEFAULT_CONFIG_FILE), false),
    };
    let config = config::load_config(&config_path, required)?;
    let command = ChildCommand::from_argv(cli.command)?;

    if cli.dry_run {
        println!("command = {:?}", command.to_string());
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let feed = signals::install_feed().map_err(RunError::SignalFeed)?;
    let cancel = CancellationToken::new();
    let runner = Runner::new(config, command);

    let summary = runner.run(feed, cancel.clone()).await;
    cancel.cancel();
    let summary = summary?;

    tracing::info!(
        runs = summary.runs,
        signals_sent = summary.signals_sent,
        last_delivered = ?summary.last_delivered,
        intent = %summary.final_intent,
        "supervisor exiting"
    );
    Ok(())
}
