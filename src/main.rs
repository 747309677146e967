//! dbweave CLI entry point.

use clap::Parser;

use dbweave::cli::{commands, Cli, Commands};
use dbweave::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(&cli).await;
    if let Err(err) = result {
        dbweave::cli::handle_error(err, cli.json);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    // Keep stdout clean for machine-readable output.
    log_config.enable_stdout = !cli.json && log_config.log_dir.is_none();
    let _logger = LoggerImpl::init(&log_config)?;

    match cli.command {
        Commands::Health => commands::health(&config, cli.json).await,
        Commands::Stats => commands::stats(&config, cli.json).await,
        Commands::Config => commands::show_config(&config, cli.json),
    }
}
