use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use sysgraph_cli::commands;
use sysgraph_cli::{logging, Cli, Command, SysgraphConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        SysgraphConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    logging::init(&config.logging.level, cli.debug)?;
    debug!(config = ?config, "Configuration loaded");

    match cli.command {
        Command::Diagnose(args) => {
            commands::apply_diagnose_flags(&mut config, &args);
            config.validate().context("Invalid configuration")?;
            info!(
                snapshot = %args.snapshot.display(),
                agents = ?config.agents.enabled,
                "Sysgraph diagnosis starting"
            );
            commands::diagnose(&config, &args).await?;
        }
        Command::Rules(args) => {
            println!("{}", commands::rules(&config, &args)?);
        }
        Command::CheckSnapshot { path } => {
            let (report, valid) = commands::check_snapshot(&path)?;
            println!("{report}");
            if !valid {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
