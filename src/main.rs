//! Broker Negotiator CLI binary

use anyhow::Context;
use broker_negotiator::cli::{load_settings, replay, run_live, Cli, Commands};
use broker_negotiator::{format_gold, PricePolicy};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Gold { price } => {
            println!("{}", format_gold(*price));
        }

        Commands::Decide { seller, offered } => {
            let settings = load_settings(&cli).context("Failed to load settings")?;
            let policy = PricePolicy::from_settings(&settings);
            println!(
                "{:?} (offered {}, asking {}, accept floor {})",
                policy.decide(*seller, *offered),
                format_gold(*offered),
                format_gold(*seller),
                format_gold(policy.accept_floor(*seller))
            );
        }

        Commands::Run => {
            let settings = load_settings(&cli).context("Failed to load settings")?;
            tracing::info!(
                "Accepting at {} of asking, declining below {}",
                settings.accept_threshold,
                settings.reject_threshold
            );
            run_live(&settings).await?;
        }

        Commands::Replay { script } => {
            let settings = load_settings(&cli).context("Failed to load settings")?;
            let raw = std::fs::read_to_string(script)
                .with_context(|| format!("Failed to read {}", script.display()))?;

            for line in replay(&settings, &raw)? {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
