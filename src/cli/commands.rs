//! CLI command definitions

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "broker-negotiator")]
#[command(about = "Broker Negotiator - automatic trade-broker deal negotiation", long_about = None)]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the accept threshold
    #[arg(long, global = true)]
    pub accept: Option<Decimal>,

    /// Override the reject threshold
    #[arg(long, global = true)]
    pub reject: Option<Decimal>,

    /// Act without human-like delays
    #[arg(long, global = true)]
    pub no_delay: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Negotiate live: JSON events on stdin, sends on stdout
    Run,

    /// Replay a script of events and clock advances
    Replay {
        /// Script file, one JSON record per line
        script: PathBuf,
    },

    /// Format a price as gold/silver/copper
    Gold {
        /// Price in copper
        #[arg(allow_hyphen_values = true)]
        price: i64,
    },

    /// Show what the price policy would do with an offer
    Decide {
        /// Asking price
        #[arg(short, long)]
        seller: i64,

        /// Offered price
        #[arg(short, long)]
        offered: i64,
    },
}
