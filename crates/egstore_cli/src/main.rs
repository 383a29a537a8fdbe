//! egstore CLI
//!
//! Command-line tools for exercising the egstore engine.
//!
//! # Commands
//!
//! - `simulate` - Run a concurrent counter workload under a consistency policy
//! - `classify` - Show when a transaction becomes visible on an entity group

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::{OutputFormat, PolicyArg, SimulateOptions};
use tracing_subscriber::EnvFilter;

/// egstore command-line tools.
#[derive(Parser)]
#[command(name = "egstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent read-modify-write transactions and verify no update is lost
    Simulate {
        /// Consistency policy
        #[arg(short, long, value_enum, default_value = "master-slave")]
        policy: PolicyArg,

        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Transactions per thread
        #[arg(short, long, default_value = "250")]
        ops: usize,

        /// Number of counters, each in its own entity group
        #[arg(short, long, default_value = "8")]
        groups: usize,

        /// Apply probability of the pseudo-random policy
        #[arg(long, default_value = "0.5")]
        probability: f64,

        /// Seed of the pseudo-random policy
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Retry conflicts without backing off
        #[arg(long)]
        no_backoff: bool,

        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the classification and apply delay of a transaction on a group
    Classify {
        /// Transaction id
        #[arg(long)]
        txn: u64,

        /// Entity group id
        #[arg(long)]
        group: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            policy,
            threads,
            ops,
            groups,
            probability,
            seed,
            no_backoff,
            format,
        } => {
            let options = SimulateOptions {
                policy,
                threads,
                ops,
                groups,
                probability,
                seed,
                no_backoff,
            };
            commands::simulate::run(&options, format)?;
        }
        Commands::Classify { txn, group } => {
            commands::classify::run(txn, group);
        }
        Commands::Version => {
            println!("egstore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
