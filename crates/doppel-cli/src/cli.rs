//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use doppel_core::StrategyKind;

#[derive(Parser, Debug)]
#[command(name = "doppel", about = "Chat with a persona whose replies are quality-checked", version)]
pub struct Cli {
    /// Path to a settings YAML file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Retry strategy for rejected replies (single, multiple, progressive, best_of_n)
    #[arg(long, global = true, value_parser = parse_strategy)]
    pub strategy: Option<StrategyKind>,

    /// Regeneration rounds after a rejected reply
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Candidates generated by best_of_n
    #[arg(long, global = true)]
    pub best_of_n: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive chat on stdin
    Chat {
        /// Print the evaluator verdict after each reply
        #[arg(long)]
        show_verdict: bool,
    },

    /// Answer a single message
    Ask {
        message: String,

        /// Print the reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings
    Config {
        /// Also check provider credentials, notifications and the persona
        #[arg(long)]
        check: bool,
    },
}

fn parse_strategy(value: &str) -> Result<StrategyKind, String> {
    value.parse().map_err(|e: doppel_core::ConfigError| e.to_string())
}
