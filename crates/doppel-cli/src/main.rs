//! Doppel CLI entry point.

mod cli;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use doppel_core::{ChatTurn, Settings};
use doppel_runtime::{
    sink_from_settings, ChatReply, Orchestrator, ProviderError, ProviderRegistry,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings from `--config` (or defaults) with command-line overrides, and
/// the directory persona paths are relative to.
fn load_settings(cli: &Cli) -> Result<(Settings, PathBuf)> {
    let (mut settings, base_dir) = match &cli.config {
        Some(path) => {
            let settings = Settings::from_yaml_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            let base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (settings, base_dir)
        }
        None => (Settings::default(), PathBuf::from(".")),
    };

    if let Some(strategy) = cli.strategy {
        settings.strategy = strategy;
    }
    if let Some(max_attempts) = cli.max_attempts {
        settings.retry.max_attempts = max_attempts;
    }
    if let Some(best_of_n) = cli.best_of_n {
        settings.best_of_n = best_of_n;
    }
    settings.validate().context("Invalid settings")?;

    Ok((settings, base_dir))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, base_dir) = load_settings(&cli)?;
    init_tracing(&settings.log_level);

    tracing::debug!(config = ?cli.config, strategy = %settings.strategy, "Settings loaded");

    match cli.command {
        Command::Config { check } => show_config(&settings, &base_dir, check),
        Command::Ask { message, json } => {
            let orchestrator = Orchestrator::from_settings(&settings, &base_dir)
                .context("Failed to set up providers")?;
            let reply = orchestrator.handle(&message, &[]).await;
            print_reply(&reply, json)
        }
        Command::Chat { show_verdict } => {
            let orchestrator = Orchestrator::from_settings(&settings, &base_dir)
                .context("Failed to set up providers")?;
            chat(&orchestrator, show_verdict).await
        }
    }
}

fn show_config(settings: &Settings, base_dir: &Path, check: bool) -> Result<()> {
    print!("{}", settings.to_yaml()?);

    if check {
        println!();
        for line in check_report(settings, base_dir) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// One line per collaborator the settings point at, without building any
/// of them.
fn check_report(settings: &Settings, base_dir: &Path) -> Vec<String> {
    let registry = ProviderRegistry::with_defaults();
    let persona = match settings.persona.source(base_dir).load() {
        Ok(profile) => profile.name,
        Err(e) => format!("{} (generic prompts will be used)", e),
    };

    vec![
        format!("generation provider: {}", status(registry.check(&settings.generation))),
        format!("evaluation provider: {}", status(registry.check(&settings.evaluation))),
        format!("notifications: {}", sink_from_settings(&settings.notifications).name()),
        format!("persona: {}", persona),
    ]
}

fn status(result: Result<(), ProviderError>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

fn print_reply(reply: &ChatReply, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "content": reply.content,
            "verdict": reply.verdict,
            "was_retried": reply.was_retried,
            "retry": reply.retry.as_ref().map(|outcome| outcome.metrics()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", reply.content);
    }
    Ok(())
}

async fn chat(orchestrator: &Orchestrator, show_verdict: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turns: Vec<ChatTurn> = Vec::new();

    eprintln!("Type a message, or /quit to leave.");
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "/quit" || message == "/exit" {
            break;
        }

        let reply = orchestrator.handle_turns(message, &turns).await;
        println!("{}", reply.content);

        if show_verdict {
            match &reply.verdict {
                Some(verdict) => eprintln!(
                    "[{}{}] {}",
                    if verdict.acceptable { "accepted" } else { "rejected" },
                    if reply.was_retried { ", retried" } else { "" },
                    verdict.feedback
                ),
                None => eprintln!("[not evaluated]"),
            }
        }

        turns.push(ChatTurn::new(message, reply.content));
    }
    Ok(())
}
