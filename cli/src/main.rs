// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use jingju_cli::{
    get_jingju_chat_logo, repl,
    settings::{self, Overrides},
};
use jingju_core::{StreamingChatClient, TurnOutcome};
use owo_colors::OwoColorize;
use std::{path::PathBuf, sync::Arc};

fn show_welcome_message() {
    println!("{}", get_jingju_chat_logo());
    println!(
        "🎭 {} - 京剧知识助手",
        "Jingju Chat".bright_red()
    );
    println!("💡 Version: {}", env!("CARGO_PKG_VERSION").bright_green());
    println!();
}

#[derive(Parser)]
#[command(
    name = "jingju-chat",
    about = "Jingju Chat - Beijing Opera knowledge assistant",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Chat endpoint URL
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Maximum output tokens per answer
    #[arg(short, long)]
    max_tokens: Option<u32>,

    /// Request the whole answer at once instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record and print a diagnostic trace of each turn
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Ask a single question without interactive mode
    #[arg(short, long)]
    run: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let overrides = Overrides {
        endpoint: cli.endpoint,
        max_tokens: cli.max_tokens,
        no_stream: cli.no_stream,
        debug: cli.debug,
    };
    let config = overrides.apply(settings::load_config(cli.config.as_deref())?);
    config.validate()?;

    println!("🌐 Endpoint: {}", config.endpoint.bright_blue());
    println!(
        "⚙️ Streaming: {}, Max tokens: {}",
        config.streaming.bright_green(),
        config.max_output_tokens.bright_yellow()
    );

    let client = Arc::new(StreamingChatClient::with_http(config)?);

    if let Some(question) = cli.run {
        handle_run(client, question).await
    } else {
        show_welcome_message();
        repl::run_interactive(client).await
    }
}

async fn handle_run(client: Arc<StreamingChatClient>, question: String) -> Result<()> {
    println!("🚀 Asking: {}", question.bright_white());

    let outcome = repl::run_turn(&client, &question).await?;
    client.shutdown();

    match outcome {
        Some(TurnOutcome::Completed(_)) | Some(TurnOutcome::Empty) => Ok(()),
        Some(TurnOutcome::Cancelled) => std::process::exit(130),
        Some(TurnOutcome::Failed { .. }) | None => std::process::exit(1),
    }
}
