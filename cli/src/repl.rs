// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

//! Line-oriented chat session on stdin/stdout

use anyhow::Result;
use jingju_core::{ConversationMessage, Sender, StreamingChatClient, TurnOutcome};
use owo_colors::OwoColorize;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Debug,
    History,
    Help,
    Unknown(String),
    Message(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        match line {
            "/quit" | "/exit" => Command::Quit,
            "/debug" => Command::Debug,
            "/history" => Command::History,
            "/help" => Command::Help,
            _ if line.starts_with('/') => Command::Unknown(line.to_string()),
            _ => Command::Message(line.to_string()),
        }
    }
}

/// Turns successive partial-text snapshots into the suffix not yet printed
#[derive(Debug, Default)]
pub struct PartialPrinter {
    printed: String,
}

impl PartialPrinter {
    pub fn delta<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        if text.is_empty() {
            self.printed.clear();
            return None;
        }
        let start = if text.starts_with(self.printed.as_str()) {
            self.printed.len()
        } else {
            0
        };
        self.printed.clear();
        self.printed.push_str(text);
        Some(&text[start..]).filter(|delta| !delta.is_empty())
    }
}

fn print_message(message: &ConversationMessage) {
    let time = message.timestamp().format("%H:%M:%S");
    match message.sender() {
        Sender::User => println!("{} {} {}", time.dimmed(), "你:".bright_blue(), message.content()),
        Sender::Assistant => println!(
            "{} {} {}",
            time.dimmed(),
            "助手:".bright_red(),
            message.content()
        ),
    }
}

fn print_help() {
    println!("{}", "Commands:".bright_yellow());
    println!("  /debug    toggle diagnostics and show the last trace");
    println!("  /history  show the conversation");
    println!("  /quit     leave the chat");
    println!("  Ctrl-C    cancel the answer being streamed");
}

fn print_prompt() {
    print!("{} ", "›".bright_red());
    let _ = std::io::stdout().flush();
}

/// Submit one message, streaming the answer to stdout. Ctrl-C cancels it.
pub async fn run_turn(client: &StreamingChatClient, text: &str) -> Result<Option<TurnOutcome>> {
    let mut partial = client.subscribe();
    let mut printer = PartialPrinter::default();
    let mut started = false;

    let turn = client.submit(text);
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            Ok(()) = partial.changed() => {
                let snapshot = partial.borrow_and_update().clone();
                if let Some(delta) = printer.delta(&snapshot) {
                    if !started {
                        print!("{} ", "助手:".bright_red());
                        started = true;
                    }
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(notice) = client.cancel() {
                    if started {
                        println!();
                    }
                    print_message(&notice);
                }
            }
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_rejection() => {
            println!("{} {}", "⚠️".yellow(), e);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    match &outcome {
        TurnOutcome::Completed(message) => {
            if started {
                if let Some(rest) = printer.delta(message.content()) {
                    print!("{}", rest);
                }
                println!();
            } else {
                print_message(message);
            }
        }
        TurnOutcome::Empty => {
            if started {
                println!();
            }
            println!("{}", "(no answer)".dimmed());
        }
        TurnOutcome::Cancelled => {}
        TurnOutcome::Failed { error, message } => {
            if started {
                println!();
            }
            print_message(message);
            println!("{} {}", "❌".red(), error.to_string().dimmed());
        }
    }

    if client.diagnostics_enabled() {
        print_diagnostics(client);
    }

    Ok(Some(outcome))
}

fn print_diagnostics(client: &StreamingChatClient) {
    let trace = client.diagnostics();
    if trace.is_empty() {
        println!("{}", "(no diagnostics recorded)".dimmed());
    } else {
        println!("{}", "── diagnostics ──".bright_yellow());
        println!("{}", trace.dimmed());
    }
}

/// Interactive session until `/quit`, end of input or Ctrl-C at the prompt
pub async fn run_interactive(client: Arc<StreamingChatClient>) -> Result<()> {
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

    for message in client.history() {
        print_message(&message);
    }
    println!("{}", "Type /help for commands.".dimmed());

    loop {
        print_prompt();
        let line = tokio::select! {
            line = lines.next() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match Command::parse(&line?) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => print_help(),
            Command::Unknown(command) => {
                println!("{} Unknown command {}", "⚠️".yellow(), command);
                print_help();
            }
            Command::History => {
                for message in client.history() {
                    print_message(&message);
                }
            }
            Command::Debug => {
                let enabled = !client.diagnostics_enabled();
                client.set_diagnostics(enabled);
                let state = if enabled {
                    "on".bright_green().to_string()
                } else {
                    "off".dimmed().to_string()
                };
                println!("🔍 Diagnostics {}", state);
                if enabled {
                    print_diagnostics(&client);
                }
            }
            Command::Message(text) => {
                run_turn(&client, &text).await?;
            }
        }
    }

    client.shutdown();
    println!("👋 再见");
    Ok(())
}
