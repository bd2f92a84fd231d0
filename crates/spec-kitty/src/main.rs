//! Spec Kitty CLI entry point.
//!
//! Parser failures always surface the canonical USAGE_ERROR envelope and a
//! non-zero exit so machine callers never have to scrape clap's human
//! output. The removed `--json/--no-json` flag pair stays rejected.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod commands;
mod json;
mod ui;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(run().await);
}

/// First non-flag argument, for the envelope's `command` field when parsing
/// failed before a command was recognized.
fn command_name_from_args(args: &[String]) -> String {
    args.iter()
        .skip(1)
        .find(|a| !a.starts_with('-'))
        .cloned()
        .unwrap_or_else(|| "spec-kitty".to_string())
}

async fn run() -> i32 {
    let raw: Vec<String> = std::env::args().collect();

    // Regression fence: the --json/--no-json pair was removed in favor of
    // --json alone; --no-json must fail loudly, not silently no-op.
    if raw.iter().any(|a| a == "--no-json") {
        json::usage_error(
            &command_name_from_args(&raw),
            "--no-json was removed; pass --json for machine output or omit it",
        )
        .print();
        return 2;
    }

    let parsed = match cli::Cli::try_parse() {
        Ok(parsed) => parsed,
        Err(err) => {
            use clap::error::ErrorKind;
            // Help and version are not failures.
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
                return 0;
            }
            // Clap splits its message across lines ("the following required
            // arguments were not provided:\n  --to <TO>"); keep everything
            // up to the usage block so the envelope names the actual flag.
            let rendered = err.to_string();
            let message = rendered
                .lines()
                .take_while(|line| !line.trim_start().starts_with("Usage:"))
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
                .trim_start_matches("error: ")
                .to_string();
            json::usage_error(&command_name_from_args(&raw), &message).print();
            return 2;
        }
    };

    let command_name = parsed.command.name();
    let json_mode = parsed.json;
    match commands::execute(parsed).await {
        Ok(data) => {
            if json_mode {
                json::Envelope::success(command_name, data).print();
            }
            0
        }
        Err(err) => {
            if json_mode {
                json::core_error(command_name, &err).print();
            } else {
                ui::error(&err.to_string());
            }
            1
        }
    }
}
