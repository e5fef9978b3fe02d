// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Parse a string that must not be empty or whitespace-only.
fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("cannot be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

/// Output format for commands supporting structured output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "sift")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream files to an analysis engine and follow the analysis as it happens")]
pub struct Cli {
    /// Read settings from this TOML file
    #[arg(short = 'c', long = "config", global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload files with a prompt and stream the analysis
    #[command(after_help = "\
Examples:
  sift analyze -p \"How did sales change?\" sales.csv
  sift analyze -p \"Compare regions\" north.csv south.xlsx -o json
  sift analyze -p \"Summarize\" data.csv --url ws://engine:8000/ws/analyze")]
    Analyze {
        /// Question or instruction for the engine
        #[arg(short = 'p', long, value_parser = non_empty_string)]
        prompt: String,

        /// Files to upload (at most 5)
        #[arg(required = true, value_name = "file")]
        files: Vec<PathBuf>,

        /// Engine endpoint, overriding the config file
        #[arg(long, value_name = "url")]
        url: Option<String>,

        /// Output format
        #[arg(short = 'o', long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
