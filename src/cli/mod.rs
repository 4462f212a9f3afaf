//! CLI module for Lekha
//!
//! Provides command-line interface parsing for the `lekha` binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lekha - citation-gated research-to-article pipeline
#[derive(Parser, Debug)]
#[command(
    name = "lekha",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "Lekha - turn a research topic into a citation-backed article",
    long_about = "Runs a fixed sequence of planning, harvesting, summarizing, fact-checking,\n\
                  writing, editing and SEO stages against an OpenAI-compatible model service,\n\
                  then releases the article only if it passes the citation quality gate.",
    after_help = "EXAMPLES:\n    \
                  lekha init                                   # Write a default lekha.toml\n    \
                  lekha run \"heat pumps\" -s sources.json       # Run the pipeline\n    \
                  lekha run \"tides\" -s pack.json -k moon -k ocean --audience students\n    \
                  lekha config --validate                      # Check lekha.toml"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "lekha.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one topic and export the result
    Run {
        /// Research topic
        topic: String,

        /// Intended readers
        #[arg(long, default_value = "general readers")]
        audience: String,

        /// Article goal (repeatable)
        #[arg(long = "goal")]
        goals: Vec<String>,

        /// Target keyword (repeatable)
        #[arg(short = 'k', long = "keyword")]
        keywords: Vec<String>,

        /// Harvest constraint as KEY=VALUE, e.g. domain=gov (repeatable)
        #[arg(long = "constraint", value_parser = parse_key_val)]
        constraints: Vec<(String, String)>,

        /// JSON source pack answering harvest queries
        #[arg(short, long)]
        sources: PathBuf,

        /// Directory for exported artifacts
        #[arg(short, long, default_value = "outputs")]
        output: PathBuf,

        /// Seed for a reproducible run id
        #[arg(long)]
        seed: Option<String>,

        /// Override pipeline.max_retries
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Write a default lekha.toml and .env.example
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file and the API key variable
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parse `KEY=VALUE`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
