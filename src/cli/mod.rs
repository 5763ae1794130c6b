//! CLI module for Fathom
//!
//! Provides command-line interface parsing for the `fathom` binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fathom - iterative research with cited reports
///
/// Plans a research question, searches several engines over multiple rounds,
/// reads the most relevant pages and writes a Markdown report whose every
/// claim points at a numbered source.
#[derive(Parser, Debug)]
#[command(
    name = "fathom",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "Fathom - iterative research with cited reports",
    after_help = "EXAMPLES:\n    \
                  fathom research \"solid-state battery energy density\"\n    \
                  fathom research \"rust async runtimes\" --depth 1 --breadth 3\n    \
                  fathom search \"what is a bloom filter\" --detailed\n    \
                  fathom show reports/rust_async_runtimes_20250101_120000.json"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "fathom.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Research a question and save the report as Markdown and JSON
    Research {
        /// The research question
        query: String,

        /// Research rounds after the first (overrides config)
        #[arg(short, long)]
        depth: Option<u32>,

        /// Subqueries per round (overrides config)
        #[arg(short, long)]
        breadth: Option<usize>,

        /// Write the Markdown report here instead of a generated name
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for generated report files (overrides config)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Render pages through the configured rendering service first
        #[arg(long)]
        dynamic: bool,

        /// Do not read or write the response cache
        #[arg(long)]
        no_cache: bool,

        /// Include the chain of thought in the Markdown report
        #[arg(long)]
        chain_of_thought: bool,
    },

    /// Search once and summarise the top results with citations
    Search {
        /// The search query
        query: String,

        /// Ask for an in-depth answer instead of a brief summary
        #[arg(long)]
        detailed: bool,

        /// Also save the result (`.json` for data, anything else for Markdown)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Render pages through the configured rendering service first
        #[arg(long)]
        dynamic: bool,

        /// Do not read or write the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Render a saved JSON result as Markdown
    Show {
        /// Path to a `.json` result
        file: PathBuf,

        /// Include the chain of thought
        #[arg(long)]
        chain_of_thought: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
