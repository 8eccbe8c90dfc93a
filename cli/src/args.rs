//! Command-line parsing.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "prism")]
#[command(about = "Score pull request risk with a local Ollama model")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum Commands {
    /// Score a change and print the result as JSON
    Analyze {
        /// Commit message describing the change
        #[arg(long, short)]
        message: String,
        /// Pull request the analysis is reported under
        #[arg(long, default_value = "local")]
        pr: String,
        /// Changed file paths
        files: Vec<String>,
    },
    /// Show the resolved settings
    Config,
}
