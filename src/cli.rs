//! Command-line interface for Porthole
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use porthole::config::DEFAULT_CONFIG_PATH;
use porthole::kill::KillSignal;
use std::path::PathBuf;

/// Porthole - interactive sessions in desktop Linux containers
#[derive(Parser)]
#[command(name = "porthole")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a command (or a login shell) inside a running container
    Enter {
        /// Container name
        container: String,

        /// Working directory inside the container (defaults to the current one)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Do not replay the container's startup output
        #[arg(long)]
        no_replay: bool,

        /// Command to run
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Stop a running container
    Kill {
        /// Container name
        container: String,

        /// Signal to send
        #[arg(short, long, value_enum, default_value_t = KillSignal::Default)]
        signal: KillSignal,

        /// Signal every process in the container, not just the leader
        #[arg(short, long)]
        all: bool,
    },

    /// List containers, optionally only those matching shell patterns
    List {
        /// Patterns such as `dev*`
        patterns: Vec<String>,
    },

    /// Show a container's configuration and running state
    Info {
        /// Container name
        container: String,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "porthole", &mut std::io::stdout());
    }
}
