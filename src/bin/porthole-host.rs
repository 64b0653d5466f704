//! porthole-host - runs inside the container to finish an entry

use clap::{Parser, Subcommand};
use porthole::host::{self, EntryRequest};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "porthole-host")]
#[command(author, version, about = "Container-side helper for porthole", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enter a session (internal)
    Enter {
        /// PTY to attach to stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// PTY to attach to stdout
        #[arg(long)]
        stdout: Option<PathBuf>,

        /// PTY to attach to stderr
        #[arg(long)]
        stderr: Option<PathBuf>,

        /// User to run as
        #[arg(long)]
        uid: u32,

        /// Working directory
        #[arg(long)]
        cwd: PathBuf,

        /// Do not replay the container's startup output
        #[arg(long)]
        no_replay: bool,

        /// `env NAME=VALUE...` followed by the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    porthole::logging::init(cli.verbose);

    match cli.command {
        Commands::Enter {
            stdin,
            stdout,
            stderr,
            uid,
            cwd,
            no_replay,
            args,
        } => {
            let (environ, command) = match host::split_environ(&args) {
                Ok(split) => split,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                }
            };

            let request = EntryRequest {
                stdin,
                stdout,
                stderr,
                uid,
                cwd,
                no_replay,
                environ,
                command,
            };

            let e = host::enter(&request);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
