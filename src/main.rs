//! Porthole - interactive sessions in desktop Linux containers
//!
//! Enters running containers with full terminal forwarding and stops them
//! the way their init system expects. `list` and `info` report what exists.

mod cli;

use cli::{Cli, Commands};
use porthole::config;
use porthole::container::Container;
use porthole::error::Result;
use porthole::inventory::{self, ContainerInfo};
use porthole::kill;
use porthole::session::{Door, EntrySpec, PtyClient, PtyRelay};
use porthole::userdata::Userdata;
use std::path::PathBuf;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse_args();
    porthole::logging::init(cli.verbose);

    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(0)
        }

        Commands::Enter {
            container,
            workdir,
            no_replay,
            command,
        } => {
            let config = config::load_or_default(&cli.config)?;
            let user = Userdata::current()?;
            let ct = Container::open(&config.paths.data_dir, &user.name, &container)?;

            let mut environ = user.environ.clone();
            ct.apply_environ_filter(&mut environ);

            let cwd = match workdir {
                Some(dir) => dir,
                None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            };

            let spec = EntrySpec::new(user.uid, cwd)
                .environ(environ)
                .no_replay(no_replay)
                .verbose(cli.verbose)
                .command(command);

            let door = Door::for_container(&ct, &user.name, &config);
            let relay = PtyRelay::new(door, PtyClient::for_container(&ct, &config));

            relay.run(spec)
        }

        Commands::List { patterns } => {
            let config = config::load_or_default(&cli.config)?;
            let user = Userdata::current()?;
            let containers = inventory::list(&config.paths.data_dir, &user.name)?;

            for ct in inventory::filter(containers, &patterns)? {
                println!("{}", ct.name);
            }
            Ok(0)
        }

        Commands::Info { container } => {
            let config = config::load_or_default(&cli.config)?;
            let user = Userdata::current()?;
            let ct = Container::open(&config.paths.data_dir, &user.name, &container)?;

            print!("{}", ContainerInfo::gather(&ct, &user.name));
            Ok(0)
        }

        Commands::Kill {
            container,
            signal,
            all,
        } => {
            let config = config::load_or_default(&cli.config)?;
            let user = Userdata::current()?;
            let ct = Container::open(&config.paths.data_dir, &user.name, &container)?;

            kill::kill_container(&ct, &user.name, signal, all)?;
            println!("Stopped container: {}", ct.name);
            Ok(0)
        }
    }
}
