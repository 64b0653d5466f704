//! Entry requests
//!
//! An [`EntrySpec`] describes one entry into a container and serializes into
//! the argv of the in-container entry helper:
//!
//! ```text
//! <helper> enter [-v] [--stdin=P] [--stdout=P] [--stderr=P] --uid=N --cwd=D
//!          [--no-replay] env NAME=VALUE... COMMAND...
//! ```

use bitflags::bitflags;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

bitflags! {
    /// Host standard streams that are backed by the container PTY
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtyStreams: u8 {
        const STDIN = 0x01;
        const STDOUT = 0x02;
        const STDERR = 0x04;
    }
}

impl PtyStreams {
    /// Streams of this process that are terminals
    pub fn detect() -> Self {
        Self::from_terminals(
            std::io::stdin().is_terminal(),
            std::io::stdout().is_terminal(),
            std::io::stderr().is_terminal(),
        )
    }

    pub fn from_terminals(stdin: bool, stdout: bool, stderr: bool) -> Self {
        let mut streams = PtyStreams::empty();
        streams.set(PtyStreams::STDIN, stdin);
        streams.set(PtyStreams::STDOUT, stdout);
        streams.set(PtyStreams::STDERR, stderr);
        streams
    }
}

/// One request to run a command inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySpec {
    /// Container-visible PTY path, present iff some stream is PTY-backed
    pub pty_path: Option<String>,
    pub streams: PtyStreams,
    /// Already filtered environment
    pub environ: BTreeMap<String, String>,
    pub uid: u32,
    pub cwd: PathBuf,
    pub no_replay: bool,
    pub verbose: bool,
    /// Empty means the login shell
    pub command: Vec<String>,
}

impl EntrySpec {
    pub fn new(uid: u32, cwd: impl Into<PathBuf>) -> Self {
        Self {
            pty_path: None,
            streams: PtyStreams::empty(),
            environ: BTreeMap::new(),
            uid,
            cwd: cwd.into(),
            no_replay: false,
            verbose: false,
            command: Vec::new(),
        }
    }

    /// Back `streams` with the PTY at `path`
    ///
    /// An empty stream set leaves the spec without a PTY.
    pub fn pty(mut self, path: impl Into<String>, streams: PtyStreams) -> Self {
        if streams.is_empty() {
            self.pty_path = None;
        } else {
            self.pty_path = Some(path.into());
        }
        self.streams = streams;
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environ.insert(name.into(), value.into());
        self
    }

    pub fn environ(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.environ.extend(vars);
        self
    }

    pub fn no_replay(mut self, no_replay: bool) -> Self {
        self.no_replay = no_replay;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Whether any stream needs the PTY
    pub fn uses_pty(&self) -> bool {
        self.pty_path.is_some()
    }

    /// Serialize into the entry helper's argv
    pub fn helper_argv(&self, helper: &Path, login_shell: &Path) -> Vec<String> {
        let mut argv = vec![helper.display().to_string(), "enter".to_string()];

        if self.verbose {
            argv.push("-v".to_string());
        }

        if let Some(pty) = &self.pty_path {
            for (flag, name) in [
                (PtyStreams::STDIN, "stdin"),
                (PtyStreams::STDOUT, "stdout"),
                (PtyStreams::STDERR, "stderr"),
            ] {
                if self.streams.contains(flag) {
                    argv.push(format!("--{}={}", name, pty));
                }
            }
        }

        argv.push(format!("--uid={}", self.uid));
        argv.push(format!("--cwd={}", self.cwd.display()));

        if self.no_replay {
            argv.push("--no-replay".to_string());
        }

        argv.push("env".to_string());
        for (name, value) in &self.environ {
            argv.push(format!("{}={}", name, value));
        }

        if self.command.is_empty() {
            argv.push(login_shell.display().to_string());
            argv.push("-l".to_string());
        } else {
            argv.extend(self.command.iter().cloned());
        }

        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELPER: &str = "/run/host/porthole/porthole-host";
    const SHELL: &str = "/run/host/login-shell";

    fn argv(spec: &EntrySpec) -> Vec<String> {
        spec.helper_argv(Path::new(HELPER), Path::new(SHELL))
    }

    #[test]
    fn test_no_terminal_streams() {
        let spec = EntrySpec::new(1000, "/home/alice")
            .pty("/dev/pts/3", PtyStreams::from_terminals(false, false, false))
            .command(["ls", "-l"]);

        assert!(!spec.uses_pty());
        assert_eq!(
            argv(&spec),
            vec![HELPER, "enter", "--uid=1000", "--cwd=/home/alice", "env", "ls", "-l"]
        );
    }

    #[test]
    fn test_stdin_and_stdout_terminals() {
        let streams = PtyStreams::from_terminals(true, true, false);
        let spec = EntrySpec::new(1000, "/home/alice")
            .pty("/dev/pts/3", streams)
            .verbose(true)
            .no_replay(true);

        assert_eq!(streams, PtyStreams::STDIN | PtyStreams::STDOUT);
        assert_eq!(
            argv(&spec),
            vec![
                HELPER,
                "enter",
                "-v",
                "--stdin=/dev/pts/3",
                "--stdout=/dev/pts/3",
                "--uid=1000",
                "--cwd=/home/alice",
                "--no-replay",
                "env",
                SHELL,
                "-l",
            ]
        );
    }

    #[test]
    fn test_environment_is_sorted_and_unique() {
        let forward = EntrySpec::new(0, "/")
            .env("TERM", "xterm")
            .env("LANG", "C.UTF-8")
            .env("DISPLAY", ":0")
            .command(["true"]);
        let backward = EntrySpec::new(0, "/")
            .env("DISPLAY", ":1")
            .env("LANG", "C.UTF-8")
            .env("TERM", "xterm")
            .env("DISPLAY", ":0")
            .command(["true"]);

        let expected = vec![
            HELPER,
            "enter",
            "--uid=0",
            "--cwd=/",
            "env",
            "DISPLAY=:0",
            "LANG=C.UTF-8",
            "TERM=xterm",
            "true",
        ];
        assert_eq!(argv(&forward), expected);
        assert_eq!(argv(&backward), expected);
    }

    #[test]
    fn test_serialization_is_pure() {
        let spec = EntrySpec::new(42, "/srv")
            .pty("/dev/pts/0", PtyStreams::all())
            .environ([("A".to_string(), "x=y".to_string())])
            .command(["sh", "-c", "echo $A"]);

        let first = argv(&spec);
        assert_eq!(first, argv(&spec));
        assert!(first.contains(&"--stderr=/dev/pts/0".to_string()));
        assert!(first.contains(&"A=x=y".to_string()));
        assert_eq!(first.last().map(String::as_str), Some("echo $A"));
    }
}
