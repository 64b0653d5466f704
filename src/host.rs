//! In-container half of an entry
//!
//! `porthole-host enter` runs inside the container's namespaces, as root. It
//! attaches the PTY to the requested standard streams, becomes the target
//! user, changes directory and execs the workload.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::unistd::{Gid, Uid, User, chdir, initgroups, setgid, setsid, setuid};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Set for sessions that must not replay the container's startup output
pub const NO_REPLAY_ENV: &str = "PORTHOLE_NO_REPLAY";

/// Marker separating helper flags from environment assignments
const ENV_MARKER: &str = "env";

/// A parsed entry request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryRequest {
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub uid: u32,
    pub cwd: PathBuf,
    pub no_replay: bool,
    pub environ: Vec<(String, String)>,
    pub command: Vec<String>,
}

/// Split `env NAME=VALUE... COMMAND...` into assignments and the command
pub fn split_environ(args: &[String]) -> Result<(Vec<(String, String)>, Vec<String>)> {
    let rest = match args.split_first() {
        Some((first, rest)) if first == ENV_MARKER => rest,
        _ => args,
    };

    let mut environ = Vec::new();
    let mut index = 0;
    while let Some(arg) = rest.get(index) {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() && !name.contains('/') => {
                environ.push((name.to_string(), value.to_string()));
                index += 1;
            }
            _ => break,
        }
    }

    let command = rest[index..].to_vec();
    if command.is_empty() {
        return Err(Error::EntryExec {
            command: "porthole-host".to_string(),
            message: "expected a command".to_string(),
        });
    }

    Ok((environ, command))
}

/// Attach PTYs to the standard streams
///
/// A new session is started only when stdin is attached, so the PTY becomes
/// its controlling terminal. EPERM from setsid means this process already
/// leads a session.
pub fn connect_ptys(
    stdin: Option<&Path>,
    stdout: Option<&Path>,
    stderr: Option<&Path>,
) -> Result<()> {
    for (target, pty) in [(0, stdin), (1, stdout), (2, stderr)] {
        let Some(pty) = pty else { continue };

        if target == 0 {
            match setsid() {
                Ok(_) | Err(Errno::EPERM) => {}
                Err(e) => return Err(Error::Terminal(format!("setsid: {}", e))),
            }
        }

        // Escape sequences are written to stdin too, so always read-write
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(pty)
            .map_err(|e| {
                Error::Terminal(format!("open {} for fd {}: {}", pty.display(), target, e))
            })?;

        let result = unsafe { libc::dup2(file.as_raw_fd(), target) };
        if result < 0 {
            return Err(Error::Terminal(format!(
                "dup {} onto {}: {}",
                pty.display(),
                target,
                std::io::Error::last_os_error()
            )));
        }
    }

    Ok(())
}

/// Become `uid`, with its primary group and supplementary groups
fn become_user(user: &User) -> Result<()> {
    let name = CString::new(user.name.as_str())
        .map_err(|_| Error::User(format!("invalid user name {}", user.name)))?;

    initgroups(&name, user.gid)
        .map_err(|e| Error::User(format!("initgroups for {}: {}", user.name, e)))?;
    setgid(user.gid).map_err(|e| Error::User(format!("setgid {}: {}", user.gid, e)))?;
    setuid(user.uid).map_err(|e| Error::User(format!("setuid {}: {}", user.uid, e)))?;

    Ok(())
}

fn enter_directory(cwd: &Path, home: &Path) {
    if let Err(e) = chdir(cwd) {
        tracing::warn!(
            "cannot enter {} ({}), using {}",
            cwd.display(),
            e,
            home.display()
        );
        if let Err(e) = chdir(home) {
            tracing::warn!("cannot enter {}: {}", home.display(), e);
        }
    }
}

/// Set up the session and exec the workload
///
/// Returns only if something failed.
pub fn enter(request: &EntryRequest) -> Error {
    match prepare(request) {
        Ok(mut command) => {
            let e = command.exec();
            Error::EntryExec {
                command: request.command.join(" "),
                message: format!("failed to exec: {}", e),
            }
        }
        Err(e) => e,
    }
}

fn prepare(request: &EntryRequest) -> Result<Command> {
    connect_ptys(
        request.stdin.as_deref(),
        request.stdout.as_deref(),
        request.stderr.as_deref(),
    )?;

    let user = User::from_uid(Uid::from_raw(request.uid))
        .map_err(|e| Error::User(format!("passwd lookup for uid {}: {}", request.uid, e)))?
        .ok_or_else(|| Error::User(format!("uid {} has no passwd entry", request.uid)))?;

    if Uid::effective().is_root() {
        become_user(&user)?;
    } else if Uid::current() != user.uid || Gid::current() != user.gid {
        return Err(Error::User(format!(
            "cannot switch to uid {} without root",
            request.uid
        )));
    }

    enter_directory(&request.cwd, &user.dir);

    let (program, args) = request.command.split_first().ok_or_else(|| Error::EntryExec {
        command: "porthole-host".to_string(),
        message: "expected a command".to_string(),
    })?;

    let mut command = Command::new(program);
    command.args(args).envs(request.environ.iter().cloned());
    if request.no_replay {
        command.env(NO_REPLAY_ENV, "1");
    }

    tracing::debug!("executing {:?}", request.command);
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_environ() {
        let (environ, command) =
            split_environ(&strings(&["env", "LANG=C.UTF-8", "TERM=xterm", "ls", "-l"])).unwrap();
        assert_eq!(
            environ,
            vec![
                ("LANG".to_string(), "C.UTF-8".to_string()),
                ("TERM".to_string(), "xterm".to_string()),
            ]
        );
        assert_eq!(command, strings(&["ls", "-l"]));
    }

    #[test]
    fn test_split_environ_values_with_equals() {
        let (environ, command) =
            split_environ(&strings(&["env", "A=b=c", "sh", "-c", "X=1 true"])).unwrap();
        assert_eq!(environ, vec![("A".to_string(), "b=c".to_string())]);
        assert_eq!(command, strings(&["sh", "-c", "X=1 true"]));
    }

    #[test]
    fn test_split_environ_command_with_path() {
        let (environ, command) =
            split_environ(&strings(&["env", "/usr/bin/env=odd", "arg"])).unwrap();
        assert!(environ.is_empty());
        assert_eq!(command, strings(&["/usr/bin/env=odd", "arg"]));
    }

    #[test]
    fn test_split_environ_requires_command() {
        assert!(split_environ(&strings(&["env", "A=1"])).is_err());
        assert!(split_environ(&[]).is_err());
    }

    #[test]
    fn test_connect_ptys_nothing_to_attach() {
        assert!(connect_ptys(None, None, None).is_ok());
    }

    #[test]
    fn test_connect_ptys_missing_device() {
        let result = connect_ptys(None, Some(Path::new("/dev/pts/does-not-exist")), None);
        assert!(matches!(result, Err(Error::Terminal(_))));
    }
}
