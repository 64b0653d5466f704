//! Doors into a container
//!
//! Non-booted containers are entered directly with nsenter. Booted containers
//! get a transient systemd unit, so the workload lives in the container's own
//! cgroup tree and is supervised by its init.

use crate::config::PortholeConfig;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::session::exit::ExitStatus;
use crate::session::nsenter::{NsenterDoor, NsenterSession};
use crate::session::spec::EntrySpec;
use crate::session::systemd::{SystemdDoor, SystemdSession};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

/// Environment variable marking processes started by porthole itself
pub const INTERNAL_ENV: &str = "PORTHOLE_INTERNAL";

/// The entry mechanism for one container, chosen once from its boot flag
#[derive(Debug, Clone)]
pub enum Door {
    Nsenter(NsenterDoor),
    Systemd(SystemdDoor),
}

impl Door {
    pub fn for_container(container: &Container, user: &str, config: &PortholeConfig) -> Self {
        let machine = container.machine_name(user);
        if container.config.boot {
            Door::Systemd(SystemdDoor::new(machine, &config.host))
        } else {
            Door::Nsenter(NsenterDoor::new(machine, &config.host))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Door::Nsenter(_) => "nsenter",
            Door::Systemd(_) => "systemd",
        }
    }

    /// Start `spec` inside the container
    ///
    /// The nsenter door replaces the current process when no stream is
    /// PTY-backed, so in that case this only ever returns an error.
    pub fn enter(&self, spec: &EntrySpec) -> Result<SessionHandle> {
        tracing::debug!("entering container through the {} door", self.name());

        match self {
            Door::Nsenter(door) => door.enter(spec).map(SessionHandle::Nsenter),
            Door::Systemd(door) => door.enter(spec).map(SessionHandle::Systemd),
        }
    }
}

/// A running entry
#[derive(Debug)]
pub enum SessionHandle {
    Nsenter(NsenterSession),
    Systemd(SystemdSession),
}

impl SessionHandle {
    /// Forward a signal to the workload
    pub fn signal(&self, signal: Signal) -> Result<()> {
        match self {
            SessionHandle::Nsenter(session) => session.signal(signal),
            SessionHandle::Systemd(session) => session.signal(signal),
        }
    }

    /// Block until the workload ends
    pub fn wait(&self) -> Result<ExitStatus> {
        match self {
            SessionHandle::Nsenter(session) => session.wait(),
            SessionHandle::Systemd(session) => session.wait(),
        }
    }

    /// Release everything the session holds
    pub fn destroy(self) {
        match self {
            SessionHandle::Nsenter(_) => {}
            SessionHandle::Systemd(session) => session.destroy(),
        }
    }
}

/// Wait for a child process, retrying interrupted waits
pub(crate) fn reap(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(Error::UnexpectedWaitStatus(format!(
                    "waitpid({}) failed: {}",
                    pid, e
                )));
            }
            Ok(status) => return Ok(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;
    use std::path::PathBuf;
    use std::process::Command;

    fn container(boot: bool) -> Container {
        Container {
            name: "dev".to_string(),
            path: PathBuf::from("/var/lib/porthole/alice/dev"),
            config: ContainerConfig { boot },
        }
    }

    #[test]
    fn test_door_follows_boot_flag() {
        let config = PortholeConfig::default();
        assert_eq!(Door::for_container(&container(false), "alice", &config).name(), "nsenter");
        assert_eq!(Door::for_container(&container(true), "alice", &config).name(), "systemd");
    }

    #[test]
    fn test_reap_exit_status() {
        let child = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
        let status = reap(Pid::from_raw(child.id() as i32)).unwrap();
        assert_eq!(
            ExitStatus::from_wait_status(status).unwrap(),
            ExitStatus::Normal(7)
        );
    }

    #[test]
    fn test_reap_unknown_child() {
        assert!(reap(Pid::from_raw(i32::MAX)).is_err());
    }
}
