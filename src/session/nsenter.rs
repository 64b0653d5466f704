//! Direct namespace entry with nsenter(1)

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::machine;
use crate::selinux;
use crate::session::door::{INTERNAL_ENV, reap};
use crate::session::exit::ExitStatus;
use crate::session::spec::EntrySpec;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

/// Enters non-booted containers through every namespace of the leader
#[derive(Debug, Clone)]
pub struct NsenterDoor {
    machine: String,
    nsenter: PathBuf,
    entry_helper: PathBuf,
    login_shell: PathBuf,
    /// Skips the machined lookup when set
    leader: Option<Pid>,
}

impl NsenterDoor {
    pub fn new(machine: impl Into<String>, host: &HostConfig) -> Self {
        Self {
            machine: machine.into(),
            nsenter: host.nsenter.clone(),
            entry_helper: host.entry_helper.clone(),
            login_shell: host.login_shell.clone(),
            leader: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_leader(mut self, leader: Pid) -> Self {
        self.leader = Some(leader);
        self
    }

    pub fn enter(&self, spec: &EntrySpec) -> Result<NsenterSession> {
        let leader = match self.leader {
            Some(leader) => leader,
            None => machine::leader_of(&self.machine)?,
        };
        let argv = nsenter_argv(
            &self.nsenter,
            leader,
            &spec.helper_argv(&self.entry_helper, &self.login_shell),
        );
        tracing::debug!("running: {:?}", argv);

        match selinux::entry_label() {
            Ok(Some(label)) => {
                if let Err(e) = selinux::set_exec_label(&label) {
                    tracing::warn!("failed to set exec context to enter container: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to derive container SELinux label: {}", e),
        }

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).env(INTERNAL_ENV, "1");

        if !spec.uses_pty() {
            let e = command.exec();
            return Err(Error::EntryExec {
                command: argv[0].clone(),
                message: format!("failed to exec: {}", e),
            });
        }

        let child = command.spawn().map_err(|e| Error::EntryExec {
            command: argv[0].clone(),
            message: e.to_string(),
        })?;

        Ok(NsenterSession::new(Pid::from_raw(child.id() as i32)))
    }
}

/// `nsenter -a -t <leader>` followed by the helper argv
pub fn nsenter_argv(nsenter: &Path, leader: Pid, helper_argv: &[String]) -> Vec<String> {
    let mut argv = vec![
        nsenter.display().to_string(),
        "-a".to_string(),
        "-t".to_string(),
        leader.to_string(),
    ];
    argv.extend(helper_argv.iter().cloned());
    argv
}

/// A local nsenter child
#[derive(Debug)]
pub struct NsenterSession {
    pid: Pid,
    /// Set once the child is waited for; its PID may belong to someone else
    reaped: AtomicBool,
}

impl NsenterSession {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            reaped: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn signal(&self, signal: Signal) -> Result<()> {
        if self.reaped.load(Ordering::Acquire) {
            return Err(Error::SignalDelivery {
                target: format!("nsenter ({})", self.pid),
                message: "process already exited".to_string(),
            });
        }

        kill(self.pid, signal).map_err(|e| Error::SignalDelivery {
            target: format!("nsenter ({})", self.pid),
            message: e.to_string(),
        })
    }

    pub fn wait(&self) -> Result<ExitStatus> {
        let status = reap(self.pid);
        self.reaped.store(true, Ordering::Release);
        ExitStatus::from_wait_status(status?)
    }
}
