//! Entry through a transient unit in a booted container
//!
//! `systemd-run --pipe` starts the unit and carries its stdio. The unit's exit
//! is read back over the container's bus, since the local `systemd-run` only
//! reports its own status.

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::machine;
use crate::nsbus::{BusConnection, NamespaceBusDialer};
use crate::selinux;
use crate::session::door::{INTERNAL_ENV, reap};
use crate::session::exit::ExitStatus;
use crate::session::spec::EntrySpec;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Command;
use uuid::Uuid;
use zbus::blocking::Proxy;
use zbus::zvariant::OwnedValue;

const SYSTEMD1_DEST: &str = "org.freedesktop.systemd1";
const UNIT_PATH_PREFIX: &str = "/org/freedesktop/systemd1/unit/";
const SERVICE_IFACE: &str = "org.freedesktop.systemd1.Service";
const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

/// Enters booted containers through transient units
#[derive(Debug, Clone)]
pub struct SystemdDoor {
    machine: String,
    entry_helper: PathBuf,
    login_shell: PathBuf,
    dialer: NamespaceBusDialer,
}

impl SystemdDoor {
    pub fn new(machine: impl Into<String>, host: &HostConfig) -> Self {
        Self {
            machine: machine.into(),
            entry_helper: host.entry_helper.clone(),
            login_shell: host.login_shell.clone(),
            dialer: NamespaceBusDialer::new(&host.nsconnect_helper, &host.container_bus),
        }
    }

    pub fn enter(&self, spec: &EntrySpec) -> Result<SystemdSession> {
        let leader = machine::leader_of(&self.machine)?;
        let bus = self.dialer.dial(leader)?;

        let unit = unit_name(Uuid::new_v4());
        let label = selinux::entry_label()?;
        let argv = systemd_run_argv(
            &self.machine,
            &unit,
            label.as_deref(),
            &spec.helper_argv(&self.entry_helper, &self.login_shell),
        );
        tracing::debug!("starting transient unit in container: {:?}", argv);

        // On failure `bus` drops here and closes the connection
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .spawn()
            .map_err(|e| Error::EntryExec {
                command: argv[0].clone(),
                message: e.to_string(),
            })?;

        Ok(SystemdSession {
            machine: self.machine.clone(),
            unit,
            child: Pid::from_raw(child.id() as i32),
            bus,
        })
    }
}

/// A transient unit plus the local `systemd-run` attached to it
#[derive(Debug)]
pub struct SystemdSession {
    machine: String,
    unit: String,
    child: Pid,
    bus: BusConnection,
}

impl SystemdSession {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Signal the unit's processes inside the container
    pub fn signal(&self, signal: Signal) -> Result<()> {
        let argv = systemctl_kill_argv(&self.machine, &self.unit, signal as i32);
        tracing::debug!("running: {:?}", argv);

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .map_err(|e| Error::SignalDelivery {
                target: self.unit.clone(),
                message: format!("failed to run systemctl: {}", e),
            })?;

        if !status.success() {
            return Err(Error::SignalDelivery {
                target: self.unit.clone(),
                message: format!("systemctl {}", status),
            });
        }

        Ok(())
    }

    /// Wait for `systemd-run`, then read the unit's main process result
    pub fn wait(&self) -> Result<ExitStatus> {
        let local = reap(self.child)?;
        tracing::debug!("systemd-run finished: {:?}", local);

        let code = self.service_property("ExecMainCode")?;
        let status = self.service_property("ExecMainStatus")?;

        Ok(ExitStatus::from_exec_main(code, status))
    }

    pub fn destroy(self) {
        self.bus.close();
    }

    fn service_property(&self, name: &str) -> Result<i32> {
        let path = unit_object_path(&self.unit);
        let context = format!("{} of {}", name, self.unit);

        let proxy = Proxy::new(
            self.bus.connection(),
            SYSTEMD1_DEST,
            path.as_str(),
            PROPERTIES_IFACE,
        )
        .map_err(|e| Error::bus(context.clone(), e))?;

        let value: OwnedValue = proxy
            .call("Get", &(SERVICE_IFACE, name))
            .map_err(|e| Error::bus(context.clone(), e))?;

        i32::try_from(value).map_err(|e| Error::bus(context, e.into()))
    }
}

/// Unique name for one entry's unit
pub fn unit_name(id: Uuid) -> String {
    format!("porthole-entry-{}.service", id)
}

pub fn systemd_run_argv(
    machine: &str,
    unit: &str,
    selinux_label: Option<&str>,
    helper_argv: &[String],
) -> Vec<String> {
    let mut argv = vec![
        "systemd-run".to_string(),
        "--quiet".to_string(),
        "--pipe".to_string(),
        format!("--machine={}", machine),
        format!("--unit={}", unit),
    ];

    if let Some(label) = selinux_label {
        argv.push(format!("--property=SELinuxContext={}", label));
    }

    argv.push(format!("--setenv={}=1", INTERNAL_ENV));
    argv.push("--".to_string());
    argv.extend(helper_argv.iter().cloned());
    argv
}

pub fn systemctl_kill_argv(machine: &str, unit: &str, signal: i32) -> Vec<String> {
    vec![
        "systemctl".to_string(),
        format!("--machine={}", machine),
        "kill".to_string(),
        format!("--signal={}", signal),
        unit.to_string(),
    ]
}

/// Object path systemd publishes a unit under
pub fn unit_object_path(unit: &str) -> String {
    format!("{}{}", UNIT_PATH_PREFIX, bus_path_escape(unit))
}

/// systemd's bus label escaping
///
/// ASCII alphanumerics pass through, except a leading digit; every other byte
/// becomes `_xx` in lowercase hex. The empty string becomes `_`.
pub fn bus_path_escape(label: &str) -> String {
    if label.is_empty() {
        return "_".to_string();
    }

    let mut escaped = String::with_capacity(label.len() * 3);
    for (i, byte) in label.bytes().enumerate() {
        let keep = byte.is_ascii_alphabetic() || (byte.is_ascii_digit() && i > 0);
        if keep {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{:02x}", byte));
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::spec::PtyStreams;

    #[test]
    fn test_bus_path_escape() {
        assert_eq!(
            bus_path_escape("porthole-entry-1.service"),
            "porthole_2dentry_2d1_2eservice"
        );
        assert_eq!(bus_path_escape(""), "_");
        assert_eq!(bus_path_escape("1abc"), "_31abc");
        assert_eq!(bus_path_escape("a_b"), "a_5fb");
    }

    #[test]
    fn test_unit_object_path() {
        assert_eq!(
            unit_object_path("dbus.service"),
            "/org/freedesktop/systemd1/unit/dbus_2eservice"
        );
    }

    #[test]
    fn test_unit_name_is_unique() {
        let a = unit_name(Uuid::new_v4());
        let b = unit_name(Uuid::new_v4());
        assert!(a.starts_with("porthole-entry-"));
        assert!(a.ends_with(".service"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_systemd_run_argv() {
        let helper = vec!["/run/host/porthole/porthole-host".to_string(), "enter".to_string()];
        let argv = systemd_run_argv(
            "porthole-alice-dev",
            "porthole-entry-x.service",
            Some("unconfined_u:system_r:spc_t:s0"),
            &helper,
        );
        assert_eq!(
            argv,
            vec![
                "systemd-run",
                "--quiet",
                "--pipe",
                "--machine=porthole-alice-dev",
                "--unit=porthole-entry-x.service",
                "--property=SELinuxContext=unconfined_u:system_r:spc_t:s0",
                "--setenv=PORTHOLE_INTERNAL=1",
                "--",
                "/run/host/porthole/porthole-host",
                "enter",
            ]
        );

        let plain = systemd_run_argv("m", "u.service", None, &helper);
        assert!(!plain.iter().any(|a| a.starts_with("--property=")));
    }

    #[test]
    fn test_systemctl_kill_argv() {
        assert_eq!(
            systemctl_kill_argv("porthole-alice-dev", "porthole-entry-x.service", 15),
            vec![
                "systemctl",
                "--machine=porthole-alice-dev",
                "kill",
                "--signal=15",
                "porthole-entry-x.service",
            ]
        );
    }

    #[test]
    fn test_booted_terminal_session() {
        let streams = PtyStreams::from_terminals(true, true, false);
        let spec = EntrySpec::new(1000, "/home/alice")
            .pty("/dev/pts/2", streams)
            .command(["sleep", "infinity"]);
        let helper = spec.helper_argv(
            std::path::Path::new("/run/host/porthole/porthole-host"),
            std::path::Path::new("/run/host/login-shell"),
        );
        let argv = systemd_run_argv("porthole-alice-dev", "porthole-entry-x.service", None, &helper);

        assert!(argv.contains(&"--pipe".to_string()));
        assert!(argv.contains(&"--stdin=/dev/pts/2".to_string()));
        assert!(argv.contains(&"--stdout=/dev/pts/2".to_string()));
        assert!(!argv.iter().any(|a| a.starts_with("--stderr=")));

        // The workload was terminated with SIGTERM inside the unit
        let exit = ExitStatus::from_exec_main(libc::CLD_KILLED, 15);
        assert_eq!(exit, ExitStatus::Signaled(15));
        assert_eq!(exit.code(), 143);
    }
}
