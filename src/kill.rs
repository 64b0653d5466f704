//! Stopping containers
//!
//! Booted containers are shut down the way systemd expects: SIGRTMIN+4
//! requests poweroff and SIGINT requests reboot. Other containers only take
//! SIGTERM or SIGKILL.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::lock::{LockLevel, LockWait};
use crate::machine::{KillWho, Machined};
use clap::ValueEnum;
use std::fmt;

/// Signal requested for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KillSignal {
    /// Poweroff for booted containers, SIGTERM otherwise
    Default,
    Poweroff,
    Reboot,
    #[value(alias = "sigterm")]
    Term,
    #[value(alias = "sigkill")]
    Kill,
}

impl KillSignal {
    /// Signal number sent to the machine
    pub fn number(&self) -> i32 {
        match self {
            KillSignal::Default => 0,
            KillSignal::Poweroff => libc::SIGRTMIN() + 4,
            KillSignal::Reboot => libc::SIGINT,
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
        }
    }

    /// Pick the default and check the signal suits the container
    pub fn resolve(self, container: &str, boot: bool, all: bool) -> Result<KillSignal> {
        let unsupported = |signal: KillSignal, reason: &str| Error::UnsupportedSignal {
            signal: signal.to_string(),
            container: container.to_string(),
            reason: reason.to_string(),
        };

        if boot && all {
            return Err(unsupported(self, "--all is not supported for booted containers"));
        }

        let signal = match self {
            KillSignal::Default if boot => KillSignal::Poweroff,
            KillSignal::Default => KillSignal::Term,
            other => other,
        };

        match (signal, boot) {
            (KillSignal::Poweroff | KillSignal::Reboot, false) => Err(unsupported(
                signal,
                "poweroff and reboot need a booted container",
            )),
            (KillSignal::Term | KillSignal::Kill, true) => Err(unsupported(
                signal,
                "only poweroff and reboot may be sent to a booted container",
            )),
            _ => Ok(signal),
        }
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KillSignal::Default => "default",
            KillSignal::Poweroff => "poweroff",
            KillSignal::Reboot => "reboot",
            KillSignal::Term => "sigterm",
            KillSignal::Kill => "sigkill",
        };
        write!(f, "{}", s)
    }
}

/// Signal a container and wait until its supervisor is gone
pub fn kill_container(container: &Container, user: &str, signal: KillSignal, all: bool) -> Result<()> {
    let signal = signal.resolve(&container.name, container.config.boot, all)?;
    let who = if all { KillWho::All } else { KillWho::Leader };

    Machined::connect()?.kill(&container.machine_name(user), who, signal.number())?;

    // The supervisor holds the run lock for the container's lifetime
    tracing::debug!("waiting for {} to stop", container.name);
    container.lock_until_process_death(LockLevel::Run, LockWait::WaitForLock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_boot_flag() {
        assert_eq!(
            KillSignal::Default.resolve("dev", true, false).unwrap(),
            KillSignal::Poweroff
        );
        assert_eq!(
            KillSignal::Default.resolve("dev", false, false).unwrap(),
            KillSignal::Term
        );
        assert_eq!(
            KillSignal::Default.resolve("dev", false, true).unwrap(),
            KillSignal::Term
        );
    }

    #[test]
    fn test_booted_containers_only_take_poweroff_and_reboot() {
        assert!(KillSignal::Reboot.resolve("dev", true, false).is_ok());
        assert!(matches!(
            KillSignal::Kill.resolve("dev", true, false),
            Err(Error::UnsupportedSignal { .. })
        ));
        assert!(matches!(
            KillSignal::Poweroff.resolve("dev", true, true),
            Err(Error::UnsupportedSignal { .. })
        ));
    }

    #[test]
    fn test_plain_containers_reject_poweroff() {
        assert!(KillSignal::Kill.resolve("dev", false, true).is_ok());
        match KillSignal::Poweroff.resolve("dev", false, false) {
            Err(Error::UnsupportedSignal { signal, container, .. }) => {
                assert_eq!(signal, "poweroff");
                assert_eq!(container, "dev");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(KillSignal::Poweroff.number(), libc::SIGRTMIN() + 4);
        assert_eq!(KillSignal::Reboot.number(), 2);
        assert_eq!(KillSignal::Term.number(), 15);
        assert_eq!(KillSignal::Kill.number(), 9);
    }

    #[test]
    fn test_value_enum_aliases() {
        assert_eq!(KillSignal::from_str("sigterm", true).unwrap(), KillSignal::Term);
        assert_eq!(KillSignal::from_str("KILL", true).unwrap(), KillSignal::Kill);
        assert!(KillSignal::from_str("hup", true).is_err());
    }
}
