//! Exit status of an entered session

use crate::error::{Error, Result};
use nix::sys::wait::WaitStatus;
use std::fmt;

/// How the workload inside the container ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited with a status code
    Normal(i32),
    /// Terminated by a signal
    Signaled(i32),
}

impl ExitStatus {
    /// Decode a local wait status
    pub fn from_wait_status(status: WaitStatus) -> Result<Self> {
        match status {
            WaitStatus::Exited(_, code) => Ok(ExitStatus::Normal(code)),
            WaitStatus::Signaled(_, signal, _) => Ok(ExitStatus::Signaled(signal as i32)),
            other => Err(Error::UnexpectedWaitStatus(format!("{:?}", other))),
        }
    }

    /// Decode a unit's `ExecMainCode`/`ExecMainStatus` pair
    pub fn from_exec_main(code: i32, status: i32) -> Self {
        if code == libc::CLD_EXITED {
            ExitStatus::Normal(status)
        } else {
            ExitStatus::Signaled(status)
        }
    }

    /// The code a shell would report for this status
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Normal(code) => *code,
            ExitStatus::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Normal(code) => write!(f, "exited with status {}", code),
            ExitStatus::Signaled(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_normal_exit() {
        let status = WaitStatus::from_raw(Pid::from_raw(1), 7 << 8).unwrap();
        let exit = ExitStatus::from_wait_status(status).unwrap();
        assert_eq!(exit, ExitStatus::Normal(7));
        assert_eq!(exit.code(), 7);
    }

    #[test]
    fn test_signaled_exit() {
        let status = WaitStatus::from_raw(Pid::from_raw(1), 9).unwrap();
        let exit = ExitStatus::from_wait_status(status).unwrap();
        assert_eq!(exit, ExitStatus::Signaled(9));
        assert_eq!(exit.code(), 137);
    }

    #[test]
    fn test_stopped_is_unexpected() {
        // WIFSTOPPED with SIGTSTP
        let status = WaitStatus::from_raw(Pid::from_raw(1), (20 << 8) | 0x7f).unwrap();
        assert!(matches!(
            ExitStatus::from_wait_status(status),
            Err(Error::UnexpectedWaitStatus(_))
        ));
    }

    #[test]
    fn test_exec_main_decoding() {
        assert_eq!(
            ExitStatus::from_exec_main(libc::CLD_EXITED, 3),
            ExitStatus::Normal(3)
        );
        assert_eq!(
            ExitStatus::from_exec_main(libc::CLD_KILLED, 15),
            ExitStatus::Signaled(15)
        );
        assert_eq!(ExitStatus::from_exec_main(libc::CLD_DUMPED, 11).code(), 139);
    }
}
