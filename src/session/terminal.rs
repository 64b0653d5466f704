//! Host terminal control: raw mode and window size

use crate::error::{Error, Result};
use nix::sys::termios::{self, SetArg, Termios};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

/// Raw mode on a terminal, restored when dropped
pub struct RawMode {
    fd: OwnedFd,
    original: Termios,
}

impl RawMode {
    /// Put the host's stdin into raw mode
    pub fn enable_stdin() -> Result<Self> {
        Self::enable(io::stdin().as_fd())
    }

    pub fn enable(fd: BorrowedFd<'_>) -> Result<Self> {
        let fd = fd.try_clone_to_owned()?;

        let original = termios::tcgetattr(&fd)
            .map_err(|e| Error::Terminal(format!("tcgetattr: {}", e)))?;

        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&fd, SetArg::TCSANOW, &raw)
            .map_err(|e| Error::Terminal(format!("tcsetattr: {}", e)))?;

        tracing::debug!("terminal in raw mode");
        Ok(Self { fd, original })
    }

    /// Restore the saved attributes
    pub fn restore(&self) -> Result<()> {
        termios::tcsetattr(&self.fd, SetArg::TCSANOW, &self.original)
            .map_err(|e| Error::Terminal(format!("restore attributes: {}", e)))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::warn!("failed to restore terminal: {}", e);
        }
    }
}

/// Read the window size of a terminal
pub fn window_size(fd: impl AsFd) -> io::Result<libc::winsize> {
    let mut size: libc::winsize = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd.as_fd().as_raw_fd(), libc::TIOCGWINSZ, &mut size) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size)
}

/// Set the window size of a terminal
pub fn set_window_size(fd: impl AsFd, size: &libc::winsize) -> io::Result<()> {
    let result = unsafe { libc::ioctl(fd.as_fd().as_raw_fd(), libc::TIOCSWINSZ, size) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Copy the window size of `from` onto `to`
pub fn copy_window_size(from: impl AsFd, to: impl AsFd) -> Result<()> {
    let size = window_size(from).map_err(|e| Error::Terminal(format!("TIOCGWINSZ: {}", e)))?;
    set_window_size(to, &size).map_err(|e| Error::Terminal(format!("TIOCSWINSZ: {}", e)))?;
    tracing::debug!("window size {}x{}", size.ws_col, size.ws_row);
    Ok(())
}
