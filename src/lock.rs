//! Hierarchical advisory locking for container directories
//!
//! Each container directory carries one sentinel file per lock level:
//! - `run.lock` held by the container supervisor for the container's lifetime
//! - `exports.lock` held while exports are rebuilt
//! - `config.lock` held while the container config is rewritten
//!
//! `FullContainer` locks the directory itself and then every sentinel in
//! ascending order. All locks are exclusive `flock(2)` locks.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Lock levels, in acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    Run,
    Exports,
    Config,
    /// Implies Run, Exports and Config
    FullContainer,
}

impl LockLevel {
    /// Levels taken by `FullContainer`, in order
    pub const SUB_LEVELS: [LockLevel; 3] = [LockLevel::Run, LockLevel::Exports, LockLevel::Config];

    /// Sentinel file name for a single level
    pub fn sentinel(&self) -> Option<&'static str> {
        match self {
            LockLevel::Run => Some("run.lock"),
            LockLevel::Exports => Some("exports.lock"),
            LockLevel::Config => Some("config.lock"),
            LockLevel::FullContainer => None,
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockLevel::Run => "run",
            LockLevel::Exports => "exports",
            LockLevel::Config => "config",
            LockLevel::FullContainer => "full",
        };
        write!(f, "{}", s)
    }
}

/// Whether to block until a contended lock becomes free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    WaitForLock,
    NoWaitForLock,
}

/// Ownership of one or more held advisory locks
///
/// Dropping the value (or calling [`ContainerLock::release`]) closes every
/// descriptor and frees the locks.
#[derive(Debug)]
pub struct ContainerLock {
    level: LockLevel,
    held: Vec<Flock<File>>,
}

impl ContainerLock {
    /// Acquire `level` on the container directory `dir`
    ///
    /// Acquisition is all-or-nothing: if any step fails, the locks taken so
    /// far are released before the error is returned.
    pub fn acquire(dir: &Path, level: LockLevel, wait: LockWait) -> Result<Self> {
        let mut held = Vec::new();

        for (path, is_dir) in lock_targets(dir, level) {
            let file = open_target(&path, is_dir).map_err(|e| Error::Lock {
                path: path.clone(),
                source: Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
            })?;

            // `held` is dropped on the error path, unlocking what we have
            held.push(lock_file(&path, file, wait)?);
        }

        tracing::debug!("acquired {} lock on {}", level, dir.display());

        Ok(Self { level, held })
    }

    /// The level this lock was acquired at
    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Number of descriptors held
    pub fn descriptors(&self) -> usize {
        self.held.len()
    }

    /// Release every held lock now
    pub fn release(self) {
        tracing::debug!("releasing {} lock ({} descriptors)", self.level, self.held.len());
        drop(self.held);
    }

    /// Keep the locks until this process exits
    ///
    /// The guards are leaked, since dropping a `Flock` unlocks it. The kernel
    /// drops the locks when the process dies, crash included.
    pub fn hold_until_process_death(self) {
        tracing::debug!("holding {} lock until exit", self.level);
        for lock in self.held {
            std::mem::forget(lock);
        }
    }
}

/// Paths to lock for `level`, paired with whether the path is a directory
fn lock_targets(dir: &Path, level: LockLevel) -> Vec<(PathBuf, bool)> {
    match level.sentinel() {
        Some(name) => vec![(dir.join(name), false)],
        None => std::iter::once((dir.to_path_buf(), true))
            .chain(
                LockLevel::SUB_LEVELS
                    .iter()
                    .filter_map(|sub| sub.sentinel())
                    .map(|name| (dir.join(name), false)),
            )
            .collect(),
    }
}

fn open_target(path: &Path, is_dir: bool) -> std::io::Result<File> {
    if is_dir {
        File::open(path)
    } else {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
    }
}

fn lock_file(path: &Path, mut file: File, wait: LockWait) -> Result<Flock<File>> {
    let arg = match wait {
        LockWait::WaitForLock => FlockArg::LockExclusive,
        LockWait::NoWaitForLock => FlockArg::LockExclusiveNonblock,
    };

    loop {
        match Flock::lock(file, arg) {
            Ok(lock) => return Ok(lock),
            Err((returned, Errno::EINTR)) => file = returned,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(Error::LockUnavailable(path.to_path_buf()));
            }
            Err((_, errno)) => {
                return Err(Error::Lock {
                    path: path.to_path_buf(),
                    source: errno,
                });
            }
        }
    }
}
