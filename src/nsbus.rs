//! Bus connections into a container's mount namespace
//!
//! The host process never changes namespace. Instead:
//! - a socket is created in the host process
//! - `porthole-nsconnect` inherits it, joins the leader's mount namespace and
//!   connects it to the container's bus socket, then exits
//! - the socket stays connected, since that is a property of the kernel
//!   object rather than of the process that called `connect()`
//!
//! zbus only dials addresses, so the connected socket is exposed through a
//! private listener whose first connection is spliced onto it.

use crate::error::{Error, Result};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io;
use std::net::Shutdown;
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use tempfile::TempDir;
use zbus::AuthMechanism;
use zbus::blocking::Connection;

/// Exit codes of `porthole-nsconnect`
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const SETNS: i32 = 2;
    pub const CONNECT: i32 = 3;
}

/// Dials a container's bus from the host mount namespace
#[derive(Debug, Clone)]
pub struct NamespaceBusDialer {
    helper: PathBuf,
    bus_path: PathBuf,
}

impl NamespaceBusDialer {
    /// `helper` is the `porthole-nsconnect` executable, `bus_path` the bus
    /// socket as seen inside the container
    pub fn new(helper: impl Into<PathBuf>, bus_path: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
            bus_path: bus_path.into(),
        }
    }

    /// Open an authenticated bus connection inside `leader`'s mount namespace
    pub fn dial(&self, leader: Pid) -> Result<BusConnection> {
        let socket = self.connect_in_namespace(leader)?;
        let forwarder = BusForwarder::start(socket)?;

        let address = format!("unix:path={}", forwarder.path().display());
        tracing::debug!("dialing container bus through {}", address);

        // EXTERNAL authenticates with our own uid; zbus sends Hello and
        // negotiates descriptor passing on unix transports
        let conn = zbus::blocking::connection::Builder::address(address.as_str())
            .map_err(|e| Error::BusDial(format!("invalid forward address {}: {}", address, e)))?
            .auth_mechanism(AuthMechanism::External)
            .build()
            .map_err(|e| Error::BusDial(format!("handshake through {} failed: {}", address, e)))?;

        Ok(BusConnection {
            conn,
            _forwarder: forwarder,
        })
    }

    /// Create a socket and connect it to the bus from inside the namespace
    ///
    /// On failure the socket is closed before returning.
    pub fn connect_in_namespace(&self, leader: Pid) -> Result<OwnedFd> {
        let ns_path = format!("/proc/{}/ns/mnt", leader);
        let namespace = File::open(&ns_path).map_err(|e| Error::NamespaceEntry {
            pid: leader.as_raw(),
            message: format!("open {}: {}", ns_path, e),
        })?;

        let sock = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| Error::NamespaceEntry {
            pid: leader.as_raw(),
            message: format!("create socket: {}", e),
        })?;

        // fd 0: the socket to connect, fd 1: the namespace to join
        let child_end = sock.try_clone()?;
        let status = Command::new(&self.helper)
            .arg(&self.bus_path)
            .stdin(Stdio::from(child_end))
            .stdout(Stdio::from(namespace))
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| Error::NamespaceEntry {
                pid: leader.as_raw(),
                message: format!("failed to run {}: {}", self.helper.display(), e),
            })?;

        match status.code() {
            Some(exit_code::SUCCESS) => Ok(sock),
            code => Err(Error::NamespaceEntry {
                pid: leader.as_raw(),
                message: describe_helper_exit(code),
            }),
        }
    }
}

fn describe_helper_exit(code: Option<i32>) -> String {
    match code {
        Some(exit_code::USAGE) => "connect helper rejected its arguments".to_string(),
        Some(exit_code::SETNS) => "connect helper could not join the mount namespace".to_string(),
        Some(exit_code::CONNECT) => "connect helper could not reach the bus socket".to_string(),
        Some(code) => format!("connect helper exited with status {}", code),
        None => "connect helper was killed by a signal".to_string(),
    }
}

/// A bus connection into a container, plus the forwarder backing it
#[derive(Debug)]
pub struct BusConnection {
    conn: Connection,
    _forwarder: BusForwarder,
}

impl BusConnection {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the connection, which also winds down the forwarder
    pub fn close(self) {
        if let Err(e) = self.conn.close() {
            tracing::debug!("closing container bus connection: {}", e);
        }
    }
}

/// Private listener whose first connection is spliced onto a socket
#[derive(Debug)]
pub struct BusForwarder {
    dir: TempDir,
}

impl BusForwarder {
    const SOCKET_NAME: &'static str = "bus";

    /// Start listening and forwarding to `upstream` in the background
    pub fn start(upstream: OwnedFd) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("porthole-bus").tempdir()?;
        // The spliced socket carries our credentials, so only we may dial it
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))?;
        let listener = UnixListener::bind(dir.path().join(Self::SOCKET_NAME))?;
        let upstream = UnixStream::from(upstream);

        thread::Builder::new()
            .name("bus-forward".to_string())
            .spawn(move || forward_first_connection(listener, upstream))?;

        Ok(Self { dir })
    }

    /// Path the bus library should dial
    pub fn path(&self) -> PathBuf {
        self.dir.path().join(Self::SOCKET_NAME)
    }

    #[cfg(test)]
    fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

fn forward_first_connection(listener: UnixListener, upstream: UnixStream) {
    let client = match listener.accept() {
        Ok((client, _)) => client,
        Err(e) => {
            tracing::error!("accepting bus forwarder connection: {}", e);
            return;
        }
    };
    drop(listener);

    if let Err(e) = splice(client, upstream) {
        tracing::error!("bus forwarding stopped: {}", e);
    }
}

/// Copy bytes both ways until each side is done or either side fails
pub fn splice(a: UnixStream, b: UnixStream) -> io::Result<()> {
    let a_reader = a.try_clone()?;
    let b_reader = b.try_clone()?;

    let reverse = thread::spawn(move || pump(b_reader, a));
    let forward = pump(a_reader, b);
    let reverse = reverse
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("forwarder thread panicked")));

    forward.and(reverse)
}

fn pump(mut from: UnixStream, mut to: UnixStream) -> io::Result<()> {
    let result = io::copy(&mut from, &mut to).map(|_| ());

    match &result {
        Ok(()) => {
            let _ = to.shutdown(Shutdown::Write);
        }
        Err(_) => {
            // Fatal: tear down both legs so the other direction ends too
            let _ = from.shutdown(Shutdown::Both);
            let _ = to.shutdown(Shutdown::Both);
        }
    }

    result
}
