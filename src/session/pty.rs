//! PTY acquisition from the in-container PTY service
//!
//! The service listens on a socket in the container's private run directory.
//! A client connects and receives a single reply: the container-visible path
//! of a PTY as the payload, and the PTY master as the only descriptor of the
//! only SCM_RIGHTS control message.

use crate::config::PortholeConfig;
use crate::container::Container;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};
use std::fs::File;
use std::io::IoSliceMut;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest PTY path the service sends
pub const MAX_PTY_PATH: usize = 16;

/// Descriptor slots reserved for the reply, so surplus descriptors can be
/// received and closed instead of truncated
const RECEIVE_FDS: usize = 4;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A PTY handed out by the container
#[derive(Debug)]
pub struct ContainerPty {
    /// Path of the PTY inside the container
    pub path: String,
    /// Host side of the PTY
    pub master: File,
}

/// Client for the in-container PTY service
#[derive(Debug, Clone)]
pub struct PtyClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl PtyClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Client for the service of `container`, reached through its storage tree
    pub fn for_container(container: &Container, config: &PortholeConfig) -> Self {
        Self::new(container.storage_child([
            config.host.private_dir.as_path(),
            Path::new(&config.host.pty_socket),
        ]))
    }

    /// Bound how long to wait for the service's reply
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Request a PTY
    pub fn open(&self) -> Result<ContainerPty> {
        tracing::debug!("requesting PTY from {}", self.socket_path.display());

        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            Error::Transport(format!("connect to {}: {}", self.socket_path.display(), e))
        })?;
        stream.set_read_timeout(Some(self.timeout))?;

        let pty = receive_pty(&stream)?;
        tracing::debug!("received PTY {}", pty.path);

        Ok(pty)
    }
}

/// Acquire a PTY from `container`'s PTY service
pub fn open_in_container(container: &Container, config: &PortholeConfig) -> Result<ContainerPty> {
    PtyClient::for_container(container, config).open()
}

/// Receive one PTY reply from a connected service socket
pub fn receive_pty(stream: &UnixStream) -> Result<ContainerPty> {
    // One spare byte, so an overlong path on a stream socket is seen
    let mut payload = [0u8; MAX_PTY_PATH + 1];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; RECEIVE_FDS]);

    let (bytes, flags, messages) = loop {
        let mut iov = [IoSliceMut::new(&mut payload)];
        match recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::MSG_CMSG_CLOEXEC,
        ) {
            Ok(msg) => {
                let messages: Vec<ControlMessageOwned> = msg
                    .cmsgs()
                    .map_err(|e| Error::Transport(format!("malformed control messages: {}", e)))?
                    .collect();
                break (msg.bytes, msg.flags, messages);
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => {
                return Err(Error::Transport(
                    "timed out waiting for the PTY service".to_string(),
                ));
            }
            Err(e) => return Err(Error::Transport(format!("recvmsg: {}", e))),
        }
    };

    validate_handoff(&payload[..bytes], flags, messages)
}

/// Check a reply and take ownership of its descriptor
///
/// Every received descriptor is owned before any check, so rejected replies
/// leak nothing.
fn validate_handoff(
    payload: &[u8],
    flags: MsgFlags,
    messages: Vec<ControlMessageOwned>,
) -> Result<ContainerPty> {
    let message_count = messages.len();
    let mut fds: Vec<OwnedFd> = Vec::new();
    for message in messages {
        if let ControlMessageOwned::ScmRights(raw) = message {
            // SAFETY: SCM_RIGHTS descriptors are freshly installed in this
            // process and owned by nobody else
            fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
        }
    }

    if flags.contains(MsgFlags::MSG_CTRUNC) {
        return Err(Error::Transport("control message was truncated".to_string()));
    }

    if flags.contains(MsgFlags::MSG_TRUNC) || payload.len() > MAX_PTY_PATH {
        return Err(Error::Transport(format!(
            "PTY path exceeds {} bytes",
            MAX_PTY_PATH
        )));
    }

    if message_count != 1 {
        return Err(Error::Transport(format!(
            "expected 1 control message, got {}",
            message_count
        )));
    }

    if fds.len() != 1 {
        return Err(Error::Transport(format!(
            "expected 1 descriptor, got {}",
            fds.len()
        )));
    }

    let path = std::str::from_utf8(payload)
        .map_err(|_| Error::Transport("PTY path is not valid UTF-8".to_string()))?
        .trim_end_matches('\0');
    if path.is_empty() {
        return Err(Error::Transport("empty PTY path".to_string()));
    }

    let master = File::from(fds.remove(0));

    Ok(ContainerPty {
        path: path.to_string(),
        master,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{ControlMessage, sendmsg};
    use std::io::IoSlice;
    use std::os::unix::io::IntoRawFd;
    use std::os::unix::net::UnixListener;
    use std::sync::mpsc;
    use std::thread;

    fn devnull() -> RawFd {
        File::open("/dev/null").unwrap().into_raw_fd()
    }

    /// A pipe read end to hand off, plus a write end that observes its closing
    fn watched_fd() -> (RawFd, OwnedFd) {
        let (read, write) = nix::unistd::pipe().unwrap();
        (read.into_raw_fd(), write)
    }

    fn reader_closed(write: &OwnedFd) -> bool {
        nix::unistd::write(write, b"x") == Err(Errno::EPIPE)
    }

    /// Serve one reply carrying `fd_count` descriptors over a fresh socket
    fn serve(payload: &'static [u8], fd_count: usize) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pty-service.sock");
        let listener = UnixListener::bind(&path).unwrap();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let fds: Vec<RawFd> = (0..fd_count).map(|_| devnull()).collect();
            let iov = [IoSlice::new(payload)];
            let cmsgs = if fds.is_empty() {
                vec![]
            } else {
                vec![ControlMessage::ScmRights(&fds)]
            };
            sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None).unwrap();
        });

        (dir, path)
    }

    #[test]
    fn test_open_receives_pty() {
        let (_dir, path) = serve(b"/dev/pts/7", 1);
        let pty = PtyClient::new(&path).open().unwrap();
        assert_eq!(pty.path, "/dev/pts/7");
        assert!(pty.master.metadata().is_ok());
    }

    #[test]
    fn test_open_rejects_missing_descriptor() {
        let (_dir, path) = serve(b"/dev/pts/7", 0);
        assert!(matches!(
            PtyClient::new(&path).open(),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_open_rejects_two_descriptors() {
        let (_dir, path) = serve(b"/dev/pts/7", 2);
        match PtyClient::new(&path).open() {
            Err(Error::Transport(message)) => assert!(message.contains("2"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_open_rejects_overlong_path() {
        let (_dir, path) = serve(b"/dev/pts/123456789012345", 1);
        match PtyClient::new(&path).open() {
            Err(Error::Transport(message)) => assert!(message.contains("exceeds"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_open_accepts_longest_path() {
        let (_dir, path) = serve(b"/dev/pts/1234567", 1);
        let pty = PtyClient::new(&path).open().unwrap();
        assert_eq!(pty.path.len(), MAX_PTY_PATH);
    }

    #[test]
    fn test_validate_rejects_datagram_truncation() {
        let (fd, watch) = watched_fd();
        let result = validate_handoff(
            b"/dev/pts/1234567",
            MsgFlags::MSG_TRUNC,
            vec![ControlMessageOwned::ScmRights(vec![fd])],
        );
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(reader_closed(&watch));
    }

    #[test]
    fn test_open_service_closes_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pty-service.sock");
        let listener = UnixListener::bind(&path).unwrap();
        thread::spawn(move || drop(listener.accept().unwrap()));

        assert!(matches!(
            PtyClient::new(&path).open(),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_open_times_out_on_silent_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pty-service.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            let _ = done_rx.recv();
        });

        let result = PtyClient::new(&path)
            .with_timeout(Duration::from_millis(100))
            .open();
        done_tx.send(()).unwrap();

        match result {
            Err(Error::Transport(message)) => assert!(message.contains("timed out"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_open_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PtyClient::new(dir.path().join("absent.sock")).open(),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_validate_closes_surplus_descriptors() {
        let (a, a_watch) = watched_fd();
        let (b, b_watch) = watched_fd();
        let result = validate_handoff(
            b"/dev/pts/1",
            MsgFlags::empty(),
            vec![ControlMessageOwned::ScmRights(vec![a, b])],
        );
        assert!(result.is_err());
        assert!(reader_closed(&a_watch));
        assert!(reader_closed(&b_watch));
    }

    #[test]
    fn test_validate_rejects_two_messages() {
        let (a, a_watch) = watched_fd();
        let (b, b_watch) = watched_fd();
        let result = validate_handoff(
            b"/dev/pts/1",
            MsgFlags::empty(),
            vec![
                ControlMessageOwned::ScmRights(vec![a]),
                ControlMessageOwned::ScmRights(vec![b]),
            ],
        );
        match result {
            Err(Error::Transport(message)) => assert!(message.contains("control message")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(reader_closed(&a_watch));
        assert!(reader_closed(&b_watch));
    }

    #[test]
    fn test_validate_rejects_truncation_and_bad_paths() {
        let truncated = validate_handoff(
            b"/dev/pts/1",
            MsgFlags::MSG_CTRUNC,
            vec![ControlMessageOwned::ScmRights(vec![devnull()])],
        );
        assert!(matches!(truncated, Err(Error::Transport(_))));

        let empty = validate_handoff(b"", MsgFlags::empty(), vec![ControlMessageOwned::ScmRights(vec![devnull()])]);
        assert!(matches!(empty, Err(Error::Transport(_))));

        let binary = validate_handoff(
            &[0xff, 0xfe],
            MsgFlags::empty(),
            vec![ControlMessageOwned::ScmRights(vec![devnull()])],
        );
        assert!(matches!(binary, Err(Error::Transport(_))));
    }

    #[test]
    fn test_client_path_for_container() {
        let ct = Container {
            name: "dev".to_string(),
            path: PathBuf::from("/var/lib/porthole/alice/dev"),
            config: Default::default(),
        };
        let client = PtyClient::for_container(&ct, &PortholeConfig::default());
        assert_eq!(
            client.socket_path(),
            Path::new("/var/lib/porthole/alice/dev/storage/run/host/porthole/pty-service.sock")
        );
    }
}
