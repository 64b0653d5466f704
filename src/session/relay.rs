//! PTY relay
//!
//! Drives one session from PTY acquisition to exit code:
//! - detects which host streams are terminals and acquires a container PTY
//!   if any of them is
//! - enters through the door with an [`EntrySpec`] naming the PTY-backed
//!   streams
//! - copies host stdin into the PTY and the PTY into host stdout (or stderr)
//!   on dedicated threads
//! - forwards window size changes and job control signals
//! - waits for the workload and translates its exit status

use crate::error::{Error, Result};
use crate::session::door::{Door, SessionHandle};
use crate::session::pty::{ContainerPty, PtyClient};
use crate::session::spec::{EntrySpec, PtyStreams};
use crate::session::state::{DoorLifecycle, DoorMachineEvent};
use crate::session::terminal::{self, RawMode};
use nix::sys::signal::Signal;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Pause between retries of EIO before the first transfer
const EIO_RETRY_DELAY: Duration = Duration::from_millis(10);

/// How long to keep draining PTY output once the workload is gone
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

const COPY_BUFFER_SIZE: usize = 4096;

/// The session signals are delivered to, once there is one
type SessionSlot = Arc<RwLock<Option<Arc<SessionHandle>>>>;

/// How a copy loop ended
#[derive(Debug)]
pub enum CopyOutcome {
    /// The source reached end of file
    Finished(u64),
    /// The PTY peer went away
    HungUp(u64),
    /// Unrecoverable I/O error
    Failed(io::Error),
}

/// A copy loop that stopped on an I/O error
#[derive(Debug)]
struct CopyFailure {
    direction: &'static str,
    error: io::Error,
}

fn is_eio(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EIO)
}

/// Copy `reader` into `writer` until end of file or an error
///
/// EIO is retried until the first chunk has been transferred, since the PTY
/// is not attached on the container side yet. After that, EIO means the peer
/// hung up.
pub fn forward(reader: &mut impl Read, writer: &mut impl Write) -> CopyOutcome {
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    let mut transferred: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return CopyOutcome::Finished(transferred),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_eio(&e) && transferred == 0 => {
                thread::sleep(EIO_RETRY_DELAY);
                continue;
            }
            Err(e) if is_eio(&e) => return CopyOutcome::HungUp(transferred),
            Err(e) => return CopyOutcome::Failed(e),
        };

        loop {
            match writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
                Ok(()) => break,
                Err(e) if is_eio(&e) && transferred == 0 => thread::sleep(EIO_RETRY_DELAY),
                Err(e) if is_eio(&e) => return CopyOutcome::HungUp(transferred),
                Err(e) => return CopyOutcome::Failed(e),
            }
        }

        transferred += n as u64;
    }
}

/// Which host stream the PTY output is copied to
///
/// Stdout is preferred. When stdout is not a terminal but stderr is, the
/// output goes to stderr, since the two cannot be told apart on the PTY.
pub fn output_target(streams: PtyStreams) -> Option<PtyStreams> {
    if streams.contains(PtyStreams::STDOUT) {
        Some(PtyStreams::STDOUT)
    } else if streams.contains(PtyStreams::STDERR) {
        Some(PtyStreams::STDERR)
    } else {
        None
    }
}

fn host_stream(stream: PtyStreams) -> io::Result<OwnedFd> {
    if stream == PtyStreams::STDIN {
        io::stdin().as_fd().try_clone_to_owned()
    } else if stream == PtyStreams::STDOUT {
        io::stdout().as_fd().try_clone_to_owned()
    } else {
        io::stderr().as_fd().try_clone_to_owned()
    }
}

/// The first PTY-backed host stream, whose window size the PTY follows
fn size_source(streams: PtyStreams) -> Option<PtyStreams> {
    [PtyStreams::STDIN, PtyStreams::STDOUT, PtyStreams::STDERR]
        .into_iter()
        .find(|s| streams.contains(*s))
}

/// Keeps the container PTY's window size in step with a host terminal
struct Resizer {
    host: OwnedFd,
    pty: File,
}

impl Resizer {
    fn apply(&self) {
        if let Err(e) = terminal::copy_window_size(&self.host, &self.pty) {
            tracing::debug!("failed to inherit window size: {}", e);
        }
    }
}

/// Runs sessions with terminal forwarding
pub struct PtyRelay {
    door: Door,
    pty_client: PtyClient,
    streams: PtyStreams,
}

impl PtyRelay {
    pub fn new(door: Door, pty_client: PtyClient) -> Self {
        Self {
            door,
            pty_client,
            streams: PtyStreams::detect(),
        }
    }

    /// Override terminal detection
    pub fn with_streams(mut self, streams: PtyStreams) -> Self {
        self.streams = streams;
        self
    }

    /// Run `spec` in the container and return the shell-style exit code
    ///
    /// `spec` carries everything but the PTY, which is filled in here.
    pub fn run(self, spec: EntrySpec) -> Result<i32> {
        let pty = if self.streams.is_empty() {
            tracing::debug!("no terminal streams, entering without a PTY");
            None
        } else {
            Some(self.pty_client.open()?)
        };

        let spec = match &pty {
            Some(pty) => spec.pty(pty.path.clone(), self.streams),
            None => spec,
        };

        let runtime = tokio::runtime::Runtime::new()?;
        let result = runtime.block_on(self.drive(spec, pty));
        runtime.shutdown_background();

        result
    }

    async fn drive(&self, spec: EntrySpec, pty: Option<ContainerPty>) -> Result<i32> {
        let mut lifecycle = DoorLifecycle::new();
        let slot: SessionSlot = Arc::new(RwLock::new(None));

        let resizer = match (&pty, size_source(self.streams)) {
            (Some(pty), Some(source)) => Some(Resizer {
                host: host_stream(source)?,
                pty: pty.master.try_clone()?,
            }),
            _ => None,
        };
        if let Some(resizer) = &resizer {
            resizer.apply();
        }

        // Signals arriving before the session exists are dropped, not
        // delivered to this process
        let signal_task = spawn_signal_relay(slot.clone(), resizer)?;

        lifecycle.record(DoorMachineEvent::Enter);
        let handle = match self.door.enter(&spec) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                lifecycle.record(DoorMachineEvent::Fail);
                // The relay task owns a clone of the master
                signal_task.abort();
                let _ = signal_task.await;
                drop(pty);
                return Err(e);
            }
        };
        lifecycle.record(DoorMachineEvent::Entered);

        if let Ok(mut current) = slot.write() {
            *current = Some(handle.clone());
        }

        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let failure_task = spawn_failure_watch(slot.clone(), failure_rx);

        let mut raw_mode = None;
        let mut output_done = None;

        if let Some(pty) = pty {
            if self.streams.contains(PtyStreams::STDIN) {
                match RawMode::enable_stdin() {
                    Ok(guard) => raw_mode = Some(guard),
                    Err(e) => tracing::debug!("failed to make terminal raw: {}", e),
                }
            }

            if self.streams.contains(PtyStreams::STDIN) {
                let reader = File::from(host_stream(PtyStreams::STDIN)?);
                let writer = pty.master.try_clone()?;
                spawn_copy("stdin -> pty", reader, writer, failure_tx.clone(), None)?;
            }

            if let Some(target) = output_target(self.streams) {
                let (done_tx, done_rx) = oneshot::channel();
                let writer = File::from(host_stream(target)?);
                spawn_copy("pty -> host", pty.master, writer, failure_tx.clone(), Some(done_tx))?;
                output_done = Some(done_rx);
            }
        }
        drop(failure_tx);

        let waiter = handle.clone();
        let status = tokio::task::spawn_blocking(move || waiter.wait())
            .await
            .map_err(|e| Error::UnexpectedWaitStatus(format!("wait task failed: {}", e)))?;

        // The workload is reaped; later signals must not reach a reused PID
        if let Ok(mut current) = slot.write() {
            current.take();
        }
        if status.is_ok() {
            lifecycle.record(DoorMachineEvent::Exit);
        }

        if let Some(done) = output_done {
            if tokio::time::timeout(DRAIN_TIMEOUT, done).await.is_err() {
                tracing::debug!("PTY output still open after the session ended");
            }
        }

        signal_task.abort();
        let _ = signal_task.await;
        failure_task.abort();

        drop(raw_mode);

        if lifecycle.needs_teardown() {
            match Arc::try_unwrap(handle) {
                Ok(handle) => {
                    handle.destroy();
                    lifecycle.record(DoorMachineEvent::Destroy);
                }
                Err(_) => tracing::debug!("session still referenced, leaving teardown to drop"),
            }
        }

        match status {
            Ok(exit) => {
                tracing::debug!("session {}", exit);
                Ok(exit.code())
            }
            Err(Error::UnexpectedWaitStatus(message)) => {
                tracing::error!("unexpected wait status: {}", message);
                Ok(1)
            }
            Err(e) => Err(e),
        }
    }
}

fn spawn_copy(
    direction: &'static str,
    mut reader: File,
    mut writer: File,
    failures: mpsc::UnboundedSender<CopyFailure>,
    done: Option<oneshot::Sender<()>>,
) -> Result<()> {
    thread::Builder::new()
        .name(direction.replace(' ', ""))
        .spawn(move || {
            match forward(&mut reader, &mut writer) {
                CopyOutcome::Finished(n) => tracing::debug!("{}: end of input after {} bytes", direction, n),
                CopyOutcome::HungUp(n) => tracing::debug!("{}: hangup after {} bytes", direction, n),
                CopyOutcome::Failed(error) => {
                    let _ = failures.send(CopyFailure { direction, error });
                }
            }

            if let Some(done) = done {
                let _ = done.send(());
            }
        })?;

    Ok(())
}

fn spawn_failure_watch(
    slot: SessionSlot,
    mut failures: mpsc::UnboundedReceiver<CopyFailure>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            tracing::error!("{} failed: {}", failure.direction, failure.error);
            deliver(&slot, Signal::SIGHUP).await;
        }
    })
}

fn spawn_signal_relay(slot: SessionSlot, resizer: Option<Resizer>) -> Result<JoinHandle<()>> {
    let mut winch = signal(SignalKind::window_change())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut stop = signal(SignalKind::from_raw(libc::SIGTSTP))?;

    Ok(tokio::spawn(async move {
        loop {
            let forwarded = tokio::select! {
                Some(()) = winch.recv() => {
                    if let Some(resizer) = &resizer {
                        resizer.apply();
                    }
                    continue;
                }
                Some(()) = interrupt.recv() => Signal::SIGINT,
                Some(()) = quit.recv() => Signal::SIGQUIT,
                Some(()) = hangup.recv() => Signal::SIGHUP,
                Some(()) = stop.recv() => Signal::SIGTSTP,
                else => break,
            };

            deliver(&slot, forwarded).await;
        }
    }))
}

/// Send a signal to the current session, if there is one
async fn deliver(slot: &SessionSlot, signal: Signal) {
    let handle = slot.read().ok().and_then(|current| current.as_ref().cloned());
    let Some(handle) = handle else {
        tracing::debug!("no session yet, dropping {}", signal.as_str());
        return;
    };

    tracing::debug!("forwarding {}", signal.as_str());
    match tokio::task::spawn_blocking(move || handle.signal(signal)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("{}", e),
        Err(e) => tracing::warn!("signal delivery task failed: {}", e),
    }
}
