//! Interactive sessions inside containers
//!
//! This module provides:
//! - PTY acquisition from the in-container PTY service
//! - Entry requests and their serialization for the entry helper
//! - The two doors into a container (nsenter and transient systemd units)
//! - The PTY relay that drives a session to completion

pub mod door;
pub mod exit;
pub mod nsenter;
pub mod pty;
pub mod relay;
pub mod spec;
pub mod state;
pub mod systemd;
pub mod terminal;

// Re-exports
pub use door::{Door, SessionHandle};
pub use exit::ExitStatus;
pub use pty::{ContainerPty, PtyClient};
pub use relay::PtyRelay;
pub use spec::{EntrySpec, PtyStreams};
