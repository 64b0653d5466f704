//! Porthole - interactive sessions in desktop Linux containers
//!
//! Attaches terminals to processes inside systemd-nspawn containers,
//! entering either directly through the leader's namespaces or, for booted
//! containers, through a transient systemd unit.

pub mod config;
pub mod container;
pub mod error;
pub mod host;
pub mod inventory;
pub mod kill;
pub mod lock;
pub mod logging;
pub mod machine;
pub mod nsbus;
pub mod selinux;
pub mod session;
pub mod userdata;

pub use error::{Error, Result};
