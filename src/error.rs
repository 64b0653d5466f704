//! Unified error types for Porthole

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Porthole operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Container errors
    #[error("Invalid container name: {0}")]
    InvalidContainerName(String),

    #[error("Container '{0}' not found")]
    ContainerNotFound(String),

    #[error("Failed to parse container config '{path}': {source}")]
    ContainerConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid container pattern '{0}'")]
    InvalidPattern(String),

    #[error("Container machine '{0}' is not running")]
    MachineNotRunning(String),

    #[error("Failed to resolve user: {0}")]
    User(String),

    // Lock errors
    #[error("Container is locked ({0})")]
    LockUnavailable(PathBuf),

    #[error("Failed to lock '{path}': {source}")]
    Lock { path: PathBuf, source: nix::Error },

    // Session entry errors
    #[error("PTY service transport error: {0}")]
    Transport(String),

    #[error("Failed to enter namespace of process {pid}: {message}")]
    NamespaceEntry { pid: i32, message: String },

    #[error("Failed to dial container bus: {0}")]
    BusDial(String),

    #[error("Bus request failed ({context}): {source}")]
    Bus {
        context: String,
        source: zbus::Error,
    },

    #[error("Failed to execute '{command}': {message}")]
    EntryExec { command: String, message: String },

    #[error("Unexpected wait status: {0}")]
    UnexpectedWaitStatus(String),

    #[error("Failed to deliver signal to {target}: {message}")]
    SignalDelivery { target: String, message: String },

    #[error("Terminal setup failed: {0}")]
    Terminal(String),

    // Kill errors
    #[error("Signal '{signal}' cannot be sent to container '{container}': {reason}")]
    UnsupportedSignal {
        signal: String,
        container: String,
        reason: String,
    },
}

impl Error {
    /// Attach context to a bus error
    pub fn bus(context: impl Into<String>, source: zbus::Error) -> Self {
        Error::Bus {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for Porthole operations
pub type Result<T> = std::result::Result<T, Error>;
