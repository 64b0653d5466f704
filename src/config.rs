//! Configuration file parsing for Porthole
//!
//! Parses `porthole.toml` using serde. Every key has a default, so a missing
//! file yields a usable configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location of the host configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/porthole/porthole.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<PortholeConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: PortholeConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<PortholeConfig> {
    match fs::metadata(path) {
        Ok(_) => load(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(PortholeConfig::default())
        }
        Err(e) => Err(Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortholeConfig {
    /// Host-side storage locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Locations shared with the containers
    #[serde(default)]
    pub host: HostConfig,
}

impl PortholeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let absolute = [
            ("paths.data_dir", &self.paths.data_dir),
            ("host.private_dir", &self.host.private_dir),
            ("host.entry_helper", &self.host.entry_helper),
            ("host.nsconnect_helper", &self.host.nsconnect_helper),
            ("host.container_bus", &self.host.container_bus),
            ("host.login_shell", &self.host.login_shell),
        ];

        for (key, path) in absolute {
            if !path.is_absolute() {
                return Err(Error::ConfigValidation(format!(
                    "{} must be an absolute path, got '{}'",
                    key,
                    path.display()
                )));
            }
        }

        if self.host.pty_socket.is_empty() || self.host.pty_socket.contains('/') {
            return Err(Error::ConfigValidation(format!(
                "host.pty_socket must be a plain file name, got '{}'",
                self.host.pty_socket
            )));
        }

        Ok(())
    }
}

/// Host-side storage locations
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Root of the per-user container directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Paths as seen from inside a container
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Private directory bind-mounted into every container
    #[serde(default = "default_private_dir")]
    pub private_dir: PathBuf,

    /// Entry helper executed inside the container
    #[serde(default = "default_entry_helper")]
    pub entry_helper: PathBuf,

    /// Host helper that connects a socket from inside a mount namespace
    #[serde(default = "default_nsconnect_helper")]
    pub nsconnect_helper: PathBuf,

    /// Name of the PTY service socket inside `private_dir`
    #[serde(default = "default_pty_socket")]
    pub pty_socket: String,

    /// System bus socket inside the container
    #[serde(default = "default_container_bus")]
    pub container_bus: PathBuf,

    /// Login shell wrapper used when no command is given
    #[serde(default = "default_login_shell")]
    pub login_shell: PathBuf,

    /// nsenter(1) on the host, looked up in PATH unless absolute
    #[serde(default = "default_nsenter")]
    pub nsenter: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            private_dir: default_private_dir(),
            entry_helper: default_entry_helper(),
            nsconnect_helper: default_nsconnect_helper(),
            pty_socket: default_pty_socket(),
            container_bus: default_container_bus(),
            login_shell: default_login_shell(),
            nsenter: default_nsenter(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/porthole")
}

fn default_private_dir() -> PathBuf {
    PathBuf::from("/run/host/porthole")
}

fn default_entry_helper() -> PathBuf {
    PathBuf::from("/run/host/porthole/porthole-host")
}

fn default_nsconnect_helper() -> PathBuf {
    PathBuf::from("/usr/libexec/porthole/porthole-nsconnect")
}

fn default_pty_socket() -> String {
    "pty-service.sock".to_string()
}

fn default_container_bus() -> PathBuf {
    PathBuf::from("/run/dbus/system_bus_socket")
}

fn default_login_shell() -> PathBuf {
    PathBuf::from("/run/host/login-shell")
}

fn default_nsenter() -> PathBuf {
    PathBuf::from("nsenter")
}
