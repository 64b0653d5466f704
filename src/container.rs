//! On-disk containers
//!
//! A container lives in `<data_dir>/<user>/<name>` and holds its
//! `config.json`, its lock sentinels and a `storage` tree that backs the
//! container's private directories.

use crate::error::{Error, Result};
use crate::lock::{ContainerLock, LockLevel, LockWait};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

const CONFIG_JSON: &str = "config.json";

/// Per-container configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    /// Whether the container runs a full init system
    #[serde(rename = "Boot", default)]
    pub boot: bool,
}

/// A container on disk
#[derive(Debug, Clone)]
pub struct Container {
    pub name: String,
    pub path: PathBuf,
    pub config: ContainerConfig,
}

/// Container names are restricted to `[A-Za-z0-9_-]+`
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidContainerName(name.to_string()))
    }
}

impl Container {
    /// Open a user's container by name
    pub fn open(data_dir: &Path, user: &str, name: &str) -> Result<Self> {
        validate_name(name)?;
        Self::open_path(&data_dir.join(user).join(name), name)
    }

    /// Open a container at an explicit path
    pub fn open_path(path: &Path, name: &str) -> Result<Self> {
        let config_path = path.join(CONFIG_JSON);

        let content = fs::read_to_string(&config_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ContainerNotFound(name.to_string())
            } else {
                Error::ConfigRead {
                    path: config_path.clone(),
                    source: e,
                }
            }
        })?;

        let config = serde_json::from_str(&content).map_err(|e| Error::ContainerConfig {
            path: config_path,
            source: e,
        })?;

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            config,
        })
    }

    /// Root of the container's storage tree
    pub fn storage(&self) -> PathBuf {
        self.path.join("storage")
    }

    /// Host path of a path inside the storage tree
    ///
    /// Absolute components are re-rooted under the storage directory, so
    /// `storage_child(["/run/host/porthole", "x.sock"])` names
    /// `<storage>/run/host/porthole/x.sock`.
    pub fn storage_child<P: AsRef<Path>>(&self, parts: impl IntoIterator<Item = P>) -> PathBuf {
        let mut path = self.storage();
        for part in parts {
            for component in part.as_ref().components() {
                if let Component::Normal(c) = component {
                    path.push(c);
                }
            }
        }
        path
    }

    /// Name the container is registered under with machined
    pub fn machine_name(&self, user: &str) -> String {
        format!("porthole-{}-{}", user, self.name)
    }

    /// Drop variables that make no sense inside this container
    pub fn apply_environ_filter(&self, environ: &mut BTreeMap<String, String>) {
        if self.config.boot {
            // A booted container has its own seat assignment
            environ.remove("XDG_VTNR");
        }
    }

    /// Acquire a lock on this container
    pub fn lock(&self, level: LockLevel, wait: LockWait) -> Result<ContainerLock> {
        ContainerLock::acquire(&self.path, level, wait)
    }

    /// Acquire a lock that is only released when this process exits
    pub fn lock_until_process_death(&self, level: LockLevel, wait: LockWait) -> Result<()> {
        self.lock(level, wait)?.hold_until_process_death();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_container(root: &Path, user: &str, name: &str, json: &str) -> PathBuf {
        let path = root.join(user).join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(CONFIG_JSON), json).unwrap();
        path
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("fedora-33_dev").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a b").is_err());
    }

    #[test]
    fn test_open_reads_boot_flag() {
        let root = tempfile::tempdir().unwrap();
        write_container(root.path(), "alice", "booted", r#"{"Boot": true}"#);
        write_container(root.path(), "alice", "plain", "{}");

        let booted = Container::open(root.path(), "alice", "booted").unwrap();
        assert!(booted.config.boot);

        let plain = Container::open(root.path(), "alice", "plain").unwrap();
        assert!(!plain.config.boot);
    }

    #[test]
    fn test_open_missing_container() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            Container::open(root.path(), "alice", "nope"),
            Err(Error::ContainerNotFound(_))
        ));
    }

    #[test]
    fn test_open_bad_json() {
        let root = tempfile::tempdir().unwrap();
        write_container(root.path(), "alice", "broken", "{Boot: yes");
        assert!(matches!(
            Container::open(root.path(), "alice", "broken"),
            Err(Error::ContainerConfig { .. })
        ));
    }

    #[test]
    fn test_storage_child_reroots_absolute_paths() {
        let ct = Container {
            name: "dev".to_string(),
            path: PathBuf::from("/var/lib/porthole/alice/dev"),
            config: ContainerConfig::default(),
        };

        assert_eq!(
            ct.storage_child(["/run/host/porthole", "pty-service.sock"]),
            PathBuf::from("/var/lib/porthole/alice/dev/storage/run/host/porthole/pty-service.sock")
        );
        assert_eq!(ct.machine_name("alice"), "porthole-alice-dev");
    }

    #[test]
    fn test_environ_filter_for_booted_container() {
        let mut ct = Container {
            name: "dev".to_string(),
            path: PathBuf::from("/tmp/dev"),
            config: ContainerConfig { boot: false },
        };

        let mut environ = BTreeMap::from([
            ("XDG_VTNR".to_string(), "2".to_string()),
            ("TERM".to_string(), "xterm".to_string()),
        ]);

        ct.apply_environ_filter(&mut environ);
        assert!(environ.contains_key("XDG_VTNR"));

        ct.config.boot = true;
        ct.apply_environ_filter(&mut environ);
        assert!(!environ.contains_key("XDG_VTNR"));
        assert!(environ.contains_key("TERM"));
    }

    #[test]
    fn test_container_lock_uses_container_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = write_container(root.path(), "alice", "dev", "{}");
        let ct = Container::open(root.path(), "alice", "dev").unwrap();

        let lock = ct
            .lock(LockLevel::Config, LockWait::NoWaitForLock)
            .unwrap();
        assert!(path.join("config.lock").exists());
        lock.release();
    }
}
