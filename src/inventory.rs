//! Read-only view of a user's containers
//!
//! Backs `porthole list` and `porthole info`. Nothing here takes a lock or
//! changes a container.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::machine::Machined;
use nix::unistd::Pid;
use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Suffix of containers that are still being created
const STAGE_SUFFIX: &str = ".stage";

/// Every container of `user`, sorted by name
///
/// Entries that fail to open are skipped with a warning, so one broken
/// container does not hide the others.
pub fn list(data_dir: &Path, user: &str) -> Result<Vec<Container>> {
    let inventory = data_dir.join(user);
    let entries = match fs::read_dir(&inventory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("no container directory at {}", inventory.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut containers = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.ends_with(STAGE_SUFFIX) {
            tracing::debug!("skipping staged container {}", name);
            continue;
        }

        if !fs::metadata(entry.path())?.is_dir() {
            tracing::debug!("skipping {}, not a directory", name);
            continue;
        }

        match Container::open(data_dir, user, &name) {
            Ok(container) => containers.push(container),
            Err(e) => tracing::warn!("failed to open {}: {}", name, e),
        }
    }

    containers.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(containers)
}

/// Shell-style match of `name` against `pattern`
pub fn matches(pattern: &str, name: &str) -> Result<bool> {
    let c_pattern =
        CString::new(pattern).map_err(|_| Error::InvalidPattern(pattern.to_string()))?;
    let c_name = CString::new(name).map_err(|_| Error::InvalidPattern(pattern.to_string()))?;

    // SAFETY: both strings are NUL-terminated and outlive the call
    let result = unsafe { libc::fnmatch(c_pattern.as_ptr(), c_name.as_ptr(), 0) };
    match result {
        0 => Ok(true),
        libc::FNM_NOMATCH => Ok(false),
        _ => Err(Error::InvalidPattern(pattern.to_string())),
    }
}

/// Keep the containers matching any of `patterns`; no patterns keeps all
pub fn filter(containers: Vec<Container>, patterns: &[String]) -> Result<Vec<Container>> {
    if patterns.is_empty() {
        return Ok(containers);
    }

    let mut kept = Vec::new();
    for container in containers {
        let mut matched = false;
        for pattern in patterns {
            if matches(pattern, &container.name)? {
                matched = true;
                break;
            }
        }
        if matched {
            kept.push(container);
        }
    }

    Ok(kept)
}

/// What `porthole info` shows about a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub boot: bool,
    /// Leader process while the container is registered with machined
    pub leader: Option<Pid>,
}

impl ContainerInfo {
    /// Describe `container`, asking machined whether it runs
    ///
    /// An unreachable machined is reported as not running.
    pub fn gather(container: &Container, user: &str) -> Self {
        let machine = container.machine_name(user);
        let leader = match Machined::connect().and_then(|m| m.find(&machine)) {
            Ok(leader) => leader,
            Err(e) => {
                tracing::debug!("failed to describe machine {}: {}", machine, e);
                None
            }
        };

        Self::new(container, leader)
    }

    pub fn new(container: &Container, leader: Option<Pid>) -> Self {
        Self {
            name: container.name.clone(),
            boot: container.config.boot,
            leader,
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

impl fmt::Display for ContainerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>8} {}", "Name:", self.name)?;
        writeln!(f, "{:>8} {}", "Booted:", yes_no(self.boot))?;
        match self.leader {
            Some(pid) => writeln!(f, "{:>8} yes (leader {})", "Running:", pid),
            None => writeln!(f, "{:>8} no", "Running:"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_container(root: &Path, name: &str, json: &str) {
        let path = root.join("alice").join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("config.json"), json).unwrap();
    }

    fn names(containers: &[Container]) -> Vec<&str> {
        containers.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_list_sorted_and_skips_staged() {
        let root = tempfile::tempdir().unwrap();
        write_container(root.path(), "web", "{}");
        write_container(root.path(), "dev", r#"{"Boot": true}"#);
        write_container(root.path(), "new.stage", "{}");
        fs::write(root.path().join("alice").join("notes.txt"), "x").unwrap();

        let containers = list(root.path(), "alice").unwrap();
        assert_eq!(names(&containers), vec!["dev", "web"]);
        assert!(containers[0].config.boot);
    }

    #[test]
    fn test_list_skips_broken_containers() {
        let root = tempfile::tempdir().unwrap();
        write_container(root.path(), "good", "{}");
        write_container(root.path(), "broken", "{Boot:");
        fs::create_dir_all(root.path().join("alice").join("empty")).unwrap();

        let containers = list(root.path(), "alice").unwrap();
        assert_eq!(names(&containers), vec!["good"]);
    }

    #[test]
    fn test_list_without_inventory() {
        let root = tempfile::tempdir().unwrap();
        assert!(list(root.path(), "nobody").unwrap().is_empty());
    }

    #[test]
    fn test_matches() {
        assert!(matches("dev*", "dev-f33").unwrap());
        assert!(matches("?eb", "web").unwrap());
        assert!(matches("[dw]*", "web").unwrap());
        assert!(!matches("dev*", "web").unwrap());
        assert!(matches("a\0b", "a").is_err());
    }

    #[test]
    fn test_filter_by_patterns() {
        let root = tempfile::tempdir().unwrap();
        for name in ["arch", "dev", "devel", "web"] {
            write_container(root.path(), name, "{}");
        }
        let all = list(root.path(), "alice").unwrap();

        let kept = filter(all.clone(), &["dev*".to_string(), "web".to_string()]).unwrap();
        assert_eq!(names(&kept), vec!["dev", "devel", "web"]);

        let kept = filter(all, &[]).unwrap();
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_info_display() {
        let ct = Container {
            name: "dev".to_string(),
            path: PathBuf::from("/var/lib/porthole/alice/dev"),
            config: Default::default(),
        };

        let stopped = ContainerInfo::new(&ct, None).to_string();
        assert_eq!(stopped, "   Name: dev\n Booted: no\nRunning: no\n");

        let running = ContainerInfo::new(&ct, Some(Pid::from_raw(4242))).to_string();
        assert!(running.ends_with("Running: yes (leader 4242)\n"), "{}", running);
    }
}
