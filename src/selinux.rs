//! SELinux exec context for container entry
//!
//! Processes entering a container run as `system_r:spc_t`, keeping the user
//! and level of the caller's label.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

const SELINUXFS_ENFORCE: &str = "/sys/fs/selinux/enforce";
const SYSTEM_ROLE: &str = "system_r";
const SPC_TYPE: &str = "spc_t";

/// Whether SELinux is enabled on this host
pub fn enabled() -> bool {
    Path::new(SELINUXFS_ENFORCE).exists()
}

/// The label the next exec would get, or the current label if none is set
pub fn current_label() -> Result<String> {
    let exec = read_attr("/proc/thread-self/attr/exec")?;
    if !exec.is_empty() {
        return Ok(exec);
    }

    read_attr("/proc/self/attr/current")
}

/// Rewrite a label's role and type for processes inside a container
pub fn container_exec_label(current: &str) -> Result<String> {
    let mut parts: Vec<&str> = current.split(':').collect();
    if parts.len() != 4 && parts.len() != 5 {
        return Err(Error::EntryExec {
            command: "selinux".to_string(),
            message: format!("invalid SELinux label: {}", current),
        });
    }

    parts[1] = SYSTEM_ROLE;
    parts[2] = SPC_TYPE;

    Ok(parts.join(":"))
}

/// Label to run container entry processes with, if SELinux is enabled
pub fn entry_label() -> Result<Option<String>> {
    if !enabled() {
        tracing::debug!("SELinux is disabled");
        return Ok(None);
    }

    let current = current_label()?;
    let label = container_exec_label(&current)?;
    tracing::debug!("SELinux exec transition {} -> {}", current, label);

    Ok(Some(label))
}

/// Set the exec context of the calling thread
///
/// Applies to the next exec performed by this thread or its forked children.
pub fn set_exec_label(label: &str) -> Result<()> {
    fs::write("/proc/thread-self/attr/exec", label).map_err(|e| Error::EntryExec {
        command: "selinux".to_string(),
        message: format!("failed to set exec label {}: {}", label, e),
    })
}

fn read_attr(path: &str) -> Result<String> {
    let raw = fs::read(path)?;
    let label = String::from_utf8_lossy(&raw);
    Ok(label.trim_end_matches(['\0', '\n']).to_string())
}
