//! The calling user's session data
//!
//! When running beneath sudo or pkexec, the user being represented is the one
//! who invoked them, not root.

use crate::error::{Error, Result};
use nix::unistd::{Uid, User};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variables forwarded into a container session
pub const ENVIRON_WHITELIST: &[&str] = &[
    "COLORTERM",
    "DBUS_SESSION_BUS_ADDRESS",
    "DBUS_SYSTEM_BUS_ADDRESS",
    "DESKTOP_SESSION",
    "DISPLAY",
    "LANG",
    "SHELL",
    "SSH_AUTH_SOCK",
    "TERM",
    "VTE_VERSION",
    "WAYLAND_DISPLAY",
    "XDG_CURRENT_DESKTOP",
    "XDG_DATA_DIRS",
    "XDG_MENU_PREFIX",
    "XDG_RUNTIME_DIR",
    "XDG_SEAT",
    "XDG_SESSION_DESKTOP",
    "XDG_SESSION_ID",
    "XDG_SESSION_TYPE",
    "XDG_VTNR",
];

/// Variables naming the real caller under a privilege wrapper
const CALLER_UID_VARS: &[&str] = &["PKEXEC_UID", "SUDO_UID"];

/// Data about the user whose session is being represented
#[derive(Debug, Clone)]
pub struct Userdata {
    pub uid: u32,
    pub name: String,
    pub shell: PathBuf,
    pub environ: BTreeMap<String, String>,
}

impl Userdata {
    /// Resolve the calling user
    pub fn current() -> Result<Self> {
        let uid = if Uid::current().is_root() {
            caller_uid(|name| std::env::var(name).ok())?
        } else {
            Uid::current().as_raw()
        };

        let user = User::from_uid(Uid::from_raw(uid))
            .map_err(|e| Error::User(format!("passwd lookup for uid {} failed: {}", uid, e)))?
            .ok_or_else(|| Error::User(format!("uid {} has no passwd entry", uid)))?;

        Ok(Self {
            uid,
            name: user.name,
            shell: user.shell,
            environ: whitelisted_environ(std::env::vars()),
        })
    }
}

/// Find the uid of whoever invoked sudo/pkexec, or root itself
fn caller_uid(lookup: impl Fn(&str) -> Option<String>) -> Result<u32> {
    for var in CALLER_UID_VARS {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            return value
                .parse::<u32>()
                .map_err(|_| Error::User(format!("{}={} is not a uid", var, value)));
        }
    }

    Ok(0)
}

/// Keep only whitelisted variables
pub fn whitelisted_environ(
    vars: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter(|(name, _)| ENVIRON_WHITELIST.contains(&name.as_str()))
        .collect()
}
