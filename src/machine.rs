//! machined client
//!
//! Resolves container leaders and delivers signals to registered machines
//! over the host system bus.

use crate::error::{Error, Result};
use nix::unistd::Pid;
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::OwnedObjectPath;

const MACHINE1_DEST: &str = "org.freedesktop.machine1";
const MACHINE1_PATH: &str = "/org/freedesktop/machine1";
const MANAGER_IFACE: &str = "org.freedesktop.machine1.Manager";
const MACHINE_IFACE: &str = "org.freedesktop.machine1.Machine";
const NO_SUCH_MACHINE: &str = "org.freedesktop.machine1.NoSuchMachine";

/// Which processes of a machine receive a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillWho {
    Leader,
    All,
}

impl KillWho {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillWho::Leader => "leader",
            KillWho::All => "all",
        }
    }
}

/// Connection to machined on the host system bus
pub struct Machined {
    conn: Connection,
}

impl Machined {
    /// Connect to the host system bus
    pub fn connect() -> Result<Self> {
        let conn = Connection::system().map_err(|e| Error::bus("connect to system bus", e))?;
        Ok(Self { conn })
    }

    fn manager(&self) -> Result<Proxy<'_>> {
        Proxy::new(&self.conn, MACHINE1_DEST, MACHINE1_PATH, MANAGER_IFACE)
            .map_err(|e| Error::bus("machined manager proxy", e))
    }

    /// Resolve a machine name to its leader process
    pub fn leader(&self, machine: &str) -> Result<Pid> {
        self.find(machine)?
            .ok_or_else(|| Error::MachineNotRunning(machine.to_string()))
    }

    /// Leader of `machine`, or `None` when it is not registered
    pub fn find(&self, machine: &str) -> Result<Option<Pid>> {
        let path: OwnedObjectPath = match self.manager()?.call("GetMachine", &(machine,)) {
            Ok(path) => path,
            Err(zbus::Error::MethodError(name, _, _)) if name == NO_SUCH_MACHINE => {
                tracing::debug!("machine {} is not registered", machine);
                return Ok(None);
            }
            Err(e) => return Err(Error::bus(format!("GetMachine {}", machine), e)),
        };

        let proxy = Proxy::new(&self.conn, MACHINE1_DEST, path.as_str(), MACHINE_IFACE)
            .map_err(|e| Error::bus(format!("machine proxy for {}", machine), e))?;

        let leader: u32 = proxy
            .get_property("Leader")
            .map_err(|e| Error::bus(format!("Leader of {}", machine), e))?;

        tracing::debug!("machine {} has leader {}", machine, leader);

        Ok(Some(Pid::from_raw(leader as i32)))
    }

    /// Send a signal to a machine's leader or to all of its processes
    pub fn kill(&self, machine: &str, who: KillWho, signal: i32) -> Result<()> {
        tracing::debug!("sending signal {} to {} of {}", signal, who.as_str(), machine);

        let () = self
            .manager()?
            .call("KillMachine", &(machine, who.as_str(), signal))
            .map_err(|e| Error::bus(format!("KillMachine {}", machine), e))?;

        Ok(())
    }
}

/// Resolve a machine's leader on a fresh system bus connection
pub fn leader_of(machine: &str) -> Result<Pid> {
    Machined::connect()?.leader(machine)
}
