//! Door state machine
//!
//! Tracks one entry attempt from start to teardown using the state-machines
//! crate in dynamic dispatch mode.

use state_machines::state_machine;

state_machine! {
    name: DoorMachine,
    dynamic: true,
    initial: NotStarted,
    states: [NotStarted, Entering, Running, Failed, Exited, Destroyed],
    events {
        enter {
            transition: { from: NotStarted, to: Entering }
        }
        entered {
            transition: { from: Entering, to: Running }
        }
        fail {
            transition: { from: Entering, to: Failed }
        }
        exit {
            transition: { from: Running, to: Exited }
        }
        destroy {
            transition: { from: [Running, Exited], to: Destroyed }
        }
    }
}

/// Door states for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorState {
    NotStarted,
    Entering,
    Running,
    Failed,
    Exited,
    Destroyed,
}

impl DoorState {
    fn parse(s: &str) -> Self {
        match s {
            "Entering" => DoorState::Entering,
            "Running" => DoorState::Running,
            "Failed" => DoorState::Failed,
            "Exited" => DoorState::Exited,
            "Destroyed" => DoorState::Destroyed,
            _ => DoorState::NotStarted,
        }
    }
}

/// Lifecycle of a single entry attempt
pub struct DoorLifecycle {
    machine: DynamicDoorMachine<()>,
}

impl Default for DoorLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl DoorLifecycle {
    pub fn new() -> Self {
        Self {
            machine: DoorMachine::new(()).into_dynamic(),
        }
    }

    pub fn state(&self) -> DoorState {
        DoorState::parse(self.machine.current_state())
    }

    /// Whether the door produced a session that still needs teardown
    pub fn needs_teardown(&self) -> bool {
        matches!(self.state(), DoorState::Running | DoorState::Exited)
    }

    /// Record a transition, logging instead of failing when it is out of order
    pub fn record(&mut self, event: DoorMachineEvent) {
        let from = self.machine.current_state().to_string();
        let name = event.name();
        if self.machine.handle(event).is_err() {
            tracing::debug!("ignoring out of order door event {} in {}", name, from);
        }
    }
}
