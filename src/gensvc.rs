//! Host-agnostic vocabulary shared by the control loop and its host
//! integrations.

/// Lifecycle states reported to the host service manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    StartPending,
    Running,
    Paused,
    StopPending,
    Stopped,
}

/// Which control commands the service currently accepts. Mirrors the service
/// manager's accept mask, where pause and continue share a flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcceptedCommands {
    pub stop: bool,
    pub shutdown: bool,
    pub pause_continue: bool,
}

impl AcceptedCommands {
    pub fn none() -> Self {
        AcceptedCommands::default()
    }

    pub fn all() -> Self {
        AcceptedCommands {
            stop: true,
            shutdown: true,
            pause_continue: true,
        }
    }
}

/// One status report. A fresh value is pushed for every transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: State,
    pub accepted: AcceptedCommands,
}

impl StatusUpdate {
    pub fn new(state: State, accepted: AcceptedCommands) -> Self {
        StatusUpdate { state, accepted }
    }
}

/// Control commands delivered by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Interrogate,
    Stop,
    Shutdown,
    Pause,
    Continue,
    Other(u32),
}

/// A command paired with the host's snapshot of the last status it observed.
/// Interrogate echoes the snapshot back unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRequest {
    pub command: Command,
    pub current_status: StatusUpdate,
}

pub type ControlSender = crossbeam_channel::Sender<ControlRequest>;
pub type ControlReceiver = crossbeam_channel::Receiver<ControlRequest>;
pub type StatusSender = crossbeam_channel::Sender<StatusUpdate>;
pub type StatusReceiver = crossbeam_channel::Receiver<StatusUpdate>;

/// Event sink for service lifecycle messages. Side effect only; logging never
/// affects control flow.
pub trait Logger {
    fn info(&self, event_id: u32, message: &str);
    fn error(&self, event_id: u32, message: &str);
}
