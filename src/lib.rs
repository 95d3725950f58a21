//! Adapts a long-running callback into a managed Windows service.
//!
//! The embedding application hands [`handle`] its service name and a runner
//! callback; `handle` covers the whole command-line surface (install, remove,
//! debug, start, stop, pause, continue) and, when dispatched by the service
//! manager, drives [`ServiceController`] — the control state machine that
//! reports status, answers pause/continue/interrogate requests, and launches
//! the callback exactly once. The `debug` verb runs the same state machine on
//! the console on any platform.

mod cli;
pub mod config;
pub mod console;
pub mod controller;
#[cfg(windows)]
pub mod eventlog;
pub mod gensvc;
pub mod heartbeat;
#[cfg(windows)]
pub mod winsvc;

pub use cli::handle;
pub use controller::ServiceController;
pub use gensvc::{
    AcceptedCommands, Command, ControlReceiver, ControlRequest, ControlSender, Logger, State,
    StatusReceiver, StatusSender, StatusUpdate,
};
