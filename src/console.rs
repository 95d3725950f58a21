use std::ffi::OsString;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::controller::ServiceController;
use crate::gensvc::{AcceptedCommands, Command, ControlRequest, Logger, State, StatusUpdate};

/// Logger for interactive runs. Events go to the process console through the
/// tracing subscriber instead of the system event log.
pub struct ConsoleLog {
    name: String,
}

impl ConsoleLog {
    pub fn new(name: &str) -> Self {
        ConsoleLog {
            name: name.to_string(),
        }
    }
}

impl Logger for ConsoleLog {
    fn info(&self, event_id: u32, message: &str) {
        info!(service = %self.name, event_id, "{message}");
    }

    fn error(&self, event_id: u32, message: &str) {
        error!(service = %self.name, event_id, "{message}");
    }
}

/// Runs the controller on the console, with ctrl-c standing in for the
/// service manager's stop request. Control-loop semantics are identical to a
/// service-manager run; only the transport glue differs.
pub fn run(name: &str, mut controller: ServiceController) -> Result<()> {
    let (control_tx, control_rx) = crossbeam_channel::bounded(0);
    let (status_tx, status_rx) = crossbeam_channel::bounded(0);
    let snapshot = Arc::new(Mutex::new(StatusUpdate::new(
        State::StartPending,
        AcceptedCommands::none(),
    )));

    let interrupt_snapshot = snapshot.clone();
    ctrlc::set_handler(move || {
        let current = *interrupt_snapshot.lock().unwrap();
        let _ = control_tx.send(ControlRequest {
            command: Command::Stop,
            current_status: current,
        });
    })
    .context("failed to install the ctrl-c handler")?;

    let printer_snapshot = snapshot.clone();
    let printer = thread::spawn(move || {
        for update in status_rx {
            *printer_snapshot.lock().unwrap() = update;
            info!(state = ?update.state, "service status changed");
        }
    });

    info!("running {name} on the console; press ctrl-c to stop");
    let log = ConsoleLog::new(name);
    let args = [OsString::from(name)];
    let result = controller.run(&args, &control_rx, &status_tx, &log);
    drop(status_tx);
    let _ = printer.join();
    info!("{name} stopped");
    result
}
