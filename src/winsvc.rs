use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::OnceCell;
use windows_service::define_windows_service;
use windows_service::service::{
    ServiceAccess, ServiceControl, ServiceControlAccept, ServiceErrorControl, ServiceExitCode,
    ServiceInfo, ServiceStartType, ServiceState, ServiceStatus, ServiceType,
};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::service_dispatcher;
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

use crate::controller::ServiceController;
use crate::eventlog::EventLog;
use crate::gensvc::{AcceptedCommands, Command, ControlRequest, Logger, State, StatusUpdate};

define_windows_service!(ffi_service_main, service_main);

struct ServiceEntry {
    name: String,
    controller: Option<ServiceController>,
}

/// Stores the global information needed to run the service. The dispatcher
/// gives `service_main` no way to smuggle state in, so it lives here.
static SERVICE_TABLE: OnceCell<Mutex<ServiceEntry>> = OnceCell::new();

/// Hands the controller to the service dispatcher. Blocks until the service
/// has stopped.
pub fn run(name: &str, controller: ServiceController) -> Result<()> {
    SERVICE_TABLE
        .set(Mutex::new(ServiceEntry {
            name: name.to_string(),
            controller: Some(controller),
        }))
        .map_err(|_entry| anyhow!("a service has already been started"))?;
    service_dispatcher::start(name, ffi_service_main).map_err(anyhow::Error::from)
}

fn service_main(args: Vec<OsString>) {
    let (name, controller) = match take_entry() {
        Ok(entry) => entry,
        Err(_err) => return,
    };
    // Failing to open the event log is fatal to the start attempt; there is
    // nowhere to report the failure itself.
    let log = match EventLog::register(&name) {
        Ok(log) => log,
        Err(_err) => return,
    };
    log.info(1, &format!("starting {name} service"));
    match service_main_inner(&name, controller, args, &log) {
        Ok(()) => log.info(1, &format!("{name} service stopped")),
        Err(err) => log.error(1, &format!("{name} service failed: {err:#}")),
    }
}

fn take_entry() -> Result<(String, ServiceController)> {
    let mut entry = SERVICE_TABLE
        .get()
        .ok_or_else(|| anyhow!("no service registered yet"))?
        .lock()
        .map_err(|_err| anyhow!("failed to lock the service table"))?;
    let controller = entry
        .controller
        .take()
        .ok_or_else(|| anyhow!("the service already ran"))?;
    Ok((entry.name.clone(), controller))
}

fn service_main_inner(
    name: &str,
    mut controller: ServiceController,
    args: Vec<OsString>,
    log: &EventLog,
) -> Result<()> {
    let (control_tx, control_rx) = crossbeam_channel::bounded(0);
    let (status_tx, status_rx) = crossbeam_channel::bounded(0);
    let snapshot = Arc::new(Mutex::new(StatusUpdate::new(
        State::StartPending,
        AcceptedCommands::none(),
    )));

    let handler_snapshot = snapshot.clone();
    let handler = move |control: ServiceControl| -> ServiceControlHandlerResult {
        let command = match control {
            ServiceControl::Interrogate => Command::Interrogate,
            ServiceControl::Stop => Command::Stop,
            ServiceControl::Shutdown => Command::Shutdown,
            ServiceControl::Pause => Command::Pause,
            ServiceControl::Continue => Command::Continue,
            _ => return ServiceControlHandlerResult::NotImplemented,
        };
        let current = *handler_snapshot.lock().unwrap();
        // A send only fails once the controller has returned; the service is
        // tearing down at that point and the request is moot.
        let _ = control_tx.send(ControlRequest {
            command,
            current_status: current,
        });
        ServiceControlHandlerResult::NoError
    };
    let status_handle = service_control_handler::register(name, handler)
        .context("failed to register the service control handler")?;

    let forwarder_snapshot = snapshot.clone();
    let forwarder = thread::spawn(move || -> windows_service::Result<()> {
        for update in status_rx {
            *forwarder_snapshot.lock().unwrap() = update;
            set_status(status_handle, update)?;
        }
        // The controller's last word is StopPending; the host finalizes the
        // transition once the channel has drained.
        set_status(
            status_handle,
            StatusUpdate::new(State::Stopped, AcceptedCommands::none()),
        )
    });

    let run_result = controller.run(&args, &control_rx, &status_tx, log);
    drop(status_tx);
    forwarder
        .join()
        .map_err(|_panic| anyhow!("status forwarder panicked"))?
        .context("failed to report service status")?;
    run_result
}

fn set_status(handle: ServiceStatusHandle, update: StatusUpdate) -> windows_service::Result<()> {
    handle.set_service_status(ServiceStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state: service_state(update.state),
        controls_accepted: controls_accepted(update.accepted),
        exit_code: ServiceExitCode::Win32(0),
        checkpoint: 0,
        wait_hint: Duration::default(),
        process_id: None,
    })
}

fn service_state(state: State) -> ServiceState {
    match state {
        State::StartPending => ServiceState::StartPending,
        State::Running => ServiceState::Running,
        State::Paused => ServiceState::Paused,
        State::StopPending => ServiceState::StopPending,
        State::Stopped => ServiceState::Stopped,
    }
}

fn controls_accepted(accepted: AcceptedCommands) -> ServiceControlAccept {
    let mut mask = ServiceControlAccept::empty();
    if accepted.stop {
        mask |= ServiceControlAccept::STOP;
    }
    if accepted.shutdown {
        mask |= ServiceControlAccept::SHUTDOWN;
    }
    if accepted.pause_continue {
        mask |= ServiceControlAccept::PAUSE_CONTINUE;
    }
    mask
}

pub fn register(
    name: &str,
    display_name: &str,
    description: Option<&str>,
    exe: PathBuf,
    args: Vec<OsString>,
) -> Result<()> {
    let scm = ServiceManager::local_computer(
        None::<&str>,
        ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
    )?;
    let info = ServiceInfo {
        name: OsString::from(name),
        display_name: OsString::from(display_name),
        service_type: ServiceType::OWN_PROCESS,
        start_type: ServiceStartType::OnDemand,
        error_control: ServiceErrorControl::Normal,
        executable_path: exe,
        launch_arguments: args,
        dependencies: vec![],
        account_name: None,
        account_password: None,
    };
    let service = scm.create_service(&info, ServiceAccess::CHANGE_CONFIG)?;
    if let Some(desc) = description {
        service.set_description(desc)?;
    }
    Ok(())
}

pub fn unregister(name: &str) -> Result<()> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(name, ServiceAccess::DELETE)?;
    service.delete()?;
    Ok(())
}

pub fn start(name: &str) -> Result<()> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(name, ServiceAccess::START)?;
    service.start(&[] as &[&std::ffi::OsStr])?;
    Ok(())
}

/// Sends a control to an installed service and waits for it to settle in the
/// expected state, polling every 300 ms for up to 10 s.
pub fn control(name: &str, command: Command, desired: State) -> Result<()> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(
        name,
        ServiceAccess::STOP | ServiceAccess::PAUSE_CONTINUE | ServiceAccess::QUERY_STATUS,
    )?;
    match command {
        Command::Stop => {
            service.stop()?;
        }
        Command::Pause => {
            service.pause()?;
        }
        Command::Continue => {
            service.resume()?;
        }
        other => bail!("control {other:?} cannot be sent from the command line"),
    }
    let target = service_state(desired);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = service.query_status()?;
        if status.current_state == target {
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!("timed out waiting for the service to reach {desired:?}");
        }
        thread::sleep(Duration::from_millis(300));
    }
}
