use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config;
use crate::console;
use crate::controller::ServiceController;
#[cfg(windows)]
use crate::gensvc::{Command, State};
#[cfg(windows)]
use crate::winsvc;
#[cfg(windows)]
use std::ffi::OsString;
#[cfg(windows)]
use std::{fs, os::windows::io::AsRawHandle};
#[cfg(windows)]
use winapi::{
    shared::minwindef,
    um::{errhandlingapi, processenv, winbase},
};

#[derive(clap::Parser)]
#[clap(version, about)]
struct Cli {
    #[clap(long, global = true, help = "Path to an optional TOML config file")]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Verb,
}

#[derive(clap::Subcommand)]
enum Verb {
    #[clap(about = "Register the service with the service manager")]
    Install,
    #[clap(about = "Remove the service registration")]
    Remove,
    #[clap(about = "Run the service on the console for local debugging")]
    Debug,
    #[clap(about = "Start the installed service")]
    Start,
    #[clap(about = "Stop the installed service")]
    Stop,
    #[clap(about = "Pause the installed service")]
    Pause,
    #[clap(about = "Continue a paused service")]
    Continue,
    #[clap(about = "Run under the service manager", hide = true)]
    Run,
}

/// Entry point for an application embedding a service. Parses the process
/// arguments and dispatches: an invalid or missing verb prints usage and
/// exits with status 2 (clap's behavior), any other failure is logged
/// fatally and exits with status 1.
pub fn handle(name: &str, display_name: &str, runner: impl FnOnce() + Send + 'static) {
    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => config::load(path).unwrap_or_else(|err| {
            init_logging(None);
            fatal(name, err)
        }),
        None => config::Config::default(),
    };
    init_logging(config.logging.filter.as_deref());
    if let Err(err) = dispatch(
        cli.command,
        name,
        display_name,
        &config,
        cli.config.as_deref(),
        runner,
    ) {
        fatal(name, err);
    }
}

fn fatal(name: &str, err: anyhow::Error) -> ! {
    error!("{name} service: {err:#}");
    std::process::exit(1);
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg_attr(not(windows), allow(unused_variables))]
fn dispatch(
    verb: Verb,
    name: &str,
    display_name: &str,
    config: &config::Config,
    config_path: Option<&Path>,
    runner: impl FnOnce() + Send + 'static,
) -> Result<()> {
    match verb {
        Verb::Debug => console::run(name, ServiceController::new(runner)),
        #[cfg(windows)]
        Verb::Install => install(name, display_name, config, config_path),
        #[cfg(windows)]
        Verb::Remove => winsvc::unregister(name),
        #[cfg(windows)]
        Verb::Start => winsvc::start(name),
        #[cfg(windows)]
        Verb::Stop => winsvc::control(name, Command::Stop, State::Stopped),
        #[cfg(windows)]
        Verb::Pause => winsvc::control(name, Command::Pause, State::Paused),
        #[cfg(windows)]
        Verb::Continue => winsvc::control(name, Command::Continue, State::Running),
        #[cfg(windows)]
        Verb::Run => run_service(name, config, runner),
        #[cfg(not(windows))]
        _ => anyhow::bail!(
            "this command needs the windows service manager; only `debug` is available here"
        ),
    }
}

#[cfg(windows)]
fn install(
    name: &str,
    display_name: &str,
    config: &config::Config,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut launch_args = vec![OsString::from("run")];
    if let Some(path) = config_path {
        launch_args.push(OsString::from("--config"));
        launch_args.push(path.canonicalize()?.into_os_string());
    }
    let display = config
        .registration
        .display_name
        .as_deref()
        .unwrap_or(display_name);
    winsvc::register(
        name,
        display,
        config.registration.description.as_deref(),
        std::env::current_exe()?,
        launch_args,
    )
}

#[cfg(windows)]
fn run_service(name: &str, config: &config::Config, runner: impl FnOnce() + Send + 'static) -> Result<()> {
    if let Some(path) = &config.logging.log_path {
        let f = fs::File::create(path)?;
        set_stdio(&f)
            .map_err(|code| anyhow::anyhow!("failed to redirect stdio: win32 error {code}"))?;
    }
    winsvc::run(name, ServiceController::new(runner))
}

#[cfg(windows)]
fn set_stdio(f: &std::fs::File) -> Result<(), minwindef::DWORD> {
    let h = f.as_raw_handle();
    unsafe {
        if processenv::SetStdHandle(winbase::STD_OUTPUT_HANDLE, h) == 0 {
            return Err(errhandlingapi::GetLastError());
        }
        if processenv::SetStdHandle(winbase::STD_ERROR_HANDLE, h) == 0 {
            return Err(errhandlingapi::GetLastError());
        }
    }
    Ok(())
}
