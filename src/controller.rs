use std::ffi::OsString;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::gensvc::{
    AcceptedCommands, Command, ControlReceiver, Logger, State, StatusSender, StatusUpdate,
};
use crate::heartbeat::Heartbeat;

/// Wait between the two replies to an interrogate request. The control
/// manager can deadlock unless the first reply is confirmed by a second,
/// delayed one; see https://code.google.com/p/winsvc/issues/detail?id=4.
const INTERROGATE_REPLY_DELAY: Duration = Duration::from_millis(100);

/// The service control state machine. Owns the reported state, answers the
/// host's control requests, and launches the wrapped callback exactly once.
pub struct ServiceController {
    runner: Option<Box<dyn FnOnce() + Send>>,
}

impl ServiceController {
    pub fn new(runner: impl FnOnce() + Send + 'static) -> Self {
        ServiceController {
            runner: Some(Box::new(runner)),
        }
    }

    /// Drives the service until the host asks it to stop.
    ///
    /// Status updates are pushed in transition order: StartPending, Running,
    /// then Paused/Running as the host toggles them, and finally StopPending
    /// when a stop or shutdown request breaks the loop. The callback is
    /// spawned on a detached thread right after the Running update goes out;
    /// the controller never observes its completion. A disconnected channel
    /// ends the call with an error; blocked sends are left to block, since
    /// the host is expected to keep draining status.
    pub fn run(
        &mut self,
        args: &[OsString],
        control: &ControlReceiver,
        status: &StatusSender,
        log: &dyn Logger,
    ) -> Result<()> {
        push(status, StatusUpdate::new(State::StartPending, AcceptedCommands::none()))?;
        let joined = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("-");
        log.info(1, &joined);

        let heartbeat = Heartbeat::new();
        let mut tick = heartbeat.fast();
        let mut state = State::Running;
        push(status, StatusUpdate::new(State::Running, AcceptedCommands::all()))?;
        log.info(1, "service started");
        if let Some(runner) = self.runner.take() {
            thread::spawn(runner);
        }

        loop {
            crossbeam_channel::select! {
                recv(tick) -> _ => {},
                recv(control) -> request => {
                    let request = request.context("control channel disconnected")?;
                    match request.command {
                        Command::Interrogate => {
                            push(status, request.current_status)?;
                            thread::sleep(INTERROGATE_REPLY_DELAY);
                            push(status, request.current_status)?;
                        }
                        Command::Stop | Command::Shutdown => break,
                        Command::Pause if state == State::Running => {
                            state = State::Paused;
                            push(status, StatusUpdate::new(State::Paused, AcceptedCommands::all()))?;
                            tick = heartbeat.slow();
                        }
                        Command::Continue if state == State::Paused => {
                            state = State::Running;
                            push(status, StatusUpdate::new(State::Running, AcceptedCommands::all()))?;
                            tick = heartbeat.fast();
                        }
                        Command::Other(code) => {
                            log.error(1, &format!("unexpected control request #{code}"));
                        }
                        command => {
                            log.error(1, &format!("ignoring control request {command:?} in state {state:?}"));
                        }
                    }
                }
            }
        }

        push(status, StatusUpdate::new(State::StopPending, AcceptedCommands::none()))?;
        Ok(())
    }
}

fn push(status: &StatusSender, update: StatusUpdate) -> Result<()> {
    status.send(update).context("status channel disconnected")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::gensvc::{ControlRequest, ControlSender, StatusReceiver};

    #[derive(Default)]
    struct RecordingLog {
        infos: Mutex<Vec<(u32, String)>>,
        errors: Mutex<Vec<(u32, String)>>,
    }

    impl Logger for RecordingLog {
        fn info(&self, event_id: u32, message: &str) {
            self.infos.lock().unwrap().push((event_id, message.to_string()));
        }

        fn error(&self, event_id: u32, message: &str) {
            self.errors.lock().unwrap().push((event_id, message.to_string()));
        }
    }

    struct Harness {
        control: ControlSender,
        status: StatusReceiver,
        log: Arc<RecordingLog>,
        launches: Arc<AtomicUsize>,
        thread: thread::JoinHandle<Result<()>>,
    }

    fn start_service() -> Harness {
        let (control_tx, control_rx) = unbounded();
        let (status_tx, status_rx) = unbounded();
        let log = Arc::new(RecordingLog::default());
        let launches = Arc::new(AtomicUsize::new(0));
        let thread_log = log.clone();
        let thread_launches = launches.clone();
        let thread = thread::spawn(move || {
            let mut controller = ServiceController::new(move || {
                thread_launches.fetch_add(1, Ordering::SeqCst);
            });
            controller.run(
                &[OsString::from("beacon")],
                &control_rx,
                &status_tx,
                &*thread_log,
            )
        });
        Harness {
            control: control_tx,
            status: status_rx,
            log,
            launches,
            thread,
        }
    }

    fn request(command: Command) -> ControlRequest {
        ControlRequest {
            command,
            current_status: StatusUpdate::new(State::Running, AcceptedCommands::all()),
        }
    }

    impl Harness {
        fn send(&self, command: Command) {
            self.control.send(request(command)).unwrap();
        }

        fn next_status(&self) -> StatusUpdate {
            self.status.recv_timeout(Duration::from_secs(5)).unwrap()
        }

        /// Joins the controller and returns the not-yet-consumed status
        /// updates, the log, and the observed callback launch count.
        fn finish(self) -> (Vec<StatusUpdate>, Arc<RecordingLog>, usize) {
            self.thread.join().unwrap().unwrap();
            let launches = settled_launch_count(&self.launches);
            (self.status.iter().collect(), self.log, launches)
        }
    }

    fn settled_launch_count(launches: &AtomicUsize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let count = launches.load(Ordering::SeqCst);
            if count > 0 || Instant::now() > deadline {
                return count;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn states(updates: &[StatusUpdate]) -> Vec<State> {
        updates.iter().map(|u| u.state).collect()
    }

    #[test]
    fn immediate_stop_reports_minimal_sequence() {
        let svc = start_service();
        svc.send(Command::Stop);
        let (updates, _log, launches) = svc.finish();
        assert_eq!(
            states(&updates),
            vec![State::StartPending, State::Running, State::StopPending]
        );
        assert_eq!(updates[0].accepted, AcceptedCommands::none());
        assert_eq!(updates[1].accepted, AcceptedCommands::all());
        assert_eq!(updates[2].accepted, AcceptedCommands::none());
        assert_eq!(launches, 1);
    }

    #[test]
    fn shutdown_breaks_the_loop_like_stop() {
        let svc = start_service();
        svc.send(Command::Shutdown);
        let (updates, _log, _launches) = svc.finish();
        assert_eq!(
            states(&updates),
            vec![State::StartPending, State::Running, State::StopPending]
        );
    }

    #[test]
    fn pause_continue_round_trip_restores_accepted_set() {
        let svc = start_service();
        svc.send(Command::Pause);
        svc.send(Command::Continue);
        svc.send(Command::Stop);
        let (updates, _log, launches) = svc.finish();
        assert_eq!(
            states(&updates),
            vec![
                State::StartPending,
                State::Running,
                State::Paused,
                State::Running,
                State::StopPending
            ]
        );
        assert_eq!(updates[3].accepted, updates[1].accepted);
        assert_eq!(launches, 1);
    }

    #[test]
    fn continue_while_running_is_ignored() {
        let svc = start_service();
        svc.send(Command::Continue);
        svc.send(Command::Pause);
        svc.send(Command::Continue);
        svc.send(Command::Stop);
        let (updates, log, launches) = svc.finish();
        assert_eq!(
            states(&updates),
            vec![
                State::StartPending,
                State::Running,
                State::Paused,
                State::Running,
                State::StopPending
            ]
        );
        assert_eq!(launches, 1);
        let errors = log.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("Continue"));
    }

    #[test]
    fn interrogate_replies_twice_with_the_same_snapshot() {
        let svc = start_service();
        assert_eq!(svc.next_status().state, State::StartPending);
        assert_eq!(svc.next_status().state, State::Running);

        let snapshot = StatusUpdate::new(State::Running, AcceptedCommands::all());
        let sent_at = Instant::now();
        svc.control
            .send(ControlRequest {
                command: Command::Interrogate,
                current_status: snapshot,
            })
            .unwrap();
        let first = svc.next_status();
        let second = svc.next_status();
        let span = sent_at.elapsed();
        assert_eq!(first, snapshot);
        assert_eq!(second, snapshot);
        assert!(
            span >= INTERROGATE_REPLY_DELAY,
            "second reply arrived after only {span:?}"
        );
        assert!(
            span < INTERROGATE_REPLY_DELAY * 5,
            "second reply took {span:?}"
        );

        svc.send(Command::Stop);
        let (updates, _log, _launches) = svc.finish();
        assert_eq!(states(&updates), vec![State::StopPending]);
    }

    #[test]
    fn double_interrogate_yields_a_reply_pair_per_request() {
        let svc = start_service();
        assert_eq!(svc.next_status().state, State::StartPending);
        assert_eq!(svc.next_status().state, State::Running);

        let first_snapshot = StatusUpdate::new(State::Running, AcceptedCommands::all());
        let second_snapshot = StatusUpdate::new(State::Paused, AcceptedCommands::all());
        for snapshot in [first_snapshot, second_snapshot] {
            svc.control
                .send(ControlRequest {
                    command: Command::Interrogate,
                    current_status: snapshot,
                })
                .unwrap();
        }
        assert_eq!(svc.next_status(), first_snapshot);
        assert_eq!(svc.next_status(), first_snapshot);
        assert_eq!(svc.next_status(), second_snapshot);
        assert_eq!(svc.next_status(), second_snapshot);

        svc.send(Command::Stop);
        svc.finish();
    }

    #[test]
    fn unrecognized_control_leaves_state_alone() {
        let svc = start_service();
        svc.send(Command::Other(0x80));
        svc.send(Command::Pause);
        svc.send(Command::Stop);
        let (updates, log, _launches) = svc.finish();
        assert_eq!(
            states(&updates),
            vec![
                State::StartPending,
                State::Running,
                State::Paused,
                State::StopPending
            ]
        );
        let errors = log.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("#128"));
    }

    #[test]
    fn callback_launches_once_across_pause_cycles() {
        let svc = start_service();
        for _ in 0..3 {
            svc.send(Command::Pause);
            svc.send(Command::Continue);
        }
        svc.send(Command::Stop);
        let (_updates, _log, launches) = svc.finish();
        assert_eq!(launches, 1);
    }

    #[test]
    fn startup_logs_arguments_and_started_event() {
        let svc = start_service();
        svc.send(Command::Stop);
        let (_updates, log, _launches) = svc.finish();
        let infos = log.infos.lock().unwrap();
        assert_eq!(infos[0], (1, "beacon".to_string()));
        assert_eq!(infos[1], (1, "service started".to_string()));
    }

    #[test]
    fn closed_control_channel_ends_the_run_with_an_error() {
        let svc = start_service();
        assert_eq!(svc.next_status().state, State::StartPending);
        assert_eq!(svc.next_status().state, State::Running);
        drop(svc.control);
        let result = svc.thread.join().unwrap();
        assert!(result.is_err());
    }
}
