use super::*;

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::app::adb::runner::{CommandError, CommandOutput};
use crate::app::emulator::registry::tests::FakeProcess;
use crate::app::models::{AvdEvent, AvdState};

/// Blocking reader fed by the test; EOF once every sender is gone.
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let count = buf.len().min(self.pending.len() - self.pos);
        buf[..count].copy_from_slice(&self.pending[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

#[derive(Default)]
struct FakeExecutor {
    spawn_failures: Mutex<VecDeque<Option<String>>>,
    spawned: Mutex<Vec<HostCommand>>,
    streams: Mutex<Vec<Sender<Vec<u8>>>>,
    lock_probe: Option<PathBuf>,
    lock_seen: Mutex<Vec<bool>>,
    responses: Mutex<HashMap<Vec<String>, Result<String, i32>>>,
    runs: Mutex<Vec<Vec<String>>>,
}

impl FakeExecutor {
    fn with_lock_probe(path: PathBuf) -> Self {
        Self {
            lock_probe: Some(path),
            ..Self::default()
        }
    }

    /// Queues the outcome of the next spawn; `Some(message)` fails it.
    fn queue_spawn(&self, failure: Option<&str>) {
        self.spawn_failures
            .lock()
            .expect("spawn queue")
            .push_back(failure.map(str::to_string));
    }

    fn respond(&self, args: &[&str], stdout: &str) {
        self.responses.lock().expect("responses").insert(
            args.iter().map(|arg| arg.to_string()).collect(),
            Ok(stdout.to_string()),
        );
    }

    fn fail(&self, args: &[&str], exit_code: i32) {
        self.responses.lock().expect("responses").insert(
            args.iter().map(|arg| arg.to_string()).collect(),
            Err(exit_code),
        );
    }

    fn spawned(&self) -> Vec<HostCommand> {
        self.spawned.lock().expect("spawned").clone()
    }

    fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().expect("runs").clone()
    }

    fn write_line(&self, index: usize, line: &str) {
        let streams = self.streams.lock().expect("streams");
        streams[index]
            .send(format!("{line}\n").into_bytes())
            .expect("monitor still reading");
    }

    fn close_stream(&self, index: usize) {
        let (closed, _) = mpsc::channel();
        self.streams.lock().expect("streams")[index] = closed;
    }
}

impl CommandExecutor for FakeExecutor {
    fn spawn(&self, command: &HostCommand) -> Result<SpawnedProcess, CommandError> {
        self.spawned.lock().expect("spawned").push(command.clone());
        if let Some(probe) = &self.lock_probe {
            self.lock_seen.lock().expect("lock seen").push(probe.exists());
        }
        let failure = self
            .spawn_failures
            .lock()
            .expect("spawn queue")
            .pop_front()
            .flatten();
        if let Some(message) = failure {
            return Err(CommandError::Launch {
                program: command.program().display().to_string(),
                source: io::Error::new(io::ErrorKind::Other, message),
            });
        }

        let (tx, rx) = mpsc::channel();
        self.streams.lock().expect("streams").push(tx);
        Ok(SpawnedProcess {
            handle: Box::new(FakeProcess::default()),
            stdout: Box::new(ChannelReader {
                rx,
                pending: Vec::new(),
                pos: 0,
            }),
            stderr: Box::new(Cursor::new(Vec::new())),
        })
    }

    fn run(&self, command: &HostCommand) -> Result<CommandOutput, CommandError> {
        let args = command.get_args().to_vec();
        self.runs.lock().expect("runs").push(args.clone());
        match self.responses.lock().expect("responses").get(&args) {
            Some(Ok(stdout)) => Ok(CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Some(Err(code)) => Err(CommandError::Exit {
                argv: command.display(),
                exit_code: Some(*code),
                output: "error: device offline".to_string(),
            }),
            None => Err(CommandError::Exit {
                argv: command.display(),
                exit_code: Some(1),
                output: "unexpected command".to_string(),
            }),
        }
    }
}

fn tool_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    executor: Arc<FakeExecutor>,
    events: Arc<Mutex<Vec<AvdEvent>>>,
    controller: LifecycleController,
}

impl Fixture {
    fn new() -> Self {
        Self::build(true, |_| FakeExecutor::default())
    }

    fn build(with_emulator: bool, executor: impl FnOnce(&Path) -> FakeExecutor) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let sdk = dir.path().join("sdk");
        if with_emulator {
            fs::create_dir_all(sdk.join("emulator")).expect("emulator dir");
            fs::write(sdk.join("emulator").join(tool_name("emulator")), b"").expect("emulator");
        }
        fs::create_dir_all(sdk.join("platform-tools")).expect("platform-tools dir");
        fs::write(sdk.join("platform-tools").join(tool_name("adb")), b"").expect("adb");

        let executor = Arc::new(executor(dir.path()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let settings = ControllerSettings {
            sdk_path: sdk.display().to_string(),
            avd_home: dir.path().join("avd").display().to_string(),
            ..ControllerSettings::default()
        };
        let controller = LifecycleController::new(
            settings,
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            Arc::new(move |event: AvdEvent| sink.lock().expect("events").push(event)),
        );
        Self {
            dir,
            executor,
            events,
            controller,
        }
    }

    fn sdk(&self) -> PathBuf {
        self.dir.path().join("sdk")
    }

    fn events(&self) -> Vec<AvdEvent> {
        self.events.lock().expect("events").clone()
    }

    fn script_running(&self, serial: &str, avd_name: &str) {
        self.executor.respond(
            &["devices"],
            &format!("List of devices attached\n{serial}\tdevice\n\n"),
        );
        self.executor
            .respond(&["-s", serial, "emu", "avd", "name"], &format!("{avd_name}\r\nOK\r\n"));
    }
}

fn lock_path(avd_home_parent: &Path) -> PathBuf {
    avd_home_parent
        .join("avd")
        .join("Pixel_6.avd")
        .join("multiinstance.lock")
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn start_registers_instance_and_launches_from_emulator_dir() {
    let fx = Fixture::new();
    let outcome = fx.controller.start(" Pixel_6 ", true).expect("start");

    assert_eq!(outcome.name, "Pixel_6");
    assert!(outcome.cold_boot);
    assert!(!outcome.recovered_lock);
    assert_eq!(outcome.pid, Some(4242));

    let status = fx.controller.registry().get("Pixel_6").expect("registered");
    assert_eq!(status.instance_id, outcome.instance_id);
    assert_eq!(status.state, AvdState::Booting);

    let spawned = fx.executor.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].get_args(), ["-avd", "Pixel_6", "-no-snapshot-load"]);
    assert_eq!(
        spawned[0].program(),
        fx.sdk().join("emulator").join(tool_name("emulator"))
    );
    assert_eq!(
        spawned[0].get_current_dir(),
        Some(fx.sdk().join("emulator").as_path())
    );
}

#[test]
fn warm_start_omits_cold_boot_flag_and_keeps_other_instances() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("first start");
    fx.controller.start("Pixel_5", false).expect("second start");

    assert_eq!(fx.executor.spawned()[1].get_args(), ["-avd", "Pixel_5"]);
    let names: Vec<String> = fx
        .controller
        .started_avds()
        .into_iter()
        .map(|status| status.name)
        .collect();
    assert_eq!(names, vec!["Pixel_5", "Pixel_6"]);
}

#[test]
fn missing_emulator_binary_is_reported_before_spawning() {
    let fx = Fixture::build(false, |_| FakeExecutor::default());
    let err = fx.controller.start("Pixel_6", false).unwrap_err();
    assert!(
        matches!(err, AvdError::PathNotFound { tool: "emulator", .. }),
        "got {err:?}"
    );
    assert!(fx.executor.spawned().is_empty());
}

#[test]
fn blank_name_is_rejected() {
    let fx = Fixture::new();
    let err = fx.controller.start("   ", false).unwrap_err();
    assert!(matches!(err, AvdError::InvalidName(_)), "got {err:?}");
    assert!(fx.executor.spawned().is_empty());
    assert!(fx.controller.registry().is_empty());
}

#[test]
fn lock_conflict_clears_locks_and_retries_once() {
    let fx = Fixture::build(true, |dir| FakeExecutor::with_lock_probe(lock_path(dir)));
    let lock = lock_path(fx.dir.path());
    fs::create_dir_all(lock.parent().expect("avd dir")).expect("mkdir");
    fs::write(&lock, b"").expect("lock");
    fs::write(lock.with_file_name("config.ini"), b"hw.ramSize=2048").expect("config");

    fx.executor.queue_spawn(Some("AVD already running"));
    fx.executor.queue_spawn(None);

    let outcome = fx.controller.start("Pixel_6", false).expect("start after retry");
    assert!(outcome.recovered_lock);
    assert_eq!(fx.executor.spawned().len(), 2);
    assert_eq!(*fx.executor.lock_seen.lock().expect("lock seen"), vec![true, false]);
    assert!(lock.with_file_name("config.ini").exists());
    assert_eq!(fx.controller.registry().len(), 1);
}

#[test]
fn failed_retry_is_a_lock_conflict() {
    let fx = Fixture::new();
    fx.executor.queue_spawn(Some("emulator: AVD is locked"));
    fx.executor.queue_spawn(Some("emulator: AVD is locked"));

    let err = fx.controller.start("Pixel_6", false).unwrap_err();
    assert!(matches!(err, AvdError::LockConflict { ref name, .. } if name == "Pixel_6"), "got {err:?}");
    assert_eq!(err.code(), "ERR_LOCK_CONFLICT");
    assert_eq!(fx.executor.spawned().len(), 2);
    assert!(fx.controller.registry().is_empty());
}

#[test]
fn other_launch_failures_do_not_retry() {
    let fx = Fixture::build(true, |dir| FakeExecutor::with_lock_probe(lock_path(dir)));
    let lock = lock_path(fx.dir.path());
    fs::create_dir_all(lock.parent().expect("avd dir")).expect("mkdir");
    fs::write(&lock, b"").expect("lock");
    fx.executor.queue_spawn(Some("permission denied"));

    let err = fx.controller.start("Pixel_6", false).unwrap_err();
    assert!(matches!(err, AvdError::Launch(_)), "got {err:?}");
    assert_eq!(fx.executor.spawned().len(), 1);
    assert!(lock.exists());
}

#[test]
fn stopping_an_unknown_avd_never_calls_adb() {
    let fx = Fixture::new();
    let err = fx.controller.stop("Pixel_6").unwrap_err();
    assert!(matches!(err, AvdError::NotRunning(ref name) if name == "Pixel_6"), "got {err:?}");
    assert!(fx.executor.runs().is_empty());
}

#[test]
fn stop_kills_resolved_emulator_and_forgets_it() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("start");
    fx.script_running("emulator-5556", "Pixel_6");
    fx.executor.respond(&["-s", "emulator-5556", "emu", "kill"], "OK\n");

    fx.controller.stop("Pixel_6").expect("stop");
    assert!(!fx.controller.registry().contains("Pixel_6"));

    let err = fx.controller.stop("Pixel_6").unwrap_err();
    assert!(matches!(err, AvdError::NotRunning(_)), "got {err:?}");

    let kills = fx
        .executor
        .runs()
        .into_iter()
        .filter(|args| args.last().map(String::as_str) == Some("kill"))
        .count();
    assert_eq!(kills, 1);
}

#[test]
fn failed_kill_keeps_the_entry() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("start");
    fx.script_running("emulator-5554", "Pixel_6");
    fx.executor.fail(&["-s", "emulator-5554", "emu", "kill"], 1);

    let err = fx.controller.stop("Pixel_6").unwrap_err();
    assert!(matches!(err, AvdError::CommandFailed { .. }), "got {err:?}");
    assert!(fx.controller.registry().contains("Pixel_6"));
}

#[test]
fn unresolvable_port_is_a_port_resolution_error() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("start");
    fx.script_running("emulator-5554", "Other_AVD");

    let err = fx.controller.stop("Pixel_6").unwrap_err();
    match &err {
        AvdError::PortResolution { name, source } => {
            assert_eq!(name, "Pixel_6");
            assert!(matches!(**source, AvdError::AvdNotFound(_)), "got {source:?}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fx.controller.registry().contains("Pixel_6"));
}

#[test]
fn boot_and_shutdown_markers_drive_events_and_registry() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("start");

    fx.executor.write_line(0, "INFO    | Boot completed in 4215 ms");
    wait_until("boot event", || {
        fx.events().contains(&AvdEvent::Booted("Pixel_6".to_string()))
    });
    assert_eq!(
        fx.controller.registry().get("Pixel_6").expect("entry").state,
        AvdState::Running
    );

    fx.executor.write_line(0, "INFO    | killing emulator, bye bye");
    wait_until("shutdown event", || {
        fx.events().contains(&AvdEvent::Shutdown("Pixel_6".to_string()))
    });
    assert!(!fx.controller.registry().contains("Pixel_6"));

    let logs = fx
        .events()
        .iter()
        .filter(|event| matches!(event, AvdEvent::Log(_)))
        .count();
    assert_eq!(logs, 2);
}

#[test]
fn crashed_emulator_is_removed_when_output_closes() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("start");
    fx.executor.close_stream(0);

    wait_until("registry cleanup", || fx.controller.registry().is_empty());
    wait_until("shutdown event", || {
        fx.events().contains(&AvdEvent::Shutdown("Pixel_6".to_string()))
    });
}

#[test]
fn restarted_instance_survives_old_monitor_exit() {
    let fx = Fixture::new();
    let first = fx.controller.start("Pixel_6", false).expect("first start");
    let second = fx.controller.start("Pixel_6", false).expect("second start");
    assert_ne!(first.instance_id, second.instance_id);

    fx.executor.close_stream(0);
    std::thread::sleep(Duration::from_millis(100));
    let status = fx.controller.registry().get("Pixel_6").expect("newer entry");
    assert_eq!(status.instance_id, second.instance_id);
}

#[test]
fn old_instance_shutdown_marker_does_not_report_newer_instance_down() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("first start");
    let second = fx.controller.start("Pixel_6", false).expect("second start");

    fx.executor.write_line(0, "INFO    | killing emulator, bye bye");
    wait_until("old instance line logged", || {
        fx.events()
            .iter()
            .any(|event| matches!(event, AvdEvent::Log(line) if line.contains("bye bye")))
    });
    std::thread::sleep(Duration::from_millis(100));

    assert!(!fx
        .events()
        .iter()
        .any(|event| matches!(event, AvdEvent::Shutdown(_))));
    let status = fx.controller.registry().get("Pixel_6").expect("newer entry");
    assert_eq!(status.instance_id, second.instance_id);
}

#[test]
fn exit_after_stop_reports_shutdown_once() {
    let fx = Fixture::new();
    fx.controller.start("Pixel_6", false).expect("start");
    fx.script_running("emulator-5554", "Pixel_6");
    fx.executor.respond(&["-s", "emulator-5554", "emu", "kill"], "OK\n");
    fx.controller.stop("Pixel_6").expect("stop");

    fx.executor.close_stream(0);
    wait_until("shutdown event", || {
        fx.events().contains(&AvdEvent::Shutdown("Pixel_6".to_string()))
    });
    std::thread::sleep(Duration::from_millis(50));
    let shutdowns = fx
        .events()
        .iter()
        .filter(|event| matches!(event, AvdEvent::Shutdown(_)))
        .count();
    assert_eq!(shutdowns, 1);
}

#[test]
fn list_avds_parses_emulator_output() {
    let fx = Fixture::new();
    fx.executor.respond(
        &["-list-avds"],
        "INFO    | Storing crashdata in: /tmp/android/emu-crash.db\nPixel_6\nPixel_5_API_30\n",
    );
    assert_eq!(
        fx.controller.list_avds().expect("avds"),
        vec!["Pixel_6", "Pixel_5_API_30"]
    );
}

#[test]
fn empty_avd_list_is_an_error() {
    let fx = Fixture::new();
    fx.executor.respond(&["-list-avds"], "\n");
    let err = fx.controller.list_avds().unwrap_err();
    assert!(matches!(err, AvdError::NoAvds), "got {err:?}");
}

#[test]
fn list_running_avds_includes_emulators_started_elsewhere() {
    let fx = Fixture::new();
    fx.script_running("emulator-5554", "Pixel_6");
    assert_eq!(fx.controller.list_running_avds().expect("running"), vec!["Pixel_6"]);
    assert!(fx.controller.started_avds().is_empty());
}

#[test]
fn sdk_env_and_reconfigure_follow_settings() {
    let fx = Fixture::new();
    let env = fx.controller.sdk_env();
    assert_eq!(env.get("ANDROID_HOME"), Some(&fx.sdk().display().to_string()));

    fx.controller.reconfigure(ControllerSettings {
        sdk_path: fx.dir.path().join("missing").display().to_string(),
        ..ControllerSettings::default()
    });
    let err = fx.controller.start("Pixel_6", false).unwrap_err();
    assert!(matches!(err, AvdError::PathNotFound { .. }), "got {err:?}");
}
