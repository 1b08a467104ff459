use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::emulator::classifier::{LineClass, MarkerTable};
use crate::app::emulator::registry::{DeviceRegistry, Release};
use crate::app::models::{AvdEmitter, AvdEvent, AvdState};

pub const CONFLICT_NOTICE: &str =
    "Detected multiple emulator conflict. Lock file issue suspected.";

/// Why a monitor stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ShutdownMarker,
    /// Output closed before any shutdown marker, usually a crash or a kill.
    StreamClosed,
}

pub struct MonitorSession {
    pub avd_name: String,
    pub instance_id: Uuid,
    pub registry: Arc<DeviceRegistry>,
    pub markers: Arc<MarkerTable>,
    pub emitter: AvdEmitter,
}

impl MonitorSession {
    fn emit(&self, event: AvdEvent) {
        (self.emitter)(event);
    }

    /// Drops this session's registry entry. Returns false when a newer
    /// instance owns the name, in which case the session must stay silent.
    fn release_instance(&self) -> bool {
        match self.registry.release(&self.avd_name, self.instance_id) {
            Release::Removed(instance) => {
                instance.reap();
                true
            }
            Release::Absent => true,
            Release::Superseded => false,
        }
    }
}

/// Starts the per-instance log monitor.
///
/// stdout and stderr are read on their own threads and merged into one
/// channel, so lines from each stream keep their relative order. The monitor
/// thread classifies every line and, when it finishes, has already removed
/// its instance from the registry unless a newer instance replaced it.
pub fn spawn_log_monitor(
    session: MonitorSession,
    stdout: Box<dyn Read + Send>,
    stderr: Box<dyn Read + Send>,
) -> io::Result<JoinHandle<SessionEnd>> {
    let (tx, rx) = mpsc::channel::<String>();
    let name = session.avd_name.clone();

    let tx_stderr = tx.clone();
    thread::Builder::new()
        .name(format!("avd-stdout-{name}"))
        .spawn(move || forward_lines(stdout, tx))?;
    thread::Builder::new()
        .name(format!("avd-stderr-{name}"))
        .spawn(move || forward_lines(stderr, tx_stderr))?;

    thread::Builder::new()
        .name(format!("avd-monitor-{name}"))
        .spawn(move || run_monitor(&session, rx))
}

/// Keeps draining after the monitor hangs up so the emulator never blocks on
/// a full pipe.
fn forward_lines(reader: Box<dyn Read + Send>, tx: Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut forwarding = true;
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                if forwarding {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    forwarding = tx.send(line).is_ok();
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "emulator output stream failed");
                break;
            }
        }
    }
}

fn run_monitor(session: &MonitorSession, lines: Receiver<String>) -> SessionEnd {
    let name = session.avd_name.as_str();
    let mut booted = false;

    for line in lines {
        session.emit(AvdEvent::log(&line));

        match session.markers.classify(&line) {
            LineClass::Plain => {}
            LineClass::BootCompleted => {
                if !booted {
                    booted = true;
                    info!(avd = %name, "emulator boot completed");
                    session
                        .registry
                        .set_state(name, session.instance_id, AvdState::Running);
                    session.emit(AvdEvent::Booted(name.to_string()));
                }
            }
            LineClass::ShutdownDetected => {
                info!(avd = %name, "emulator shutdown detected");
                if session.release_instance() {
                    session.emit(AvdEvent::Shutdown(name.to_string()));
                } else {
                    debug!(avd = %name, "newer instance owns the name; shutdown not reported");
                }
                return SessionEnd::ShutdownMarker;
            }
            LineClass::LockConflictDetected => {
                warn!(avd = %name, "emulator reported a multi-instance conflict");
                session.emit(AvdEvent::log(CONFLICT_NOTICE));
            }
        }
    }

    if session.release_instance() {
        warn!(avd = %name, "emulator output closed without a shutdown marker");
        session.emit(AvdEvent::log(&format!(
            "Emulator '{name}' exited without a shutdown message."
        )));
        session.emit(AvdEvent::Shutdown(name.to_string()));
    }
    SessionEnd::StreamClosed
}
