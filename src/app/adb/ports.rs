use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::app::adb::parse::{connected_emulators, parse_adb_devices, parse_avd_name};
use crate::app::adb::runner::{CommandExecutor, HostCommand};
use crate::app::error::AvdError;
use crate::app::models::RunningEmulator;

fn adb_command(adb: &Path, timeout: Duration) -> HostCommand {
    HostCommand::new(adb).timeout(timeout)
}

fn list_connected(
    executor: &dyn CommandExecutor,
    adb: &Path,
    timeout: Duration,
) -> Result<Vec<(String, u16)>, AvdError> {
    let output = executor
        .run(&adb_command(adb, timeout).arg("devices"))
        .map_err(|source| AvdError::CommandFailed {
            action: "adb devices".to_string(),
            source,
        })?;
    Ok(connected_emulators(&parse_adb_devices(&output.stdout)))
}

/// Asks one emulator for its AVD name. Failures are logged and yield `None`
/// so a single unresponsive device never aborts a scan.
fn query_avd_name(
    executor: &dyn CommandExecutor,
    adb: &Path,
    serial: &str,
    timeout: Duration,
) -> Option<String> {
    let command = adb_command(adb, timeout).args(["-s", serial, "emu", "avd", "name"]);
    match executor.run(&command) {
        Ok(output) => parse_avd_name(&output.stdout),
        Err(err) => {
            debug!(serial = %serial, error = %err, "skipping emulator: avd name query failed");
            None
        }
    }
}

/// Maps an AVD name to the console port of the emulator currently running it.
///
/// Devices are scanned in `adb devices` order and the first emulator reporting
/// `avd_name` wins. Two emulators running the same AVD cannot be told apart.
pub fn resolve_port(
    executor: &dyn CommandExecutor,
    adb: &Path,
    avd_name: &str,
    timeout: Duration,
) -> Result<u16, AvdError> {
    debug!(avd = %avd_name, "resolving emulator port");
    for (serial, port) in list_connected(executor, adb, timeout)? {
        if query_avd_name(executor, adb, &serial, timeout).as_deref() == Some(avd_name) {
            info!(avd = %avd_name, port, "resolved emulator port");
            return Ok(port);
        }
    }
    Err(AvdError::AvdNotFound(avd_name.to_string()))
}

/// Every connected emulator that answered its name query.
pub fn list_running_emulators(
    executor: &dyn CommandExecutor,
    adb: &Path,
    timeout: Duration,
) -> Result<Vec<RunningEmulator>, AvdError> {
    let running = list_connected(executor, adb, timeout)?
        .into_iter()
        .filter_map(|(serial, port)| {
            query_avd_name(executor, adb, &serial, timeout).map(|avd_name| RunningEmulator {
                serial,
                port,
                avd_name,
            })
        })
        .collect::<Vec<_>>();
    debug!(count = running.len(), "listed running emulators");
    Ok(running)
}
