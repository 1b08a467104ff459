use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::adb::locator::{resolve_avd_home, resolve_sdk_root, SdkPaths};
use crate::app::adb::parse::parse_list_avds;
use crate::app::adb::ports::{list_running_emulators, resolve_port};
use crate::app::adb::runner::{CommandExecutor, HostCommand, SpawnedProcess, SystemExecutor};
use crate::app::config::AppConfig;
use crate::app::emulator::classifier::MarkerTable;
use crate::app::emulator::locks::{avd_data_dir, clear_lock_files};
use crate::app::emulator::monitor::{spawn_log_monitor, MonitorSession};
use crate::app::emulator::registry::{AvdInstance, DeviceRegistry};
use crate::app::error::AvdError;
use crate::app::models::{AvdEmitter, AvdStatus, StartOutcome};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub sdk_path: String,
    pub avd_home: String,
    pub command_timeout: Duration,
    pub markers: Arc<MarkerTable>,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sdk_path: config.sdk.sdk_path.clone(),
            avd_home: config.sdk.avd_home.clone(),
            command_timeout: config.command_timeout(),
            markers: Arc::new(MarkerTable::new(config.markers.clone())),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Starts, supervises and stops emulator processes.
///
/// Public operations run on the caller's thread and may block on external
/// commands. Each started instance gets its own log monitor thread; the
/// registry is the only state shared with those threads.
pub struct LifecycleController {
    registry: Arc<DeviceRegistry>,
    executor: Arc<dyn CommandExecutor>,
    emitter: AvdEmitter,
    settings: RwLock<ControllerSettings>,
}

impl LifecycleController {
    pub fn new(
        settings: ControllerSettings,
        executor: Arc<dyn CommandExecutor>,
        emitter: AvdEmitter,
    ) -> Self {
        Self {
            registry: Arc::new(DeviceRegistry::new()),
            executor,
            emitter,
            settings: RwLock::new(settings),
        }
    }

    pub fn with_system_executor(settings: ControllerSettings, emitter: AvdEmitter) -> Self {
        Self::new(settings, Arc::new(SystemExecutor), emitter)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Applies new settings to subsequent operations. Running monitors keep
    /// the marker table they started with.
    pub fn reconfigure(&self, settings: ControllerSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    fn settings(&self) -> ControllerSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn emulator_path(settings: &ControllerSettings) -> Result<PathBuf, AvdError> {
        SdkPaths::resolve(&settings.sdk_path)?.emulator()
    }

    fn adb_path(settings: &ControllerSettings) -> Result<PathBuf, AvdError> {
        SdkPaths::resolve(&settings.sdk_path)?.adb()
    }

    /// Launches `avd_name` and returns as soon as the process is running.
    /// Boot completion arrives later as an `avd-booted` event.
    pub fn start(&self, avd_name: &str, cold_boot: bool) -> Result<StartOutcome, AvdError> {
        let settings = self.settings();
        let emulator = Self::emulator_path(&settings)?;

        let name = avd_name.trim();
        if name.is_empty() {
            return Err(AvdError::InvalidName(avd_name.to_string()));
        }

        let mut command = HostCommand::new(&emulator).args(["-avd", name]);
        if cold_boot {
            command = command.arg("-no-snapshot-load");
        }
        if let Some(dir) = emulator.parent() {
            command = command.current_dir(dir);
        }
        info!(avd = %name, cold_boot, command = %command.display(), "starting emulator");

        let (process, recovered_lock) = self.launch_with_lock_recovery(&settings, name, &command)?;
        let SpawnedProcess {
            handle,
            stdout,
            stderr,
        } = process;

        let instance = AvdInstance::new(name, cold_boot, handle);
        let instance_id = instance.instance_id;
        let pid = instance.pid();
        if let Some(stale) = self.registry.put(instance) {
            warn!(avd = %name, stale_instance = %stale.instance_id, "replacing stale registry entry");
            stale.reap();
        }

        let session = MonitorSession {
            avd_name: name.to_string(),
            instance_id,
            registry: Arc::clone(&self.registry),
            markers: Arc::clone(&settings.markers),
            emitter: Arc::clone(&self.emitter),
        };
        if let Err(source) = spawn_log_monitor(session, stdout, stderr) {
            if let Some(mut instance) = self.registry.remove_instance(name, instance_id) {
                let _ = instance.kill();
                instance.reap();
            }
            return Err(AvdError::Io {
                context: "failed to start emulator log monitor".to_string(),
                source,
            });
        }

        info!(avd = %name, pid = ?pid, %instance_id, recovered_lock, "emulator started");
        Ok(StartOutcome {
            name: name.to_string(),
            instance_id,
            pid,
            cold_boot,
            recovered_lock,
        })
    }

    /// Spawns the emulator; on a lock conflict clears the AVD's lock files and
    /// retries exactly once.
    fn launch_with_lock_recovery(
        &self,
        settings: &ControllerSettings,
        name: &str,
        command: &HostCommand,
    ) -> Result<(SpawnedProcess, bool), AvdError> {
        match self.executor.spawn(command) {
            Ok(process) => Ok((process, false)),
            Err(err) if err.is_lock_conflict() => {
                warn!(avd = %name, error = %err, "AVD is locked; clearing lock files and retrying");
                self.clear_locks(settings, name);
                self.executor
                    .spawn(command)
                    .map(|process| (process, true))
                    .map_err(|source| AvdError::LockConflict {
                        name: name.to_string(),
                        source,
                    })
            }
            Err(err) => Err(AvdError::Launch(err)),
        }
    }

    fn clear_locks(&self, settings: &ControllerSettings, name: &str) {
        let Some(avd_home) = resolve_avd_home(&settings.avd_home) else {
            warn!(avd = %name, "AVD home directory unknown; no lock files cleared");
            return;
        };
        let dir = avd_data_dir(&avd_home, name);
        match clear_lock_files(&dir) {
            Ok(removed) => info!(avd = %name, dir = %dir.display(), removed = removed.len(), "cleared AVD lock files"),
            Err(err) => warn!(avd = %name, dir = %dir.display(), error = %err, "failed to scan AVD lock files"),
        }
    }

    /// Kills a running AVD through its emulator console.
    pub fn stop(&self, avd_name: &str) -> Result<(), AvdError> {
        let name = avd_name.trim();
        let Some(status) = self.registry.get(name) else {
            return Err(AvdError::NotRunning(name.to_string()));
        };

        let settings = self.settings();
        let adb = Self::adb_path(&settings)?;
        let port = resolve_port(self.executor.as_ref(), &adb, name, settings.command_timeout)
            .map_err(|source| AvdError::PortResolution {
                name: name.to_string(),
                source: Box::new(source),
            })?;

        let serial = format!("emulator-{port}");
        let command = HostCommand::new(&adb)
            .args(["-s", serial.as_str(), "emu", "kill"])
            .timeout(settings.command_timeout);
        info!(avd = %name, serial = %serial, command = %command.display(), "stopping emulator");

        let output = self
            .executor
            .run(&command)
            .map_err(|source| AvdError::CommandFailed {
                action: format!("stopping AVD '{name}'"),
                source,
            })?;
        debug!(avd = %name, output = %output.combined(), "emulator kill acknowledged");

        if let Some(instance) = self.registry.remove_instance(name, status.instance_id) {
            instance.reap();
        }
        info!(avd = %name, "stopped emulator");
        Ok(())
    }

    /// AVDs installed in the SDK, as reported by `emulator -list-avds`.
    pub fn list_avds(&self) -> Result<Vec<String>, AvdError> {
        let settings = self.settings();
        let emulator = Self::emulator_path(&settings)?;
        let mut command = HostCommand::new(&emulator)
            .arg("-list-avds")
            .timeout(settings.command_timeout);
        if let Some(dir) = emulator.parent() {
            command = command.current_dir(dir);
        }
        let output = self
            .executor
            .run(&command)
            .map_err(|source| AvdError::CommandFailed {
                action: "emulator -list-avds".to_string(),
                source,
            })?;
        let avds = parse_list_avds(&output.stdout);
        if avds.is_empty() {
            return Err(AvdError::NoAvds);
        }
        Ok(avds)
    }

    /// Names of every emulator adb can see, including ones started elsewhere.
    pub fn list_running_avds(&self) -> Result<Vec<String>, AvdError> {
        let settings = self.settings();
        let adb = Self::adb_path(&settings)?;
        let running = list_running_emulators(self.executor.as_ref(), &adb, settings.command_timeout)?;
        Ok(running.into_iter().map(|emulator| emulator.avd_name).collect())
    }

    /// Instances started by this controller.
    pub fn started_avds(&self) -> Vec<AvdStatus> {
        self.registry.statuses()
    }

    pub fn sdk_env(&self) -> HashMap<String, String> {
        let root = resolve_sdk_root(&self.settings().sdk_path)
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        HashMap::from([("ANDROID_HOME".to_string(), root)])
    }
}
