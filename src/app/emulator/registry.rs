use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::adb::runner::ProcessHandle;
use crate::app::models::{AvdState, AvdStatus};

/// An emulator process started by this controller.
pub struct AvdInstance {
    pub name: String,
    pub instance_id: Uuid,
    pub state: AvdState,
    pub cold_boot: bool,
    pub started_at: DateTime<Utc>,
    handle: Box<dyn ProcessHandle>,
}

impl AvdInstance {
    pub fn new(name: impl Into<String>, cold_boot: bool, handle: Box<dyn ProcessHandle>) -> Self {
        Self {
            name: name.into(),
            instance_id: Uuid::new_v4(),
            state: AvdState::Booting,
            cold_boot,
            started_at: Utc::now(),
            handle,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    pub fn status(&self) -> AvdStatus {
        AvdStatus {
            name: self.name.clone(),
            instance_id: self.instance_id,
            pid: self.handle.pid(),
            state: self.state,
            cold_boot: self.cold_boot,
            started_at: self.started_at,
        }
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.handle.kill()
    }

    /// Collects the exit status off-thread so the process does not linger as
    /// a zombie after it leaves the registry.
    pub fn reap(mut self) {
        if self.handle.has_exited() {
            return;
        }
        let name = self.name;
        let mut handle = self.handle;
        std::thread::spawn(move || match handle.wait() {
            Ok(code) => debug!(avd = %name, exit_code = ?code, "emulator process exited"),
            Err(err) => warn!(avd = %name, error = %err, "failed to wait for emulator process"),
        });
    }
}

/// Outcome of [`DeviceRegistry::release`].
pub enum Release {
    Removed(AvdInstance),
    /// Nothing is registered under the name, e.g. after an explicit stop.
    Absent,
    /// The name is registered to a different instance.
    Superseded,
}

/// Name-keyed set of running instances. Every access goes through one mutex.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Mutex<HashMap<String, AvdInstance>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, AvdInstance>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `instance`, returning whatever was registered under its name.
    pub fn put(&self, instance: AvdInstance) -> Option<AvdInstance> {
        self.entries().insert(instance.name.clone(), instance)
    }

    pub fn get(&self, name: &str) -> Option<AvdStatus> {
        self.entries().get(name).map(AvdInstance::status)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<AvdInstance> {
        self.entries().remove(name)
    }

    /// Removes the entry for `name` only if it still belongs to `instance_id`.
    pub fn remove_instance(&self, name: &str, instance_id: Uuid) -> Option<AvdInstance> {
        let mut entries = self.entries();
        if entries.get(name)?.instance_id != instance_id {
            return None;
        }
        entries.remove(name)
    }

    /// Like [`DeviceRegistry::remove_instance`], but tells an already removed
    /// entry apart from one that now belongs to a newer instance.
    pub fn release(&self, name: &str, instance_id: Uuid) -> Release {
        let mut entries = self.entries();
        match entries.get(name) {
            None => Release::Absent,
            Some(current) if current.instance_id != instance_id => Release::Superseded,
            Some(_) => entries.remove(name).map_or(Release::Absent, Release::Removed),
        }
    }

    pub fn set_state(&self, name: &str, instance_id: Uuid, state: AvdState) -> bool {
        match self.entries().get_mut(name) {
            Some(instance) if instance.instance_id == instance_id => {
                instance.state = state;
                true
            }
            _ => false,
        }
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn statuses(&self) -> Vec<AvdStatus> {
        let mut statuses: Vec<AvdStatus> = self.entries().values().map(AvdInstance::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
