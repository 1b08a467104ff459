use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AVD_LOG_EVENT: &str = "avd-log";
pub const AVD_BOOTED_EVENT: &str = "avd-booted";
pub const AVD_SHUTDOWN_EVENT: &str = "avd-shutdown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningEmulator {
    pub serial: String,
    pub port: u16,
    pub avd_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AvdState {
    Booting,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvdStatus {
    pub name: String,
    pub instance_id: Uuid,
    pub pid: Option<u32>,
    pub state: AvdState,
    pub cold_boot: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartOutcome {
    pub name: String,
    pub instance_id: Uuid,
    pub pid: Option<u32>,
    pub cold_boot: bool,
    /// Stale lock files were removed before the launch succeeded.
    pub recovered_lock: bool,
}

/// Lifecycle notification pushed to the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvdEvent {
    Log(String),
    Booted(String),
    Shutdown(String),
}

impl AvdEvent {
    pub fn log(line: &str) -> Self {
        Self::Log(timestamped_log(line))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Log(_) => AVD_LOG_EVENT,
            Self::Booted(_) => AVD_BOOTED_EVENT,
            Self::Shutdown(_) => AVD_SHUTDOWN_EVENT,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Self::Log(line) => line,
            Self::Booted(name) | Self::Shutdown(name) => name,
        }
    }
}

pub type AvdEmitter = Arc<dyn Fn(AvdEvent) + Send + Sync>;

/// `(HH:MM:SS) line`, local wall-clock time.
pub fn timestamped_log(line: &str) -> String {
    format!("({}) {}", Local::now().format("%H:%M:%S"), line)
}
