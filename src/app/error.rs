use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::app::adb::runner::CommandError;

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }

    pub fn from_avd(err: &AvdError, trace_id: impl Into<String>) -> Self {
        Self::new(err.code(), err.to_string(), trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

/// Failures of the AVD lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum AvdError {
    #[error("Android SDK location is not configured (set ANDROID_HOME)")]
    SdkNotConfigured,
    #[error("{tool} not found at: {}", path.display())]
    PathNotFound { tool: &'static str, path: PathBuf },
    #[error("invalid AVD name: {0:?}")]
    InvalidName(String),
    #[error("failed to start emulator: {0}")]
    Launch(#[source] CommandError),
    #[error("failed to start emulator '{name}' even after deleting lock files: {source}")]
    LockConflict {
        name: String,
        #[source]
        source: CommandError,
    },
    #[error("AVD not running: {0}")]
    NotRunning(String),
    #[error("AVD {0} not found among running devices")]
    AvdNotFound(String),
    #[error("could not find emulator port for '{name}': {source}")]
    PortResolution {
        name: String,
        #[source]
        source: Box<AvdError>,
    },
    #[error("{action} failed: {source}")]
    CommandFailed {
        action: String,
        #[source]
        source: CommandError,
    },
    #[error("no AVDs found. Please create an AVD first")]
    NoAvds,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AvdError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SdkNotConfigured | Self::PathNotFound { .. } => "ERR_PATH_NOT_FOUND",
            Self::InvalidName(_) => "ERR_VALIDATION",
            Self::Launch(_) => "ERR_PROCESS_LAUNCH",
            Self::LockConflict { .. } => "ERR_LOCK_CONFLICT",
            Self::NotRunning(_) => "ERR_NOT_RUNNING",
            Self::AvdNotFound(_) => "ERR_AVD_NOT_FOUND",
            Self::PortResolution { .. } => "ERR_PORT_RESOLUTION",
            Self::CommandFailed { .. } => "ERR_COMMAND_FAILED",
            Self::NoAvds => "ERR_NOT_FOUND",
            Self::Io { .. } => "ERR_SYSTEM",
        }
    }
}
