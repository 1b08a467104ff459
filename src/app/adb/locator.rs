use std::path::PathBuf;

use crate::app::error::AvdError;

const SDK_ROOT_VARS: [&str; 2] = ["ANDROID_HOME", "ANDROID_SDK_ROOT"];

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

fn configured_path(value: &str) -> Option<PathBuf> {
    let normalized = normalize_command_path(value);
    (!normalized.is_empty()).then(|| PathBuf::from(normalized))
}

fn env_path(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    lookup(key).and_then(|value| configured_path(&value))
}

pub fn resolve_sdk_root(configured: &str) -> Option<PathBuf> {
    resolve_sdk_root_with(configured, |key| std::env::var(key).ok())
}

fn resolve_sdk_root_with(
    configured: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    configured_path(configured)
        .or_else(|| SDK_ROOT_VARS.iter().find_map(|key| env_path(&lookup, key)))
}

/// Directory holding `<name>.avd` data directories.
pub fn resolve_avd_home(configured: &str) -> Option<PathBuf> {
    resolve_avd_home_with(configured, |key| std::env::var(key).ok(), dirs::home_dir())
}

fn resolve_avd_home_with(
    configured: &str,
    lookup: impl Fn(&str) -> Option<String>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    configured_path(configured)
        .or_else(|| env_path(&lookup, "ANDROID_AVD_HOME"))
        .or_else(|| env_path(&lookup, "ANDROID_USER_HOME").map(|dir| dir.join("avd")))
        .or_else(|| home.map(|dir| dir.join(".android").join("avd")))
}

fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Tool locations under one Android SDK root. Nothing is cached; every call
/// checks the filesystem again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkPaths {
    root: PathBuf,
}

impl SdkPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(configured: &str) -> Result<Self, AvdError> {
        resolve_sdk_root(configured)
            .map(Self::new)
            .ok_or(AvdError::SdkNotConfigured)
    }

    pub fn emulator(&self) -> Result<PathBuf, AvdError> {
        existing(
            "emulator",
            self.root.join("emulator").join(executable_name("emulator")),
        )
    }

    pub fn adb(&self) -> Result<PathBuf, AvdError> {
        existing(
            "adb",
            self.root.join("platform-tools").join(executable_name("adb")),
        )
    }
}

fn existing(tool: &'static str, path: PathBuf) -> Result<PathBuf, AvdError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(AvdError::PathNotFound { tool, path })
    }
}
