use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::config::{backup_config_path, load_config_from_path, save_config_to_path, AppConfig};
use crate::app::error::{AppError, AvdError};
use crate::app::models::{AvdStatus, StartOutcome};
use crate::app::state::AppState;

#[cfg(feature = "desktop")]
use std::sync::Arc;

#[cfg(feature = "desktop")]
use tauri::{AppHandle, Emitter, State};

#[cfg(feature = "desktop")]
use crate::app::config::config_path;
#[cfg(feature = "desktop")]
use crate::app::models::{AvdEmitter, AvdEvent, CommandResponse};


fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

fn map_avd_error(err: AvdError, operation: &str, trace_id: &str) -> AppError {
    warn!(trace_id = %trace_id, code = err.code(), error = %err, "{operation} failed");
    AppError::from_avd(&err, trace_id)
}

/// Forwards controller events to the webview.
#[cfg(feature = "desktop")]
pub fn tauri_emitter(app: AppHandle) -> AvdEmitter {
    Arc::new(move |event: AvdEvent| {
        if let Err(err) = app.emit(event.name(), event.payload()) {
            warn!(event = event.name(), error = %err, "failed to emit avd event");
        }
    })
}

fn save_app_config_inner(
    config: AppConfig,
    path: &Path,
    state: &AppState,
    trace_id: &str,
) -> Result<AppConfig, AppError> {
    let saved = save_config_to_path(&config, path, &backup_config_path(path), trace_id)?;
    state.apply_config(&saved);
    info!(trace_id = %trace_id, path = %path.display(), "saved config");
    Ok(saved)
}

fn load_app_config_inner(path: &Path, state: &AppState, trace_id: &str) -> Result<AppConfig, AppError> {
    let config = load_config_from_path(path, trace_id)?;
    state.apply_config(&config);
    Ok(config)
}

fn start_avd_inner(
    avd_name: &str,
    cold_boot: bool,
    state: &AppState,
    trace_id: &str,
) -> Result<StartOutcome, AppError> {
    ensure_non_empty(avd_name, "avd_name", trace_id)?;
    info!(trace_id = %trace_id, avd = %avd_name, cold_boot, "start_avd");
    state
        .controller
        .start(avd_name, cold_boot)
        .map_err(|err| map_avd_error(err, "start_avd", trace_id))
}

fn stop_avd_inner(avd_name: &str, state: &AppState, trace_id: &str) -> Result<bool, AppError> {
    ensure_non_empty(avd_name, "avd_name", trace_id)?;
    info!(trace_id = %trace_id, avd = %avd_name, "stop_avd");
    state
        .controller
        .stop(avd_name)
        .map(|()| true)
        .map_err(|err| map_avd_error(err, "stop_avd", trace_id))
}

fn list_avds_inner(state: &AppState, trace_id: &str) -> Result<Vec<String>, AppError> {
    state
        .controller
        .list_avds()
        .map_err(|err| map_avd_error(err, "list_avds", trace_id))
}

fn list_running_avds_inner(state: &AppState, trace_id: &str) -> Result<Vec<String>, AppError> {
    state
        .controller
        .list_running_avds()
        .map_err(|err| map_avd_error(err, "list_running_avds", trace_id))
}

fn list_started_avds_inner(state: &AppState) -> Vec<AvdStatus> {
    state.controller.started_avds()
}

fn sdk_env_inner(state: &AppState) -> HashMap<String, String> {
    state.controller.sdk_env()
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn get_config(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_app_config_inner(&config_path(), &state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn save_app_config(
    config: AppConfig,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = save_app_config_inner(config, &config_path(), &state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn reset_config(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = save_app_config_inner(AppConfig::default(), &config_path(), &state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn list_avds(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let avds = list_avds_inner(&state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: avds,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn list_running_avds(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let running = list_running_avds_inner(&state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: running,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn list_started_avds(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<AvdStatus>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: list_started_avds_inner(&state),
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn start_avd(
    avd_name: String,
    cold_boot: Option<bool>,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<StartOutcome>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let outcome = start_avd_inner(&avd_name, cold_boot.unwrap_or(false), &state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: outcome,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn stop_avd(
    avd_name: String,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let stopped = stop_avd_inner(&avd_name, &state, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: stopped,
    })
}

#[cfg(feature = "desktop")]
#[tauri::command(async)]
pub fn get_android_sdk_env(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<HashMap<String, String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: sdk_env_inner(&state),
    })
}
