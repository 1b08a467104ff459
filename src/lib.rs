pub mod app;

#[cfg(feature = "desktop")]
use app::commands::{
    get_android_sdk_env, get_config, list_avds, list_running_avds, list_started_avds,
    reset_config, save_app_config, start_avd, stop_avd, tauri_emitter,
};
#[cfg(feature = "desktop")]
use app::config::{load_config, AppConfig};
#[cfg(feature = "desktop")]
use app::logging::init_logging;
#[cfg(feature = "desktop")]
use app::state::AppState;

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    let config = load_config("startup").unwrap_or_else(|err| {
        eprintln!("failed to load config, using defaults: {err}");
        AppConfig::default()
    });
    init_logging(&config.logging.log_level);

    tauri::Builder::default()
        .setup(move |app| {
            let emitter = tauri_emitter(app.handle().clone());
            app.manage(AppState::new(&config, emitter));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_config,
            save_app_config,
            reset_config,
            list_avds,
            list_running_avds,
            list_started_avds,
            start_avd,
            stop_avd,
            get_android_sdk_env
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
