use crate::app::config::AppConfig;
use crate::app::emulator::controller::{ControllerSettings, LifecycleController};
use crate::app::models::AvdEmitter;

pub struct AppState {
    pub controller: LifecycleController,
}

impl AppState {
    pub fn new(config: &AppConfig, emitter: AvdEmitter) -> Self {
        Self {
            controller: LifecycleController::with_system_executor(
                ControllerSettings::from_config(config),
                emitter,
            ),
        }
    }

    pub fn with_controller(controller: LifecycleController) -> Self {
        Self { controller }
    }

    pub fn apply_config(&self, config: &AppConfig) {
        self.controller
            .reconfigure(ControllerSettings::from_config(config));
    }
}
