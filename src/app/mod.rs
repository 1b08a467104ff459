pub mod adb;
#[cfg(any(test, feature = "desktop"))]
pub mod commands;
pub mod config;
pub mod emulator;
pub mod error;
pub mod logging;
pub mod models;
pub mod state;
