pub mod classifier;
pub mod controller;
pub mod locks;
pub mod monitor;
pub mod registry;
