pub mod locator;
pub mod parse;
pub mod ports;
pub mod runner;
