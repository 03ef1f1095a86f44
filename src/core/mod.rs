pub mod command;
pub mod config;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod telemetry;
pub mod terminal;
