//! Command-line entry: argument parsing, telemetry setup, action dispatch.

pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

mod start;

pub use start::start;
