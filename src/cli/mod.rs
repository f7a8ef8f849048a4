//! Command-line interface
//!
//! The binary entry point lives in `main.rs`; argument structures, command
//! handlers and the CLI error type live here so they can be tested.

pub mod commands;
pub mod error;

pub use error::CliError;
