//! Command-line interface for steadyflow.
//!
//! - [`args`] - Argument definitions using clap derive macros
//! - [`commands`] - Command implementations

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, ConfigArgs, InspectArgs};
pub use commands::{Command, CommandDispatcher, CommandResult};
