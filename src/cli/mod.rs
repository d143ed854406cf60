//! CLI module for segmentar
//!
//! This module contains all CLI command handlers and utilities.

mod args;
mod commands;
mod logging;

pub use args::{
    parse_args, Cli, Command, CvSplitArgs, InfoArgs, InitArgs, OutputFormat, ValidateArgs,
};
pub use commands::run_command;
pub use logging::LogLevel;
