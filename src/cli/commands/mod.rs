//! CLI command implementations

mod cv_split;
mod info;
mod init;
mod validate;


use crate::cli::args::{Cli, Command};
use crate::cli::{logging, LogLevel};

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    // Configure output based on verbose/quiet flags
    let log_level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };
    logging::init(log_level);

    match cli.command {
        Command::CvSplit(args) => cv_split::run_cv_split(args, log_level),
        Command::Init(args) => init::run_init(args, log_level),
        Command::Validate(args) => validate::run_validate(args, log_level),
        Command::Info(args) => info::run_info(args, log_level),
    }
}
