//! Segmentar CLI
//!
//! Command-line entry point for the segmentar library.
//!
//! # Usage
//!
//! ```bash
//! # Split a dataset into 5 cross-validation folds
//! segmentar cv-split --data-dir ./data_folder --cv 5
//!
//! # Start a new project with a template hyperparameter file
//! segmentar init --name my_project --data-dir ./data_folder
//!
//! # Validate a hyperparameter file
//! segmentar validate my_project/train_hparams.yaml
//!
//! # Show hyperparameter file info
//! segmentar info my_project/train_hparams.yaml --format json
//! ```

use clap::Parser;
use segmentar::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
