//! CLI argument definitions - Cli, Command, and per-command argument structs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Segmentar: training-pipeline tooling for medical image segmentation
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "segmentar")]
#[command(version)]
#[command(
    about = "Training-pipeline tooling for volumetric medical image segmentation"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Split a dataset into cross-validation folds on disk
    CvSplit(CvSplitArgs),

    /// Initialize a new project directory with a template hparams file
    Init(InitArgs),

    /// Validate a hyperparameter file without training
    Validate(ValidateArgs),

    /// Display information about a hyperparameter file
    Info(InfoArgs),
}

/// Arguments for the cv-split command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct CvSplitArgs {
    /// Directory holding the image and label sub-directories
    #[arg(long, value_name = "DIR")]
    pub data_dir: PathBuf,

    /// Number of cross-validation folds (1 creates a single fixed split)
    #[arg(long, default_value_t = 5)]
    pub cv: usize,

    /// Directory created under the data dir to hold the splits
    #[arg(long, default_value = "views")]
    pub out_dir: String,

    /// Image sub-directory name
    #[arg(long, default_value = "images")]
    pub im_sub_dir: String,

    /// Label sub-directory name
    #[arg(long, default_value = "labels")]
    pub lab_sub_dir: String,

    /// Sub-directory of augmented data to link into matching training splits
    #[arg(long)]
    pub aug_sub_dir: Option<String>,

    /// Copy files into the splits instead of symlinking them
    #[arg(long, conflicts_with = "file_list")]
    pub copy: bool,

    /// Record absolute paths in a list file instead of linking
    #[arg(long)]
    pub file_list: bool,

    /// Glob-style pattern selecting image files
    #[arg(long, default_value = "*.nii*")]
    pub file_regex: String,

    /// Fraction of images reserved for validation
    #[arg(long, default_value_t = 0.20)]
    pub validation_fraction: f64,

    /// Fraction of images reserved for testing
    #[arg(long, default_value_t = 0.20)]
    pub test_fraction: f64,

    /// Random seed for the shuffling RNG
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for the init command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InitArgs {
    /// Name of the project directory to create
    #[arg(long, default_value = "my_project")]
    pub name: String,

    /// Directory in which the project directory is created
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Pre-fill train/val base directories from this data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to the hyperparameter YAML file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Show detailed validation report
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to the hyperparameter YAML file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for the info command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Unknown output format: {s}. Valid formats: text, json, yaml"
            )),
        }
    }
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
