//! Validate command implementation

use crate::cli::args::ValidateArgs;
use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::hparams::{BuildParams, DataParams, FitParams, YamlHParams};
use crate::sequences::SequenceKind;
use crate::train::callback::{resolve_spec, CallbackRegistry};

/// Groups every hyperparameter file must define
const REQUIRED_GROUPS: [&str; 4] = ["train_data", "val_data", "build", "fit"];

/// Collect every structural problem in the file. An empty list means the
/// configuration is ready for a training run.
pub fn collect_problems(hparams: &YamlHParams) -> Vec<String> {
    let mut problems = Vec::new();

    for group in REQUIRED_GROUPS {
        if !hparams.has_group(group) {
            problems.push(format!("missing required group '{group}'"));
        }
    }

    for group in ["train_data", "val_data"] {
        if hparams.has_group(group) {
            if let Err(e) = hparams.parse_group::<DataParams>(group) {
                problems.push(format!("group '{group}' does not parse: {e}"));
            }
        }
    }

    if hparams.has_group("build") {
        if let Err(e) = hparams.parse_group::<BuildParams>("build") {
            problems.push(format!("group 'build' does not parse: {e}"));
        }
    }

    if hparams.has_group("fit") {
        match hparams.parse_group::<FitParams>("fit") {
            Ok(fit) => problems.extend(fit_problems(&fit)),
            Err(e) => problems.push(format!("group 'fit' does not parse: {e}")),
        }
    }

    problems
}

/// Checks on a fit group that already parsed structurally
fn fit_problems(fit: &FitParams) -> Vec<String> {
    let mut problems = Vec::new();

    if let Err(e) = fit.intrp_style.parse::<SequenceKind>() {
        problems.push(format!("fit.intrp_style: {e}"));
    }
    if fit.batch_size == 0 {
        problems.push("fit.batch_size must be greater than zero".to_string());
    }
    if fit.n_epochs == 0 {
        problems.push("fit.n_epochs must be greater than zero".to_string());
    }

    let builtin = CallbackRegistry::builtin();
    let custom = CallbackRegistry::custom();
    for spec in &fit.callbacks {
        if let Err(e) = resolve_spec(spec, &builtin, &custom) {
            problems.push(format!("fit.callbacks: {e}"));
        }
    }

    problems
}

/// Format one data group as a string
pub fn format_data_info(name: &str, data: &DataParams) -> String {
    let mut lines = vec![
        format!("  {name}:"),
        format!("    Base dir: {}", data.base_dir.display()),
        format!("    Scaler: {}", data.scaler),
    ];
    if let Some(max_load) = data.max_load {
        lines.push(format!("    Max loaded images: {max_load}"));
    }
    lines.join("\n")
}

/// Format the build group as a string
pub fn format_build_info(build: &BuildParams) -> String {
    format!(
        "  Dim: {}\n  Channels: {}\n  Classes: {}",
        build.dim, build.n_channels, build.n_classes
    )
}

/// Format the fit group as a string
pub fn format_fit_info(fit: &FitParams) -> String {
    let mut lines = vec![
        format!("  Style: {}", fit.intrp_style),
        format!("  Batch size: {}", fit.batch_size),
        format!("  Epochs: {}", fit.n_epochs),
        format!("  Optimizer: {}", fit.optimizer),
        format!("  Loss: {}", fit.loss),
    ];
    if !fit.metrics.is_empty() {
        lines.push(format!("  Metrics: {}", fit.metrics.join(", ")));
    }
    if !fit.callbacks.is_empty() {
        let names: Vec<&str> = fit
            .callbacks
            .iter()
            .map(|c| c.class_name.as_str())
            .collect();
        lines.push(format!("  Callbacks: {}", names.join(", ")));
    }
    lines.join("\n")
}

/// Print detailed configuration summary for the groups that parse
fn print_detailed_summary(hparams: &YamlHParams) {
    println!();
    println!("Configuration Summary:");

    for group in ["train_data", "val_data"] {
        if let Ok(data) = hparams.parse_group::<DataParams>(group) {
            println!();
            println!("{}", format_data_info(group, &data));
        }
    }

    if let Ok(build) = hparams.parse_group::<BuildParams>("build") {
        println!();
        println!("{}", format_build_info(&build));
    }

    if let Ok(fit) = hparams.parse_group::<FitParams>("fit") {
        println!();
        println!("{}", format_fit_info(&fit));
    }
}

pub fn run_validate(args: ValidateArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Validating hparams: {}", args.config.display()),
    );

    let hparams = YamlHParams::load(&args.config).map_err(|e| format!("Config error: {e}"))?;

    let problems = collect_problems(&hparams);
    if !problems.is_empty() {
        for problem in &problems {
            println!("  - {problem}");
        }
        return Err(format!("configuration has {} problem(s)", problems.len()));
    }

    log(level, LogLevel::Normal, "Configuration is valid");

    if args.detailed {
        print_detailed_summary(&hparams);
    }

    Ok(())
}
