//! Info command implementation

use crate::cli::args::{InfoArgs, OutputFormat};
use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::hparams::YamlHParams;
use serde_yaml::Value;

/// One-line rendering of a value for the text format. Nested collections are
/// summarised rather than expanded.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "Null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(seq) => format!("[{} entries]", seq.len()),
        Value::Mapping(map) => format!("{{{} keys}}", map.len()),
        Value::Tagged(tagged) => render_value(&tagged.value),
    }
}

/// Group/key listing used by the text format
fn format_text(hparams: &YamlHParams) -> String {
    let mut lines = Vec::new();
    for group in hparams.group_names() {
        lines.push(format!("{group}:"));
        if let Some(map) = hparams.get(group).and_then(Value::as_mapping) {
            for (key, value) in map {
                let key = key.as_str().unwrap_or("?");
                lines.push(format!("  {key}: {}", render_value(value)));
            }
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn run_info(args: InfoArgs, level: LogLevel) -> Result<(), String> {
    let hparams = YamlHParams::load(&args.config).map_err(|e| format!("Config error: {e}"))?;

    match args.format {
        OutputFormat::Text => {
            log(level, LogLevel::Normal, "Configuration Info:");
            println!();
            print!("{}", format_text(&hparams));
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(hparams.mapping())
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            // The raw text, exactly as stored on disk
            print!("{}", hparams.string_rep());
        }
    }

    Ok(())
}
