//! Logging utilities for CLI output

/// Log level for CLI output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Suppress all output except errors
    Quiet,
    /// Normal output level
    Normal,
    /// Verbose output with additional details
    Verbose,
}

impl LogLevel {
    /// Default `env_logger` filter directive for this level
    fn filter(self) -> &'static str {
        match self {
            LogLevel::Quiet => "error",
            LogLevel::Normal => "info",
            LogLevel::Verbose => "debug",
        }
    }
}

/// Install the global logger backing the `log` macros used by the library.
///
/// `RUST_LOG` overrides the level derived from the CLI flags. Calling this
/// more than once is harmless; later calls are ignored.
pub fn init(level: LogLevel) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.filter()),
    )
    .format_timestamp(None)
    .try_init();
}

/// Log a message if the current level permits it
pub fn log(level: LogLevel, required: LogLevel, msg: &str) {
    if level != LogLevel::Quiet && (level == required || required == LogLevel::Normal) {
        println!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_tracks_level() {
        assert_eq!(LogLevel::Quiet.filter(), "error");
        assert_eq!(LogLevel::Normal.filter(), "info");
        assert_eq!(LogLevel::Verbose.filter(), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(LogLevel::Normal);
        init(LogLevel::Verbose);
    }
}
