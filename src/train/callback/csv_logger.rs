//! CSV training log, one row per finished epoch.

use super::traits::{CallbackAction, CallbackContext, TrainerCallback};
use chrono::Local;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Appends `epoch, timestamp, loss, lr, val_loss, <metrics...>` to a CSV
/// file after every epoch. The header is written once, derived from the
/// first epoch's context; in append mode an existing file keeps its rows.
///
/// Write failures are logged and training continues.
pub struct CsvLogger {
    path: PathBuf,
    append: bool,
    header_written: bool,
}

impl CsvLogger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: false,
            header_written: false,
        }
    }

    /// Keep rows of an earlier run instead of truncating the file
    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn write_row(&mut self, ctx: &CallbackContext) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if !self.header_written && file.metadata()?.len() == 0 {
            let mut header = String::from("epoch,timestamp,loss,lr,val_loss");
            for (name, _) in &ctx.metrics {
                header.push(',');
                header.push_str(name);
            }
            writeln!(file, "{header}")?;
        }
        self.header_written = true;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let val_loss = ctx
            .val_loss
            .map(|v| format!("{v:.6}"))
            .unwrap_or_default();
        let mut row = format!(
            "{},{timestamp},{:.6},{:e},{val_loss}",
            ctx.epoch, ctx.loss, ctx.lr
        );
        for (_, value) in &ctx.metrics {
            row.push_str(&format!(",{value:.6}"));
        }
        writeln!(file, "{row}")
    }
}

impl TrainerCallback for CsvLogger {
    fn on_train_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        if !self.append && self.path.exists() {
            if let Err(err) = File::create(&self.path) {
                warn!("could not truncate '{}': {err}", self.path.display());
            }
        }
        CallbackAction::Continue
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if let Err(err) = self.write_row(ctx) {
            warn!(
                "could not write training log '{}': {err}",
                self.path.display()
            );
        }
        CallbackAction::Continue
    }

    fn name(&self) -> &'static str {
        "CSVLogger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx(epoch: usize, loss: f32) -> CallbackContext {
        CallbackContext {
            epoch,
            loss,
            lr: 0.001,
            val_loss: Some(loss + 0.1),
            metrics: vec![("val_accuracy".to_string(), 0.9)],
            ..Default::default()
        }
    }

    #[test]
    fn test_writes_header_and_rows() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("training.csv");
        let mut logger = CsvLogger::new(&path);

        logger.on_epoch_end(&ctx(0, 1.0));
        logger.on_epoch_end(&ctx(1, 0.5));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch,timestamp,loss,lr,val_loss,val_accuracy");
        assert!(lines[1].starts_with("0,"));
        assert!(lines[2].starts_with("1,"));
        assert!(lines[1].contains("1.000000"));
    }

    #[test]
    fn test_truncates_unless_appending() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("training.csv");
        std::fs::write(&path, "epoch,timestamp,loss,lr,val_loss\n9,x,0.1,1e0,\n").unwrap();

        let mut logger = CsvLogger::new(&path);
        logger.on_train_begin(&CallbackContext::default());
        logger.on_epoch_end(&ctx(0, 1.0));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("9,x"));
        assert!(text.starts_with("epoch,timestamp"));
    }

    #[test]
    fn test_append_mode_keeps_old_rows() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("training.csv");
        std::fs::write(&path, "epoch,timestamp,loss,lr,val_loss\n9,x,0.1,1e0,\n").unwrap();

        let mut logger = CsvLogger::new(&path).append(true);
        logger.on_train_begin(&CallbackContext::default());
        logger.on_epoch_end(&ctx(10, 0.05));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("9,x"));
        assert!(text.lines().count() == 3);
        // header not repeated
        assert_eq!(text.matches("epoch,timestamp").count(), 1);
    }

    #[test]
    fn test_creates_missing_parent_dir() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs/run_1/training.csv");
        let mut logger = CsvLogger::new(&path);
        logger.on_epoch_end(&ctx(0, 1.0));
        assert!(path.is_file());
    }

    #[test]
    fn test_row_without_validation() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("training.csv");
        let mut logger = CsvLogger::new(&path);
        let ctx = CallbackContext {
            loss: 0.25,
            lr: 0.01,
            ..Default::default()
        };
        logger.on_epoch_end(&ctx);

        let text = std::fs::read_to_string(&path).unwrap();
        let row = text.lines().nth(1).unwrap();
        // empty val_loss column
        assert!(row.ends_with(','));
    }
}
