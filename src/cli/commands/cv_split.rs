//! cv-split command implementation

use crate::cli::args::CvSplitArgs;
use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::split::{self, LinkMode, SplitCounts, SplitOptions};

/// Resolve the materialisation mode from the mutually exclusive flags
fn link_mode(args: &CvSplitArgs) -> LinkMode {
    if args.copy {
        LinkMode::Copy
    } else if args.file_list {
        LinkMode::FileList
    } else {
        LinkMode::Symlink
    }
}

/// Render the per-split count table printed after a successful run
fn count_table(counts: &SplitCounts) -> String {
    let rows = [
        ("Total images", counts.n_total),
        ("Training images per split", counts.n_train),
        ("Validation images per split", counts.n_val),
        ("Test images per split", counts.n_test),
    ];
    let mut lines = vec!["-----".to_string()];
    for (label, n) in rows {
        lines.push(format!("{label:<40} {n}"));
    }
    lines.join("\n")
}

pub fn run_cv_split(args: CvSplitArgs, level: LogLevel) -> Result<(), String> {
    let mode = link_mode(&args);
    let options = SplitOptions {
        data_dir: args.data_dir,
        n_splits: args.cv,
        out_dir: args.out_dir,
        im_sub_dir: args.im_sub_dir,
        lab_sub_dir: args.lab_sub_dir,
        aug_sub_dir: args.aug_sub_dir,
        mode,
        file_pattern: args.file_regex,
        val_fraction: args.validation_fraction,
        test_fraction: args.test_fraction,
        seed: args.seed,
    };

    log(
        level,
        LogLevel::Normal,
        &format!(
            "Splitting {} into {} split(s) ({mode})",
            options.data_dir.display(),
            options.n_splits,
        ),
    );

    let report = split::run(&options).map_err(|e| format!("Split failed: {e}"))?;

    log(level, LogLevel::Normal, &count_table(&report.counts));
    log(
        level,
        LogLevel::Normal,
        &format!(
            "Created {} split(s) under {}",
            report.n_splits,
            report.out_dir.display()
        ),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> CvSplitArgs {
        CvSplitArgs {
            data_dir: PathBuf::from("data_folder"),
            cv: 5,
            out_dir: "views".to_string(),
            im_sub_dir: "images".to_string(),
            lab_sub_dir: "labels".to_string(),
            aug_sub_dir: None,
            copy: false,
            file_list: false,
            file_regex: "*.nii*".to_string(),
            validation_fraction: 0.20,
            test_fraction: 0.20,
            seed: None,
        }
    }

    #[test]
    fn test_link_mode_default_is_symlink() {
        assert_eq!(link_mode(&args()), LinkMode::Symlink);
    }

    #[test]
    fn test_link_mode_copy() {
        let mut a = args();
        a.copy = true;
        assert_eq!(link_mode(&a), LinkMode::Copy);
    }

    #[test]
    fn test_link_mode_file_list() {
        let mut a = args();
        a.file_list = true;
        assert_eq!(link_mode(&a), LinkMode::FileList);
    }

    #[test]
    fn test_count_table_alignment() {
        let counts = SplitCounts {
            n_total: 100,
            n_train: 60,
            n_val: 20,
            n_test: 20,
        };
        let table = count_table(&counts);
        assert!(table.starts_with("-----\n"));
        assert!(table.contains("Total images                             100"));
        assert!(table.contains("Test images per split                    20"));
    }

    #[test]
    fn test_run_cv_split_missing_dir() {
        let mut a = args();
        a.data_dir = PathBuf::from("/nonexistent/data");
        let result = run_cv_split(a, LogLevel::Quiet);
        assert!(result.is_err());
    }
}
