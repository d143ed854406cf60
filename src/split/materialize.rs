//! Placement of planned splits on disk.
//!
//! Every split member is placed into its leaf directory in one of three
//! modes: a relative symbolic link (default), a full copy, or a line holding
//! the absolute source path appended to a `LIST_OF_FILES.txt` in the leaf
//! directory. The last mode serves filesystems without symlink support where
//! the dataset is too large to copy.

use super::error::{Result, SplitError};
use super::plan::SplitPlan;
use crate::image::LIST_OF_FILES;
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// How split members are placed into the split directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    #[default]
    Symlink,
    Copy,
    FileList,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkMode::Symlink => "symlink",
            LinkMode::Copy => "copy",
            LinkMode::FileList => "file-list",
        };
        write!(f, "{name}")
    }
}

/// Lay one split out on disk: create the train/val/test leaf directories
/// and place every planned image with its label.
pub(crate) fn materialize_split(
    plan: &SplitPlan,
    split_dir: &Path,
    src_images: &Path,
    src_labels: &Path,
    im_sub_dir: &str,
    lab_sub_dir: &str,
    mode: LinkMode,
) -> Result<()> {
    let subsets = [
        ("test", &plan.test),
        ("val", &plan.val),
        ("train", &plan.train),
    ];
    for (subset, paths) in subsets {
        let dest = split_dir.join(subset);
        place_pairs(
            paths,
            &dest.join(im_sub_dir),
            &dest.join(lab_sub_dir),
            src_images,
            src_labels,
            mode,
        )?;
    }
    Ok(())
}

/// Place image/label pairs into a destination directory pair.
///
/// `images` must hold absolute paths below `src_images`; the label of each
/// image is the same file name below `src_labels`. Destination directories
/// are created as needed.
pub(crate) fn place_pairs(
    images: &[PathBuf],
    dest_images: &Path,
    dest_labels: &Path,
    src_images: &Path,
    src_labels: &Path,
    mode: LinkMode,
) -> Result<()> {
    fs::create_dir_all(dest_images)?;
    fs::create_dir_all(dest_labels)?;
    for image in images {
        let name = image
            .file_name()
            .ok_or_else(|| SplitError::BadImagePath(image.clone()))?;
        let rel = image
            .strip_prefix(src_images)
            .map_err(|_| SplitError::BadImagePath(image.clone()))?;
        let label = src_labels.join(rel);
        if !label.exists() {
            return Err(SplitError::MissingLabel {
                expected: label,
                image_dir: src_images.to_path_buf(),
                label_dir: src_labels.to_path_buf(),
            });
        }
        place_file(image, dest_images, name, mode)?;
        place_file(&label, dest_labels, name, mode)?;
    }
    Ok(())
}

/// Augmented images whose file name contains the file name of any training
/// image. Augmented files may carry leading or trailing name decorations.
pub(crate) fn select_augmented(aug_images: &[PathBuf], train: &[PathBuf]) -> Vec<PathBuf> {
    let train_names: Vec<String> = train
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    aug_images
        .iter()
        .filter(|aug| match aug.file_name() {
            Some(name) => {
                let name = name.to_string_lossy();
                train_names.iter().any(|t| name.contains(t.as_str()))
            }
            None => false,
        })
        .cloned()
        .collect()
}

fn place_file(source: &Path, dest_dir: &Path, name: &OsStr, mode: LinkMode) -> Result<()> {
    match mode {
        LinkMode::Symlink => {
            symlink_file(&relative_to(dest_dir, source), &dest_dir.join(name))?;
        }
        LinkMode::Copy => {
            fs::copy(source, dest_dir.join(name))?;
        }
        LinkMode::FileList => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dest_dir.join(LIST_OF_FILES))?;
            writeln!(file, "{}", source.display())?;
        }
    }
    Ok(())
}

/// Relative path from directory `base` to `target`; both must be absolute
fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let mut base_parts = base.components().peekable();
    let mut target_parts = target.components().peekable();
    while let (Some(b), Some(t)) = (base_parts.peek(), target_parts.peek()) {
        if b != t {
            break;
        }
        base_parts.next();
        target_parts.next();
    }
    let mut rel = PathBuf::new();
    for _ in base_parts {
        rel.push("..");
    }
    for part in target_parts {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_sources(dir: &Path, names: &[&str]) -> (PathBuf, PathBuf, Vec<PathBuf>) {
        let images = dir.join("images");
        let labels = dir.join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        let mut paths = Vec::new();
        for name in names {
            let path = images.join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            fs::write(labels.join(name), format!("lab {name}")).unwrap();
            paths.push(path);
        }
        (images, labels, paths)
    }

    #[test]
    fn test_relative_to_descends() {
        let rel = relative_to(Path::new("/a/b"), Path::new("/a/b/c/x.nii"));
        assert_eq!(rel, Path::new("c/x.nii"));
    }

    #[test]
    fn test_relative_to_climbs() {
        let rel = relative_to(Path::new("/data/views/split_0/train/images"), Path::new("/data/images/x.nii"));
        assert_eq!(rel, Path::new("../../../../images/x.nii"));
    }

    #[test]
    fn test_relative_to_same_dir() {
        assert_eq!(relative_to(Path::new("/a/b"), Path::new("/a/b")), Path::new("."));
    }

    #[test]
    fn test_file_list_mode_appends_absolute_paths() {
        let tmp = tempdir().unwrap();
        let (images, labels, paths) = fake_sources(tmp.path(), &["a.nii.gz", "b.nii.gz"]);
        let dest_im = tmp.path().join("out/images");
        let dest_lab = tmp.path().join("out/labels");
        place_pairs(&paths, &dest_im, &dest_lab, &images, &labels, LinkMode::FileList).unwrap();

        let listed = fs::read_to_string(dest_im.join(LIST_OF_FILES)).unwrap();
        let lines: Vec<&str> = listed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("a.nii.gz"));
        assert!(Path::new(lines[0]).is_absolute());
        assert!(dest_lab.join(LIST_OF_FILES).exists());
        // nothing but the list is placed
        assert_eq!(fs::read_dir(&dest_im).unwrap().count(), 1);
    }

    #[test]
    fn test_copy_mode_copies_contents() {
        let tmp = tempdir().unwrap();
        let (images, labels, paths) = fake_sources(tmp.path(), &["a.nii.gz"]);
        let dest_im = tmp.path().join("out/images");
        let dest_lab = tmp.path().join("out/labels");
        place_pairs(&paths, &dest_im, &dest_lab, &images, &labels, LinkMode::Copy).unwrap();

        assert_eq!(fs::read_to_string(dest_im.join("a.nii.gz")).unwrap(), "a.nii.gz");
        assert_eq!(fs::read_to_string(dest_lab.join("a.nii.gz")).unwrap(), "lab a.nii.gz");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_mode_links_relatively() {
        let tmp = tempdir().unwrap();
        let (images, labels, paths) = fake_sources(tmp.path(), &["a.nii.gz"]);
        let dest_im = tmp.path().join("views/split_0/train/images");
        let dest_lab = tmp.path().join("views/split_0/train/labels");
        place_pairs(&paths, &dest_im, &dest_lab, &images, &labels, LinkMode::Symlink).unwrap();

        let link = dest_im.join("a.nii.gz");
        let target = fs::read_link(&link).unwrap();
        assert!(target.is_relative());
        assert_eq!(fs::canonicalize(&link).unwrap(), fs::canonicalize(&paths[0]).unwrap());
        assert_eq!(fs::read_to_string(dest_lab.join("a.nii.gz")).unwrap(), "lab a.nii.gz");
    }

    #[test]
    fn test_missing_label_is_an_error() {
        let tmp = tempdir().unwrap();
        let (images, labels, paths) = fake_sources(tmp.path(), &["a.nii.gz"]);
        fs::remove_file(labels.join("a.nii.gz")).unwrap();
        let err = place_pairs(
            &paths,
            &tmp.path().join("out/images"),
            &tmp.path().join("out/labels"),
            &images,
            &labels,
            LinkMode::Copy,
        )
        .unwrap_err();
        match err {
            SplitError::MissingLabel { expected, .. } => {
                assert!(expected.ends_with("labels/a.nii.gz"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_materialize_split_creates_all_leaves() {
        let tmp = tempdir().unwrap();
        let (images, labels, paths) = fake_sources(tmp.path(), &["a.nii.gz", "b.nii.gz", "c.nii.gz"]);
        let plan = SplitPlan {
            test: vec![paths[0].clone()],
            val: vec![paths[1].clone()],
            train: vec![paths[2].clone()],
        };
        let split_dir = tmp.path().join("views/split_0");
        materialize_split(&plan, &split_dir, &images, &labels, "images", "labels", LinkMode::Copy)
            .unwrap();

        for subset in ["train", "val", "test"] {
            assert!(split_dir.join(subset).join("images").is_dir());
            assert!(split_dir.join(subset).join("labels").is_dir());
        }
        assert!(split_dir.join("test/images/a.nii.gz").exists());
        assert!(split_dir.join("val/images/b.nii.gz").exists());
        assert!(split_dir.join("train/labels/c.nii.gz").exists());
    }

    #[test]
    fn test_select_augmented_by_name_containment() {
        let aug = vec![
            PathBuf::from("/d/aug/images/noised_subj_1.nii.gz"),
            PathBuf::from("/d/aug/images/noised_subj_2.nii.gz"),
            PathBuf::from("/d/aug/images/unrelated.nii.gz"),
        ];
        let train = vec![
            PathBuf::from("/d/images/subj_1.nii.gz"),
            PathBuf::from("/d/images/subj_9.nii.gz"),
        ];
        let picked = select_augmented(&aug, &train);
        assert_eq!(picked, vec![PathBuf::from("/d/aug/images/noised_subj_1.nii.gz")]);
    }
}
