//! Layout-preserving YAML hyperparameter store
//!
//! `YamlHParams` keeps two views of one hyperparameter file in sync:
//! the raw YAML text exactly as it appears on disk (comments, anchors and
//! blank lines included) and a parsed mapping of top-level groups. Mutating
//! calls edit the text in place rather than re-serialising it, so a saved
//! file differs from the original only where values actually changed.
//!
//! Top-level keys prefixed `__CB` hold shared anchor definitions. They stay
//! in the text (their anchors must keep resolving) but are excluded from the
//! in-memory mapping.

use super::error::{HParamsError, Result};
use log::{info, warn};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Prefix marking anchor-definition groups that never enter the mapping.
pub const ANCHOR_PREFIX: &str = "__CB";

/// Matches the newline preceding a top-level `key:` line. Chunk boundaries
/// for the group splitter.
static GROUP_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[^ \n].*?:.*?\n").expect("group start regex"));

/// YAML hyperparameter file with a preserved textual representation
#[derive(Debug)]
pub struct YamlHParams {
    yaml_path: PathBuf,
    project_dir: PathBuf,
    string_rep: String,
    groups: Mapping,
}

impl YamlHParams {
    /// Load a hyperparameter file, keeping its raw text verbatim
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml_path = path.as_ref().to_path_buf();
        if !yaml_path.exists() {
            return Err(HParamsError::MissingFile(yaml_path));
        }
        let string_rep = std::fs::read_to_string(&yaml_path)?;
        let groups = parse_groups(&string_rep)?;
        let project_dir = yaml_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        info!("YAML path:    {}", yaml_path.display());
        Ok(Self {
            yaml_path,
            project_dir,
            string_rep,
            groups,
        })
    }

    /// Path of the loaded file
    pub fn yaml_path(&self) -> &Path {
        &self.yaml_path
    }

    /// Directory containing the loaded file (the project directory)
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// The raw textual representation
    pub fn string_rep(&self) -> &str {
        &self.string_rep
    }

    /// Number of groups in the mapping
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the mapping holds no groups
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Parsed value of one group
    pub fn get(&self, group: &str) -> Option<&Value> {
        self.groups.get(Value::String(group.to_string()))
    }

    /// The full parsed mapping, anchor-definition groups excluded
    pub fn mapping(&self) -> &Mapping {
        &self.groups
    }

    /// Whether a group of this name exists in the mapping
    pub fn has_group(&self, group: &str) -> bool {
        self.get(group).is_some()
    }

    /// Names of all groups, in file order
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().filter_map(Value::as_str).collect()
    }

    /// Raw text of one group, leading blank lines stripped
    pub fn group_text(&self, group: &str) -> Result<String> {
        let chunk = self.chunk_of(group)?;
        Ok(strip_chunk(chunk).to_string())
    }

    /// Deserialize one group into a typed view
    pub fn parse_group<T: DeserializeOwned>(&self, group: &str) -> Result<T> {
        let value = self
            .get(group)
            .cloned()
            .ok_or_else(|| HParamsError::UnknownGroup(group.to_string()))?;
        Ok(serde_yaml::from_value(value)?)
    }

    /// Append a new top-level group given as YAML text
    pub fn add_group(&mut self, yaml_text: &str) -> Result<()> {
        let name = yaml_text
            .trim_start_matches([' ', '\n'])
            .split(':')
            .next()
            .unwrap_or("")
            .to_string();
        if name.is_empty() {
            return Err(HParamsError::InvalidGroupText(yaml_text.to_string()));
        }
        let parsed: Mapping = serde_yaml::from_str(yaml_text)?;
        let value = parsed
            .get(Value::String(name.clone()))
            .cloned()
            .ok_or_else(|| HParamsError::InvalidGroupText(yaml_text.to_string()))?;

        if !name.starts_with(ANCHOR_PREFIX) {
            self.groups.insert(Value::String(name), value);
        }
        self.string_rep.push('\n');
        self.string_rep.push_str(yaml_text);
        Ok(())
    }

    /// Remove a group from both the text and the mapping
    pub fn delete_group(&mut self, group: &str) -> Result<()> {
        let stripped = self.group_text(group)?;
        self.string_rep = self.string_rep.replacen(&stripped, "", 1);
        self.groups
            .remove(Value::String(group.to_string()))
            .ok_or_else(|| HParamsError::UnknownGroup(group.to_string()))?;
        Ok(())
    }

    /// Search every group for `key`. Warns when the key appears in more than
    /// one group; returns the first hit in file order.
    pub fn get_from_anywhere(&self, key: &str) -> Option<&Value> {
        let key = Value::String(key.to_string());
        let mut found: Vec<(&str, &Value)> = Vec::new();
        for (name, value) in &self.groups {
            if let (Some(name), Some(map)) = (name.as_str(), value.as_mapping()) {
                if let Some(v) = map.get(&key) {
                    found.push((name, v));
                }
            }
        }
        if found.len() > 1 {
            let names: Vec<&str> = found.iter().map(|(g, _)| *g).collect();
            warn!("Found key '{:?}' in multiple groups ({names:?})", key);
        }
        found.first().map(|(_, v)| *v)
    }

    /// Set `key` in `group`, editing the raw text in place.
    ///
    /// Without `overwrite` the value is only written when the key is absent
    /// or currently null/false. Returns whether a write happened.
    pub fn set_value(&mut self, group: &str, key: &str, value: Value, overwrite: bool) -> Result<bool> {
        let map = self
            .groups
            .get_mut(Value::String(group.to_string()))
            .ok_or_else(|| HParamsError::UnknownGroup(group.to_string()))?
            .as_mapping_mut()
            .ok_or_else(|| HParamsError::NotAMapping(group.to_string()))?;

        let current = map.get(Value::String(key.to_string())).cloned();
        let unset = matches!(current, None | Some(Value::Null) | Some(Value::Bool(false)));
        if !unset && !overwrite {
            info!(
                "Attribute '{key}' in group '{group}' already set with value '{}'",
                render_scalar(current.as_ref().unwrap_or(&Value::Null))?
            );
            return Ok(false);
        }

        let rendered = render_scalar(&value)?;
        info!("Setting value '{rendered}' in group '{group}' with name '{key}'");
        map.insert(Value::String(key.to_string()), value);

        let chunk = self.chunk_of(group)?.to_string();
        let pattern = Regex::new(&format!(r"{}:[ ]+(.*)\n", regex::escape(key)))?;
        let mut replaced_any = false;
        let new_chunk = pattern
            .replace_all(&chunk, |caps: &regex::Captures<'_>| {
                replaced_any = true;
                let whole = caps.get(0).map_or("", |m| m.as_str());
                let old = caps.get(1).map_or("", |m| m.as_str());
                if old.is_empty() {
                    format!("{key}: {rendered}\n")
                } else {
                    whole.replacen(old, &rendered, 1)
                }
            })
            .into_owned();

        if replaced_any {
            self.string_rep = self.string_rep.replacen(&chunk, &new_chunk, 1);
        } else {
            // Key has no line of its own in this group (new key, or value
            // inherited through an anchor merge). Append an explicit line at
            // the group's established indentation.
            let core = chunk.trim_matches('\n');
            let indent = core
                .lines()
                .skip(1)
                .find(|l| !l.trim().is_empty())
                .map(|l| l.len() - l.trim_start().len())
                .unwrap_or(2);
            let field = format!("{}{}: {}", " ".repeat(indent), key, rendered);
            let appended = format!("\n{core}\n{field}\n");
            self.string_rep = self.string_rep.replacen(&chunk, &appended, 1);
        }
        Ok(true)
    }

    /// Write the raw text back to the loaded path
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.yaml_path)
    }

    /// Write the raw text to an arbitrary path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        info!(
            "Saving current YAML configuration to {}",
            path.as_ref().display()
        );
        std::fs::write(path, &self.string_rep)?;
        Ok(())
    }

    /// Re-parse the raw text the way `load` does. The result must equal the
    /// in-memory mapping after any sequence of mutating calls.
    pub fn reparsed(&self) -> Result<Mapping> {
        parse_groups(&self.string_rep)
    }

    /// Whether the raw text and the in-memory mapping agree
    pub fn is_consistent(&self) -> Result<bool> {
        Ok(self.reparsed()? == self.groups)
    }

    fn group_chunks(&self) -> Vec<&str> {
        let mut chunks = Vec::new();
        let mut start = 0usize;
        for m in GROUP_START.find_iter(&self.string_rep) {
            chunks.push(&self.string_rep[start..m.start()]);
            start = m.start();
        }
        chunks.push(&self.string_rep[start..]);
        chunks
    }

    fn chunk_of(&self, group: &str) -> Result<&str> {
        self.group_chunks()
            .into_iter()
            .find(|c| chunk_group_name(c) == Some(group))
            .ok_or_else(|| HParamsError::UnknownGroup(group.to_string()))
    }
}

/// Parse raw YAML text into the group mapping, resolving anchor merges and
/// dropping `__CB`-prefixed groups.
fn parse_groups(text: &str) -> Result<Mapping> {
    let mut doc: Value = serde_yaml::from_str(text)?;
    doc.apply_merge()?;
    let mut groups = Mapping::new();
    if let Some(mapping) = doc.as_mapping() {
        for (k, v) in mapping {
            let keep = k.as_str().map_or(true, |s| !s.starts_with(ANCHOR_PREFIX));
            if keep {
                groups.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(groups)
}

/// Group name announced by a text chunk: the key of the first line that is
/// neither blank nor a comment.
fn chunk_group_name(chunk: &str) -> Option<&str> {
    for line in chunk.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        return trimmed.split(':').next();
    }
    None
}

fn strip_chunk(chunk: &str) -> &str {
    chunk.trim_start_matches('\n').trim_start_matches(' ')
}

/// Render a scalar the way it should appear on a `key: value` line
fn render_scalar(value: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?.trim_end().to_string())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture() -> YamlHParams {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"fit:\n  n_epochs: 40\n  batch_size: 8\n\nbuild:\n  dim: 128\n")
            .unwrap();
        let hp = YamlHParams::load(file.path()).unwrap();
        // Keep the file alive past load; contents already read
        std::mem::forget(file);
        hp
    }

    proptest! {
        /// Text and mapping stay consistent for any appended key/value
        #[test]
        fn set_value_keeps_text_consistent(
            key in "[a-z][a-z_]{0,11}",
            value in 0i64..100_000,
        ) {
            prop_assume!(key != "n_epochs" && key != "batch_size" && key != "dim");
            let mut hp = fixture();
            hp.set_value("fit", &key, Value::from(value), false).unwrap();
            prop_assert!(hp.is_consistent().unwrap());
        }

        /// Overwriting an existing key never changes the group count
        #[test]
        fn set_value_preserves_group_count(value in 1i64..512) {
            let mut hp = fixture();
            let before = hp.len();
            hp.set_value("fit", "batch_size", Value::from(value), true).unwrap();
            prop_assert_eq!(hp.len(), before);
            prop_assert!(hp.is_consistent().unwrap());
        }
    }
}
