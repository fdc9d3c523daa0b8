use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;

pub const GENERATION_PREFIX: &str = "backup_";

/// Directory name for a generation created at `moment`, e.g.
/// `backup_20240131_154500`. Names sort lexicographically by creation
/// time, which is what `list_generations` relies on.
pub fn generation_name(moment: OffsetDateTime) -> Result<String> {
    let format =
        time::macros::format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = moment.format(&format).context("format generation timestamp")?;
    Ok(format!("{GENERATION_PREFIX}{stamp}"))
}

fn is_generation_name(name: &str) -> bool {
    let Some(stamp) = name.strip_prefix(GENERATION_PREFIX) else {
        return false;
    };
    let bytes = stamp.as_bytes();
    bytes.len() == 15
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 8 { *b == b'_' } else { b.is_ascii_digit() })
}

/// Existing generation directories under `backup_root`, newest first.
/// Entries that do not match the naming convention are ignored, as is
/// a missing backup root.
pub fn list_generations(backup_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(backup_root) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_generation_name(name))
        .collect();
    names.sort();
    names.reverse();

    names.into_iter().map(|name| backup_root.join(name)).collect()
}

/// Every historical snapshot path per mod id, collected from a set of
/// generation directories. Each generation holds one directory level
/// per source label, then one per mod id; every `(id, path)` pair is
/// recorded, so an id that appears in several generations (or under
/// several sources) carries several candidate paths to compare against,
/// in the order the generations were given (newest first).
#[derive(Debug, Default)]
pub struct GenerationIndex {
    by_id: HashMap<String, Vec<PathBuf>>,
}

impl GenerationIndex {
    pub fn build(generations: &[PathBuf]) -> Self {
        let mut by_id: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for generation in generations {
            let Ok(sources) = fs::read_dir(generation) else {
                continue;
            };
            for source in sources.filter_map(|entry| entry.ok()) {
                let source_path = source.path();
                if !source_path.is_dir() {
                    continue;
                }
                let Ok(mods) = fs::read_dir(&source_path) else {
                    continue;
                };
                for entry in mods.filter_map(|entry| entry.ok()) {
                    let path = entry.path();
                    if !path.is_dir() {
                        continue;
                    }
                    if let Ok(id) = entry.file_name().into_string() {
                        by_id.entry(id).or_default().push(path);
                    }
                }
            }
        }
        Self { by_id }
    }

    pub fn historical_paths(&self, id: &str) -> &[PathBuf] {
        self.by_id.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn unique_ids(&self) -> usize {
        self.by_id.len()
    }
}
