use crate::{
    compare::directories_equal,
    generations::GenerationIndex,
    identity::ModIdentity,
    progress::ProgressSink,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::info;

/// Terminal decision for one mod in one backup run. Exactly one action
/// follows from each: skip, skip, or copy-and-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Content matches some historical generation.
    Unchanged,
    /// Content matches a copy already taken earlier in this run.
    Duplicate,
    NeedsBackup,
}

/// Source paths already copied into the generation being built,
/// per mod id. Populated as the run progresses, so a later unit can
/// match an earlier one but never the reverse.
#[derive(Debug, Default)]
pub struct CopiedVersions {
    by_id: HashMap<String, Vec<PathBuf>>,
}

impl CopiedVersions {
    pub fn record(&mut self, id: &str, source_path: PathBuf) {
        self.by_id.entry(id.to_string()).or_default().push(source_path);
    }

    pub fn paths(&self, id: &str) -> &[PathBuf] {
        self.by_id.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Two-phase check: history first (newest generation first, stop at
/// the first match), then copies made earlier in this run. The equality
/// engine fails soft, so classification always reaches a terminal
/// state.
pub fn classify(
    unit: &ModIdentity,
    history: &GenerationIndex,
    copied: &CopiedVersions,
    progress: &dyn ProgressSink,
) -> Classification {
    let historical = history.historical_paths(&unit.id);
    for (index, old_path) in historical.iter().enumerate() {
        progress.set_progress(&format!(
            "checking backup {}/{}: {}",
            index + 1,
            historical.len(),
            short_name(old_path),
        ));
        if directories_equal(&unit.path, old_path) {
            info!(id = %unit.id, historical = %old_path.display(), "matched historical snapshot");
            return Classification::Unchanged;
        }
    }

    let earlier = copied.paths(&unit.id);
    for (index, copied_path) in earlier.iter().enumerate() {
        progress.set_progress(&format!(
            "checking this run's copies {}/{}",
            index + 1,
            earlier.len(),
        ));
        if directories_equal(&unit.path, copied_path) {
            info!(id = %unit.id, duplicate_of = %copied_path.display(), "duplicate within run");
            return Classification::Duplicate;
        }
    }

    Classification::NeedsBackup
}

fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generations::GenerationIndex, identity::ModSource, progress::NullProgress};
    use std::fs;

    fn unit(id: &str, path: PathBuf) -> ModIdentity {
        ModIdentity {
            id: id.to_string(),
            path,
            source: ModSource::Workshop,
            display_name: format!("{id} (Workshop)"),
        }
    }

    fn tree_with(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent");
        }
        fs::write(&path, contents).expect("write");
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_700_000_000, 0))
            .expect("mtime");
    }

    #[test]
    fn matching_history_short_circuits_to_unchanged() {
        let base = tempfile::tempdir().expect("tempdir");
        let current = base.path().join("current");
        tree_with(&current, "a.txt", b"same");
        let generation = base.path().join("backup_20240101_000000");
        let historical = generation.join("Workshop").join("123");
        tree_with(&historical, "a.txt", b"same");

        let index = GenerationIndex::build(std::slice::from_ref(&generation));
        let copied = CopiedVersions::default();
        let result = classify(&unit("123", current), &index, &copied, &NullProgress);
        assert_eq!(result, Classification::Unchanged);
    }

    #[test]
    fn run_duplicate_detected_after_history_misses() {
        let base = tempfile::tempdir().expect("tempdir");
        let current = base.path().join("current");
        tree_with(&current, "a.txt", b"same");
        let earlier = base.path().join("earlier");
        tree_with(&earlier, "a.txt", b"same");

        let index = GenerationIndex::default();
        let mut copied = CopiedVersions::default();
        copied.record("123", earlier);
        let result = classify(&unit("123", current), &index, &copied, &NullProgress);
        assert_eq!(result, Classification::Duplicate);
    }

    #[test]
    fn no_match_means_needs_backup() {
        let base = tempfile::tempdir().expect("tempdir");
        let current = base.path().join("current");
        tree_with(&current, "a.txt", b"fresh content");
        let generation = base.path().join("backup_20240101_000000");
        let historical = generation.join("Workshop").join("123");
        tree_with(&historical, "a.txt", b"old content!!");

        let index = GenerationIndex::build(std::slice::from_ref(&generation));
        let copied = CopiedVersions::default();
        let result = classify(&unit("123", current), &index, &copied, &NullProgress);
        assert_eq!(result, Classification::NeedsBackup);
    }

    #[test]
    fn copies_under_other_ids_are_not_consulted() {
        let base = tempfile::tempdir().expect("tempdir");
        let current = base.path().join("current");
        tree_with(&current, "a.txt", b"same");
        let earlier = base.path().join("earlier");
        tree_with(&earlier, "a.txt", b"same");

        let index = GenerationIndex::default();
        let mut copied = CopiedVersions::default();
        copied.record("456", earlier);
        let result = classify(&unit("123", current), &index, &copied, &NullProgress);
        assert_eq!(result, Classification::NeedsBackup);
    }
}
