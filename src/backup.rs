use crate::{
    classify::{classify, Classification, CopiedVersions},
    generations::{generation_name, list_generations, GenerationIndex},
    identity::{self, ModIdentity, ModSource},
    progress::ProgressSink,
};
use anyhow::{bail, Context, Result};
use filetime::FileTime;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use tracing::{info, warn};
use walkdir::WalkDir;

/// One place mods are discovered in, in scan order.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub source: ModSource,
    pub root: PathBuf,
}

/// Outcome of one backup run, reported exactly once to the user.
#[derive(Debug, Default)]
pub struct BackupSummary {
    pub new_mods: Vec<String>,
    pub updated_mods: Vec<String>,
    pub unchanged: usize,
    pub duplicates: usize,
    /// The generation that was kept, or `None` when nothing changed
    /// and the fresh generation was rolled back.
    pub generation: Option<PathBuf>,
}

impl BackupSummary {
    pub fn copied(&self) -> usize {
        self.new_mods.len() + self.updated_mods.len()
    }

    pub fn report_text(&self) -> String {
        if self.copied() == 0 {
            return "No mods were new or updated.\nNo new backup was created.".to_string();
        }

        let mut lines = vec![
            "Backup complete.".to_string(),
            String::new(),
            format!("New: {}", self.new_mods.len()),
            format!("Updated: {}", self.updated_mods.len()),
            format!("Unchanged: {}", self.unchanged),
        ];
        if self.duplicates > 0 {
            lines.push(format!("Duplicates skipped: {}", self.duplicates));
        }
        if !self.new_mods.is_empty() {
            lines.push(String::new());
            lines.push("--- New mods ---".to_string());
            lines.push(self.new_mods.join(", "));
        }
        if !self.updated_mods.is_empty() {
            lines.push(String::new());
            lines.push("--- Updated mods ---".to_string());
            lines.push(self.updated_mods.join(", "));
        }
        lines.join("\n")
    }
}

/// Runs one full backup pass: scan every source location, compare each
/// mod against history and against copies already taken this run, copy
/// only what changed. A generation that ends up empty is deleted, and
/// any error rolls the half-built generation back before propagating.
pub fn run_backup(
    sources: &[SourceLocation],
    backup_root: &Path,
    progress: &dyn ProgressSink,
) -> Result<BackupSummary> {
    progress.set_status("Preparing backup...");
    fs::create_dir_all(backup_root).context("create backup root")?;

    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let name = generation_name(now)?;
    let new_generation = backup_root.join(&name);
    if new_generation.exists() {
        bail!("backup generation {name} already exists; try again in a moment");
    }
    fs::create_dir(&new_generation).context("create generation dir")?;
    info!(generation = %new_generation.display(), "backup run started");

    match populate_generation(sources, backup_root, &new_generation, progress) {
        Ok(mut summary) => {
            if summary.copied() == 0 {
                info!("no mods changed, removing empty generation");
                progress.set_status("No changes. No backup was created.");
                if let Err(err) = fs::remove_dir_all(&new_generation) {
                    warn!(
                        "failed to remove empty generation {}: {err}",
                        new_generation.display()
                    );
                }
            } else {
                summary.generation = Some(new_generation);
                progress.set_status("Backup complete.");
            }
            info!(
                new = summary.new_mods.len(),
                updated = summary.updated_mods.len(),
                unchanged = summary.unchanged,
                duplicates = summary.duplicates,
                "backup run finished"
            );
            Ok(summary)
        }
        Err(err) => {
            // Partial generations never persist. Deletion failure is
            // logged, not escalated; the run error is the one surfaced.
            if new_generation.exists() {
                if let Err(remove_err) = fs::remove_dir_all(&new_generation) {
                    warn!(
                        "failed to remove partial generation {}: {remove_err}",
                        new_generation.display()
                    );
                }
            }
            progress.set_status("Backup failed.");
            Err(err)
        }
    }
}

fn populate_generation(
    sources: &[SourceLocation],
    backup_root: &Path,
    new_generation: &Path,
    progress: &dyn ProgressSink,
) -> Result<BackupSummary> {
    let units = scan_sources(sources);
    info!(total = units.len(), "scanned mod folders");

    let generations: Vec<PathBuf> = list_generations(backup_root)
        .into_iter()
        .filter(|path| path != new_generation)
        .collect();
    let history = GenerationIndex::build(&generations);
    info!(
        generations = generations.len(),
        unique_ids = history.unique_ids(),
        "indexed historical backups"
    );

    let mut summary = BackupSummary::default();
    let mut copied = CopiedVersions::default();
    let total = units.len();

    for (index, unit) in units.iter().enumerate() {
        progress.set_status(&format!(
            "({}/{total}) Comparing: {}",
            index + 1,
            unit.display_name
        ));
        match classify(unit, &history, &copied, progress) {
            Classification::Unchanged => summary.unchanged += 1,
            Classification::Duplicate => summary.duplicates += 1,
            Classification::NeedsBackup => {
                progress.set_progress("copying...");
                let dest = new_generation.join(unit.source.label()).join(&unit.id);
                copy_tree(&unit.path, &dest)
                    .with_context(|| format!("copy {} into generation", unit.display_name))?;
                copied.record(&unit.id, unit.path.clone());
                if history.contains(&unit.id) {
                    info!(id = %unit.id, "backed up (updated)");
                    summary.updated_mods.push(unit.display_name.clone());
                } else {
                    info!(id = %unit.id, "backed up (new)");
                    summary.new_mods.push(unit.display_name.clone());
                }
            }
        }
    }

    Ok(summary)
}

/// Discovers every mod folder under the configured locations, in scan
/// order. A mod id appearing in more than one location is logged and
/// kept as separate units; each is classified independently.
pub fn scan_sources(sources: &[SourceLocation]) -> Vec<ModIdentity> {
    let mut units = Vec::new();
    for location in sources {
        let Ok(entries) = fs::read_dir(&location.root) else {
            warn!(
                "source location {} is not readable, skipping",
                location.root.display()
            );
            continue;
        };
        let mut found = 0usize;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        for raw_name in names {
            let mod_path = location.root.join(&raw_name);
            let unit = identity::resolve(&raw_name, &mod_path, location.source);
            if unit.id != raw_name {
                info!("sanitized folder name '{raw_name}' -> '{}'", unit.id);
            }
            units.push(unit);
            found += 1;
        }
        info!(
            source = location.source.label(),
            root = %location.root.display(),
            found,
            "scanned source location"
        );
    }

    let mut by_id: HashMap<&str, Vec<&ModIdentity>> = HashMap::new();
    for unit in &units {
        by_id.entry(&unit.id).or_default().push(unit);
    }
    for (id, entries) in &by_id {
        if entries.len() > 1 {
            let sources: Vec<&str> = entries.iter().map(|u| u.source.label()).collect();
            warn!(
                "mod id '{id}' exists in [{}]; each copy is compared independently",
                sources.join(", ")
            );
        }
    }

    units
}

/// Recursive copy that preserves file mtimes, so a copied tree
/// fingerprints equal to its source. Symlinks are not followed and not
/// recreated; mod content is expected to be plain files.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create dir {}", dest.display()))?;
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let rel = entry.path().strip_prefix(source).context("rel path")?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create dir {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} -> {}", entry.path().display(), target.display())
            })?;
            preserve_mtime(entry.path(), &target);
        }
    }
    Ok(())
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    let _ = filetime::set_file_mtime(dest, mtime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use std::io::Write;

    fn write_file(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent");
        }
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(contents).expect("write");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0))
            .expect("mtime");
    }

    #[test]
    fn copy_tree_preserves_content_and_mtime() {
        let base = tempfile::tempdir().expect("tempdir");
        let source = base.path().join("source");
        write_file(&source, "About/About.xml", b"<ModMetaData><name>A</name></ModMetaData>");
        write_file(&source, "Defs/things.xml", b"<Defs/>");

        let dest = base.path().join("dest");
        copy_tree(&source, &dest).expect("copy");
        assert!(crate::compare::directories_equal(&source, &dest));
    }

    #[test]
    fn scan_keeps_duplicate_ids_from_both_sources() {
        let base = tempfile::tempdir().expect("tempdir");
        let workshop = base.path().join("workshop");
        let local = base.path().join("local");
        write_file(&workshop.join("123"), "a.txt", b"workshop copy");
        write_file(&local.join("123"), "a.txt", b"local copy!!!");
        write_file(&local.join("mod:two"), "a.txt", b"needs sanitizing");

        let units = scan_sources(&[
            SourceLocation {
                source: ModSource::Workshop,
                root: workshop,
            },
            SourceLocation {
                source: ModSource::Local,
                root: local,
            },
        ]);
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["123", "123", "mod_two"]);
        assert_eq!(units[0].source, ModSource::Workshop);
        assert_eq!(units[1].source, ModSource::Local);
    }

    #[test]
    fn empty_source_list_reports_no_changes_and_no_generation() {
        let base = tempfile::tempdir().expect("tempdir");
        let backup_root = base.path().join("backup");
        let summary = run_backup(&[], &backup_root, &NullProgress).expect("run");
        assert_eq!(summary.copied(), 0);
        assert!(summary.generation.is_none());
        assert!(list_generations(&backup_root).is_empty());
        assert!(summary.report_text().contains("No new backup"));
    }

    #[test]
    fn report_text_lists_names_and_counts() {
        let summary = BackupSummary {
            new_mods: vec!["Foo (Workshop)".into()],
            updated_mods: vec!["Bar (Local)".into()],
            unchanged: 3,
            duplicates: 1,
            generation: Some(PathBuf::from("/tmp/backup_x")),
        };
        let text = summary.report_text();
        assert!(text.contains("New: 1"));
        assert!(text.contains("Updated: 1"));
        assert!(text.contains("Unchanged: 3"));
        assert!(text.contains("Duplicates skipped: 1"));
        assert!(text.contains("Foo (Workshop)"));
        assert!(text.contains("Bar (Local)"));
    }
}
