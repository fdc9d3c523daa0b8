use locsmith::{
    backup::{copy_tree, run_backup, SourceLocation},
    generations::list_generations,
    identity::ModSource,
    progress::NullProgress,
};
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

struct Fixture {
    _base: tempfile::TempDir,
    workshop: PathBuf,
    local: PathBuf,
    backup_root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let base = tempfile::tempdir().expect("tempdir");
        let workshop = base.path().join("workshop");
        let local = base.path().join("local");
        let backup_root = base.path().join("japanized").join("backup");
        fs::create_dir_all(&workshop).expect("workshop");
        fs::create_dir_all(&local).expect("local");
        Self {
            _base: base,
            workshop,
            local,
            backup_root,
        }
    }

    fn sources(&self) -> Vec<SourceLocation> {
        vec![
            SourceLocation {
                source: ModSource::Workshop,
                root: self.workshop.clone(),
            },
            SourceLocation {
                source: ModSource::Local,
                root: self.local.clone(),
            },
        ]
    }

    fn run(&self) -> locsmith::backup::BackupSummary {
        run_backup(&self.sources(), &self.backup_root, &NullProgress).expect("backup run")
    }

    fn generations(&self) -> Vec<PathBuf> {
        list_generations(&self.backup_root)
    }
}

fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent");
    }
    fs::write(&path, contents).expect("write");
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_700_000_000, 0))
        .expect("mtime");
}

fn write_mod(root: &Path, id: &str, name: &str, data: &[u8]) {
    let mod_root = root.join(id);
    write_file(
        &mod_root,
        "About/About.xml",
        format!("<ModMetaData><name>{name}</name></ModMetaData>").as_bytes(),
    );
    write_file(&mod_root, "Defs/data.xml", data);
}

/// Generation names have one-second resolution; consecutive runs in a
/// test need distinct timestamps.
fn next_second() {
    thread::sleep(Duration::from_millis(1100));
}

#[test]
fn first_run_then_idempotent_then_update() {
    let fx = Fixture::new();
    write_mod(&fx.workshop, "123", "Foo", b"<Defs>v1</Defs>");

    // First run: one new mod, copied under Workshop/<id>.
    let summary = fx.run();
    assert_eq!(summary.new_mods, ["Foo (Workshop)"]);
    assert_eq!(summary.updated_mods.len(), 0);
    assert_eq!(summary.unchanged, 0);
    let generations = fx.generations();
    assert_eq!(generations.len(), 1);
    let copy_root = generations[0].join("Workshop").join("123");
    assert!(copy_root.join("About/About.xml").exists());
    assert!(copy_root.join("Defs/data.xml").exists());
    assert_eq!(summary.generation.as_deref(), Some(generations[0].as_path()));

    // Second run with no changes: nothing copied, no generation kept.
    next_second();
    let summary = fx.run();
    assert_eq!(summary.copied(), 0);
    assert_eq!(summary.unchanged, 1);
    assert!(summary.generation.is_none());
    assert_eq!(fx.generations().len(), 1);
    assert!(summary.report_text().contains("No new backup"));

    // Third run after a content change: one updated mod, new generation.
    next_second();
    write_file(
        &fx.workshop.join("123"),
        "Defs/data.xml",
        b"<Defs>v2 with more text</Defs>",
    );
    let summary = fx.run();
    assert_eq!(summary.updated_mods, ["Foo (Workshop)"]);
    assert_eq!(summary.new_mods.len(), 0);
    let generations = fx.generations();
    assert_eq!(generations.len(), 2);
    // Newest first; the fresh copy holds the new content.
    let fresh = generations[0].join("Workshop/123/Defs/data.xml");
    assert_eq!(fs::read(&fresh).expect("read"), b"<Defs>v2 with more text</Defs>");
}

#[test]
fn same_id_in_both_sources_with_identical_content_is_copied_once() {
    let fx = Fixture::new();
    write_mod(&fx.workshop, "777", "Twin", b"<Defs>same</Defs>");
    // Identical copy under the local source; copy_tree preserves
    // mtimes so the trees fingerprint equal.
    copy_tree(&fx.workshop.join("777"), &fx.local.join("777")).expect("clone");

    let summary = fx.run();
    assert_eq!(summary.new_mods, ["Twin (Workshop)"]);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.unchanged, 0);

    let generations = fx.generations();
    assert_eq!(generations.len(), 1);
    assert!(generations[0].join("Workshop/777").is_dir());
    assert!(!generations[0].join("Local/777").exists());
}

#[test]
fn same_id_with_diverged_content_is_copied_from_both_sources() {
    let fx = Fixture::new();
    write_mod(&fx.workshop, "888", "Fork", b"<Defs>workshop flavor</Defs>");
    write_mod(&fx.local, "888", "Fork", b"<Defs>local flavor!!!</Defs>");

    let summary = fx.run();
    assert_eq!(summary.new_mods.len(), 2);
    assert_eq!(summary.duplicates, 0);
    let generations = fx.generations();
    assert!(generations[0].join("Workshop/888").is_dir());
    assert!(generations[0].join("Local/888").is_dir());
}

#[test]
fn unchanged_mods_match_any_older_generation() {
    let fx = Fixture::new();
    write_mod(&fx.workshop, "123", "Foo", b"<Defs>v1</Defs>");
    fx.run();

    // Add a second mod; the next run copies only the new one.
    next_second();
    write_mod(&fx.workshop, "456", "Bar", b"<Defs>other</Defs>");
    let summary = fx.run();
    assert_eq!(summary.new_mods, ["Bar (Workshop)"]);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(fx.generations().len(), 2);

    // Both mods unchanged now, even though 123's only snapshot lives
    // two generations back.
    next_second();
    let summary = fx.run();
    assert_eq!(summary.copied(), 0);
    assert_eq!(summary.unchanged, 2);
    assert_eq!(fx.generations().len(), 2);
}

#[test]
fn sanitized_ids_are_used_for_generation_folders() {
    let fx = Fixture::new();
    write_mod(&fx.local, "weird:mod?name", "Weird", b"<Defs>x</Defs>");

    let summary = fx.run();
    assert_eq!(summary.new_mods, ["Weird (Local)"]);
    let generations = fx.generations();
    assert!(generations[0].join("Local/weird_mod_name").is_dir());
}

#[test]
fn unreadable_source_location_is_skipped_not_fatal() {
    let fx = Fixture::new();
    write_mod(&fx.workshop, "123", "Foo", b"<Defs>v1</Defs>");
    let sources = vec![
        SourceLocation {
            source: ModSource::Workshop,
            root: fx.workshop.clone(),
        },
        SourceLocation {
            source: ModSource::Local,
            root: fx.local.join("does-not-exist"),
        },
    ];

    let summary = run_backup(&sources, &fx.backup_root, &NullProgress).expect("run");
    assert_eq!(summary.new_mods, ["Foo (Workshop)"]);
}
