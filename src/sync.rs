use crate::{
    backup::{copy_tree, scan_sources},
    catalog::{self, StatusLedger},
    config::{AppConfig, LANG_DIR_NAME},
    fetch::{self, FetchError},
    identity::ModIdentity,
    progress::ProgressSink,
};
use anyhow::{anyhow, bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of a batch apply run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncSummary {
    pub fn report_text(&self) -> String {
        if self.applied.is_empty() && self.failed.is_empty() {
            return "No new translations to apply.".to_string();
        }
        let mut lines = vec![
            "Translation sync finished.".to_string(),
            String::new(),
            format!("Applied: {}", self.applied.len()),
            format!("Failed: {}", self.failed.len()),
        ];
        if !self.applied.is_empty() {
            lines.push(String::new());
            lines.push("--- Applied ---".to_string());
            lines.push(self.applied.join(", "));
        }
        if !self.failed.is_empty() {
            lines.push(String::new());
            lines.push("--- Failed (see log) ---".to_string());
            lines.push(self.failed.join(", "));
        }
        lines.join("\n")
    }
}

/// Finds the language folder inside an unpacked archive. Exact variant
/// names win, then a case-insensitive match, then any folder starting
/// with the primary language name (packs use decorations like
/// `Japanese (日本語)`).
pub fn find_language_dir(root: &Path, variants: &[String]) -> Option<PathBuf> {
    let primary_lower = variants.first()?.to_lowercase();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if variants.iter().any(|variant| variant == name) {
            return Some(entry.path().to_path_buf());
        }
        if variants
            .iter()
            .any(|variant| variant.eq_ignore_ascii_case(name))
        {
            return Some(entry.path().to_path_buf());
        }
        if name.to_lowercase().starts_with(&primary_lower) {
            return Some(entry.path().to_path_buf());
        }
    }
    None
}

/// Overlays `pack_lang_dir` into the mod as
/// `<mod>/Languages/<language>`. An existing language folder is moved
/// aside into `old_dir` first (replacing any earlier displaced copy)
/// so a bad pack never costs the previous translation.
pub fn overlay_language_dir(
    mod_root: &Path,
    mod_id: &str,
    pack_lang_dir: &Path,
    language: &str,
    old_dir: &Path,
) -> Result<()> {
    let languages_root = mod_root.join(LANG_DIR_NAME);
    let dest = languages_root.join(language);

    if dest.exists() {
        fs::create_dir_all(old_dir).context("create old dir")?;
        let displaced = old_dir.join(format!("{mod_id}_old_{language}"));
        if displaced.exists() {
            fs::remove_dir_all(&displaced).context("clear displaced copy")?;
        }
        rename_or_copy(&dest, &displaced)
            .with_context(|| format!("displace {}", dest.display()))?;
        info!(mod_id, "existing language folder moved to {}", displaced.display());
    }

    fs::create_dir_all(&languages_root).context("create Languages dir")?;
    copy_tree(pack_lang_dir, &dest)
        .with_context(|| format!("copy pack into {}", dest.display()))?;
    info!(mod_id, dest = %dest.display(), "language folder applied");
    Ok(())
}

/// Prefers a cheap rename; falls back to copy-and-delete when the
/// destination is on another filesystem.
fn rename_or_copy(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).context("create dest parent")?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    copy_tree(source, dest)?;
    fs::remove_dir_all(source).context("remove source after copy")?;
    Ok(())
}

/// Installs one localization pack from a pasted URL: download, unpack,
/// locate the language folder, overlay it into the workshop mod. When
/// the mod folder is missing the flow blocks on a retry prompt so the
/// user can subscribe first; this is the one deliberately blocking
/// interaction in the tool.
pub fn install_from_url(
    config: &AppConfig,
    url: &str,
    progress: &dyn ProgressSink,
) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        bail!("no URL given; paste a localization pack URL");
    }
    let mod_id = fetch::extract_mod_id(url)
        .ok_or_else(|| anyhow!("could not find a mod id in the URL"))?;
    let url = fetch::fix_url(url, &config.catalog_base_url);

    progress.set_status(&format!("Mod {mod_id}: downloading pack..."));
    let tmp_dir = config.tmp_dir();
    fs::create_dir_all(&tmp_dir).context("create tmp dir")?;
    let archive = tmp_dir.join(format!("{mod_id}_download.zip"));

    loop {
        match fetch::download_pack(&url, &mod_id, &config.catalog_base_url, &archive) {
            Ok(()) => break,
            Err(err) if err.is_retryable() => {
                warn!("download failed: {err}");
                if !progress.popup_retry_cancel(&format!("Download failed.\n{err}")) {
                    bail!("download cancelled");
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mod_root = config.workshop_dir.join(&mod_id);
    while !mod_root.is_dir() {
        progress.set_status("Mod folder not found.");
        let retry = progress.popup_retry_cancel(&format!(
            "Mod {mod_id} is not installed.\nSubscribe to it on the Workshop, wait for \
             Steam to download it, then retry."
        ));
        if !retry {
            bail!("mod {mod_id} is not installed");
        }
        progress.set_status("Re-checking mod folder...");
    }

    let name = apply_pack_archive(config, &archive, &mod_id, &mod_root, progress)?;
    progress.set_status("Done.");
    Ok(name)
}

/// Applies every new catalog translation to the installed mods it
/// matches. Per-pack failures are recorded and skipped; the run always
/// ends with one summary.
pub fn apply_all(config: &AppConfig, progress: &dyn ProgressSink) -> Result<SyncSummary> {
    progress.set_status("Loading translation catalog...");
    let catalog_entries = catalog::load_catalog(&config.catalog_path())?;
    if catalog_entries.is_empty() {
        bail!("the translation catalog is empty; fetch it first");
    }

    progress.set_status("Scanning installed mods...");
    let installed = scan_sources(&config.source_locations());
    if installed.is_empty() {
        bail!("no installed mods found; check the configured mod directories");
    }

    let mut ledger = StatusLedger::load(&config.status_path());
    let applicable = catalog::find_applicable(&installed, &catalog_entries, &ledger);
    if applicable.is_empty() {
        return Ok(SyncSummary::default());
    }

    let mut summary = SyncSummary::default();
    let total = applicable.len();
    for (index, item) in applicable.iter().enumerate() {
        let label = &item.target.display_name;
        progress.set_status(&format!("({}/{total}) Applying: {label}", index + 1));
        match apply_catalog_entry(config, item, &mut ledger, progress) {
            Ok(()) => summary.applied.push(label.clone()),
            Err(err) => {
                warn!("apply failed for {}: {err:#}", item.entry.mod_id);
                summary.failed.push(label.clone());
            }
        }
    }

    ledger.save(&config.status_path())?;
    info!(
        applied = summary.applied.len(),
        failed = summary.failed.len(),
        "translation sync finished"
    );
    Ok(summary)
}

/// Checks what a batch apply would do, without touching any mod.
pub fn check_applicable(config: &AppConfig, progress: &dyn ProgressSink) -> Result<String> {
    progress.set_status("Loading translation catalog...");
    let catalog_entries = catalog::load_catalog(&config.catalog_path())?;
    progress.set_status("Scanning installed mods...");
    let installed = scan_sources(&config.source_locations());
    let ledger = StatusLedger::load(&config.status_path());

    let applicable = catalog::find_applicable(&installed, &catalog_entries, &ledger);
    if applicable.is_empty() {
        return Ok("No new translations apply to the installed mods.".to_string());
    }

    let mut lines = vec![format!("{} translation(s) can be applied:", applicable.len())];
    for item in applicable.iter().take(10) {
        lines.push(format!(
            "  {} (mod {}, file {})",
            item.target.display_name, item.entry.mod_id, item.entry.file_id
        ));
    }
    if applicable.len() > 10 {
        lines.push(format!("  ... and {} more", applicable.len() - 10));
    }
    lines.push(String::new());
    lines.push("Run `locsmith apply` to apply them.".to_string());
    Ok(lines.join("\n"))
}

fn apply_catalog_entry(
    config: &AppConfig,
    item: &catalog::Applicable,
    ledger: &mut StatusLedger,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let entry = &item.entry;
    let url = fetch::download_url(&config.catalog_base_url, &entry.file_id, &entry.mod_id);
    let tmp_dir = config.tmp_dir();
    fs::create_dir_all(&tmp_dir).context("create tmp dir")?;
    let archive = tmp_dir.join(format!("{}_download.zip", entry.file_id));

    progress.set_progress("downloading...");
    fetch::download_pack(&url, &entry.mod_id, &config.catalog_base_url, &archive)?;

    apply_pack_archive(config, &archive, &entry.mod_id, &item.target.path, progress)?;
    ledger.record(
        &entry.mod_id,
        &entry.file_id,
        &entry.mod_name,
        item.target.source.label(),
    );
    Ok(())
}

/// Shared tail of both install flows: verify, unpack, locate the
/// language folder, overlay, then park the consumed archive under
/// `old/` and drop the unpack directory.
fn apply_pack_archive(
    config: &AppConfig,
    archive: &Path,
    mod_id: &str,
    mod_root: &Path,
    progress: &dyn ProgressSink,
) -> Result<String> {
    if !fetch::is_zip(archive) {
        let _ = fs::remove_file(archive);
        return Err(FetchError::NotZip.into());
    }

    progress.set_progress("unpacking...");
    let unpack_dir = config.tmp_dir().join(format!("{mod_id}_unpack"));
    fetch::extract_zip(archive, &unpack_dir)?;

    let variants = config.language_search_variants();
    let Some(pack_lang_dir) = find_language_dir(&unpack_dir, &variants) else {
        let _ = fs::remove_dir_all(&unpack_dir);
        bail!("no {} folder found in the pack", config.language_dir);
    };

    progress.set_progress("overlaying language folder...");
    overlay_language_dir(
        mod_root,
        mod_id,
        &pack_lang_dir,
        &config.language_dir,
        &config.old_dir(),
    )?;

    let name = crate::identity::about_name(mod_root).unwrap_or_else(|| mod_id.to_string());

    fs::create_dir_all(config.old_dir()).context("create old dir")?;
    if let Some(file_name) = archive.file_name() {
        let parked = config.old_dir().join(file_name);
        let _ = fs::remove_file(&parked);
        if fs::rename(archive, &parked).is_err() {
            warn!("could not move consumed archive to {}", parked.display());
        }
    }
    if let Err(err) = fs::remove_dir_all(&unpack_dir) {
        warn!("could not remove unpack dir: {err}");
    }

    Ok(name)
}
