use crate::identity::ModIdentity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

/// One row of the community translation catalog CSV, as produced by
/// the external catalog scraper. Rows arrive newest upload first.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "File ID")]
    pub file_id: String,
    #[serde(rename = "MOD ID")]
    pub mod_id: String,
    #[serde(rename = "MOD Name")]
    pub mod_name: String,
    #[serde(rename = "JP-File-Upload-Date", default)]
    pub uploaded_at: String,
}

/// Reads the catalog CSV. Rows without a file id are skipped; a
/// malformed row fails the load since a truncated catalog would make
/// the matcher silently miss translations.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open catalog {}", path.display()))?;

    let mut entries = Vec::new();
    for row in reader.deserialize() {
        let entry: CatalogEntry = row.context("parse catalog row")?;
        if entry.file_id.trim().is_empty() {
            continue;
        }
        entries.push(entry);
    }
    info!(rows = entries.len(), "loaded translation catalog");
    Ok(entries)
}

/// Which pack file id was last applied to each mod. JSON map keyed by
/// sanitized mod id.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusLedger {
    #[serde(flatten)]
    entries: HashMap<String, AppliedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedEntry {
    pub applied_file_id: String,
    pub applied_date: String,
    pub mod_name: String,
    pub mod_type: String,
}

impl StatusLedger {
    /// A missing or unreadable ledger starts empty rather than failing
    /// the run; the worst case is re-applying a pack.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!("status ledger unreadable, starting fresh: {err}");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create status dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize status ledger")?;
        fs::write(path, raw).context("write status ledger")?;
        Ok(())
    }

    pub fn is_applied(&self, mod_id: &str, file_id: &str) -> bool {
        self.entries
            .get(mod_id)
            .map(|entry| entry.applied_file_id == file_id)
            .unwrap_or(false)
    }

    pub fn record(&mut self, mod_id: &str, file_id: &str, mod_name: &str, mod_type: &str) {
        let applied_date = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        self.entries.insert(
            mod_id.to_string(),
            AppliedEntry {
                applied_file_id: file_id.to_string(),
                applied_date,
                mod_name: mod_name.to_string(),
                mod_type: mod_type.to_string(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A catalog row paired with the installed mod it applies to.
#[derive(Debug, Clone)]
pub struct Applicable {
    pub entry: CatalogEntry,
    pub target: ModIdentity,
}

/// Matches catalog rows against installed mods. Rows are scanned in
/// file order (newest upload first); the first row per mod id wins and
/// rows whose file id the ledger already records are skipped. When a
/// mod id is installed in several locations the first scanned location
/// is the overlay target.
pub fn find_applicable(
    installed: &[ModIdentity],
    catalog: &[CatalogEntry],
    ledger: &StatusLedger,
) -> Vec<Applicable> {
    let mut by_id: HashMap<&str, &ModIdentity> = HashMap::new();
    for unit in installed {
        by_id.entry(&unit.id).or_insert(unit);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for entry in catalog {
        let Some(target) = by_id.get(entry.mod_id.as_str()) else {
            continue;
        };
        if !seen.insert(entry.mod_id.as_str()) {
            continue;
        }
        if ledger.is_applied(&entry.mod_id, &entry.file_id) {
            info!(
                mod_id = %entry.mod_id,
                file_id = %entry.file_id,
                "latest translation already applied"
            );
            continue;
        }
        out.push(Applicable {
            entry: entry.clone(),
            target: (*target).clone(),
        });
    }
    info!(applicable = out.len(), "matched catalog against installed mods");
    out
}
