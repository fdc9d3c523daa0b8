use crate::{backup::SourceLocation, identity::ModSource};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Persisted app settings. Lives at
/// `<data_local_dir>/locsmith/config.json`; created with defaults on
/// first run so the user has a file to point at their install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Steam Workshop content directory for the game
    /// (`.../steamapps/workshop/content/294100`).
    pub workshop_dir: PathBuf,
    /// Manually installed mods (`.../RimWorld/Mods`).
    pub local_mods_dir: PathBuf,
    /// Root for everything this tool writes: backups, downloaded
    /// packs, displaced language folders, logs.
    pub work_root: PathBuf,
    #[serde(default = "default_language")]
    pub language_dir: String,
    /// Folder names accepted as the target language inside a pack.
    /// Checked before the case-insensitive and prefix fallbacks.
    #[serde(default = "default_language_variants")]
    pub language_variants: Vec<String>,
    #[serde(default = "default_catalog_base")]
    pub catalog_base_url: String,
}

fn default_language() -> String {
    "Japanese".to_string()
}

fn default_language_variants() -> Vec<String> {
    [
        "Japanese",
        "Japanese (日本語)",
        "Japanese(日本語)",
        "Japanese_日本語",
        "Japanese-日本語",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_catalog_base() -> String {
    "https://rimworld.2game.info".to_string()
}

pub const LANG_DIR_NAME: &str = "Languages";

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig {
            workshop_dir: PathBuf::new(),
            local_mods_dir: PathBuf::new(),
            work_root: base_dir.join("work"),
            language_dir: default_language(),
            language_variants: default_language_variants(),
            catalog_base_url: default_catalog_base(),
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(base_dir.join("config.json"), raw).context("write app config")?;
        Ok(())
    }

    /// Scan order matters: Workshop first, then local installs.
    pub fn source_locations(&self) -> Vec<SourceLocation> {
        vec![
            SourceLocation {
                source: ModSource::Workshop,
                root: self.workshop_dir.clone(),
            },
            SourceLocation {
                source: ModSource::Local,
                root: self.local_mods_dir.clone(),
            },
        ]
    }

    pub fn backup_root(&self) -> PathBuf {
        self.work_root.join("backup")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.backup_root().join("logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.work_root.join("tmp")
    }

    /// Holds displaced language folders and consumed archives.
    pub fn old_dir(&self) -> PathBuf {
        self.work_root.join("old")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.logs_dir().join("translation_catalog.csv")
    }

    pub fn status_path(&self) -> PathBuf {
        self.logs_dir().join("applied_status.json")
    }

    /// Variants to try when locating the language folder in a pack.
    /// Always includes the primary language directory name.
    pub fn language_search_variants(&self) -> Vec<String> {
        let mut variants = self.language_variants.clone();
        if !variants.iter().any(|v| v == &self.language_dir) {
            variants.insert(0, self.language_dir.clone());
        }
        variants
    }
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("locsmith"))
}
