use std::{
    fs,
    io,
    path::Path,
    time::Duration,
};
use thiserror::Error;
use tracing::{info, warn};

const USER_AGENT: &str = "locsmith/0.4 (+https://rimworld.2game.info)";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Failures in the download-and-unpack flow. Only a download failure
/// is worth offering a retry for; a bad archive will stay bad.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download failed: {reason}")]
    Download { reason: String },
    #[error("downloaded file is not a ZIP archive")]
    NotZip,
    #[error("archive unpack failed: {reason}")]
    Unpack { reason: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Download { .. })
    }
}

/// Pulls the numeric mod id out of a pack or store page URL
/// (`...detail.php?id=123456`, `...filedetails/?id=123456`).
pub fn extract_mod_id(url: &str) -> Option<String> {
    let mut rest = url;
    while let Some(pos) = rest.find("id=") {
        let tail = &rest[pos + 3..];
        let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            return Some(digits);
        }
        rest = tail;
    }
    None
}

/// Normalizes scheme-relative and site-relative pack URLs against the
/// catalog site.
pub fn fix_url(raw: &str, base: &str) -> String {
    let url = raw.trim();
    if let Some(rest) = url.strip_prefix("//") {
        return format!("https://{rest}");
    }
    if url.starts_with('/') {
        return format!("{}{url}", base.trim_end_matches('/'));
    }
    url.to_string()
}

pub fn download_url(base: &str, file_id: &str, mod_id: &str) -> String {
    format!(
        "{}/jp_download.php?file_id={file_id}&id={mod_id}",
        base.trim_end_matches('/')
    )
}

/// Streams `url` into `dest`. The Referer header points at the mod's
/// catalog page, which the download endpoint requires. On any failure
/// a partial file is removed before the error is returned.
pub fn download_pack(url: &str, mod_id: &str, base: &str, dest: &Path) -> Result<(), FetchError> {
    if let Some(parent) = dest.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return Err(FetchError::Download {
                reason: format!("create download dir: {err}"),
            });
        }
    }

    let referer = format!("{}/detail.php?id={mod_id}", base.trim_end_matches('/'));
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(TRANSFER_TIMEOUT)
        .timeout_write(TRANSFER_TIMEOUT)
        .build();

    let result = agent
        .get(url)
        .set("Referer", &referer)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|err| FetchError::Download {
            reason: err.to_string(),
        })
        .and_then(|response| {
            let mut reader = response.into_reader();
            let mut file = fs::File::create(dest).map_err(|err| FetchError::Download {
                reason: format!("create {}: {err}", dest.display()),
            })?;
            io::copy(&mut reader, &mut file).map_err(|err| FetchError::Download {
                reason: format!("write {}: {err}", dest.display()),
            })?;
            Ok(())
        });

    if let Err(err) = result {
        if dest.exists() {
            if let Err(remove_err) = fs::remove_file(dest) {
                warn!("failed to remove partial download: {remove_err}");
            }
        }
        return Err(err);
    }

    info!(url, dest = %dest.display(), "downloaded pack");
    Ok(())
}

pub fn is_zip(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    zip::ZipArchive::new(file).is_ok()
}

/// Unpacks `archive` into `unpack_dir`, replacing any leftover from a
/// previous attempt.
pub fn extract_zip(archive: &Path, unpack_dir: &Path) -> Result<(), FetchError> {
    if unpack_dir.exists() {
        fs::remove_dir_all(unpack_dir).map_err(|err| FetchError::Unpack {
            reason: format!("clear {}: {err}", unpack_dir.display()),
        })?;
    }

    let file = fs::File::open(archive).map_err(|err| FetchError::Unpack {
        reason: format!("open {}: {err}", archive.display()),
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|_| FetchError::NotZip)?;
    zip.extract(unpack_dir).map_err(|err| FetchError::Unpack {
        reason: err.to_string(),
    })?;

    info!(archive = %archive.display(), "unpacked archive");
    Ok(())
}
