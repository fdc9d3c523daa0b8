use anyhow::{Context, Result};
use blake3::Hasher;
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use tracing::debug;
use walkdir::WalkDir;

/// Files at or below this size contribute content samples to the
/// fingerprint; larger files are fingerprinted by path, size and mtime
/// only. Two large files that differ only in their middle bytes while
/// keeping identical metadata are therefore misjudged equal. The only
/// consequence of the approximation is a skipped backup copy.
const SAMPLE_SIZE_LIMIT: u64 = 1024 * 1024;

/// Bytes read from the head (and tail, when the file is more than
/// twice this long) of each sampled file.
const SAMPLE_CHUNK: u64 = 8192;

/// Returns true iff both paths are directories holding the same set of
/// relative file paths with identical content, within the sampling
/// approximation above. Any I/O trouble during fingerprinting drops
/// down to an exhaustive walk, and trouble there answers "not equal";
/// a spurious extra backup copy is always preferred over a missed one.
pub fn directories_equal(a: &Path, b: &Path) -> bool {
    if !a.is_dir() || !b.is_dir() {
        return false;
    }

    match (tree_fingerprint(a), tree_fingerprint(b)) {
        (Ok(left), Ok(right)) => left == right,
        (left, right) => {
            if let Err(err) = left.and(right) {
                debug!("fingerprint failed, falling back to full walk: {err:#}");
            }
            structural_equal(a, b)
        }
    }
}

/// Deterministic digest of a directory tree: every file's relative
/// path, size, whole-second mtime and (for small files) a head/tail
/// content sample, folded into one hash in sorted path order so the
/// result does not depend on filesystem iteration order.
pub fn tree_fingerprint(root: &Path) -> Result<blake3::Hash> {
    let mut rel_paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("strip tree root")?
            .to_path_buf();
        rel_paths.push(rel);
    }
    rel_paths.sort();

    let mut hasher = Hasher::new();
    for rel in &rel_paths {
        hash_file(&mut hasher, root, rel);
    }
    Ok(hasher.finalize())
}

fn hash_file(hasher: &mut Hasher, root: &Path, rel: &Path) {
    let rel_text = rel.to_string_lossy().replace('\\', "/");
    hasher.update(rel_text.as_bytes());

    let full = root.join(rel);
    let meta = match fs::metadata(&full) {
        Ok(meta) => meta,
        Err(_) => {
            // Unreadable: counted as present but empty.
            hasher.update(b"0");
            return;
        }
    };

    let size = meta.len();
    hasher.update(size.to_string().as_bytes());
    if let Ok(modified) = meta.modified() {
        if let Ok(duration) = modified.duration_since(UNIX_EPOCH) {
            // Whole seconds only: finer precision does not survive
            // every filesystem a backup tree may land on.
            hasher.update(&duration.as_secs().to_le_bytes());
        }
    }

    if size == 0 || size > SAMPLE_SIZE_LIMIT {
        return;
    }
    if sample_file(hasher, &full, size).is_none() {
        hasher.update(b"0");
    }
}

fn sample_file(hasher: &mut Hasher, path: &Path, size: u64) -> Option<()> {
    let chunk = SAMPLE_CHUNK.min(size) as usize;
    let mut file = fs::File::open(path).ok()?;

    let mut head = vec![0u8; chunk];
    file.read_exact(&mut head).ok()?;
    hasher.update(&head);

    if size > SAMPLE_CHUNK * 2 {
        file.seek(SeekFrom::End(-(chunk as i64))).ok()?;
        let mut tail = vec![0u8; chunk];
        file.read_exact(&mut tail).ok()?;
        hasher.update(&tail);
    }
    Some(())
}

/// Exhaustive comparison used when fingerprinting is not possible:
/// matching entry sets level by level, full byte comparison for files.
fn structural_equal(a: &Path, b: &Path) -> bool {
    let (Some(left), Some(right)) = (list_entries(a), list_entries(b)) else {
        return false;
    };
    if left.len() != right.len() {
        return false;
    }

    for (name, is_dir) in &left {
        match right.get(name) {
            Some(other_is_dir) if other_is_dir == is_dir => {}
            _ => return false,
        }
        let left_path = a.join(name);
        let right_path = b.join(name);
        let same = if *is_dir {
            structural_equal(&left_path, &right_path)
        } else {
            files_equal(&left_path, &right_path)
        };
        if !same {
            return false;
        }
    }
    true
}

fn list_entries(root: &Path) -> Option<BTreeMap<OsString, bool>> {
    let mut out = BTreeMap::new();
    for entry in fs::read_dir(root).ok()? {
        let entry = entry.ok()?;
        let kind = entry.file_type().ok()?;
        out.insert(entry.file_name(), kind.is_dir());
    }
    Some(out)
}

fn files_equal(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (fs::metadata(a), fs::metadata(b)) else {
        return false;
    };
    if meta_a.len() != meta_b.len() {
        return false;
    }

    let (Ok(file_a), Ok(file_b)) = (fs::File::open(a), fs::File::open(b)) else {
        return false;
    };
    let mut reader_a = BufReader::new(file_a);
    let mut reader_b = BufReader::new(file_b);
    let mut buf_a = [0u8; 64 * 1024];
    let mut buf_b = [0u8; 64 * 1024];

    loop {
        let read_a = match reader_a.read(&mut buf_a) {
            Ok(n) => n,
            Err(_) => return false,
        };
        if read_a == 0 {
            return true;
        }
        if reader_b.read_exact(&mut buf_b[..read_a]).is_err() {
            return false;
        }
        if buf_a[..read_a] != buf_b[..read_a] {
            return false;
        }
    }
}
