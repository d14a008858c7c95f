//! Statement file naming and transfer-directory housekeeping.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ofxfetch_shared::ofx::format_datetime;
use ofxfetch_shared::{OfxError, Result};
use tracing::debug;
use uuid::Uuid;

/// Characters never allowed in a statement file name.
const ILLEGAL_NAME_CHARS: &[char] = &[
    ' ', '&', '\\', '/', ':', '*', '?', '"', '<', '>', '|', '(', ')',
];

/// Drop characters that are illegal in paths (plus space and `&`).
pub fn sanitize_site_name(name: &str) -> String {
    name.chars()
        .filter(|c| !ILLEGAL_NAME_CHARS.contains(c) && !c.is_control())
        .collect()
}

/// A six-digit random number (100000..=999999).
pub fn random_suffix() -> u32 {
    (Uuid::new_v4().as_u128() % 900_000) as u32 + 100_000
}

/// `<site><YYYYMMDDHHMMSS><random>.ofx`
pub fn statement_file_name(site_name: &str, now: NaiveDateTime) -> String {
    format!(
        "{}{}{}.ofx",
        sanitize_site_name(site_name),
        format_datetime(now),
        random_suffix()
    )
}

/// `combined<random>.ofx`
pub fn combined_file_name() -> String {
    format!("combined{}.ofx", random_suffix())
}

/// Create `dir` if needed.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| OfxError::io(dir, e))
}

/// Whether a path has an `.ofx` extension (any case).
pub fn has_ofx_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ofx"))
}

/// Delete statement files left over from a previous run.
///
/// Only `*.ofx` files directly inside `dir` are touched. Returns how many
/// were removed; a missing directory removes nothing.
pub fn clear_statement_files(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for path in list_files(dir)? {
        if has_ofx_extension(&path) {
            std::fs::remove_file(&path).map_err(|e| OfxError::io(&path, e))?;
            removed += 1;
        }
    }
    debug!(dir = %dir.display(), removed, "cleared old statement files");
    Ok(removed)
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| OfxError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| OfxError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
